//! Logging utilities for sanitizing message payloads so logs stay single-line.
//! Escapes control characters that otherwise break log readability.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///
/// Truncates very long strings (over `max_preview`) with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape raw bytes for single-line logging, falling back to a hex preview when the
/// payload is not valid UTF-8.
pub fn escape_payload_log(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => escape_log(s),
        Err(_) => {
            const MAX_BYTES: usize = 64;
            let preview = &bytes[..bytes.len().min(MAX_BYTES)];
            let mut out = String::with_capacity(preview.len() * 2 + 8);
            for b in preview {
                use std::fmt::Write;
                let _ = write!(&mut out, "{:02x}", b);
            }
            if bytes.len() > MAX_BYTES {
                out.push('…');
            }
            format!("<binary:{}B {}>", bytes.len(), out)
        }
    }
}
