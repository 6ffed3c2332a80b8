//! # Topic Model
//!
//! Hierarchical, MQTT-style topic names and filters. A topic name is the
//! concrete destination a [`crate::action::Action::Publish`] targets; a topic
//! filter is what a [`crate::router::SubscriptionRouter`] matches against it.
//!
//! Levels are opaque strings split on `/`. The two reserved wildcard levels
//! are `+` (matches exactly one level) and `#` (matches one or more trailing
//! levels, only legal as the last level of a filter, at most once).

use crate::error::TopicError;

pub const MAX_TOPIC_OCTETS: usize = 65536;

/// Split a topic or filter string into its levels, preserving empty levels
/// (so `"a//b"` yields `["a", "", "b"]`).
pub fn parse_hierarchy(s: &str) -> Vec<String> {
    s.split('/').map(|level| level.to_string()).collect()
}

/// A validated, published topic name (no wildcards, bounded length, no NUL).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    raw: String,
    levels: Vec<String>,
}

impl Topic {
    pub fn parse(s: &str) -> Result<Self, TopicError> {
        validate_topic_name(s)?;
        Ok(Self {
            raw: s.to_string(),
            levels: parse_hierarchy(s),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// `isValidTopicName`: non-empty, length <= 65536 octets, no NUL byte. No
/// other character restrictions, but wildcard levels are rejected because a
/// published topic must never contain one.
pub fn validate_topic_name(s: &str) -> Result<(), TopicError> {
    if s.is_empty() {
        return Err(TopicError::Empty);
    }
    if s.len() > MAX_TOPIC_OCTETS {
        return Err(TopicError::TooLong {
            max: MAX_TOPIC_OCTETS,
        });
    }
    if s.as_bytes().contains(&0) {
        return Err(TopicError::ContainsNul);
    }
    for level in s.split('/') {
        if level == "+" || level == "#" {
            return Err(TopicError::WildcardInTopic);
        }
    }
    Ok(())
}

/// `isValidTopicFilter`: same base rules as a topic name, plus: every level
/// containing `+` must equal `"+"` exactly; every level containing `#` must
/// equal `"#"` exactly; at most one `#`, and only as the last level.
pub fn validate_topic_filter(s: &str) -> Result<(), TopicError> {
    if s.is_empty() {
        return Err(TopicError::Empty);
    }
    if s.len() > MAX_TOPIC_OCTETS {
        return Err(TopicError::TooLong {
            max: MAX_TOPIC_OCTETS,
        });
    }
    if s.as_bytes().contains(&0) {
        return Err(TopicError::ContainsNul);
    }
    let levels: Vec<&str> = s.split('/').collect();
    let mut seen_multi = false;
    for (idx, level) in levels.iter().enumerate() {
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MalformedWildcard {
                level: level.to_string(),
            });
        }
        if level.contains('#') {
            if *level != "#" {
                return Err(TopicError::MalformedWildcard {
                    level: level.to_string(),
                });
            }
            if seen_multi {
                return Err(TopicError::MultipleMultiLevelWildcards);
            }
            seen_multi = true;
            if idx != levels.len() - 1 {
                return Err(TopicError::MultiLevelWildcardNotLast);
            }
        }
    }
    Ok(())
}

/// A validated topic filter: its levels and whether it ends with `#`.
///
/// A filter with no `+`/`#` levels is "simple"; otherwise it is "wildcard".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    raw: String,
    levels: Vec<String>,
    ends_with_multi_level_wildcard: bool,
}

impl TopicFilter {
    pub fn parse(s: &str) -> Result<Self, TopicError> {
        validate_topic_filter(s)?;
        let levels = parse_hierarchy(s);
        let ends_with_multi_level_wildcard = levels.last().map(|l| l == "#").unwrap_or(false);
        Ok(Self {
            raw: s.to_string(),
            levels,
            ends_with_multi_level_wildcard,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn ends_with_multi_level_wildcard(&self) -> bool {
        self.ends_with_multi_level_wildcard
    }

    /// A filter is "simple" when it contains no `+` or `#` level.
    pub fn is_simple(&self) -> bool {
        !self
            .levels
            .iter()
            .any(|level| level == "+" || level == "#")
    }

    /// Position-by-position match against a topic's levels: `+` matches any
    /// single level; a trailing `#` matches any suffix of one or more
    /// levels; without a trailing `#`, level counts must be equal.
    pub fn matches(&self, topic_levels: &[String]) -> bool {
        let mut fi = 0usize;
        let mut ti = 0usize;
        loop {
            match (self.levels.get(fi), topic_levels.get(ti)) {
                (Some(f), _) if f == "#" => return ti <= topic_levels.len(),
                (Some(f), Some(t)) if f == "+" => {
                    let _ = t;
                    fi += 1;
                    ti += 1;
                }
                (Some(f), Some(t)) => {
                    if f != t {
                        return false;
                    }
                    fi += 1;
                    ti += 1;
                }
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    pub fn matches_topic(&self, topic: &Topic) -> bool {
        self.matches(topic.levels())
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split a filter string (which may carry a leading gateway id, e.g.
/// `"data/+/temp"` or a bare `"#"`) into its head and localized remainder.
///
/// The head is the portion up to the first `/`, or the whole string when
/// there is no `/` at all (e.g. a bare `"#"` or `"+"`, which are global).
/// Returns `(head, localized)` where `localized` is `None` when there is no
/// slash (a bare global filter has no localized portion).
pub fn split_filter_head(s: &str) -> (&str, Option<&str>) {
    match s.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (s, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(s: &str) -> Vec<String> {
        parse_hierarchy(s)
    }

    #[test]
    fn plus_matches_single_level_only() {
        let f = TopicFilter::parse("a/+/c").unwrap();
        assert!(f.matches(&levels("a/b/c")));
        assert!(!f.matches(&levels("a/c")));
        assert!(!f.matches(&levels("a/b/c/d")));
    }

    #[test]
    fn hash_matches_self_and_descendants() {
        let f = TopicFilter::parse("a/#").unwrap();
        assert!(f.matches(&levels("a")));
        assert!(f.matches(&levels("a/b")));
        assert!(f.matches(&levels("a/b/c")));
        assert!(!f.matches(&levels("b")));
    }

    #[test]
    fn bare_hash_matches_everything() {
        let f = TopicFilter::parse("#").unwrap();
        assert!(f.matches(&levels("anything/at/all")));
        assert!(f.matches(&levels("x")));
    }

    #[test]
    fn rejects_malformed_wildcard_levels() {
        assert!(TopicFilter::parse("a/b+c").is_err());
        assert!(TopicFilter::parse("a/#b").is_err());
    }

    #[test]
    fn rejects_hash_not_last_or_duplicated() {
        assert!(TopicFilter::parse("a/#/b").is_err());
        assert!(TopicFilter::parse("a/#/#").is_err());
    }

    #[test]
    fn topic_rejects_wildcards() {
        assert!(Topic::parse("a/+/c").is_err());
        assert!(Topic::parse("a/#").is_err());
        assert!(Topic::parse("a/b").is_ok());
    }

    #[test]
    fn simple_vs_wildcard_classification() {
        assert!(TopicFilter::parse("a/b/c").unwrap().is_simple());
        assert!(!TopicFilter::parse("a/+/c").unwrap().is_simple());
        assert!(!TopicFilter::parse("a/#").unwrap().is_simple());
    }

    #[test]
    fn split_head_bare_wildcard_has_no_localized_part() {
        assert_eq!(split_filter_head("#"), ("#", None));
        assert_eq!(split_filter_head("data/a/b"), ("data", Some("a/b")));
    }
}
