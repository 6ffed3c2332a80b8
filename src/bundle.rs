//! # Bundle
//!
//! A typed, string-keyed property bag used for state snapshots: data items
//! save their persisted state into one, gateways save their own under
//! `"gatewayId/subkey"`, and [`crate::storage::PersistentStorage`] moves
//! whole maps of them in and out of a backing store.
//!
//! Not safe for concurrent mutation — bundles are built and read on the
//! dispatch thread (or before the application has launched).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Deliberately *not* `#[serde(untagged)]`: an untagged representation would
// collapse `Int`/`Long` values that happen to fit in i32 into the wrong
// variant on deserialization, breaking the save/load round trip (a typed
// getter must read back the exact value and variant that was put in).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    /// Opaque, pre-serialized payload for values that don't fit the primitive
    /// kinds (the core never interprets this).
    Opaque(serde_json::Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    values: BTreeMap<String, Value>,
}

macro_rules! typed_accessors {
    ($put:ident, $get:ident, $variant:ident, $ty:ty) => {
        pub fn $put(&mut self, key: impl Into<String>, value: $ty) {
            self.values.insert(key.into(), Value::$variant(value));
        }

        pub fn $get(&self, key: &str, default: $ty) -> $ty {
            match self.values.get(key) {
                Some(Value::$variant(v)) => v.clone(),
                _ => default,
            }
        }
    };
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    typed_accessors!(put_string, get_as_string, Str, String);
    typed_accessors!(put_bool, get_as_bool, Bool, bool);
    typed_accessors!(put_int, get_as_int, Int, i32);
    typed_accessors!(put_long, get_as_long, Long, i64);
    typed_accessors!(put_double, get_as_double, Double, f64);

    pub fn put_opaque<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), crate::error::BundleError> {
        let json = serde_json::to_value(value)
            .map_err(|e| crate::error::BundleError::Serialization(e.to_string()))?;
        self.values.insert(key.into(), Value::Opaque(json));
        Ok(())
    }

    pub fn get_as_opaque<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        match self.values.get(key) {
            Some(Value::Opaque(json)) => serde_json::from_value(json.clone()).ok(),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// A snapshot of the current keys; mutating the bundle afterward does not
    /// affect the returned set.
    pub fn keys(&self) -> std::collections::BTreeSet<String> {
        self.values.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip_for_primitives_and_strings() {
        let mut b = Bundle::new();
        b.put_string("name", "alice".to_string());
        b.put_bool("active", true);
        b.put_int("count", 7);
        b.put_long("big", 9_000_000_000);
        b.put_double("ratio", 0.5);

        assert_eq!(b.get_as_string("name", String::new()), "alice");
        assert!(b.get_as_bool("active", false));
        assert_eq!(b.get_as_int("count", 0), 7);
        assert_eq!(b.get_as_long("big", 0), 9_000_000_000);
        assert_eq!(b.get_as_double("ratio", 0.0), 0.5);
    }

    #[test]
    fn default_returned_for_missing_or_wrong_kind() {
        let mut b = Bundle::new();
        b.put_string("name", "alice".to_string());

        assert_eq!(b.get_as_int("missing", -1), -1);
        // stored kind differs from requested kind
        assert_eq!(b.get_as_int("name", -1), -1);
    }

    #[test]
    fn keys_is_a_detached_snapshot() {
        let mut b = Bundle::new();
        b.put_bool("x", true);
        let snap = b.keys();
        b.put_bool("y", true);
        assert_eq!(snap.len(), 1);
        assert_eq!(b.keys().len(), 2);
    }

    #[test]
    fn serde_round_trip_via_json() {
        let mut b = Bundle::new();
        b.put_string("s", "v".into());
        b.put_int("i", 5);
        let json = serde_json::to_string(&b).unwrap();
        let back: Bundle = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_as_string("s", "".into()), "v");
        assert_eq!(back.get_as_int("i", 0), 5);
    }
}
