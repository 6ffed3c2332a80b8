//! Reference `PersistentStorage` implementation backed by `sled`. Each
//! bundle is stored as a JSON blob under its flat key in a single tree, so
//! a whole-application save/load is one scan of that tree.

use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::bundle::Bundle;

use super::PersistentStorage;

const MARKER_KEY: &str = "\0corebus-initialized";

pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let db = sled::open(path.as_ref()).with_context(|| format!("opening sled db at '{}'", path.as_ref().display()))?;
        Ok(Self { db })
    }
}

impl PersistentStorage for SledStorage {
    fn load_bundles(&mut self) -> Result<Option<HashMap<String, Bundle>>> {
        if !self.db.contains_key(MARKER_KEY)? {
            return Ok(None);
        }
        let mut out = HashMap::new();
        for entry in self.db.iter() {
            let (key, value) = entry?;
            if key.as_ref() == MARKER_KEY.as_bytes() {
                continue;
            }
            let key = String::from_utf8(key.to_vec()).context("bundle key is not valid UTF-8")?;
            let bundle: Bundle = serde_json::from_slice(&value).with_context(|| format!("decoding bundle '{}'", key))?;
            out.insert(key, bundle);
        }
        Ok(Some(out))
    }

    fn save_bundles(&mut self, bundles: &HashMap<String, Bundle>) -> Result<()> {
        self.db.clear()?;
        self.db.insert(MARKER_KEY, &[1u8][..])?;
        for (key, bundle) in bundles {
            let json = serde_json::to_vec(bundle).with_context(|| format!("encoding bundle '{}'", key))?;
            self.db.insert(key.as_bytes(), json)?;
        }
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_reports_no_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = SledStorage::open(dir.path().join("db")).unwrap();
        assert!(storage.load_bundles().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = SledStorage::open(dir.path().join("db")).unwrap();

        let mut bundles = HashMap::new();
        let mut b = Bundle::new();
        b.put_int("count", 7);
        bundles.insert("data/counter".to_string(), b);

        storage.save_bundles(&bundles).unwrap();
        let loaded = storage.load_bundles().unwrap().unwrap();
        assert_eq!(loaded.get("data/counter").unwrap().get_as_int("count", -1), 7);
    }

    #[test]
    fn save_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = SledStorage::open(dir.path().join("db")).unwrap();

        let mut first = HashMap::new();
        first.insert("data/a".to_string(), Bundle::new());
        storage.save_bundles(&first).unwrap();

        let mut second = HashMap::new();
        let mut b = Bundle::new();
        b.put_bool("flag", true);
        second.insert("data/b".to_string(), b);
        storage.save_bundles(&second).unwrap();

        let loaded = storage.load_bundles().unwrap().unwrap();
        assert!(!loaded.contains_key("data/a"));
        assert!(loaded.contains_key("data/b"));
    }
}
