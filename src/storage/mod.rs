//! # Persistent Storage
//!
//! `PersistentStorage` is the seam between the application facade and
//! whatever backing store a host application brings; [`sled_backend`]
//! ships a reference implementation so the crate is runnable end to end
//! without one. Bundles are addressed by a flat key of the form
//! `"gatewayId/subkey"` — a gateway's own state uses its id as a prefix, a
//! data item's state uses its full `"gatewayId/localId"` id directly.

pub mod sled_backend;

use std::collections::HashMap;

use crate::bundle::Bundle;

/// Implemented by whatever backs `Application::set_persistent_storage`.
/// Both methods run on the dispatch thread; blocking IO here blocks the
/// whole application, so implementations backed by slow storage should
/// consider an async backend wrapped with `tokio::task::block_in_place` or
/// equivalent (the in-crate `sled` reference adapter is fast enough not to
/// need this).
pub trait PersistentStorage: Send {
    /// Returns `Ok(None)` (not an empty map) to distinguish "first run, no
    /// store on disk yet" from "every bundle happened to be empty".
    fn load_bundles(&mut self) -> anyhow::Result<Option<HashMap<String, Bundle>>>;

    fn save_bundles(&mut self, bundles: &HashMap<String, Bundle>) -> anyhow::Result<()>;
}

/// A storage backend that persists nothing; every load returns `None` and
/// every save is a no-op. The default when no storage has been configured.
#[derive(Default)]
pub struct NullStorage;

impl PersistentStorage for NullStorage {
    fn load_bundles(&mut self) -> anyhow::Result<Option<HashMap<String, Bundle>>> {
        Ok(None)
    }

    fn save_bundles(&mut self, _bundles: &HashMap<String, Bundle>) -> anyhow::Result<()> {
        Ok(())
    }
}
