//! # Gateway Registry & Lifecycle
//!
//! The `Gateway` trait is the crate's primary extension point: each attached
//! gateway owns one leaf of the topic namespace (its gateway id), consumes
//! publishes addressed to it, and can push externally-received messages back
//! in via a [`ReceiveHandle`] from any thread.
//!
//! `GatewayRegistry` owns every attached gateway and enforces start/stop
//! ordering: `$SYS` first, then non-data gateways, then data gateways; the
//! reverse on shutdown.

pub mod data;
pub mod echo;
pub mod mailbox;
pub mod system;

use std::collections::HashMap;
use std::sync::Arc;

use crate::action::{BundleMap, LocalizedMessage};
use crate::bundle::Bundle;
use crate::dispatch::DispatchHandle;
use crate::error::GatewayError;
use crate::logutil::escape_log;
use crate::router::{GatewayId, SubscriptionRouter};
use crate::topic::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    System,
    Data,
    Generic,
}

/// Implemented by every gateway. All methods except construction are
/// invoked only from the dispatch thread, between `on_start` and `on_stop`.
pub trait Gateway: Send {
    fn on_start(&mut self, bundles: BundleMap) -> Result<(), GatewayError> {
        let _ = bundles;
        Ok(())
    }

    fn on_add_topic_filter(&mut self, localized_filter: &str) {
        let _ = localized_filter;
    }

    fn on_remove_topic_filter(&mut self, localized_filter: &str) {
        let _ = localized_filter;
    }

    fn on_publish(&mut self, message: &LocalizedMessage);

    /// Keys are local to this gateway; the registry prefixes them with the
    /// gateway id before handing them to persistent storage.
    fn on_save_state(&mut self, out: &mut BundleMap) {
        let _ = out;
    }

    fn on_stop(&mut self) {}

    /// Invoked on every gateway once a save triggered by `Action::SaveState`
    /// completes successfully. The default no-op is correct for every
    /// gateway except `$SYS`, which surfaces this as a `state-saved` message.
    fn on_state_saved(&mut self) {}

    /// Whether `onPublish` would accept this localized topic. Used to reject
    /// a publish before it is ever enqueued.
    fn is_valid_topic_name(&self, localized_topic: &str) -> bool {
        let _ = localized_topic;
        true
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::Generic
    }

    /// Invoked on a data gateway when one of the data items it owns changes
    /// value; the default no-op is correct for every non-data gateway.
    fn notify_value_changed(&mut self, local_id: &str, payload: Option<&serde_json::Value>) {
        let _ = (local_id, payload);
    }
}

/// Cheaply-cloneable, thread-safe endpoint a gateway uses to deliver
/// messages it received from outside the process. Enqueues a
/// `MessageReceived` action; never blocks.
#[derive(Clone)]
pub struct ReceiveHandle {
    id: GatewayId,
    dispatch: DispatchHandle,
}

impl ReceiveHandle {
    pub(crate) fn new(id: GatewayId, dispatch: DispatchHandle) -> Self {
        Self { id, dispatch }
    }

    pub fn id(&self) -> &GatewayId {
        &self.id
    }

    /// `localized_topic` must be a valid, non-wildcard topic name; invalid
    /// topics are logged and dropped rather than panicking a caller that may
    /// be running on a gateway's own IO thread.
    pub fn push_received(&self, localized_topic: &str, payload: impl Into<Arc<[u8]>>) {
        match Topic::parse(localized_topic) {
            Ok(topic) => {
                self.dispatch.enqueue(crate::action::Action::MessageReceived {
                    gateway: self.id.clone(),
                    message: LocalizedMessage::new(topic, payload),
                });
            }
            Err(e) => {
                log::warn!(
                    target: "gateway",
                    "dropping received message on '{}' with invalid topic '{}': {}",
                    self.id,
                    escape_log(localized_topic),
                    e
                );
            }
        }
    }
}

pub struct GatewayRegistry {
    entries: HashMap<GatewayId, Box<dyn Gateway>>,
    start_order: Vec<GatewayId>,
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            start_order: Vec::new(),
        }
    }

    pub fn attach(&mut self, id: GatewayId, gateway: Box<dyn Gateway>) -> Result<(), GatewayError> {
        if self.entries.contains_key(&id) {
            return Err(GatewayError::DuplicateId(id.to_string()));
        }
        self.entries.insert(id, gateway);
        Ok(())
    }

    pub fn contains(&self, id: &GatewayId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> Vec<GatewayId> {
        self.entries.keys().cloned().collect()
    }

    /// Starts every attached gateway in order `$SYS` → non-data → data,
    /// handing each the bundles persisted under its id on the previous run,
    /// then replays every filter already registered for it. Aborts on the
    /// first failure; gateways started before the failure are left started
    /// (the caller is expected to treat this as a fatal boot error).
    pub fn start_all(
        &mut self,
        mut bundles_by_gateway: HashMap<GatewayId, BundleMap>,
        router: &SubscriptionRouter,
    ) -> Result<(), GatewayError> {
        let sys_id = GatewayId::reserved("$SYS");
        let mut rest: Vec<GatewayId> = self.entries.keys().filter(|id| **id != sys_id).cloned().collect();
        rest.sort_by_key(|id| matches!(self.entries.get(id).map(|g| g.kind()), Some(GatewayKind::Data)));

        let mut ordered = Vec::new();
        if self.entries.contains_key(&sys_id) {
            ordered.push(sys_id);
        }
        ordered.extend(rest);

        for id in ordered {
            let bundles = bundles_by_gateway.remove(&id).unwrap_or_default();
            let gateway = self.entries.get_mut(&id).expect("id drawn from entries");
            gateway
                .on_start(bundles)
                .map_err(|e| GatewayError::StartFailed(id.to_string(), e.to_string()))?;
            for filter in router.existing_filters_for(&id) {
                gateway.on_add_topic_filter(&filter);
            }
            self.start_order.push(id);
        }
        Ok(())
    }

    /// Stops every gateway in the reverse of its start order.
    pub fn stop_all(&mut self) {
        for id in self.start_order.drain(..).rev().collect::<Vec<_>>() {
            if let Some(gateway) = self.entries.get_mut(&id) {
                gateway.on_stop();
            }
        }
    }

    pub fn publish(&mut self, gateway: &GatewayId, message: &LocalizedMessage) -> Result<(), GatewayError> {
        let gw = self
            .entries
            .get_mut(gateway)
            .ok_or_else(|| GatewayError::UnknownGateway(gateway.to_string()))?;
        gw.on_publish(message);
        Ok(())
    }

    pub fn add_topic_filter(&mut self, gateway: &GatewayId, localized_filter: &str) {
        if let Some(gw) = self.entries.get_mut(gateway) {
            gw.on_add_topic_filter(localized_filter);
        }
    }

    pub fn remove_topic_filter(&mut self, gateway: &GatewayId, localized_filter: &str) {
        if let Some(gw) = self.entries.get_mut(gateway) {
            gw.on_remove_topic_filter(localized_filter);
        }
    }

    pub fn is_valid_topic_name(&self, gateway: &GatewayId, localized_topic: &str) -> bool {
        self.entries
            .get(gateway)
            .map(|g| g.is_valid_topic_name(localized_topic))
            .unwrap_or(false)
    }

    pub fn notify_value_changed(&mut self, gateway: &GatewayId, local_id: &str, payload: Option<&serde_json::Value>) {
        if let Some(gw) = self.entries.get_mut(gateway) {
            gw.notify_value_changed(local_id, payload);
        }
    }

    /// Broadcasts save completion to every attached gateway.
    pub fn notify_state_saved(&mut self) {
        for gateway in self.entries.values_mut() {
            gateway.on_state_saved();
        }
    }

    /// Collects every gateway's `onSaveState` output, keyed by
    /// `"gatewayId/localKey"`, skipping empty bundles.
    pub fn save_state(&mut self) -> HashMap<String, Bundle> {
        let mut out = HashMap::new();
        for (id, gateway) in self.entries.iter_mut() {
            let mut bundles: BundleMap = HashMap::new();
            gateway.on_save_state(&mut bundles);
            for (local_key, bundle) in bundles {
                if !bundle.is_empty() {
                    out.insert(format!("{}/{}", id, local_key), bundle);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingGateway {
        name: &'static str,
        kind: GatewayKind,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Gateway for RecordingGateway {
        fn on_start(&mut self, _bundles: BundleMap) -> Result<(), GatewayError> {
            self.log.lock().unwrap().push(format!("start:{}", self.name));
            Ok(())
        }
        fn on_publish(&mut self, _message: &LocalizedMessage) {}
        fn on_stop(&mut self) {
            self.log.lock().unwrap().push(format!("stop:{}", self.name));
        }
        fn kind(&self) -> GatewayKind {
            self.kind
        }
    }

    #[test]
    fn start_order_is_sys_then_non_data_then_data() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = GatewayRegistry::new();
        registry
            .attach(
                GatewayId::reserved("$SYS"),
                Box::new(RecordingGateway {
                    name: "$SYS",
                    kind: GatewayKind::System,
                    log: log.clone(),
                }),
            )
            .unwrap();
        registry
            .attach(
                GatewayId::parse("data").unwrap(),
                Box::new(RecordingGateway {
                    name: "data",
                    kind: GatewayKind::Data,
                    log: log.clone(),
                }),
            )
            .unwrap();
        registry
            .attach(
                GatewayId::parse("echo").unwrap(),
                Box::new(RecordingGateway {
                    name: "echo",
                    kind: GatewayKind::Generic,
                    log: log.clone(),
                }),
            )
            .unwrap();

        let router = SubscriptionRouter::new();
        registry.start_all(HashMap::new(), &router).unwrap();
        assert_eq!(registry.start_order, vec![
            GatewayId::reserved("$SYS"),
            GatewayId::parse("echo").unwrap(),
            GatewayId::parse("data").unwrap(),
        ]);
    }

    #[test]
    fn stop_order_is_reverse_of_start() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = GatewayRegistry::new();
        registry
            .attach(
                GatewayId::reserved("$SYS"),
                Box::new(RecordingGateway {
                    name: "$SYS",
                    kind: GatewayKind::System,
                    log: log.clone(),
                }),
            )
            .unwrap();
        registry
            .attach(
                GatewayId::parse("echo").unwrap(),
                Box::new(RecordingGateway {
                    name: "echo",
                    kind: GatewayKind::Generic,
                    log: log.clone(),
                }),
            )
            .unwrap();
        registry
            .attach(
                GatewayId::parse("data").unwrap(),
                Box::new(RecordingGateway {
                    name: "data",
                    kind: GatewayKind::Data,
                    log: log.clone(),
                }),
            )
            .unwrap();

        let router = SubscriptionRouter::new();
        registry.start_all(HashMap::new(), &router).unwrap();
        registry.stop_all();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start:$SYS", "start:echo", "start:data", "stop:data", "stop:echo", "stop:$SYS"]
        );
    }
}
