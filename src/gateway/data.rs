//! Minimal reference "owning data gateway": the data-item cascade
//! (notify-on-change → data gateway → router) cannot be exercised without
//! *some* gateway filling this role. It tracks which local ids it has been
//! told about and forwards value changes as received messages on the
//! matching topic, the same way a full data gateway backed by external
//! storage would.

use std::collections::HashSet;

use crate::action::LocalizedMessage;

use super::{Gateway, GatewayKind, ReceiveHandle};

pub struct SimpleDataGateway {
    receive: ReceiveHandle,
    known_local_ids: HashSet<String>,
}

impl SimpleDataGateway {
    pub fn new(receive: ReceiveHandle) -> Self {
        Self {
            receive,
            known_local_ids: HashSet::new(),
        }
    }

    /// Called by the application facade when a data item under this
    /// gateway's id is registered, so `is_valid_topic_name` can recognize it.
    pub fn register_local_id(&mut self, local_id: impl Into<String>) {
        self.known_local_ids.insert(local_id.into());
    }
}

impl Gateway for SimpleDataGateway {
    fn on_publish(&mut self, message: &LocalizedMessage) {
        // A real data gateway backed by a writable external source would
        // translate this into a write and let the value flow back through
        // the usual synchronize cascade; the in-memory reference has nothing
        // to write to.
        log::trace!(target: "gateway", "data gateway ignoring direct publish to '{}'", message.topic);
    }

    fn is_valid_topic_name(&self, localized_topic: &str) -> bool {
        self.known_local_ids.contains(localized_topic)
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::Data
    }

    fn notify_value_changed(&mut self, local_id: &str, payload: Option<&serde_json::Value>) {
        let bytes = payload.map(|v| serde_json::to_vec(v).unwrap_or_default()).unwrap_or_default();
        self.receive.push_received(local_id, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ActionExecutor, AutosaveConfig, DispatchEngine};
    use crate::router::GatewayId;
    use std::sync::mpsc;

    struct RecordingExecutor(mpsc::Sender<crate::action::Action>);
    impl ActionExecutor for RecordingExecutor {
        fn execute(&mut self, action: crate::action::Action) {
            let _ = self.0.send(action);
        }
    }

    #[test]
    fn value_change_notification_becomes_a_received_message_on_local_id() {
        let (tx, rx) = mpsc::channel();
        let engine = DispatchEngine::start(RecordingExecutor(tx), AutosaveConfig::disabled());
        let dispatch = engine.handle();
        let receive = ReceiveHandle::new(GatewayId::parse("data").unwrap(), dispatch.clone());
        let mut gw = SimpleDataGateway::new(receive);
        gw.register_local_id("temp");

        assert!(gw.is_valid_topic_name("temp"));
        assert!(!gw.is_valid_topic_name("unknown"));

        gw.notify_value_changed("temp", Some(&serde_json::json!(21)));
        let action = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        match action {
            crate::action::Action::MessageReceived { message, .. } => {
                assert_eq!(message.topic.as_str(), "temp");
                assert_eq!(message.payload_as_str(), Some("21"));
            }
            other => panic!("unexpected action: {:?}", other),
        }

        dispatch.request_exit();
        engine.join();
    }
}
