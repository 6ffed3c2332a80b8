//! Built-in `$MAILBOX` gateway: in-process point-to-point topics of the form
//! `mb-<single-level>`. Published messages are echoed straight back to the
//! topic's subscribers, giving callers an ad-hoc reply channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::action::LocalizedMessage;

use super::{Gateway, GatewayKind, ReceiveHandle};

/// Mints a fresh, fully-qualified mailbox topic no prior call with the same
/// counter has been handed before. Shared between [`MailboxGateway`] and
/// [`crate::application::Application::create_mailbox_topic`] so both mint
/// from the same counter and can never collide.
pub fn mint_mailbox_topic(counter: &AtomicU64) -> String {
    let n = counter.fetch_add(1, Ordering::SeqCst);
    format!("$MAILBOX/mb-uid.{:x}", n)
}

pub struct MailboxGateway {
    receive: ReceiveHandle,
    next_uid: Arc<AtomicU64>,
}

impl MailboxGateway {
    pub fn new(receive: ReceiveHandle, next_uid: Arc<AtomicU64>) -> Self {
        Self { receive, next_uid }
    }

    pub fn create_mailbox_topic(&self) -> String {
        mint_mailbox_topic(&self.next_uid)
    }
}

fn is_mailbox_topic(localized_topic: &str) -> bool {
    localized_topic.starts_with("mb-") && !localized_topic.contains('/') && localized_topic.len() > "mb-".len()
}

impl Gateway for MailboxGateway {
    fn on_publish(&mut self, message: &LocalizedMessage) {
        self.receive.push_received(message.topic.as_str(), message.payload.clone());
    }

    fn is_valid_topic_name(&self, localized_topic: &str) -> bool {
        is_mailbox_topic(localized_topic)
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ActionExecutor, AutosaveConfig, DispatchEngine};
    use crate::router::GatewayId;
    use crate::topic::Topic;
    use std::sync::mpsc;

    struct RecordingExecutor(mpsc::Sender<crate::action::Action>);
    impl ActionExecutor for RecordingExecutor {
        fn execute(&mut self, action: crate::action::Action) {
            let _ = self.0.send(action);
        }
    }

    #[test]
    fn created_topics_are_distinct_and_well_formed() {
        let (tx, _rx) = mpsc::channel();
        let engine = DispatchEngine::start(RecordingExecutor(tx), AutosaveConfig::disabled());
        let dispatch = engine.handle();
        let receive = ReceiveHandle::new(GatewayId::reserved("$MAILBOX"), dispatch.clone());
        let gw = MailboxGateway::new(receive, Arc::new(AtomicU64::new(0)));

        let a = gw.create_mailbox_topic();
        let b = gw.create_mailbox_topic();
        assert_ne!(a, b);
        assert!(a.starts_with("$MAILBOX/mb-uid."));

        dispatch.request_exit();
        engine.join();
    }

    #[test]
    fn publish_echoes_back_as_received() {
        let (tx, rx) = mpsc::channel();
        let engine = DispatchEngine::start(RecordingExecutor(tx), AutosaveConfig::disabled());
        let dispatch = engine.handle();
        let receive = ReceiveHandle::new(GatewayId::reserved("$MAILBOX"), dispatch.clone());
        let mut gw = MailboxGateway::new(receive, Arc::new(AtomicU64::new(0)));

        gw.on_publish(&LocalizedMessage::new(Topic::parse("mb-a").unwrap(), b"hi".to_vec()));
        let action = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        match action {
            crate::action::Action::MessageReceived { message, .. } => {
                assert_eq!(message.topic.as_str(), "mb-a");
                assert_eq!(&*message.payload, b"hi");
            }
            other => panic!("unexpected action: {:?}", other),
        }

        assert!(is_mailbox_topic("mb-a"));
        assert!(!is_mailbox_topic("mb-"));
        assert!(!is_mailbox_topic("mb-a/b"));
        assert!(!is_mailbox_topic("other"));

        dispatch.request_exit();
        engine.join();
    }
}
