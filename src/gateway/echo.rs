//! Demonstration/test-fixture gateway: accepts any topic and immediately
//! re-delivers a published message back as a received one on the same
//! topic. Not a production gateway — it exists so the crate has a runnable
//! end-to-end example and the gateway contract has automated coverage.

use crate::action::LocalizedMessage;

use super::{Gateway, ReceiveHandle};

pub struct EchoGateway {
    receive: ReceiveHandle,
}

impl EchoGateway {
    pub fn new(receive: ReceiveHandle) -> Self {
        Self { receive }
    }
}

impl Gateway for EchoGateway {
    fn on_publish(&mut self, message: &LocalizedMessage) {
        self.receive.push_received(message.topic.as_str(), message.payload.clone());
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
    fn publish_is_echoed_back_unchanged() {
        let (tx, rx) = mpsc::channel();
        let engine = DispatchEngine::start(RecordingExecutor(tx), AutosaveConfig::disabled());
        let dispatch = engine.handle();
        let receive = ReceiveHandle::new(GatewayId::parse("echo").unwrap(), dispatch.clone());
        let mut gw = EchoGateway::new(receive);

        gw.on_publish(&LocalizedMessage::new(Topic::parse("a/b").unwrap(), b"payload".to_vec()));
        let action = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        match action {
            crate::action::Action::MessageReceived { message, .. } => {
                assert_eq!(message.topic.as_str(), "a/b");
                assert_eq!(&*message.payload, b"payload");
            }
            other => panic!("unexpected action: {:?}", other),
        }

        dispatch.request_exit();
        engine.join();
    }
}
