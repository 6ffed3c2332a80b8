//! Built-in `$SYS` gateway: the only gateway started before every other one.
//! Accepts exactly two topic names, case-insensitively: `exit` (requests
//! dispatch-loop exit) and `save` (enqueues an immediate state save). Emits
//! `start` on startup and `state-saved` after each save completes.

use crate::action::{Action, BundleMap, LocalizedMessage};
use crate::dispatch::DispatchHandle;
use crate::error::GatewayError;
use crate::logutil::escape_log;

use super::{Gateway, GatewayKind, ReceiveHandle};

pub struct SystemGateway {
    dispatch: DispatchHandle,
    receive: ReceiveHandle,
}

impl SystemGateway {
    pub fn new(dispatch: DispatchHandle, receive: ReceiveHandle) -> Self {
        Self { dispatch, receive }
    }
}

impl Gateway for SystemGateway {
    fn on_start(&mut self, _bundles: BundleMap) -> Result<(), GatewayError> {
        self.receive.push_received("start", Vec::new());
        Ok(())
    }

    fn on_state_saved(&mut self) {
        self.receive.push_received("state-saved", Vec::new());
    }

    fn on_publish(&mut self, message: &LocalizedMessage) {
        match message.topic.as_str().to_ascii_lowercase().as_str() {
            "exit" => {
                log::info!(target: "gateway", "$SYS/exit received, requesting dispatch exit");
                self.dispatch.request_exit();
            }
            "save" => self.dispatch.enqueue(Action::SaveState),
            other => log::debug!(target: "gateway", "$SYS ignoring unrecognized command '{}'", escape_log(other)),
        }
    }

    fn is_valid_topic_name(&self, localized_topic: &str) -> bool {
        matches!(localized_topic.to_ascii_lowercase().as_str(), "exit" | "save")
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::System
    }
}
