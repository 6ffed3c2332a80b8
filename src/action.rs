//! # Action & Schedule Primitives
//!
//! `Action` is the sum-typed unit of work the dispatch engine (`dispatch`
//! module) executes one at a time, in order. `Schedule` attaches a
//! repetition policy to an action enqueued on the scheduled queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::bundle::Bundle;
use crate::router::GatewayId;
use crate::topic::Topic;

/// A message addressed at a single gateway, after the gateway-id head has
/// been stripped from its topic (the "localized" form a gateway's `onPublish`
/// / `onAddTopicFilter` see).
#[derive(Debug, Clone)]
pub struct LocalizedMessage {
    pub topic: Topic,
    pub payload: Arc<[u8]>,
}

impl LocalizedMessage {
    pub fn new(topic: Topic, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            topic,
            payload: payload.into(),
        }
    }

    /// Best-effort UTF-8 view of the payload; `None` for binary payloads.
    pub fn payload_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

pub type RunnableFn = Box<dyn FnOnce() + Send + 'static>;

/// Work items executed one at a time, in order, on the dispatch thread.
pub enum Action {
    Publish {
        gateway: GatewayId,
        message: LocalizedMessage,
    },
    MessageReceived {
        gateway: GatewayId,
        message: LocalizedMessage,
    },
    SubscriptionChange {
        gateway: GatewayId,
        localized_filter: String,
        subscribe: bool,
    },
    SynchronizeDataItem {
        item_id: String,
    },
    RequestChange {
        item_id: String,
        /// Opaque, type-erased request payload; the data-item registry
        /// downcasts it against the item's declared value type.
        value: Box<dyn std::any::Any + Send>,
    },
    RunCallback(RunnableFn),
    /// Triggers a full save: every gateway and every active data item
    /// flushes its current state into one combined bundle map.
    SaveState,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Publish { gateway, message } => f
                .debug_struct("Publish")
                .field("gateway", gateway)
                .field("topic", &message.topic)
                .finish(),
            Action::MessageReceived { gateway, message } => f
                .debug_struct("MessageReceived")
                .field("gateway", gateway)
                .field("topic", &message.topic)
                .finish(),
            Action::SubscriptionChange {
                gateway,
                localized_filter,
                subscribe,
            } => f
                .debug_struct("SubscriptionChange")
                .field("gateway", gateway)
                .field("filter", localized_filter)
                .field("subscribe", subscribe)
                .finish(),
            Action::SynchronizeDataItem { item_id } => {
                f.debug_struct("SynchronizeDataItem").field("item_id", item_id).finish()
            }
            Action::RequestChange { item_id, .. } => {
                f.debug_struct("RequestChange").field("item_id", item_id).finish()
            }
            Action::RunCallback(_) => f.write_str("RunCallback(..)"),
            Action::SaveState => f.write_str("SaveState"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    Once,
    FixedRate,
    FixedDelay,
}

/// Repetition policy for a scheduled action. Cheaply cloneable; all clones
/// share the same cancellation flag so `cancel()` affects every
/// not-yet-executed instance derived from this schedule.
#[derive(Clone)]
pub struct Schedule {
    inner: Arc<ScheduleInner>,
}

struct ScheduleInner {
    initial_delay: Duration,
    period: Duration,
    mode: ScheduleMode,
    cancelled: AtomicBool,
}

impl Schedule {
    pub fn once(initial_delay: Duration) -> Self {
        Self::new(initial_delay, Duration::ZERO, ScheduleMode::Once)
    }

    pub fn fixed_rate(initial_delay: Duration, period: Duration) -> Self {
        Self::new(initial_delay, period, ScheduleMode::FixedRate)
    }

    pub fn fixed_delay(initial_delay: Duration, period: Duration) -> Self {
        Self::new(initial_delay, period, ScheduleMode::FixedDelay)
    }

    fn new(initial_delay: Duration, period: Duration, mode: ScheduleMode) -> Self {
        Self {
            inner: Arc::new(ScheduleInner {
                initial_delay,
                period,
                mode,
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    pub fn initial_delay(&self) -> Duration {
        self.inner.initial_delay
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    pub fn mode(&self) -> ScheduleMode {
        self.inner.mode
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Marks the schedule cancelled. Already-enqueued occurrences are not
    /// removed from the scheduled queue; the dispatch loop checks
    /// `is_cancelled` when it pops one and silently discards it instead of
    /// materializing and running its action.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schedule")
            .field("mode", &self.inner.mode)
            .field("period", &self.inner.period)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Produces the `Action` a scheduled entry runs. A plain `Action` can only be
/// consumed once; a `FixedRate`/`FixedDelay` schedule re-fires many times, so
/// its entry instead carries a factory that materializes a fresh `Action` on
/// each occurrence (this is how `Application::publishAtFixedRate` and
/// `invokeAtFixedRate` stay representable without requiring `Action: Clone`,
/// which it deliberately is not — `RequestChange` carries a type-erased
/// one-shot payload).
#[derive(Clone)]
pub enum ActionSource {
    Once(Arc<std::sync::Mutex<Option<Action>>>),
    Repeating(Arc<dyn Fn() -> Action + Send + Sync>),
}

impl ActionSource {
    pub fn once(action: Action) -> Self {
        Self::Once(Arc::new(std::sync::Mutex::new(Some(action))))
    }

    pub fn repeating<F: Fn() -> Action + Send + Sync + 'static>(factory: F) -> Self {
        Self::Repeating(Arc::new(factory))
    }

    /// Produce the next `Action` to run. Calling this on an already-consumed
    /// `Once` source is a logic error (the dispatch engine never reschedules
    /// a `Once` entry, so this can't happen in practice).
    pub fn materialize(&self) -> Action {
        match self {
            ActionSource::Once(slot) => slot
                .lock()
                .unwrap()
                .take()
                .expect("Once action source materialized more than once"),
            ActionSource::Repeating(factory) => factory(),
        }
    }
}

/// An action waiting in the dispatch engine's scheduled (min-heap) queue.
pub struct ScheduledAction {
    pub execution_time: std::time::Instant,
    pub source: ActionSource,
    pub schedule: Schedule,
    /// This entry cannot run until the engine has processed at least this
    /// many unscheduled actions, preventing it from jumping ahead of work
    /// that was queued before it.
    pub preceding_action_count: u64,
}

impl std::fmt::Debug for ScheduledAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledAction")
            .field("execution_time", &self.execution_time)
            .field("preceding_action_count", &self.preceding_action_count)
            .finish()
    }
}

/// Placeholder for bundles a data-item gateway hands each item on start,
/// re-exported here since `Action::SaveState` and gateway start hooks both
/// reference "a map of bundles keyed by local id".
pub type BundleMap = std::collections::HashMap<String, Bundle>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_visible_to_clones() {
        let s = Schedule::fixed_rate(Duration::from_millis(1), Duration::from_millis(10));
        let clone = s.clone();
        assert!(!s.is_cancelled());
        s.cancel();
        assert!(s.is_cancelled());
        assert!(clone.is_cancelled());
        s.cancel();
        assert!(s.is_cancelled());
    }
}
