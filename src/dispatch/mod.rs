//! # Dispatch Engine
//!
//! Owns one dedicated OS thread and two queues guarded by a single mutex: an
//! unscheduled FIFO action queue and a min-heap of scheduled actions. This is
//! a literal `std::thread` + `Mutex` + `Condvar` loop rather than an async
//! task, so every action observes a single, strict total order — the rest
//! of the crate is free to use `tokio` at its edges (IO-bound gateways, the
//! demo binary), but ordering guarantees here do not depend on a runtime.

mod clock;
mod queue;

pub use clock::MonotonicClock;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::action::{Action, ActionSource, Schedule, ScheduledAction};
use queue::{HeapEntry, Queues};

/// Implemented by whatever owns the mutable application state (router,
/// gateway registry, data-item registry) and is driven exclusively from the
/// dispatch thread.
pub trait ActionExecutor: Send {
    /// Execute one action to completion. Faults are expected to be logged by
    /// the implementation and *not* propagated as panics, except for
    /// subscriber-listener panics during message delivery, which this trait's
    /// caller (the dispatch loop) treats as fail-fast.
    fn execute(&mut self, action: Action);

    /// Invoked by the loop when an autosave is due.
    fn save_state(&mut self) {}

    /// Invoked once after the loop exits, before gateways are stopped.
    fn run_shutdown_hooks(&mut self) {}

    /// Invoked once after shutdown hooks and a final save, to stop gateways
    /// in reverse start order.
    fn stop_gateways(&mut self) {}

    /// Invoked once per loop iteration, right after an action is popped, with
    /// the depth of each queue immediately before the pop. The default is a
    /// no-op; implementations that track metrics can use this to feed a
    /// high-watermark gauge without the loop needing to know about metrics.
    fn observe_queue_depths(&mut self, unscheduled_depth: usize, scheduled_depth: usize) {
        let _ = (unscheduled_depth, scheduled_depth);
    }

    /// Invoked once per loop iteration, right before `execute` runs.
    fn record_dispatch(&mut self) {}

    /// Invoked when `execute` panics, after the loop has caught the unwind.
    fn record_fault(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct AutosaveConfig {
    pub period: Option<Duration>,
}

impl AutosaveConfig {
    pub fn disabled() -> Self {
        Self { period: None }
    }

    pub fn every(period: Duration) -> Self {
        if period.is_zero() {
            Self::disabled()
        } else {
            Self { period: Some(period) }
        }
    }
}

struct SharedState {
    queues: Mutex<Queues>,
    condvar: Condvar,
    exit_requested: std::sync::atomic::AtomicBool,
    clock: MonotonicClock,
}

/// A cheaply-cloneable submission endpoint. Safe to call from any thread.
#[derive(Clone)]
pub struct DispatchHandle {
    shared: Arc<SharedState>,
}

impl DispatchHandle {
    /// Enqueue an unscheduled action at the back of the FIFO queue.
    pub fn enqueue(&self, action: Action) {
        let mut q = self.shared.queues.lock().unwrap();
        q.total_action_count += 1;
        q.actions.push_back(action);
        drop(q);
        self.shared.condvar.notify_one();
    }

    /// Enqueue a one-shot action on the scheduled (timer) queue under `schedule`.
    pub fn schedule(&self, action: Action, schedule: Schedule) {
        self.schedule_from(ActionSource::once(action), schedule);
    }

    /// Enqueue a repeatable action (for `FixedRate`/`FixedDelay` schedules):
    /// `factory` is called again each time the schedule re-fires.
    pub fn schedule_repeating<F: Fn() -> Action + Send + Sync + 'static>(
        &self,
        factory: F,
        schedule: Schedule,
    ) {
        self.schedule_from(ActionSource::repeating(factory), schedule);
    }

    fn schedule_from(&self, source: ActionSource, schedule: Schedule) {
        let now = self.shared.clock.now();
        let mut q = self.shared.queues.lock().unwrap();
        let execution_time = now + schedule.initial_delay();
        let preceding_action_count = q.total_action_count;
        let entry = ScheduledAction {
            execution_time,
            source,
            schedule,
            preceding_action_count,
        };
        q.push_scheduled(entry);
        drop(q);
        self.shared.condvar.notify_one();
    }

    pub fn request_exit(&self) {
        self.shared
            .exit_requested
            .store(true, std::sync::atomic::Ordering::Release);
        self.shared.condvar.notify_all();
    }

    pub fn is_exit_requested(&self) -> bool {
        self.shared.exit_requested.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn clock(&self) -> &MonotonicClock {
        &self.shared.clock
    }

    /// Snapshot queue depths for metrics/diagnostics.
    pub fn queue_depths(&self) -> (usize, usize) {
        let q = self.shared.queues.lock().unwrap();
        (q.actions.len(), q.scheduled.len())
    }
}

pub struct DispatchEngine {
    handle: DispatchHandle,
    join: Option<JoinHandle<()>>,
}

impl DispatchHandle {
    /// Build a submission endpoint with no dispatch thread behind it yet.
    /// Actions enqueued through it before [`DispatchEngine::start_with_handle`]
    /// simply wait in the queue for the loop to start draining it. This lets
    /// the application facade hand gateways a working [`DispatchHandle`]
    /// (via `ReceiveHandle`) while they are still being constructed, before
    /// the dispatch thread itself exists.
    pub fn new_detached() -> Self {
        Self {
            shared: Arc::new(SharedState {
                queues: Mutex::new(Queues::default()),
                condvar: Condvar::new(),
                exit_requested: std::sync::atomic::AtomicBool::new(false),
                clock: MonotonicClock::new(),
            }),
        }
    }
}

impl DispatchEngine {
    /// Spawn the dispatch thread, which runs `executor` to completion on
    /// every popped action until `request_exit` is observed.
    pub fn start<E: ActionExecutor + 'static>(executor: E, autosave: AutosaveConfig) -> Self {
        Self::start_with_handle(DispatchHandle::new_detached(), executor, autosave)
    }

    /// Spawn the dispatch thread behind an already-constructed `handle`,
    /// e.g. one gateways were already wired up with pre-launch.
    pub fn start_with_handle<E: ActionExecutor + 'static>(
        handle: DispatchHandle,
        mut executor: E,
        autosave: AutosaveConfig,
    ) -> Self {
        let shared = handle.shared.clone();

        let join = std::thread::Builder::new()
            .name("corebus-dispatch".into())
            .spawn(move || run_loop(shared, &mut executor, autosave))
            .expect("failed to spawn dispatch thread");

        Self {
            handle,
            join: Some(join),
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Block the calling thread until the dispatch loop exits (normally via
    /// `DispatchHandle::request_exit`).
    pub fn join(mut self) {
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn next_entry_ready(q: &mut Queues, now: Instant) -> Option<HeapEntry> {
    let due = q
        .scheduled
        .peek()
        .map(|e| e.execution_time <= now && e.preceding_action_count <= q.processed_unscheduled_count)
        .unwrap_or(false);
    if due {
        q.scheduled.pop()
    } else {
        None
    }
}

fn run_loop<E: ActionExecutor>(shared: Arc<SharedState>, executor: &mut E, autosave: AutosaveConfig) {
    let mut last_save = shared.clock.now();

    'outer: loop {
        let mut depths = (0usize, 0usize);
        let action = loop {
            let now = shared.clock.now();
            let mut q = shared.queues.lock().unwrap();
            depths = (q.actions.len(), q.scheduled.len());

            if let Some(entry) = next_entry_ready(&mut q, now) {
                if entry.schedule.is_cancelled() {
                    // Already-dequeued-but-cancelled: skip silently, try again.
                    continue;
                }
                let action = entry.materialize();
                let scheduled = entry.into_scheduled_action();
                reschedule_if_periodic(&mut q, &scheduled, now);
                break action;
            }

            if let Some(a) = q.actions.pop_front() {
                q.processed_unscheduled_count += 1;
                break a;
            }

            if shared.exit_requested.load(std::sync::atomic::Ordering::Acquire) {
                drop(q);
                break 'outer;
            }

            let timeout = q
                .scheduled
                .peek()
                .map(|e| e.execution_time.saturating_duration_since(now))
                .unwrap_or(Duration::from_secs(3600));
            let (guard, _timeout_result) = shared.condvar.wait_timeout(q, timeout).unwrap();
            drop(guard);
        };

        executor.observe_queue_depths(depths.0, depths.1);
        executor.record_dispatch();
        debug!(target: "dispatch", "executing {:?}", action);
        let result = catch_unwind(AssertUnwindSafe(|| executor.execute(action)));
        if let Err(panic) = result {
            error!(target: "dispatch", "action execution panicked: {}", describe_panic(&panic));
            executor.record_fault();
            // Log and swallow, then keep the loop alive. A panicking listener
            // propagates a panic all the way up to this catch_unwind rather
            // than being caught closer to the call site.
        }

        if let Some(period) = autosave.period {
            let now = shared.clock.now();
            if now.saturating_duration_since(last_save) > period {
                executor.save_state();
                last_save = now;
            }
        }

        if shared.exit_requested.load(std::sync::atomic::Ordering::Acquire) {
            break;
        }
    }

    executor.run_shutdown_hooks();
    executor.save_state();
    executor.stop_gateways();
}

fn reschedule_if_periodic(q: &mut Queues, scheduled: &ScheduledAction, now: Instant) {
    if matches!(scheduled.source, ActionSource::Once(_)) {
        return;
    }
    let period = scheduled.schedule.period();
    let next_time = match scheduled.schedule.mode() {
        crate::action::ScheduleMode::Once => None,
        crate::action::ScheduleMode::FixedDelay => Some(now + period),
        crate::action::ScheduleMode::FixedRate => {
            Some(std::cmp::max(scheduled.execution_time + period, now + period))
        }
    };
    if let Some(execution_time) = next_time {
        if scheduled.schedule.is_cancelled() {
            return;
        }
        q.push_scheduled(ScheduledAction {
            execution_time,
            source: scheduled.source.clone(),
            schedule: scheduled.schedule.clone(),
            preceding_action_count: q.total_action_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    struct RecordingExecutor {
        tx: mpsc::Sender<String>,
    }

    impl ActionExecutor for RecordingExecutor {
        fn execute(&mut self, action: Action) {
            let label = format!("{:?}", action);
            let _ = self.tx.send(label);
        }
    }

    #[test]
    fn fifo_order_preserved_for_unscheduled_actions() {
        let (tx, rx) = mpsc::channel();
        let engine = DispatchEngine::start(RecordingExecutor { tx }, AutosaveConfig::disabled());
        let handle = engine.handle();

        for i in 0..5 {
            handle.enqueue(Action::RunCallback(Box::new(move || {
                let _ = i;
            })));
        }
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        }
        assert_eq!(seen, vec!["RunCallback(..)"; 5]);

        handle.request_exit();
        engine.join();
    }

    #[test]
    fn exit_terminates_loop_promptly() {
        let (tx, _rx) = mpsc::channel();
        let engine = DispatchEngine::start(RecordingExecutor { tx }, AutosaveConfig::disabled());
        let handle = engine.handle();
        handle.request_exit();
        engine.join();
    }

    #[test]
    fn scheduled_action_runs_after_due_time() {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel::<String>();
        let engine = DispatchEngine::start(RecordingExecutor { tx }, AutosaveConfig::disabled());
        let handle = engine.handle();
        let c2 = count.clone();
        handle.schedule(
            Action::RunCallback(Box::new(move || {
                c2.fetch_add(1, Ordering::SeqCst);
            })),
            Schedule::once(Duration::from_millis(20)),
        );
        let _ = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        handle.request_exit();
        engine.join();
    }

    #[test]
    fn repeating_schedule_fires_multiple_times_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel::<String>();
        let engine = DispatchEngine::start(RecordingExecutor { tx }, AutosaveConfig::disabled());
        let handle = engine.handle();
        let c2 = count.clone();
        let schedule = Schedule::fixed_rate(Duration::from_millis(10), Duration::from_millis(15));
        handle.schedule_repeating(
            move || {
                c2.fetch_add(1, Ordering::SeqCst);
                Action::RunCallback(Box::new(|| {}))
            },
            schedule.clone(),
        );
        for _ in 0..3 {
            let _ = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        }
        schedule.cancel();
        let seen_before_cancel = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(60));
        let seen_after = count.load(Ordering::SeqCst);
        assert!(
            seen_after <= seen_before_cancel + 1,
            "cancel should stop further fires (saw {} more)",
            seen_after - seen_before_cancel
        );
        handle.request_exit();
        engine.join();
    }

    #[test]
    fn panic_description_smoke() {
        let s = describe_panic(&(Box::new("boom") as Box<dyn std::any::Any + Send>));
        assert_eq!(s, "boom");
    }
}

fn describe_panic(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
