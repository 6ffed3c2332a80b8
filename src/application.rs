//! # Application Facade
//!
//! `Application` is the crate's single entry point: it owns configuration,
//! wires the subscription router, gateway registry, data-item registry, and
//! persistent storage together behind one [`crate::dispatch::ActionExecutor`],
//! and exposes the thread-safe public surface (`publish`, `subscribe`,
//! scheduling, property access) host application code actually calls.
//!
//! Everyday pub/sub operations (`subscribe`, `publish`, scheduling, property
//! mutation, shutdown hooks) work before or after [`Application::launch`] —
//! calling them before launch simply queues the resulting action until the
//! dispatch loop starts draining it. Structural setters that stage state
//! later moved wholesale into the dispatch thread (`add_gateway`,
//! `add_data_item`, `set_persistent_storage`, `set_autosave_period`) are
//! rejected with [`crate::error::GatewayError::AfterLaunch`] once `launch`
//! has run, since after that point nothing outside the dispatch thread may
//! touch the gateway or data-item registries directly.

use std::any::TypeId;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::action::{Action, BundleMap, LocalizedMessage, RunnableFn};
use crate::bundle::Bundle;
use crate::config::AppConfig;
use crate::dataitem::{validate_data_item_id, DataItemHandle, DataItemLogic, DataItemObject, DataItemRegistry, TypedDataItem};
use crate::dispatch::{ActionExecutor, AutosaveConfig, DispatchEngine, DispatchHandle};
use crate::error::GatewayError;
use crate::gateway::mailbox::mint_mailbox_topic;
use crate::gateway::{Gateway, GatewayRegistry, ReceiveHandle};
use crate::logutil::{escape_log, escape_payload_log};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::router::{GatewayId, ListenerFn, PendingFanout, SubscriptionRouter};
use crate::storage::{NullStorage, PersistentStorage};
use crate::topic::{split_filter_head, Topic};
use crate::action::Schedule;

struct PendingDataItem {
    id: String,
    object: Box<dyn DataItemObject>,
}

/// Staged, pre-launch-only state. Moved wholesale into an [`ApplicationCore`]
/// by [`Application::launch`]; `None` once that has happened.
struct Staging {
    gateways: GatewayRegistry,
    storage: Box<dyn PersistentStorage>,
    pending_items: Vec<PendingDataItem>,
}

/// A caller-supplied bundle of related gateways, data items, and
/// subscriptions installed as one unit, the way a larger application groups
/// a feature behind a single registration call.
pub trait Module {
    fn install(self, app: &Application) -> Result<()>;
}

/// A live subscription. Closing is idempotent; a second `close()` is a no-op.
/// Dropping a `Subscription` does *not* close it — hold on to it (or call
/// `close()` explicitly) for as long as the listener should keep receiving.
pub struct Subscription {
    inner: crate::router::SubscriptionHandle,
    dispatch: DispatchHandle,
}

impl Subscription {
    pub fn filter(&self) -> &str {
        self.inner.filter()
    }

    pub fn close(&self) {
        for pf in self.inner.close() {
            enqueue_fanout(&self.dispatch, pf);
        }
    }
}

fn enqueue_fanout(dispatch: &DispatchHandle, pf: PendingFanout) {
    dispatch.enqueue(Action::SubscriptionChange {
        gateway: pf.gateway,
        localized_filter: pf.localized_filter,
        subscribe: pf.subscribe,
    });
}

pub struct Application {
    config: AppConfig,
    dispatch: DispatchHandle,
    router: SubscriptionRouter,
    properties: Arc<Mutex<Bundle>>,
    shutdown_hooks: Arc<Mutex<Vec<RunnableFn>>>,
    metrics: Metrics,
    mailbox_counter: Arc<AtomicU64>,
    autosave: Mutex<AutosaveConfig>,
    launched: AtomicBool,
    staging: Mutex<Option<Staging>>,
    engine: Mutex<Option<DispatchEngine>>,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        let autosave = AutosaveConfig::every(config.autosave_duration());
        Self {
            config,
            dispatch: DispatchHandle::new_detached(),
            router: SubscriptionRouter::new(),
            properties: Arc::new(Mutex::new(Bundle::new())),
            shutdown_hooks: Arc::new(Mutex::new(Vec::new())),
            metrics: Metrics::new(),
            mailbox_counter: Arc::new(AtomicU64::new(0)),
            autosave: Mutex::new(autosave),
            launched: AtomicBool::new(false),
            staging: Mutex::new(Some(Staging {
                gateways: GatewayRegistry::new(),
                storage: Box::new(NullStorage),
                pending_items: Vec::new(),
            })),
            engine: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_launched(&self) -> bool {
        self.launched.load(Ordering::Acquire)
    }

    /// A working submission endpoint for a gateway still under construction,
    /// so its constructor can be handed a [`ReceiveHandle`] before
    /// [`Application::add_gateway`] ever attaches it.
    pub fn receive_handle(&self, id: &GatewayId) -> ReceiveHandle {
        ReceiveHandle::new(id.clone(), self.dispatch.clone())
    }

    /// A cheaply-cloneable handle onto the dispatch queue and clock, for
    /// gateways (like [`crate::gateway::system::SystemGateway`]) that need
    /// to enqueue actions or request dispatch-loop exit directly, not just
    /// push received messages back in.
    pub fn dispatch_handle(&self) -> DispatchHandle {
        self.dispatch.clone()
    }

    /// Whether the calling thread is the dispatch thread. Most host code
    /// never needs this; it exists for assertions inside gateway/data-item
    /// logic that must only ever run there.
    pub fn is_in_application_thread(&self) -> bool {
        std::thread::current().name() == Some("corebus-dispatch")
    }

    fn require_not_launched<'a>(&self, staging: &'a mut Option<Staging>) -> Result<&'a mut Staging> {
        staging.as_mut().ok_or_else(|| anyhow::Error::new(GatewayError::AfterLaunch))
    }

    pub fn add_gateway(&self, id: GatewayId, gateway: Box<dyn Gateway>) -> Result<()> {
        let mut guard = self.staging.lock().unwrap();
        let staging = self.require_not_launched(&mut guard)?;
        staging.gateways.attach(id.clone(), gateway).context("attaching gateway")?;
        self.router.register_gateway(id);
        Ok(())
    }

    /// Attaches the built-in `$SYS` gateway (`exit`, `save`), started before
    /// every other gateway. Host applications that want a way to shut down
    /// cleanly (rather than killing the process) call this once during
    /// setup.
    pub fn add_system_gateway(&self) -> Result<()> {
        let id = GatewayId::reserved("$SYS");
        let gateway = crate::gateway::system::SystemGateway::new(self.dispatch.clone(), self.receive_handle(&id));
        self.add_gateway(id, Box::new(gateway))
    }

    /// Attaches the built-in `$MAILBOX` gateway, minting `mb-uid.<n>` topics
    /// from the same counter [`Application::create_mailbox_topic`] draws
    /// from so the two can never collide.
    pub fn add_mailbox_gateway(&self) -> Result<()> {
        let id = GatewayId::reserved("$MAILBOX");
        let gateway = crate::gateway::mailbox::MailboxGateway::new(self.receive_handle(&id), self.mailbox_counter.clone());
        self.add_gateway(id, Box::new(gateway))
    }

    /// Registers a data item under `gateway`. `id` must be `gateway/localId`
    /// (or a deeper `gateway/a/b` path); returns a handle usable from any
    /// thread to request a value change, whether or not the application has
    /// launched yet (requests made before launch are simply queued).
    pub fn add_data_item<T, L>(&self, id: impl Into<String>, gateway: &GatewayId, logic: L) -> Result<DataItemHandle<T>>
    where
        T: Clone + PartialEq + Send + Sync + Serialize + 'static,
        L: DataItemLogic<T> + 'static,
    {
        let id = id.into();
        validate_data_item_id(&id).context("invalid data item id")?;
        if !id.starts_with(&format!("{}/", gateway)) {
            anyhow::bail!("data item id '{}' must be prefixed with its owning gateway id '{}'", id, gateway);
        }
        let read_only = logic.read_only();
        let mut guard = self.staging.lock().unwrap();
        let staging = self.require_not_launched(&mut guard)?;
        let object: Box<dyn DataItemObject> = Box::new(TypedDataItem::new(id.clone(), gateway.clone(), logic));
        staging.pending_items.push(PendingDataItem { id: id.clone(), object });
        Ok(DataItemHandle::new(id, read_only, self.dispatch.clone()))
    }

    /// Looks up a handle for a data item already registered on this
    /// application via [`Application::add_data_item`], checking its value
    /// type. Only resolves items added before `launch` — the handle returned
    /// by `add_data_item` itself is the normal way to keep hold of one.
    pub fn get_data_item<T: Send + 'static>(&self, id: &str) -> Result<DataItemHandle<T>> {
        let guard = self.staging.lock().unwrap();
        let staging = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("get_data_item cannot resolve items added after launch"))?;
        let entry = staging
            .pending_items
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| crate::error::DataItemError::UnknownId(id.to_string()))?;
        if entry.object.type_id() != TypeId::of::<T>() {
            return Err(crate::error::DataItemError::TypeMismatch(id.to_string()).into());
        }
        Ok(DataItemHandle::new(id.to_string(), entry.object.read_only(), self.dispatch.clone()))
    }

    pub fn add_module<M: Module>(&self, module: M) -> Result<()> {
        module.install(self)
    }

    pub fn set_persistent_storage(&self, storage: impl PersistentStorage + 'static) -> Result<()> {
        let mut guard = self.staging.lock().unwrap();
        let staging = self.require_not_launched(&mut guard)?;
        staging.storage = Box::new(storage);
        Ok(())
    }

    /// `Duration::ZERO` disables autosave. Defaults to the configured
    /// `autosave_secs` (1800s unless overridden).
    pub fn set_autosave_period(&self, period: Duration) -> Result<()> {
        if self.launched.load(Ordering::Acquire) {
            return Err(anyhow::Error::new(GatewayError::AfterLaunch));
        }
        *self.autosave.lock().unwrap() = AutosaveConfig::every(period);
        Ok(())
    }

    pub fn add_shutdown_hook(&self, hook: impl FnOnce() + Send + 'static) {
        self.shutdown_hooks.lock().unwrap().push(Box::new(hook));
    }

    pub fn create_mailbox_topic(&self) -> String {
        mint_mailbox_topic(&self.mailbox_counter)
    }

    pub fn mailbox_counter(&self) -> Arc<AtomicU64> {
        self.mailbox_counter.clone()
    }

    // -- property store ---------------------------------------------------

    pub fn set_property_string(&self, key: impl Into<String>, value: String) {
        self.properties.lock().unwrap().put_string(key, value);
    }

    pub fn get_property_string(&self, key: &str, default: String) -> String {
        self.properties.lock().unwrap().get_as_string(key, default)
    }

    pub fn set_property_bool(&self, key: impl Into<String>, value: bool) {
        self.properties.lock().unwrap().put_bool(key, value);
    }

    pub fn get_property_bool(&self, key: &str, default: bool) -> bool {
        self.properties.lock().unwrap().get_as_bool(key, default)
    }

    pub fn set_property_long(&self, key: impl Into<String>, value: i64) {
        self.properties.lock().unwrap().put_long(key, value);
    }

    pub fn get_property_long(&self, key: &str, default: i64) -> i64 {
        self.properties.lock().unwrap().get_as_long(key, default)
    }

    // -- subscribe/publish --------------------------------------------------

    pub fn subscribe(
        &self,
        filter: &str,
        priority: i32,
        listener: impl Fn(&str, &[u8]) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let listener: Arc<ListenerFn> = Arc::new(listener);
        let (inner, fanout) = self.router.subscribe(filter, priority, listener)?;
        for pf in fanout {
            enqueue_fanout(&self.dispatch, pf);
        }
        Ok(Subscription {
            inner,
            dispatch: self.dispatch.clone(),
        })
    }

    fn build_publish(&self, topic: &str, payload: impl Into<Arc<[u8]>>) -> Result<(GatewayId, LocalizedMessage)> {
        let (head, localized) = split_filter_head(topic);
        let localized = localized
            .ok_or_else(|| anyhow::anyhow!("topic '{}' has no localized part for a gateway", topic))?;
        let gateway = GatewayId::reserved(head);
        let localized_topic = Topic::parse(localized).context("invalid topic")?;
        Ok((gateway, LocalizedMessage::new(localized_topic, payload)))
    }

    pub fn publish(&self, topic: &str, payload: impl Into<Arc<[u8]>>) -> Result<()> {
        let (gateway, message) = self.build_publish(topic, payload)?;
        self.dispatch.enqueue(Action::Publish { gateway, message });
        Ok(())
    }

    pub fn publish_later(&self, topic: &str, payload: impl Into<Arc<[u8]>>, delay: Duration) -> Result<()> {
        let (gateway, message) = self.build_publish(topic, payload)?;
        self.dispatch.schedule(Action::Publish { gateway, message }, Schedule::once(delay));
        Ok(())
    }

    pub fn publish_at_fixed_rate(
        &self,
        topic: &str,
        payload: impl Into<Arc<[u8]>>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<Schedule> {
        self.publish_repeating(topic, payload, Schedule::fixed_rate(initial_delay, period))
    }

    pub fn publish_with_fixed_delay(
        &self,
        topic: &str,
        payload: impl Into<Arc<[u8]>>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<Schedule> {
        self.publish_repeating(topic, payload, Schedule::fixed_delay(initial_delay, period))
    }

    fn publish_repeating(&self, topic: &str, payload: impl Into<Arc<[u8]>>, schedule: Schedule) -> Result<Schedule> {
        let (gateway, message) = self.build_publish(topic, payload)?;
        let payload = message.payload.clone();
        let topic = message.topic.clone();
        self.dispatch.schedule_repeating(
            move || Action::Publish {
                gateway: gateway.clone(),
                message: LocalizedMessage::new(topic.clone(), payload.clone()),
            },
            schedule.clone(),
        );
        Ok(schedule)
    }

    pub fn invoke_later(&self, delay: Duration, f: impl FnOnce() + Send + 'static) {
        self.dispatch.schedule(Action::RunCallback(Box::new(f)), Schedule::once(delay));
    }

    pub fn invoke_at_fixed_rate(&self, initial_delay: Duration, period: Duration, f: impl Fn() + Send + Sync + 'static) -> Schedule {
        self.invoke_repeating(f, Schedule::fixed_rate(initial_delay, period))
    }

    pub fn invoke_with_fixed_delay(&self, initial_delay: Duration, period: Duration, f: impl Fn() + Send + Sync + 'static) -> Schedule {
        self.invoke_repeating(f, Schedule::fixed_delay(initial_delay, period))
    }

    fn invoke_repeating(&self, f: impl Fn() + Send + Sync + 'static, schedule: Schedule) -> Schedule {
        let f = Arc::new(f);
        self.dispatch.schedule_repeating(
            move || {
                let f = f.clone();
                Action::RunCallback(Box::new(move || f()))
            },
            schedule.clone(),
        );
        schedule
    }

    // -- lifecycle ----------------------------------------------------------

    /// Loads persisted bundles, starts every attached gateway (`$SYS` first,
    /// then non-data gateways, then data gateways), activates every
    /// registered data item in the order it was added, then spawns the
    /// dispatch thread. Returns an error without spawning anything if any
    /// gateway fails to start, any data item fails to activate, or the
    /// application has already been launched.
    pub fn launch(&self) -> Result<()> {
        if self.launched.swap(true, Ordering::AcqRel) {
            anyhow::bail!(GatewayError::AfterLaunch);
        }

        let mut staging = self
            .staging
            .lock()
            .unwrap()
            .take()
            .expect("launched flag guards single-use of staging");

        let known_ids: std::collections::HashSet<String> =
            staging.pending_items.iter().map(|p| p.id.clone()).collect();

        let mut loaded = staging.storage.load_bundles()?.unwrap_or_default();

        let mut item_saved: HashMap<String, Bundle> = HashMap::new();
        for id in &known_ids {
            if let Some(b) = loaded.remove(id) {
                item_saved.insert(id.clone(), b);
            }
        }

        let gateway_ids = staging.gateways.ids();
        let mut gateway_bundles: HashMap<GatewayId, BundleMap> = HashMap::new();
        for (key, bundle) in loaded {
            let owner = gateway_ids.iter().find(|g| key.starts_with(&format!("{}/", g)));
            match owner {
                Some(gw) => {
                    let local = key[gw.as_str().len() + 1..].to_string();
                    gateway_bundles.entry(gw.clone()).or_default().insert(local, bundle);
                }
                None => log::warn!(target: "application", "dropping persisted bundle for unknown key '{}'", key),
            }
        }

        let mut data_items = DataItemRegistry::new();
        let pending_notifications: Arc<Mutex<VecDeque<(GatewayId, String, Option<serde_json::Value>)>>> =
            Arc::new(Mutex::new(VecDeque::new()));
        let pn = pending_notifications.clone();
        data_items.set_notify_callback(Arc::new(move |gw, id, json| {
            pn.lock().unwrap().push_back((gw, id, json));
        }));

        for item in staging.pending_items.drain(..) {
            data_items.register(item.id, item.object)?;
        }
        for id in &known_ids {
            let saved = item_saved.remove(id).unwrap_or_default();
            data_items.activate(id, saved, &self.dispatch)?;
        }

        staging.gateways.start_all(gateway_bundles, &self.router)?;

        let core = ApplicationCore {
            router: self.router.clone(),
            gateways: staging.gateways,
            data_items,
            pending_notifications,
            storage: staging.storage,
            metrics: self.metrics.clone(),
            dispatch: self.dispatch.clone(),
            shutdown_hooks: self.shutdown_hooks.clone(),
        };

        let autosave = *self.autosave.lock().unwrap();
        let engine = DispatchEngine::start_with_handle(self.dispatch.clone(), core, autosave);
        *self.engine.lock().unwrap() = Some(engine);
        Ok(())
    }

    /// Blocks the calling thread until the dispatch loop exits, normally
    /// because `$SYS/exit` was published. A no-op if never launched.
    pub fn join(&self) {
        if let Some(engine) = self.engine.lock().unwrap().take() {
            engine.join();
        }
    }

    pub fn request_exit(&self) {
        self.dispatch.request_exit();
    }
}

struct ApplicationCore {
    router: SubscriptionRouter,
    gateways: GatewayRegistry,
    data_items: DataItemRegistry,
    pending_notifications: Arc<Mutex<VecDeque<(GatewayId, String, Option<serde_json::Value>)>>>,
    storage: Box<dyn PersistentStorage>,
    metrics: Metrics,
    dispatch: DispatchHandle,
    shutdown_hooks: Arc<Mutex<Vec<RunnableFn>>>,
}

impl ApplicationCore {
    fn drain_value_change_notifications(&mut self) {
        let drained: Vec<_> = std::mem::take(&mut *self.pending_notifications.lock().unwrap()).into_iter().collect();
        for (gateway, full_id, json) in drained {
            let prefix = format!("{}/", gateway);
            let local_id = full_id.strip_prefix(&prefix).unwrap_or(&full_id);
            self.gateways.notify_value_changed(&gateway, local_id, json.as_ref());
        }
    }
}

impl ActionExecutor for ApplicationCore {
    fn execute(&mut self, action: Action) {
        match action {
            Action::Publish { gateway, message } => {
                if let Err(e) = self.gateways.publish(&gateway, &message) {
                    log::warn!(
                        target: "application",
                        "publish to '{}' rejected: {}",
                        escape_log(gateway.as_str()),
                        e
                    );
                }
            }
            Action::MessageReceived { gateway, message } => {
                let (delivered_topic, listeners) = self.router.deliver_received(&gateway, message.topic.as_str());
                log::trace!(
                    target: "application",
                    "payload for '{}': {}",
                    escape_log(&delivered_topic),
                    escape_payload_log(&message.payload)
                );
                self.metrics.inc_messages_delivered_by(listeners.len() as u64);
                for (_, listener) in listeners {
                    // Fail-fast: a listener panic propagates out of this
                    // frame; the dispatch loop's own catch_unwind logs it and
                    // the episode ends there without taking the process down.
                    listener(&delivered_topic, &message.payload);
                }
            }
            Action::SubscriptionChange {
                gateway,
                localized_filter,
                subscribe,
            } => {
                if subscribe {
                    self.gateways.add_topic_filter(&gateway, &localized_filter);
                } else {
                    self.gateways.remove_topic_filter(&gateway, &localized_filter);
                }
            }
            Action::SynchronizeDataItem { item_id } => {
                self.metrics.inc_data_item_syncs();
                self.data_items.synchronize(&item_id, &self.dispatch);
                self.drain_value_change_notifications();
            }
            Action::RequestChange { item_id, value } => {
                match self.data_items.request_change(&item_id, value) {
                    Ok(()) => self.data_items.invalidate(&item_id, &self.dispatch),
                    Err(e) => log::warn!(
                        target: "application",
                        "requestChange on '{}' rejected: {}",
                        escape_log(&item_id),
                        e
                    ),
                }
            }
            Action::RunCallback(f) => f(),
            Action::SaveState => self.save_state(),
        }
    }

    fn save_state(&mut self) {
        let mut bundles = self.gateways.save_state();
        bundles.extend(self.data_items.save_all());
        match self.storage.save_bundles(&bundles) {
            Ok(()) => self.gateways.notify_state_saved(),
            Err(e) => log::error!(target: "application", "saving application state failed: {}", e),
        }
    }

    fn run_shutdown_hooks(&mut self) {
        let hooks: Vec<RunnableFn> = std::mem::take(&mut *self.shutdown_hooks.lock().unwrap());
        for hook in hooks {
            hook();
        }
    }

    fn stop_gateways(&mut self) {
        self.gateways.stop_all();
    }

    fn observe_queue_depths(&mut self, unscheduled_depth: usize, scheduled_depth: usize) {
        self.metrics.observe_queue_depth(unscheduled_depth + scheduled_depth);
    }

    fn record_dispatch(&mut self) {
        self.metrics.inc_dispatched();
    }

    fn record_fault(&mut self) {
        self.metrics.inc_faulted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::echo::EchoGateway;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn attach_sys(app: &Application) {
        app.add_system_gateway().unwrap();
    }

    #[test]
    fn publish_is_routed_to_subscriber_through_echo_gateway() {
        let app = Application::new(AppConfig::default());
        attach_sys(&app);
        let id = GatewayId::parse("echo").unwrap();
        let receive = app.receive_handle(&id);
        app.add_gateway(id, Box::new(EchoGateway::new(receive))).unwrap();

        let seen: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = app
            .subscribe("echo/hello", 0, move |topic, _payload| {
                seen2.lock().unwrap().push(topic.to_string());
            })
            .unwrap();

        app.launch().unwrap();
        app.publish("echo/hello", b"hi".to_vec()).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(*seen.lock().unwrap(), vec!["echo/hello".to_string()]);

        app.publish("$SYS/exit", Vec::new()).unwrap();
        app.join();
    }

    #[test]
    fn add_gateway_after_launch_is_rejected() {
        let app = Application::new(AppConfig::default());
        attach_sys(&app);
        app.launch().unwrap();

        let id = GatewayId::parse("late").unwrap();
        let receive = app.receive_handle(&id);
        let err = app.add_gateway(id, Box::new(EchoGateway::new(receive))).unwrap_err();
        assert!(err.downcast_ref::<GatewayError>().map(|e| matches!(e, GatewayError::AfterLaunch)).unwrap_or(false));

        app.publish("$SYS/exit", Vec::new()).unwrap();
        app.join();
    }

    #[test]
    fn invoke_later_runs_once() {
        let app = Application::new(AppConfig::default());
        attach_sys(&app);
        app.launch().unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        app.invoke_later(Duration::from_millis(10), move || {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        app.publish("$SYS/exit", Vec::new()).unwrap();
        app.join();
    }
}
