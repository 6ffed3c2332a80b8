//! Owns every data item in one application, runs the activation/cycle-check
//! sequence, and drives the synchronization cascade.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::action::Action;
use crate::bundle::Bundle;
use crate::dispatch::DispatchHandle;
use crate::error::DataItemError;
use crate::router::GatewayId;

use super::{DataItemObject, DataItemState, DependencyValues};

struct RegistryDependencyView<'a> {
    items: &'a HashMap<String, Box<dyn DataItemObject>>,
}

impl DependencyValues for RegistryDependencyView<'_> {
    fn value_of_any(&self, id: &str) -> Option<Arc<dyn Any + Send>> {
        self.items.get(id).and_then(|o| o.current_value_any())
    }
}

pub type ValueChangedCallback = Arc<dyn Fn(GatewayId, String, Option<serde_json::Value>) + Send + Sync>;

#[derive(Default)]
pub struct DataItemRegistry {
    items: HashMap<String, Box<dyn DataItemObject>>,
    pending_sync: HashSet<String>,
    notify: Option<ValueChangedCallback>,
}

impl DataItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked by `Application` so a value change can be turned into a
    /// `MessageReceived` on the item's owning data gateway, topic equal to
    /// the item's local id.
    pub fn set_notify_callback(&mut self, cb: ValueChangedCallback) {
        self.notify = Some(cb);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn state_of(&self, id: &str) -> Option<DataItemState> {
        self.items.get(id).map(|o| o.state())
    }

    pub fn type_id_of(&self, id: &str) -> Option<std::any::TypeId> {
        self.items.get(id).map(|o| o.type_id())
    }

    pub fn current_value_of(&self, id: &str) -> Option<Arc<dyn Any + Send>> {
        self.items.get(id).and_then(|o| o.current_value_any())
    }

    pub fn register(&mut self, id: String, obj: Box<dyn DataItemObject>) -> Result<(), DataItemError> {
        if self.items.contains_key(&id) {
            return Err(DataItemError::TypeMismatch(id));
        }
        self.items.insert(id, obj);
        Ok(())
    }

    /// Runs `onActivate`, then a post-activation cycle walk across the whole
    /// dependency graph rooted at `id`. On a cycle, the item is rolled back
    /// to `Deactivated` and the error is returned without touching its
    /// dependencies' dependant lists.
    pub fn activate(&mut self, id: &str, saved: Bundle, dispatch: &DispatchHandle) -> Result<(), DataItemError> {
        let known_ids: HashSet<String> = self.items.keys().cloned().collect();
        let needs_sync = {
            let obj = self
                .items
                .get_mut(id)
                .ok_or_else(|| DataItemError::UnknownId(id.to_string()))?;
            obj.activate(saved, &known_ids)?
        };

        if self.has_cycle_from(id) {
            if let Some(obj) = self.items.get_mut(id) {
                obj.set_state(DataItemState::Deactivated);
            }
            return Err(DataItemError::Cycle(id.to_string()));
        }

        let deps = self.items.get(id).map(|o| o.dependencies().to_vec()).unwrap_or_default();
        for dep in &deps {
            if let Some(dep_obj) = self.items.get_mut(dep) {
                dep_obj.add_dependant(id.to_string());
            }
        }

        if needs_sync {
            self.invalidate(id, dispatch);
        }
        Ok(())
    }

    fn has_cycle_from(&self, start: &str) -> bool {
        let mut visited = HashSet::new();
        let mut to_visit: Vec<String> = self
            .items
            .get(start)
            .map(|o| o.dependencies().to_vec())
            .unwrap_or_default();
        while let Some(cur) = to_visit.pop() {
            if cur == start {
                return true;
            }
            if !visited.insert(cur.clone()) {
                continue;
            }
            if let Some(obj) = self.items.get(&cur) {
                to_visit.extend(obj.dependencies().iter().cloned());
            }
        }
        false
    }

    /// Idempotent: while a synchronization for `id` is already pending, a
    /// further call is a no-op.
    pub fn invalidate(&mut self, id: &str, dispatch: &DispatchHandle) {
        if !self.items.contains_key(id) {
            return;
        }
        if self.pending_sync.insert(id.to_string()) {
            dispatch.enqueue(Action::SynchronizeDataItem {
                item_id: id.to_string(),
            });
        }
    }

    /// Runs `onSynchronizeValue`, notifies the owning gateway on change, and
    /// recursively invalidates dependants.
    pub fn synchronize(&mut self, id: &str, dispatch: &DispatchHandle) {
        self.pending_sync.remove(id);
        let mut obj = match self.items.remove(id) {
            Some(o) => o,
            None => return,
        };
        let (changed, json) = {
            let view = RegistryDependencyView { items: &self.items };
            obj.synchronize(&view)
        };
        let dependant_ids = obj.dependants().to_vec();
        let gateway = obj.gateway().clone();
        self.items.insert(id.to_string(), obj);

        if changed {
            if let Some(cb) = &self.notify {
                cb(gateway, id.to_string(), json);
            }
            for dep in dependant_ids {
                self.invalidate(&dep, dispatch);
            }
        }
    }

    pub fn request_change(&mut self, item_id: &str, value: Box<dyn Any + Send>) -> Result<(), DataItemError> {
        let obj = self
            .items
            .get_mut(item_id)
            .ok_or_else(|| DataItemError::UnknownId(item_id.to_string()))?;
        obj.request_change(value)
    }

    pub fn save_all(&mut self) -> HashMap<String, Bundle> {
        self.items.iter_mut().map(|(id, obj)| (id.clone(), obj.save_state())).collect()
    }

    pub fn deactivate_all(&mut self) {
        for obj in self.items.values_mut() {
            obj.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataitem::{ActivationContext, DataItemLogic, TypedDataItem};
    use crate::dispatch::{ActionExecutor, AutosaveConfig, DispatchEngine};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ConstLogic(i64);
    impl DataItemLogic<i64> for ConstLogic {
        fn on_synchronize_value(&mut self, _deps: &dyn DependencyValues) -> Option<i64> {
            Some(self.0)
        }
    }

    struct DoublerLogic {
        source: String,
    }
    impl DataItemLogic<i64> for DoublerLogic {
        fn on_activate(&mut self, ctx: &mut ActivationContext<'_>) -> Result<(), DataItemError> {
            ctx.set_dependencies(&[&self.source])?;
            ctx.update();
            Ok(())
        }
        fn on_synchronize_value(&mut self, deps: &dyn DependencyValues) -> Option<i64> {
            deps.value_of::<i64>(&self.source).map(|v| v * 2)
        }
    }

    struct NoopExecutor;
    impl ActionExecutor for NoopExecutor {
        fn execute(&mut self, _action: Action) {}
    }

    #[test]
    fn cascade_propagates_from_source_to_dependant() {
        let engine = DispatchEngine::start(NoopExecutor, AutosaveConfig::disabled());
        let dispatch = engine.handle();

        let mut registry = DataItemRegistry::new();
        let seen_changes: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen_changes.clone();
        registry.set_notify_callback(Arc::new(move |_gw, id, _json| {
            seen2.lock().unwrap().push(id);
        }));

        registry
            .register(
                "data/src".to_string(),
                Box::new(TypedDataItem::new("data/src".into(), GatewayId::reserved("data"), ConstLogic(21))),
            )
            .unwrap();
        registry
            .register(
                "data/doubled".to_string(),
                Box::new(TypedDataItem::new(
                    "data/doubled".into(),
                    GatewayId::reserved("data"),
                    DoublerLogic { source: "data/src".into() },
                )),
            )
            .unwrap();

        registry.activate("data/src", Bundle::new(), &dispatch).unwrap();
        registry.activate("data/doubled", Bundle::new(), &dispatch).unwrap();

        // Drain the SynchronizeDataItem actions the activations enqueued.
        std::thread::sleep(Duration::from_millis(20));
        // There is no executor wired to the registry in this unit test, so
        // drive synchronization directly instead of through the dispatch
        // thread (the application module wires the two together).
        registry.synchronize("data/src", &dispatch);
        registry.synchronize("data/doubled", &dispatch);

        assert_eq!(
            registry
                .current_value_of("data/doubled")
                .and_then(|v| v.downcast_ref::<i64>().copied()),
            Some(42)
        );
        assert!(seen_changes.lock().unwrap().contains(&"data/doubled".to_string()));

        dispatch.request_exit();
        engine.join();
    }

    #[test]
    fn self_dependency_is_rejected() {
        struct SelfRef;
        impl DataItemLogic<i64> for SelfRef {
            fn on_activate(&mut self, ctx: &mut ActivationContext<'_>) -> Result<(), DataItemError> {
                ctx.set_dependencies(&["data/x"])
            }
            fn on_synchronize_value(&mut self, _deps: &dyn DependencyValues) -> Option<i64> {
                None
            }
        }
        let engine = DispatchEngine::start(NoopExecutor, AutosaveConfig::disabled());
        let dispatch = engine.handle();
        let mut registry = DataItemRegistry::new();
        registry
            .register(
                "data/x".to_string(),
                Box::new(TypedDataItem::new("data/x".into(), GatewayId::reserved("data"), SelfRef)),
            )
            .unwrap();
        let err = registry.activate("data/x", Bundle::new(), &dispatch).unwrap_err();
        assert!(matches!(err, DataItemError::SelfReference(_)));
        dispatch.request_exit();
        engine.join();
    }

    #[test]
    fn direct_cycle_between_two_items_is_rejected() {
        struct RefOther(String);
        impl DataItemLogic<i64> for RefOther {
            fn on_activate(&mut self, ctx: &mut ActivationContext<'_>) -> Result<(), DataItemError> {
                ctx.set_dependencies(&[&self.0])
            }
            fn on_synchronize_value(&mut self, _deps: &dyn DependencyValues) -> Option<i64> {
                None
            }
        }
        let engine = DispatchEngine::start(NoopExecutor, AutosaveConfig::disabled());
        let dispatch = engine.handle();
        let mut registry = DataItemRegistry::new();
        registry
            .register(
                "data/a".to_string(),
                Box::new(TypedDataItem::new("data/a".into(), GatewayId::reserved("data"), RefOther("data/b".into()))),
            )
            .unwrap();
        registry
            .register(
                "data/b".to_string(),
                Box::new(TypedDataItem::new("data/b".into(), GatewayId::reserved("data"), RefOther("data/a".into()))),
            )
            .unwrap();
        registry.activate("data/a", Bundle::new(), &dispatch).unwrap();
        let err = registry.activate("data/b", Bundle::new(), &dispatch).unwrap_err();
        assert!(matches!(err, DataItemError::Cycle(_)));
        dispatch.request_exit();
        engine.join();
    }
}
