//! # Data-Item Core
//!
//! Observable, typed values with declared dependencies, cascading
//! synchronization, activation/deactivation, and persistent state bundles.
//!
//! Concrete item types are generic over their value type `T`; the registry
//! that owns every item in an application erases that generic behind the
//! object-safe [`DataItemObject`] trait, storing a runtime [`TypeId`]
//! alongside each entry so [`crate::application::Application::get_data_item`]
//! can check it explicitly rather than relying on RTTI.

mod registry;

pub use registry::DataItemRegistry;

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::bundle::Bundle;
use crate::error::DataItemError;
use crate::router::GatewayId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataItemState {
    Created,
    Attached,
    Activating,
    Active,
    Deactivating,
    Deactivated,
}

/// Read-only view into sibling items' current values, handed to
/// [`DataItemLogic::on_synchronize_value`].
pub trait DependencyValues {
    fn value_of_any(&self, id: &str) -> Option<Arc<dyn Any + Send>>;
}

impl dyn DependencyValues + '_ {
    pub fn value_of<T: Clone + Send + 'static>(&self, id: &str) -> Option<T> {
        self.value_of_any(id).and_then(|v| v.downcast_ref::<T>().cloned())
    }
}

/// Passed to `on_activate`/`on_value_change_requested` so logic can declare
/// dependencies (activation only) and request a recompute.
pub struct ActivationContext<'a> {
    self_id: &'a str,
    known_ids: &'a HashSet<String>,
    dependencies_out: &'a mut Vec<String>,
    needs_sync: &'a mut bool,
    saved: &'a Bundle,
}

impl<'a> ActivationContext<'a> {
    pub fn saved_bundle(&self) -> &Bundle {
        self.saved
    }

    /// Declare this item's upstream dependencies by id. Duplicates are
    /// deduplicated; self-references and ids outside this application are
    /// rejected synchronously.
    pub fn set_dependencies(&mut self, ids: &[&str]) -> Result<(), DataItemError> {
        let mut out = Vec::new();
        for &id in ids {
            if id == self.self_id {
                return Err(DataItemError::SelfReference(id.to_string()));
            }
            if !self.known_ids.contains(id) {
                return Err(DataItemError::CrossApplication(id.to_string()));
            }
            if !out.iter().any(|existing: &String| existing == id) {
                out.push(id.to_string());
            }
        }
        *self.dependencies_out = out;
        Ok(())
    }

    /// Request an immediate recompute once activation completes.
    pub fn update(&mut self) {
        *self.needs_sync = true;
    }
}

/// User-implemented logic for one observable value of type `T`.
pub trait DataItemLogic<T>: Send
where
    T: Clone + PartialEq + Send + Serialize + 'static,
{
    fn on_activate(&mut self, ctx: &mut ActivationContext<'_>) -> Result<(), DataItemError> {
        let _ = ctx;
        Ok(())
    }

    /// Pure recomputation from current dependency values; must be idempotent.
    fn on_synchronize_value(&mut self, deps: &dyn DependencyValues) -> Option<T>;

    /// Invoked on the dispatch thread for a queued change request.
    /// Implementations for read-only items may simply ignore this.
    fn on_value_change_requested(&mut self, new_value: T) {
        let _ = new_value;
    }

    fn on_save_state(&mut self, out: &mut Bundle) {
        let _ = out;
    }

    fn on_deactivate(&mut self) {}

    fn read_only(&self) -> bool {
        false
    }
}

/// Object-safe façade the registry stores and cascades through; generated by
/// [`TypedDataItem`] for every concrete `(T, L)` pair.
pub trait DataItemObject: Send {
    fn id(&self) -> &str;
    fn gateway(&self) -> &GatewayId;
    fn state(&self) -> DataItemState;
    fn set_state(&mut self, state: DataItemState);
    fn read_only(&self) -> bool;
    fn type_id(&self) -> TypeId;
    fn dependencies(&self) -> &[String];
    fn dependants(&self) -> &[String];
    fn add_dependant(&mut self, id: String);
    fn current_value_any(&self) -> Option<Arc<dyn Any + Send>>;

    fn activate(&mut self, saved: Bundle, known_ids: &HashSet<String>) -> Result<bool, DataItemError>;
    /// Recompute the value; returns whether it changed (deep value-equality,
    /// counting null transitions) and, if so, its JSON-serialized form for
    /// the owning gateway's change notification.
    fn synchronize(&mut self, deps: &dyn DependencyValues) -> (bool, Option<serde_json::Value>);
    fn request_change(&mut self, value: Box<dyn Any + Send>) -> Result<(), DataItemError>;
    fn save_state(&mut self) -> Bundle;
    fn deactivate(&mut self);
}

pub struct TypedDataItem<T, L> {
    id: String,
    gateway: GatewayId,
    state: DataItemState,
    dependencies: Vec<String>,
    dependants: Vec<String>,
    current: Option<Arc<T>>,
    logic: L,
}

impl<T, L> TypedDataItem<T, L>
where
    T: Clone + PartialEq + Send + Serialize + 'static,
    L: DataItemLogic<T> + 'static,
{
    pub fn new(id: String, gateway: GatewayId, logic: L) -> Self {
        Self {
            id,
            gateway,
            state: DataItemState::Created,
            dependencies: Vec::new(),
            dependants: Vec::new(),
            current: None,
            logic,
        }
    }
}

impl<T, L> DataItemObject for TypedDataItem<T, L>
where
    T: Clone + PartialEq + Send + Sync + Serialize + 'static,
    L: DataItemLogic<T> + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn gateway(&self) -> &GatewayId {
        &self.gateway
    }

    fn state(&self) -> DataItemState {
        self.state
    }

    fn set_state(&mut self, state: DataItemState) {
        self.state = state;
    }

    fn read_only(&self) -> bool {
        self.logic.read_only()
    }

    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn dependants(&self) -> &[String] {
        &self.dependants
    }

    fn add_dependant(&mut self, id: String) {
        if !self.dependants.iter().any(|d| d == &id) {
            self.dependants.push(id);
        }
    }

    fn current_value_any(&self) -> Option<Arc<dyn Any + Send>> {
        self.current.clone().map(|v| v as Arc<dyn Any + Send>)
    }

    fn activate(&mut self, saved: Bundle, known_ids: &HashSet<String>) -> Result<bool, DataItemError> {
        self.state = DataItemState::Activating;
        let mut dependencies_out = Vec::new();
        let mut needs_sync = false;
        {
            let mut ctx = ActivationContext {
                self_id: &self.id,
                known_ids,
                dependencies_out: &mut dependencies_out,
                needs_sync: &mut needs_sync,
                saved: &saved,
            };
            self.logic.on_activate(&mut ctx)?;
        }
        self.dependencies = dependencies_out;
        self.state = DataItemState::Active;
        Ok(needs_sync)
    }

    fn synchronize(&mut self, deps: &dyn DependencyValues) -> (bool, Option<serde_json::Value>) {
        let new_val = self.logic.on_synchronize_value(deps);
        let changed = match (&self.current, &new_val) {
            (None, None) => false,
            (None, Some(_)) | (Some(_), None) => true,
            (Some(a), Some(b)) => a.as_ref() != b,
        };
        if changed {
            self.current = new_val.map(Arc::new);
        }
        let json = self
            .current
            .as_ref()
            .and_then(|v| serde_json::to_value(v.as_ref()).ok());
        (changed, json)
    }

    fn request_change(&mut self, value: Box<dyn Any + Send>) -> Result<(), DataItemError> {
        if self.state != DataItemState::Active {
            return Err(DataItemError::NotActive(self.id.clone()));
        }
        if self.logic.read_only() {
            return Err(DataItemError::ReadOnly(self.id.clone()));
        }
        let v = value
            .downcast::<T>()
            .map_err(|_| DataItemError::TypeMismatch(self.id.clone()))?;
        self.logic.on_value_change_requested(*v);
        Ok(())
    }

    fn save_state(&mut self) -> Bundle {
        let mut out = Bundle::new();
        self.logic.on_save_state(&mut out);
        out
    }

    fn deactivate(&mut self) {
        self.state = DataItemState::Deactivating;
        self.logic.on_deactivate();
        self.state = DataItemState::Deactivated;
    }
}

/// Immutable handle returned by `Application::add_data_item`. Cheap to clone
/// and safe to call from any thread; `request_change` rejects synchronously
/// for read-only items without touching the dispatch thread.
#[derive(Clone)]
pub struct DataItemHandle<T> {
    id: String,
    read_only: bool,
    dispatch: crate::dispatch::DispatchHandle,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + 'static> DataItemHandle<T> {
    pub(crate) fn new(id: String, read_only: bool, dispatch: crate::dispatch::DispatchHandle) -> Self {
        Self {
            id,
            read_only,
            dispatch,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request_change(&self, value: T) -> Result<(), DataItemError> {
        if self.read_only {
            return Err(DataItemError::ReadOnly(self.id.clone()));
        }
        self.dispatch.enqueue(crate::action::Action::RequestChange {
            item_id: self.id.clone(),
            value: Box::new(value),
        });
        Ok(())
    }

    pub fn invalidate(&self) {
        self.dispatch.enqueue(crate::action::Action::SynchronizeDataItem {
            item_id: self.id.clone(),
        });
    }
}

/// `^[A-Za-z][A-Za-z0-9]*$/segment(/segment)*` where each segment matches
/// `^[.A-Za-z0-9_]+$`.
pub fn validate_data_item_id(id: &str) -> Result<(), DataItemError> {
    let mut parts = id.splitn(2, '/');
    let gateway = parts.next().unwrap_or("");
    let rest = parts.next();
    if !crate::router::is_valid_gateway_id(gateway) || rest.is_none() {
        return Err(DataItemError::InvalidId(id.to_string()));
    }
    let rest = rest.unwrap();
    if rest.is_empty() {
        return Err(DataItemError::InvalidId(id.to_string()));
    }
    for segment in rest.split('/') {
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        {
            return Err(DataItemError::InvalidId(id.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_pattern_accepts_expected_shapes() {
        assert!(validate_data_item_id("data/a").is_ok());
        assert!(validate_data_item_id("data/a.b_c/d").is_ok());
    }

    #[test]
    fn id_pattern_rejects_bad_shapes() {
        assert!(validate_data_item_id("data").is_err(), "needs at least one segment");
        assert!(validate_data_item_id("1data/a").is_err(), "gateway id can't start with a digit");
        assert!(validate_data_item_id("data/a b").is_err(), "segment can't contain a space");
        assert!(validate_data_item_id("data/").is_err());
    }
}
