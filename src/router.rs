//! # Subscription Router
//!
//! Holds topic filters partitioned per gateway (simple vs wildcard) and
//! globally (filters whose head is `+` or `#`, applying across every
//! gateway), matches incoming messages against them, and fans out
//! `SubscriptionChange` bookkeeping when filter sets become non-/empty.
//!
//! The partitioned (simple/wildcard) scheme is chosen over a single unified
//! map: it is strictly an optimization of the unified form (a hash lookup
//! instead of a linear scan for the common case) and produces identical
//! observable behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::trace;

use crate::error::RouterError;
use crate::logutil::escape_log;
use crate::topic::{parse_hierarchy, split_filter_head, validate_topic_filter, TopicFilter};

/// A validated, unique gateway identifier: `^[A-Za-z][A-Za-z0-9]*$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GatewayId(String);

impl GatewayId {
    pub fn parse(s: &str) -> Result<Self, crate::error::GatewayError> {
        if is_valid_gateway_id(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(crate::error::GatewayError::InvalidId(s.to_string()))
        }
    }

    /// Construct without validation; used internally for the two built-in
    /// `$`-prefixed gateways, which are intentionally outside the public id
    /// pattern reserved for host-defined gateways.
    pub(crate) fn reserved(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GatewayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_valid_gateway_id(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric())
}

pub type ListenerFn = dyn Fn(&str, &[u8]) + Send + Sync;

struct SubscriptionEntry {
    id: u64,
    priority: i32,
    listener: Arc<ListenerFn>,
    closed: Arc<AtomicBool>,
}

struct FilterEntry {
    filter: TopicFilter,
    subscriptions: Vec<SubscriptionEntry>,
}

#[derive(Default)]
struct GatewayBuckets {
    simple: HashMap<String, FilterEntry>,
    wildcard: HashMap<String, FilterEntry>,
}

#[derive(Default)]
struct RouterState {
    known_gateways: std::collections::HashSet<GatewayId>,
    per_gateway: HashMap<GatewayId, GatewayBuckets>,
    global_simple: HashMap<String, FilterEntry>,
    global_wildcard: HashMap<String, FilterEntry>,
}

/// What the caller (the `Application` facade) must enqueue as a result of a
/// subscribe/unsubscribe: one `SubscriptionChange` per affected gateway.
#[derive(Debug, Clone)]
pub struct PendingFanout {
    pub gateway: GatewayId,
    pub localized_filter: String,
    pub subscribe: bool,
}

#[derive(Clone)]
pub struct SubscriptionRouter {
    state: Arc<Mutex<RouterState>>,
    next_id: Arc<AtomicU64>,
}

impl Default for SubscriptionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RouterState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn register_gateway(&self, id: GatewayId) {
        self.state.lock().unwrap().known_gateways.insert(id);
    }

    pub fn known_gateways(&self) -> Vec<GatewayId> {
        self.state.lock().unwrap().known_gateways.iter().cloned().collect()
    }

    /// Register a subscription, returning the fanout the caller must enqueue
    /// when a filter bucket was freshly created.
    pub fn subscribe(
        &self,
        raw_filter: &str,
        priority: i32,
        listener: Arc<ListenerFn>,
    ) -> Result<(SubscriptionHandle, Vec<PendingFanout>), RouterError> {
        // Validate the whole filter string first (catches a stray wildcard
        // marker living inside the head, e.g. "fo#o/bar") before deriving the
        // part actually matched against a gateway's localized topics.
        validate_topic_filter(raw_filter)?;
        let (head, localized) = split_filter_head(raw_filter);

        let mut state = self.state.lock().unwrap();

        if head != "+" && head != "#" && state.known_gateways.contains(&GatewayId::reserved(head)) && localized.is_none() {
            return Err(RouterError::MissingLocalizedFilter(head.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let closed = Arc::new(AtomicBool::new(false));
        let sub = SubscriptionEntry {
            id,
            priority,
            listener,
            closed: closed.clone(),
        };

        let is_global = head == "+" || head == "#";
        let storage_key = localized.unwrap_or(raw_filter).to_string();
        // The stored filter is the localized remainder only (e.g. "data/+"
        // stores "+", global "+/temp" stores "temp") so it matches directly
        // against the localized topic levels `deliver_received` builds from
        // a received message, with no gateway-head level to strip first.
        let filter = TopicFilter::parse(&storage_key)?;
        let is_simple = filter.is_simple();

        let mut fanout = Vec::new();
        if is_global {
            let bucket = if is_simple {
                &mut state.global_simple
            } else {
                &mut state.global_wildcard
            };
            let fresh = !bucket.contains_key(&storage_key);
            let entry = bucket.entry(storage_key.clone()).or_insert_with(|| FilterEntry {
                filter: filter.clone(),
                subscriptions: Vec::new(),
            });
            entry.subscriptions.push(sub);
            if fresh {
                for gw in state.known_gateways.iter() {
                    fanout.push(PendingFanout {
                        gateway: gw.clone(),
                        localized_filter: storage_key.clone(),
                        subscribe: true,
                    });
                }
            }
        } else {
            let gateway = GatewayId::reserved(head);
            let buckets = state.per_gateway.entry(gateway.clone()).or_default();
            let bucket = if is_simple {
                &mut buckets.simple
            } else {
                &mut buckets.wildcard
            };
            let fresh = !bucket.contains_key(&storage_key);
            let entry = bucket.entry(storage_key.clone()).or_insert_with(|| FilterEntry {
                filter: filter.clone(),
                subscriptions: Vec::new(),
            });
            entry.subscriptions.push(sub);
            if fresh {
                fanout.push(PendingFanout {
                    gateway,
                    localized_filter: storage_key.clone(),
                    subscribe: true,
                });
            }
        }

        let handle = SubscriptionHandle {
            router: self.clone(),
            raw_filter: raw_filter.to_string(),
            head: head.to_string(),
            storage_key,
            is_global,
            is_simple,
            id,
            closed,
        };
        Ok((handle, fanout))
    }

    fn close(&self, head: &str, storage_key: &str, is_global: bool, is_simple: bool, id: u64) -> Vec<PendingFanout> {
        let mut state = self.state.lock().unwrap();
        let mut fanout = Vec::new();

        let remove_from = |bucket: &mut HashMap<String, FilterEntry>| -> bool {
            let mut became_empty = false;
            let mut drop_key = false;
            if let Some(entry) = bucket.get_mut(storage_key) {
                entry.subscriptions.retain(|s| s.id != id);
                if entry.subscriptions.is_empty() {
                    became_empty = true;
                    drop_key = true;
                }
            }
            if drop_key {
                bucket.remove(storage_key);
            }
            became_empty
        };

        if is_global {
            let bucket = if is_simple {
                &mut state.global_simple
            } else {
                &mut state.global_wildcard
            };
            if remove_from(bucket) {
                for gw in state.known_gateways.iter() {
                    fanout.push(PendingFanout {
                        gateway: gw.clone(),
                        localized_filter: storage_key.to_string(),
                        subscribe: false,
                    });
                }
            }
        } else {
            let gateway = GatewayId::reserved(head);
            if let Some(buckets) = state.per_gateway.get_mut(&gateway) {
                let bucket = if is_simple {
                    &mut buckets.simple
                } else {
                    &mut buckets.wildcard
                };
                if remove_from(bucket) {
                    fanout.push(PendingFanout {
                        gateway,
                        localized_filter: storage_key.to_string(),
                        subscribe: false,
                    });
                }
            }
        }
        fanout
    }

    /// Collect subscriptions matching a message received on `gateway` at its
    /// localized `topic`, sorted stable-descending by priority, and build the
    /// fully-qualified delivered topic (`"gwId/localTopic"`).
    pub fn deliver_received(
        &self,
        gateway: &GatewayId,
        localized_topic: &str,
    ) -> (String, Vec<(i32, Arc<ListenerFn>)>) {
        let levels = parse_hierarchy(localized_topic);
        let state = self.state.lock().unwrap();
        let mut matches: Vec<(i32, Arc<ListenerFn>)> = Vec::new();

        if let Some(buckets) = state.per_gateway.get(gateway) {
            if let Some(entry) = buckets.simple.get(localized_topic) {
                for s in &entry.subscriptions {
                    if !s.closed.load(Ordering::Acquire) {
                        matches.push((s.priority, s.listener.clone()));
                    }
                }
            }
            for entry in buckets.wildcard.values() {
                if entry.filter.matches(&levels) {
                    for s in &entry.subscriptions {
                        if !s.closed.load(Ordering::Acquire) {
                            matches.push((s.priority, s.listener.clone()));
                        }
                    }
                }
            }
        }
        if let Some(entry) = state.global_simple.get(localized_topic) {
            for s in &entry.subscriptions {
                if !s.closed.load(Ordering::Acquire) {
                    matches.push((s.priority, s.listener.clone()));
                }
            }
        }
        for entry in state.global_wildcard.values() {
            if entry.filter.matches(&levels) {
                for s in &entry.subscriptions {
                    if !s.closed.load(Ordering::Acquire) {
                        matches.push((s.priority, s.listener.clone()));
                    }
                }
            }
        }
        drop(state);

        // Stable sort descending by priority: equal priorities keep
        // submission order (insertion order above already preserves it).
        matches.sort_by(|a, b| b.0.cmp(&a.0));

        let delivered_topic = format!("{}/{}", gateway, localized_topic);
        trace!(
            target: "router",
            "delivering {} to {} listener(s)",
            escape_log(&delivered_topic),
            matches.len()
        );
        (delivered_topic, matches)
    }

    /// Filters a newly-attached gateway should be handed via
    /// `onAddTopicFilter` immediately, so it observes every already-existing
    /// global filter and any per-gateway filter registered under its id
    /// before it had attached.
    pub fn existing_filters_for(&self, gateway: &GatewayId) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<String> = Vec::new();
        out.extend(state.global_simple.keys().cloned());
        out.extend(state.global_wildcard.keys().cloned());
        if let Some(buckets) = state.per_gateway.get(gateway) {
            out.extend(buckets.simple.keys().cloned());
            out.extend(buckets.wildcard.keys().cloned());
        }
        out
    }
}

/// A closable binding of (filter, listener, priority). Closing is idempotent.
pub struct SubscriptionHandle {
    router: SubscriptionRouter,
    #[allow(dead_code)]
    raw_filter: String,
    head: String,
    storage_key: String,
    is_global: bool,
    is_simple: bool,
    id: u64,
    closed: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn filter(&self) -> &str {
        &self.raw_filter
    }

    /// Closes the subscription, returning any `SubscriptionChange`
    /// cancellations the caller must enqueue (one per gateway whose filter
    /// bucket became empty). A second call returns an empty list.
    pub fn close(&self) -> Vec<PendingFanout> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        self.router
            .close(&self.head, &self.storage_key, self.is_global, self.is_simple, self.id)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("raw_filter", &self.raw_filter)
            .field("id", &self.id)
            .finish()
    }
}
