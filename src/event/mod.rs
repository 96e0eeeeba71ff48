//! Events: named, timestamped attribute-bag messages.
//!
//! An [`Event`] is shared as [`SharedEvent`] (`Arc<Event>`) between the
//! producer, the loop queue and whichever plugin is processing it. Events
//! created through [`EventBuilder::pipeline`] additionally carry a
//! [`PipelineRoute`](crate::pipeline::PipelineRoute) and are routed hop by
//! hop through a [`Pipeline`](crate::pipeline::Pipeline).

use crate::audit::Audit;
use crate::clock;
use crate::pipeline::PipelineRoute;
use crate::plugin::WeakPlugin;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Shared reference to an event.
pub type SharedEvent = Arc<Event>;

/// Broad classification of an event's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    None,
    FaultLogInfo,
    SysEvent,
    PluginMaintenance,
    RawEvent,
    CrossPlatform,
}

/// Owner of pipeline events: recycles finished events and applies
/// back-pressure when a plugin refuses more work.
#[cfg_attr(test, mockall::automock)]
pub trait EventHandler: Send + Sync {
    /// A pipeline event reached the end of its chain.
    fn recycle(&self, event: &Event);

    /// `plugin` reported it cannot take more events; stop feeding it.
    fn pause_dispatch(&self, plugin: WeakPlugin);
}

/// A named, timestamped, attribute-bag message.
pub struct Event {
    name: String,
    domain: String,
    sender: String,
    message_type: MessageType,
    event_id: u32,
    what: u16,
    happen_time: i64,
    create_time: AtomicU64,
    json_extra_info: RwLock<String>,
    attributes: RwLock<BTreeMap<String, String>>,
    route: Option<PipelineRoute>,
}

impl Event {
    /// Plain (non-pipeline) event with the given name.
    pub fn new(name: impl Into<String>) -> SharedEvent {
        EventBuilder::new(name).build()
    }

    pub fn builder(name: impl Into<String>) -> EventBuilder {
        EventBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn event_id(&self) -> u32 {
        self.event_id
    }

    pub fn what(&self) -> u16 {
        self.what
    }

    /// Wall clock milliseconds at which the event happened.
    pub fn happen_time(&self) -> i64 {
        self.happen_time
    }

    /// Monotonic creation timestamp (ns). Used as the audit correlation id.
    pub fn create_time(&self) -> u64 {
        self.create_time.load(Ordering::Acquire)
    }

    /// Refresh the creation timestamp, e.g. before a repeat enqueue.
    pub fn reset_timestamp(&self) {
        self.create_time
            .store(clock::next_sequence(), Ordering::Release);
    }

    /// Short description used in audit digests.
    pub fn event_info(&self) -> String {
        if self.domain.is_empty() {
            format!("{}#{}", self.name, self.event_id)
        } else {
            format!("{}:{}#{}", self.domain, self.name, self.event_id)
        }
    }

    pub fn is_pipeline(&self) -> bool {
        self.route.is_some()
    }

    pub fn route(&self) -> Option<&PipelineRoute> {
        self.route.as_ref()
    }

    // ==================== Attributes ====================

    pub fn set_value(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut attrs) = self.attributes.write() {
            attrs.insert(key.into(), value.into());
        }
    }

    pub fn set_int_value(&self, key: impl Into<String>, value: i64) {
        self.set_value(key, value.to_string());
    }

    /// Attribute value, or an empty string when absent.
    pub fn get_value(&self, key: &str) -> String {
        self.attributes
            .read()
            .ok()
            .and_then(|attrs| attrs.get(key).cloned())
            .unwrap_or_default()
    }

    /// Attribute parsed as `i32`, or -1 when absent or malformed.
    pub fn get_int_value(&self, key: &str) -> i32 {
        self.get_value(key).trim().parse().unwrap_or(-1)
    }

    /// Attribute parsed as `i64`, or -1 when absent or malformed.
    pub fn get_int64_value(&self, key: &str) -> i64 {
        self.get_value(key).trim().parse().unwrap_or(-1)
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.attributes
            .read()
            .map(|attrs| attrs.contains_key(key))
            .unwrap_or(false)
    }

    pub fn remove_value(&self, key: &str) -> Option<String> {
        self.attributes.write().ok().and_then(|mut a| a.remove(key))
    }

    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.attributes
            .read()
            .map(|attrs| attrs.clone())
            .unwrap_or_default()
    }

    pub fn json_extra_info(&self) -> String {
        self.json_extra_info
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn set_json_extra_info(&self, info: impl Into<String>) {
        if let Ok(mut guard) = self.json_extra_info.write() {
            *guard = info.into();
        }
    }

    /// Serializable copy of the event's current state.
    pub fn snapshot(&self) -> EventSnapshot {
        EventSnapshot {
            name: self.name.clone(),
            domain: self.domain.clone(),
            sender: self.sender.clone(),
            message_type: self.message_type,
            event_id: self.event_id,
            what: self.what,
            happen_time: self.happen_time,
            create_time: self.create_time(),
            is_pipeline: self.is_pipeline(),
            pipeline_name: self.route.as_ref().map(|r| r.pipeline_name()),
            attributes: self.attributes(),
            json_extra_info: self.json_extra_info(),
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("sender", &self.sender)
            .field("event_id", &self.event_id)
            .field("create_time", &self.create_time())
            .field("is_pipeline", &self.is_pipeline())
            .finish()
    }
}

/// Serializable view of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub name: String,
    pub domain: String,
    pub sender: String,
    pub message_type: MessageType,
    pub event_id: u32,
    pub what: u16,
    pub happen_time: i64,
    pub create_time: u64,
    pub is_pipeline: bool,
    pub pipeline_name: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub json_extra_info: String,
}

/// Builder for [`Event`].
pub struct EventBuilder {
    name: String,
    domain: String,
    sender: String,
    message_type: MessageType,
    event_id: u32,
    what: u16,
    happen_time: Option<i64>,
    json_extra_info: String,
    attributes: BTreeMap<String, String>,
    pipeline: Option<(Option<Weak<dyn EventHandler>>, Audit)>,
}

impl EventBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: String::new(),
            sender: String::new(),
            message_type: MessageType::None,
            event_id: 0,
            what: 0,
            happen_time: None,
            json_extra_info: String::new(),
            attributes: BTreeMap::new(),
            pipeline: None,
        }
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn event_id(mut self, event_id: u32) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn what(mut self, what: u16) -> Self {
        self.what = what;
        self
    }

    pub fn happen_time(mut self, millis: i64) -> Self {
        self.happen_time = Some(millis);
        self
    }

    pub fn json_extra_info(mut self, info: impl Into<String>) -> Self {
        self.json_extra_info = info.into();
        self
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Make this a pipeline event owned by `handler`, auditing hops to `audit`.
    pub fn pipeline(mut self, handler: Option<Weak<dyn EventHandler>>, audit: Audit) -> Self {
        self.pipeline = Some((handler, audit));
        self
    }

    pub fn build(self) -> SharedEvent {
        let route = self
            .pipeline
            .map(|(handler, audit)| PipelineRoute::new(handler, audit));
        Arc::new(Event {
            name: self.name,
            domain: self.domain,
            sender: self.sender,
            message_type: self.message_type,
            event_id: self.event_id,
            what: self.what,
            happen_time: self.happen_time.unwrap_or_else(clock::wall_clock_millis),
            create_time: AtomicU64::new(clock::next_sequence()),
            json_extra_info: RwLock::new(self.json_extra_info),
            attributes: RwLock::new(self.attributes),
            route,
        })
    }
}
