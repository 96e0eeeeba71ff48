//! Named, ordered chains of weakly referenced plugins.

use crate::event::SharedEvent;
use crate::plugin::{PluginRef, WeakPlugin};
use std::sync::{Arc, RwLock, Weak};

/// An ordered sequence of processors an event travels through.
///
/// Processors are held weakly; unloading a plugin never has to touch the
/// pipelines that mention it. Each routed event gets its own snapshot of the
/// chain, so later edits do not affect events already in flight.
pub struct Pipeline {
    name: String,
    processors: RwLock<Vec<WeakPlugin>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, processors: Vec<WeakPlugin>) -> Self {
        Self {
            name: name.into(),
            processors: RwLock::new(processors),
        }
    }

    /// Build from owning handles.
    pub fn from_plugins(name: impl Into<String>, plugins: &[PluginRef]) -> Self {
        Self::new(name, plugins.iter().map(Arc::downgrade).collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn append_processor(&self, plugin: &PluginRef) {
        if let Ok(mut processors) = self.processors.write() {
            processors.push(Arc::downgrade(plugin));
        }
    }

    /// Remove every occurrence of `plugin`. Returns whether any was found.
    pub fn remove_processor(&self, plugin: &PluginRef) -> bool {
        let target = Arc::downgrade(plugin);
        match self.processors.write() {
            Ok(mut processors) => {
                let before = processors.len();
                processors.retain(|p| !Weak::ptr_eq(p, &target));
                processors.len() != before
            }
            Err(_) => false,
        }
    }

    /// Current chain, expired references included.
    pub fn processors(&self) -> Vec<WeakPlugin> {
        self.processors
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Names of the processors that are still loaded.
    pub fn live_processor_names(&self) -> Vec<String> {
        self.processors()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Whether this pipeline should take `event`, as decided by its first
    /// live processor.
    pub fn can_process_event(&self, event: &SharedEvent) -> bool {
        let first = self
            .processors
            .read()
            .ok()
            .and_then(|p| p.iter().find_map(Weak::upgrade));
        match first {
            Some(plugin) => plugin.can_process_event(event),
            None => false,
        }
    }

    /// Start routing `event` through a snapshot of the chain.
    pub fn process_event(&self, event: &SharedEvent) -> bool {
        if !event.is_pipeline() {
            tracing::warn!(
                "Pipeline '{}' got non-pipeline event {}",
                self.name,
                event.event_info()
            );
            return false;
        }
        event.set_pipeline_info(&self.name, self.processors());
        event.on_continue()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("processors", &self.live_processor_names())
            .finish()
    }
}
