//! Hosting context: plugin lookup, named pipelines and cross-plugin posting.

use crate::audit::Audit;
use crate::error::{EngineError, Result};
use crate::event::{Event, SharedEvent};
use crate::event_loop::EventLoop;
use crate::event_source::EventSource;
use crate::pipeline::Pipeline;
use crate::plugin::{PluginExt, PluginRef, WeakPlugin};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, Weak};

/// Events and domains a plugin subscribes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerInfo {
    #[serde(default)]
    pub events: BTreeSet<String>,
    #[serde(default)]
    pub domains: BTreeSet<String>,
}

impl ListenerInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, name: impl Into<String>) -> Self {
        self.events.insert(name.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.insert(domain.into());
        self
    }

    /// An event matches by name, or by domain when it has one.
    pub fn matches(&self, event: &Event) -> bool {
        self.events.contains(event.name())
            || (!event.domain().is_empty() && self.domains.contains(event.domain()))
    }
}

/// Services the hosting framework offers to plugins.
#[cfg_attr(test, mockall::automock)]
pub trait HiviewContext: Send + Sync {
    /// Processor chain of the named pipeline, empty if unknown.
    fn get_pipeline_sequence_by_name(&self, name: &str) -> Vec<WeakPlugin>;

    fn get_plugin_by_name(&self, name: &str) -> Option<PluginRef>;

    /// Queue `event` for `target` on its work loop (or the shared loop).
    fn post_async_event_to_target(
        &self,
        caller: Option<PluginRef>,
        target: &str,
        event: SharedEvent,
    ) -> bool;

    /// Run `event` on `target` and wait for its result.
    fn post_sync_event_to_target(
        &self,
        caller: Option<PluginRef>,
        target: &str,
        event: SharedEvent,
    ) -> bool;

    fn add_listener_info(&self, plugin_name: &str, info: ListenerInfo);

    fn get_listener_info(&self, plugin_name: &str) -> Option<ListenerInfo>;
}

/// In-process [`HiviewContext`]: owns the loaded plugins and the named
/// pipelines built from them.
pub struct PluginRegistry {
    self_ref: Weak<PluginRegistry>,
    plugins: RwLock<BTreeMap<String, PluginRef>>,
    pipelines: RwLock<BTreeMap<String, Arc<Pipeline>>>,
    listeners: RwLock<BTreeMap<String, ListenerInfo>>,
    shared_loop: RwLock<Option<Arc<EventLoop>>>,
    audit: Audit,
}

impl PluginRegistry {
    pub fn new(audit: Audit) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            plugins: RwLock::new(BTreeMap::new()),
            pipelines: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(BTreeMap::new()),
            shared_loop: RwLock::new(None),
            audit,
        })
    }

    pub fn audit(&self) -> &Audit {
        &self.audit
    }

    /// Loop used for targets without a work loop of their own.
    pub fn set_shared_loop(&self, work_loop: Option<Arc<EventLoop>>) {
        if let Ok(mut guard) = self.shared_loop.write() {
            *guard = work_loop;
        }
    }

    pub fn shared_loop(&self) -> Option<Arc<EventLoop>> {
        self.shared_loop.read().ok().and_then(|g| g.clone())
    }

    /// Take ownership of `plugin`, wire it to this context and call
    /// [`on_load`](crate::plugin::Plugin::on_load).
    pub fn register_plugin(&self, plugin: PluginRef) -> Result<()> {
        let name = plugin.name().to_string();
        {
            let mut plugins = self
                .plugins
                .write()
                .map_err(|_| EngineError::Plugin("registry lock poisoned".to_string()))?;
            if plugins.contains_key(&name) {
                return Err(EngineError::Plugin(format!("'{name}' is already registered")));
            }
            let context: Weak<dyn HiviewContext> = self.self_ref.clone();
            plugin.core().set_context(context);
            plugin.core().set_audit(self.audit.clone());
            plugins.insert(name.clone(), Arc::clone(&plugin));
        }
        plugin.on_load();
        tracing::info!("Loaded plugin '{}' v{}", name, plugin.version());
        Ok(())
    }

    /// Drop the registry's reference to `name`. Pipelines referencing it skip
    /// it once no other owner remains.
    pub fn unload_plugin(&self, name: &str) -> bool {
        let removed = self.plugins.write().ok().and_then(|mut p| p.remove(name));
        let Some(plugin) = removed else {
            return false;
        };
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.remove(name);
        }
        plugin.on_unload();
        // Breaks the loop -> queued entry -> plugin -> loop cycle.
        plugin.core().bind_work_loop(None);
        tracing::info!("Unloaded plugin '{}'", name);
        true
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins
            .read()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Build and register a pipeline from plugin names.
    pub fn create_pipeline(&self, name: &str, processors: &[&str]) -> Result<Arc<Pipeline>> {
        let chain = {
            let plugins = self
                .plugins
                .read()
                .map_err(|_| EngineError::Pipeline("registry lock poisoned".to_string()))?;
            processors
                .iter()
                .map(|p| {
                    plugins
                        .get(*p)
                        .map(Arc::downgrade)
                        .ok_or_else(|| EngineError::Pipeline(format!("{name}: unknown processor '{p}'")))
                })
                .collect::<Result<Vec<_>>>()?
        };

        let pipeline = Arc::new(Pipeline::new(name, chain));
        self.pipelines
            .write()
            .map_err(|_| EngineError::Pipeline("registry lock poisoned".to_string()))?
            .insert(name.to_string(), Arc::clone(&pipeline));
        tracing::debug!("Created pipeline '{}' with {} processors", name, processors.len());
        Ok(pipeline)
    }

    pub fn pipeline(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.read().ok().and_then(|p| p.get(name).cloned())
    }

    /// An [`EventSource`] feeding the named pipelines, in order.
    pub fn event_source(&self, name: &str, pipelines: &[&str]) -> Result<EventSource> {
        let source = EventSource::new(name, self.audit.clone());
        for pipeline in pipelines {
            let found = self
                .pipeline(pipeline)
                .ok_or_else(|| EngineError::Pipeline(format!("unknown pipeline '{pipeline}'")))?;
            source.add_pipeline(found);
        }
        Ok(source)
    }

    /// Plugins whose listener info matches `event`.
    pub fn listeners_for(&self, event: &Event) -> Vec<String> {
        self.listeners
            .read()
            .map(|l| {
                l.iter()
                    .filter(|(_, info)| info.matches(event))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn target_loop(&self, target: &PluginRef) -> Option<Arc<EventLoop>> {
        target.core().work_loop().or_else(|| self.shared_loop())
    }
}

impl HiviewContext for PluginRegistry {
    fn get_pipeline_sequence_by_name(&self, name: &str) -> Vec<WeakPlugin> {
        self.pipeline(name)
            .map(|p| p.processors())
            .unwrap_or_default()
    }

    fn get_plugin_by_name(&self, name: &str) -> Option<PluginRef> {
        self.plugins.read().ok().and_then(|p| p.get(name).cloned())
    }

    fn post_async_event_to_target(
        &self,
        caller: Option<PluginRef>,
        target: &str,
        event: SharedEvent,
    ) -> bool {
        let Some(callee) = self.get_plugin_by_name(target) else {
            tracing::warn!("Async post to unknown plugin '{}'", target);
            return false;
        };
        let Some(work_loop) = self.target_loop(&callee) else {
            tracing::warn!("No loop available for plugin '{}'", target);
            return false;
        };
        tracing::trace!(
            "Posting {} from '{}' to '{}'",
            event.event_info(),
            caller.as_ref().map(|c| c.name()).unwrap_or("<none>"),
            target
        );
        work_loop.add_event(Some(callee), Some(event), None) != 0
    }

    fn post_sync_event_to_target(
        &self,
        caller: Option<PluginRef>,
        target: &str,
        event: SharedEvent,
    ) -> bool {
        let Some(callee) = self.get_plugin_by_name(target) else {
            tracing::warn!("Sync post to unknown plugin '{}'", target);
            return false;
        };
        match self.target_loop(&callee) {
            // Waiting on our own loop would never complete.
            Some(work_loop) if !work_loop.is_in_loop_thread() => {
                tracing::trace!(
                    "Sync post of {} from '{}' to '{}'",
                    event.event_info(),
                    caller.as_ref().map(|c| c.name()).unwrap_or("<none>"),
                    target
                );
                work_loop.add_event_for_result(Some(callee), Some(event)).wait()
            }
            _ => callee.on_event_proxy(event),
        }
    }

    fn add_listener_info(&self, plugin_name: &str, info: ListenerInfo) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners
                .entry(plugin_name.to_string())
                .and_modify(|existing| {
                    existing.events.extend(info.events.iter().cloned());
                    existing.domains.extend(info.domains.iter().cloned());
                })
                .or_insert(info);
        }
    }

    fn get_listener_info(&self, plugin_name: &str) -> Option<ListenerInfo> {
        self.listeners
            .read()
            .ok()
            .and_then(|l| l.get(plugin_name).cloned())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugin_names())
            .field("audit", &self.audit)
            .finish()
    }
}
