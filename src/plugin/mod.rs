//! Plugins: named units of work that consume events.
//!
//! A plugin embeds a [`PluginCore`] holding its identity, its optional work
//! loop and its back-reference to the hosting [`HiviewContext`]. Everything
//! the engine calls on a plugin goes through [`PluginExt::on_event_proxy`],
//! which wraps [`Plugin::on_event`] with audit bookkeeping and pipeline
//! auto-advance.

use crate::audit::{digest, Audit, AuditEventType};
use crate::clock;
use crate::context::{HiviewContext, ListenerInfo};
use crate::event::SharedEvent;
use crate::event_loop::EventLoop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Owning reference to a plugin.
pub type PluginRef = Arc<dyn Plugin>;

/// Non-owning reference held by pipelines.
pub type WeakPlugin = Weak<dyn Plugin>;

/// State every plugin carries.
pub struct PluginCore {
    name: String,
    version: String,
    work_loop: RwLock<Option<Arc<EventLoop>>>,
    context: RwLock<Option<Weak<dyn HiviewContext>>>,
    audit: RwLock<Audit>,
    last_active_time: AtomicU64,
}

impl PluginCore {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            work_loop: RwLock::new(None),
            context: RwLock::new(None),
            audit: RwLock::new(Audit::disabled()),
            last_active_time: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Bind (or with `None`, unbind) the loop this plugin's hops run on.
    pub fn bind_work_loop(&self, work_loop: Option<Arc<EventLoop>>) {
        if let Ok(mut guard) = self.work_loop.write() {
            *guard = work_loop;
        }
    }

    pub fn work_loop(&self) -> Option<Arc<EventLoop>> {
        self.work_loop.read().ok().and_then(|guard| guard.clone())
    }

    pub fn set_context(&self, context: Weak<dyn HiviewContext>) {
        if let Ok(mut guard) = self.context.write() {
            *guard = Some(context);
        }
    }

    /// The hosting context, if it is still alive.
    pub fn context(&self) -> Option<Arc<dyn HiviewContext>> {
        self.context
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().and_then(Weak::upgrade))
    }

    pub fn set_audit(&self, audit: Audit) {
        if let Ok(mut guard) = self.audit.write() {
            *guard = audit;
        }
    }

    pub fn audit(&self) -> Audit {
        self.audit.read().map(|a| a.clone()).unwrap_or_default()
    }

    /// Monotonic ms timestamp of the last dispatched event, 0 if none yet.
    pub fn last_active_time(&self) -> u64 {
        self.last_active_time.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self) {
        self.last_active_time
            .store(clock::monotonic_millis(), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for PluginCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCore")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("has_work_loop", &self.work_loop().is_some())
            .finish()
    }
}

/// A unit of event processing.
pub trait Plugin: Send + Sync + 'static {
    fn core(&self) -> &PluginCore;

    /// Handle one event. Returning `false` only affects the caller's result.
    fn on_event(&self, event: &SharedEvent) -> bool;

    /// Whether a pipeline headed by this plugin should accept `event`.
    fn can_process_event(&self, _event: &SharedEvent) -> bool {
        true
    }

    /// `false` asks the event's owner to pause feeding this plugin.
    fn can_process_more_events(&self) -> bool {
        true
    }

    fn on_load(&self) {}

    fn on_unload(&self) {}

    fn name(&self) -> &str {
        self.core().name()
    }

    fn version(&self) -> &str {
        self.core().version()
    }

    /// Identity string used in audit digests.
    fn handle_info(&self) -> String {
        self.name().to_string()
    }
}

/// Engine-side behavior of shared plugin handles.
pub trait PluginExt {
    /// Dispatch `event` to [`Plugin::on_event`].
    ///
    /// Non-pipeline events are audited as `QUEUE_EVENT_OUT`. A pipeline
    /// event the plugin neither advanced, finished nor parked is forwarded
    /// to its next hop.
    fn on_event_proxy(&self, event: SharedEvent) -> bool;

    /// Park `event` and redeliver it to this plugin after `delay_ms` on the
    /// plugin's work loop. Returns the timer's sequence id, 0 when the
    /// plugin has no loop or the loop rejected it.
    fn delay_process_event(&self, event: SharedEvent, delay_ms: u64) -> u64;

    /// Register the events this plugin listens to with the hosting context.
    fn add_event_listener_info(&self, info: ListenerInfo) -> bool;

    fn get_event_listener_info(&self) -> Option<ListenerInfo>;
}

impl PluginExt for PluginRef {
    fn on_event_proxy(&self, event: SharedEvent) -> bool {
        let remaining_before = event.remaining_processors();
        event.reset_pending();
        self.core().touch();

        let handled = self.on_event(&event);

        if !event.is_pipeline() {
            self.core()
                .audit()
                .write_with(AuditEventType::QueueEventOut, event.create_time(), digest::thread_id);
        } else if !event.has_finished()
            && !event.is_pending()
            && event.remaining_processors() == remaining_before
        {
            event.on_continue();
        }
        handled
    }

    fn delay_process_event(&self, event: SharedEvent, delay_ms: u64) -> u64 {
        let Some(work_loop) = self.core().work_loop() else {
            tracing::warn!("Plugin '{}' has no work loop, cannot delay event", self.name());
            return 0;
        };
        event.on_pending();
        let seq = work_loop.add_timer_event(Some(Arc::clone(self)), Some(event), None, delay_ms, false);
        if seq == 0 {
            tracing::warn!("Loop '{}' refused delayed event for '{}'", work_loop.name(), self.name());
        }
        seq
    }

    fn add_event_listener_info(&self, info: ListenerInfo) -> bool {
        match self.core().context() {
            Some(context) => {
                context.add_listener_info(self.name(), info);
                true
            }
            None => false,
        }
    }

    fn get_event_listener_info(&self) -> Option<ListenerInfo> {
        self.core()
            .context()
            .and_then(|context| context.get_listener_info(self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::event::Event;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        core: PluginCore,
        calls: AtomicUsize,
    }

    impl Plugin for Counting {
        fn core(&self) -> &PluginCore {
            &self.core
        }

        fn on_event(&self, _event: &SharedEvent) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn counting(name: &str) -> Arc<Counting> {
        Arc::new(Counting {
            core: PluginCore::new(name, "1.0"),
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_proxy_audits_plain_events() {
        let sink = Arc::new(MemoryAuditSink::new(4));
        let plugin = counting("collector");
        plugin.core().set_audit(Audit::new(sink.clone()));
        let handle: PluginRef = plugin.clone();

        let ev = Event::new("PLAIN");
        assert!(handle.on_event_proxy(Arc::clone(&ev)));
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);

        let out = sink.records_of(AuditEventType::QueueEventOut);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, ev.create_time());
    }

    #[test]
    fn test_delay_without_loop_is_rejected() {
        let handle: PluginRef = counting("idle");
        let ev = Event::builder("P").pipeline(None, Audit::disabled()).build();
        assert_eq!(handle.delay_process_event(Arc::clone(&ev), 10), 0);
        assert!(!ev.is_pending());
    }

    #[test]
    fn test_listener_info_without_context() {
        let handle: PluginRef = counting("orphan");
        assert!(!handle.add_event_listener_info(ListenerInfo::default()));
        assert!(handle.get_event_listener_info().is_none());
    }

    #[test]
    fn test_work_loop_binding() {
        let plugin = counting("bound");
        assert!(plugin.core().work_loop().is_none());
        plugin
            .core()
            .bind_work_loop(Some(Arc::new(EventLoop::new("bound-loop"))));
        assert_eq!(
            plugin.core().work_loop().map(|l| l.name().to_string()),
            Some("bound-loop".to_string())
        );
        plugin.core().bind_work_loop(None);
        assert!(plugin.core().work_loop().is_none());
        assert_eq!(plugin.handle_info(), "bound");
        assert_eq!(plugin.version(), "1.0");
    }
}
