//! Per-event routing state and hop-by-hop delivery.

use crate::audit::{digest, Audit, AuditEventType};
use crate::event::{Event, EventHandler};
use crate::plugin::{PluginExt, PluginRef, WeakPlugin};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Remaining chain and delivery flags of a pipeline event.
pub struct PipelineRoute {
    pipeline_name: Mutex<String>,
    processors: Mutex<VecDeque<WeakPlugin>>,
    has_pending: AtomicBool,
    has_finish: AtomicBool,
    start_deliver: AtomicBool,
    handler: Option<Weak<dyn EventHandler>>,
    audit: Audit,
}

impl PipelineRoute {
    pub fn new(handler: Option<Weak<dyn EventHandler>>, audit: Audit) -> Self {
        Self {
            pipeline_name: Mutex::new(String::new()),
            processors: Mutex::new(VecDeque::new()),
            has_pending: AtomicBool::new(false),
            has_finish: AtomicBool::new(false),
            start_deliver: AtomicBool::new(false),
            handler,
            audit,
        }
    }

    pub fn pipeline_name(&self) -> String {
        lock(&self.pipeline_name).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.processors).len()
    }

    pub fn has_started(&self) -> bool {
        self.start_deliver.load(Ordering::SeqCst)
    }

    fn handler(&self) -> Option<Arc<dyn EventHandler>> {
        self.handler.as_ref().and_then(Weak::upgrade)
    }

    fn pop_front(&self) -> Option<WeakPlugin> {
        lock(&self.processors).pop_front()
    }

    fn replace(&self, name: &str, processors: Vec<WeakPlugin>) {
        *lock(&self.pipeline_name) = name.to_string();
        *lock(&self.processors) = processors.into();
    }
}

impl fmt::Debug for PipelineRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRoute")
            .field("pipeline", &self.pipeline_name())
            .field("remaining", &self.remaining())
            .field("pending", &self.has_pending.load(Ordering::SeqCst))
            .field("finished", &self.has_finish.load(Ordering::SeqCst))
            .field("started", &self.has_started())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pipeline behavior of events. On plain events these are no-ops returning
/// `false`/`0`.
impl Event {
    /// Hand the event to the next live processor.
    ///
    /// Expired processors are dropped without audit. When the chain is
    /// exhausted the event finishes. Returns `false` once finished or when
    /// the next hop's loop refused the event.
    pub fn on_continue(self: &Arc<Self>) -> bool {
        let Some(route) = self.route() else {
            tracing::warn!("on_continue called on plain event {}", self.event_info());
            return false;
        };
        if route.has_finish.load(Ordering::SeqCst) {
            return false;
        }

        let plugin = loop {
            match route.pop_front() {
                None => return self.on_finish(),
                Some(weak) => match weak.upgrade() {
                    Some(plugin) => break plugin,
                    None => tracing::trace!(
                        "Skipping unloaded processor in '{}'",
                        route.pipeline_name()
                    ),
                },
            }
        };

        // Closing the previous hop, if any.
        if route.start_deliver.swap(true, Ordering::SeqCst) {
            route.audit.write_with(
                AuditEventType::PipelineEventHandleOut,
                self.create_time(),
                digest::thread_id,
            );
        }

        if !plugin.can_process_more_events() {
            if let Some(handler) = route.handler() {
                handler.pause_dispatch(Arc::downgrade(&plugin));
            }
        }

        route
            .audit
            .write_with(AuditEventType::PipelineEventHandleIn, self.create_time(), || {
                plugin.handle_info()
            });

        match plugin.core().work_loop() {
            Some(work_loop) => {
                work_loop.add_event(Some(Arc::clone(&plugin)), Some(Arc::clone(self)), None) != 0
            }
            None => {
                plugin.on_event_proxy(Arc::clone(self));
                true
            }
        }
    }

    /// Terminate delivery: recycle through the owning handler and audit
    /// completion. A second call returns `false`.
    pub fn on_finish(&self) -> bool {
        let Some(route) = self.route() else {
            return false;
        };
        if route.has_finish.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Some(handler) = route.handler() {
            handler.recycle(self);
        }
        route.audit.write_with(
            AuditEventType::PipelineEventHandleOut,
            self.create_time(),
            digest::thread_id,
        );
        route.audit.write_with(
            AuditEventType::PipelineEventDone,
            self.create_time(),
            || route.pipeline_name(),
        );
        tracing::trace!("Pipeline event {} finished", self.event_info());
        true
    }

    /// Park the event: the current processor will redeliver or advance it
    /// later, so the proxy must not auto-advance.
    pub fn on_pending(&self) {
        if let Some(route) = self.route() {
            route.has_pending.store(true, Ordering::SeqCst);
        }
    }

    pub fn reset_pending(&self) {
        if let Some(route) = self.route() {
            route.has_pending.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.route()
            .map(|r| r.has_pending.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn has_finished(&self) -> bool {
        self.route()
            .map(|r| r.has_finish.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Processors still ahead of the event, expired ones included.
    pub fn remaining_processors(&self) -> usize {
        self.route().map(PipelineRoute::remaining).unwrap_or(0)
    }

    /// Replace the pipeline name and remaining chain.
    pub fn set_pipeline_info(&self, pipeline_name: &str, processors: Vec<WeakPlugin>) -> bool {
        match self.route() {
            Some(route) => {
                route.replace(pipeline_name, processors);
                true
            }
            None => false,
        }
    }

    /// Load `pipeline_name`'s chain through `caller`'s context.
    ///
    /// With `deliver_from_current`, everything up to and including `caller`
    /// is dropped so delivery resumes after it. A caller absent from the
    /// chain leaves nothing to deliver to.
    pub fn fill_pipeline_info(
        &self,
        caller: &PluginRef,
        pipeline_name: &str,
        deliver_from_current: bool,
    ) -> bool {
        let Some(context) = caller.core().context() else {
            tracing::warn!("Plugin '{}' has no context to resolve pipelines", caller.name());
            return false;
        };
        let mut sequence = context.get_pipeline_sequence_by_name(pipeline_name);
        if deliver_from_current {
            let me = Arc::downgrade(caller);
            match sequence.iter().position(|p| Weak::ptr_eq(p, &me)) {
                Some(pos) => {
                    sequence.drain(..=pos);
                }
                None => sequence.clear(),
            }
        }
        self.set_pipeline_info(pipeline_name, sequence)
    }
}
