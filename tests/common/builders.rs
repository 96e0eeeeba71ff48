//! Test data builders for creating test objects

use super::mock_helpers::{Behavior, OrderLog, RecordingPlugin};
use hiview_engine::{Audit, Event, EventHandler, EventLoop, PluginRef, SharedEvent};
use std::sync::{Arc, Weak};

/// Builder for creating test plugins
pub struct PluginBuilder {
    name: String,
    log: OrderLog,
    behavior: Behavior,
    work_loop: Option<Arc<EventLoop>>,
}

impl PluginBuilder {
    pub fn new(name: &str, log: &OrderLog) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            behavior: Behavior {
                result: true,
                ..Behavior::default()
            },
            work_loop: None,
        }
    }

    pub fn accepts(mut self, event_name: &str) -> Self {
        self.behavior.accepts = Some(event_name.to_string());
        self
    }

    pub fn saturated(mut self) -> Self {
        self.behavior.saturated = true;
        self
    }

    pub fn delay_first(mut self, delay_ms: u64) -> Self {
        self.behavior.delay_first_ms = Some(delay_ms);
        self
    }

    pub fn forward_itself(mut self) -> Self {
        self.behavior.forward_itself = true;
        self
    }

    pub fn returns(mut self, result: bool) -> Self {
        self.behavior.result = result;
        self
    }

    pub fn work_loop(mut self, work_loop: &Arc<EventLoop>) -> Self {
        self.work_loop = Some(Arc::clone(work_loop));
        self
    }

    pub fn build(self) -> Arc<RecordingPlugin> {
        let plugin = RecordingPlugin::new(&self.name, self.log, self.behavior);
        if let Some(work_loop) = self.work_loop {
            hiview_engine::Plugin::core(&*plugin).bind_work_loop(Some(work_loop));
        }
        plugin
    }
}

/// Owning handles for a processor chain
pub fn chain(plugins: &[&Arc<RecordingPlugin>]) -> Vec<PluginRef> {
    plugins
        .iter()
        .map(|p| Arc::clone(*p) as PluginRef)
        .collect()
}

/// A started loop running on its own thread
pub fn started_loop(name: &str, audit: Audit) -> Arc<EventLoop> {
    let work_loop = Arc::new(EventLoop::with_audit(name, audit));
    assert!(work_loop.start_loop(true));
    work_loop
}

/// A pipeline event owned by `handler`
pub fn pipeline_event(name: &str, handler: &Arc<dyn EventHandler>, audit: &Audit) -> SharedEvent {
    let handler: Weak<dyn EventHandler> = Arc::downgrade(handler);
    Event::builder(name)
        .sender("test")
        .pipeline(Some(handler), audit.clone())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::mock_helpers::order_log;
    use hiview_engine::Plugin;

    #[test]
    fn test_plugin_builder() {
        let log = order_log();
        let plugin = PluginBuilder::new("a", &log).accepts("CRASH").build();
        assert_eq!(plugin.name(), "a");
        assert!(plugin.core().work_loop().is_none());
    }
}
