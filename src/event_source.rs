//! Entry point for pipeline events.

use crate::audit::{digest, Audit, AuditEventType};
use crate::event::SharedEvent;
use crate::pipeline::Pipeline;
use std::sync::{Arc, RwLock};

/// Publishes pipeline events to the first registered pipeline that accepts
/// them.
pub struct EventSource {
    name: String,
    pipelines: RwLock<Vec<Arc<Pipeline>>>,
    audit: Audit,
}

impl EventSource {
    pub fn new(name: impl Into<String>, audit: Audit) -> Self {
        Self {
            name: name.into(),
            pipelines: RwLock::new(Vec::new()),
            audit,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a pipeline. Pipelines are tried in registration order.
    pub fn add_pipeline(&self, pipeline: Arc<Pipeline>) {
        if let Ok(mut pipelines) = self.pipelines.write() {
            pipelines.push(pipeline);
        }
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Deliver `event` to the first pipeline whose head accepts it.
    pub fn publish_pipeline_event(&self, event: SharedEvent) -> bool {
        if !event.is_pipeline() {
            tracing::warn!(
                "Source '{}' cannot publish plain event {}",
                self.name,
                event.event_info()
            );
            return false;
        }

        self.audit
            .write_with(AuditEventType::PipelineEventCreate, event.create_time(), || {
                let creator = if event.sender().is_empty() {
                    self.name.as_str()
                } else {
                    event.sender()
                };
                digest::pipeline_create(creator, &event.event_info())
            });

        // Snapshot so a pipeline hop may register new pipelines.
        let pipelines = match self.pipelines.read() {
            Ok(p) => p.clone(),
            Err(_) => return false,
        };
        for pipeline in pipelines {
            if pipeline.can_process_event(&event) {
                tracing::trace!(
                    "Source '{}' routing {} to '{}'",
                    self.name,
                    event.event_info(),
                    pipeline.name()
                );
                pipeline.process_event(&event);
                return true;
            }
        }

        tracing::debug!("No pipeline accepted {}", event.event_info());
        false
    }
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("name", &self.name)
            .field("pipelines", &self.pipeline_count())
            .finish()
    }
}
