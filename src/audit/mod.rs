//! Audit bookkeeping for queueing and pipeline latencies.
//!
//! Every enqueue, dequeue and pipeline hop can be recorded as an
//! [`AuditEventType`] with a correlation id (the event's monotonic creation
//! time) and a pipe-delimited digest. Persistence of these records is the
//! job of an [`AuditSink`]; the engine only ever calls
//! [`AuditSink::write_audit_event`].
//!
//! # Digest formats
//!
//! | Record                      | Digest                                   |
//! |-----------------------------|------------------------------------------|
//! | `QUEUE_EVENT_IN`            | `sender\|handlerInfo\|loopName\|eventInfo` |
//! | `QUEUE_EVENT_OUT`           | calling thread id                        |
//! | `PIPELINE_EVENT_CREATE`     | `creatorInfo\|eventInfo`                 |
//! | `PIPELINE_EVENT_HANDLE_IN`  | plugin name                              |
//! | `PIPELINE_EVENT_HANDLE_OUT` | calling thread id                        |
//! | `PIPELINE_EVENT_DONE`       | pipeline name                            |

pub mod sink;

pub use sink::{AuditRecord, FanoutAuditSink, MemoryAuditSink, TracingAuditSink};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Separator between digest fields.
pub const DIGEST_SEPARATOR: char = '|';

/// Kinds of audit records emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum AuditEventType {
    QueueEventIn = 0,
    QueueEventOut = 1,
    PipelineEventCreate = 2,
    PipelineEventHandleIn = 3,
    PipelineEventHandleOut = 4,
    PipelineEventDone = 5,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::QueueEventIn => "QUEUE_EVENT_IN",
            AuditEventType::QueueEventOut => "QUEUE_EVENT_OUT",
            AuditEventType::PipelineEventCreate => "PIPELINE_EVENT_CREATE",
            AuditEventType::PipelineEventHandleIn => "PIPELINE_EVENT_HANDLE_IN",
            AuditEventType::PipelineEventHandleOut => "PIPELINE_EVENT_HANDLE_OUT",
            AuditEventType::PipelineEventDone => "PIPELINE_EVENT_DONE",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Persist one record. Returns `false` if the record was dropped.
    fn write_audit_event(&self, kind: AuditEventType, id: u64, digest: &str) -> bool;
}

/// Cheaply cloneable handle passed to loops, plugins and events.
///
/// A handle without a sink is the "auditing disabled" state; every write is
/// skipped and digest strings are never built.
#[derive(Clone, Default)]
pub struct Audit {
    sink: Option<Arc<dyn AuditSink>>,
}

impl Audit {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Write a record. No-op when auditing is disabled.
    pub fn write(&self, kind: AuditEventType, id: u64, digest: &str) -> bool {
        match &self.sink {
            Some(sink) => sink.write_audit_event(kind, id, digest),
            None => false,
        }
    }

    /// Write a record whose digest is only built when auditing is enabled.
    pub fn write_with<F>(&self, kind: AuditEventType, id: u64, digest: F) -> bool
    where
        F: FnOnce() -> String,
    {
        match &self.sink {
            Some(sink) => sink.write_audit_event(kind, id, &digest()),
            None => false,
        }
    }
}

impl fmt::Debug for Audit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Audit")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Digest builders. Field order is fixed by the external log parser.
pub mod digest {
    use super::DIGEST_SEPARATOR;

    /// `sender|handlerInfo|loopName|eventInfo`
    pub fn enqueue(sender: &str, handler_info: &str, loop_name: &str, event_info: &str) -> String {
        let mut out = String::with_capacity(
            sender.len() + handler_info.len() + loop_name.len() + event_info.len() + 3,
        );
        out.push_str(sender);
        out.push(DIGEST_SEPARATOR);
        out.push_str(handler_info);
        out.push(DIGEST_SEPARATOR);
        out.push_str(loop_name);
        out.push(DIGEST_SEPARATOR);
        out.push_str(event_info);
        out
    }

    /// `creatorInfo|eventInfo`
    pub fn pipeline_create(creator_info: &str, event_info: &str) -> String {
        format!("{creator_info}{DIGEST_SEPARATOR}{event_info}")
    }

    /// Identity of the calling thread.
    pub fn thread_id() -> String {
        format!("{:?}", std::thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_audit_skips_digest() {
        let audit = Audit::disabled();
        let mut built = false;
        let written = audit.write_with(AuditEventType::QueueEventIn, 1, || {
            built = true;
            String::new()
        });
        assert!(!written);
        assert!(!built);
    }

    #[test]
    fn test_enabled_audit_writes() {
        let sink = Arc::new(MemoryAuditSink::new(16));
        let audit = Audit::new(sink.clone());
        assert!(audit.is_enabled());
        assert!(audit.write(AuditEventType::PipelineEventDone, 7, "p1"));
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, AuditEventType::PipelineEventDone);
        assert_eq!(records[0].id, 7);
        assert_eq!(records[0].digest, "p1");
    }

    #[test]
    fn test_enqueue_digest_layout() {
        let d = digest::enqueue("src", "plugin", "loop", "ev");
        assert_eq!(d, "src|plugin|loop|ev");
        assert_eq!(d.split(DIGEST_SEPARATOR).count(), 4);
    }

    #[test]
    fn test_pipeline_create_digest() {
        assert_eq!(digest::pipeline_create("faultlog", "CRASH#3"), "faultlog|CRASH#3");
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(AuditEventType::QueueEventIn.to_string(), "QUEUE_EVENT_IN");
        assert_eq!(
            AuditEventType::PipelineEventHandleOut.as_str(),
            "PIPELINE_EVENT_HANDLE_OUT"
        );
    }
}
