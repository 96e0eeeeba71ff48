//! Built-in audit sinks.

use crate::audit::{AuditEventType, AuditSink, DIGEST_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One audit record as kept by [`MemoryAuditSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditEventType,
    pub id: u64,
    pub digest: String,
    /// Wall clock time the record was written.
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl AuditRecord {
    /// Render as `TYPE|id|timestamp|digest`.
    pub fn to_line(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.kind,
            self.id,
            self.recorded_at.timestamp_millis(),
            self.digest,
            sep = DIGEST_SEPARATOR
        )
    }
}

/// Bounded in-memory ring of audit records.
///
/// Oldest records are dropped once `capacity` is reached.
pub struct MemoryAuditSink {
    capacity: usize,
    records: Mutex<VecDeque<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::with_capacity(capacity.clamp(1, 1024))),
        }
    }

    /// Copy of all retained records, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Retained records of one kind, oldest first.
    pub fn records_of(&self, kind: AuditEventType) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }

    pub fn count_of(&self, kind: AuditEventType) -> usize {
        match self.records.lock() {
            Ok(guard) => guard.iter().filter(|r| r.kind == kind).count(),
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.records.lock() {
            guard.clear();
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn write_audit_event(&self, kind: AuditEventType, id: u64, digest: &str) -> bool {
        let Ok(mut guard) = self.records.lock() else {
            return false;
        };
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(AuditRecord {
            kind,
            id,
            digest: digest.to_string(),
            recorded_at: chrono::Utc::now(),
        });
        true
    }
}

/// Mirrors audit records into `tracing` under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write_audit_event(&self, kind: AuditEventType, id: u64, digest: &str) -> bool {
        tracing::debug!(target: "audit", kind = %kind, id, digest, "audit");
        true
    }
}

/// Fans one record out to several sinks.
pub struct FanoutAuditSink {
    sinks: Vec<std::sync::Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn write_audit_event(&self, kind: AuditEventType, id: u64, digest: &str) -> bool {
        let mut any = false;
        for sink in &self.sinks {
            any |= sink.write_audit_event(kind, id, digest);
        }
        any
    }
}
