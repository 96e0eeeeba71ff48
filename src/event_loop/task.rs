//! Scheduling records and result handles for the event loop.

use crate::event::SharedEvent;
use crate::event_loop::queue::Scheduled;
use crate::plugin::PluginRef;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::fmt;
use std::time::Duration;

/// A plain callable queued on a loop. `FnMut` so repeating timers can call
/// it more than once.
pub type Task = Box<dyn FnMut() + Send + 'static>;

/// Deferred computation whose result is delivered through an [`EventResult`].
pub type DeferredJob = Box<dyn FnOnce() -> bool + Send + 'static>;

/// What a [`LoopEvent`] does when it fires.
pub enum LoopTask {
    /// Run the callable.
    Plain(Task),
    /// Call `handler.on_event_proxy(event)`.
    Proxy,
    /// Run once and publish the result.
    Deferred {
        job: Option<DeferredJob>,
        result: Sender<bool>,
    },
}

impl fmt::Debug for LoopTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopTask::Plain(_) => f.write_str("Plain"),
            LoopTask::Proxy => f.write_str("Proxy"),
            LoopTask::Deferred { job, .. } => f
                .debug_struct("Deferred")
                .field("pending", &job.is_some())
                .finish(),
        }
    }
}

/// Internal scheduling record of an [`EventLoop`](super::EventLoop).
pub struct LoopEvent {
    pub seq: u64,
    pub create_time: u64,
    pub enqueue_time: u64,
    pub target_time: u64,
    /// Repeat interval in milliseconds, 0 for one-shot entries.
    pub interval_ms: u64,
    pub is_repeat: bool,
    pub event: Option<SharedEvent>,
    pub handler: Option<PluginRef>,
    pub task: LoopTask,
}

impl Scheduled for LoopEvent {
    fn target_time(&self) -> u64 {
        self.target_time
    }

    fn sequence(&self) -> u64 {
        self.seq
    }
}

impl fmt::Debug for LoopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopEvent")
            .field("seq", &self.seq)
            .field("target_time", &self.target_time)
            .field("interval_ms", &self.interval_ms)
            .field("is_repeat", &self.is_repeat)
            .field("task", &self.task)
            .finish()
    }
}

/// One-shot result of [`EventLoop::add_event_for_result`](super::EventLoop::add_event_for_result).
///
/// Resolves to `false` if the loop rejected the request or was stopped
/// before running it.
pub struct EventResult {
    rx: Receiver<bool>,
}

impl EventResult {
    pub(crate) fn channel() -> (Sender<bool>, Self) {
        let (tx, rx) = bounded(1);
        (tx, Self { rx })
    }

    /// A result that is already available.
    pub fn resolved(value: bool) -> Self {
        let (tx, result) = Self::channel();
        let _ = tx.send(value);
        result
    }

    /// Block until the result is available.
    pub fn wait(self) -> bool {
        self.rx.recv().unwrap_or(false)
    }

    /// Block for at most `timeout`. `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(false),
        }
    }

    /// Non-blocking poll. `None` if still pending.
    pub fn try_get(&self) -> Option<bool> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_result() {
        assert_eq!(EventResult::resolved(true).try_get(), Some(true));
        assert!(!EventResult::resolved(false).wait());
    }

    #[test]
    fn test_pending_then_sent() {
        let (tx, result) = EventResult::channel();
        assert_eq!(result.try_get(), None);
        assert_eq!(result.wait_timeout(Duration::from_millis(5)), None);
        tx.send(true).unwrap();
        assert!(result.wait());
    }

    #[test]
    fn test_dropped_sender_resolves_false() {
        let (tx, result) = EventResult::channel();
        drop(tx);
        assert_eq!(result.wait_timeout(Duration::from_millis(5)), Some(false));
    }
}
