//! Single-consumer event loop with timers and descriptor sources.
//!
//! Each [`EventLoop`] owns one [`PriorityEventQueue`] of [`LoopEvent`]s and a
//! `mio::Poll` used both as the wake primitive (through a `mio::Waker`) and
//! for watched file descriptors. The loop runs on a dedicated thread or
//! inline on the caller of [`EventLoop::start_loop`].
//!
//! # Dispatch
//!
//! ```text
//! loop {
//!     process every entry with target <= now     (ProcessQueuedEvent)
//!     wait for min(next target, wake, fd ready)  (poll)
//!     dispatch ready descriptors inline
//!     break if quitting
//! }
//! ```
//!
//! # Sequence ids
//!
//! `add_*` calls return the entry's enqueue timestamp (ns, monotonic) as a
//! sequence id. It is never 0; 0 means "rejected". The id stays the same
//! across repeats of a periodic timer, so [`EventLoop::remove_event`] can
//! stop one from inside its own callback.

pub mod queue;
pub mod task;

#[cfg(unix)]
pub mod fd;

pub use queue::{PriorityEventQueue, Scheduled};
pub use task::{DeferredJob, EventResult, LoopEvent, LoopTask, Task};

#[cfg(unix)]
pub use fd::{FdInterest, FdReadiness, FileDescriptorEventCallback, DEFAULT_MAX_WATCHED_FDS};

use crate::audit::{digest, Audit, AuditEventType};
use crate::clock;
use crate::config::LoopConfig;
use crate::error::{EngineError, Result, ResultExt};
use crate::event::SharedEvent;
use crate::plugin::{PluginExt, PluginRef};
use mio::{Events, Poll, Registry, Waker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

#[cfg(unix)]
use fd::{FdEntry, FdTable, WAKE_TOKEN};
#[cfg(unix)]
use mio::unix::SourceFd;
#[cfg(unix)]
use std::os::fd::RawFd;

#[cfg(not(unix))]
const WAKE_TOKEN: mio::Token = mio::Token(0);
#[cfg(not(unix))]
pub const DEFAULT_MAX_WATCHED_FDS: usize = 16;

/// Queue plus the bookkeeping `remove_event` needs to see.
struct QueueState {
    queue: PriorityEventQueue<LoopEvent>,
    /// Sequence of the entry currently executing.
    current: Option<u64>,
    /// Set by `remove_event` on the current entry to suppress its repeat.
    current_neutralized: bool,
}

/// State shared between the owning handle and the loop thread.
struct LoopShared {
    name: String,
    audit: Audit,
    max_watched_fds: usize,
    is_running: AtomicBool,
    need_quit: AtomicBool,
    state: Mutex<QueueState>,
    poll: Mutex<Option<Poll>>,
    waker: Mutex<Option<Arc<Waker>>>,
    registry: Mutex<Option<Registry>>,
    loop_thread: Mutex<Option<ThreadId>>,
    #[cfg(unix)]
    fds: Mutex<FdTable>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking task must not wedge every later caller.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A priority-timer-ordered task queue drained by a single thread.
pub struct EventLoop {
    shared: Arc<LoopShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_audit(name, Audit::disabled())
    }

    pub fn with_audit(name: impl Into<String>, audit: Audit) -> Self {
        Self::build(name.into(), audit, DEFAULT_MAX_WATCHED_FDS)
    }

    pub fn from_config(name: impl Into<String>, config: &LoopConfig, audit: Audit) -> Self {
        Self::build(name.into(), audit, config.max_watched_fds)
    }

    fn build(name: String, audit: Audit, max_watched_fds: usize) -> Self {
        Self {
            shared: Arc::new(LoopShared {
                name,
                audit,
                max_watched_fds,
                is_running: AtomicBool::new(false),
                need_quit: AtomicBool::new(false),
                state: Mutex::new(QueueState {
                    queue: PriorityEventQueue::new(),
                    current: None,
                    current_neutralized: false,
                }),
                poll: Mutex::new(None),
                waker: Mutex::new(None),
                registry: Mutex::new(None),
                loop_thread: Mutex::new(None),
                #[cfg(unix)]
                fds: Mutex::new(FdTable::new()),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running.load(Ordering::Acquire)
    }

    /// Whether `stop_loop` has been requested.
    pub fn is_quitting(&self) -> bool {
        self.shared.need_quit.load(Ordering::SeqCst)
    }

    /// Number of entries waiting in the queue.
    pub fn pending_len(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    /// Whether the caller is running on this loop's dispatch thread.
    pub fn is_in_loop_thread(&self) -> bool {
        *lock(&self.shared.loop_thread) == Some(std::thread::current().id())
    }

    // ==================== Lifecycle ====================

    /// Start dispatching. Idempotent while running.
    ///
    /// With `create_new_thread` the loop runs on a dedicated thread named
    /// after the loop and this returns immediately; otherwise the caller's
    /// thread runs the loop until [`stop_loop`](Self::stop_loop).
    pub fn start_loop(&self, create_new_thread: bool) -> bool {
        let mut thread = lock(&self.thread);
        if self.is_quitting() {
            tracing::warn!("Event loop '{}' was stopped and cannot restart", self.name());
            return false;
        }
        if self.is_running() {
            return true;
        }

        if let Err(e) = self.shared.init_wake_mechanism() {
            tracing::error!("Event loop '{}' failed to initialize: {}", self.name(), e);
            return false;
        }

        {
            let _state = lock(&self.shared.state);
            self.shared.is_running.store(true, Ordering::Release);
        }

        if create_new_thread {
            let shared = Arc::clone(&self.shared);
            let spawned = std::thread::Builder::new()
                .name(self.shared.name.clone())
                .spawn(move || shared.run());
            match spawned {
                Ok(handle) => {
                    *thread = Some(handle);
                    true
                }
                Err(e) => {
                    tracing::error!("Failed to spawn thread for '{}': {}", self.name(), e);
                    self.shared.is_running.store(false, Ordering::Release);
                    false
                }
            }
        } else {
            drop(thread);
            self.shared.run();
            true
        }
    }

    /// Stop dispatching, drop pending entries and join the loop thread.
    ///
    /// Safe from any thread. Called from the loop's own thread it does not
    /// join; the loop exits once the current callback returns.
    pub fn stop_loop(&self) {
        self.shared.need_quit.store(true, Ordering::SeqCst);

        let drained = {
            let mut state = lock(&self.shared.state);
            let drained = state.queue.drain();
            self.shared.is_running.store(false, Ordering::Release);
            drained
        };
        if !drained.is_empty() {
            tracing::debug!(
                "Event loop '{}' dropped {} pending entries",
                self.name(),
                drained.len()
            );
        }
        drop(drained);

        self.shared.wake();

        let handle = lock(&self.thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                tracing::debug!("Event loop '{}' stopped from its own thread", self.name());
            } else if handle.join().is_err() {
                tracing::error!("Event loop '{}' thread panicked", self.name());
            }
        }
    }

    // ==================== Posting ====================

    /// Queue `task` (or `handler.on_event_proxy(event)` when `task` is
    /// `None`) to run as soon as possible. Returns the sequence id, or 0 if
    /// the loop is quitting.
    pub fn add_event(
        &self,
        handler: Option<PluginRef>,
        event: Option<SharedEvent>,
        task: Option<Task>,
    ) -> u64 {
        if self.is_quitting() {
            return 0;
        }

        let now = clock::monotonic_nanos();
        let seq = clock::next_sequence();
        self.shared.audit_enqueue(handler.as_ref(), event.as_ref());

        let entry = LoopEvent {
            seq,
            create_time: event.as_ref().map(|e| e.create_time()).unwrap_or(seq),
            enqueue_time: now,
            target_time: now,
            interval_ms: 0,
            is_repeat: false,
            event,
            handler,
            task: task.map(LoopTask::Plain).unwrap_or(LoopTask::Proxy),
        };

        if !self.shared.enqueue(entry) {
            return 0;
        }
        self.shared.wake();
        tracing::trace!("Queued event {} on '{}'", seq, self.name());
        seq
    }

    /// Queue `handler.on_event_proxy(event)` and return a handle to its
    /// result. Resolves to `false` immediately when the loop is quitting or
    /// either argument is missing.
    pub fn add_event_for_result(
        &self,
        handler: Option<PluginRef>,
        event: Option<SharedEvent>,
    ) -> EventResult {
        let (Some(handler), Some(event)) = (handler, event) else {
            tracing::warn!("add_event_for_result on '{}' without handler or event", self.name());
            return EventResult::resolved(false);
        };
        if self.is_quitting() {
            return EventResult::resolved(false);
        }

        let now = clock::monotonic_nanos();
        let seq = clock::next_sequence();
        self.shared.audit_enqueue(Some(&handler), Some(&event));

        let (tx, result) = EventResult::channel();
        let job_handler = Arc::clone(&handler);
        let job_event = Arc::clone(&event);
        let job: DeferredJob = Box::new(move || job_handler.on_event_proxy(job_event));

        let entry = LoopEvent {
            seq,
            create_time: event.create_time(),
            enqueue_time: now,
            target_time: now,
            interval_ms: 0,
            is_repeat: false,
            event: Some(event),
            handler: Some(handler),
            task: LoopTask::Deferred {
                job: Some(job),
                result: tx,
            },
        };

        if !self.shared.enqueue(entry) {
            return EventResult::resolved(false);
        }
        self.shared.wake();
        result
    }

    /// Queue a timer firing `interval_ms` from now, repeating every
    /// `interval_ms` when `repeat` is set. Returns the sequence id, or 0 if
    /// the loop is quitting or the deadline overflows the clock.
    pub fn add_timer_event(
        &self,
        handler: Option<PluginRef>,
        event: Option<SharedEvent>,
        task: Option<Task>,
        interval_ms: u64,
        repeat: bool,
    ) -> u64 {
        if self.is_quitting() {
            return 0;
        }

        let now = clock::monotonic_nanos();
        let target = match clock::deadline_after(now, interval_ms) {
            Some(target) => target,
            None => {
                tracing::warn!(
                    "{} on '{}'",
                    EngineError::TimerOverflow { interval_ms },
                    self.name()
                );
                return 0;
            }
        };

        let seq = clock::next_sequence();
        self.shared.audit_enqueue(handler.as_ref(), event.as_ref());

        let entry = LoopEvent {
            seq,
            create_time: event.as_ref().map(|e| e.create_time()).unwrap_or(seq),
            enqueue_time: now,
            target_time: target,
            interval_ms,
            is_repeat: repeat,
            event,
            handler,
            task: task.map(LoopTask::Plain).unwrap_or(LoopTask::Proxy),
        };

        let rewake = {
            let mut state = lock(&self.shared.state);
            if self.is_quitting() {
                return 0;
            }
            let previous = state.queue.peek_target();
            state.queue.push(entry);
            previous.map_or(true, |earliest| target < earliest)
        };
        if rewake {
            self.shared.wake();
        }
        tracing::trace!(
            "Queued timer {} on '{}' in {}ms (repeat: {})",
            seq,
            self.name(),
            interval_ms,
            repeat
        );
        seq
    }

    /// Cancel a pending entry.
    ///
    /// Returns `true` if it was removed before running. For the entry that
    /// is executing right now, returns `false` but prevents it from being
    /// rescheduled.
    pub fn remove_event(&self, seq: u64) -> bool {
        if seq == 0 {
            return false;
        }
        let mut state = lock(&self.shared.state);
        if state.current == Some(seq) {
            state.current_neutralized = true;
            return false;
        }
        state.queue.remove(seq)
    }

    // ==================== Descriptor sources ====================

    /// Watch `source`'s descriptor under `name`.
    ///
    /// Rejects duplicate names or descriptors, negative descriptors, and
    /// registrations beyond the loop's descriptor limit.
    #[cfg(unix)]
    pub fn add_file_descriptor_event_callback(
        &self,
        name: impl Into<String>,
        source: Arc<dyn FileDescriptorEventCallback>,
    ) -> bool {
        let name = name.into();
        match self.shared.add_fd_source(name.clone(), source) {
            Ok(()) => {
                tracing::debug!("Watching fd source '{}' on '{}'", name, self.name());
                true
            }
            Err(e) => {
                tracing::warn!("Rejected fd source '{}' on '{}': {}", name, self.name(), e);
                false
            }
        }
    }

    /// Stop watching the source registered under `name`.
    #[cfg(unix)]
    pub fn remove_file_descriptor_event_callback(&self, name: &str) -> bool {
        let Some(entry) = lock(&self.shared.fds).remove(name) else {
            return false;
        };
        if entry.registered {
            if let Some(registry) = lock(&self.shared.registry).as_ref() {
                if let Err(e) = registry.deregister(&mut SourceFd(&entry.fd)) {
                    tracing::debug!("Deregistering fd {} failed: {}", entry.fd, e);
                }
            }
        }
        true
    }

    #[cfg(unix)]
    pub fn watched_fd_count(&self) -> usize {
        lock(&self.shared.fds).len()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop_loop();
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .field("quitting", &self.is_quitting())
            .finish()
    }
}

impl LoopShared {
    fn is_quitting(&self) -> bool {
        self.need_quit.load(Ordering::SeqCst)
    }

    fn init_wake_mechanism(&self) -> Result<()> {
        let poll = Poll::new().context("Creating poll instance")?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN).context("Creating waker")?;
        let registry = poll
            .registry()
            .try_clone()
            .context("Cloning poll registry")?;

        *lock(&self.poll) = Some(poll);
        *lock(&self.waker) = Some(Arc::new(waker));

        // Registry is published under the fds lock; add_fd_source depends on it.
        #[cfg(unix)]
        {
            let mut fds = lock(&self.fds);
            for (name, entry) in fds.entries_mut() {
                if entry.registered {
                    continue;
                }
                match registry.register(
                    &mut SourceFd(&entry.fd),
                    entry.token,
                    entry.interest.into(),
                ) {
                    Ok(()) => entry.registered = true,
                    Err(e) => tracing::warn!("Failed to watch fd source '{}': {}", name, e),
                }
            }
            *lock(&self.registry) = Some(registry);
        }
        #[cfg(not(unix))]
        {
            *lock(&self.registry) = Some(registry);
        }
        Ok(())
    }

    fn wake(&self) {
        let waker = lock(&self.waker).clone();
        if let Some(waker) = waker {
            if let Err(e) = waker.wake() {
                tracing::warn!("Failed to wake event loop '{}': {}", self.name, e);
            }
        }
    }

    fn enqueue(&self, entry: LoopEvent) -> bool {
        let mut state = lock(&self.state);
        if self.is_quitting() {
            return false;
        }
        state.queue.push(entry);
        true
    }

    fn audit_enqueue(&self, handler: Option<&PluginRef>, event: Option<&SharedEvent>) {
        let Some(event) = event else {
            return;
        };
        if event.is_pipeline() || !self.audit.is_enabled() {
            return;
        }
        self.audit
            .write_with(AuditEventType::QueueEventIn, event.create_time(), || {
                let handler_info = handler.map(|h| h.handle_info()).unwrap_or_default();
                digest::enqueue(event.sender(), &handler_info, &self.name, &event.event_info())
            });
    }

    fn run(&self) {
        *lock(&self.loop_thread) = Some(std::thread::current().id());

        let Some(mut poll) = lock(&self.poll).take() else {
            tracing::error!("Event loop '{}' has no poll instance", self.name);
            self.is_running.store(false, Ordering::Release);
            return;
        };
        let mut events = Events::with_capacity(self.max_watched_fds + 1);
        tracing::info!("Event loop '{}' started", self.name);

        loop {
            if self.is_quitting() {
                break;
            }
            let timeout = self.process_queued_events();
            if self.is_quitting() {
                break;
            }

            if let Err(e) = poll.poll(&mut events, timeout) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!("Event loop '{}' poll failed: {}", self.name, e);
                break;
            }

            #[cfg(unix)]
            for ev in events.iter() {
                if ev.token() == WAKE_TOKEN {
                    continue;
                }
                self.dispatch_fd_event(ev.token(), FdReadiness::from(ev));
            }
        }

        self.is_running.store(false, Ordering::Release);
        *lock(&self.loop_thread) = None;
        tracing::info!("Event loop '{}' exiting", self.name);
    }

    /// Run every due entry. Returns how long the loop may sleep before the
    /// next one is due, `None` when the queue is empty.
    fn process_queued_events(&self) -> Option<Duration> {
        loop {
            let mut entry = {
                let mut state = lock(&self.state);
                if self.is_quitting() {
                    return None;
                }
                let now = clock::monotonic_nanos();
                let Some(entry) = state.queue.pop_due(now) else {
                    return state.queue.peek_target().map(|target| clock::until(now, target));
                };
                state.current = Some(entry.seq);
                state.current_neutralized = false;
                entry
            };

            self.process_event(&mut entry);

            let repeat = entry.is_repeat && entry.interval_ms > 0 && !self.is_quitting();
            let neutralized = lock(&self.state).current_neutralized;
            if !repeat || neutralized {
                Self::clear_current(&mut lock(&self.state));
                continue;
            }

            // Next target counts from completion, not from the previous target.
            let now = clock::monotonic_nanos();
            let Some(target) = clock::deadline_after(now, entry.interval_ms) else {
                tracing::warn!("Dropping repeat timer {}: deadline overflow", entry.seq);
                Self::clear_current(&mut lock(&self.state));
                continue;
            };
            entry.enqueue_time = now;
            entry.target_time = target;
            if let Some(event) = &entry.event {
                event.reset_timestamp();
                entry.create_time = event.create_time();
            }
            let handler = entry.handler.clone();
            let event = entry.event.clone();

            // Stays current until pushed; a remove_event in between still neutralizes it.
            let reinserted = {
                let mut state = lock(&self.state);
                let neutralized = state.current_neutralized;
                Self::clear_current(&mut state);
                let reinserted = !neutralized && !self.is_quitting();
                if reinserted {
                    state.queue.push(entry);
                }
                reinserted
            };
            if reinserted {
                self.audit_enqueue(handler.as_ref(), event.as_ref());
            }
        }
    }

    fn clear_current(state: &mut QueueState) {
        state.current = None;
        state.current_neutralized = false;
    }

    fn process_event(&self, entry: &mut LoopEvent) {
        match &mut entry.task {
            LoopTask::Plain(task) => task(),
            LoopTask::Proxy => match (&entry.handler, &entry.event) {
                (Some(handler), Some(event)) => {
                    handler.on_event_proxy(Arc::clone(event));
                }
                _ => tracing::warn!(
                    "Event {} on '{}' has neither task nor handler/event",
                    entry.seq,
                    self.name
                ),
            },
            LoopTask::Deferred { job, result } => match job.take() {
                Some(job) => {
                    let value = job();
                    let _ = result.send(value);
                }
                None => tracing::warn!("Deferred event {} already consumed", entry.seq),
            },
        }
    }

    #[cfg(unix)]
    fn add_fd_source(
        &self,
        name: String,
        source: Arc<dyn FileDescriptorEventCallback>,
    ) -> Result<()> {
        let fd: RawFd = source.file_descriptor();
        if fd < 0 {
            return Err(EngineError::FileDescriptor(format!("invalid descriptor {fd}")));
        }

        let mut fds = lock(&self.fds);
        if fds.contains_name(&name) {
            return Err(EngineError::FileDescriptor(format!("'{name}' already registered")));
        }
        if fds.contains_fd(fd) {
            return Err(EngineError::FileDescriptor(format!("descriptor {fd} already watched")));
        }
        if fds.len() >= self.max_watched_fds {
            return Err(EngineError::FileDescriptor(format!(
                "limit of {} watched descriptors reached",
                self.max_watched_fds
            )));
        }

        let token = fds.allocate_token();
        let interest = source.interest();
        let mut registered = false;
        if let Some(registry) = lock(&self.registry).as_ref() {
            registry
                .register(&mut SourceFd(&fd), token, interest.into())
                .with_context(|| format!("Registering descriptor {fd}"))?;
            registered = true;
        }

        fds.insert(
            name,
            FdEntry {
                fd,
                token,
                interest,
                source,
                registered,
            },
        );
        Ok(())
    }

    #[cfg(unix)]
    fn dispatch_fd_event(&self, token: mio::Token, readiness: FdReadiness) {
        let target = lock(&self.fds).lookup(token);
        match target {
            Some((fd, source)) => {
                source.on_file_descriptor_event(fd, readiness);
            }
            None => tracing::trace!("Readiness for unknown token {:?}", token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditSink, MemoryAuditSink};
    use crate::event::Event;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_inline_queue_processing_runs_due_entries() {
        let lp = EventLoop::new("inline");
        let counter = Arc::new(AtomicUsize::new(0));
        assert_ne!(lp.add_event(None, None, Some(counter_task(&counter))), 0);
        assert_ne!(lp.add_event(None, None, Some(counter_task(&counter))), 0);
        assert_eq!(lp.pending_len(), 2);

        assert_eq!(lp.shared.process_queued_events(), None);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(lp.pending_len(), 0);
    }

    #[test]
    fn test_future_timer_reports_wait_time() {
        let lp = EventLoop::new("timer");
        let counter = Arc::new(AtomicUsize::new(0));
        lp.add_timer_event(None, None, Some(counter_task(&counter)), 10_000, false);
        let wait = lp.shared.process_queued_events().unwrap();
        assert!(wait > Duration::from_secs(9));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejects_after_stop() {
        let lp = EventLoop::new("stopped");
        lp.stop_loop();
        assert_eq!(lp.add_event(None, None, Some(Box::new(|| {}))), 0);
        assert_eq!(lp.add_timer_event(None, None, Some(Box::new(|| {})), 1, true), 0);
        assert_eq!(lp.pending_len(), 0);
        assert!(!lp.start_loop(true));
    }

    #[test]
    fn test_timer_overflow_rejected() {
        let lp = EventLoop::new("overflow");
        assert_eq!(
            lp.add_timer_event(None, None, Some(Box::new(|| {})), u64::MAX, false),
            0
        );
        assert_eq!(lp.pending_len(), 0);
    }

    #[test]
    fn test_remove_pending_and_absent() {
        let lp = EventLoop::new("remove");
        let seq = lp.add_timer_event(None, None, Some(Box::new(|| {})), 60_000, false);
        assert!(lp.remove_event(seq));
        assert!(!lp.remove_event(seq));
        assert!(!lp.remove_event(0));
        assert_eq!(lp.pending_len(), 0);
    }

    #[test]
    fn test_remove_current_suppresses_repeat() {
        let lp = Arc::new(EventLoop::new("self-cancel"));
        let seq_cell = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let removed = Arc::new(AtomicBool::new(true));
        let runs = Arc::new(AtomicUsize::new(0));

        let task: Task = {
            let lp = Arc::downgrade(&lp);
            let seq_cell = Arc::clone(&seq_cell);
            let removed = Arc::clone(&removed);
            let runs = Arc::clone(&runs);
            Box::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                if let Some(lp) = lp.upgrade() {
                    let seq = seq_cell.load(Ordering::SeqCst);
                    removed.store(lp.remove_event(seq), Ordering::SeqCst);
                }
            })
        };
        let seq = lp.add_timer_event(None, None, Some(task), 1, true);
        seq_cell.store(seq, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));

        lp.shared.process_queued_events();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!removed.load(Ordering::SeqCst));
        assert_eq!(lp.pending_len(), 0);
    }

    #[test]
    fn test_repeat_reinserts_from_completion_time() {
        let lp = EventLoop::new("repeat");
        let counter = Arc::new(AtomicUsize::new(0));
        let seq = lp.add_timer_event(None, None, Some(counter_task(&counter)), 1, true);
        std::thread::sleep(Duration::from_millis(3));

        let before = clock::monotonic_nanos();
        lp.shared.process_queued_events();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let state = lock(&lp.shared.state);
        let next = state.queue.peek().expect("repeat entry reinserted");
        assert_eq!(next.seq, seq);
        assert!(next.target_time >= before + 1_000_000);
    }

    /// Cancels the watched entry as soon as its second enqueue record lands.
    #[derive(Default)]
    struct CancelOnRequeue {
        work_loop: std::sync::OnceLock<std::sync::Weak<EventLoop>>,
        seq: std::sync::atomic::AtomicU64,
        writes: AtomicUsize,
        removed: AtomicBool,
    }

    impl AuditSink for CancelOnRequeue {
        fn write_audit_event(&self, kind: AuditEventType, _id: u64, _digest: &str) -> bool {
            let requeued = matches!(kind, AuditEventType::QueueEventIn)
                && self.writes.fetch_add(1, Ordering::SeqCst) == 1;
            if requeued {
                if let Some(lp) = self.work_loop.get().and_then(std::sync::Weak::upgrade) {
                    let seq = self.seq.load(Ordering::SeqCst);
                    self.removed.store(lp.remove_event(seq), Ordering::SeqCst);
                }
            }
            true
        }
    }

    #[test]
    fn test_repeat_audited_only_once_reinserted() {
        let sink = Arc::new(CancelOnRequeue::default());
        let lp = Arc::new(EventLoop::with_audit("requeue", Audit::new(sink.clone())));
        let _ = sink.work_loop.set(Arc::downgrade(&lp));

        let counter = Arc::new(AtomicUsize::new(0));
        let ev = Event::builder("TICK").sender("timer").build();
        let seq = lp.add_timer_event(None, Some(ev), Some(counter_task(&counter)), 1, true);
        sink.seq.store(seq, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(3));

        lp.shared.process_queued_events();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 2);
        // The second record was written after the entry was back in the queue.
        assert!(sink.removed.load(Ordering::SeqCst));
        assert_eq!(lp.pending_len(), 0);
    }

    #[test]
    fn test_missing_handler_is_skipped() {
        let lp = EventLoop::new("skip");
        assert_ne!(lp.add_event(None, Some(Event::new("orphan")), None), 0);
        assert_eq!(lp.shared.process_queued_events(), None);
        assert_eq!(lp.pending_len(), 0);
    }

    #[test]
    fn test_result_rejected_without_handler() {
        let lp = EventLoop::new("result");
        let result = lp.add_event_for_result(None, Some(Event::new("x")));
        assert_eq!(result.try_get(), Some(false));
        assert_eq!(lp.pending_len(), 0);
    }

    #[test]
    fn test_enqueue_audit_digest() {
        let sink = Arc::new(MemoryAuditSink::new(8));
        let lp = EventLoop::with_audit("audited", Audit::new(sink.clone()));
        let ev = Event::builder("BOOT").sender("init").event_id(1).build();
        lp.add_event(None, Some(Arc::clone(&ev)), Some(Box::new(|| {})));

        let records = sink.records_of(AuditEventType::QueueEventIn);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, ev.create_time());
        assert_eq!(records[0].digest, "init||audited|BOOT#1");
    }

    #[test]
    fn test_pipeline_events_not_queue_audited() {
        let sink = Arc::new(MemoryAuditSink::new(8));
        let audit = Audit::new(sink.clone());
        let lp = EventLoop::with_audit("audited", audit.clone());
        let ev = Event::builder("P").pipeline(None, audit).build();
        lp.add_event(None, Some(ev), Some(Box::new(|| {})));
        assert!(sink.is_empty());
    }
}
