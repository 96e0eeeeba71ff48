//! Mock construction helpers

use crossbeam_channel::{unbounded, Receiver, Sender};
use hiview_engine::event_loop::{FdReadiness, FileDescriptorEventCallback};
use hiview_engine::{Event, EventHandler, Plugin, PluginCore, PluginExt, PluginRef, SharedEvent, WeakPlugin};
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::ThreadId;

mockall::mock! {
    pub Handler {}

    impl EventHandler for Handler {
        fn recycle(&self, event: &Event);
        fn pause_dispatch(&self, plugin: WeakPlugin);
    }
}

/// Shared, ordered log of `plugin:event` entries.
pub type OrderLog = Arc<Mutex<Vec<String>>>;

pub fn order_log() -> OrderLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &OrderLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// What a [`RecordingPlugin`] does with the events it receives.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Only heads pipelines for events with this name.
    pub accepts: Option<String>,
    /// Report saturation through `can_process_more_events`.
    pub saturated: bool,
    /// Park the first pipeline event for this many ms before handling it.
    pub delay_first_ms: Option<u64>,
    /// Advance the pipeline explicitly from `on_event`.
    pub forward_itself: bool,
    /// Value returned from `on_event`.
    pub result: bool,
}

/// A plugin that records every call.
pub struct RecordingPlugin {
    core: PluginCore,
    self_ref: Weak<RecordingPlugin>,
    log: OrderLog,
    behavior: Behavior,
    threads: Mutex<Vec<ThreadId>>,
    thread_names: Mutex<Vec<Option<String>>>,
    calls: AtomicUsize,
    delayed: AtomicBool,
}

impl RecordingPlugin {
    pub fn new(name: &str, log: OrderLog, behavior: Behavior) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            core: PluginCore::new(name, "1.0"),
            self_ref: self_ref.clone(),
            log,
            behavior,
            threads: Mutex::new(Vec::new()),
            thread_names: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delayed: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().unwrap().clone()
    }

    pub fn thread_names(&self) -> Vec<Option<String>> {
        self.thread_names.lock().unwrap().clone()
    }

    fn handle(&self) -> Option<PluginRef> {
        self.self_ref.upgrade().map(|p| p as PluginRef)
    }
}

impl Plugin for RecordingPlugin {
    fn core(&self) -> &PluginCore {
        &self.core
    }

    fn on_event(&self, event: &SharedEvent) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = std::thread::current();
        self.threads.lock().unwrap().push(current.id());
        self.thread_names
            .lock()
            .unwrap()
            .push(current.name().map(str::to_string));
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name(), event.name()));

        if let Some(delay) = self.behavior.delay_first_ms {
            if event.is_pipeline() && !self.delayed.swap(true, Ordering::SeqCst) {
                if let Some(me) = self.handle() {
                    me.delay_process_event(Arc::clone(event), delay);
                }
                return self.behavior.result;
            }
        }

        if self.behavior.forward_itself && event.is_pipeline() {
            event.on_continue();
        }
        self.behavior.result
    }

    fn can_process_event(&self, event: &SharedEvent) -> bool {
        match &self.behavior.accepts {
            Some(name) => event.name() == name,
            None => true,
        }
    }

    fn can_process_more_events(&self) -> bool {
        !self.behavior.saturated
    }
}

/// Counts recycled events and reports each one on a channel.
pub struct ChannelHandler {
    recycled: AtomicUsize,
    paused: AtomicUsize,
    tx: Sender<String>,
}

impl ChannelHandler {
    pub fn new() -> (Arc<Self>, Receiver<String>) {
        let (tx, rx) = unbounded();
        (
            Arc::new(Self {
                recycled: AtomicUsize::new(0),
                paused: AtomicUsize::new(0),
                tx,
            }),
            rx,
        )
    }

    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::SeqCst)
    }

    pub fn paused(&self) -> usize {
        self.paused.load(Ordering::SeqCst)
    }
}

impl EventHandler for ChannelHandler {
    fn recycle(&self, event: &Event) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(event.name().to_string());
    }

    fn pause_dispatch(&self, _plugin: WeakPlugin) {
        self.paused.fetch_add(1, Ordering::SeqCst);
    }
}

/// Read end of a socket pair; reports readiness and drained bytes.
pub struct SocketSource {
    stream: UnixStream,
    tx: Sender<(RawFd, FdReadiness, Vec<u8>)>,
}

impl SocketSource {
    /// Returns the source, the write end, and the notification channel.
    pub fn pair() -> (Arc<Self>, UnixStream, Receiver<(RawFd, FdReadiness, Vec<u8>)>) {
        let (reader, writer) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        let (tx, rx) = unbounded();
        (Arc::new(Self { stream: reader, tx }), writer, rx)
    }
}

impl FileDescriptorEventCallback for SocketSource {
    fn file_descriptor(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn on_file_descriptor_event(&self, fd: RawFd, readiness: FdReadiness) -> bool {
        let mut data = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match (&self.stream).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
        let _ = self.tx.send((fd, readiness, data));
        true
    }
}

/// A descriptor callback reporting a fixed descriptor; never dispatched.
pub struct FixedFd(pub RawFd);

impl FileDescriptorEventCallback for FixedFd {
    fn file_descriptor(&self) -> RawFd {
        self.0
    }

    fn on_file_descriptor_event(&self, _fd: RawFd, _readiness: FdReadiness) -> bool {
        true
    }
}
