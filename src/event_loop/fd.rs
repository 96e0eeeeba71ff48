//! Watched file descriptors.
//!
//! Sources are registered with the loop's `mio` registry (epoll on Linux,
//! kqueue on BSD/macOS). Registration is edge-triggered: a callback must
//! drain its descriptor until it would block.

use mio::event::Event as MioEvent;
use mio::{Interest, Token};
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Default bound on watched descriptors per loop.
pub const DEFAULT_MAX_WATCHED_FDS: usize = 16;

/// Token reserved for the loop's own waker.
pub(crate) const WAKE_TOKEN: Token = Token(0);

/// Which readiness a source wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FdInterest {
    #[default]
    Readable,
    Writable,
    ReadWrite,
}

impl From<FdInterest> for Interest {
    fn from(value: FdInterest) -> Self {
        match value {
            FdInterest::Readable => Interest::READABLE,
            FdInterest::Writable => Interest::WRITABLE,
            FdInterest::ReadWrite => Interest::READABLE | Interest::WRITABLE,
        }
    }
}

/// Readiness reported to a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FdReadiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}

impl From<&MioEvent> for FdReadiness {
    fn from(ev: &MioEvent) -> Self {
        Self {
            readable: ev.is_readable(),
            writable: ev.is_writable(),
            error: ev.is_error(),
            hangup: ev.is_read_closed() || ev.is_write_closed(),
        }
    }
}

/// A descriptor-driven event source dispatched inline on the loop thread.
pub trait FileDescriptorEventCallback: Send + Sync {
    /// Descriptor to watch. Must stay open while registered.
    fn file_descriptor(&self) -> RawFd;

    fn interest(&self) -> FdInterest {
        FdInterest::Readable
    }

    /// Called on the loop thread when the descriptor becomes ready.
    fn on_file_descriptor_event(&self, fd: RawFd, readiness: FdReadiness) -> bool;
}

pub(crate) struct FdEntry {
    pub fd: RawFd,
    pub token: Token,
    pub interest: FdInterest,
    pub source: Arc<dyn FileDescriptorEventCallback>,
    pub registered: bool,
}

/// Name-keyed table of watched descriptors.
pub(crate) struct FdTable {
    entries: HashMap<String, FdEntry>,
    next_token: usize,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_token: WAKE_TOKEN.0 + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn contains_fd(&self, fd: RawFd) -> bool {
        self.entries.values().any(|e| e.fd == fd)
    }

    pub fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn insert(&mut self, name: String, entry: FdEntry) {
        self.entries.insert(name, entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<FdEntry> {
        self.entries.remove(name)
    }

    pub fn lookup(&self, token: Token) -> Option<(RawFd, Arc<dyn FileDescriptorEventCallback>)> {
        self.entries
            .values()
            .find(|e| e.token == token)
            .map(|e| (e.fd, Arc::clone(&e.source)))
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = (&String, &mut FdEntry)> {
        self.entries.iter_mut()
    }
}
