//! # hiview-engine: event loops and pipelined event dispatch
//!
//! The dispatch core of a diagnostics collector. Producers post events and
//! timers onto [`EventLoop`]s; [`Plugin`]s consume them, either directly or
//! as hops of a [`Pipeline`] that an [`EventSource`] publishes into.
//!
//! ## Architecture
//!
//! - **Event loops**: one priority-timer queue per loop, drained by a single
//!   thread, woken through `mio` and able to watch file descriptors
//! - **Plugins**: named handlers, optionally bound to their own loop
//! - **Pipelines**: ordered, weakly referenced plugin chains; events advance
//!   one hop at a time, crossing to each plugin's loop
//! - **Audit**: queueing and processing milestones written to an injected
//!   [`AuditSink`](audit::AuditSink)
//!
//! ## Example
//!
//! ```ignore
//! use hiview_engine::{Audit, Event, EventLoop, PluginRegistry};
//! use std::sync::Arc;
//!
//! let registry = PluginRegistry::new(Audit::disabled());
//! registry.register_plugin(my_plugin.clone())?;
//! registry.create_pipeline("fault", &["faultlogger"])?;
//! let source = registry.event_source("kmsg", &["fault"])?;
//!
//! let event = Event::builder("PANIC").pipeline(None, registry.audit().clone()).build();
//! source.publish_pipeline_event(event);
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod event_source;
pub mod pipeline;
pub mod plugin;

// Re-export commonly used types
pub use audit::{Audit, AuditEventType, AuditSink, MemoryAuditSink};
pub use config::EngineConfig;
pub use context::{HiviewContext, ListenerInfo, PluginRegistry};
pub use error::{EngineError, Result};
pub use event::{Event, EventBuilder, EventHandler, MessageType, SharedEvent};
pub use event_loop::{EventLoop, EventResult, Task};
pub use event_source::EventSource;
pub use pipeline::Pipeline;
pub use plugin::{Plugin, PluginCore, PluginExt, PluginRef, WeakPlugin};
