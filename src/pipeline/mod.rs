//! Pipelined event dispatch.
//!
//! A [`Pipeline`] is an ordered chain of plugins. A pipeline event carries a
//! [`PipelineRoute`] with its own copy of the remaining chain and moves one
//! hop at a time:
//!
//! ```text
//! EventSource::publish_pipeline_event
//!   └─► Pipeline::process_event          snapshot chain into the event
//!         └─► Event::on_continue          pop next live plugin
//!               ├─► plugin loop: add_event(plugin, event)   (async hop)
//!               └─► plugin.on_event_proxy(event)            (inline hop)
//!                     └─► Event::on_continue / on_finish
//! ```
//!
//! Hops run strictly in chain order, at most one at a time. Processors whose
//! plugin has been unloaded are skipped.

pub mod chain;
pub mod route;

pub use chain::Pipeline;
pub use route::PipelineRoute;
