//! hiview-engine - Main Entry Point
//!
//! Loads an engine configuration (path given as the first argument, else the
//! default config location, else a built-in demo), wires plugins, loops and
//! pipelines, publishes one event per source and shuts down once every event
//! has been recycled.

use anyhow::Context;
use crossbeam_channel::{unbounded, Receiver, Sender};
use hiview_engine::{
    config::{default_config_path, EngineConfig},
    Event, EventHandler, EventLoop, EngineError, Plugin, PluginCore, PluginRegistry, SharedEvent,
    WeakPlugin,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEMO_CONFIG: &str = r#"
[audit]
enabled = true
capacity = 256

[[plugins]]
name = "collector"

[[plugins]]
name = "analyzer"
work_loop = "analysis"

[[plugins]]
name = "reporter"
work_loop = "report"

[[pipelines]]
name = "fault"
processors = ["collector", "analyzer", "reporter"]

[[sources]]
name = "kmsg"
pipelines = ["fault"]
"#;

/// Logs every event it sees.
struct TracePlugin {
    core: PluginCore,
    handled: AtomicUsize,
}

impl Plugin for TracePlugin {
    fn core(&self) -> &PluginCore {
        &self.core
    }

    fn on_event(&self, event: &SharedEvent) -> bool {
        self.handled.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            plugin = self.name(),
            event = %event.event_info(),
            thread = ?std::thread::current().name(),
            "handled"
        );
        true
    }

    fn on_unload(&self) {
        tracing::debug!(
            "Plugin '{}' handled {} events",
            self.name(),
            self.handled.load(Ordering::Relaxed)
        );
    }
}

/// Signals every finished pipeline event.
struct Recycler {
    done: Sender<String>,
}

impl EventHandler for Recycler {
    fn recycle(&self, event: &Event) {
        let _ = self.done.send(event.event_info());
    }

    fn pause_dispatch(&self, plugin: WeakPlugin) {
        if let Some(plugin) = plugin.upgrade() {
            tracing::warn!("Plugin '{}' asked to pause dispatch", plugin.name());
        }
    }
}

fn load_config() -> anyhow::Result<EngineConfig> {
    if let Some(arg) = std::env::args().nth(1) {
        let path = PathBuf::from(arg);
        return EngineConfig::load(&path).with_context(|| format!("loading {:?}", path));
    }
    if let Some(path) = default_config_path().filter(|p| p.exists()) {
        tracing::info!("Using config from {:?}", path);
        return Ok(EngineConfig::load_or_default(path));
    }
    tracing::info!("No config file found, running built-in demo");
    let config = EngineConfig::from_toml_str(DEMO_CONFIG)?;
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hiview_engine=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting hiview engine");

    let config = load_config()?;
    let (audit, audit_records) = config.audit.build();

    // One loop per distinct name, plus the shared fallback loop
    let mut loops: BTreeMap<String, Arc<EventLoop>> = BTreeMap::new();
    for name in config.work_loop_names() {
        let work_loop = Arc::new(EventLoop::from_config(&name, &config.event_loop, audit.clone()));
        if !work_loop.start_loop(true) {
            return Err(EngineError::LoopQuitting(name).into());
        }
        loops.insert(name, work_loop);
    }
    let shared = Arc::new(EventLoop::from_config("shared", &config.event_loop, audit.clone()));
    if !shared.start_loop(true) {
        return Err(EngineError::LoopQuitting("shared".to_string()).into());
    }

    let registry = PluginRegistry::new(audit.clone());
    registry.set_shared_loop(Some(Arc::clone(&shared)));
    for plugin_config in &config.plugins {
        let plugin = Arc::new(TracePlugin {
            core: PluginCore::new(&plugin_config.name, &plugin_config.version),
            handled: AtomicUsize::new(0),
        });
        if let Some(loop_name) = &plugin_config.work_loop {
            plugin.core().bind_work_loop(loops.get(loop_name).cloned());
        }
        registry.register_plugin(plugin)?;
    }
    for pipeline in &config.pipelines {
        let names: Vec<&str> = pipeline.processors.iter().map(String::as_str).collect();
        registry.create_pipeline(&pipeline.name, &names)?;
    }

    let (done_tx, done_rx): (Sender<String>, Receiver<String>) = unbounded();
    let recycler: Arc<dyn EventHandler> = Arc::new(Recycler { done: done_tx });

    let mut published = 0usize;
    for source_config in &config.sources {
        let names: Vec<&str> = source_config.pipelines.iter().map(String::as_str).collect();
        let source = registry.event_source(&source_config.name, &names)?;
        let event = Event::builder("DEMO_FAULT")
            .domain("DEMO")
            .sender(source_config.name.clone())
            .event_id(published as u32 + 1)
            .value("SOURCE", source_config.name.clone())
            .pipeline(Some(Arc::downgrade(&recycler)), audit.clone())
            .build();
        if source.publish_pipeline_event(event) {
            published += 1;
        } else {
            tracing::warn!("Source '{}' found no pipeline for its event", source_config.name);
        }
    }

    for _ in 0..published {
        match done_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(info) => tracing::info!("Pipeline event {} finished", info),
            Err(_) => {
                tracing::warn!("Timed out waiting for pipeline events");
                break;
            }
        }
    }

    // Shutdown
    for name in registry.plugin_names() {
        registry.unload_plugin(&name);
    }
    for work_loop in loops.values() {
        work_loop.stop_loop();
    }
    shared.stop_loop();

    if let Some(records) = audit_records {
        tracing::info!("{} audit records", records.len());
        for record in records.records() {
            tracing::debug!(target: "audit", "{}", record.to_line());
        }
    }

    tracing::info!("hiview engine stopped");
    Ok(())
}
