//! Engine configuration
//!
//! The engine reads a single file describing its loops, audit settings,
//! plugins and the pipelines built from them. Both TOML and JSON are
//! accepted; the format is chosen by file extension (`.json` for JSON,
//! anything else is parsed as TOML).
//!
//! # Default Location
//!
//! - **Linux**: `~/.config/hiview-engine/engine.toml`
//! - **macOS**: `~/Library/Application Support/hiview-engine/engine.toml`
//! - **Windows**: `%APPDATA%\hiview-engine\engine.toml`
//!
//! # Example
//!
//! ```toml
//! [event_loop]
//! max_watched_fds = 16
//!
//! [audit]
//! enabled = true
//! capacity = 4096
//! mirror_to_tracing = true
//!
//! [[plugins]]
//! name = "faultlogger"
//! version = "1.0"
//! work_loop = "faultlogger"
//!
//! [[pipelines]]
//! name = "fault"
//! processors = ["faultlogger"]
//!
//! [[sources]]
//! name = "kmsg"
//! pipelines = ["fault"]
//! ```

use crate::audit::{Audit, AuditSink, FanoutAuditSink, MemoryAuditSink, TracingAuditSink};
use crate::error::{EngineError, Result};
use crate::event_loop::DEFAULT_MAX_WATCHED_FDS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Application identifier for config directories
pub const APP_ID: &str = "hiview-engine";

/// Config filename
pub const CONFIG_FILE: &str = "engine.toml";

/// Default in-memory audit ring size
pub const DEFAULT_AUDIT_CAPACITY: usize = 4096;

/// Get the default configuration file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== Sections ====================

/// Per-loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum number of watched file descriptors per loop
    pub max_watched_fds: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_watched_fds: DEFAULT_MAX_WATCHED_FDS,
        }
    }
}

/// Audit settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Records kept in memory
    pub capacity: usize,
    /// Also emit every record through `tracing` (target `audit`)
    pub mirror_to_tracing: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: DEFAULT_AUDIT_CAPACITY,
            mirror_to_tracing: true,
        }
    }
}

impl AuditConfig {
    /// Build the audit handle. The in-memory sink is returned so callers
    /// can inspect records.
    pub fn build(&self) -> (Audit, Option<Arc<MemoryAuditSink>>) {
        if !self.enabled {
            return (Audit::disabled(), None);
        }
        let memory = Arc::new(MemoryAuditSink::new(self.capacity));
        let mut sinks: Vec<Arc<dyn AuditSink>> = vec![memory.clone()];
        if self.mirror_to_tracing {
            sinks.push(Arc::new(TracingAuditSink));
        }
        (Audit::new(Arc::new(FanoutAuditSink::new(sinks))), Some(memory))
    }
}

/// A plugin to load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Name of a dedicated loop; the plugin runs inline when absent
    #[serde(default)]
    pub work_loop: Option<String>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// A named pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub processors: Vec<String>,
}

/// An event source and the pipelines it feeds, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub pipelines: Vec<String>,
}

// ==================== Engine Config ====================

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub event_loop: LoopConfig,
    pub audit: AuditConfig,
    pub plugins: Vec<PluginConfig>,
    pub pipelines: Vec<PipelineConfig>,
    pub sources: Vec<SourceConfig>,
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

impl EngineConfig {
    /// Parse TOML content
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| EngineError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Parse JSON content
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| EngineError::Config(format!("Failed to parse JSON config: {}", e)))
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config = if is_json(path) {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load engine config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save to disk, format chosen by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            EngineError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check names are unique and every reference resolves
    pub fn validate(&self) -> Result<()> {
        let mut plugins = BTreeSet::new();
        for plugin in &self.plugins {
            if plugin.name.is_empty() {
                return Err(EngineError::Config("Plugin with empty name".to_string()));
            }
            if !plugins.insert(plugin.name.as_str()) {
                return Err(EngineError::Config(format!(
                    "Duplicate plugin '{}'",
                    plugin.name
                )));
            }
        }

        let mut pipelines = BTreeSet::new();
        for pipeline in &self.pipelines {
            if !pipelines.insert(pipeline.name.as_str()) {
                return Err(EngineError::Config(format!(
                    "Duplicate pipeline '{}'",
                    pipeline.name
                )));
            }
            if let Some(missing) = pipeline
                .processors
                .iter()
                .find(|p| !plugins.contains(p.as_str()))
            {
                return Err(EngineError::Config(format!(
                    "Pipeline '{}' references unknown plugin '{}'",
                    pipeline.name, missing
                )));
            }
        }

        for source in &self.sources {
            if let Some(missing) = source
                .pipelines
                .iter()
                .find(|p| !pipelines.contains(p.as_str()))
            {
                return Err(EngineError::Config(format!(
                    "Source '{}' references unknown pipeline '{}'",
                    source.name, missing
                )));
            }
        }

        Ok(())
    }

    /// Distinct loop names requested by plugins, in first-use order
    pub fn work_loop_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.plugins
            .iter()
            .filter_map(|p| p.work_loop.clone())
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }
}
