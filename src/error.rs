//! Error handling for the hiview engine
//!
//! This module defines the crate error type and a Result alias. Public
//! dispatch entry points (`add_event`, `publish_pipeline_event`, ...) report
//! rejection through sentinel return values; these errors are used internally
//! and by the configuration layer.

use thiserror::Error;

/// Main error type for hiview engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// The event loop is shutting down or not running
    #[error("Event loop '{0}' is not accepting events")]
    LoopQuitting(String),

    /// Timer interval does not fit in the monotonic clock range
    #[error("Timer interval of {interval_ms}ms overflows the monotonic clock")]
    TimerOverflow { interval_ms: u64 },

    /// Errors related to watched file descriptors
    #[error("File descriptor error: {0}")]
    FileDescriptor(String),

    /// Errors related to pipeline lookup and routing
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Errors related to plugin registration
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for hiview engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| EngineError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| EngineError::Io(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::Pipeline("no such pipeline".to_string());
        assert_eq!(err.to_string(), "Pipeline error: no such pipeline");
    }

    #[test]
    fn test_error_with_context() {
        let err = EngineError::FileDescriptor("fd -1".to_string());
        let with_ctx = err.with_context("Failed to watch source");
        assert!(with_ctx.to_string().contains("Failed to watch source"));
        assert!(with_ctx.to_string().contains("fd -1"));
    }

    #[test]
    fn test_timer_overflow_message() {
        let err = EngineError::TimerOverflow {
            interval_ms: u64::MAX,
        };
        assert!(err.to_string().contains(&u64::MAX.to_string()));
    }

    #[test]
    fn test_io_context() {
        let io: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = io.context("Reading config").unwrap_err();
        assert!(err.to_string().starts_with("Reading config"));
    }
}
