//! Logging setup with a reloadable filter.
//!
//! Applications embedding the queue usually install their own subscriber; this
//! module is for binaries and tools that want the queue's defaults.

use chrono::Local;
use tracing::info;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "upload_queue=info";

/// Timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle to the installed subscriber's filter.
pub struct LoggingConfig {
    handle: FilterHandle,
}

impl LoggingConfig {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Set a new filter directive, e.g. `"upload_queue=debug"`.
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let new_filter = parse_filter(directive)?;

        self.handle
            .reload(new_filter)
            .map_err(|e| Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| Error::config(format!("Invalid filter directive: {}", e)))
}

/// A filter layer and the config that controls it.
fn reloadable_filter(
    initial: EnvFilter,
) -> (reload::Layer<EnvFilter, tracing_subscriber::Registry>, LoggingConfig) {
    let (filter_layer, handle) = reload::Layer::new(initial);
    (filter_layer, LoggingConfig { handle })
}

/// Install a console subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`].
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> Result<LoggingConfig> {
    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, config) = reloadable_filter(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_timer(LocalTimer))
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("upload_queue=info"));
        assert!(parse_filter(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_set_filter_reloads() {
        let (filter_layer, config) = reloadable_filter(EnvFilter::new(DEFAULT_LOG_FILTER));
        let _subscriber = tracing_subscriber::registry().with(filter_layer);

        assert_eq!(config.get_filter().to_lowercase(), DEFAULT_LOG_FILTER);
        config.set_filter("upload_queue=debug").unwrap();
        assert_eq!(config.get_filter().to_lowercase(), "upload_queue=debug");

        // A bad directive keeps the current filter.
        assert!(config.set_filter("upload_queue=loud").is_err());
        assert_eq!(config.get_filter().to_lowercase(), "upload_queue=debug");
    }

    #[test]
    fn test_init_logging_once() {
        // Another test may already own the global subscriber.
        match init_logging() {
            Ok(config) => assert!(config.set_filter("upload_queue=trace").is_ok()),
            Err(e) => assert!(matches!(e, Error::Other(_))),
        }
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        assert!(matches!(
            parse_filter("upload_queue=loud"),
            Err(Error::Configuration(_))
        ));
    }
}
