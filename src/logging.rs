//! Diagnostic logging.
//!
//! Log lines go to stderr with a compact timestamp so they never mix with
//! the event stream the daemon prints on stdout.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"             # quiet by default
//!
//! [logging.modules]
//! "adaapd::listener" = "debug" # watch registration and teardown
//! ```
//!
//! `RUST_LOG` replaces the configured filter entirely:
//! ```bash
//! RUST_LOG=adaapd=trace adaapd watch ~/Music
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// HH:MM:SS.mmm in local time.
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directives for a config: the default level followed by module
/// overrides, sorted so the result is stable.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();

    let mut directives = config.default.clone();
    for (module, level) in modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    directives
}

/// Install the global subscriber. Only the first call has any effect.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Install the global subscriber at the default `warn` level.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log a notable event for a component at info level.
///
/// # Examples
/// ```ignore
/// log_event!("listener", "started", "{}", root.display());
/// log_event!("listener", "stopped");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Same as [`log_event!`] at debug level.
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert_eq!(filter_directives(&LoggingConfig::default()), "warn");

        let mut config = LoggingConfig {
            default: "info".to_string(),
            ..LoggingConfig::default()
        };
        config
            .modules
            .insert("adaapd::listener".to_string(), "trace".to_string());
        config.modules.insert("adaapd".to_string(), "debug".to_string());

        assert_eq!(
            filter_directives(&config),
            "info,adaapd=debug,adaapd::listener=trace"
        );
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init_with_config(&LoggingConfig {
            default: "trace".to_string(),
            ..LoggingConfig::default()
        });
        crate::log_event!("test", "logged", "{}", 1);
        crate::debug_event!("test", "logged");
    }
}
