//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; an application that wants them
//! printed calls [`init_logging`] once at startup.

use crate::config::LoggingConfig;

/// Build the filter directive: `RUST_LOG` wins over the configured level,
/// and an unparsable level falls back to `info`.
fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Install a global subscriber writing to stderr.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case nothing changes.
pub fn init_logging(logging_config: &LoggingConfig) -> bool {
    let json = logging_config.format == "json";
    let filter = env_filter(&logging_config.level);

    let base = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(base.json().finish())
    } else {
        Box::new(base.compact().finish())
    };

    tracing::subscriber::set_global_default(subscriber).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }

    #[test]
    fn test_bad_level_falls_back() {
        let config = LoggingConfig {
            level: "not a [directive".to_string(),
            format: "json".to_string(),
        };
        // Either this call installs the subscriber or an earlier test did
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
