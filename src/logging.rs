use crate::config::TccConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Noisy dependencies capped below the configured level
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "sqlx::query=warn"];

/// Filter directive for `config`; `RUST_LOG` overrides it at init
fn log_filter(config: &TccConfig) -> String {
    std::iter::once(config.log_level.as_str())
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn init_logging(config: &TccConfig) -> WorkerGuard {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter(config)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        // xid / branch_id land at the top level so branch history is one query
        let file_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_quiets_dependencies() {
        let config = TccConfig {
            log_level: "debug".to_string(),
            ..TccConfig::default()
        };
        let filter = log_filter(&config);

        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("sqlx=warn"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }
}
