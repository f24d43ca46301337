use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the configured log filter.
pub const LOG_ENV: &str = "FLEETWATCH_LOG";

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::try_new(default_level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Log to a daily-rotated file. The terminal belongs to the dashboard, so
/// nothing may be written to stdout/stderr while it runs.
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init_file_logging(log_dir: &Path, default_level: &str) -> Option<WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("log_dir_error: {e}");
        return None;
    }
    let appender = tracing_appender::rolling::daily(log_dir, "fleetwatch.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_filter(default_level))
        .with_writer(writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

/// Log to stderr for one-shot subcommands.
pub fn init_stderr_logging(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(default_level))
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_falls_back() {
        // Must not panic on garbage directives.
        let filter = build_filter("[[[");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn file_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");
        let _guard = init_file_logging(&log_dir, "debug");
        assert!(log_dir.is_dir());
    }
}
