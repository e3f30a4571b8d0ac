use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "techguro.log";
const DEFAULT_LOG_DIR: &str = "./logs";

/// Keeps the non-blocking file writer flushing until the process exits.
/// Dropping it early loses buffered log lines.
pub struct LogGuard {
    _file: WorkerGuard,
}

/// Stdout logging always; daily-rotated file logging when opted in via
/// `ENABLE_FILE_LOGS` (directory overridable with `LOG_DIR`).
pub fn init_tracing(log_level: &str) -> Option<LogGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let Some(log_dir) = file_log_dir() else {
        registry.init();
        return None;
    };

    match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
                .init();
            Some(LogGuard { _file: guard })
        }
        Err(err) => {
            eprintln!("cannot create log directory {log_dir}: {err}");
            registry.init();
            None
        }
    }
}

fn file_log_dir() -> Option<String> {
    if !parse_switch(std::env::var("ENABLE_FILE_LOGS").ok().as_deref()) {
        return None;
    }
    Some(std::env::var("LOG_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string()))
}

fn parse_switch(value: Option<&str>) -> bool {
    match value {
        Some(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_accepts_common_truthy_values() {
        assert!(parse_switch(Some("1")));
        assert!(parse_switch(Some("true")));
        assert!(parse_switch(Some(" YES ")));
        assert!(parse_switch(Some("on")));
    }

    #[test]
    fn switch_defaults_off() {
        assert!(!parse_switch(None));
        assert!(!parse_switch(Some("")));
        assert!(!parse_switch(Some("0")));
        assert!(!parse_switch(Some("false")));
        assert!(!parse_switch(Some("nope")));
    }
}
