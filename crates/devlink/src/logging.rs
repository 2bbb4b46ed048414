use clap::ValueEnum;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// `EnvFilter` directives that replace the `--log-level` defaults, e.g.
/// `warn,devlink_frame::scanner=trace` to watch resync byte by byte.
pub const LOG_FILTER_ENV: &str = "DEVLINK_LOG";

/// Targets that follow `--log-level`. Everything else logs at warn.
const TARGETS: [&str; 4] = ["devlink", "devlink_transport", "devlink_frame", "devlink_channel"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub fn default_directives(level: LogLevel) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.as_str())),
    );
    directives.join(",")
}

/// Filter from `overrides` when they parse, else the `level` defaults.
/// The rejected override comes back for reporting.
fn build_filter(level: LogLevel, overrides: Option<&str>) -> (EnvFilter, Option<String>) {
    let fallback = || EnvFilter::new(default_directives(level));
    match overrides.map(str::trim).filter(|s| !s.is_empty()) {
        None => (fallback(), None),
        Some(directives) => match EnvFilter::try_new(directives) {
            Ok(filter) => (filter, None),
            Err(err) => (fallback(), Some(format!("{directives:?}: {err}"))),
        },
    }
}

/// Install the stderr subscriber. Decoded messages go to stdout, so logs
/// never mix with command output.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let overrides = std::env::var(LOG_FILTER_ENV).ok();
    let (filter, rejected) = build_filter(level, overrides.as_deref());

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(level == LogLevel::Trace);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }

    if let Some(rejected) = rejected {
        warn!(env = LOG_FILTER_ENV, error = %rejected, "ignoring invalid log filter");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_applies_to_every_devlink_crate() {
        assert_eq!(
            default_directives(LogLevel::Debug),
            "warn,devlink=debug,devlink_transport=debug,devlink_frame=debug,devlink_channel=debug"
        );
    }

    #[test]
    fn valid_override_is_used() {
        let (_, rejected) = build_filter(LogLevel::Info, Some("devlink_frame::scanner=trace"));
        assert!(rejected.is_none());
    }

    #[test]
    fn blank_override_means_defaults() {
        let (_, rejected) = build_filter(LogLevel::Info, Some("  "));
        assert!(rejected.is_none());
    }

    #[test]
    fn invalid_override_falls_back() {
        let (_, rejected) = build_filter(LogLevel::Info, Some("devlink=loud"));
        assert!(rejected.unwrap().contains("devlink=loud"));
    }
}
