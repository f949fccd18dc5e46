use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

/// Enables or disables logging (default enabled).
pub const OBSERVABILITY_ENV: &str = "AGENT_STREAM_OBSERVABILITY";
/// Level or filter override, e.g. `debug` or `agent_stream=trace`.
pub const LOG_LEVEL_ENV: &str = "AGENT_STREAM_LOG_LEVEL";
/// When set, logs are written as JSON lines to this file instead of stderr.
pub const JSON_LOG_PATH_ENV: &str = "AGENT_STREAM_JSON_LOG_PATH";

const DEFAULT_FILTER: &str = "warn";
const DEFAULT_LOG_FILE: &str = "agent-stream.logs.jsonl";

/// Where log lines go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogSink {
    /// Compact human-readable lines on stderr, clear of streamed stdout.
    Console,
    /// One JSON object per line, appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    /// `EnvFilter` directives.
    pub filter: String,
    pub sink: LogSink,
}

impl ObservabilitySettings {
    /// Reads `AGENT_STREAM_*` variables, falling back to `RUST_LOG`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves settings through `lookup`, which returns a variable's value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup(OBSERVABILITY_ENV)
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);
        let filter = lookup(LOG_LEVEL_ENV)
            .filter(|level| EnvFilter::try_new(level).is_ok())
            .or_else(|| lookup(EnvFilter::DEFAULT_ENV))
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_owned());
        let sink = lookup(JSON_LOG_PATH_ENV)
            .filter(|path| !path.trim().is_empty())
            .map(|path| json_sink(Path::new(&path)))
            .unwrap_or(LogSink::Console);
        Self {
            enabled,
            filter,
            sink,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn json_sink(path: &Path) -> LogSink {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    LogSink::JsonFile {
        dir: dir.to_path_buf(),
        file_name: file_name.to_owned(),
    }
}

/// Initialize logging once per process from the environment.
///
/// Environment variables:
/// - `AGENT_STREAM_OBSERVABILITY`: optional enable/disable flag (default enabled).
/// - `AGENT_STREAM_LOG_LEVEL`: optional level/filter override.
/// - `AGENT_STREAM_JSON_LOG_PATH`: optional log file path for JSONL output.
/// - `RUST_LOG`: fallback filter (default `warn`).
pub fn init_observability() {
    init_with(ObservabilitySettings::from_env());
}

/// Initialize logging once per process with explicit settings.
pub fn init_with(settings: ObservabilitySettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let env_filter = settings.env_filter();
        match settings.sink {
            LogSink::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            LogSink::Console => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
