use std::time::Duration;

use crate::errors::SessionError;
use crate::timeline::DuplicateSpanPolicy;
use crate::validate::SchemaMode;

/// Environment variable holding the agent service base URL.
pub const AGENT_URL_ENV: &str = "AGENT_STREAM_AGENT_URL";
/// Environment variable holding the agent id appended to the base URL.
pub const AGENT_ID_ENV: &str = "AGENT_STREAM_AGENT_ID";

/// Configuration for the agent that issues stream sessions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    /// Base URL of the agent service.
    pub base_url: String,
    /// Agent identifier, joined onto `base_url`.
    pub agent_id: String,
    /// Connect timeout for session and stream requests.
    pub connect_timeout: Duration,
}

impl AgentConfig {
    pub fn new(base_url: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            agent_id: agent_id.into(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Builds a config from `AGENT_STREAM_AGENT_URL` and `AGENT_STREAM_AGENT_ID`.
    pub fn from_env() -> Result<Self, SessionError> {
        let base_url = required_env(AGENT_URL_ENV)?;
        let agent_id = required_env(AGENT_ID_ENV)?;
        Ok(Self::new(base_url, agent_id))
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// URL the session requests are posted to.
    pub fn agent_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.agent_id.trim_start_matches('/')
        )
    }
}

fn required_env(key: &str) -> Result<String, SessionError> {
    let value = std::env::var(key).unwrap_or_default();
    if value.trim().is_empty() {
        return Err(SessionError::Config(format!("missing {key}")));
    }
    Ok(value.trim().to_string())
}

/// What a consumer does with unterminated event data left at end of stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingFramePolicy {
    /// Discard it (logged at warn level).
    #[default]
    Drop,
    /// Process it as one final frame.
    Flush,
}

/// Per-consumer behavior options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Collect every validated chunk and hand them to `on_complete`.
    pub collect_chunks: bool,
    /// Handling of an unterminated event frame at end of stream.
    pub trailing_frame: TrailingFramePolicy,
}

impl ConsumerOptions {
    pub fn collect_chunks(mut self, collect: bool) -> Self {
        self.collect_chunks = collect;
        self
    }

    pub fn trailing_frame(mut self, policy: TrailingFramePolicy) -> Self {
        self.trailing_frame = policy;
        self
    }
}

/// Options for an `AgentSession`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bounded capacity of the channel between consumers and the session.
    pub channel_capacity: usize,
    /// Options applied to both consumers.
    pub consumer: ConsumerOptions,
    /// Event schema strictness.
    pub schema_mode: SchemaMode,
    /// Handling of span ids reused after closure.
    pub duplicate_spans: DuplicateSpanPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 128,
            consumer: ConsumerOptions::default(),
            schema_mode: SchemaMode::default(),
            duplicate_spans: DuplicateSpanPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn consumer(mut self, options: ConsumerOptions) -> Self {
        self.consumer = options;
        self
    }

    pub fn schema_mode(mut self, mode: SchemaMode) -> Self {
        self.schema_mode = mode;
        self
    }

    pub fn duplicate_spans(mut self, policy: DuplicateSpanPolicy) -> Self {
        self.duplicate_spans = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SessionError> {
        if self.channel_capacity == 0 {
            return Err(SessionError::Validation(
                "channel_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
