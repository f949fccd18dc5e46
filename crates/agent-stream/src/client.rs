use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::errors::SessionError;

/// Stream locations issued when an agent run starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUrls {
    /// Identifier of the event stream.
    pub full_stream_id: String,
    /// URL of the event stream.
    pub full_stream_url: String,
    /// Identifier of the plain-text stream.
    pub text_stream_id: String,
    /// URL of the plain-text stream.
    pub text_stream_url: String,
}

/// Starts agent runs and resolves stream ids to URLs.
#[async_trait::async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Starts a run for `user_id` and returns where its streams live.
    async fn start_session(&self, user_id: &str) -> Result<StreamUrls, SessionError>;

    /// Resolves a previously issued stream id.
    async fn stream_url(&self, stream_id: &str) -> Result<String, SessionError>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum AgentRequest<'a> {
    Run { user_id: &'a str },
    Get { stream_id: &'a str },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamUrlResponse {
    stream_url: String,
}

/// `SessionLauncher` that talks to the agent over HTTP.
#[derive(Clone)]
pub struct AgentClient {
    client: reqwest::Client,
    config: AgentConfig,
}

impl AgentClient {
    pub fn new(config: AgentConfig) -> Result<Self, SessionError> {
        if config.base_url.trim().is_empty() {
            return Err(SessionError::Config("agent base_url must not be empty".into()));
        }
        if config.agent_id.trim().is_empty() {
            return Err(SessionError::Config("agent_id must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("failed to build agent client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a client from `AGENT_STREAM_AGENT_URL` and `AGENT_STREAM_AGENT_ID`.
    pub fn from_env() -> Result<Self, SessionError> {
        Self::new(AgentConfig::from_env()?)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: &AgentRequest<'_>,
    ) -> Result<T, SessionError> {
        let url = self.config.agent_url();
        debug!(%url, ?request, "calling agent");
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::Transport(format!("agent request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Transport(format!("failed to read agent response: {e}")))?;
        if !status.is_success() {
            return Err(SessionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        decode_agent_body(&body)
    }
}

// The agent reports failures as `{"error": "..."}` with a success status.
fn decode_agent_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, SessionError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| SessionError::Decode(format!("agent response is not JSON: {e}")))?;
    if let Some(error) = value.get("error") {
        let message = match error {
            serde_json::Value::String(message) => message.clone(),
            other => other.to_string(),
        };
        return Err(SessionError::Agent { message });
    }
    serde_json::from_value(value)
        .map_err(|e| SessionError::Decode(format!("unexpected agent response: {e}")))
}

#[async_trait::async_trait]
impl SessionLauncher for AgentClient {
    async fn start_session(&self, user_id: &str) -> Result<StreamUrls, SessionError> {
        let urls: StreamUrls = self.call(&AgentRequest::Run { user_id }).await?;
        info!(
            full_stream_id = %urls.full_stream_id,
            text_stream_id = %urls.text_stream_id,
            "agent session started"
        );
        Ok(urls)
    }

    async fn stream_url(&self, stream_id: &str) -> Result<String, SessionError> {
        let response: StreamUrlResponse = self.call(&AgentRequest::Get { stream_id }).await?;
        Ok(response.stream_url)
    }
}
