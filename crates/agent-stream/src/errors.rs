/// Errors reported by a stream consumer through `ConsumerHandler::on_error`.
///
/// Fatal variants terminate the read loop; `Validation` is reported and the
/// offending frame is dropped while the loop keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The resource could not be opened (connect failure, bad status, ...).
    #[error("failed to fetch stream: {message}")]
    Open { message: String },
    /// The resource opened but exposed no incremental body.
    #[error("failed to get reader")]
    MissingReader,
    /// Reading the next fragment failed mid-stream.
    #[error("failed to read stream: {message}")]
    Read { message: String },
    /// A frame payload was not valid JSON for, or did not match, the schema.
    #[error("failed to validate stream chunk: {message}. Chunk: {raw}")]
    Validation { message: String, raw: String },
}

impl StreamError {
    /// Creates an open/connect error.
    pub fn open(message: impl Into<String>) -> Self {
        Self::Open {
            message: message.into(),
        }
    }

    /// Creates a read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Creates a non-fatal validation error carrying the raw payload.
    pub fn validation(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Returns true when the error terminates the read loop.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Open { .. } | Self::MissingReader | Self::Read { .. } => true,
            Self::Validation { .. } => false,
        }
    }
}

/// Errors returned at the session boundary (starting or addressing a stream).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (for example a blank user id).
    #[error("validation error: {0}")]
    Validation(String),
    /// The request to the agent could not be sent or its body not read.
    #[error("transport error: {0}")]
    Transport(String),
    /// The agent answered with a non-success HTTP status.
    #[error("agent request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The agent answered with an explicit error payload.
    #[error("agent error: {message}")]
    Agent { message: String },
    /// The agent answered with a body of unexpected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_errors_are_non_fatal() {
        assert!(StreamError::open("refused").is_fatal());
        assert!(StreamError::MissingReader.is_fatal());
        assert!(StreamError::read("reset").is_fatal());
        assert!(!StreamError::validation("bad", "{").is_fatal());
    }

    #[test]
    fn validation_display_includes_raw_payload() {
        let err = StreamError::validation("expected value", "{oops");
        assert_eq!(
            err.to_string(),
            "failed to validate stream chunk: expected value. Chunk: {oops"
        );
    }
}
