//! Frame payload validation.

use std::fmt;

use crate::chunk::EventChunk;
use crate::errors::StreamError;

/// Schema a consumer validates each frame against.
pub trait ChunkSchema: Send + Sync + 'static {
    /// Value produced for a valid frame.
    type Chunk: Clone + fmt::Debug + Send + Sync + 'static;

    /// Validates a candidate value, describing the mismatch on failure.
    fn validate(&self, candidate: serde_json::Value) -> Result<Self::Chunk, String>;
}

/// Accepts any string.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextSchema;

impl ChunkSchema for TextSchema {
    type Chunk = String;

    fn validate(&self, candidate: serde_json::Value) -> Result<String, String> {
        match candidate {
            serde_json::Value::String(text) => Ok(text),
            other => Err(format!("expected string, received {}", json_kind(&other))),
        }
    }
}

/// How strictly `EventSchema` enforces per-variant fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    /// Any known `type` with any subset of the optional fields.
    #[default]
    Loose,
    /// Each `type` must carry the fields it is defined with.
    Strict,
}

/// Schema for event-stream chunks.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventSchema {
    mode: SchemaMode,
}

impl EventSchema {
    pub fn new(mode: SchemaMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> SchemaMode {
        self.mode
    }
}

impl ChunkSchema for EventSchema {
    type Chunk = EventChunk;

    fn validate(&self, candidate: serde_json::Value) -> Result<EventChunk, String> {
        let chunk: EventChunk = serde_json::from_value(candidate).map_err(|e| e.to_string())?;
        if self.mode == SchemaMode::Strict {
            let missing = chunk.missing_fields();
            if !missing.is_empty() {
                return Err(format!(
                    "{} chunk missing required fields: {}",
                    chunk.type_name(),
                    missing.join(", ")
                ));
            }
        }
        Ok(chunk)
    }
}

/// Validates an event-frame payload.
///
/// The payload is parsed as JSON; when that fails the trimmed raw text is
/// validated as a JSON string instead.
pub fn validate_payload<S: ChunkSchema>(schema: &S, raw: &str) -> Result<S::Chunk, StreamError> {
    let trimmed = raw.trim();
    let candidate = serde_json::from_str(trimmed)
        .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_owned()));
    schema
        .validate(candidate)
        .map_err(|message| StreamError::validation(message, trimmed))
}

/// Validates a text-flavor frame as-is, without JSON parsing.
pub fn validate_text<S: ChunkSchema>(schema: &S, frame: &str) -> Result<S::Chunk, StreamError> {
    schema
        .validate(serde_json::Value::String(frame.to_owned()))
        .map_err(|message| StreamError::validation(message, frame))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_validates_to_typed_chunk() {
        let chunk = validate_payload(&EventSchema::default(), r#" {"type":"text-start","id":"a"} "#)
            .expect("valid");
        assert_eq!(
            chunk,
            EventChunk::TextStart {
                id: Some("a".into())
            }
        );
    }

    #[test]
    fn non_json_payload_falls_back_to_string_and_fails_event_schema() {
        let err = validate_payload(&EventSchema::default(), "[DONE]").expect_err("invalid");
        assert!(!err.is_fatal());
        assert!(matches!(err, StreamError::Validation { raw, .. } if raw == "[DONE]"));
    }

    #[test]
    fn non_json_payload_is_accepted_by_text_schema() {
        assert_eq!(
            validate_payload(&TextSchema, "plain words").expect("string"),
            "plain words"
        );
        let err = validate_payload(&TextSchema, "42").expect_err("number");
        assert!(matches!(err, StreamError::Validation { message, .. } if message.contains("number")));
    }

    #[test]
    fn strict_mode_rejects_chunks_missing_variant_fields() {
        let strict = EventSchema::new(SchemaMode::Strict);
        let err = validate_payload(&strict, r#"{"type":"text-delta","id":"a"}"#).expect_err("strict");
        assert!(matches!(err, StreamError::Validation { message, .. } if message.contains("text")));
        assert!(validate_payload(&EventSchema::default(), r#"{"type":"text-delta","id":"a"}"#).is_ok());
    }

    #[test]
    fn text_frames_skip_json_parsing() {
        assert_eq!(validate_text(&TextSchema, "{\"a\":1}").expect("text"), "{\"a\":1}");
        assert_eq!(validate_text(&TextSchema, "  7 ").expect("text"), "  7 ");
    }
}
