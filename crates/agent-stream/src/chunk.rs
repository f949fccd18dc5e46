use serde::{Deserialize, Serialize};

/// Tool input or output as carried on the wire: raw text or a JSON object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolPayload {
    /// Raw text payload.
    Text(String),
    /// Structured payload.
    Object(serde_json::Map<String, serde_json::Value>),
}

/// Typed event-stream chunk.
///
/// Field presence is loose: every optional field may be absent and unknown
/// fields are ignored. `EventChunk::missing_fields` reports what a strict
/// per-variant schema would have required.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EventChunk {
    Start,
    Finish,
    StartStep,
    FinishStep,
    ReasoningStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ReasoningDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    ReasoningEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    TextStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    TextDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    TextEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ToolInputStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },
    ToolInputDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, alias = "inputTextDelta", skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },
    ToolInputEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ToolCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<ToolPayload>,
    },
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<ToolPayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<ToolPayload>,
    },
}

impl EventChunk {
    /// Wire name of the chunk's `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Finish => "finish",
            Self::StartStep => "start-step",
            Self::FinishStep => "finish-step",
            Self::ReasoningStart { .. } => "reasoning-start",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd { .. } => "reasoning-end",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolInputDelta { .. } => "tool-input-delta",
            Self::ToolInputEnd { .. } => "tool-input-end",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
        }
    }

    /// Span identifier carried by the chunk (`id` or `toolCallId`).
    pub fn span_id(&self) -> Option<&str> {
        match self {
            Self::Start | Self::Finish | Self::StartStep | Self::FinishStep => None,
            Self::ReasoningStart { id }
            | Self::ReasoningDelta { id, .. }
            | Self::ReasoningEnd { id }
            | Self::TextStart { id }
            | Self::TextDelta { id, .. }
            | Self::TextEnd { id }
            | Self::ToolInputStart { id, .. }
            | Self::ToolInputDelta { id, .. }
            | Self::ToolInputEnd { id } => id.as_deref(),
            Self::ToolCall { tool_call_id, .. } | Self::ToolResult { tool_call_id, .. } => {
                tool_call_id.as_deref()
            }
        }
    }

    /// Fields a strict per-variant schema requires but this chunk lacks.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let mut require = |present: bool, name: &'static str| {
            if !present {
                missing.push(name);
            }
        };
        match self {
            Self::Start | Self::Finish | Self::StartStep | Self::FinishStep => {}
            Self::ReasoningStart { id }
            | Self::ReasoningEnd { id }
            | Self::TextStart { id }
            | Self::TextEnd { id }
            | Self::ToolInputEnd { id } => require(id.is_some(), "id"),
            Self::ReasoningDelta { id, text } | Self::TextDelta { id, text } => {
                require(id.is_some(), "id");
                require(text.is_some(), "text");
            }
            Self::ToolInputStart { id, tool_name } => {
                require(id.is_some(), "id");
                require(tool_name.is_some(), "toolName");
            }
            Self::ToolInputDelta { id, delta } => {
                require(id.is_some(), "id");
                require(delta.is_some(), "delta");
            }
            Self::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => {
                require(tool_name.is_some(), "toolName");
                require(matches!(input, Some(ToolPayload::Object(_))), "input");
                require(tool_call_id.is_some(), "toolCallId");
            }
            Self::ToolResult {
                tool_call_id,
                tool_name,
                input,
                output,
            } => {
                require(tool_name.is_some(), "toolName");
                require(matches!(input, Some(ToolPayload::Object(_))), "input");
                require(output.is_some(), "output");
                require(tool_call_id.is_some(), "toolCallId");
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<EventChunk, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn structural_markers_ignore_extra_fields() {
        let chunk = parse(json!({"type":"finish-step","finishReason":"stop","usage":{}}))
            .expect("finish-step");
        assert_eq!(chunk, EventChunk::FinishStep);
        assert_eq!(chunk.type_name(), "finish-step");
    }

    #[test]
    fn camel_case_fields_map_onto_variants() {
        let chunk = parse(json!({
            "type":"tool-call",
            "toolCallId":"T",
            "toolName":"lookup",
            "input":{"q":1}
        }))
        .expect("tool-call");
        let EventChunk::ToolCall {
            tool_call_id,
            tool_name,
            input,
        } = &chunk
        else {
            panic!("expected tool-call, got {chunk:?}");
        };
        assert_eq!(tool_call_id.as_deref(), Some("T"));
        assert_eq!(tool_name.as_deref(), Some("lookup"));
        assert!(matches!(input, Some(ToolPayload::Object(map)) if map["q"] == json!(1)));
        assert_eq!(chunk.span_id(), Some("T"));
    }

    #[test]
    fn input_text_delta_is_an_alias_for_delta() {
        let chunk = parse(json!({"type":"tool-input-delta","id":"T","inputTextDelta":"{\"q\""}))
            .expect("tool-input-delta");
        assert_eq!(
            chunk,
            EventChunk::ToolInputDelta {
                id: Some("T".into()),
                delta: Some("{\"q\"".into()),
            }
        );
    }

    #[test]
    fn loose_parse_accepts_missing_fields_and_reports_them() {
        let chunk = parse(json!({"type":"text-delta"})).expect("loose text-delta");
        assert_eq!(chunk.missing_fields(), vec!["id", "text"]);
        assert!(parse(json!({"type":"start"})).expect("start").missing_fields().is_empty());
    }

    #[test]
    fn unknown_type_and_non_object_payloads_are_rejected() {
        assert!(parse(json!({"type":"error","errorText":"boom"})).is_err());
        assert!(parse(json!({"id":"x"})).is_err());
        assert!(parse(json!({"type":"tool-result","toolCallId":"T","output":[1,2]})).is_err());
        assert!(parse(json!("text-start")).is_err());
    }

    #[test]
    fn strict_tool_call_requires_object_input() {
        let chunk = parse(json!({
            "type":"tool-call","toolCallId":"T","toolName":"lookup","input":"{}"
        }))
        .expect("tool-call");
        assert_eq!(chunk.missing_fields(), vec!["input"]);
    }
}
