//! Folds event chunks into an ordered, renderable list of entries.
//!
//! Entries live in an append-only arena. Open spans are found through a map
//! from `(kind, id)` to the index of the most recently opened entry with that
//! identifier, so a reused id always resolves to its newest entry.

use std::collections::HashMap;

use serde::ser::SerializeStruct as _;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::chunk::{EventChunk, ToolPayload};

/// Accumulated text or reasoning span.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextEntry {
    pub id: String,
    pub content: String,
    pub completed: bool,
}

/// Lifecycle state of a tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Input is still streaming in.
    Building,
    /// Input is complete; waiting on the result.
    Executing,
    /// A result arrived.
    Completed,
}

/// A tool call and its input and output as they stream in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEntry {
    pub id: String,
    pub name: String,
    /// Raw input text (accumulated deltas, or a string `tool-call` input).
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_object: Option<serde_json::Map<String, serde_json::Value>>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_object: Option<serde_json::Map<String, serde_json::Value>>,
    pub status: ToolStatus,
}

impl ToolCallEntry {
    fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            input: String::new(),
            input_object: None,
            output: String::new(),
            output_object: None,
            status: ToolStatus::Building,
        }
    }
}

/// One renderable unit of the timeline.
///
/// Serializes as `{"kind": ..., "data": ...}`; a break carries `"data": null`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Entry {
    Text(TextEntry),
    Reasoning(TextEntry),
    Tool(ToolCallEntry),
    /// Step boundary.
    Break,
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Entry", 2)?;
        match self {
            Self::Text(data) => {
                state.serialize_field("kind", "text")?;
                state.serialize_field("data", data)?;
            }
            Self::Reasoning(data) => {
                state.serialize_field("kind", "reasoning")?;
                state.serialize_field("data", data)?;
            }
            Self::Tool(data) => {
                state.serialize_field("kind", "tool")?;
                state.serialize_field("data", data)?;
            }
            Self::Break => {
                state.serialize_field("kind", "break")?;
                state.serialize_field("data", &())?;
            }
        }
        state.end()
    }
}

impl Entry {
    fn span_kind(&self) -> Option<SpanKind> {
        match self {
            Self::Text(_) => Some(SpanKind::Text),
            Self::Reasoning(_) => Some(SpanKind::Reasoning),
            Self::Tool(_) => Some(SpanKind::Tool),
            Self::Break => None,
        }
    }
}

/// What to do with a `*-start` whose id names an existing entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateSpanPolicy {
    /// Append a new entry; the earlier one keeps its content and state.
    #[default]
    OpenNew,
    /// Reopen the existing entry and keep accumulating into it.
    Merge,
}

/// Effect of one `Timeline::apply` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineChange {
    Appended(usize),
    Updated(usize),
    Unchanged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum SpanKind {
    Text,
    Reasoning,
    Tool,
}

/// Ordered entry list reconstructed from an event stream.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    entries: Vec<Entry>,
    spans: HashMap<(SpanKind, String), usize>,
    policy: DuplicateSpanPolicy,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DuplicateSpanPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    /// Clears every entry for a new session.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.spans.clear();
    }

    /// Drops a trailing break at the end of the event stream.
    pub fn finish(&mut self) -> bool {
        if matches!(self.entries.last(), Some(Entry::Break)) {
            self.entries.pop();
            return true;
        }
        false
    }

    /// Applies one chunk. Chunks naming an unknown or closed span are no-ops.
    pub fn apply(&mut self, chunk: &EventChunk) -> TimelineChange {
        let change = match chunk {
            EventChunk::Start | EventChunk::Finish | EventChunk::StartStep => {
                TimelineChange::Unchanged
            }
            EventChunk::FinishStep => self.push(Entry::Break),

            EventChunk::TextStart { id: Some(id) } => self.open_text(SpanKind::Text, id),
            EventChunk::TextDelta {
                id: Some(id),
                text: Some(text),
            } => self.append_text(SpanKind::Text, id, text),
            EventChunk::TextEnd { id: Some(id) } => self.close_text(SpanKind::Text, id),

            EventChunk::ReasoningStart { id: Some(id) } => self.open_text(SpanKind::Reasoning, id),
            EventChunk::ReasoningDelta {
                id: Some(id),
                text: Some(text),
            } => self.append_text(SpanKind::Reasoning, id, text),
            EventChunk::ReasoningEnd { id: Some(id) } => self.close_text(SpanKind::Reasoning, id),

            EventChunk::ToolInputStart {
                id: Some(id),
                tool_name: Some(name),
            } => self.open_tool(id, name),
            EventChunk::ToolInputDelta {
                id: Some(id),
                delta: Some(delta),
            } => self.update_tool(id, |tool| {
                if tool.status != ToolStatus::Building || delta.is_empty() {
                    return false;
                }
                tool.input.push_str(delta);
                true
            }),
            EventChunk::ToolInputEnd { id: Some(id) } => self.update_tool(id, |tool| {
                if tool.status != ToolStatus::Building {
                    return false;
                }
                tool.status = ToolStatus::Executing;
                true
            }),
            EventChunk::ToolCall {
                tool_call_id: Some(id),
                input,
                ..
            } => self.update_tool(id, |tool| {
                if tool.status == ToolStatus::Completed {
                    return false;
                }
                tool.status = ToolStatus::Executing;
                match input {
                    Some(ToolPayload::Text(text)) if !text.is_empty() => tool.input = text.clone(),
                    Some(ToolPayload::Object(object)) => tool.input_object = Some(object.clone()),
                    _ => {}
                }
                true
            }),
            EventChunk::ToolResult {
                tool_call_id: Some(id),
                output,
                ..
            } => self.update_tool(id, |tool| {
                if tool.status == ToolStatus::Completed {
                    return false;
                }
                tool.status = ToolStatus::Completed;
                match output {
                    Some(ToolPayload::Text(text)) if !text.is_empty() => tool.output = text.clone(),
                    Some(ToolPayload::Object(object)) => tool.output_object = Some(object.clone()),
                    _ => {}
                }
                true
            }),

            // Loose chunks missing the fields their effect needs.
            EventChunk::TextStart { .. }
            | EventChunk::TextDelta { .. }
            | EventChunk::TextEnd { .. }
            | EventChunk::ReasoningStart { .. }
            | EventChunk::ReasoningDelta { .. }
            | EventChunk::ReasoningEnd { .. }
            | EventChunk::ToolInputStart { .. }
            | EventChunk::ToolInputDelta { .. }
            | EventChunk::ToolInputEnd { .. }
            | EventChunk::ToolCall { .. }
            | EventChunk::ToolResult { .. } => TimelineChange::Unchanged,
        };
        if change == TimelineChange::Unchanged && chunk.span_id().is_some() {
            debug!(chunk_type = chunk.type_name(), span_id = ?chunk.span_id(), "chunk left timeline unchanged");
        }
        change
    }

    fn push(&mut self, entry: Entry) -> TimelineChange {
        self.entries.push(entry);
        TimelineChange::Appended(self.entries.len() - 1)
    }

    fn lookup(&self, kind: SpanKind, id: &str) -> Option<usize> {
        self.spans.get(&(kind, id.to_owned())).copied()
    }

    fn open(&mut self, kind: SpanKind, id: &str, entry: Entry) -> TimelineChange {
        if self.policy == DuplicateSpanPolicy::Merge
            && let Some(index) = self.lookup(kind, id)
        {
            match &mut self.entries[index] {
                Entry::Text(text) | Entry::Reasoning(text) => text.completed = false,
                Entry::Tool(tool) => tool.status = ToolStatus::Building,
                Entry::Break => {}
            }
            return TimelineChange::Updated(index);
        }
        debug_assert_eq!(entry.span_kind(), Some(kind));
        let change = self.push(entry);
        self.spans.insert((kind, id.to_owned()), self.entries.len() - 1);
        change
    }

    fn open_text(&mut self, kind: SpanKind, id: &str) -> TimelineChange {
        let data = TextEntry {
            id: id.to_owned(),
            ..TextEntry::default()
        };
        let entry = match kind {
            SpanKind::Reasoning => Entry::Reasoning(data),
            SpanKind::Text | SpanKind::Tool => Entry::Text(data),
        };
        self.open(kind, id, entry)
    }

    fn open_tool(&mut self, id: &str, name: &str) -> TimelineChange {
        let entry = Entry::Tool(ToolCallEntry::new(id.to_owned(), name.to_owned()));
        self.open(SpanKind::Tool, id, entry)
    }

    fn text_span(&mut self, kind: SpanKind, id: &str) -> Option<(usize, &mut TextEntry)> {
        let index = self.lookup(kind, id)?;
        match &mut self.entries[index] {
            Entry::Text(text) | Entry::Reasoning(text) if !text.completed => Some((index, text)),
            _ => None,
        }
    }

    fn append_text(&mut self, kind: SpanKind, id: &str, delta: &str) -> TimelineChange {
        if delta.is_empty() {
            return TimelineChange::Unchanged;
        }
        match self.text_span(kind, id) {
            Some((index, text)) => {
                text.content.push_str(delta);
                TimelineChange::Updated(index)
            }
            None => TimelineChange::Unchanged,
        }
    }

    fn close_text(&mut self, kind: SpanKind, id: &str) -> TimelineChange {
        match self.text_span(kind, id) {
            Some((index, text)) => {
                text.completed = true;
                TimelineChange::Updated(index)
            }
            None => TimelineChange::Unchanged,
        }
    }

    fn update_tool(
        &mut self,
        id: &str,
        update: impl FnOnce(&mut ToolCallEntry) -> bool,
    ) -> TimelineChange {
        let Some(index) = self.lookup(SpanKind::Tool, id) else {
            return TimelineChange::Unchanged;
        };
        match &mut self.entries[index] {
            Entry::Tool(tool) => {
                if update(tool) {
                    TimelineChange::Updated(index)
                } else {
                    TimelineChange::Unchanged
                }
            }
            _ => TimelineChange::Unchanged,
        }
    }
}
