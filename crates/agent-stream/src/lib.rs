//! Streaming decode-and-reconstruct engine for agent runs.
//!
//! A `StreamConsumer` reads a byte stream, splits it into frames, validates
//! each frame against a schema and reports chunks through a
//! `ConsumerHandler`. `Timeline` folds event chunks into ordered entries, and
//! `AgentSession` wires a text consumer and an event consumer together.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use agent_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SessionError> {
//! let client = AgentClient::from_env()?;
//! let source = HttpSource::new(Duration::from_secs(30))?;
//! let mut session = AgentSession::new(Arc::new(source));
//! session.start(&client, "brotherman_bill").await?;
//! while let Some(update) = session.next_update().await {
//!     if let SessionUpdate::TextAppended { fragment, .. } = update {
//!         print!("{fragment}");
//!     }
//! }
//! println!("{} timeline entries", session.entries().len());
//! # Ok(())
//! # }
//! ```

/// Typed event-stream chunks.
pub mod chunk;
/// Agent session launcher contract and HTTP client.
pub mod client;
/// Agent, consumer and session configuration.
pub mod config;
/// Generic stream consumer and its lifecycle handler.
pub mod consumer;
/// Public error types.
pub mod errors;
/// UTF-8 decoding and frame splitting.
pub mod frame;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Agent session wiring both stream flavors into shared state.
pub mod session;
/// Byte sources a consumer reads from.
pub mod source;
/// Timeline reducer.
pub mod timeline;
/// Frame payload validation.
pub mod validate;

pub use chunk::{EventChunk, ToolPayload};
pub use client::{AgentClient, SessionLauncher, StreamUrls};
pub use config::{AgentConfig, ConsumerOptions, SessionConfig, TrailingFramePolicy};
pub use consumer::{
    AbortHandle, ChannelHandler, CompletionSummary, ConsumerEvent, ConsumerHandler, ConsumerTask,
    StreamConsumer, Transport,
};
pub use errors::{SessionError, StreamError};
pub use frame::{Flavor, FrameBuffer};
pub use observability::{LogSink, ObservabilitySettings, init_observability, init_with};
pub use session::{AgentSession, SessionUpdate, StreamKind};
pub use source::{ByteSource, ByteStream, HttpSource};
pub use timeline::{DuplicateSpanPolicy, Entry, TextEntry, Timeline, TimelineChange, ToolCallEntry, ToolStatus};
pub use validate::{ChunkSchema, EventSchema, SchemaMode, TextSchema};
