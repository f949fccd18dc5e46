//! Common imports for typical usage.
pub use crate::{
    AgentClient, AgentSession, ByteSource, ConsumerHandler, Entry, EventChunk, EventSchema,
    HttpSource, SessionConfig, SessionError, SessionLauncher, SessionUpdate, StreamConsumer,
    StreamError, StreamUrls, Timeline, Transport,
};
