//! Generic stream consumer: open, read, frame, validate, notify.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt as _;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConsumerOptions, TrailingFramePolicy};
use crate::errors::StreamError;
use crate::frame::{Flavor, FrameBuffer, Utf8Decoder, event_payload};
use crate::source::{ByteSource, ByteStream};
use crate::validate::{ChunkSchema, TextSchema, validate_payload, validate_text};

/// Flavor plus the schema every frame is validated against.
#[derive(Clone, Debug)]
pub struct Transport<S> {
    flavor: Flavor,
    schema: S,
}

impl Transport<TextSchema> {
    /// Plain-text transport: every decoded fragment is one string chunk.
    pub fn text() -> Self {
        Self {
            flavor: Flavor::Text,
            schema: TextSchema,
        }
    }
}

impl<S: ChunkSchema> Transport<S> {
    /// Event-stream transport validated against `schema`.
    pub fn sse(schema: S) -> Self {
        Self {
            flavor: Flavor::Event,
            schema,
        }
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }
}

/// Aggregate statistics delivered once a read loop ends.
#[derive(Clone, Debug)]
pub struct CompletionSummary<C> {
    /// Number of validated chunks delivered to `on_chunk`.
    pub total_chunks: u64,
    /// Number of bytes read from the transport.
    pub total_bytes: u64,
    /// Wall-clock time since `start`.
    pub duration: Duration,
    /// Whether the loop ended on a fatal error.
    pub did_fatal_error: bool,
    /// Every validated chunk, when collection was requested.
    pub chunks: Option<Vec<C>>,
}

/// Lifecycle callbacks of a consumer. Every method defaults to a no-op.
#[async_trait::async_trait]
pub trait ConsumerHandler<C: Send + 'static>: Send + 'static {
    async fn on_start(&mut self) {}

    async fn on_chunk(&mut self, _chunk: C, _index: u64) {}

    async fn on_error(&mut self, _error: StreamError) {}

    async fn on_complete(&mut self, _summary: CompletionSummary<C>) {}
}

/// Handler that ignores every notification.
#[async_trait::async_trait]
impl<C: Send + 'static> ConsumerHandler<C> for () {}

/// One lifecycle notification, as sent by `ChannelHandler`.
#[derive(Clone, Debug)]
pub enum ConsumerEvent<C> {
    Started,
    Chunk { chunk: C, index: u64 },
    Error(StreamError),
    Completed(CompletionSummary<C>),
}

/// Handler forwarding notifications, in order, into a bounded channel.
pub struct ChannelHandler<C, M> {
    tx: mpsc::Sender<M>,
    wrap: fn(ConsumerEvent<C>) -> M,
}

impl<C> ChannelHandler<C, ConsumerEvent<C>> {
    pub fn new(tx: mpsc::Sender<ConsumerEvent<C>>) -> Self {
        Self {
            tx,
            wrap: std::convert::identity,
        }
    }
}

impl<C, M> ChannelHandler<C, M> {
    /// Forwards notifications wrapped into the channel's message type.
    pub fn with_wrap(tx: mpsc::Sender<M>, wrap: fn(ConsumerEvent<C>) -> M) -> Self {
        Self { tx, wrap }
    }

    async fn forward(&self, event: ConsumerEvent<C>) {
        if self.tx.send((self.wrap)(event)).await.is_err() {
            debug!("consumer event receiver dropped");
        }
    }
}

#[async_trait::async_trait]
impl<C, M> ConsumerHandler<C> for ChannelHandler<C, M>
where
    C: Send + 'static,
    M: Send + 'static,
{
    async fn on_start(&mut self) {
        self.forward(ConsumerEvent::Started).await;
    }

    async fn on_chunk(&mut self, chunk: C, index: u64) {
        self.forward(ConsumerEvent::Chunk { chunk, index }).await;
    }

    async fn on_error(&mut self, error: StreamError) {
        self.forward(ConsumerEvent::Error(error)).await;
    }

    async fn on_complete(&mut self, summary: CompletionSummary<C>) {
        self.forward(ConsumerEvent::Completed(summary)).await;
    }
}

/// Handle used to request cancellation of a consumer.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The read loop observes it before its next read or frame and then
    /// completes with `did_fatal_error = false`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A configured, not yet started consumer.
pub struct StreamConsumer<S, H> {
    id: uuid::Uuid,
    source: Arc<dyn ByteSource>,
    transport: Transport<S>,
    options: ConsumerOptions,
    handler: H,
    abort: AbortHandle,
    abort_rx: watch::Receiver<bool>,
}

impl<S, H> StreamConsumer<S, H>
where
    S: ChunkSchema,
    H: ConsumerHandler<S::Chunk>,
{
    pub fn new(source: Arc<dyn ByteSource>, transport: Transport<S>, handler: H) -> Self {
        let (tx, abort_rx) = watch::channel(false);
        Self {
            id: uuid::Uuid::new_v4(),
            source,
            transport,
            options: ConsumerOptions::default(),
            handler,
            abort: AbortHandle { tx },
            abort_rx,
        }
    }

    pub fn with_options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Returns a handle that can stop this consumer, before or after `start`.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn stop(&self) {
        self.abort.abort();
    }

    /// Runs `on_start`, then spawns the read loop against `url`.
    ///
    /// Returns as soon as the loop is spawned.
    pub async fn start(mut self, url: impl Into<String>) -> ConsumerTask {
        let started = Instant::now();
        let url = url.into();
        self.handler.on_start().await;

        let id = self.id;
        let abort = self.abort.clone();
        info!(consumer_id = %id, flavor = ?self.transport.flavor, url = %url, "stream consumer started");
        let read_loop = ReadLoop {
            id,
            source: self.source,
            transport: self.transport,
            options: self.options,
            handler: self.handler,
            abort_rx: self.abort_rx,
        };
        let join = tokio::spawn(read_loop.run(url, started));
        ConsumerTask { id, abort, join }
    }
}

/// A running consumer.
pub struct ConsumerTask {
    id: uuid::Uuid,
    abort: AbortHandle,
    join: JoinHandle<()>,
}

impl ConsumerTask {
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn stop(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the read loop (including `on_complete`) to finish.
    pub async fn join(self) {
        if let Err(err) = self.join.await {
            error!(consumer_id = %self.id, error = %err, "stream consumer task failed");
        }
    }
}

struct Counters<C> {
    total_chunks: u64,
    total_bytes: u64,
    collected: Option<Vec<C>>,
}

struct ReadLoop<S, H> {
    id: uuid::Uuid,
    source: Arc<dyn ByteSource>,
    transport: Transport<S>,
    options: ConsumerOptions,
    handler: H,
    abort_rx: watch::Receiver<bool>,
}

impl<S, H> ReadLoop<S, H>
where
    S: ChunkSchema,
    H: ConsumerHandler<S::Chunk>,
{
    async fn run(mut self, url: String, started: Instant) {
        let mut counters = Counters {
            total_chunks: 0,
            total_bytes: 0,
            collected: self.options.collect_chunks.then(Vec::new),
        };
        let did_fatal_error = self.drive(&url, &mut counters).await;
        let summary = CompletionSummary {
            total_chunks: counters.total_chunks,
            total_bytes: counters.total_bytes,
            duration: started.elapsed(),
            did_fatal_error,
            chunks: counters.collected,
        };
        info!(
            consumer_id = %self.id,
            total_chunks = summary.total_chunks,
            total_bytes = summary.total_bytes,
            duration_ms = summary.duration.as_millis() as u64,
            did_fatal_error,
            "stream consumer completed"
        );
        self.handler.on_complete(summary).await;
    }

    /// Returns whether the loop ended on a fatal error.
    async fn drive(&mut self, url: &str, counters: &mut Counters<S::Chunk>) -> bool {
        if self.cancelled() {
            return false;
        }
        let opened = tokio::select! {
            biased;
            _ = wait_cancelled(&mut self.abort_rx) => return false,
            opened = self.source.open(url) => opened,
        };
        let mut stream: ByteStream = match opened {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                self.report(StreamError::MissingReader).await;
                return true;
            }
            Err(err) => {
                self.report(err).await;
                return true;
            }
        };

        let mut decoder = Utf8Decoder::default();
        let mut frames = FrameBuffer::new(self.transport.flavor);
        loop {
            if self.cancelled() {
                return false;
            }
            let next = tokio::select! {
                biased;
                _ = wait_cancelled(&mut self.abort_rx) => return false,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(bytes)) => {
                    counters.total_bytes += bytes.len() as u64;
                    let ready = frames.push(&decoder.decode(&bytes));
                    if !self.process(ready, counters).await {
                        return false;
                    }
                }
                Some(Err(err)) => {
                    self.report(err).await;
                    return true;
                }
                None => break,
            }
        }

        let mut ready = frames.push(&decoder.finish());
        if let Some(rest) = frames.finish() {
            match self.options.trailing_frame {
                TrailingFramePolicy::Drop => {
                    warn!(consumer_id = %self.id, bytes = rest.len(), "dropping unterminated trailing frame");
                }
                TrailingFramePolicy::Flush => ready.push(rest),
            }
        }
        self.process(ready, counters).await;
        false
    }

    /// Validates and dispatches frames. Returns false once cancelled.
    async fn process(&mut self, ready: Vec<String>, counters: &mut Counters<S::Chunk>) -> bool {
        for frame in ready {
            if self.cancelled() {
                return false;
            }
            let validated = match self.transport.flavor {
                Flavor::Text => validate_text(&self.transport.schema, &frame),
                Flavor::Event => match event_payload(&frame) {
                    Some(payload) => validate_payload(&self.transport.schema, payload),
                    None => {
                        debug!(consumer_id = %self.id, "skipping non-data frame");
                        continue;
                    }
                },
            };
            match validated {
                Ok(chunk) => {
                    let index = counters.total_chunks;
                    counters.total_chunks += 1;
                    if let Some(collected) = counters.collected.as_mut() {
                        collected.push(chunk.clone());
                    }
                    debug!(consumer_id = %self.id, index, "stream chunk");
                    self.handler.on_chunk(chunk, index).await;
                }
                Err(err) => self.report(err).await,
            }
        }
        true
    }

    async fn report(&mut self, err: StreamError) {
        if err.is_fatal() {
            error!(consumer_id = %self.id, error = %err, "stream consumer failed");
        } else {
            warn!(consumer_id = %self.id, error = %err, "dropping invalid stream frame");
        }
        self.handler.on_error(err).await;
    }

    fn cancelled(&self) -> bool {
        *self.abort_rx.borrow()
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|aborted| *aborted).await.is_err() {
        // Every abort handle is gone; cancellation can no longer happen.
        std::future::pending::<()>().await;
    }
}
