//! Agent session: one text consumer and one event consumer feeding shared state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::chunk::EventChunk;
use crate::client::{SessionLauncher, StreamUrls};
use crate::config::SessionConfig;
use crate::consumer::{AbortHandle, ChannelHandler, ConsumerEvent, StreamConsumer, Transport};
use crate::errors::{SessionError, StreamError};
use crate::source::ByteSource;
use crate::timeline::{Entry, Timeline, TimelineChange};
use crate::validate::EventSchema;

/// Which of the two session streams a notification came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Text,
    Events,
}

/// Notification routed from either consumer into the session.
#[derive(Debug)]
pub enum SessionMessage {
    Text(ConsumerEvent<String>),
    Event(ConsumerEvent<EventChunk>),
}

/// State change produced by `AgentSession::next_update`.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    /// A consumer ran `on_start`.
    Started(StreamKind),
    /// A text fragment was appended to the raw text.
    TextAppended { index: u64, fragment: String },
    /// An event chunk was folded into the timeline.
    Timeline {
        index: u64,
        chunk_type: &'static str,
        change: TimelineChange,
    },
    /// A consumer reported an error.
    StreamError {
        stream: StreamKind,
        error: StreamError,
    },
    /// A consumer finished.
    StreamCompleted {
        stream: StreamKind,
        total_chunks: u64,
        total_bytes: u64,
        did_fatal_error: bool,
    },
}

/// Owns the timeline and raw text of one agent run.
pub struct AgentSession {
    source: Arc<dyn ByteSource>,
    config: SessionConfig,
    timeline: Timeline,
    text: String,
    urls: Option<StreamUrls>,
    rx: Option<mpsc::Receiver<SessionMessage>>,
    aborts: Vec<AbortHandle>,
    supervisor: Option<JoinHandle<()>>,
    consuming_text: bool,
    consuming_events: bool,
}

impl AgentSession {
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        Self::with_config(source, SessionConfig::default())
    }

    pub fn with_config(source: Arc<dyn ByteSource>, config: SessionConfig) -> Self {
        let timeline = Timeline::with_policy(config.duplicate_spans);
        Self {
            source,
            config,
            timeline,
            text: String::new(),
            urls: None,
            rx: None,
            aborts: Vec::new(),
            supervisor: None,
            consuming_text: false,
            consuming_events: false,
        }
    }

    /// Starts an agent run for `user_id` and consumes both of its streams.
    pub async fn start(
        &mut self,
        launcher: &dyn SessionLauncher,
        user_id: &str,
    ) -> Result<StreamUrls, SessionError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(SessionError::Validation("user_id must not be empty".into()));
        }
        self.reset();
        let urls = launcher.start_session(user_id).await?;
        self.attach(&urls)?;
        Ok(urls)
    }

    /// Consumes the streams of an already started run.
    pub fn attach(&mut self, urls: &StreamUrls) -> Result<(), SessionError> {
        self.spawn_consumers(Some(&urls.text_stream_url), Some(&urls.full_stream_url))?;
        self.urls = Some(urls.clone());
        Ok(())
    }

    /// Consumes an event stream and, optionally, its text stream by URL.
    pub fn watch(&mut self, events_url: &str, text_url: Option<&str>) -> Result<(), SessionError> {
        self.spawn_consumers(text_url, Some(events_url))
    }

    fn spawn_consumers(
        &mut self,
        text_url: Option<&str>,
        events_url: Option<&str>,
    ) -> Result<(), SessionError> {
        self.config.validate()?;
        self.reset();

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let text = text_url.map(|url| {
            let consumer = StreamConsumer::new(
                self.source.clone(),
                Transport::text(),
                ChannelHandler::with_wrap(tx.clone(), SessionMessage::Text),
            )
            .with_options(self.config.consumer.clone());
            (consumer, url.to_owned())
        });
        let events = events_url.map(|url| {
            let consumer = StreamConsumer::new(
                self.source.clone(),
                Transport::sse(EventSchema::new(self.config.schema_mode)),
                ChannelHandler::with_wrap(tx.clone(), SessionMessage::Event),
            )
            .with_options(self.config.consumer.clone());
            (consumer, url.to_owned())
        });
        drop(tx);

        self.consuming_text = text.is_some();
        self.consuming_events = events.is_some();
        self.aborts = text
            .iter()
            .map(|(c, _)| c.abort_handle())
            .chain(events.iter().map(|(c, _)| c.abort_handle()))
            .collect();
        info!(
            text_url = text_url.unwrap_or_default(),
            events_url = events_url.unwrap_or_default(),
            "agent session attached"
        );

        // Consumers are started off the caller's task: `on_start` sends into
        // the bounded channel, which only drains through `next_update`.
        self.supervisor = Some(tokio::spawn(async move {
            let text = match text {
                Some((consumer, url)) => Some(consumer.start(url).await),
                None => None,
            };
            let events = match events {
                Some((consumer, url)) => Some(consumer.start(url).await),
                None => None,
            };
            for task in text.into_iter().chain(events) {
                task.join().await;
            }
        }));
        self.rx = Some(rx);
        Ok(())
    }

    /// Folds the next consumer notification into session state.
    ///
    /// Returns `None` once every attached stream has completed.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let rx = self.rx.as_mut()?;
        let Some(message) = rx.recv().await else {
            self.rx = None;
            self.consuming_text = false;
            self.consuming_events = false;
            return None;
        };
        let update = match message {
            SessionMessage::Text(event) => self.fold_text(event),
            SessionMessage::Event(event) => self.fold_event(event),
        };
        debug!(?update, "session update");
        Some(update)
    }

    fn fold_text(&mut self, event: ConsumerEvent<String>) -> SessionUpdate {
        match event {
            ConsumerEvent::Started => SessionUpdate::Started(StreamKind::Text),
            ConsumerEvent::Chunk { chunk, index } => {
                self.text.push_str(&chunk);
                SessionUpdate::TextAppended {
                    index,
                    fragment: chunk,
                }
            }
            ConsumerEvent::Error(error) => SessionUpdate::StreamError {
                stream: StreamKind::Text,
                error,
            },
            ConsumerEvent::Completed(summary) => {
                self.consuming_text = false;
                SessionUpdate::StreamCompleted {
                    stream: StreamKind::Text,
                    total_chunks: summary.total_chunks,
                    total_bytes: summary.total_bytes,
                    did_fatal_error: summary.did_fatal_error,
                }
            }
        }
    }

    fn fold_event(&mut self, event: ConsumerEvent<EventChunk>) -> SessionUpdate {
        match event {
            ConsumerEvent::Started => SessionUpdate::Started(StreamKind::Events),
            ConsumerEvent::Chunk { chunk, index } => SessionUpdate::Timeline {
                index,
                chunk_type: chunk.type_name(),
                change: self.timeline.apply(&chunk),
            },
            ConsumerEvent::Error(error) => SessionUpdate::StreamError {
                stream: StreamKind::Events,
                error,
            },
            ConsumerEvent::Completed(summary) => {
                self.consuming_events = false;
                if !summary.did_fatal_error {
                    self.timeline.finish();
                }
                SessionUpdate::StreamCompleted {
                    stream: StreamKind::Events,
                    total_chunks: summary.total_chunks,
                    total_bytes: summary.total_bytes,
                    did_fatal_error: summary.did_fatal_error,
                }
            }
        }
    }

    /// Applies every remaining update, then waits for the consumers to exit.
    pub async fn wait(&mut self) {
        while self.next_update().await.is_some() {}
        if let Some(supervisor) = self.supervisor.take()
            && let Err(err) = supervisor.await
        {
            error!(error = %err, "agent session supervisor failed");
        }
    }

    /// Requests cancellation of both consumers.
    pub fn stop(&self) {
        for abort in &self.aborts {
            abort.abort();
        }
    }

    /// Stops any running consumers and clears all session state.
    pub fn reset(&mut self) {
        self.stop();
        self.aborts.clear();
        self.supervisor = None;
        self.rx = None;
        self.timeline.reset();
        self.text.clear();
        self.urls = None;
        self.consuming_text = false;
        self.consuming_events = false;
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn entries(&self) -> &[Entry] {
        self.timeline.entries()
    }

    /// Raw accumulated text, escapes untouched.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Accumulated text with literal `\n` sequences turned into newlines.
    pub fn text_content(&self) -> Option<String> {
        if self.text.is_empty() {
            return None;
        }
        Some(self.text.replace("\\n", "\n"))
    }

    pub fn urls(&self) -> Option<&StreamUrls> {
        self.urls.as_ref()
    }

    pub fn is_consuming_text(&self) -> bool {
        self.consuming_text
    }

    pub fn is_consuming_events(&self) -> bool {
        self.consuming_events
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use bytes::Bytes;
    use futures::stream;

    use super::*;
    use crate::source::ByteStream;
    use crate::timeline::ToolStatus;

    #[derive(Clone)]
    enum Body {
        Fragments(Vec<Result<&'static [u8], StreamError>>),
        Pending,
    }

    #[derive(Default)]
    struct FakeSource {
        bodies: HashMap<&'static str, Body>,
    }

    impl FakeSource {
        fn with(mut self, url: &'static str, body: Body) -> Self {
            self.bodies.insert(url, body);
            self
        }
    }

    #[async_trait::async_trait]
    impl ByteSource for FakeSource {
        async fn open(&self, url: &str) -> Result<Option<ByteStream>, StreamError> {
            match self.bodies.get(url) {
                Some(Body::Fragments(fragments)) => {
                    let items = fragments
                        .iter()
                        .cloned()
                        .map(|item| item.map(Bytes::from_static))
                        .collect::<Vec<_>>();
                    Ok(Some(Box::pin(stream::iter(items))))
                }
                Some(Body::Pending) => Ok(Some(Box::pin(stream::pending()))),
                None => Err(StreamError::open(format!("no body for {url}"))),
            }
        }
    }

    struct FakeLauncher {
        user_ids: Mutex<Vec<String>>,
        result: Result<StreamUrls, SessionError>,
    }

    impl FakeLauncher {
        fn ok() -> Self {
            Self {
                user_ids: Mutex::new(Vec::new()),
                result: Ok(urls()),
            }
        }
    }

    #[async_trait::async_trait]
    impl SessionLauncher for FakeLauncher {
        async fn start_session(&self, user_id: &str) -> Result<StreamUrls, SessionError> {
            self.user_ids.lock().expect("lock").push(user_id.to_owned());
            self.result.clone()
        }

        async fn stream_url(&self, stream_id: &str) -> Result<String, SessionError> {
            Ok(format!("fake://{stream_id}"))
        }
    }

    fn urls() -> StreamUrls {
        StreamUrls {
            full_stream_id: "events".into(),
            full_stream_url: "fake://events".into(),
            text_stream_id: "text".into(),
            text_stream_url: "fake://text".into(),
        }
    }

    const EVENTS: &[u8] = b"data: {\"type\":\"start\"}\n\n\
data: {\"type\":\"text-start\",\"id\":\"X\"}\n\n\
data: {\"type\":\"text-delta\",\"id\":\"X\",\"text\":\"Hi\"}\n\n\
data: {\"type\":\"text-end\",\"id\":\"X\"}\n\n\
data: {\"type\":\"finish-step\"}\n\n\
data: {\"type\":\"finish\"}\n\n";

    fn happy_source() -> FakeSource {
        FakeSource::default()
            .with(
                "fake://text",
                Body::Fragments(vec![Ok(&b"Hello\\n"[..]), Ok(&b"world"[..])]),
            )
            .with("fake://events", Body::Fragments(vec![Ok(EVENTS)]))
    }

    async fn drain(session: &mut AgentSession) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = session.next_update().await {
            updates.push(update);
        }
        updates
    }

    #[tokio::test]
    async fn blank_user_id_is_rejected_before_launching() {
        let launcher = FakeLauncher::ok();
        let mut session = AgentSession::new(Arc::new(happy_source()));
        let err = session.start(&launcher, "   ").await.expect_err("blank");
        assert!(matches!(err, SessionError::Validation(_)));
        assert!(launcher.user_ids.lock().expect("lock").is_empty());
        assert!(!session.is_consuming_text());
    }

    #[tokio::test]
    async fn start_consumes_both_streams_into_session_state() {
        let launcher = FakeLauncher::ok();
        let mut session = AgentSession::new(Arc::new(happy_source()));
        let started = session.start(&launcher, " bill ").await.expect("start");
        assert_eq!(started, urls());
        assert_eq!(*launcher.user_ids.lock().expect("lock"), vec!["bill".to_string()]);
        assert!(session.is_consuming_text());
        assert!(session.is_consuming_events());

        let updates = drain(&mut session).await;
        assert!(updates.contains(&SessionUpdate::Started(StreamKind::Text)));
        assert!(updates.contains(&SessionUpdate::Started(StreamKind::Events)));
        assert!(updates.iter().any(|u| matches!(
            u,
            SessionUpdate::StreamCompleted { stream: StreamKind::Events, total_chunks: 6, did_fatal_error: false, .. }
        )));

        assert_eq!(session.text(), "Hello\\nworld");
        assert_eq!(session.text_content().as_deref(), Some("Hello\nworld"));
        // The trailing break is dropped once the event stream completes.
        assert_eq!(session.entries().len(), 1);
        let Entry::Text(text) = &session.entries()[0] else {
            panic!("expected text entry");
        };
        assert_eq!(text.content, "Hi");
        assert!(text.completed);
        assert!(!session.is_consuming_text());
        assert!(!session.is_consuming_events());
    }

    #[tokio::test]
    async fn text_updates_arrive_in_stream_order() {
        let mut session = AgentSession::new(Arc::new(happy_source()));
        session.attach(&urls()).expect("attach");
        let fragments = drain(&mut session)
            .await
            .into_iter()
            .filter_map(|u| match u {
                SessionUpdate::TextAppended { index, fragment } => Some((index, fragment)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            fragments,
            vec![(0, "Hello\\n".to_string()), (1, "world".to_string())]
        );
    }

    #[tokio::test]
    async fn fatal_event_error_keeps_trailing_break() {
        let source = FakeSource::default()
            .with("fake://text", Body::Fragments(vec![]))
            .with(
                "fake://events",
                Body::Fragments(vec![
                    Ok(&b"data: {\"type\":\"tool-input-start\",\"id\":\"T\",\"toolName\":\"lookup\"}\n\n"[..]),
                    Ok(&b"data: {\"type\":\"finish-step\"}\n\n"[..]),
                    Err(StreamError::read("connection reset")),
                ]),
            );
        let mut session = AgentSession::new(Arc::new(source));
        session.attach(&urls()).expect("attach");
        let updates = drain(&mut session).await;

        assert!(updates.contains(&SessionUpdate::StreamError {
            stream: StreamKind::Events,
            error: StreamError::read("connection reset"),
        }));
        assert_eq!(session.entries().len(), 2);
        assert!(matches!(session.entries()[1], Entry::Break));
        let Entry::Tool(tool) = &session.entries()[0] else {
            panic!("expected tool entry");
        };
        assert_eq!(tool.status, ToolStatus::Building);
        assert_eq!(session.text_content(), None);
    }

    #[tokio::test]
    async fn missing_event_stream_reports_open_failure() {
        let source = FakeSource::default().with("fake://text", Body::Fragments(vec![]));
        let mut session = AgentSession::new(Arc::new(source));
        session.attach(&urls()).expect("attach");
        let updates = drain(&mut session).await;
        assert!(updates.iter().any(|u| matches!(
            u,
            SessionUpdate::StreamError { stream: StreamKind::Events, error: StreamError::Open { .. } }
        )));
        assert!(updates.iter().any(|u| matches!(
            u,
            SessionUpdate::StreamCompleted { stream: StreamKind::Events, did_fatal_error: true, .. }
        )));
    }

    #[tokio::test]
    async fn stop_ends_pending_streams_without_errors() {
        let source = FakeSource::default()
            .with("fake://text", Body::Pending)
            .with("fake://events", Body::Pending);
        let mut session = AgentSession::new(Arc::new(source));
        session.attach(&urls()).expect("attach");
        session.stop();
        let updates = drain(&mut session).await;
        assert!(!updates.iter().any(|u| matches!(u, SessionUpdate::StreamError { .. })));
        let completions = updates
            .iter()
            .filter(|u| matches!(u, SessionUpdate::StreamCompleted { did_fatal_error: false, .. }))
            .count();
        assert_eq!(completions, 2);
        session.wait().await;
        assert!(session.entries().is_empty());
    }

    #[tokio::test]
    async fn watch_without_text_url_consumes_events_only() {
        let mut session = AgentSession::new(Arc::new(happy_source()));
        session.watch("fake://events", None).expect("watch");
        assert!(!session.is_consuming_text());
        assert!(session.is_consuming_events());
        session.wait().await;
        assert_eq!(session.entries().len(), 1);
        assert_eq!(session.text_content(), None);
        assert!(session.urls().is_none());
    }

    #[tokio::test]
    async fn launcher_failure_leaves_session_idle() {
        let launcher = FakeLauncher {
            user_ids: Mutex::new(Vec::new()),
            result: Err(SessionError::Agent {
                message: "bucket unavailable".into(),
            }),
        };
        let mut session = AgentSession::new(Arc::new(happy_source()));
        let err = session.start(&launcher, "bill").await.expect_err("agent");
        assert!(matches!(err, SessionError::Agent { .. }));
        assert!(!session.is_consuming_events());
        assert!(session.next_update().await.is_none());
    }

    #[tokio::test]
    async fn zero_capacity_config_is_rejected_on_attach() {
        let config = SessionConfig::default().channel_capacity(0);
        let mut session = AgentSession::with_config(Arc::new(happy_source()), config);
        let err = session.attach(&urls()).expect_err("capacity");
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[tokio::test]
    async fn reset_clears_accumulated_state() {
        let mut session = AgentSession::new(Arc::new(happy_source()));
        session.attach(&urls()).expect("attach");
        session.wait().await;
        assert!(session.text_content().is_some());
        session.reset();
        assert!(session.text_content().is_none());
        assert!(session.entries().is_empty());
        assert!(session.urls().is_none());
    }
}
