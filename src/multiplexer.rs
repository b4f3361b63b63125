//! Multiplexer controller tying streams, buffer and drain together.

use crate::barrier::BarrierOutcome;
use crate::buffer::{EventBuffer, Terminal};
use crate::drain::{DrainHandle, DrainLoop, Merger};
use crate::error::{MuxError, Result};
use crate::fanin::FanIn;
use crate::streams::StreamEstablisher;
use crate::types::{ChangeKind, EntityType, SessionId, StreamDescriptor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Multiplexer configuration.
#[derive(Clone, Debug)]
pub struct MultiplexerConfig {
    /// Upper bound on how long `start` waits for every stream to start.
    pub start_timeout: Duration,

    /// Prefix for the names of worker threads.
    pub thread_name_prefix: String,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(10),
            thread_name_prefix: "submux".to_string(),
        }
    }
}

/// Source of the entity types to subscribe to. Consulted on every start.
pub trait ModelProvider: Send + Sync {
    fn entity_types(&self) -> Vec<EntityType>;
}

impl ModelProvider for Vec<EntityType> {
    fn entity_types(&self) -> Vec<EntityType> {
        self.clone()
    }
}

/// Lifecycle notifications published by the multiplexer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Every stream of the session started (or failed) in time.
    SubscriptionsEstablished { session: SessionId, streams: usize },
    /// The start wait gave up; the session keeps running degraded.
    StartTimedOut { session: SessionId, pending: usize },
}

/// Receives [`LifecycleEvent`]s, e.g. to forward them to an event bus.
pub trait LifecyclePublisher: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// Publisher that discards everything.
pub struct NoopPublisher;

impl LifecyclePublisher for NoopPublisher {
    fn publish(&self, _event: LifecycleEvent) {}
}

/// Result of a successful [`Multiplexer::start`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Established,
    /// Some streams had not started when the timeout elapsed. They keep
    /// trying and still feed the buffer if they start later.
    TimedOut { pending: usize },
}

/// Lifecycle state of a [`Multiplexer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MultiplexerState {
    Idle,
    Starting,
    Started,
    Draining,
    Stopped,
}

/// One start/stop cycle.
struct Session {
    id: SessionId,
    buffer: Arc<EventBuffer>,
    fan_in: FanIn,
    drain: Option<DrainHandle>,
}

struct Inner {
    state: MultiplexerState,
    session: Option<Session>,
}

/// Fans every (entity type, change kind) stream into one ordered buffer
/// and drains it through a [`Merger`].
///
/// `start` and `stop` are serialized; every start builds a fresh buffer
/// and re-reads the entity types from the [`ModelProvider`].
pub struct Multiplexer {
    config: MultiplexerConfig,
    establisher: Arc<dyn StreamEstablisher>,
    models: Arc<dyn ModelProvider>,
    merger: Arc<dyn Merger>,
    publisher: Arc<dyn LifecyclePublisher>,
    /// Held for the whole of `start` and `stop`.
    lifecycle: Mutex<()>,
    inner: Mutex<Inner>,
    next_session: AtomicU64,
}

impl Multiplexer {
    pub fn new(
        config: MultiplexerConfig,
        establisher: Arc<dyn StreamEstablisher>,
        models: Arc<dyn ModelProvider>,
        merger: Arc<dyn Merger>,
    ) -> Self {
        Self {
            config,
            establisher,
            models,
            merger,
            publisher: Arc::new(NoopPublisher),
            lifecycle: Mutex::new(()),
            inner: Mutex::new(Inner {
                state: MultiplexerState::Idle,
                session: None,
            }),
            next_session: AtomicU64::new(1),
        }
    }

    /// Publish lifecycle notifications to `publisher`.
    pub fn with_publisher(mut self, publisher: Arc<dyn LifecyclePublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn config(&self) -> &MultiplexerConfig {
        &self.config
    }

    /// Open every stream and wait, bounded by the start timeout, for all
    /// of them to start or fail.
    ///
    /// Stream failures never surface here; they terminate the session
    /// buffer and reach the pipeline-broken callback once draining.
    pub fn start(&self) -> Result<StartOutcome> {
        let _lifecycle = self.lifecycle.lock();

        let previous = {
            let mut inner = self.inner.lock();
            if let Some(session) = &inner.session {
                return Err(MuxError::AlreadyStarted(session.id.0));
            }
            std::mem::replace(&mut inner.state, MultiplexerState::Starting)
        };

        let session = SessionId(self.next_session.fetch_add(1, Ordering::SeqCst));
        let entities = self.models.entity_types();
        let descriptors = StreamDescriptor::product(&entities);
        let streams = descriptors.len();
        let buffer = Arc::new(EventBuffer::new());

        let fan_in = match FanIn::spawn(
            session,
            descriptors,
            Arc::clone(&self.establisher),
            Arc::clone(&buffer),
            &self.config.thread_name_prefix,
        ) {
            Ok(fan_in) => fan_in,
            Err(e) => {
                self.inner.lock().state = previous;
                return Err(e);
            }
        };
        let barrier = Arc::clone(fan_in.barrier());

        self.inner.lock().session = Some(Session {
            id: session,
            buffer,
            fan_in,
            drain: None,
        });

        debug!(session = %session, streams, "Waiting for subscriptions to start");
        let outcome = match barrier.wait_timeout(self.config.start_timeout) {
            BarrierOutcome::Resolved => {
                self.publisher
                    .publish(LifecycleEvent::SubscriptionsEstablished { session, streams });
                info!(
                    session = %session,
                    models = ?entities,
                    kinds = ?ChangeKind::ALL,
                    "Began buffering subscription events for remote mutations"
                );
                StartOutcome::Established
            }
            BarrierOutcome::TimedOut { pending } => {
                warn!(
                    session = %session,
                    pending,
                    "Subscription processor failed to start within the expected timeout"
                );
                self.publisher
                    .publish(LifecycleEvent::StartTimedOut { session, pending });
                StartOutcome::TimedOut { pending }
            }
        };

        // A drain attached while waiting already moved the state on.
        let mut inner = self.inner.lock();
        if inner.state == MultiplexerState::Starting {
            inner.state = MultiplexerState::Started;
        }
        Ok(outcome)
    }

    /// Attach the drain loop to the current session's buffer.
    ///
    /// `on_broken` runs once if the buffer fails or completes while
    /// draining. It does not run when `stop` detaches the loop.
    pub fn drain<F>(&self, on_broken: F) -> Result<()>
    where
        F: FnOnce(Terminal) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        let session = inner.session.as_mut().ok_or(MuxError::NotStarted)?;
        if session.drain.is_some() {
            return Err(MuxError::AlreadyDraining(session.id.0));
        }

        let reader = session.buffer.attach()?;
        let name = format!("{}-drain-{}", self.config.thread_name_prefix, session.id);
        let handle =
            DrainLoop::new(reader, Arc::clone(&self.merger), Box::new(on_broken)).spawn(name)?;
        session.drain = Some(handle);
        inner.state = MultiplexerState::Draining;
        Ok(())
    }

    /// Cancel every stream, detach the drain loop and discard the session.
    ///
    /// Returns promptly: a merge in flight finishes on the drain thread
    /// but its loop exits without invoking the pipeline-broken callback.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        info!("Stopping subscription processor");

        let session = {
            let mut inner = self.inner.lock();
            inner.state = MultiplexerState::Stopped;
            inner.session.take()
        };

        if let Some(session) = session {
            if let Some(drain) = &session.drain {
                drain.detach();
            }
            let cancelled = session.fan_in.shutdown();
            session.buffer.complete();
            debug!(session = %session.id, cancelled, "Session discarded");
        }

        info!("Stopped subscription processor");
    }

    pub fn state(&self) -> MultiplexerState {
        self.inner.lock().state
    }

    /// Id of the live session, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.lock().session.as_ref().map(|s| s.id)
    }

    /// Events retained by the live session's buffer.
    pub fn buffered_len(&self) -> usize {
        self.inner
            .lock()
            .session
            .as_ref()
            .map_or(0, |s| s.buffer.len())
    }

    /// Streams of the live session that have not yet started or failed.
    pub fn pending_streams(&self) -> usize {
        self.inner
            .lock()
            .session
            .as_ref()
            .map_or(0, |s| s.fan_in.barrier().remaining())
    }

    /// Cancellation handles held by the live session.
    pub fn live_streams(&self) -> usize {
        self.inner
            .lock()
            .session
            .as_ref()
            .map_or(0, |s| s.fan_in.handles().len())
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        if self.inner.get_mut().session.is_some() {
            self.stop();
        }
    }
}
