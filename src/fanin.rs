//! Fan-in: opens every stream of a session concurrently and routes their
//! signals into the session buffer.
//!
//! Every [`StreamSink`] feeds one unbounded channel. A single router thread
//! drains it, so the order signals arrive on the channel is the order
//! events land in the buffer. The router also owns the per-stream
//! bookkeeping:
//! - the first `started` or failure of a stream resolves the start barrier;
//! - the first failure of any stream terminates the buffer and releases
//!   every stream of the session, later failures are suppressed;
//! - a stream that completes is released, and the buffer completes once
//!   every stream has completed (immediately for a session without streams).

use crate::barrier::{BarrierOutcome, StartBarrier};
use crate::buffer::EventBuffer;
use crate::error::{Result, StreamError};
use crate::streams::{HandleSet, SignalKind, StreamEstablisher, StreamSignal, StreamSink};
use crate::types::{ChangeEvent, SessionId, StreamDescriptor};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The running streams of one session.
pub struct FanIn {
    session: SessionId,
    streams: usize,
    barrier: Arc<StartBarrier>,
    handles: HandleSet,
    shutdown: Option<Sender<()>>,
    router: Option<JoinHandle<()>>,
}

impl FanIn {
    /// Open one stream per descriptor, each on its own thread, routing into
    /// `buffer`. Returns as soon as the open calls are dispatched.
    pub fn spawn(
        session: SessionId,
        descriptors: Vec<StreamDescriptor>,
        establisher: Arc<dyn StreamEstablisher>,
        buffer: Arc<EventBuffer>,
        thread_prefix: &str,
    ) -> Result<Self> {
        let streams = descriptors.len();
        let barrier = Arc::new(StartBarrier::new(streams));
        let handles = HandleSet::new();
        let (signal_tx, signal_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded();

        if streams == 0 && buffer.complete() {
            info!(session = %session, "No subscriptions to open, session completed");
        }

        let router = Router {
            session,
            finished: vec![false; streams],
            completed: 0,
            descriptors: descriptors.clone(),
            barrier: Arc::clone(&barrier),
            buffer,
            handles: handles.clone(),
        };
        let router = thread::Builder::new()
            .name(format!("{}-router-{}", thread_prefix, session))
            .spawn(move || router.run(signal_rx, shutdown_rx))?;

        for (index, descriptor) in descriptors.into_iter().enumerate() {
            let sink = StreamSink::new(index, descriptor.clone(), signal_tx.clone());
            Self::open_stream(
                index,
                descriptor,
                sink,
                Arc::clone(&establisher),
                handles.clone(),
                thread_prefix,
            );
        }

        Ok(Self {
            session,
            streams,
            barrier,
            handles,
            shutdown: Some(shutdown_tx),
            router: Some(router),
        })
    }

    fn open_stream(
        index: usize,
        descriptor: StreamDescriptor,
        sink: StreamSink,
        establisher: Arc<dyn StreamEstablisher>,
        handles: HandleSet,
        thread_prefix: &str,
    ) {
        let failure_sink = sink.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-open-{}", thread_prefix, index))
            .spawn(move || {
                let handle = establisher.open(&descriptor, sink.clone());
                if !handles.register(index, sink, handle) {
                    debug!(stream = %descriptor, "Stream opened after session stop, cancelled");
                }
            });
        if let Err(e) = spawned {
            failure_sink.error(StreamError::Connection(format!(
                "failed to spawn establish thread: {}",
                e
            )));
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Number of streams in this session.
    pub fn streams(&self) -> usize {
        self.streams
    }

    pub fn barrier(&self) -> &Arc<StartBarrier> {
        &self.barrier
    }

    pub fn handles(&self) -> &HandleSet {
        &self.handles
    }

    /// Block until every stream started or failed, or `timeout` elapsed.
    /// Streams still pending on timeout keep running.
    pub fn wait_started(&self, timeout: Duration) -> BarrierOutcome {
        self.barrier.wait_timeout(timeout)
    }

    /// Cancel every stream and stop the router. Returns the number of
    /// handles cancelled.
    pub fn shutdown(mut self) -> usize {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> usize {
        let cancelled = self.handles.cancel_all();
        // Dropping the sender disconnects the router's shutdown arm.
        self.shutdown.take();
        if let Some(router) = self.router.take() {
            if router.join().is_err() {
                warn!(session = %self.session, "Subscription router panicked");
            }
        }
        cancelled
    }
}

impl Drop for FanIn {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

struct Router {
    session: SessionId,
    descriptors: Vec<StreamDescriptor>,
    /// Streams that have failed or completed.
    finished: Vec<bool>,
    completed: usize,
    barrier: Arc<StartBarrier>,
    buffer: Arc<EventBuffer>,
    handles: HandleSet,
}

impl Router {
    fn run(mut self, signals: Receiver<StreamSignal>, shutdown: Receiver<()>) {
        loop {
            select! {
                recv(signals) -> signal => match signal {
                    Ok(signal) => self.route(signal),
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
            }
        }
        debug!(session = %self.session, "Subscription router stopped");
    }

    fn route(&mut self, signal: StreamSignal) {
        let index = signal.index;
        if self.finished.get(index).copied().unwrap_or(true) {
            return;
        }

        match signal.kind {
            SignalKind::Started(_) => {
                self.barrier.resolve(index);
            }
            SignalKind::Response(response) => match response.into_record() {
                Ok(record) => {
                    let event = ChangeEvent::new(&self.descriptors[index], record);
                    if !self.buffer.push(event) {
                        debug!(stream = %self.descriptors[index], "Buffer terminated, dropping event");
                    }
                }
                Err(error) => self.fail(index, error),
            },
            SignalKind::Failed(error) => self.fail(index, error),
            SignalKind::Completed => {
                self.finished[index] = true;
                self.completed += 1;
                self.handles.cancel(index);
                debug!(stream = %self.descriptors[index], "Subscription completed");
                if self.completed == self.descriptors.len() && self.buffer.complete() {
                    info!(session = %self.session, "All subscriptions completed");
                }
            }
        }
    }

    fn fail(&mut self, index: usize, error: StreamError) {
        self.finished[index] = true;
        self.handles.cancel(index);
        let descriptor = &self.descriptors[index];
        warn!(
            entity = %descriptor.entity,
            kind = %descriptor.kind,
            error = %error,
            "An error occurred on the remote subscription"
        );

        if self.barrier.resolve(index) {
            debug!(stream = %descriptor, "Releasing start barrier due to an error");
        }
        if !self.buffer.fail(descriptor.clone(), error) {
            debug!(stream = %descriptor, "Buffer already terminated, suppressing error");
            return;
        }

        // The session is dead: release the siblings and stop waiting on them.
        let released = self.handles.cancel_all();
        for other in 0..self.descriptors.len() {
            self.barrier.resolve(other);
        }
        debug!(session = %self.session, released, "Released remaining subscriptions after failure");
    }
}
