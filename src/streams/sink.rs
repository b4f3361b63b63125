//! The callback surface a transport drives for one remote stream.

use crate::error::StreamError;
use crate::types::{SessionToken, StreamDescriptor, StreamResponse};
use crossbeam_channel::Sender;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened on a stream.
#[derive(Debug)]
pub enum SignalKind {
    Started(SessionToken),
    Response(StreamResponse),
    Failed(StreamError),
    Completed,
}

/// A sink call, tagged with the stream it came from.
#[derive(Debug)]
pub struct StreamSignal {
    pub index: usize,
    pub kind: SignalKind,
}

struct SinkState {
    started: AtomicBool,
    terminated: AtomicBool,
    closed: AtomicBool,
}

/// Handed to a [`StreamEstablisher`](super::StreamEstablisher) for one
/// descriptor.
///
/// The sink enforces the stream contract so a misbehaving transport
/// cannot corrupt the session:
/// - `started` takes effect at most once;
/// - `event` is only forwarded after `started`;
/// - at most one of `error` / `complete` takes effect;
/// - nothing is forwarded once the stream is cancelled.
///
/// Clones share the same state and may be moved to transport threads.
#[derive(Clone)]
pub struct StreamSink {
    index: usize,
    descriptor: Arc<StreamDescriptor>,
    tx: Sender<StreamSignal>,
    state: Arc<SinkState>,
}

impl StreamSink {
    pub(crate) fn new(index: usize, descriptor: StreamDescriptor, tx: Sender<StreamSignal>) -> Self {
        Self {
            index,
            descriptor: Arc::new(descriptor),
            tx,
            state: Arc::new(SinkState {
                started: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The descriptor this sink belongs to.
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// The remote stream is confirmed live.
    pub fn started(&self, token: SessionToken) {
        if self.is_silenced() || self.state.started.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(stream = %self.descriptor, token = %token, "Subscription started");
        self.send(SignalKind::Started(token));
    }

    /// A delivery arrived on the remote stream.
    pub fn event(&self, response: StreamResponse) {
        if self.is_silenced() {
            return;
        }
        if !self.state.started.load(Ordering::SeqCst) {
            warn!(stream = %self.descriptor, "Dropping delivery received before subscription start");
            return;
        }
        self.send(SignalKind::Response(response));
    }

    /// The remote stream failed.
    pub fn error(&self, error: StreamError) {
        if self.is_silenced() || self.state.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.send(SignalKind::Failed(error));
    }

    /// The remote stream ended normally.
    pub fn complete(&self) {
        if self.is_silenced() || self.state.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.send(SignalKind::Completed);
    }

    /// Whether further calls on this sink are ignored.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    fn is_silenced(&self) -> bool {
        self.is_closed() || self.state.terminated.load(Ordering::SeqCst)
    }

    fn send(&self, kind: SignalKind) {
        // The router is gone once the session stops; late signals are moot.
        let _ = self.tx.send(StreamSignal {
            index: self.index,
            kind,
        });
    }
}

impl fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSink")
            .field("index", &self.index)
            .field("descriptor", &self.descriptor)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, EntityType};
    use crossbeam_channel::{unbounded, Receiver};

    fn sink() -> (StreamSink, Receiver<StreamSignal>) {
        let (tx, rx) = unbounded();
        let descriptor = StreamDescriptor::new(EntityType::new("Post"), ChangeKind::Update);
        (StreamSink::new(7, descriptor, tx), rx)
    }

    fn drain(rx: &Receiver<StreamSignal>) -> Vec<SignalKind> {
        rx.try_iter().map(|s| s.kind).collect()
    }

    #[test]
    fn test_started_at_most_once() {
        let (sink, rx) = sink();
        sink.started(SessionToken::new("a"));
        sink.started(SessionToken::new("b"));

        let signals = rx.try_iter().collect::<Vec<_>>();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].index, 7);
        assert!(matches!(&signals[0].kind, SignalKind::Started(t) if t.0 == "a"));
    }

    #[test]
    fn test_event_before_start_is_dropped() {
        let (sink, rx) = sink();
        sink.event(StreamResponse::default());
        assert!(drain(&rx).is_empty());

        sink.started(SessionToken::new("a"));
        sink.event(StreamResponse::default());
        let signals = drain(&rx);
        assert_eq!(signals.len(), 2);
        assert!(matches!(signals[1], SignalKind::Response(_)));
    }

    #[test]
    fn test_single_terminal_signal() {
        let (sink, rx) = sink();
        sink.started(SessionToken::new("a"));
        sink.error(StreamError::Connection("reset".into()));
        sink.complete();
        sink.error(StreamError::Connection("again".into()));
        sink.event(StreamResponse::default());

        let signals = drain(&rx);
        assert_eq!(signals.len(), 2);
        assert!(matches!(&signals[1], SignalKind::Failed(StreamError::Connection(m)) if m == "reset"));
    }

    #[test]
    fn test_error_before_start_is_forwarded() {
        let (sink, rx) = sink();
        sink.error(StreamError::Connection("refused".into()));
        let signals = drain(&rx);
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0], SignalKind::Failed(_)));
    }

    #[test]
    fn test_closed_sink_is_silent() {
        let (sink, rx) = sink();
        sink.close();
        sink.started(SessionToken::new("a"));
        sink.complete();
        assert!(drain(&rx).is_empty());
    }
}
