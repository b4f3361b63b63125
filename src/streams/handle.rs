//! Cancellation handles for remote streams.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::sink::StreamSink;

type CancelFn = Box<dyn FnOnce() + Send>;

struct HandleInner {
    cancelled: AtomicBool,
    on_cancel: Mutex<Option<CancelFn>>,
}

/// Releases one remote stream.
///
/// Cloning shares the same underlying handle. The release callback runs
/// exactly once no matter how many times or from how many threads
/// [`cancel`](Self::cancel) is called.
#[derive(Clone)]
pub struct CancellationHandle {
    inner: Arc<HandleInner>,
}

impl CancellationHandle {
    /// Wrap a release callback (e.g. closing a connection).
    pub fn new<F>(on_cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(HandleInner {
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(Some(Box::new(on_cancel))),
            }),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    /// Release the remote resource. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Take the callback out before running it so the lock isn't held
        // while the transport tears down.
        let on_cancel = self.inner.on_cancel.lock().take();
        if let Some(on_cancel) = on_cancel {
            on_cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CancellationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A live stream: its sink (to silence callbacks) and its handle.
struct Registration {
    sink: StreamSink,
    handle: CancellationHandle,
}

impl Registration {
    fn cancel(self) {
        self.sink.close();
        self.handle.cancel();
    }
}

#[derive(Default)]
struct HandleSetInner {
    live: HashMap<usize, Registration>,
    /// Streams cancelled before their handle was registered.
    revoked: HashSet<usize>,
    closed: bool,
}

/// The cancellation handles owned by one session, keyed by stream index.
#[derive(Clone, Default)]
pub struct HandleSet {
    inner: Arc<Mutex<HandleSetInner>>,
}

impl HandleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the handle of a freshly opened stream.
    ///
    /// If the set was already cancelled (the session stopped while the
    /// stream was still opening), or this stream was, the stream is
    /// cancelled on the spot and `false` is returned.
    pub fn register(&self, index: usize, sink: StreamSink, handle: CancellationHandle) -> bool {
        let registration = Registration { sink, handle };
        let mut inner = self.inner.lock();
        if inner.closed || inner.revoked.remove(&index) {
            drop(inner);
            registration.cancel();
            return false;
        }
        let previous = inner.live.insert(index, registration);
        drop(inner);
        if let Some(previous) = previous {
            previous.cancel();
        }
        true
    }

    /// Cancel a single stream and forget its handle.
    pub fn cancel(&self, index: usize) {
        let registration = {
            let mut inner = self.inner.lock();
            let registration = inner.live.remove(&index);
            if registration.is_none() {
                inner.revoked.insert(index);
            }
            registration
        };
        if let Some(registration) = registration {
            registration.cancel();
        }
    }

    /// Cancel every live stream. Later registrations are cancelled on arrival.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Registration> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.live.drain().map(|(_, r)| r).collect()
        };
        let count = drained.len();
        for registration in drained {
            registration.cancel();
        }
        count
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
