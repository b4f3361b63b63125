//! The transport capability that opens remote streams.

use crate::error::StreamError;
use crate::types::{ChangeKind, StreamDescriptor};

use super::handle::CancellationHandle;
use super::sink::StreamSink;

/// Opens one remote change stream per descriptor.
///
/// Implementations report progress through the [`StreamSink`]: `started`
/// once the stream is live, `event` per delivery, then at most one of
/// `error` or `complete`. The returned handle must release the remote
/// resource when cancelled.
///
/// `open` may block while connecting; each descriptor is opened on its own
/// thread.
pub trait StreamEstablisher: Send + Sync {
    fn open(&self, descriptor: &StreamDescriptor, sink: StreamSink) -> CancellationHandle;
}

/// Routes each descriptor to the establisher registered for its change kind.
#[derive(Default)]
pub struct KindEstablishers {
    create: Option<Box<dyn StreamEstablisher>>,
    update: Option<Box<dyn StreamEstablisher>>,
    delete: Option<Box<dyn StreamEstablisher>>,
}

impl KindEstablishers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create(mut self, establisher: impl StreamEstablisher + 'static) -> Self {
        self.create = Some(Box::new(establisher));
        self
    }

    pub fn on_update(mut self, establisher: impl StreamEstablisher + 'static) -> Self {
        self.update = Some(Box::new(establisher));
        self
    }

    pub fn on_delete(mut self, establisher: impl StreamEstablisher + 'static) -> Self {
        self.delete = Some(Box::new(establisher));
        self
    }

    fn route(&self, kind: ChangeKind) -> Option<&dyn StreamEstablisher> {
        match kind {
            ChangeKind::Create => self.create.as_deref(),
            ChangeKind::Update => self.update.as_deref(),
            ChangeKind::Delete => self.delete.as_deref(),
        }
    }
}

impl StreamEstablisher for KindEstablishers {
    fn open(&self, descriptor: &StreamDescriptor, sink: StreamSink) -> CancellationHandle {
        match self.route(descriptor.kind) {
            Some(establisher) => establisher.open(descriptor, sink),
            None => {
                sink.error(StreamError::UnsupportedKind(descriptor.kind.to_string()));
                CancellationHandle::noop()
            }
        }
    }
}
