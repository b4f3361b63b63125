//! Drain loop: the single consumer of a session buffer.

use crate::buffer::{BufferItem, BufferReader, EventBuffer, Terminal};
use crate::error::{MergeError, Result};
use crate::types::ChangeEvent;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Applies a remote change to local storage.
///
/// Called once per buffered event, strictly sequentially: the next call
/// starts only after the previous one returned.
pub trait Merger: Send + Sync {
    fn merge(&self, event: &ChangeEvent) -> std::result::Result<(), MergeError>;
}

impl<F> Merger for F
where
    F: Fn(&ChangeEvent) -> std::result::Result<(), MergeError> + Send + Sync,
{
    fn merge(&self, event: &ChangeEvent) -> std::result::Result<(), MergeError> {
        self(event)
    }
}

/// Callback invoked once when the buffer terminates under an attached drain.
pub type PipelineBroken = Box<dyn FnOnce(Terminal) + Send>;

/// Why a drain loop stopped.
#[derive(Clone, Debug, PartialEq)]
pub enum DrainEnd {
    /// The buffer terminated; the pipeline-broken callback ran.
    Broken(Terminal),
    /// The loop was detached by a stop.
    Detached,
}

/// Summary returned when a drain loop exits.
#[derive(Clone, Debug, PartialEq)]
pub struct DrainReport {
    pub merged: usize,
    pub failed: usize,
    pub end: DrainEnd,
}

/// Handle to a running drain loop.
pub struct DrainHandle {
    buffer: Arc<EventBuffer>,
    thread: Option<JoinHandle<DrainReport>>,
}

impl DrainHandle {
    /// Stop the loop without invoking the pipeline-broken callback.
    ///
    /// Does not wait: a merge in flight finishes on the drain thread and
    /// the loop exits right after it.
    pub fn detach(&self) {
        self.buffer.detach_reader();
    }

    /// Whether the drain thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the loop to exit. `None` if the drain thread panicked.
    pub fn join(mut self) -> Option<DrainReport> {
        self.thread.take().and_then(|t| t.join().ok())
    }
}

/// Sequentially merges every event of one buffer session.
pub struct DrainLoop {
    reader: BufferReader,
    merger: Arc<dyn Merger>,
    on_broken: Option<PipelineBroken>,
    merged: usize,
    failed: usize,
}

impl DrainLoop {
    pub fn new(reader: BufferReader, merger: Arc<dyn Merger>, on_broken: PipelineBroken) -> Self {
        Self {
            reader,
            merger,
            on_broken: Some(on_broken),
            merged: 0,
            failed: 0,
        }
    }

    /// Run the loop on a named thread.
    pub fn spawn(self, name: String) -> Result<DrainHandle> {
        let buffer = Arc::clone(self.reader.buffer());
        let thread = thread::Builder::new().name(name).spawn(move || self.run())?;
        Ok(DrainHandle {
            buffer,
            thread: Some(thread),
        })
    }

    /// Run the loop on the current thread until the buffer terminates or
    /// the reader is detached.
    pub fn run(mut self) -> DrainReport {
        info!("Starting processing subscription data buffer");
        let end = loop {
            match self.reader.next() {
                BufferItem::Event(event) => self.merge(&event),
                BufferItem::Terminated(terminal) => {
                    match &terminal {
                        Terminal::Failed { stream, error } => {
                            warn!(stream = %stream, error = %error, "Reading subscriptions buffer has failed")
                        }
                        Terminal::Completed => warn!("Reading from subscriptions buffer is completed"),
                    }
                    if let Some(on_broken) = self.on_broken.take() {
                        on_broken(terminal.clone());
                    }
                    break DrainEnd::Broken(terminal);
                }
                BufferItem::Detached => {
                    debug!("Drain loop detached from subscriptions buffer");
                    break DrainEnd::Detached;
                }
            }
        };

        let report = DrainReport {
            merged: self.merged,
            failed: self.failed,
            end,
        };
        // Dropping the reader releases the buffer.
        drop(self.reader);
        report
    }

    fn merge(&mut self, event: &ChangeEvent) {
        match self.merger.merge(event) {
            Ok(()) => self.merged += 1,
            Err(error) => {
                self.failed += 1;
                warn!(
                    entity = %event.entity,
                    kind = %event.kind,
                    id = %event.record.metadata.id,
                    error = %error,
                    "Failed to merge subscription event, skipping"
                );
            }
        }
    }
}
