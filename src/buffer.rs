//! Ordered, replayable event buffer for one session.
//!
//! Producers append; a single reader walks the log from the beginning with
//! its own cursor, so a reader attaching late still sees every event of the
//! session followed by the terminal signal, if any.

use crate::error::{MuxError, Result, StreamError};
use crate::types::{ChangeEvent, StreamDescriptor};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// The single terminal signal of a session buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Terminal {
    /// A stream failed; the first failure wins.
    Failed {
        stream: StreamDescriptor,
        error: StreamError,
    },
    /// The session ended normally.
    Completed,
}

/// What a reader observes next.
#[derive(Clone, Debug, PartialEq)]
pub enum BufferItem {
    Event(ChangeEvent),
    Terminated(Terminal),
    /// The reader was detached from the buffer.
    Detached,
}

struct BufferState {
    events: Vec<ChangeEvent>,
    terminal: Option<Terminal>,
    reader_attached: bool,
    /// Bumped on every detach so a stale reader can tell it was cut off.
    reader_generation: u64,
}

/// Append-only log of change events with at most one terminal signal.
pub struct EventBuffer {
    state: Mutex<BufferState>,
    condvar: Condvar,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                events: Vec::new(),
                terminal: None,
                reader_attached: false,
                reader_generation: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Append an event. Returns `false` if the buffer is already terminated.
    pub fn push(&self, event: ChangeEvent) -> bool {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return false;
        }
        state.events.push(event);
        self.condvar.notify_all();
        true
    }

    /// Terminate with an error. Returns `false` if already terminated.
    pub fn fail(&self, stream: StreamDescriptor, error: StreamError) -> bool {
        self.terminate(Terminal::Failed { stream, error })
    }

    /// Terminate normally. Returns `false` if already terminated.
    pub fn complete(&self) -> bool {
        self.terminate(Terminal::Completed)
    }

    fn terminate(&self, terminal: Terminal) -> bool {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return false;
        }
        state.terminal = Some(terminal);
        self.condvar.notify_all();
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminal.is_some()
    }

    pub fn terminal(&self) -> Option<Terminal> {
        self.state.lock().terminal.clone()
    }

    /// Number of events retained.
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every event pushed so far.
    pub fn snapshot(&self) -> Vec<ChangeEvent> {
        self.state.lock().events.clone()
    }

    /// Attach the single reader, positioned at the start of the session.
    pub fn attach(self: &Arc<Self>) -> Result<BufferReader> {
        let mut state = self.state.lock();
        if state.reader_attached {
            return Err(MuxError::ReaderAttached);
        }
        state.reader_attached = true;
        Ok(BufferReader {
            buffer: Arc::clone(self),
            position: 0,
            generation: state.reader_generation,
        })
    }

    /// Cut off the current reader. Its next (or pending) read returns
    /// [`BufferItem::Detached`].
    pub fn detach_reader(&self) {
        let mut state = self.state.lock();
        if state.reader_attached {
            state.reader_attached = false;
            state.reader_generation += 1;
            self.condvar.notify_all();
        }
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential cursor over an [`EventBuffer`].
pub struct BufferReader {
    buffer: Arc<EventBuffer>,
    position: usize,
    generation: u64,
}

impl BufferReader {
    /// Block until the next event, the terminal signal, or detachment.
    ///
    /// After the terminal signal has been returned once, further calls
    /// return it again.
    pub fn next(&mut self) -> BufferItem {
        let mut state = self.buffer.state.lock();
        loop {
            if state.reader_generation != self.generation {
                return BufferItem::Detached;
            }
            if let Some(event) = state.events.get(self.position) {
                self.position += 1;
                return BufferItem::Event(event.clone());
            }
            if let Some(terminal) = &state.terminal {
                return BufferItem::Terminated(terminal.clone());
            }
            self.buffer.condvar.wait(&mut state);
        }
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    /// Events consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Release this reader's claim on the buffer.
    pub fn detach(self) {
        // Drop does the work.
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        let mut state = self.buffer.state.lock();
        if state.reader_attached && state.reader_generation == self.generation {
            state.reader_attached = false;
            state.reader_generation += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, EntityType, ModelWithMetadata, SyncMetadata};
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    fn event(id: &str) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::Create,
            entity: EntityType::new("Post"),
            record: ModelWithMetadata {
                model: json!({ "id": id }),
                metadata: SyncMetadata {
                    id: id.to_string(),
                    deleted: false,
                    version: 1,
                    last_changed_at: 0,
                },
            },
        }
    }

    fn id_of(item: BufferItem) -> String {
        match item {
            BufferItem::Event(e) => e.record.metadata.id,
            other => panic!("Expected event, got {:?}", other),
        }
    }

    fn descriptor() -> StreamDescriptor {
        StreamDescriptor::new(EntityType::new("Post"), ChangeKind::Create)
    }

    #[test]
    fn test_late_reader_replays_history() {
        let buffer = Arc::new(EventBuffer::new());
        buffer.push(event("1"));
        buffer.push(event("2"));

        let mut reader = buffer.attach().unwrap();
        assert_eq!(id_of(reader.next()), "1");
        assert_eq!(id_of(reader.next()), "2");

        buffer.push(event("3"));
        assert_eq!(id_of(reader.next()), "3");
        assert_eq!(reader.position(), 3);
    }

    #[test]
    fn test_reader_after_termination_sees_history_then_terminal() {
        let buffer = Arc::new(EventBuffer::new());
        buffer.push(event("1"));
        buffer.complete();

        let mut reader = buffer.attach().unwrap();
        assert_eq!(id_of(reader.next()), "1");
        assert_eq!(reader.next(), BufferItem::Terminated(Terminal::Completed));
    }

    #[test]
    fn test_single_terminal_signal() {
        let buffer = EventBuffer::new();
        assert!(buffer.fail(descriptor(), StreamError::Connection("first".into())));
        assert!(!buffer.fail(descriptor(), StreamError::Connection("second".into())));
        assert!(!buffer.complete());
        assert!(!buffer.push(event("late")));

        assert!(buffer.is_empty());
        match buffer.terminal() {
            Some(Terminal::Failed { error, .. }) => {
                assert_eq!(error, StreamError::Connection("first".into()))
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_single_reader() {
        let buffer = Arc::new(EventBuffer::new());
        let reader = buffer.attach().unwrap();
        assert!(matches!(buffer.attach(), Err(MuxError::ReaderAttached)));

        reader.detach();
        assert!(buffer.attach().is_ok());
    }

    #[test]
    fn test_detach_wakes_blocked_reader() {
        let buffer = Arc::new(EventBuffer::new());
        let mut reader = buffer.attach().unwrap();

        let blocked = thread::spawn(move || reader.next());
        thread::sleep(Duration::from_millis(20));
        buffer.detach_reader();

        assert_eq!(blocked.join().unwrap(), BufferItem::Detached);
    }

    #[test]
    fn test_reader_wakes_on_push() {
        let buffer = Arc::new(EventBuffer::new());
        let mut reader = buffer.attach().unwrap();

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                buffer.push(event("x"));
            })
        };

        assert_eq!(id_of(reader.next()), "x");
        producer.join().unwrap();
    }
}
