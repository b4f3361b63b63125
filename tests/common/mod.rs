//! Shared fixtures: a scripted in-memory transport, a recording merger and
//! a recording lifecycle publisher.

#![allow(dead_code)]

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use submux::{
    CancellationHandle, ChangeEvent, ChangeKind, EntityType, LifecycleEvent, LifecyclePublisher,
    MergeError, Merger, ModelProvider, ModelWithMetadata, SessionToken, StreamDescriptor,
    StreamError, StreamEstablisher, StreamResponse, StreamSink, SyncMetadata,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn descriptor(entity: &str, kind: ChangeKind) -> StreamDescriptor {
    StreamDescriptor::new(EntityType::new(entity), kind)
}

pub fn record(id: &str) -> StreamResponse {
    StreamResponse::data(ModelWithMetadata {
        model: json!({ "id": id }),
        metadata: SyncMetadata {
            id: id.to_string(),
            deleted: false,
            version: 1,
            last_changed_at: 1_700_000_000_000,
        },
    })
}

pub fn wait_for<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// How a scripted stream behaves once opened.
#[derive(Clone, Debug)]
pub enum Script {
    /// Report `started` after the delay.
    StartAfter(Duration),
    /// Fail before ever starting.
    FailImmediately(StreamError),
    /// Never start on its own; tests drive the sink by hand.
    Hold,
}

/// In-memory transport driven by per-descriptor scripts.
pub struct ScriptedTransport {
    default_script: Script,
    scripts: Mutex<HashMap<StreamDescriptor, Script>>,
    sinks: Mutex<HashMap<StreamDescriptor, StreamSink>>,
    opened: Mutex<Vec<StreamDescriptor>>,
    cancelled: Arc<Mutex<Vec<StreamDescriptor>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::with_default(Script::StartAfter(Duration::ZERO))
    }

    pub fn with_default(default_script: Script) -> Self {
        Self {
            default_script,
            scripts: Mutex::new(HashMap::new()),
            sinks: Mutex::new(HashMap::new()),
            opened: Mutex::new(Vec::new()),
            cancelled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn script(self, descriptor: StreamDescriptor, script: Script) -> Self {
        self.scripts.lock().insert(descriptor, script);
        self
    }

    /// The latest sink handed out for `descriptor`, waiting for it to open.
    pub fn sink(&self, descriptor: &StreamDescriptor) -> StreamSink {
        wait_for(|| self.sinks.lock().contains_key(descriptor));
        self.sinks.lock()[descriptor].clone()
    }

    pub fn opened(&self) -> Vec<StreamDescriptor> {
        self.opened.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<StreamDescriptor> {
        self.cancelled.lock().clone()
    }
}

impl StreamEstablisher for ScriptedTransport {
    fn open(&self, descriptor: &StreamDescriptor, sink: StreamSink) -> CancellationHandle {
        self.opened.lock().push(descriptor.clone());
        self.sinks.lock().insert(descriptor.clone(), sink.clone());

        let script = self
            .scripts
            .lock()
            .get(descriptor)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        match script {
            Script::StartAfter(delay) => {
                let token = SessionToken::new(format!("sub-{}", descriptor));
                thread::spawn(move || {
                    thread::sleep(delay);
                    sink.started(token);
                });
            }
            Script::FailImmediately(error) => sink.error(error),
            Script::Hold => {}
        }

        let cancelled = Arc::clone(&self.cancelled);
        let descriptor = descriptor.clone();
        CancellationHandle::new(move || cancelled.lock().push(descriptor))
    }
}

/// Merger that records every event id it sees and fails selected ids.
#[derive(Default)]
pub struct RecordingMerger {
    seen: Mutex<Vec<String>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

impl RecordingMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl Merger for RecordingMerger {
    fn merge(&self, event: &ChangeEvent) -> Result<(), MergeError> {
        let id = event.record.metadata.id.clone();
        self.seen.lock().push(id.clone());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.failing.contains(&id) {
            return Err(MergeError::new(format!("cannot merge {}", id)));
        }
        Ok(())
    }
}

/// Publisher that keeps every lifecycle event.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }
}

impl LifecyclePublisher for RecordingPublisher {
    fn publish(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}

/// Model provider whose entity types can change between sessions.
#[derive(Default)]
pub struct MutableModels {
    entities: RwLock<Vec<EntityType>>,
}

impl MutableModels {
    pub fn new(names: &[&str]) -> Self {
        Self {
            entities: RwLock::new(names.iter().map(|n| EntityType::new(*n)).collect()),
        }
    }

    pub fn add(&self, name: &str) {
        self.entities.write().push(EntityType::new(name));
    }
}

impl ModelProvider for MutableModels {
    fn entity_types(&self) -> Vec<EntityType> {
        self.entities.read().clone()
    }
}
