//! Core value types: descriptors, change events and their payloads.

use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a synchronized entity type (a model).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityType(pub String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        EntityType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityType({})", self.0)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of remote change a stream carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    /// The fixed set of change kinds, in subscription order.
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Create, ChangeKind::Update, ChangeKind::Delete];

    pub fn name(self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies one subscription: an entity type plus a change kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub entity: EntityType,
    pub kind: ChangeKind,
}

impl StreamDescriptor {
    pub fn new(entity: EntityType, kind: ChangeKind) -> Self {
        Self { entity, kind }
    }

    /// Cartesian product of the given entity types with every change kind.
    pub fn product(entities: &[EntityType]) -> Vec<StreamDescriptor> {
        entities
            .iter()
            .flat_map(|entity| {
                ChangeKind::ALL
                    .iter()
                    .map(move |kind| StreamDescriptor::new(entity.clone(), *kind))
            })
            .collect()
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.kind)
    }
}

/// Sync metadata attached to every remote record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Identifier of the record this metadata describes.
    pub id: String,
    /// Whether the record has been deleted remotely.
    #[serde(default)]
    pub deleted: bool,
    /// Remote version counter.
    pub version: u64,
    /// Milliseconds since Unix epoch of the last remote change.
    pub last_changed_at: i64,
}

/// A decoded remote record plus its sync metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelWithMetadata {
    pub model: serde_json::Value,
    pub metadata: SyncMetadata,
}

/// One decoded delivery on a remote stream, as handed over by the transport.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamResponse {
    pub data: Option<ModelWithMetadata>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl StreamResponse {
    /// Response carrying a record and no errors.
    pub fn data(record: ModelWithMetadata) -> Self {
        Self {
            data: Some(record),
            errors: Vec::new(),
        }
    }

    /// Response carrying only remote errors.
    pub fn errors(errors: Vec<String>) -> Self {
        Self { data: None, errors }
    }

    /// Extract the record, rejecting responses with errors or without data.
    pub fn into_record(self) -> Result<ModelWithMetadata, StreamError> {
        if !self.errors.is_empty() {
            return Err(StreamError::ResponseErrors(self.errors));
        }
        self.data.ok_or(StreamError::EmptyResponse)
    }
}

/// A remote change routed into the session buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub entity: EntityType,
    pub record: ModelWithMetadata,
}

impl ChangeEvent {
    pub fn new(descriptor: &StreamDescriptor, record: ModelWithMetadata) -> Self {
        Self {
            kind: descriptor.kind,
            entity: descriptor.entity.clone(),
            record,
        }
    }
}

/// Opaque token a transport reports once a remote stream is live.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        SessionToken(token.into())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one start/stop cycle of the multiplexer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
