use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Index of a live entity in the host's entity table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntitySlot(pub u16);

impl fmt::Display for EntitySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host memory address of a live entity, as carried by change notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityAddress(pub usize);

/// Case-insensitive `{name, home zone}` identity. Both parts are stored lowercased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    name: String,
    home_zone: String,
}

impl TargetKey {
    pub fn new(name: &str, home_zone: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            home_zone: home_zone.to_lowercase(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn home_zone(&self) -> &str {
        &self.home_zone
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.home_zone)
    }
}

/// What kind of entity occupies a slot. Only characters can carry a shape profile
/// or be managed by the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Character { home_zone: Option<String> },
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveEntity {
    pub slot: EntitySlot,
    pub address: EntityAddress,
    pub name: String,
    pub kind: EntityKind,
}

impl LiveEntity {
    pub fn home_zone(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::Character { home_zone } => home_zone.as_deref().filter(|z| !z.is_empty()),
            EntityKind::Other => None,
        }
    }

    pub fn supports_shape_profile(&self) -> bool {
        matches!(self.kind, EntityKind::Character { .. })
    }

    /// Registry identity, if the entity has a resolvable home zone.
    pub fn target_key(&self) -> Option<TargetKey> {
        self.home_zone().map(|z| TargetKey::new(&self.name, z))
    }
}

/// Opaque handle to a temporary resource scope held by the asset service.
///
/// Deliberately not `Clone`: exactly one owner, released by value.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ScopeHandle(Uuid);

impl ScopeHandle {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One deduplicated asset gathered at export time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileBlob {
    pub fingerprint: String,
    pub length: u64,
    pub reference_paths: Vec<String>,
    /// Where the bytes are read from while encoding. Never serialized.
    pub source: PathBuf,
}

/// Persisted registry entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredTarget {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "HomeWorld")]
    pub home_zone: String,
    #[serde(rename = "McdfFilePath")]
    pub archive_path: PathBuf,
}

impl RegisteredTarget {
    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.name, &self.home_zone)
    }
}
