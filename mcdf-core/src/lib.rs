#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod hash;
pub mod services;

pub mod codec;

pub mod container;

pub mod pack;

pub mod read;

pub mod apply;
pub mod coordinator;
pub mod export;
pub mod registry;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports: stable API surface
pub use apply::{ApplyOrchestrator, ApplyStage};
pub use config::Settings;
pub use coordinator::{AutoApplyCoordinator, CoordinatorEvent, CoordinatorHandle, SharedRegistry};
pub use error::{McdfError, Result};
pub use export::{ExportProgress, Exporter, default_file_name};
pub use pack::{PackOptions, write_archive};
pub use read::ArchiveReader;
pub use registry::{RegistryEvent, TargetRegistry};
pub use snapshot::{EntitySnapshot, SnapshotBuilder, collect_blobs};
