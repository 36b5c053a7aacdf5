use std::path::PathBuf;

use thiserror::Error;

use crate::apply::ApplyStage;

#[derive(Error, Debug)]
pub enum McdfError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Not an archive: {}", .0.display())]
    NotAnArchive(PathBuf),

    #[error("Snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Apply failed while {stage}: {source}")]
    Apply {
        stage: ApplyStage,
        #[source]
        source: Box<McdfError>,
    },
}

impl McdfError {
    pub(crate) fn at_stage(self, stage: ApplyStage) -> Self {
        McdfError::Apply {
            stage,
            source: Box::new(self),
        }
    }

    /// Stage of a failed application, if this error came out of the orchestrator.
    pub fn apply_stage(&self) -> Option<ApplyStage> {
        match self {
            McdfError::Apply { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, McdfError>;
