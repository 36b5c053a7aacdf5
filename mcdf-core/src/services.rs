//! Boundary to the host and the three external mutation services.
//!
//! Implementations report a failed or rejected call as `Err`; the core decides
//! per call site whether that aborts the operation or is logged and ignored.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::domain::{EntityAddress, EntitySlot, LiveEntity, ScopeHandle};
use crate::error::{McdfError, Result};

pub trait AppearanceService: Send + Sync {
    /// Version probe; an incompatible service counts as unavailable.
    fn is_available(&self) -> bool;
    fn get_state(&self, slot: EntitySlot) -> Option<String>;
    fn apply_state(&self, state: &str, slot: EntitySlot) -> Result<()>;
    fn revert_state(&self, slot: EntitySlot) -> Result<()>;
}

/// Optional dependency. Its absence degrades export and apply, never aborts them.
pub trait ShapeProfileService: Send + Sync {
    fn is_available(&self) -> bool;
    fn get_active_profile(&self, slot: EntitySlot) -> Option<String>;
    fn set_temporary_profile(&self, slot: EntitySlot, profile: &str) -> Result<()>;
    fn remove_temporary_profile(&self, slot: EntitySlot) -> Result<()>;
}

pub trait AssetService: Send + Sync {
    fn is_available(&self) -> bool;
    /// Logical path to candidate local paths for everything the entity uses.
    fn resource_associations(&self, slot: EntitySlot) -> Option<BTreeMap<String, Vec<String>>>;
    /// Directory relative candidates are resolved against.
    fn mod_root(&self) -> Option<PathBuf>;
    fn resolve_logical_path(&self, logical: &str) -> Option<String>;
    fn override_metadata(&self) -> String;
    fn create_scope(&self, label: &str) -> Result<ScopeHandle>;
    fn bind_scope(&self, scope: &ScopeHandle, slot: EntitySlot, force: bool) -> Result<()>;
    fn add_files_to_scope(
        &self,
        tag: &str,
        scope: &ScopeHandle,
        files: &BTreeMap<String, PathBuf>,
        override_metadata: &str,
    ) -> Result<()>;
    fn remove_scope(&self, scope: ScopeHandle) -> Result<()>;
    fn request_redraw(&self, slot: EntitySlot) -> Result<()>;
}

/// Read-only view of the host's live entities.
pub trait EntityTable: Send + Sync {
    fn entities(&self) -> Vec<LiveEntity>;
    fn get(&self, slot: EntitySlot) -> Option<LiveEntity>;
    fn by_address(&self, address: EntityAddress) -> Option<LiveEntity>;
    /// The local viewpoint entity; `None` while the host has no local entity.
    fn local_entity(&self) -> Option<EntitySlot>;
    /// True once the entity is fully drawn and no render work is pending for it.
    fn is_drawing(&self, slot: EntitySlot) -> bool;
}

pub type HostJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on the host's update thread.
pub trait HostDispatch: Send + Sync {
    fn dispatch(&self, job: HostJob);
}

/// Runs every job on the calling thread, for hosts already on their update thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatch;

impl HostDispatch for InlineDispatch {
    fn dispatch(&self, job: HostJob) {
        job()
    }
}

/// Hand `f` to the host thread and wait for its result.
pub async fn on_host<R, F>(host: &dyn HostDispatch, f: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    host.dispatch(Box::new(move || {
        let _ = tx.send(f());
    }));
    rx.await
        .map_err(|_| McdfError::ServiceUnavailable("host dropped a dispatched job".into()))
}

/// Everything the core talks to, bundled for cheap cloning into tasks.
#[derive(Clone)]
pub struct Services {
    pub appearance: Arc<dyn AppearanceService>,
    pub shape: Option<Arc<dyn ShapeProfileService>>,
    pub assets: Arc<dyn AssetService>,
    pub entities: Arc<dyn EntityTable>,
    pub host: Arc<dyn HostDispatch>,
}

impl Services {
    /// Appearance and asset services are mandatory; shape profiles are optional.
    pub fn all_available(&self) -> bool {
        self.appearance.is_available() && self.assets.is_available()
    }

    /// The shape-profile service, if wired in and currently usable.
    pub fn shape(&self) -> Option<Arc<dyn ShapeProfileService>> {
        self.shape.as_ref().filter(|s| s.is_available()).cloned()
    }

    pub fn require_available(&self) -> Result<()> {
        if !self.appearance.is_available() {
            return Err(McdfError::ServiceUnavailable("appearance service".into()));
        }
        if !self.assets.is_available() {
            return Err(McdfError::ServiceUnavailable("asset service".into()));
        }
        Ok(())
    }

    pub async fn on_host<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        on_host(self.host.as_ref(), f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dropping;
    impl HostDispatch for Dropping {
        fn dispatch(&self, _job: HostJob) {}
    }

    #[tokio::test]
    async fn inline_dispatch_returns_value() {
        assert_eq!(on_host(&InlineDispatch, || 41 + 1).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn dropped_job_is_service_unavailable() {
        let err = on_host(&Dropping, || ()).await.unwrap_err();
        assert!(matches!(err, McdfError::ServiceUnavailable(_)));
    }
}
