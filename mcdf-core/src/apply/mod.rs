//! Applying an archive onto a live entity.
//!
//! One run walks `Reading -> Reverting -> Injecting -> Applying -> Redrawing`
//! and ends `Confirmed` with the scope handle, or `Failed` with nothing left
//! attached to the entity.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::ApplyTimings;
use crate::container::ArchivePayload;
use crate::domain::{EntitySlot, LiveEntity, ScopeHandle};
use crate::error::{McdfError, Result};
use crate::read::ArchiveReader;
use crate::services::Services;

/// Tag the injected files are registered under in the scope.
pub const FILES_TAG: &str = "MCDF_Files";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApplyStage {
    Idle,
    Reading,
    Reverting,
    Injecting,
    Applying,
    Redrawing,
    Confirmed,
    Failed,
}

impl fmt::Display for ApplyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyStage::Idle => "idle",
            ApplyStage::Reading => "reading",
            ApplyStage::Reverting => "reverting",
            ApplyStage::Injecting => "injecting",
            ApplyStage::Applying => "applying",
            ApplyStage::Redrawing => "redrawing",
            ApplyStage::Confirmed => "confirmed",
            ApplyStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

type Extracted = (ArchivePayload, BTreeMap<String, PathBuf>, tempfile::TempDir);

pub fn scope_label(target: &LiveEntity) -> String {
    format!("MCDF_{}_{}", target.name, target.slot.0)
}

#[derive(Clone)]
pub struct ApplyOrchestrator {
    services: Services,
    timings: ApplyTimings,
    temp_root: PathBuf,
}

impl ApplyOrchestrator {
    pub fn new(services: Services, timings: ApplyTimings, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            services,
            timings,
            temp_root: temp_root.into(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Apply `archive` to `target`. On success the caller owns the returned scope
    /// and must release it through the asset service when the entity is torn down.
    pub async fn apply(&self, target: &LiveEntity, archive: &Path) -> Result<ScopeHandle> {
        let slot = target.slot;
        debug!(entity = %target.name, slot = %slot, archive = %archive.display(), "apply start");

        self.services
            .require_available()
            .map_err(|e| e.at_stage(ApplyStage::Reading))?;

        // The extraction directory lives until this function returns.
        let (payload, files, _workdir) = self
            .read(archive)
            .await
            .map_err(|e| e.at_stage(ApplyStage::Reading))?;

        self.revert(target).await;
        sleep(self.timings.settle_delay()).await;

        let scope = self
            .inject(target, files, payload.override_data.clone())
            .await
            .map_err(|e| e.at_stage(ApplyStage::Injecting))?;
        sleep(self.timings.settle_delay()).await;

        if let Err(e) = self.push_state(target, &payload).await {
            return Err(self.rollback(scope, e, ApplyStage::Applying).await);
        }

        if let Err(e) = self.redraw(slot).await {
            return Err(self.rollback(scope, e, ApplyStage::Redrawing).await);
        }

        info!(entity = %target.name, slot = %slot, scope = %scope, "archive applied");
        Ok(scope)
    }

    async fn read(
        &self,
        archive: &Path,
    ) -> Result<Extracted> {
        let path = archive.to_path_buf();
        let root = self.temp_root.clone();
        tokio::task::spawn_blocking(move || -> Result<Extracted> {
            let mut reader =
                ArchiveReader::open(&path)?.ok_or_else(|| McdfError::NotAnArchive(path.clone()))?;
            std::fs::create_dir_all(&root)?;
            let workdir = tempfile::Builder::new().prefix("mcdf-").tempdir_in(&root)?;
            let files = reader.extract_blobs(workdir.path())?;
            let payload = reader.payload().clone();
            reader.close();
            Ok((payload, files, workdir))
        })
        .await?
    }

    /// Clear whatever state the entity carries. Failures are logged only.
    async fn revert(&self, target: &LiveEntity) {
        let slot = target.slot;
        let appearance = self.services.appearance.clone();
        let shape = self.services.shape();
        let res = self
            .services
            .on_host(move || {
                let a = appearance.revert_state(slot);
                let s = shape.map(|s| s.remove_temporary_profile(slot));
                (a, s)
            })
            .await;
        match res {
            Ok((a, s)) => {
                if let Err(e) = a {
                    warn!(slot = %slot, "revert appearance failed: {e}");
                }
                if let Some(Err(e)) = s {
                    warn!(slot = %slot, "remove shape profile failed: {e}");
                }
            }
            Err(e) => warn!(slot = %slot, "revert not dispatched: {e}"),
        }
    }

    async fn inject(
        &self,
        target: &LiveEntity,
        files: BTreeMap<String, PathBuf>,
        override_data: String,
    ) -> Result<ScopeHandle> {
        let slot = target.slot;
        let label = scope_label(target);
        let assets = self.services.assets.clone();
        let scope = self
            .services
            .on_host(move || assets.create_scope(&label))
            .await??;
        debug!(slot = %slot, scope = %scope, files = files.len(), "scope created");

        let assets = self.services.assets.clone();
        let (scope, res) = self
            .services
            .on_host(move || {
                let res = assets
                    .bind_scope(&scope, slot, true)
                    .and_then(|_| assets.add_files_to_scope(FILES_TAG, &scope, &files, &override_data));
                (scope, res)
            })
            .await?;
        match res {
            Ok(()) => Ok(scope),
            Err(e) => {
                self.release(scope).await;
                Err(e)
            }
        }
    }

    async fn push_state(&self, target: &LiveEntity, payload: &ArchivePayload) -> Result<()> {
        let slot = target.slot;
        let appearance = self.services.appearance.clone();
        let state = payload.appearance_state.clone();
        self.services
            .on_host(move || appearance.apply_state(&state, slot))
            .await??;

        let shape = self.services.shape();
        if let Some(shape) = shape.filter(|_| target.supports_shape_profile() && payload.has_shape_profile()) {
            let profile = payload.shape_profile_state.clone();
            let res = self
                .services
                .on_host(move || shape.set_temporary_profile(slot, &profile))
                .await?;
            if let Err(e) = res {
                warn!(slot = %slot, "shape profile not applied: {e}");
            }
        }
        sleep(self.timings.settle_delay()).await;
        Ok(())
    }

    /// Request a redraw and wait for it. A timeout only warns.
    async fn redraw(&self, slot: EntitySlot) -> Result<()> {
        let assets = self.services.assets.clone();
        self.services
            .on_host(move || assets.request_redraw(slot))
            .await??;

        let deadline = Instant::now() + self.timings.redraw_timeout();
        loop {
            let entities = self.services.entities.clone();
            let drawing = self
                .services
                .on_host(move || entities.is_drawing(slot))
                .await?;
            if drawing {
                sleep(self.timings.redraw_grace()).await;
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(slot = %slot, "redraw not confirmed before timeout");
                return Ok(());
            }
            sleep(self.timings.redraw_poll()).await;
        }
    }

    async fn rollback(&self, scope: ScopeHandle, err: McdfError, stage: ApplyStage) -> McdfError {
        warn!(scope = %scope, "apply failed while {stage}, releasing scope: {err}");
        self.release(scope).await;
        err.at_stage(stage)
    }

    /// Release a scope. Failures are logged; the handle is consumed either way.
    pub async fn release(&self, scope: ScopeHandle) {
        let id = scope.id();
        let assets = self.services.assets.clone();
        match self.services.on_host(move || assets.remove_scope(scope)).await {
            Ok(Ok(())) => debug!(scope = %id, "scope released"),
            Ok(Err(e)) => warn!(scope = %id, "scope release failed: {e}"),
            Err(e) => warn!(scope = %id, "scope release not dispatched: {e}"),
        }
    }
}
