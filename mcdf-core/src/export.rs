use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use crate::domain::LiveEntity;
use crate::error::{McdfError, Result};
use crate::pack::{self, PackOptions};
use crate::services::Services;
use crate::snapshot::SnapshotBuilder;

pub const DEFAULT_EXPORT_NAME: &str = "export.mcdf";

/// Progress of a running export, shared with whoever displays it.
#[derive(Debug, Default)]
pub struct ExportProgress {
    message: Mutex<String>,
    processed: AtomicUsize,
    total: AtomicUsize,
    finished: AtomicBool,
    failed: AtomicBool,
}

impl ExportProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_message(&self, msg: &str) {
        if let Ok(mut m) = self.message.lock() {
            m.clear();
            m.push_str(msg);
        }
    }

    pub fn message(&self) -> String {
        self.message.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Start a counted phase.
    pub fn begin(&self, msg: &str, total: usize) {
        self.set_message(msg);
        self.processed.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn advance(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// 0.0 ..= 1.0 over the current phase; 0 when nothing is counted.
    pub fn fraction(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.processed().min(total) as f32) / (total as f32)
    }

    pub fn finish(&self, failed: bool) {
        self.failed.store(failed, Ordering::Relaxed);
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Suggested file name for an export with `description`.
pub fn default_file_name(description: &str) -> String {
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return DEFAULT_EXPORT_NAME.to_string();
    }
    let clean: String = trimmed
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("{clean}.mcdf")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub blobs: usize,
    pub reference_paths: usize,
    pub uncompressed_bytes: u64,
}

pub struct Exporter {
    services: Services,
    opts: PackOptions,
}

impl Exporter {
    pub fn new(services: Services, opts: PackOptions) -> Self {
        Self { services, opts }
    }

    /// Snapshot `entity` and write it to `dest`. `progress` is marked finished on
    /// every exit, and failed when an error is returned.
    pub async fn export(
        &self,
        entity: &LiveEntity,
        description: &str,
        dest: &Path,
        progress: Arc<ExportProgress>,
    ) -> Result<ExportSummary> {
        let res = self.export_inner(entity, description, dest, &progress).await;
        match &res {
            Ok(s) => {
                progress.set_message("done");
                info!(
                    entity = %entity.name,
                    path = %s.path.display(),
                    blobs = s.blobs,
                    "export written"
                );
            }
            Err(e) => {
                progress.set_message("failed");
                error!(entity = %entity.name, "export failed: {e}");
            }
        }
        progress.finish(res.is_err());
        res
    }

    /// Export the host's local entity.
    pub async fn export_local(
        &self,
        description: &str,
        dest: &Path,
        progress: Arc<ExportProgress>,
    ) -> Result<ExportSummary> {
        let local = self
            .services
            .entities
            .local_entity()
            .and_then(|slot| self.services.entities.get(slot));
        match local {
            Some(entity) => self.export(&entity, description, dest, progress).await,
            None => {
                progress.finish(true);
                Err(McdfError::SnapshotUnavailable("no local entity".into()))
            }
        }
    }

    async fn export_inner(
        &self,
        entity: &LiveEntity,
        description: &str,
        dest: &Path,
        progress: &Arc<ExportProgress>,
    ) -> Result<ExportSummary> {
        let snapshot = SnapshotBuilder::new(self.services.clone())
            .build(entity, progress.clone())
            .await?
            .ok_or_else(|| {
                McdfError::SnapshotUnavailable(format!("{} has nothing to export", entity.name))
            })?;

        let (payload, sources) = snapshot.into_payload(description);
        let blobs = payload.files.len();
        let reference_paths: usize = payload.files.iter().map(|f| f.reference_paths.len()).sum();
        progress.begin("writing archive", blobs);

        let out = dest.to_path_buf();
        let opts = self.opts.clone();
        let p = progress.clone();
        let uncompressed_bytes = tokio::task::spawn_blocking(move || {
            pack::write_archive(&out, &payload, &sources, &opts, |_| p.advance())
        })
        .await??;

        Ok(ExportSummary {
            path: dest.to_path_buf(),
            blobs,
            reference_paths,
            uncompressed_bytes,
        })
    }
}
