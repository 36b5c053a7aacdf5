//! Reading a live entity's current state into an exportable snapshot.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, error, warn};

use crate::container::{ArchivePayload, BlobDescriptor};
use crate::domain::{FileBlob, LiveEntity};
use crate::error::Result;
use crate::export::ExportProgress;
use crate::hash::ContentHasher;
use crate::services::Services;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntitySnapshot {
    pub appearance_state: String,
    pub shape_profile_state: String,
    pub override_data: String,
    pub blobs: Vec<FileBlob>,
}

impl EntitySnapshot {
    /// Split into the serialized payload and the blob sources, index-aligned.
    pub fn into_payload(self, description: &str) -> (ArchivePayload, Vec<PathBuf>) {
        let mut files = Vec::with_capacity(self.blobs.len());
        let mut sources = Vec::with_capacity(self.blobs.len());
        for b in self.blobs {
            files.push(BlobDescriptor {
                reference_paths: b.reference_paths,
                fingerprint: b.fingerprint,
                length: b.length,
            });
            sources.push(b.source);
        }
        let payload = ArchivePayload {
            description: description.to_string(),
            appearance_state: self.appearance_state,
            shape_profile_state: self.shape_profile_state,
            override_data: self.override_data,
            files,
            path_swaps: Vec::new(),
        };
        (payload, sources)
    }
}

/// First candidate that exists on disk: rooted candidates, then candidates
/// joined onto `mod_root`. The service-side fallback is handled by the caller.
pub fn resolve_candidate(candidates: &[String], mod_root: Option<&Path>) -> Option<PathBuf> {
    let rooted = candidates
        .iter()
        .map(Path::new)
        .filter(|p| p.is_absolute())
        .find(|p| p.is_file());
    if let Some(p) = rooted {
        return Some(p.to_path_buf());
    }
    let root = mod_root?;
    candidates
        .iter()
        .map(Path::new)
        .filter(|p| !p.is_absolute())
        .map(|p| root.join(p))
        .find(|p| p.is_file())
}

/// Hash every resolved file and merge logical paths that share content.
///
/// Hashing runs in parallel; blob order follows the first appearance of each
/// fingerprint in `resolved`, so the same input always yields the same order.
pub fn collect_blobs<F>(
    resolved: &[(String, PathBuf)],
    hasher: &ContentHasher,
    on_hashed: F,
) -> Result<Vec<FileBlob>>
where
    F: Fn() + Sync,
{
    let hashed = resolved
        .par_iter()
        .map(|(logical, src)| -> Result<(String, PathBuf, String, u64)> {
            let fingerprint = hasher.hash_file(src)?;
            let length = std::fs::metadata(src)?.len();
            on_hashed();
            Ok((logical.clone(), src.clone(), fingerprint, length))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut by_fingerprint: HashMap<String, usize> = HashMap::new();
    let mut blobs: Vec<FileBlob> = Vec::new();
    for (logical, src, fingerprint, length) in hashed {
        if let Some(&i) = by_fingerprint.get(&fingerprint) {
            let paths = &mut blobs[i].reference_paths;
            if !paths.contains(&logical) {
                paths.push(logical);
            }
        } else {
            by_fingerprint.insert(fingerprint.clone(), blobs.len());
            blobs.push(FileBlob {
                fingerprint,
                length,
                reference_paths: vec![logical],
                source: src,
            });
        }
    }
    Ok(blobs)
}

pub struct SnapshotBuilder {
    services: Services,
}

impl SnapshotBuilder {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Snapshot `entity`. `Ok(None)` when a mandatory read comes back empty;
    /// `Err` when a service is unavailable or a resolved file cannot be hashed.
    pub async fn build(
        &self,
        entity: &LiveEntity,
        progress: Arc<ExportProgress>,
    ) -> Result<Option<EntitySnapshot>> {
        self.services.require_available()?;
        let slot = entity.slot;

        let appearance = self.services.appearance.clone();
        let state = self
            .services
            .on_host(move || appearance.get_state(slot))
            .await?;
        let Some(appearance_state) = state.filter(|s| !s.is_empty()) else {
            error!(entity = %entity.name, "no appearance state; aborting snapshot");
            return Ok(None);
        };

        let assets = self.services.assets.clone();
        let (associations, mod_root) = self
            .services
            .on_host(move || (assets.resource_associations(slot), assets.mod_root()))
            .await?;
        let Some(associations) = associations else {
            error!(entity = %entity.name, "no resource associations; aborting snapshot");
            return Ok(None);
        };
        debug!(
            entity = %entity.name,
            candidates = associations.len(),
            "resolving asset associations"
        );

        progress.set_message("resolving files");
        let resolved = self.resolve(associations, mod_root).await?;

        progress.begin("hashing files", resolved.len());
        let hasher = ContentHasher::new();
        let blobs = {
            let progress = progress.clone();
            tokio::task::spawn_blocking(move || {
                collect_blobs(&resolved, &hasher, || progress.advance())
            })
            .await??
        };
        debug!(entity = %entity.name, blobs = blobs.len(), "assets deduplicated");

        let shape_profile_state = match self.services.shape() {
            Some(shape) if entity.supports_shape_profile() => self
                .services
                .on_host(move || shape.get_active_profile(slot))
                .await?
                .unwrap_or_default(),
            _ => String::new(),
        };

        let assets = self.services.assets.clone();
        let override_data = self
            .services
            .on_host(move || assets.override_metadata())
            .await?;

        Ok(Some(EntitySnapshot {
            appearance_state,
            shape_profile_state,
            override_data,
            blobs,
        }))
    }

    async fn resolve(
        &self,
        associations: BTreeMap<String, Vec<String>>,
        mod_root: Option<PathBuf>,
    ) -> Result<Vec<(String, PathBuf)>> {
        let local: Vec<(String, Option<PathBuf>)> = tokio::task::spawn_blocking(move || {
            associations
                .into_iter()
                .map(|(logical, candidates)| {
                    let hit = resolve_candidate(&candidates, mod_root.as_deref());
                    (logical, hit)
                })
                .collect()
        })
        .await?;

        let pending: Vec<String> = local
            .iter()
            .filter(|(_, hit)| hit.is_none())
            .map(|(logical, _)| logical.clone())
            .collect();
        let mut fallback: HashMap<String, PathBuf> = HashMap::new();
        if !pending.is_empty() {
            let assets = self.services.assets.clone();
            let answers = self
                .services
                .on_host(move || {
                    pending
                        .into_iter()
                        .map(|l| {
                            let r = assets.resolve_logical_path(&l);
                            (l, r)
                        })
                        .collect::<Vec<_>>()
                })
                .await?;
            for (logical, answer) in answers {
                if let Some(p) = answer.filter(|s| !s.is_empty()).map(PathBuf::from) {
                    if p.is_file() {
                        fallback.insert(logical, p);
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(local.len());
        for (logical, hit) in local {
            match hit.or_else(|| fallback.remove(&logical)) {
                Some(p) => out.push((logical, p)),
                None => warn!(path = %logical, "no local file for asset; skipping"),
            }
        }
        Ok(out)
    }
}
