//! In-memory host and services for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::config::ApplyTimings;
use crate::domain::{EntityAddress, EntityKind, EntitySlot, LiveEntity, ScopeHandle};
use crate::error::{McdfError, Result};
use crate::services::{
    AppearanceService, AssetService, EntityTable, InlineDispatch, Services, ShapeProfileService,
};

pub fn fast_timings() -> ApplyTimings {
    ApplyTimings {
        settle_delay_ms: 0,
        redraw_poll_ms: 1,
        redraw_timeout_ms: 20,
        redraw_grace_ms: 0,
    }
}

#[derive(Default)]
struct World {
    entities: Mutex<BTreeMap<EntitySlot, LiveEntity>>,
    local: Mutex<Option<EntitySlot>>,
    cleared: Mutex<HashSet<EntitySlot>>,
    appearance_down: AtomicBool,
    shape_profiles: Mutex<HashMap<EntitySlot, String>>,
    associations: Mutex<BTreeMap<String, Vec<String>>>,
    mod_root: Mutex<Option<PathBuf>>,
    resolutions: Mutex<HashMap<String, String>>,
    scopes: Mutex<Vec<Uuid>>,
    released: Mutex<Vec<Uuid>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    drawing_polls: AtomicUsize,
}

impl World {
    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(op) {
            Err(McdfError::ServiceUnavailable(format!("{op} rejected")))
        } else {
            Ok(())
        }
    }
}

impl AppearanceService for World {
    fn is_available(&self) -> bool {
        !self.appearance_down.load(Ordering::SeqCst)
    }

    fn get_state(&self, slot: EntitySlot) -> Option<String> {
        if self.cleared.lock().unwrap().contains(&slot) {
            return None;
        }
        Some(format!("appearance-{}", slot.0))
    }

    fn apply_state(&self, state: &str, slot: EntitySlot) -> Result<()> {
        self.log(format!("apply_state {slot} {state}"));
        self.check("apply_state")
    }

    fn revert_state(&self, slot: EntitySlot) -> Result<()> {
        self.log(format!("revert {slot}"));
        self.check("revert")
    }
}

impl ShapeProfileService for World {
    fn is_available(&self) -> bool {
        true
    }

    fn get_active_profile(&self, slot: EntitySlot) -> Option<String> {
        self.shape_profiles.lock().unwrap().get(&slot).cloned()
    }

    fn set_temporary_profile(&self, slot: EntitySlot, profile: &str) -> Result<()> {
        self.log(format!("set_profile {slot} {profile}"));
        self.check("set_profile")
    }

    fn remove_temporary_profile(&self, slot: EntitySlot) -> Result<()> {
        self.log(format!("remove_profile {slot}"));
        self.check("remove_profile")
    }
}

impl AssetService for World {
    fn is_available(&self) -> bool {
        true
    }

    fn resource_associations(&self, _slot: EntitySlot) -> Option<BTreeMap<String, Vec<String>>> {
        Some(self.associations.lock().unwrap().clone())
    }

    fn mod_root(&self) -> Option<PathBuf> {
        self.mod_root.lock().unwrap().clone()
    }

    fn resolve_logical_path(&self, logical: &str) -> Option<String> {
        self.resolutions.lock().unwrap().get(logical).cloned()
    }

    fn override_metadata(&self) -> String {
        "overrides".into()
    }

    fn create_scope(&self, label: &str) -> Result<ScopeHandle> {
        self.log(format!("create_scope {label}"));
        self.check("create_scope")?;
        let id = Uuid::new_v4();
        self.scopes.lock().unwrap().push(id);
        Ok(ScopeHandle::new(id))
    }

    fn bind_scope(&self, _scope: &ScopeHandle, slot: EntitySlot, force: bool) -> Result<()> {
        self.log(format!("bind {slot}{}", if force { " force" } else { "" }));
        self.check("bind")
    }

    fn add_files_to_scope(
        &self,
        tag: &str,
        _scope: &ScopeHandle,
        files: &BTreeMap<String, PathBuf>,
        override_metadata: &str,
    ) -> Result<()> {
        for path in files.values() {
            assert!(path.is_file(), "extracted blob missing: {}", path.display());
        }
        self.log(format!("add_files {tag} {} {override_metadata}", files.len()));
        self.check("add_files")
    }

    fn remove_scope(&self, scope: ScopeHandle) -> Result<()> {
        self.log(format!("remove_scope {scope}"));
        self.check("remove_scope")?;
        self.scopes.lock().unwrap().retain(|id| *id != scope.id());
        self.released.lock().unwrap().push(scope.id());
        Ok(())
    }

    fn request_redraw(&self, slot: EntitySlot) -> Result<()> {
        self.log(format!("redraw {slot}"));
        self.check("redraw")
    }
}

impl EntityTable for World {
    fn entities(&self) -> Vec<LiveEntity> {
        self.entities.lock().unwrap().values().cloned().collect()
    }

    fn get(&self, slot: EntitySlot) -> Option<LiveEntity> {
        self.entities.lock().unwrap().get(&slot).cloned()
    }

    fn by_address(&self, address: EntityAddress) -> Option<LiveEntity> {
        self.entities
            .lock()
            .unwrap()
            .values()
            .find(|e| e.address == address)
            .cloned()
    }

    fn local_entity(&self) -> Option<EntitySlot> {
        *self.local.lock().unwrap()
    }

    fn is_drawing(&self, _slot: EntitySlot) -> bool {
        let left = self.drawing_polls.load(Ordering::SeqCst);
        if left == 0 {
            return true;
        }
        if left != usize::MAX {
            self.drawing_polls.store(left - 1, Ordering::SeqCst);
        }
        false
    }
}

/// A host with a mutable entity table and services that record every mutating
/// call. Operations named through [`MockWorld::fail`] return `Err`.
#[derive(Clone, Default)]
pub struct MockWorld {
    inner: Arc<World>,
}

impl MockWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> Services {
        Services {
            appearance: self.inner.clone(),
            shape: Some(self.inner.clone()),
            assets: self.inner.clone(),
            entities: self.inner.clone(),
            host: Arc::new(InlineDispatch),
        }
    }

    pub fn add_entity(&self, slot: u16, name: &str, home_zone: Option<&str>) -> LiveEntity {
        let e = LiveEntity {
            slot: EntitySlot(slot),
            address: EntityAddress(0x1000 + slot as usize),
            name: name.to_string(),
            kind: EntityKind::Character {
                home_zone: home_zone.map(str::to_string),
            },
        };
        self.inner.entities.lock().unwrap().insert(e.slot, e.clone());
        e
    }

    pub fn remove_entity(&self, slot: u16) {
        self.inner.entities.lock().unwrap().remove(&EntitySlot(slot));
    }

    pub fn set_local(&self, slot: Option<EntitySlot>) {
        *self.inner.local.lock().unwrap() = slot;
    }

    pub fn clear_appearance(&self, slot: EntitySlot) {
        self.inner.cleared.lock().unwrap().insert(slot);
    }

    pub fn set_appearance_available(&self, up: bool) {
        self.inner.appearance_down.store(!up, Ordering::SeqCst);
    }

    pub fn set_shape_profile(&self, slot: EntitySlot, profile: &str) {
        self.inner
            .shape_profiles
            .lock()
            .unwrap()
            .insert(slot, profile.to_string());
    }

    pub fn associate(&self, logical: &str, candidates: &[&str]) {
        self.inner.associations.lock().unwrap().insert(
            logical.to_string(),
            candidates.iter().map(|c| c.to_string()).collect(),
        );
    }

    pub fn set_mod_root(&self, root: &Path) {
        *self.inner.mod_root.lock().unwrap() = Some(root.to_path_buf());
    }

    pub fn set_resolution(&self, logical: &str, local: &Path) {
        self.inner
            .resolutions
            .lock()
            .unwrap()
            .insert(logical.to_string(), local.display().to_string());
    }

    /// `is_drawing` answers false this many times before the entity reads as drawn;
    /// `usize::MAX` never finishes drawing.
    pub fn set_drawing_polls(&self, n: usize) {
        self.inner.drawing_polls.store(n, Ordering::SeqCst);
    }

    pub fn fail(&self, op: &str) {
        self.inner.failing.lock().unwrap().insert(op.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn live_scopes(&self) -> Vec<Uuid> {
        self.inner.scopes.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<Uuid> {
        self.inner.released.lock().unwrap().clone()
    }
}
