//! Keeps registered archives applied to the matching live entities.
//!
//! The coordinator owns all of its state and is driven from one task: a
//! periodic reconciliation tick plus events posted through a
//! [`CoordinatorHandle`]. Applications run as background tasks and report back
//! through the same queue, so the active map and the in-flight set are only
//! ever touched from [`AutoApplyCoordinator`]'s own methods.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::apply::ApplyOrchestrator;
use crate::config::CoordinatorConfig;
use crate::domain::{EntityAddress, EntitySlot, LiveEntity, RegisteredTarget, ScopeHandle, TargetKey};
use crate::error::Result;
use crate::registry::{RegistryEvent, TargetRegistry};
use crate::services::Services;

pub type SharedRegistry = Arc<RwLock<TargetRegistry>>;

#[derive(Debug)]
pub enum CoordinatorEvent {
    Registered(RegisteredTarget),
    Unregistered(TargetKey),
    /// A managed entity's appearance was changed by someone else.
    AppearanceChanged(EntityAddress),
    CaptureModeChanged(bool),
    ReapplyAll,
    ApplyFinished {
        key: TargetKey,
        result: Result<ScopeHandle>,
    },
    Shutdown,
}

/// Cloneable sender for feeding host notifications into the coordinator.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    /// Returns false once the coordinator is gone.
    pub fn send(&self, event: CoordinatorEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn appearance_changed(&self, address: EntityAddress) -> bool {
        self.send(CoordinatorEvent::AppearanceChanged(address))
    }

    pub fn capture_mode_changed(&self, active: bool) -> bool {
        self.send(CoordinatorEvent::CaptureModeChanged(active))
    }

    pub fn reapply_all(&self) -> bool {
        self.send(CoordinatorEvent::ReapplyAll)
    }

    pub fn shutdown(&self) -> bool {
        self.send(CoordinatorEvent::Shutdown)
    }

    fn into_registry_listener(self) -> impl Fn(&RegistryEvent) + Send + Sync + 'static {
        let tx = self.tx;
        move |e| {
            let ev = match e {
                RegistryEvent::Registered(t) => CoordinatorEvent::Registered(t.clone()),
                RegistryEvent::Unregistered(k) => CoordinatorEvent::Unregistered(k.clone()),
            };
            let _ = tx.send(ev);
        }
    }
}

#[derive(Debug)]
pub struct ActiveApplication {
    pub key: TargetKey,
    pub slot: EntitySlot,
    pub entity_name: String,
    pub archive_path: PathBuf,
    /// `None` until the application confirms.
    pub scope: Option<ScopeHandle>,
}

pub struct AutoApplyCoordinator {
    orchestrator: ApplyOrchestrator,
    registry: SharedRegistry,
    config: CoordinatorConfig,
    active: BTreeMap<TargetKey, ActiveApplication>,
    processing: BTreeSet<TargetKey>,
    capture_mode: bool,
    tx: mpsc::UnboundedSender<CoordinatorEvent>,
    rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
}

impl AutoApplyCoordinator {
    /// Build a coordinator and subscribe it to `registry` changes.
    pub fn new(
        orchestrator: ApplyOrchestrator,
        registry: SharedRegistry,
        config: CoordinatorConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = Self {
            orchestrator,
            registry,
            config,
            active: BTreeMap::new(),
            processing: BTreeSet::new(),
            capture_mode: false,
            tx,
            rx,
        };
        let listener = this.handle().into_registry_listener();
        match this.registry.write() {
            Ok(mut r) => r.subscribe(listener),
            Err(_) => error!("registry lock poisoned; registrations will only apply on tick"),
        }
        this
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            tx: self.tx.clone(),
        }
    }

    fn services(&self) -> &Services {
        self.orchestrator.services()
    }

    pub fn is_active(&self, key: &TargetKey) -> bool {
        self.active.contains_key(key)
    }

    pub fn is_processing(&self, key: &TargetKey) -> bool {
        self.processing.contains(key)
    }

    pub fn active(&self) -> impl Iterator<Item = &ActiveApplication> {
        self.active.values()
    }

    pub fn capture_mode(&self) -> bool {
        self.capture_mode
    }

    /// Drive the coordinator until a shutdown event arrives, then tear down.
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.config.tick_interval_ms, "coordinator running");
        loop {
            tokio::select! {
                ev = self.rx.recv() => match ev {
                    Some(CoordinatorEvent::Shutdown) | None => break,
                    Some(ev) => self.handle_event(ev).await,
                },
                _ = ticker.tick() => self.tick().await,
            }
        }
        self.shutdown().await;
    }

    /// Wait for one queued event and handle it. Returns false on shutdown.
    pub async fn pump_once(&mut self) -> bool {
        match self.rx.recv().await {
            Some(CoordinatorEvent::Shutdown) | None => false,
            Some(ev) => {
                self.handle_event(ev).await;
                true
            }
        }
    }

    /// One reconciliation pass.
    pub async fn tick(&mut self) {
        if self.capture_mode || !self.services().all_available() {
            return;
        }
        let Some(local) = self.services().entities.local_entity() else {
            return;
        };

        let vanished: Vec<TargetKey> = self
            .active
            .values()
            .filter(|a| !self.processing.contains(&a.key) && !self.still_present(a))
            .map(|a| a.key.clone())
            .collect();
        for key in vanished {
            if let Some(app) = self.active.remove(&key) {
                info!(key = %key, slot = %app.slot, "managed entity gone");
                self.teardown(app).await;
            }
        }

        for entity in self.services().entities.entities() {
            if entity.slot == local {
                continue;
            }
            let Some(key) = entity.target_key() else {
                continue;
            };
            if self.active.contains_key(&key) || self.processing.contains(&key) {
                continue;
            }
            if let Some(archive) = self.archive_for(&key) {
                self.begin_apply(entity, key, archive);
            }
        }
    }

    pub async fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Registered(target) => {
                let key = target.key();
                if self.processing.contains(&key) || !self.can_apply() {
                    return;
                }
                let Some(entity) = self.find_visible(&key) else {
                    debug!(key = %key, "registered target not visible");
                    return;
                };
                if let Some(app) = self.active.remove(&key) {
                    self.teardown(app).await;
                }
                self.begin_apply(entity, key, target.archive_path);
            }
            CoordinatorEvent::Unregistered(key) => {
                if let Some(app) = self.active.remove(&key) {
                    self.teardown(app).await;
                }
            }
            CoordinatorEvent::AppearanceChanged(address) => {
                if self.capture_mode {
                    return;
                }
                let Some(entity) = self.services().entities.by_address(address) else {
                    return;
                };
                let Some(key) = entity.target_key() else {
                    return;
                };
                if self.processing.contains(&key) || !self.active.contains_key(&key) {
                    return;
                }
                debug!(key = %key, "appearance changed externally, re-applying");
                if let Some(app) = self.active.remove(&key) {
                    self.teardown(app).await;
                }
                match self.archive_for(&key) {
                    Some(archive) if self.can_apply() => self.begin_apply(entity, key, archive),
                    _ => {}
                }
            }
            CoordinatorEvent::CaptureModeChanged(on) => {
                self.capture_mode = on;
                if on {
                    info!("capture mode entered, clearing managed entities");
                    self.teardown_all().await;
                }
            }
            CoordinatorEvent::ReapplyAll => self.teardown_all().await,
            CoordinatorEvent::ApplyFinished { key, result } => self.finish_apply(key, result).await,
            CoordinatorEvent::Shutdown => self.shutdown().await,
        }
    }

    /// Tear down every active application.
    pub async fn shutdown(&mut self) {
        self.teardown_all().await;
        debug!("coordinator shut down");
    }

    fn can_apply(&self) -> bool {
        !self.capture_mode && self.services().all_available()
    }

    fn still_present(&self, app: &ActiveApplication) -> bool {
        self.services()
            .entities
            .get(app.slot)
            .and_then(|e| e.target_key())
            .is_some_and(|k| k == app.key)
    }

    fn find_visible(&self, key: &TargetKey) -> Option<LiveEntity> {
        let local = self.services().entities.local_entity();
        self.services()
            .entities
            .entities()
            .into_iter()
            .filter(|e| Some(e.slot) != local)
            .find(|e| e.target_key().as_ref() == Some(key))
    }

    fn archive_for(&self, key: &TargetKey) -> Option<PathBuf> {
        match self.registry.read() {
            Ok(r) => r.get(key).map(|t| t.archive_path.clone()),
            Err(_) => {
                warn!("registry lock poisoned");
                None
            }
        }
    }

    fn begin_apply(&mut self, entity: LiveEntity, key: TargetKey, archive: PathBuf) {
        info!(key = %key, slot = %entity.slot, archive = %archive.display(), "applying");
        self.processing.insert(key.clone());
        self.active.insert(
            key.clone(),
            ActiveApplication {
                key: key.clone(),
                slot: entity.slot,
                entity_name: entity.name.clone(),
                archive_path: archive.clone(),
                scope: None,
            },
        );

        let orch = self.orchestrator.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = orch.apply(&entity, &archive).await;
            if let Err(mpsc::error::SendError(ev)) = tx.send(CoordinatorEvent::ApplyFinished { key, result }) {
                if let CoordinatorEvent::ApplyFinished { result: Ok(scope), .. } = ev {
                    orch.release(scope).await;
                }
            }
        });
    }

    async fn finish_apply(&mut self, key: TargetKey, result: Result<ScopeHandle>) {
        self.processing.remove(&key);
        match result {
            Ok(scope) => match self.active.get_mut(&key) {
                Some(app) => {
                    debug!(key = %key, scope = %scope, "application confirmed");
                    app.scope = Some(scope);
                }
                None => {
                    warn!(key = %key, scope = %scope, "target dropped during apply, releasing scope");
                    self.orchestrator.release(scope).await;
                }
            },
            Err(e) => {
                error!(key = %key, "apply failed: {e}");
                self.active.remove(&key);
            }
        }
    }

    async fn teardown_all(&mut self) {
        let apps: Vec<ActiveApplication> = std::mem::take(&mut self.active).into_values().collect();
        for app in apps {
            self.teardown(app).await;
        }
    }

    async fn teardown(&self, app: ActiveApplication) {
        let key = app.key.clone();
        let job = teardown_job(self.services().clone(), app);
        if let Err(e) = self.services().on_host(job).await {
            warn!(key = %key, "teardown not dispatched: {e}");
        }
    }
}

impl Drop for AutoApplyCoordinator {
    fn drop(&mut self) {
        let services = self.services().clone();
        for (_, app) in std::mem::take(&mut self.active) {
            services
                .host
                .dispatch(Box::new(teardown_job(services.clone(), app)));
        }
    }
}

/// Remove the shape profile, revert the appearance and release the scope.
/// Each step runs even if an earlier one fails.
fn teardown_job(services: Services, app: ActiveApplication) -> impl FnOnce() + Send + 'static {
    let shape = services.shape();
    move || {
        let slot = app.slot;
        if let Some(shape) = shape {
            if let Err(e) = shape.remove_temporary_profile(slot) {
                warn!(key = %app.key, "remove shape profile failed: {e}");
            }
        }
        if let Err(e) = services.appearance.revert_state(slot) {
            warn!(key = %app.key, "revert appearance failed: {e}");
        }
        if let Some(scope) = app.scope {
            let id = scope.id();
            if let Err(e) = services.assets.remove_scope(scope) {
                warn!(key = %app.key, scope = %id, "scope release failed: {e}");
            }
        }
        debug!(key = %app.key, entity = %app.entity_name, "torn down");
    }
}
