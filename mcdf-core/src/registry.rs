use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::domain::{RegisteredTarget, TargetKey};
use crate::error::{McdfError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered(RegisteredTarget),
    Unregistered(TargetKey),
}

type Subscriber = Box<dyn Fn(&RegistryEvent) + Send + Sync>;

/// Archive registrations keyed by case-insensitive name and home zone, backed
/// by a JSON file that is rewritten on every change.
pub struct TargetRegistry {
    path: PathBuf,
    targets: BTreeMap<TargetKey, RegisteredTarget>,
    subscribers: Vec<Subscriber>,
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("path", &self.path)
            .field("targets", &self.targets.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl TargetRegistry {
    /// Load the registry at `path`. A missing, unreadable or malformed file
    /// yields an empty registry; the latter two are logged.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let targets = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, RegisteredTarget>>(&raw) {
                Ok(stored) => stored.into_values().map(|t| (t.key(), t)).collect(),
                Err(e) => {
                    warn!(path = %path.display(), "registry file corrupt, starting empty: {e}");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), "registry file unreadable, starting empty: {e}");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), targets = targets.len(), "registry loaded");
        Self {
            path,
            targets,
            subscribers: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Called after every successful register or unregister.
    pub fn subscribe<F>(&mut self, f: F)
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(f));
    }

    /// Add or replace the registration for the target's key.
    pub fn register(
        &mut self,
        name: &str,
        home_zone: &str,
        archive_path: impl Into<PathBuf>,
    ) -> Result<RegisteredTarget> {
        let target = RegisteredTarget {
            name: name.to_string(),
            home_zone: home_zone.to_string(),
            archive_path: archive_path.into(),
        };
        self.targets.insert(target.key(), target.clone());
        self.save()?;
        info!(key = %target.key(), archive = %target.archive_path.display(), "registered");
        self.emit(&RegistryEvent::Registered(target.clone()));
        Ok(target)
    }

    /// Returns `false`, and notifies nobody, when nothing was registered.
    pub fn unregister(&mut self, name: &str, home_zone: &str) -> Result<bool> {
        let key = TargetKey::new(name, home_zone);
        if self.targets.remove(&key).is_none() {
            return Ok(false);
        }
        self.save()?;
        info!(key = %key, "unregistered");
        self.emit(&RegistryEvent::Unregistered(key));
        Ok(true)
    }

    pub fn lookup(&self, name: &str, home_zone: &str) -> Option<&RegisteredTarget> {
        self.get(&TargetKey::new(name, home_zone))
    }

    pub fn get(&self, key: &TargetKey) -> Option<&RegisteredTarget> {
        self.targets.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredTarget> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    // Plain rewrite, not temp-and-rename.
    pub fn save(&self) -> Result<()> {
        let stored: BTreeMap<String, &RegisteredTarget> = self
            .targets
            .iter()
            .map(|(k, t)| (k.to_string(), t))
            .collect();
        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| McdfError::Format(format!("registry encode: {e}")))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn emit(&self, event: &RegistryEvent) {
        for s in &self.subscribers {
            s(event);
        }
    }
}
