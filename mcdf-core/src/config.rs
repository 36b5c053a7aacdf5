use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{McdfError, Result};

pub const DEFAULT_REGISTRY_FILE: &str = "registered_characters.json";

/// Delays used while applying an archive. The settle delay values were tuned
/// against the external services, which finish some work asynchronously.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyTimings {
    /// Pause between reverting and injecting, and between injecting and applying.
    pub settle_delay_ms: u64,
    pub redraw_poll_ms: u64,
    pub redraw_timeout_ms: u64,
    /// Extra wait once the entity reports drawn.
    pub redraw_grace_ms: u64,
}

impl Default for ApplyTimings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 100,
            redraw_poll_ms: 100,
            redraw_timeout_ms: 5_000,
            redraw_grace_ms: 1_000,
        }
    }
}

impl ApplyTimings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn redraw_poll(&self) -> Duration {
        Duration::from_millis(self.redraw_poll_ms.max(1))
    }

    pub fn redraw_timeout(&self) -> Duration {
        Duration::from_millis(self.redraw_timeout_ms)
    }

    pub fn redraw_grace(&self) -> Duration {
        Duration::from_millis(self.redraw_grace_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub tick_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 250,
        }
    }
}

impl CoordinatorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub registry_path: PathBuf,
    /// Root for per-apply extraction directories.
    pub temp_dir: PathBuf,
    pub compression_level: i32,
    pub apply: ApplyTimings,
    pub coordinator: CoordinatorConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from(DEFAULT_REGISTRY_FILE),
            temp_dir: std::env::temp_dir().join("mcdf"),
            compression_level: codec::DEFAULT_LEVEL,
            apply: ApplyTimings::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl Settings {
    /// Load from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw)
            .map_err(|e| McdfError::Format(format!("settings {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| McdfError::Format(format!("settings encode: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}
