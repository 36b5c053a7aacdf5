use serde::{Deserialize, Serialize};

use crate::error::{McdfError, Result};

/// One deduplicated blob as recorded in the payload. The bytes themselves live in
/// the trailing stream, in the same order as `ArchivePayload::files`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    #[serde(rename = "GamePaths", default)]
    pub reference_paths: Vec<String>,
    #[serde(rename = "Hash", default)]
    pub fingerprint: String,
    #[serde(rename = "Length", default)]
    pub length: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivePayload {
    #[serde(rename = "Description", default)]
    pub description: String,
    /// Base64 appearance state, opaque to us.
    #[serde(rename = "GlamourerData", default)]
    pub appearance_state: String,
    /// Base64 shape profile; empty means none.
    #[serde(rename = "CustomizePlusData", default)]
    pub shape_profile_state: String,
    #[serde(rename = "ManipulationData", default)]
    pub override_data: String,
    #[serde(rename = "Files", default)]
    pub files: Vec<BlobDescriptor>,
    /// Reserved. Always written empty, never read back.
    #[serde(rename = "FileSwaps", default, skip_deserializing)]
    pub path_swaps: Vec<serde_json::Value>,
}

impl ArchivePayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| McdfError::Format(format!("payload encode: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| McdfError::Format(format!("payload decode: {e}")))
    }

    pub fn has_shape_profile(&self) -> bool {
        !self.shape_profile_state.is_empty()
    }

    /// Sum of every blob length; what extraction will read after the payload.
    pub fn blob_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }
}
