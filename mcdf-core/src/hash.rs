//! Content fingerprints for blob deduplication.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;

/// BLAKE3 of a byte slice as lowercase hex.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Hashes files and remembers the result per path.
///
/// One hasher lives for exactly one export run; a path hashed twice in that run
/// is read once. Unreadable sources are returned as errors, never skipped.
#[derive(Debug, Default)]
pub struct ContentHasher {
    memo: Mutex<HashMap<PathBuf, String>>,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash_file(&self, path: &Path) -> Result<String> {
        if let Some(hit) = self.cached(path) {
            return Ok(hit);
        }

        let mut hasher = blake3::Hasher::new();
        let mut src = BufReader::new(File::open(path)?);
        std::io::copy(&mut src, &mut hasher)?;
        let hex = hasher.finalize().to_hex().to_string();

        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(path.to_path_buf(), hex.clone());
        }
        Ok(hex)
    }

    fn cached(&self, path: &Path) -> Option<String> {
        self.memo.lock().ok()?.get(path).cloned()
    }

    pub fn cached_len(&self) -> usize {
        self.memo.lock().map(|m| m.len()).unwrap_or(0)
    }
}

/// True for strings that are safe to embed in a file name: non-empty ASCII hex.
pub fn is_hex_fingerprint(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}
