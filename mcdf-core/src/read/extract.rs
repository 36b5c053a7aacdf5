use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::opened::ArchiveReader;
use crate::error::{McdfError, Result};
use crate::hash::is_hex_fingerprint;

/// File name an extracted blob is written under.
pub fn blob_file_name(fingerprint: &str) -> String {
    format!("blob_{fingerprint}.bin")
}

/// Stream every blob out of `reader` into `dest`.
///
/// Blobs are read strictly in descriptor order, `length` bytes each; the stream
/// has no framing of its own, so reading out of order would corrupt every later
/// blob. A descriptor claiming more bytes than remain fails with `UnexpectedEof`.
pub fn extract_blobs(reader: &mut ArchiveReader, dest: &Path) -> Result<BTreeMap<String, PathBuf>> {
    if reader.consumed {
        return Err(McdfError::Format("blobs already extracted from this handle".into()));
    }
    reader.consumed = true;

    let files = reader.payload().files.clone();
    for fe in &files {
        if !is_hex_fingerprint(&fe.fingerprint) {
            return Err(McdfError::Format(format!(
                "unsafe fingerprint: {:?}",
                fe.fingerprint
            )));
        }
    }

    std::fs::create_dir_all(dest)?;
    let mut mapping = BTreeMap::new();

    for fe in &files {
        let outp = dest.join(blob_file_name(&fe.fingerprint));
        let mut out = BufWriter::new(File::create(&outp)?);
        let copied = std::io::copy(&mut (&mut reader.stream).take(fe.length), &mut out)?;
        out.flush()?;
        if copied != fe.length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "blob {} truncated: {copied} of {} bytes",
                    fe.fingerprint, fe.length
                ),
            )
            .into());
        }

        for p in &fe.reference_paths {
            mapping.insert(p.clone(), outp.clone());
        }
    }

    debug!(
        blobs = files.len(),
        paths = mapping.len(),
        dest = %dest.display(),
        "blobs extracted"
    );
    Ok(mapping)
}
