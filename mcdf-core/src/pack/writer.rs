use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec;
use crate::container::{ArchivePayload, Header};
use crate::error::{McdfError, Result};

#[derive(Clone, Debug)]
pub struct PackOptions {
    /// zstd level for the container stream.
    pub level: i32,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            level: codec::DEFAULT_LEVEL,
        }
    }
}

/// Write adapter that counts uncompressed bytes going into the encoder.
struct CountingWriter<'a, W: Write> {
    inner: &'a mut W,
    n: u64,
}

impl<'a, W: Write> CountingWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self { inner, n: 0 }
    }
}

impl<'a, W: Write> Write for CountingWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let k = self.inner.write(buf)?;
        self.n += k as u64;
        Ok(k)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Encode a container into `sink`.
///
/// `sources[i]` supplies the bytes for `payload.files[i]`; exactly `length` bytes
/// are copied from each. `on_blob` is called after every blob with its index.
/// Returns the sink, flushed, and the number of uncompressed bytes written.
pub fn encode<W, F>(
    sink: W,
    payload: &ArchivePayload,
    sources: &[PathBuf],
    opts: &PackOptions,
    mut on_blob: F,
) -> Result<(W, u64)>
where
    W: Write,
    F: FnMut(usize),
{
    if sources.len() != payload.files.len() {
        return Err(McdfError::Format(format!(
            "{} blob sources for {} descriptors",
            sources.len(),
            payload.files.len()
        )));
    }

    let payload_buf = payload.to_bytes()?;
    let payload_len = u32::try_from(payload_buf.len())
        .map_err(|_| McdfError::Format("payload larger than 4 GiB".into()))?;

    let mut enc = codec::encoder(sink, opts.level)?;
    let written = {
        let mut cw = CountingWriter::new(&mut enc);
        Header::new(payload_len).write_to(&mut cw)?;
        cw.write_all(&payload_buf)?;

        for (i, (desc, src)) in payload.files.iter().zip(sources).enumerate() {
            let f = File::open(src)?;
            let copied = std::io::copy(&mut BufReader::new(f).take(desc.length), &mut cw)?;
            if copied != desc.length {
                return Err(McdfError::Format(format!(
                    "blob {} ({}) yielded {copied} of {} bytes; source changed since hashing",
                    desc.fingerprint,
                    src.display(),
                    desc.length
                )));
            }
            on_blob(i);
        }
        cw.n
    };

    let sink = codec::finish(enc)?;
    debug!(
        blobs = payload.files.len(),
        uncompressed = written,
        "encoded archive"
    );
    Ok((sink, written))
}

/// Encode into `out` atomically: the container is written to a temporary file in
/// the destination directory and renamed over `out` only once it is complete.
pub fn write_archive<F>(
    out: &Path,
    payload: &ArchivePayload,
    sources: &[PathBuf],
    opts: &PackOptions,
    on_blob: F,
) -> Result<u64>
where
    F: FnMut(usize),
{
    let dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let tmp = tempfile::Builder::new()
        .prefix(".mcdf-")
        .suffix(".tmp")
        .tempfile_in(&dir)?;
    let (tmp_file, tmp_path) = tmp.into_parts();

    let (buffered, written) = encode(BufWriter::new(tmp_file), payload, sources, opts, on_blob)?;
    let file = buffered
        .into_inner()
        .map_err(|e| McdfError::Io(e.into_error()))?;
    file.sync_all()?;
    drop(file);

    tmp_path.persist(out).map_err(|e| McdfError::Io(e.error))?;
    debug!(path = %out.display(), "archive written");
    Ok(written)
}
