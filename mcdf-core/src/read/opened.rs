use std::collections::BTreeMap;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::codec::{self, StreamDecoder};
use crate::container::{ArchivePayload, Header, MAGIC};
use crate::error::{McdfError, Result};

/// An open archive: header and payload decoded, blob bytes still pending in the
/// decompression stream.
///
/// Dropping the reader (or calling [`ArchiveReader::close`]) releases the file.
/// Blobs can be extracted once, before closing.
pub struct ArchiveReader {
    path: PathBuf,
    header: Header,
    payload: ArchivePayload,
    pub(crate) stream: StreamDecoder<File>,
    pub(crate) consumed: bool,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("blobs", &self.payload.files.len())
            .field("consumed", &self.consumed)
            .finish()
    }
}

impl ArchiveReader {
    /// Open and decode the header of the archive at `path`.
    ///
    /// `Ok(None)` means "not an archive": the file could not be opened, is not a
    /// compressed stream, or does not start with the magic tag once decompressed.
    /// A truncated header or payload, or a payload that does not parse, is a
    /// format error.
    pub fn open(path: &Path) -> Result<Option<Self>> {
        let f = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), "cannot open archive: {e}");
                return Ok(None);
            }
        };

        let mut stream = match codec::decoder(f) {
            Ok(Some(s)) => s,
            Ok(None) => {
                debug!(path = %path.display(), "not a compressed stream");
                return Ok(None);
            }
            Err(e) => {
                warn!(path = %path.display(), "cannot read archive: {e}");
                return Ok(None);
            }
        };

        let magic = match Header::read_magic(&mut stream) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), "archive stream unreadable: {e}");
                return Ok(None);
            }
        };
        if &magic != MAGIC {
            warn!(path = %path.display(), magic = ?magic, "not an archive: bad magic tag");
            return Ok(None);
        }

        let header = Header::read_rest(&mut stream).map_err(truncated("header"))?;
        // The length comes from the file; only what the stream yields is buffered.
        let mut payload_buf = Vec::new();
        (&mut stream)
            .take(u64::from(header.payload_len))
            .read_to_end(&mut payload_buf)
            .map_err(truncated("payload"))?;
        if payload_buf.len() as u64 != u64::from(header.payload_len) {
            return Err(McdfError::Format("archive truncated in payload".into()));
        }
        let payload = ArchivePayload::from_bytes(&payload_buf)?;

        debug!(
            path = %path.display(),
            version = header.version,
            blobs = payload.files.len(),
            "archive header decoded"
        );

        Ok(Some(Self {
            path: path.to_path_buf(),
            header,
            payload,
            stream,
            consumed: false,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.header.version
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &ArchivePayload {
        &self.payload
    }

    /// Write every blob into `dest` and map each reference path to its file.
    /// See [`crate::read::extract::extract_blobs`].
    pub fn extract_blobs(&mut self, dest: &Path) -> Result<BTreeMap<String, PathBuf>> {
        crate::read::extract::extract_blobs(self, dest)
    }

    pub fn close(self) {
        debug!(path = %self.path.display(), "archive closed");
    }
}

fn truncated(what: &'static str) -> impl Fn(std::io::Error) -> McdfError {
    move |e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            McdfError::Format(format!("archive truncated in {what}"))
        } else {
            McdfError::Io(e)
        }
    }
}
