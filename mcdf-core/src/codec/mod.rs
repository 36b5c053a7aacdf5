//! Streaming compression for the archive container.
//!
//! The whole container, header included, sits inside a single zstd frame. These
//! helpers are the only place the crate touches the zstd API.

use std::io::{BufRead, BufReader, Read, Write};

use crate::error::Result;

/// High-ratio mode used for exports unless configured otherwise.
pub const DEFAULT_LEVEL: i32 = 19;

/// zstd frame magic (`28 b5 2f fd`), the first bytes of every archive file.
pub const FRAME_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

pub type StreamEncoder<W> = zstd::stream::write::Encoder<'static, W>;
pub type StreamDecoder<R> = zstd::stream::read::Decoder<'static, BufReader<R>>;

pub fn encoder<W: Write>(sink: W, level: i32) -> Result<StreamEncoder<W>> {
    let level = level.clamp(1, *zstd::compression_level_range().end());
    // Single-threaded so identical input yields identical bytes.
    let mut enc = zstd::stream::write::Encoder::new(sink, level)?;
    enc.include_checksum(true)?;
    Ok(enc)
}

/// Flush the frame epilogue and hand back the sink, flushed.
pub fn finish<W: Write>(enc: StreamEncoder<W>) -> Result<W> {
    let mut sink = enc.finish()?;
    sink.flush()?;
    Ok(sink)
}

/// Open a decompressing reader. Returns `Ok(None)` when `src` does not start
/// with a zstd frame, so callers can treat it as "not ours".
pub fn decoder<R: Read>(src: R) -> Result<Option<StreamDecoder<R>>> {
    let mut buffered = BufReader::new(src);
    let head = buffered.fill_buf()?;
    if head.len() < FRAME_MAGIC.len() || head[..FRAME_MAGIC.len()] != FRAME_MAGIC {
        return Ok(None);
    }
    Ok(Some(zstd::stream::read::Decoder::with_buffer(buffered)?))
}
