use std::io::{Read, Write};

pub const MAGIC: &[u8; 4] = b"MCDF";
pub const VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Recorded on read but not branched on yet.
    pub version: u8,
    /// Byte length of the UTF-8 JSON payload that follows the header.
    pub payload_len: u32,
}

impl Header {
    pub fn new(payload_len: u32) -> Self {
        Self {
            version: VERSION,
            payload_len,
        }
    }

    pub fn write_to(&self, mut w: impl Write) -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&[self.version])?;
        w.write_all(&self.payload_len.to_le_bytes())?;
        Ok(())
    }

    /// Reads the magic tag only. A stream that fails here is not an archive; one
    /// that fails in [`Header::read_rest`] is a truncated archive.
    pub fn read_magic(mut r: impl Read) -> std::io::Result<[u8; 4]> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        Ok(magic)
    }

    /// Reads version and payload length; the magic tag must already be consumed.
    pub fn read_rest(mut r: impl Read) -> std::io::Result<Self> {
        let mut v = [0u8; 1];
        r.read_exact(&mut v)?;
        let mut len = [0u8; 4];
        r.read_exact(&mut len)?;
        Ok(Self {
            version: v[0],
            payload_len: u32::from_le_bytes(len),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_magic_version_le_length() {
        let mut buf = Vec::new();
        Header::new(0x0102_0304).write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 9);
        assert_eq!(&buf[..4], b"MCDF");
        assert_eq!(buf[4], VERSION);
        assert_eq!(&buf[5..], &[0x04, 0x03, 0x02, 0x01]);

        let mut r = &buf[..];
        assert_eq!(&Header::read_magic(&mut r).unwrap(), MAGIC);
        let back = Header::read_rest(&mut r).unwrap();
        assert_eq!(back, Header::new(0x0102_0304));
    }

    #[test]
    fn short_rest_is_unexpected_eof() {
        let err = Header::read_rest(&b"\x01\0\0"[..]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
