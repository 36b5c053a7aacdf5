pub mod header;
pub mod payload;

pub use header::{Header, MAGIC, VERSION};
pub use payload::{ArchivePayload, BlobDescriptor};
