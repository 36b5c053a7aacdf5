pub mod extract;
pub mod opened;

pub use opened::ArchiveReader;
