pub mod writer;

pub use writer::{PackOptions, encode, write_archive};
