//! Level file format.
//!
//! Binary, little-endian, magic-delimited at both ends. Only the editable
//! topology is stored; meshes, subsectors, the grid and the visibility
//! matrix are derived data and get rebuilt on load.

mod loader;
mod raw;

pub use loader::{FORMAT_VERSION, MAGIC, load_file, load_level, save_file, save_level};
pub use raw::NONE_IDX;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a level file (bad magic)")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("{what} index {index} out of range")]
    BadIndex { what: &'static str, index: u16 },

    #[error("{0} array length disagrees with its entity array")]
    CountMismatch(&'static str),

    #[error("file truncated or trailing marker missing")]
    Truncated,
}

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("too many {0} for the on-disk index width")]
    TooLarge(&'static str),
}
