//! The compiled-shader archive ("VCS") format.
//!
//! One archive holds every surviving static combo of a single shader. Each
//! static combo's dynamic combos are concatenated into bounded blocks that
//! are individually LZMA-compressed (or stored raw when compression grows
//! them), and byte-identical static combos collapse into alias records so
//! only one body is written.
//!
//! Layout (all fields little-endian):
//!
//! ```text
//! header                      7 x u32
//! static combo dictionary     (id, file offset) x N, ascending by id,
//!                             terminated by the 0xFFFFFFFF sentinel record
//!                             whose offset is the end-of-body position
//! alias count + alias records (id, canonical id), ascending by id
//! packed bodies               per unique static combo, in id order
//! ```
//!
//! The dictionary is written twice: once with placeholder offsets before the
//! bodies, then again with real offsets once the body positions are known.
//!
//! [`write_archive`] encodes, [`VcsArchive::parse`] decodes. The reader
//! treats its input as untrusted: every offset and size is validated and
//! malformed data never panics.

#![forbid(unsafe_code)]

mod error;
mod format;
mod pack;
mod reader;
mod writer;

pub use crate::error::VcsError;
pub use crate::format::{
    AliasRecord, StaticComboRecord, VcsHeader, BLOCK_END, BLOCK_FLAG_LZMA, BLOCK_FLAG_MASK,
    BLOCK_FLAG_STORED, BLOCK_SIZE_MASK, MAX_UNPACKED_BLOCK_SIZE, SENTINEL_COMBO_ID, VCS_VERSION,
};
pub use crate::pack::{unpack_static_combo, BlockPacker};
pub use crate::reader::VcsArchive;
pub use crate::writer::{prepare_vcs_path, remove_vcs, vcs_path, write_archive, ArchiveInfo};
