use thiserror::Error;

/// Errors produced while packing, writing or reading a VCS archive.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dynamic combo {dynamic_id}: payload of {len} bytes does not fit a record")]
    PayloadTooLarge { dynamic_id: u32, len: usize },
    #[error("packed block of {len} bytes exceeds the 30-bit size limit")]
    BlockTooLarge { len: usize },
    #[error("static combo id {id} does not fit in 32 bits")]
    ComboIdTooLarge { id: u64 },
    #[error("archive body grew past the 32-bit offset limit")]
    ArchiveTooLarge,
    #[error("LZMA: {0}")]
    Lzma(String),
    #[error("legacy bzip2 block is not supported")]
    LegacyBzip2,
    #[error("reserved block flag encountered")]
    ReservedBlockFlag,
    #[error("malformed archive: {0}")]
    Malformed(String),
}

impl VcsError {
    pub(crate) fn malformed(msg: impl Into<String>) -> VcsError {
        VcsError::Malformed(msg.into())
    }
}
