use crate::error::VcsError;
use crate::format::{
    read_u32_le, BLOCK_END, BLOCK_FLAG_LZMA, BLOCK_FLAG_MASK, BLOCK_FLAG_STORED, BLOCK_SIZE_MASK,
    MAX_UNPACKED_BLOCK_SIZE,
};

/// Packs one static combo's dynamic-combo payloads into the blockwise
/// compressed blob stored in the archive.
///
/// Records of the form `u32 dynamic_id | u32 payload_len | payload` are
/// appended to a pending buffer; whenever the next record would push the
/// buffer past [`MAX_UNPACKED_BLOCK_SIZE`] the buffer is flushed as one
/// block. A block is LZMA-compressed unless compression grows it, in which
/// case the bytes are stored raw. Records never straddle a block boundary.
///
/// Push dynamic combos in ascending id order, then call
/// [`BlockPacker::finish`], which flushes the final block and terminates the
/// blob with the [`BLOCK_END`] sentinel word.
#[derive(Debug, Default)]
pub struct BlockPacker {
    pending: Vec<u8>,
    packed: Vec<u8>,
}

impl BlockPacker {
    pub fn new() -> BlockPacker {
        BlockPacker::default()
    }

    /// Appends one dynamic combo's compiled payload.
    pub fn push(&mut self, dynamic_id: u32, payload: &[u8]) -> Result<(), VcsError> {
        if u32::try_from(payload.len()).is_err() {
            return Err(VcsError::PayloadTooLarge {
                dynamic_id,
                len: payload.len(),
            });
        }
        if self.pending.len() + payload.len() + 16 >= MAX_UNPACKED_BLOCK_SIZE {
            self.flush()?;
        }
        self.pending.extend_from_slice(&dynamic_id.to_le_bytes());
        self.pending
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.pending.extend_from_slice(payload);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), VcsError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut compressed = Vec::new();
        lzma_rs::lzma_compress(&mut self.pending.as_slice(), &mut compressed)
            .map_err(|e| VcsError::Lzma(e.to_string()))?;
        let (flag, bytes) = if compressed.len() < self.pending.len() {
            (BLOCK_FLAG_LZMA, compressed.as_slice())
        } else {
            // Compression grew the block; store it raw.
            (BLOCK_FLAG_STORED, self.pending.as_slice())
        };
        if bytes.len() > BLOCK_SIZE_MASK as usize {
            return Err(VcsError::BlockTooLarge { len: bytes.len() });
        }
        self.packed
            .extend_from_slice(&(flag | bytes.len() as u32).to_le_bytes());
        self.packed.extend_from_slice(bytes);
        self.pending.clear();
        Ok(())
    }

    /// Flushes the last block and returns the finished blob, terminated by
    /// the [`BLOCK_END`] sentinel.
    pub fn finish(mut self) -> Result<Vec<u8>, VcsError> {
        self.flush()?;
        self.packed.extend_from_slice(&BLOCK_END.to_le_bytes());
        Ok(self.packed)
    }
}

/// Reverses [`BlockPacker`]: parses a packed blob back into
/// `(dynamic_id, payload)` pairs.
pub fn unpack_static_combo(blob: &[u8]) -> Result<Vec<(u32, Vec<u8>)>, VcsError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    loop {
        let word = read_u32_le(blob, pos)?;
        pos += 4;
        if word == BLOCK_END {
            if pos != blob.len() {
                return Err(VcsError::malformed(format!(
                    "{} trailing bytes after block terminator",
                    blob.len() - pos
                )));
            }
            return Ok(out);
        }
        let size = (word & BLOCK_SIZE_MASK) as usize;
        let end = pos
            .checked_add(size)
            .ok_or_else(|| VcsError::malformed("block size overflows"))?;
        let body = blob.get(pos..end).ok_or_else(|| {
            VcsError::malformed(format!(
                "block at {pos}..{end} is outside the blob of {} bytes",
                blob.len()
            ))
        })?;
        pos = end;

        let unpacked_storage;
        let unpacked: &[u8] = match word & BLOCK_FLAG_MASK {
            BLOCK_FLAG_STORED => body,
            BLOCK_FLAG_LZMA => {
                let mut buf = Vec::new();
                lzma_rs::lzma_decompress(&mut &body[..], &mut buf)
                    .map_err(|e| VcsError::Lzma(e.to_string()))?;
                unpacked_storage = buf;
                &unpacked_storage
            }
            0 => return Err(VcsError::LegacyBzip2),
            _ => return Err(VcsError::ReservedBlockFlag),
        };

        let mut rec = 0usize;
        while rec < unpacked.len() {
            let dynamic_id = read_u32_le(unpacked, rec)?;
            let len = read_u32_le(unpacked, rec + 4)? as usize;
            let start = rec + 8;
            let end = start
                .checked_add(len)
                .ok_or_else(|| VcsError::malformed("record size overflows"))?;
            let payload = unpacked.get(start..end).ok_or_else(|| {
                VcsError::malformed(format!(
                    "record for dynamic combo {dynamic_id} at {start}..{end} is outside its block"
                ))
            })?;
            out.push((dynamic_id, payload.to_vec()));
            rec = end;
        }
    }
}
