use crate::error::VcsError;
use crate::format::{
    read_u32_le, AliasRecord, StaticComboRecord, VcsHeader, HEADER_LEN, RECORD_LEN,
    SENTINEL_COMBO_ID, VCS_VERSION,
};
use crate::pack::unpack_static_combo;

/// A parsed VCS archive.
///
/// Parsing is strict about bounds: the dictionary, alias table and every
/// body offset are validated against the input length, and alias records
/// must point at real bodies. The input is treated as **untrusted** and
/// malformed data never panics.
#[derive(Debug, Clone)]
pub struct VcsArchive<'a> {
    bytes: &'a [u8],
    header: VcsHeader,
    records: Vec<StaticComboRecord>,
    aliases: Vec<AliasRecord>,
}

impl<'a> VcsArchive<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<VcsArchive<'a>, VcsError> {
        let header = VcsHeader::parse(bytes)?;
        if header.version != VCS_VERSION {
            return Err(VcsError::malformed(format!(
                "unsupported archive version {}, expected {VCS_VERSION}",
                header.version
            )));
        }
        if header.static_combo_count == 0 {
            return Err(VcsError::malformed(
                "dictionary must hold at least the sentinel record",
            ));
        }

        let record_count = header.static_combo_count as usize;
        let records_len = record_count
            .checked_mul(RECORD_LEN)
            .ok_or_else(|| VcsError::malformed("dictionary size overflows"))?;
        let dictionary_end = HEADER_LEN
            .checked_add(records_len)
            .ok_or_else(|| VcsError::malformed("dictionary size overflows"))?;
        if dictionary_end > bytes.len() {
            return Err(VcsError::malformed(format!(
                "dictionary of {record_count} records does not fit an archive of {} bytes",
                bytes.len()
            )));
        }
        let mut pos = HEADER_LEN;
        let mut records: Vec<StaticComboRecord> = Vec::with_capacity(record_count);
        for i in 0..record_count {
            let record = StaticComboRecord {
                static_combo_id: read_u32_le(bytes, pos)?,
                file_offset: read_u32_le(bytes, pos + 4)?,
            };
            if let Some(prev) = records.last() {
                if record.static_combo_id <= prev.static_combo_id {
                    return Err(VcsError::malformed(format!(
                        "dictionary ids not ascending at record {i}"
                    )));
                }
            }
            records.push(record);
            pos += RECORD_LEN;
        }
        debug_assert_eq!(pos, HEADER_LEN + records_len);
        let sentinel = records
            .last()
            .expect("record_count is at least one");
        if sentinel.static_combo_id != SENTINEL_COMBO_ID {
            return Err(VcsError::malformed(format!(
                "dictionary does not end with the sentinel record (last id {:#x})",
                sentinel.static_combo_id
            )));
        }

        let alias_count = read_u32_le(bytes, pos)? as usize;
        pos += 4;
        let mut aliases: Vec<AliasRecord> = Vec::with_capacity(alias_count.min(4096));
        for i in 0..alias_count {
            let alias = AliasRecord {
                static_combo_id: read_u32_le(bytes, pos)?,
                canonical_combo_id: read_u32_le(bytes, pos + 4)?,
            };
            if let Some(prev) = aliases.last() {
                if alias.static_combo_id <= prev.static_combo_id {
                    return Err(VcsError::malformed(format!(
                        "alias ids not ascending at record {i}"
                    )));
                }
            }
            pos += RECORD_LEN;
            aliases.push(alias);
        }
        let body_start = pos;

        // Bodies are laid out back-to-back in dictionary order; the sentinel
        // offset closes the last one.
        let mut prev_offset = body_start;
        for (i, record) in records.iter().enumerate() {
            let offset = record.file_offset as usize;
            if offset < prev_offset || offset > bytes.len() {
                return Err(VcsError::malformed(format!(
                    "record {i} offset {offset} is outside {prev_offset}..{}",
                    bytes.len()
                )));
            }
            prev_offset = offset;
        }
        if records.first().map(|r| r.file_offset as usize) != Some(body_start)
            && records.len() > 1
        {
            return Err(VcsError::malformed(
                "first body does not start right after the alias table",
            ));
        }

        for alias in &aliases {
            let resolves = records
                .iter()
                .any(|r| r.static_combo_id == alias.canonical_combo_id);
            if !resolves || alias.canonical_combo_id == SENTINEL_COMBO_ID {
                return Err(VcsError::malformed(format!(
                    "alias {} points at missing combo {}",
                    alias.static_combo_id, alias.canonical_combo_id
                )));
            }
        }

        Ok(VcsArchive {
            bytes,
            header,
            records,
            aliases,
        })
    }

    pub fn header(&self) -> &VcsHeader {
        &self.header
    }

    /// The dictionary, including the trailing sentinel record.
    pub fn records(&self) -> &[StaticComboRecord] {
        &self.records
    }

    pub fn aliases(&self) -> &[AliasRecord] {
        &self.aliases
    }

    /// End-of-body position stored in the sentinel record.
    pub fn end_of_body(&self) -> u32 {
        self.records
            .last()
            .expect("parse guarantees the sentinel")
            .file_offset
    }

    /// The packed blob for a static combo, resolving aliases. `None` when
    /// the id has no body (skipped combo).
    pub fn packed_blob(&self, static_combo_id: u32) -> Option<&'a [u8]> {
        let id = self
            .aliases
            .binary_search_by_key(&static_combo_id, |a| a.static_combo_id)
            .map(|i| self.aliases[i].canonical_combo_id)
            .unwrap_or(static_combo_id);
        let i = self
            .records
            .binary_search_by_key(&id, |r| r.static_combo_id)
            .ok()?;
        if id == SENTINEL_COMBO_ID {
            return None;
        }
        let start = self.records[i].file_offset as usize;
        let end = self.records[i + 1].file_offset as usize;
        self.bytes.get(start..end)
    }

    /// Unpacks a static combo back into `(dynamic_id, payload)` pairs.
    pub fn dynamic_combos(&self, static_combo_id: u32) -> Result<Vec<(u32, Vec<u8>)>, VcsError> {
        let blob = self.packed_blob(static_combo_id).ok_or_else(|| {
            VcsError::malformed(format!("static combo {static_combo_id} has no body"))
        })?;
        unpack_static_combo(blob)
    }

    /// Every `(static_combo_id, dynamic_id, payload)` tuple in the archive,
    /// including aliased combos.
    pub fn all_combos(&self) -> Result<Vec<(u32, u32, Vec<u8>)>, VcsError> {
        let mut out = Vec::new();
        let body_ids = self
            .records
            .iter()
            .map(|r| r.static_combo_id)
            .filter(|&id| id != SENTINEL_COMBO_ID);
        let alias_ids = self.aliases.iter().map(|a| a.static_combo_id);
        let mut ids: Vec<u32> = body_ids.chain(alias_ids).collect();
        ids.sort_unstable();
        for id in ids {
            for (dynamic_id, payload) in self.dynamic_combos(id)? {
                out.push((id, dynamic_id, payload));
            }
        }
        Ok(out)
    }
}
