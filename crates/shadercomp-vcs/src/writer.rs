use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::VcsError;
use crate::format::{AliasRecord, StaticComboRecord, VcsHeader, SENTINEL_COMBO_ID, VCS_VERSION};

const DEDUP_BUCKETS: usize = 73;

/// Per-shader metadata carried into the archive header.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveInfo {
    pub total_combos: u64,
    pub dynamic_combos: u64,
    pub centroid_mask: u32,
    pub source_crc32: u32,
}

/// Encodes one shader's archive.
///
/// `combos` holds `(static_combo_id, packed_blob)` pairs in ascending id
/// order; each blob is the output of a finished
/// [`BlockPacker`](crate::BlockPacker). Byte-identical blobs are collapsed:
/// only the first occurrence contributes a body, later ones become alias
/// records. The dictionary is first written with placeholder offsets and
/// patched in place once the body positions are known.
pub fn write_archive<W: Write + Seek>(
    w: &mut W,
    info: &ArchiveInfo,
    combos: &[(u32, Vec<u8>)],
) -> Result<(), VcsError> {
    if combos.windows(2).any(|pair| pair[0].0 >= pair[1].0) {
        return Err(VcsError::malformed(
            "static combos must be ascending and unique",
        ));
    }

    // CRC-bucketed dedup; a blob is a duplicate only when crc, length and a
    // full byte compare all agree.
    let mut uniques: Vec<(u32, &[u8])> = Vec::with_capacity(combos.len());
    let mut aliases: Vec<AliasRecord> = Vec::new();
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); DEDUP_BUCKETS];
    let mut crcs: Vec<u32> = Vec::with_capacity(combos.len());
    for (id, blob) in combos {
        let crc = crc32fast::hash(blob);
        let bucket = &mut buckets[(crc % DEDUP_BUCKETS as u32) as usize];
        let canonical = bucket.iter().copied().find(|&i| {
            crcs[i] == crc && uniques[i].1.len() == blob.len() && uniques[i].1 == blob.as_slice()
        });
        match canonical {
            Some(i) => aliases.push(AliasRecord {
                static_combo_id: *id,
                canonical_combo_id: uniques[i].0,
            }),
            None => {
                bucket.push(uniques.len());
                crcs.push(crc);
                uniques.push((*id, blob.as_slice()));
            }
        }
    }
    debug!(
        combos = combos.len(),
        unique = uniques.len(),
        aliases = aliases.len(),
        "writing archive"
    );

    let static_combo_count = u32::try_from(uniques.len() + 1)
        .map_err(|_| VcsError::malformed("static combo dictionary does not fit in 32 bits"))?;
    let header = VcsHeader {
        version: VCS_VERSION,
        total_combos: info.total_combos as i32,
        dynamic_combos: i32::try_from(info.dynamic_combos)
            .map_err(|_| VcsError::malformed("dynamic combo count does not fit in 32 bits"))?,
        flags: 0,
        centroid_mask: info.centroid_mask,
        static_combo_count,
        source_crc32: info.source_crc32,
    };
    header.write_to(w)?;

    // Dictionary with placeholder offsets, patched after the bodies land.
    let dictionary_pos = w.stream_position()?;
    let mut records: Vec<StaticComboRecord> = uniques
        .iter()
        .map(|&(id, _)| StaticComboRecord {
            static_combo_id: id,
            file_offset: 0,
        })
        .collect();
    records.push(StaticComboRecord {
        static_combo_id: SENTINEL_COMBO_ID,
        file_offset: 0,
    });
    write_records(w, &records)?;

    let alias_count = u32::try_from(aliases.len())
        .map_err(|_| VcsError::malformed("alias table does not fit in 32 bits"))?;
    w.write_all(&alias_count.to_le_bytes())?;
    for alias in &aliases {
        w.write_all(&alias.static_combo_id.to_le_bytes())?;
        w.write_all(&alias.canonical_combo_id.to_le_bytes())?;
    }

    for (record, &(_, blob)) in records.iter_mut().zip(&uniques) {
        record.file_offset =
            u32::try_from(w.stream_position()?).map_err(|_| VcsError::ArchiveTooLarge)?;
        w.write_all(blob)?;
    }
    // The sentinel stores the end-of-body position so a reader can size the
    // last combo.
    records
        .last_mut()
        .expect("records always holds the sentinel")
        .file_offset = u32::try_from(w.stream_position()?).map_err(|_| VcsError::ArchiveTooLarge)?;

    w.seek(SeekFrom::Start(dictionary_pos))?;
    write_records(w, &records)?;
    w.seek(SeekFrom::End(0))?;
    Ok(())
}

fn write_records<W: Write>(w: &mut W, records: &[StaticComboRecord]) -> Result<(), VcsError> {
    for record in records {
        w.write_all(&record.static_combo_id.to_le_bytes())?;
        w.write_all(&record.file_offset.to_le_bytes())?;
    }
    Ok(())
}

/// Path of one shader's archive under the build root.
pub fn vcs_path(root: &Path, shader_name: &str) -> PathBuf {
    root.join("shaders")
        .join("fxc")
        .join(format!("{shader_name}.vcs"))
}

/// Resolves the archive path for writing: creates the output directory as
/// needed and relaxes a read-only file so it can be truncated.
pub fn prepare_vcs_path(root: &Path, shader_name: &str) -> Result<PathBuf, VcsError> {
    let path = vcs_path(root, shader_name);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    if let Ok(metadata) = path.metadata() {
        let mut permissions = metadata.permissions();
        if permissions.readonly() {
            warn!(path = %path.display(), "making read-only archive writable");
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(&path, permissions)?;
        }
    }
    Ok(path)
}

/// Removes a (possibly stale or partially-written) archive. Missing files
/// are not an error.
pub fn remove_vcs(root: &Path, shader_name: &str) -> Result<(), VcsError> {
    match fs::remove_file(vcs_path(root, shader_name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::pack::BlockPacker;

    fn packed(payloads: &[(u32, &[u8])]) -> Vec<u8> {
        let mut packer = BlockPacker::new();
        for (id, payload) in payloads {
            packer.push(*id, payload).unwrap();
        }
        packer.finish().unwrap()
    }

    fn info() -> ArchiveInfo {
        ArchiveInfo {
            total_combos: 8,
            dynamic_combos: 2,
            centroid_mask: 0x3,
            source_crc32: 0xDEAD_BEEF,
        }
    }

    #[test]
    fn identical_blobs_collapse_to_one_body_and_an_alias() {
        let blob = packed(&[(0, b"same bytes")]);
        let other = packed(&[(0, b"other bytes")]);
        let combos = vec![(0u32, blob.clone()), (1, other), (2, blob.clone())];
        let mut out = Cursor::new(Vec::new());
        write_archive(&mut out, &info(), &combos).unwrap();
        let bytes = out.into_inner();

        let archive = crate::reader::VcsArchive::parse(&bytes).unwrap();
        assert_eq!(archive.records().len(), 3); // two bodies + sentinel
        assert_eq!(
            archive.aliases(),
            &[AliasRecord {
                static_combo_id: 2,
                canonical_combo_id: 0,
            }]
        );
        assert_eq!(archive.packed_blob(2).unwrap(), archive.packed_blob(0).unwrap());
    }

    #[test]
    fn empty_shader_writes_header_and_sentinel_only() {
        let mut out = Cursor::new(Vec::new());
        write_archive(&mut out, &info(), &[]).unwrap();
        let bytes = out.into_inner();
        // header + one sentinel record + empty alias table
        assert_eq!(bytes.len(), 28 + 8 + 4);
        let archive = crate::reader::VcsArchive::parse(&bytes).unwrap();
        assert_eq!(archive.header().static_combo_count, 1);
        assert_eq!(archive.end_of_body() as usize, bytes.len());
        assert!(archive.aliases().is_empty());
    }

    #[test]
    fn rejects_unsorted_combos() {
        let blob = packed(&[(0, b"x")]);
        let combos = vec![(3u32, blob.clone()), (1, blob)];
        let mut out = Cursor::new(Vec::new());
        assert!(matches!(
            write_archive(&mut out, &info(), &combos),
            Err(VcsError::Malformed(_))
        ));
    }

    #[test]
    fn staging_creates_directories_and_relaxes_readonly() {
        let dir = tempfile::tempdir().unwrap();
        let path = prepare_vcs_path(dir.path(), "water_ps20").unwrap();
        assert_eq!(path, dir.path().join("shaders/fxc/water_ps20.vcs"));
        assert!(path.parent().unwrap().is_dir());

        fs::write(&path, b"stale").unwrap();
        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&path, permissions).unwrap();

        let again = prepare_vcs_path(dir.path(), "water_ps20").unwrap();
        assert!(!fs::metadata(&again).unwrap().permissions().readonly());

        remove_vcs(dir.path(), "water_ps20").unwrap();
        assert!(!path.exists());
        // Removing an absent archive is fine.
        remove_vcs(dir.path(), "water_ps20").unwrap();
    }
}
