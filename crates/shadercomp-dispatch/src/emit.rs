use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use shadercomp_combo::ShaderEntry;
use shadercomp_vcs::{
    prepare_vcs_path, remove_vcs, write_archive, ArchiveInfo, VcsError,
};
use tracing::{debug, info, warn};

use crate::context::BuildContext;
use crate::sync::LockKind;

/// What [`write_shader_files`] did for a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Archive written.
    Written,
    /// This run already wrote (or removed) the shader; nothing happened.
    AlreadyWritten,
    /// The shader had compile errors; any stale archive was removed and no
    /// new one was written.
    RemovedFailed,
}

/// Emits one shader's VCS archive from its accumulated static combos.
///
/// Idempotent within a run: the first call detaches the shader's
/// accumulator and performs the file I/O, repeats are no-ops. A shader
/// marked had-error writes nothing and removes any pre-existing archive of
/// the same name; an I/O failure mid-write removes the partial file and
/// marks the shader failed.
pub fn write_shader_files<K: LockKind>(
    ctx: &BuildContext<K>,
    entry: &ShaderEntry,
    shader_root: &Path,
) -> Result<WriteOutcome, VcsError> {
    let name = entry.name();
    let (first, failed, accum) = ctx.with_accum(|a| {
        if !a.mark_written(name) {
            return (false, false, None);
        }
        (true, a.had_error(name), a.take_shader(name))
    });
    if !first {
        return Ok(WriteOutcome::AlreadyWritten);
    }
    if failed {
        warn!(shader = name, "removing archive of failed shader");
        remove_vcs(shader_root, name)?;
        return Ok(WriteOutcome::RemovedFailed);
    }

    let mut combos: Vec<(u32, Vec<u8>)> = Vec::new();
    for (static_id, combo) in accum.unwrap_or_default().into_combos() {
        // The dispatcher seals every combo that received bytecode before the
        // entry finishes; an unsealed one here is a dispatcher bug.
        assert!(
            !combo.has_blocks(),
            "static combo {static_id} of {name} was never sealed"
        );
        let Some(blob) = combo.into_packed() else {
            continue;
        };
        let static_id =
            u32::try_from(static_id).map_err(|_| VcsError::ComboIdTooLarge { id: static_id })?;
        combos.push((static_id, blob));
    }

    let info = ArchiveInfo {
        total_combos: entry.combo_count(),
        dynamic_combos: entry.dynamic_combo_count(),
        centroid_mask: entry.centroid_mask(),
        source_crc32: entry.source_crc32(),
    };
    let result = (|| -> Result<(), VcsError> {
        let path = prepare_vcs_path(shader_root, name)?;
        debug!(shader = name, path = %path.display(), combos = combos.len(), "writing archive");
        let mut writer = BufWriter::new(File::create(&path)?);
        write_archive(&mut writer, &info, &combos)?;
        writer.flush()?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            info!(shader = name, combos = combos.len(), "archive written");
            Ok(WriteOutcome::Written)
        }
        Err(e) => {
            ctx.with_accum(|a| a.mark_error(name));
            let _ = remove_vcs(shader_root, name);
            Err(e)
        }
    }
}
