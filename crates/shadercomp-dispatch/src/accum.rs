use std::collections::{BTreeMap, BTreeSet};

/// One compiled dynamic combo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteCodeBlock {
    pub dynamic_id: u64,
    pub bytes: Vec<u8>,
}

/// All the data for one static combo.
///
/// Raw dynamic blocks accumulate until the dispatcher's watermark clears the
/// combo's command range; sealing consumes the blocks and stores the packed
/// blob, after which the combo is immutable.
#[derive(Debug, Default)]
pub struct StaticCombo {
    blocks: Vec<ByteCodeBlock>,
    packed: Option<Vec<u8>>,
}

impl StaticCombo {
    pub fn add_dynamic(&mut self, dynamic_id: u64, bytes: Vec<u8>) {
        debug_assert!(
            self.packed.is_none(),
            "dynamic combo {dynamic_id} arrived after sealing"
        );
        self.blocks.push(ByteCodeBlock { dynamic_id, bytes });
    }

    pub fn is_sealed(&self) -> bool {
        self.packed.is_some()
    }

    pub fn packed(&self) -> Option<&[u8]> {
        self.packed.as_deref()
    }

    pub fn into_packed(self) -> Option<Vec<u8>> {
        self.packed
    }

    pub fn has_blocks(&self) -> bool {
        !self.blocks.is_empty()
    }
}

/// Per-shader accumulator: static combos keyed by id.
#[derive(Debug, Default)]
pub struct ShaderAccum {
    combos: BTreeMap<u64, StaticCombo>,
}

impl ShaderAccum {
    pub fn combos(&self) -> &BTreeMap<u64, StaticCombo> {
        &self.combos
    }

    pub fn into_combos(self) -> BTreeMap<u64, StaticCombo> {
        self.combos
    }
}

/// The run-wide accumulator state: per-shader combos, the had-error set and
/// the written-to-disk set. Shared behind the global accumulator lock.
#[derive(Debug, Default)]
pub struct Accumulators {
    shaders: BTreeMap<String, ShaderAccum>,
    errors: BTreeSet<String>,
    written: BTreeSet<String>,
}

impl Accumulators {
    pub fn new() -> Accumulators {
        Accumulators::default()
    }

    /// Creates the shader's (empty) accumulator if it does not exist yet, so
    /// a fully-skipped shader still emits an archive.
    pub fn register(&mut self, shader: &str) {
        self.shaders.entry(shader.to_owned()).or_default();
    }

    pub fn add_dynamic(&mut self, shader: &str, static_id: u64, dynamic_id: u64, bytes: Vec<u8>) {
        self.shaders
            .entry(shader.to_owned())
            .or_default()
            .combos
            .entry(static_id)
            .or_default()
            .add_dynamic(dynamic_id, bytes);
    }

    /// Removes a static combo's raw blocks for packing outside the lock.
    /// `None` when the combo never received bytecode or was already sealed.
    pub fn take_raw_blocks(&mut self, shader: &str, static_id: u64) -> Option<Vec<ByteCodeBlock>> {
        let combo = self.shaders.get_mut(shader)?.combos.get_mut(&static_id)?;
        if combo.blocks.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut combo.blocks))
    }

    pub fn store_packed(&mut self, shader: &str, static_id: u64, blob: Vec<u8>) {
        if let Some(accum) = self.shaders.get_mut(shader) {
            if let Some(combo) = accum.combos.get_mut(&static_id) {
                combo.packed = Some(blob);
            }
        }
    }

    /// Detaches a shader's accumulator for archive emission.
    pub fn take_shader(&mut self, shader: &str) -> Option<ShaderAccum> {
        self.shaders.remove(shader)
    }

    pub fn mark_error(&mut self, shader: &str) {
        self.errors.insert(shader.to_owned());
    }

    pub fn had_error(&self, shader: &str) -> bool {
        self.errors.contains(shader)
    }

    /// Shaders with at least one failed compile, in name order.
    pub fn failed_shaders(&self) -> Vec<String> {
        self.errors.iter().cloned().collect()
    }

    /// Records the write attempt; `true` the first time, `false` on repeats.
    pub fn mark_written(&mut self, shader: &str) -> bool {
        self.written.insert(shader.to_owned())
    }
}
