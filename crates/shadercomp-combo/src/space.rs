use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;

use crate::expr::{ExprError, SkipExpr};

/// Classification of an axis.
///
/// Dynamic axes form the low-order digits of the mixed-radix combo index,
/// static axes the high-order digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Static,
    Dynamic,
}

/// One named dimension of a shader's parameter space, with an inclusive
/// integer domain `[lo, hi]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Axis {
    name: String,
    lo: i64,
    hi: i64,
    kind: AxisKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComboError {
    #[error("axis {name:?}: bounds {lo}..={hi} are inverted or too wide")]
    BadBounds { name: String, lo: i64, hi: i64 },
    #[error("axis name is empty")]
    EmptyAxisName,
    #[error("axis {name:?} declared twice")]
    DuplicateAxis { name: String },
    #[error("shader {shader:?}: skip expression references unknown axis {axis:?}")]
    UnknownAxis { shader: String, axis: String },
    #[error("shader {shader:?}: skip expression: {source}")]
    Skip {
        shader: String,
        #[source]
        source: ExprError,
    },
    #[error("shader {shader:?}: combo space does not fit in 64 bits")]
    SpaceOverflow { shader: String },
    #[error("global command space does not fit in 64 bits")]
    CommandSpaceOverflow,
    #[error("expected {expected} axis values, got {got}")]
    ValueCount { expected: usize, got: usize },
    #[error("value {value} out of range for axis {name:?}")]
    ValueOutOfRange { name: String, value: i64 },
}

impl Axis {
    pub fn new(
        name: impl Into<String>,
        lo: i64,
        hi: i64,
        kind: AxisKind,
    ) -> Result<Axis, ComboError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ComboError::EmptyAxisName);
        }
        let span = i128::from(hi) - i128::from(lo);
        if span < 0 || span >= i128::from(u64::MAX) {
            return Err(ComboError::BadBounds { name, lo, hi });
        }
        Ok(Axis { name, lo, hi, kind })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lo(&self) -> i64 {
        self.lo
    }

    pub fn hi(&self) -> i64 {
        self.hi
    }

    pub fn kind(&self) -> AxisKind {
        self.kind
    }

    /// Number of values in the domain.
    pub fn count(&self) -> u64 {
        (i128::from(self.hi) - i128::from(self.lo) + 1) as u64
    }
}

/// Parsed description of one shader to compile, as produced by the source
/// front-end. Consumed by [`EntrySet::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderConfig {
    /// Canonical shader name (archive file stem).
    pub name: String,
    /// Source file name as passed to the compiler.
    pub source_file: String,
    /// Entry-point function name.
    pub entry_point: String,
    /// Target profile string, e.g. `ps_3_0`.
    pub target: String,
    /// Axes in declaration order.
    pub axes: Vec<Axis>,
    /// Skip-expression text; empty means no combo is skipped.
    pub skip: String,
    /// Opaque per-shader mask stored in the archive header.
    pub centroid_mask: u32,
    /// CRC32 of the source preamble.
    pub source_crc32: u32,
}

/// One shader's fully-laid-out parameter space.
///
/// Immutable after construction; shared between the dispatcher, the
/// enumeration handles and the archive emitter via `Arc`.
pub struct ShaderEntry {
    name: String,
    source_file: String,
    entry_point: String,
    target: String,
    centroid_mask: u32,
    source_crc32: u32,
    axes: Vec<Axis>,
    skip: Option<SkipExpr>,
    /// Axis indices from least to most significant digit: dynamic axes in
    /// declaration order, then static axes in declaration order.
    pub(crate) sig_order: Vec<usize>,
    /// Place value of each significance position.
    pub(crate) weights: Vec<u64>,
    num_static: u64,
    num_dynamic: u64,
    num_combos: u64,
    command_start: u64,
    command_end: u64,
}

impl fmt::Debug for ShaderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderEntry")
            .field("name", &self.name)
            .field("num_static", &self.num_static)
            .field("num_dynamic", &self.num_dynamic)
            .field("commands", &(self.command_start..self.command_end))
            .finish_non_exhaustive()
    }
}

impl ShaderEntry {
    fn from_config(config: ShaderConfig, command_start: u64) -> Result<ShaderEntry, ComboError> {
        let ShaderConfig {
            name,
            source_file,
            entry_point,
            target,
            axes,
            skip,
            centroid_mask,
            source_crc32,
        } = config;

        for (i, axis) in axes.iter().enumerate() {
            if axes[..i].iter().any(|other| other.name == axis.name) {
                return Err(ComboError::DuplicateAxis {
                    name: axis.name.clone(),
                });
            }
        }

        let skip = if skip.trim().is_empty() {
            None
        } else {
            let expr = SkipExpr::parse(&skip).map_err(|source| ComboError::Skip {
                shader: name.clone(),
                source,
            })?;
            for axis in expr.references() {
                if !axes.iter().any(|a| a.name == axis) {
                    return Err(ComboError::UnknownAxis {
                        shader: name.clone(),
                        axis: axis.to_owned(),
                    });
                }
            }
            Some(expr)
        };

        let product = |kind: AxisKind| -> Result<u64, ComboError> {
            axes.iter()
                .filter(|a| a.kind == kind)
                .try_fold(1u64, |acc, a| acc.checked_mul(a.count()))
                .ok_or(ComboError::SpaceOverflow {
                    shader: name.clone(),
                })
        };
        let num_dynamic = product(AxisKind::Dynamic)?;
        let num_static = product(AxisKind::Static)?;
        let num_combos =
            num_static
                .checked_mul(num_dynamic)
                .ok_or(ComboError::SpaceOverflow {
                    shader: name.clone(),
                })?;

        let mut sig_order: Vec<usize> = Vec::with_capacity(axes.len());
        sig_order.extend(
            axes.iter()
                .enumerate()
                .filter(|(_, a)| a.kind == AxisKind::Dynamic)
                .map(|(i, _)| i),
        );
        sig_order.extend(
            axes.iter()
                .enumerate()
                .filter(|(_, a)| a.kind == AxisKind::Static)
                .map(|(i, _)| i),
        );
        let mut weights = Vec::with_capacity(sig_order.len());
        let mut weight = 1u64;
        for &i in &sig_order {
            weights.push(weight);
            // Cannot overflow: the full product fit above.
            weight = weight.saturating_mul(axes[i].count());
        }

        let command_end = command_start
            .checked_add(num_combos)
            .ok_or(ComboError::CommandSpaceOverflow)?;

        Ok(ShaderEntry {
            name,
            source_file,
            entry_point,
            target,
            centroid_mask,
            source_crc32,
            axes,
            skip,
            sig_order,
            weights,
            num_static,
            num_dynamic,
            num_combos,
            command_start,
            command_end,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn centroid_mask(&self) -> u32 {
        self.centroid_mask
    }

    pub fn source_crc32(&self) -> u32 {
        self.source_crc32
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub(crate) fn skip(&self) -> Option<&SkipExpr> {
        self.skip.as_ref()
    }

    pub fn static_combo_count(&self) -> u64 {
        self.num_static
    }

    pub fn dynamic_combo_count(&self) -> u64 {
        self.num_dynamic
    }

    pub fn combo_count(&self) -> u64 {
        self.num_combos
    }

    /// First global command number of this entry (inclusive).
    pub fn command_start(&self) -> u64 {
        self.command_start
    }

    /// One past the last global command number of this entry.
    pub fn command_end(&self) -> u64 {
        self.command_end
    }

    /// Decodes a combo index into axis values in declaration order.
    pub fn decode(&self, combo: u64) -> Vec<i64> {
        debug_assert!(combo < self.num_combos.max(1));
        let mut values = vec![0i64; self.axes.len()];
        let mut rem = combo;
        for &i in &self.sig_order {
            let count = self.axes[i].count();
            let digit = rem % count;
            rem /= count;
            values[i] = self.axes[i].lo + digit as i64;
        }
        values
    }

    /// Encodes axis values (declaration order) back into a combo index.
    pub fn encode(&self, values: &[i64]) -> Result<u64, ComboError> {
        if values.len() != self.axes.len() {
            return Err(ComboError::ValueCount {
                expected: self.axes.len(),
                got: values.len(),
            });
        }
        let mut combo = 0u64;
        for &i in self.sig_order.iter().rev() {
            let axis = &self.axes[i];
            let value = values[i];
            if value < axis.lo || value > axis.hi {
                return Err(ComboError::ValueOutOfRange {
                    name: axis.name.clone(),
                    value,
                });
            }
            let digit = (value - axis.lo) as u64;
            combo = combo * axis.count() + digit;
        }
        Ok(combo)
    }

    /// Splits a combo index into `(static_combo_id, dynamic_combo_id)`.
    pub fn split(&self, combo: u64) -> (u64, u64) {
        (combo / self.num_dynamic, combo % self.num_dynamic)
    }

    /// Macro defines for one combo: `(axis_name, value)` in declaration
    /// order.
    pub fn defines(&self, combo: u64) -> Vec<(String, String)> {
        self.axes
            .iter()
            .zip(self.decode(combo))
            .map(|(axis, value)| (axis.name.clone(), value.to_string()))
            .collect()
    }

    /// Deterministic human-readable compile command for one combo.
    ///
    /// Used as the key that groups repeated compiler messages, and printed
    /// alongside the first occurrence of an error.
    pub fn format_command(&self, combo: u64) -> String {
        let mut out = String::with_capacity(64);
        let _ = write!(out, "fxc /T {} /E {}", self.target, self.entry_point);
        for (axis, value) in self.axes.iter().zip(self.decode(combo)) {
            let _ = write!(out, " /D{}={}", axis.name, value);
        }
        let _ = write!(out, " {}", self.source_file);
        out
    }
}

/// A cheaply-cloneable reference to one `(entry, command)` point of the
/// global command space.
#[derive(Clone)]
pub struct ComboHandle {
    entry: Arc<ShaderEntry>,
    command: u64,
}

impl ComboHandle {
    pub(crate) fn new(entry: Arc<ShaderEntry>, command: u64) -> ComboHandle {
        debug_assert!(command >= entry.command_start && command < entry.command_end);
        ComboHandle { entry, command }
    }

    pub fn entry(&self) -> &Arc<ShaderEntry> {
        &self.entry
    }

    /// Global command number.
    pub fn command(&self) -> u64 {
        self.command
    }

    /// Entry-local combo index.
    pub fn combo(&self) -> u64 {
        self.command - self.entry.command_start
    }

    pub fn static_id(&self) -> u64 {
        self.entry.split(self.combo()).0
    }

    pub fn dynamic_id(&self) -> u64 {
        self.entry.split(self.combo()).1
    }

    pub fn defines(&self) -> Vec<(String, String)> {
        self.entry.defines(self.combo())
    }

    pub fn format_command(&self) -> String {
        self.entry.format_command(self.combo())
    }
}

impl fmt::Debug for ComboHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComboHandle")
            .field("shader", &self.entry.name)
            .field("command", &self.command)
            .field("combo", &self.combo())
            .finish()
    }
}

/// All shader entries of one run, laid out back-to-back in a single global
/// command-number space.
#[derive(Debug)]
pub struct EntrySet {
    entries: Vec<Arc<ShaderEntry>>,
}

impl EntrySet {
    pub fn new(configs: Vec<ShaderConfig>) -> Result<EntrySet, ComboError> {
        let mut entries = Vec::with_capacity(configs.len());
        let mut next_command = 0u64;
        for config in configs {
            let entry = ShaderEntry::from_config(config, next_command)?;
            next_command = entry.command_end;
            entries.push(Arc::new(entry));
        }
        Ok(EntrySet { entries })
    }

    pub fn entries(&self) -> &[Arc<ShaderEntry>] {
        &self.entries
    }

    /// Total number of commands across all entries.
    pub fn total_commands(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.command_end)
    }

    /// Resolves a global command number to its entry.
    pub fn entry_for_command(&self, command: u64) -> Option<&Arc<ShaderEntry>> {
        let idx = self
            .entries
            .partition_point(|e| e.command_end <= command);
        self.entries
            .get(idx)
            .filter(|e| command >= e.command_start)
    }

    /// Returns a handle for a global command number.
    pub fn handle(&self, command: u64) -> Option<ComboHandle> {
        self.entry_for_command(command)
            .map(|entry| ComboHandle::new(Arc::clone(entry), command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn axis(name: &str, lo: i64, hi: i64, kind: AxisKind) -> Axis {
        Axis::new(name, lo, hi, kind).unwrap()
    }

    fn config(name: &str, axes: Vec<Axis>, skip: &str) -> ShaderConfig {
        ShaderConfig {
            name: name.to_owned(),
            source_file: format!("{name}.fxc"),
            entry_point: "main".to_owned(),
            target: "ps_2_0".to_owned(),
            axes,
            skip: skip.to_owned(),
            centroid_mask: 0,
            source_crc32: 0,
        }
    }

    #[test]
    fn dynamic_axes_are_least_significant() {
        let set = EntrySet::new(vec![config(
            "water",
            vec![
                axis("FOG", 0, 1, AxisKind::Static),
                axis("LIGHTS", 0, 2, AxisKind::Dynamic),
            ],
            "",
        )])
        .unwrap();
        let entry = &set.entries()[0];
        assert_eq!(entry.static_combo_count(), 2);
        assert_eq!(entry.dynamic_combo_count(), 3);
        assert_eq!(entry.combo_count(), 6);
        // combo = static * num_dynamic + dynamic
        assert_eq!(entry.decode(0), vec![0, 0]);
        assert_eq!(entry.decode(2), vec![0, 2]);
        assert_eq!(entry.decode(3), vec![1, 0]);
        assert_eq!(entry.split(5), (1, 2));
    }

    #[test]
    fn encode_decode_round_trip() {
        let set = EntrySet::new(vec![config(
            "round",
            vec![
                axis("A", -1, 1, AxisKind::Dynamic),
                axis("B", 2, 3, AxisKind::Static),
                axis("C", 0, 4, AxisKind::Dynamic),
            ],
            "",
        )])
        .unwrap();
        let entry = &set.entries()[0];
        for combo in 0..entry.combo_count() {
            assert_eq!(entry.encode(&entry.decode(combo)).unwrap(), combo);
        }
    }

    #[test]
    fn encode_rejects_out_of_range_values() {
        let set =
            EntrySet::new(vec![config("r", vec![axis("A", 0, 3, AxisKind::Dynamic)], "")]).unwrap();
        let entry = &set.entries()[0];
        assert!(matches!(
            entry.encode(&[4]),
            Err(ComboError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            entry.encode(&[]),
            Err(ComboError::ValueCount { .. })
        ));
    }

    #[test]
    fn entries_are_contiguous_and_disjoint() {
        let set = EntrySet::new(vec![
            config("a", vec![axis("X", 0, 3, AxisKind::Dynamic)], ""),
            config("b", vec![axis("Y", 0, 1, AxisKind::Static)], ""),
        ])
        .unwrap();
        let [a, b] = set.entries() else { panic!() };
        assert_eq!(a.command_start(), 0);
        assert_eq!(a.command_end(), 4);
        assert_eq!(b.command_start(), 4);
        assert_eq!(b.command_end(), 6);
        assert_eq!(set.total_commands(), 6);
        assert_eq!(set.entry_for_command(3).unwrap().name(), "a");
        assert_eq!(set.entry_for_command(4).unwrap().name(), "b");
        assert!(set.entry_for_command(6).is_none());
    }

    #[test]
    fn format_command_is_deterministic() {
        let set = EntrySet::new(vec![config(
            "water",
            vec![
                axis("FOG", 0, 1, AxisKind::Static),
                axis("LIGHTS", 0, 2, AxisKind::Dynamic),
            ],
            "",
        )])
        .unwrap();
        let handle = set.handle(4).unwrap();
        assert_eq!(
            handle.format_command(),
            "fxc /T ps_2_0 /E main /DFOG=1 /DLIGHTS=1 water.fxc"
        );
    }

    #[test]
    fn duplicate_axis_is_rejected() {
        let err = EntrySet::new(vec![config(
            "dup",
            vec![
                axis("A", 0, 1, AxisKind::Static),
                axis("A", 0, 1, AxisKind::Dynamic),
            ],
            "",
        )])
        .unwrap_err();
        assert!(matches!(err, ComboError::DuplicateAxis { .. }));
    }

    #[test]
    fn skip_referencing_unknown_axis_is_rejected() {
        let err = EntrySet::new(vec![config(
            "bad",
            vec![axis("A", 0, 1, AxisKind::Dynamic)],
            "B == 1",
        )])
        .unwrap_err();
        assert!(matches!(err, ComboError::UnknownAxis { .. }));
    }
}
