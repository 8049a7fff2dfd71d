//! Descending enumeration of alive combos.
//!
//! The dispatcher walks command numbers from high to low so that its
//! packaging watermark is a single monotonically decreasing number. The walk
//! prunes whole subtrees: axis digits are assigned from most to least
//! significant, and as soon as the skip expression is provably true for the
//! assigned prefix, every combo sharing that prefix is stepped over at once.

use std::ops::Range;
use std::sync::Arc;

use crate::space::{ComboHandle, EntrySet, ShaderEntry};

impl ShaderEntry {
    /// Highest alive combo index `<= candidate`, or `None` if every combo at
    /// or below `candidate` is skipped.
    pub fn next_alive_combo(&self, mut candidate: u64) -> Option<u64> {
        debug_assert!(candidate < self.combo_count());
        let Some(skip) = self.skip() else {
            return Some(candidate);
        };
        let axes = self.axes();
        if axes.is_empty() {
            // Degenerate single-combo space: only a constant expression can
            // skip it.
            return (!skip.definitely_skip(&|_| None)).then_some(candidate);
        }
        let mut values: Vec<Option<i64>> = vec![None; axes.len()];
        'candidate: loop {
            values.fill(None);
            // Assign digits from most to least significant; on a proven
            // skip, every combo sharing the assigned prefix is dead.
            for pos in (0..self.sig_order.len()).rev() {
                let axis_idx = self.sig_order[pos];
                let axis = &axes[axis_idx];
                let digit = (candidate / self.weights[pos]) % axis.count();
                values[axis_idx] = Some(axis.lo() + digit as i64);
                let resolve = |name: &str| -> Option<i64> {
                    axes.iter()
                        .position(|a| a.name() == name)
                        .and_then(|i| values[i])
                };
                if skip.definitely_skip(&resolve) {
                    let subtree = self.weights[pos];
                    let base = (candidate / subtree) * subtree;
                    if base == 0 {
                        return None;
                    }
                    candidate = base - 1;
                    continue 'candidate;
                }
            }
            // The last iteration evaluated the complete assignment, so the
            // combo is alive.
            return Some(candidate);
        }
    }
}

impl EntrySet {
    /// Highest alive command number strictly below `bound`, crossing entry
    /// boundaries as needed.
    pub fn next_alive_below(&self, bound: u64) -> Option<ComboHandle> {
        let mut command = bound.min(self.total_commands());
        while command > 0 {
            let entry = self
                .entry_for_command(command - 1)
                .expect("command space is contiguous");
            let local = command - 1 - entry.command_start();
            match entry.next_alive_combo(local) {
                Some(combo) => {
                    return Some(ComboHandle::new(
                        Arc::clone(entry),
                        entry.command_start() + combo,
                    ))
                }
                None => command = entry.command_start(),
            }
        }
        None
    }

    /// Iterates the alive commands of `range` in descending order.
    pub fn alive_commands(&self, range: Range<u64>) -> AliveCombos<'_> {
        AliveCombos {
            set: self,
            bound: range.end,
            start: range.start,
        }
    }
}

/// Descending iterator over alive combo handles, see
/// [`EntrySet::alive_commands`].
pub struct AliveCombos<'a> {
    set: &'a EntrySet,
    bound: u64,
    start: u64,
}

impl Iterator for AliveCombos<'_> {
    type Item = ComboHandle;

    fn next(&mut self) -> Option<ComboHandle> {
        let handle = self.set.next_alive_below(self.bound)?;
        if handle.command() < self.start {
            return None;
        }
        self.bound = handle.command();
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{Axis, AxisKind, ShaderConfig};

    fn entry_set(axes: Vec<(&str, i64, i64, AxisKind)>, skip: &str) -> EntrySet {
        let axes = axes
            .into_iter()
            .map(|(name, lo, hi, kind)| Axis::new(name, lo, hi, kind).unwrap())
            .collect();
        EntrySet::new(vec![ShaderConfig {
            name: "t".to_owned(),
            source_file: "t.fxc".to_owned(),
            entry_point: "main".to_owned(),
            target: "ps_2_0".to_owned(),
            axes,
            skip: skip.to_owned(),
            centroid_mask: 0,
            source_crc32: 0,
        }])
        .unwrap()
    }

    fn collect_alive(set: &EntrySet) -> Vec<u64> {
        set.alive_commands(0..set.total_commands())
            .map(|h| h.command())
            .collect()
    }

    #[test]
    fn no_skip_yields_full_descending_range() {
        let set = entry_set(vec![("A", 0, 3, AxisKind::Dynamic)], "");
        assert_eq!(collect_alive(&set), vec![3, 2, 1, 0]);
    }

    #[test]
    fn constant_true_skip_yields_nothing() {
        let set = entry_set(
            vec![("A", 0, 3, AxisKind::Dynamic), ("B", 0, 3, AxisKind::Static)],
            "1",
        );
        assert_eq!(collect_alive(&set), Vec::<u64>::new());
    }

    #[test]
    fn iterator_matches_brute_force_and_descends() {
        let set = entry_set(
            vec![
                ("A", 0, 2, AxisKind::Dynamic),
                ("B", -1, 2, AxisKind::Static),
                ("C", 0, 1, AxisKind::Static),
            ],
            "A == 1 && B >= 1 || C",
        );
        let entry = &set.entries()[0];
        let expected: Vec<u64> = (0..entry.combo_count())
            .rev()
            .filter(|&combo| {
                let values = entry.decode(combo);
                let resolve =
                    |name: &str| -> Option<i64> {
                        entry.axes().iter().position(|a| a.name() == name).map(|i| values[i])
                    };
                !entry.skip().unwrap().definitely_skip(&resolve)
            })
            .collect();
        let got = collect_alive(&set);
        assert_eq!(got, expected);
        assert!(got.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn prunes_high_order_subtrees_without_visiting_leaves() {
        // Skipping on the most significant (static) axis removes whole
        // blocks of dynamic siblings.
        let set = entry_set(
            vec![("D", 0, 9, AxisKind::Dynamic), ("S", 0, 9, AxisKind::Static)],
            "S != 0",
        );
        assert_eq!(collect_alive(&set), (0..10).rev().collect::<Vec<u64>>());
    }

    #[test]
    fn crosses_entry_boundaries() {
        let a = Axis::new("A", 0, 1, AxisKind::Dynamic).unwrap();
        let config = |name: &str, skip: &str| ShaderConfig {
            name: name.to_owned(),
            source_file: format!("{name}.fxc"),
            entry_point: "main".to_owned(),
            target: "ps_2_0".to_owned(),
            axes: vec![a.clone()],
            skip: skip.to_owned(),
            centroid_mask: 0,
            source_crc32: 0,
        };
        let set = EntrySet::new(vec![config("first", ""), config("dead", "1"), config("last", "")])
            .unwrap();
        let alive: Vec<(String, u64)> = set
            .alive_commands(0..set.total_commands())
            .map(|h| (h.entry().name().to_owned(), h.command()))
            .collect();
        assert_eq!(
            alive,
            vec![
                ("last".to_owned(), 5),
                ("last".to_owned(), 4),
                ("first".to_owned(), 1),
                ("first".to_owned(), 0),
            ]
        );
    }
}
