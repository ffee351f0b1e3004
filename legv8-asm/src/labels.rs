//! Label table and pending-reference table.

use std::collections::HashMap;
use std::ops::Range;

/// Ordered mapping from label name to the 0-based instruction index it precedes.
/// Insertion order is kept (alongside the lookup map) so diagnostics that walk every
/// label are deterministic.
#[derive(Default)]
pub struct LabelTable {
    order: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable::default()
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Records `name -> instruction_index`. Caller must have already checked
    /// [`contains`](Self::contains) and raised `duplicate_label_name` if needed.
    pub fn define(&mut self, name: &str, instruction_index: usize) {
        self.order.push(name.to_string());
        self.index.insert(name.to_string(), instruction_index);
    }

    /// Labels in definition order, for diagnostics that want a stable walk.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.order.iter().map(|name| (name.as_str(), self.index[name]))
    }

    /// The nearest label whose instruction index is `<= pc`, used by the diagnostics
    /// formatter to give VM exceptions a "you are roughly here" label context.
    pub fn nearest_at_or_before(&self, pc: u64) -> Option<&str> {
        self.iter()
            .filter(|&(_, idx)| idx as u64 <= pc)
            .max_by_key(|&(_, idx)| idx)
            .map(|(name, _)| name)
    }
}

/// Which family a deferred branch/load-address patch belongs to, since each patches
/// the word(s) at `instruction_index` differently once the label resolves.
#[derive(Clone, Copy, Debug)]
pub enum PendingFormat {
    /// A `B`/`BL`-family word: patch the signed 26-bit `br_address` field.
    B,
    /// A `B.cond`/`CBZ`/`CBNZ` word: patch the signed 19-bit `cond_br_address` field.
    Cb,
    /// An `LDA` expansion: patch the immediates of the `MOVZ` at `instructions[0]` and
    /// the `MOVK` at `instructions[1]` to the label's absolute byte address.
    Lda { instructions: [usize; 2] },
}

#[derive(Clone, Debug)]
pub struct PendingRef {
    pub instruction_index: usize,
    pub format: PendingFormat,
    pub span: Range<usize>,
}

/// Mapping from unresolved label name to every reference still waiting on it.
#[derive(Default)]
pub struct PendingTable {
    refs: HashMap<String, Vec<PendingRef>>,
}

impl PendingTable {
    pub fn new() -> Self {
        PendingTable::default()
    }

    pub fn push(&mut self, name: &str, reference: PendingRef) {
        self.refs.entry(name.to_string()).or_default().push(reference);
    }

    /// Removes and returns every reference waiting on `name` (called once the label is
    /// defined, so they can be patched immediately).
    pub fn take(&mut self, name: &str) -> Vec<PendingRef> {
        self.refs.remove(name).unwrap_or_default()
    }

    /// Every `(name, reference)` still unresolved once the source is fully consumed;
    /// each produces an `undefined_label` diagnostic.
    pub fn into_unresolved(self) -> Vec<(String, PendingRef)> {
        let mut out: Vec<(String, PendingRef)> = self
            .refs
            .into_iter()
            .flat_map(|(name, refs)| refs.into_iter().map(move |r| (name.clone(), r)))
            .collect();
        out.sort_by_key(|(_, r)| r.instruction_index);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_label_picks_the_highest_index_not_past_pc() {
        let mut labels = LabelTable::new();
        labels.define("start", 0);
        labels.define("loop", 3);
        labels.define("end", 10);
        assert_eq!(labels.nearest_at_or_before(5), Some("loop"));
        assert_eq!(labels.nearest_at_or_before(0), Some("start"));
    }

    #[test]
    fn pending_refs_are_returned_in_program_order() {
        let mut pending = PendingTable::new();
        pending.push("l", PendingRef { instruction_index: 5, format: PendingFormat::B, span: 0..1 });
        pending.push("l", PendingRef { instruction_index: 1, format: PendingFormat::B, span: 2..3 });
        let unresolved = pending.into_unresolved();
        assert_eq!(unresolved[0].1.instruction_index, 1);
        assert_eq!(unresolved[1].1.instruction_index, 5);
    }
}
