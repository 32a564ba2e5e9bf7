//! The abstract value the data-flow engine propagates between blocks.

use std::collections::BTreeMap;

use crate::opcodes::NUM_REGS;

/// Writer sets are instruction indices; `ENTRY` marks a value flowing in
/// from the function entry (a caller-supplied register or an uninitialized
/// stack slot).
pub type InsnIdx = i64;

/// Sentinel dependency: the value comes from the function entry state.
pub const ENTRY: InsnIdx = -1;

/// "No alias" marker in the alias vector. An alias of exactly −1 (r10 − 1)
/// is indistinguishable from no alias; byte-granularity frame pointers at
/// that one offset lose their tracking, which is conservative.
pub const NO_ALIAS: i16 = -1;

/// Per-program-point abstract state: for every register and touched stack
/// slot, the set of instructions that may have last written it on some path
/// reaching this point, plus a per-register frame-offset alias for values
/// derived from r10.
///
/// The empty set at a register means "no known writer on any predecessor
/// path", not "zero".
#[derive(Clone, Debug)]
pub struct RegState {
    pub regs: [Vec<InsnIdx>; NUM_REGS],
    pub stack: BTreeMap<i16, Vec<InsnIdx>>,
    pub reg_alias: [i16; NUM_REGS],
}

impl RegState {
    pub fn new() -> Self {
        RegState {
            regs: Default::default(),
            stack: BTreeMap::new(),
            reg_alias: [NO_ALIAS; NUM_REGS],
        }
    }

    /// The state a function is entered with: r1 (the context argument) and
    /// r10 (the frame pointer) carry caller-supplied values.
    pub fn function_entry() -> Self {
        let mut s = Self::new();
        s.regs[1] = vec![ENTRY];
        s.regs[10] = vec![ENTRY];
        s
    }

    /// Union-merge of predecessor states, register-wise and per stack slot,
    /// duplicates removed with first-occurrence order preserved. Alias
    /// information does not survive a join; the traversal re-installs the
    /// vector it carries.
    pub fn merge(states: &[&RegState]) -> RegState {
        let mut merged = RegState::new();
        for r in 0..NUM_REGS {
            let mut all = Vec::new();
            for s in states {
                all.extend_from_slice(&s.regs[r]);
            }
            merged.regs[r] = dedup_preserving_order(all);
        }
        for s in states {
            for (&off, writers) in &s.stack {
                let slot = merged.stack.entry(off).or_default();
                slot.extend_from_slice(writers);
            }
        }
        for writers in merged.stack.values_mut() {
            *writers = dedup_preserving_order(std::mem::take(writers));
        }
        merged
    }

    /// Unordered set equality of all register and stack writer sets. The
    /// alias vector is deliberately not compared; only the sets take part
    /// in loop convergence.
    pub fn sets_equal(&self, other: &RegState) -> bool {
        for r in 0..NUM_REGS {
            if !as_set(&self.regs[r]).eq(&as_set(&other.regs[r])) {
                return false;
            }
        }
        if self.stack.len() != other.stack.len() {
            return false;
        }
        self.stack.iter().all(|(off, writers)| {
            other
                .stack
                .get(off)
                .map_or(false, |o| as_set(writers).eq(&as_set(o)))
        })
    }
}

impl Default for RegState {
    fn default() -> Self {
        Self::new()
    }
}

fn as_set(v: &[InsnIdx]) -> std::collections::BTreeSet<InsnIdx> {
    v.iter().copied().collect()
}

/// Remove duplicates, keeping the first occurrence of each element.
pub fn dedup_preserving_order(v: Vec<InsnIdx>) -> Vec<InsnIdx> {
    let mut seen = std::collections::BTreeSet::new();
    v.into_iter().filter(|x| seen.insert(*x)).collect()
}
