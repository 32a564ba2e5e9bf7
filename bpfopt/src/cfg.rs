//! Control-flow graph construction over the linear instruction array.
//!
//! Blocks are identified by the index of their first instruction. A
//! conditional branch becomes its own single-instruction block keyed by the
//! branch index itself; downstream code relies on that encoding to find the
//! block of a conditional branch.

use std::collections::{BTreeMap, BTreeSet};

use crate::insn::Instruction;
use crate::opcodes::*;
use crate::state::RegState;

/// Successor/predecessor edges, block lengths, and the per-block abstract
/// state recorded at block end once the data-flow engine has visited it.
///
/// Invariant after construction: `(u, v)` is in `succ` iff `u` is in
/// `pred[v]`. Edge lists are sorted ascending so traversal order is
/// reproducible.
#[derive(Debug, Default)]
pub struct ControlFlowGraph {
    pub succ: BTreeMap<usize, Vec<usize>>,
    pub pred: BTreeMap<usize, Vec<usize>>,
    pub len: BTreeMap<usize, usize>,
    pub stats: BTreeMap<usize, RegState>,
}

impl ControlFlowGraph {
    pub fn build(insns: &[Instruction]) -> Self {
        let succ = block_boundaries(insns);
        let (len, pred) = lengths_and_predecessors(insns, &succ);
        let succ = reconcile_successors(&succ, &pred);
        ControlFlowGraph {
            succ,
            pred,
            len,
            stats: BTreeMap::new(),
        }
    }
}

fn branch_target(i: usize, off: i16, n: usize) -> Option<usize> {
    let target = i as i64 + off as i64 + 1;
    (target >= 0 && (target as usize) < n).then(|| target as usize)
}

/// Phase A: scan for branch and exit instructions, recording each block's
/// successors as they are found. Calls fall through and do not end a block.
/// A branch whose target lands outside the section is a sink.
fn block_boundaries(insns: &[Instruction]) -> BTreeMap<usize, Vec<usize>> {
    let n = insns.len();
    let mut succ: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut current = 0usize;
    for (i, insn) in insns.iter().enumerate() {
        let class = insn.class();
        if class != BPF_JMP && class != BPF_JMP32 {
            continue;
        }
        let op = insn.op();
        if op == JMP_CALL {
            continue;
        }
        if op == JMP_EXIT {
            succ.insert(current, vec![]);
        } else if insn.opcode == OP_JA {
            succ.insert(current, branch_target(i, insn.offset, n).into_iter().collect());
        } else {
            // The conditional branch ends the enclosing block and becomes a
            // block of its own with the taken and fall-through successors.
            succ.insert(current, vec![i]);
            let mut targets = Vec::with_capacity(2);
            if let Some(t) = branch_target(i, insn.offset, n) {
                targets.push(t);
            }
            if i + 1 < n {
                targets.push(i + 1);
            }
            succ.insert(i, targets);
        }
        current = i + 1;
    }
    succ
}

/// Phase B: block starts are {0} plus every key and target from phase A;
/// sorted adjacent differences give block lengths. Predecessor edges are
/// then rebuilt instruction by instruction, which also recovers the
/// fall-through edges between blocks phase A's cursor never split.
fn lengths_and_predecessors(
    insns: &[Instruction],
    succ: &BTreeMap<usize, Vec<usize>>,
) -> (BTreeMap<usize, usize>, BTreeMap<usize, Vec<usize>>) {
    let n = insns.len();
    let mut starts: BTreeSet<usize> = BTreeSet::new();
    starts.insert(0);
    for (&b, targets) in succ {
        starts.insert(b);
        for &t in targets {
            starts.insert(t);
        }
    }

    let starts: Vec<usize> = starts.into_iter().collect();
    let mut len = BTreeMap::new();
    for w in starts.windows(2) {
        len.insert(w[0], w[1] - w[0]);
    }
    if let Some(&last) = starts.last() {
        len.insert(last, n - last);
    }

    let mut pred: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (&b, &blen) in &len {
        if blen == 0 {
            continue;
        }
        let last = b + blen - 1;
        let mut falls_through = true;
        for j in b..b + blen {
            let insn = &insns[j];
            let class = insn.class();
            if class != BPF_JMP && class != BPF_JMP32 {
                continue;
            }
            let op = insn.op();
            if op == JMP_CALL {
                continue;
            }
            if j == last {
                falls_through = false;
            }
            if op == JMP_EXIT {
                continue;
            }
            if insn.opcode == OP_JA {
                if let Some(t) = branch_target(j, insn.offset, n) {
                    pred.entry(t).or_default().push(b);
                }
            } else {
                // Edges out of a conditional branch are attributed to the
                // branch instruction's own block.
                if let Some(t) = branch_target(j, insn.offset, n) {
                    pred.entry(t).or_default().push(j);
                }
                if j + 1 < n {
                    pred.entry(j + 1).or_default().push(j);
                }
            }
        }
        if falls_through && b + blen < n {
            pred.entry(b + blen).or_default().push(b);
        }
    }
    for edges in pred.values_mut() {
        edges.sort_unstable();
        edges.dedup();
    }
    (len, pred)
}

/// Make the forward map the exact inverse of the rebuilt predecessor map,
/// keeping sink blocks (exits, dead-end branches) as empty entries.
fn reconcile_successors(
    phase_a: &BTreeMap<usize, Vec<usize>>,
    pred: &BTreeMap<usize, Vec<usize>>,
) -> BTreeMap<usize, Vec<usize>> {
    let mut succ: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (&v, sources) in pred {
        for &u in sources {
            succ.entry(u).or_default().push(v);
        }
    }
    for edges in succ.values_mut() {
        edges.sort_unstable();
        edges.dedup();
    }
    for &k in phase_a.keys() {
        succ.entry(k).or_default();
    }
    succ
}
