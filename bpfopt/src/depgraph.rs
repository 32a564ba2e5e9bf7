//! The data-flow engine: propagates "which instructions may have last
//! written this register / stack slot" through the control-flow graph to a
//! fixed point, recording a def-use edge for every consumption.
//!
//! Traversal is worklist-free: blocks are visited once all their
//! predecessors are complete; when no block is ready the graph is stuck on
//! a loop, whose header is found by a bounded DFS. Loop bodies are swept
//! repeatedly until the header's merged entry state stops growing. Nested
//! loops stack their bookkeeping on a parent chain; a converged inner loop
//! reports its header into the parent's waiting set so the parent re-sweeps
//! it on its own next iteration.

use std::collections::{BTreeMap, BTreeSet};

use crate::cfg::ControlFlowGraph;
use crate::effects::analyze;
use crate::insn::Instruction;
use crate::log::*;
use crate::opcodes::*;
use crate::state::{dedup_preserving_order, InsnIdx, RegState, ENTRY, NO_ALIAS};

/// Def-use edges of one instruction. `ENTRY` (−1) may appear among the
/// dependencies, never in the reverse direction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyInfo {
    pub dependencies: Vec<InsnIdx>,
    pub depended_by: Vec<InsnIdx>,
}

/// Bookkeeping for one active loop, chained through the traversal stack.
struct LoopFrame {
    head: usize,
    /// Blocks processed inside the current sweep of this loop.
    processed: BTreeSet<usize>,
    /// Blocks whose predecessors were incomplete when visited; re-swept on
    /// every iteration.
    waiting: BTreeSet<usize>,
}

impl LoopFrame {
    fn new(head: usize) -> Self {
        LoopFrame {
            head,
            processed: BTreeSet::new(),
            waiting: BTreeSet::new(),
        }
    }
}

/// Build the dependency arrays for a section. `deps` must already hold one
/// empty entry per instruction; `store_candidates` collects every plain
/// store encountered, for the superword pass.
pub fn build_dependencies(
    insns: &[Instruction],
    cfg: &mut ControlFlowGraph,
    deps: &mut [DependencyInfo],
    store_candidates: &mut Vec<usize>,
    pick_first_ready_block: bool,
) {
    {
        let mut engine = Engine {
            insns,
            deps: &mut *deps,
            store_candidates: &mut *store_candidates,
            pick_first_ready_block,
        };
        engine.run(cfg);
    }

    for d in deps.iter_mut() {
        d.dependencies.sort_unstable();
        d.dependencies.dedup();
        d.depended_by.sort_unstable();
        d.depended_by.dedup();
    }
    store_candidates.sort_unstable();
    store_candidates.dedup();
}

struct Engine<'a> {
    insns: &'a [Instruction],
    deps: &'a mut [DependencyInfo],
    store_candidates: &'a mut Vec<usize>,
    pick_first_ready_block: bool,
}

impl Engine<'_> {
    fn run(&mut self, cfg: &mut ControlFlowGraph) {
        let mut done: BTreeSet<usize> = BTreeSet::new();
        let mut loops: Vec<LoopFrame> = Vec::new();
        let mut base = 0usize;
        let mut state = RegState::function_entry();

        // Set when a just-converged loop hands the current block back to
        // its parent context without re-walking it.
        let mut walk_pending = true;

        loop {
            if walk_pending {
                let Some(&blen) = cfg.len.get(&base) else {
                    return;
                };
                self.walk_block(base, blen, &mut state, &mut done);
                cfg.stats.insert(base, state.clone());
                done.insert(base);
            }
            walk_pending = true;

            if !loops.is_empty() {
                let head = loops.last().expect("loop context still active").head;
                let head_preds: Vec<usize> = cfg.pred.get(&head).cloned().unwrap_or_default();
                if head_preds.iter().all(|p| done.contains(p)) {
                    let merged = merge_pred_states(cfg, &head_preds);

                    // Fixed-point check: sweep the header once more from the
                    // merged entry state and compare against what the last
                    // real sweep left behind. The sweep records dependency
                    // edges (they are part of the fixed point) but does not
                    // touch the stored block states.
                    let mut simulated = merged.clone();
                    if let Some(&hlen) = cfg.len.get(&head) {
                        self.walk_block(head, hlen, &mut simulated, &mut done);
                    }
                    let converged = cfg
                        .stats
                        .get(&head)
                        .map_or(false, |stored| stored.sets_equal(&simulated));

                    if !converged {
                        trace!("loop not yet converged, resweeping"; "head" => head);
                        cfg.stats.insert(head, simulated);
                        let frame = loops.last_mut().expect("loop context still active");
                        for b in std::mem::take(&mut frame.processed) {
                            done.remove(&b);
                        }
                        for b in std::mem::take(&mut frame.waiting) {
                            done.remove(&b);
                        }
                        done.remove(&base);
                        base = head;
                        state = merged;
                        continue;
                    }

                    // Converged: the header is final for the enclosing
                    // context. A parent loop must still re-sweep it on its
                    // own next iteration.
                    trace!("loop converged"; "head" => head);
                    let finished = loops.pop().expect("loop context still active");
                    done.insert(finished.head);
                    if let Some(parent) = loops.last_mut() {
                        parent.waiting.insert(finished.head);
                    }
                    walk_pending = false;
                    continue;
                } else {
                    let frame = loops.last_mut().expect("loop context still active");
                    frame.waiting.insert(base);
                }
                let frame = loops.last_mut().expect("loop context still active");
                frame.processed.insert(base);
            }

            match self.find_next(cfg, &done, !loops.is_empty()) {
                Some((next, mut next_state)) => {
                    if next == base {
                        return;
                    }
                    next_state.reg_alias = state.reg_alias;
                    base = next;
                    state = next_state;
                }
                None => match find_loop_head(cfg, &done) {
                    Some(head) => {
                        trace!("entering loop"; "head" => head);
                        loops.push(LoopFrame::new(head));
                        let head_preds: Vec<usize> =
                            cfg.pred.get(&head).cloned().unwrap_or_default();
                        base = head;
                        state = merge_pred_states(cfg, &head_preds);
                    }
                    None => return,
                },
            }
        }
    }

    /// Walk one block top-down, threading `state` through every instruction
    /// and recording an edge for each consumed value.
    fn walk_block(
        &mut self,
        base: usize,
        blen: usize,
        state: &mut RegState,
        done: &mut BTreeSet<usize>,
    ) {
        let insns = self.insns;
        for i in 0..blen {
            let idx = base + i;
            if idx >= insns.len() {
                break;
            }
            let insn = &insns[idx];
            // Opcode 0 is the second slot of a wide-immediate load (or a
            // cleared instruction); it carries no effect of its own.
            if insn.opcode == 0 {
                continue;
            }
            let eff = analyze(insn);
            let dst = insn.dst_reg as usize;

            if insn.opcode != OP_MOV64_REG && insn.opcode != OP_ADD64_IMM && dst < NUM_REGS {
                state.reg_alias[dst] = NO_ALIAS;
            }
            if dst < NUM_REGS && !eff.used_regs.is_empty() {
                if eff.used_regs.contains(&REG_STACK) {
                    // The destination now points into the frame.
                    state.reg_alias[dst] = 0;
                } else if state.reg_alias[dst] != NO_ALIAS && insn.opcode == OP_ADD64_IMM {
                    state.reg_alias[dst] = state.reg_alias[dst].wrapping_add(insn.imm as i16);
                } else if insn.opcode != OP_CALL {
                    state.reg_alias[dst] = NO_ALIAS;
                }
            }

            for &r in &eff.used_regs {
                let r = r as usize;
                if r >= NUM_REGS {
                    continue;
                }
                // A register aliasing r10+off reads through to the stack
                // slot it points at.
                let alias = state.reg_alias[r];
                if alias != NO_ALIAS && alias != 0 {
                    match state.stack.get(&alias) {
                        Some(writers) => {
                            for w in writers.clone() {
                                self.add_edge(idx, w);
                            }
                        }
                        None => {
                            state.stack.insert(alias, vec![ENTRY]);
                            self.add_edge(idx, ENTRY);
                        }
                    }
                }

                for w in state.regs[r].clone() {
                    self.add_edge(idx, w);
                }
            }

            if let Some(ur) = eff.updated_reg {
                let ur = ur as usize;
                if ur < NUM_REGS {
                    state.regs[ur] = vec![idx as InsnIdx];
                }
            }
            if eff.is_call {
                // r1..r5 are caller-saved; their values are unpredictable
                // after the call, r0 holds only the call site.
                for r in 1..=5 {
                    state.regs[r].clear();
                }
            }
            if let Some((off, _size)) = eff.updated_stack {
                state.stack.insert(off, vec![idx as InsnIdx]);
            }
            let class = insn.class();
            if (class == BPF_ST || class == BPF_STX)
                && matches!(insn.opcode & 0xe0, BPF_MEM | BPF_MEMSX)
            {
                self.store_candidates.push(idx);
            }

            if let Some((off, _size)) = eff.used_stack {
                if off == 0 {
                    // Tail-call convention: the callee sees the whole frame.
                    // Ascending offset order here is a determinism
                    // requirement; insertion order during non-converged
                    // sweeps feeds the next convergence check.
                    let slots: Vec<Vec<InsnIdx>> = state.stack.values().cloned().collect();
                    for writers in slots {
                        for w in writers {
                            if w == ENTRY {
                                continue;
                            }
                            self.add_edge(idx, w);
                        }
                    }
                } else {
                    match state.stack.get(&off) {
                        Some(writers) => {
                            for w in writers.clone() {
                                self.add_edge(idx, w);
                            }
                        }
                        None => {
                            state.stack.insert(off, vec![ENTRY]);
                            self.add_edge(idx, ENTRY);
                        }
                    }
                }
            }

            if eff.is_exit {
                done.insert(base);
            }
        }
    }

    /// Record `from` consuming the value produced by `writer`, both
    /// directions, without duplicates. The entry sentinel produces no
    /// reverse edge.
    fn add_edge(&mut self, from: usize, writer: InsnIdx) {
        if writer < 0 {
            let d = &mut self.deps[from].dependencies;
            if !d.contains(&ENTRY) {
                d.push(ENTRY);
            }
            return;
        }
        if !self.deps[from].dependencies.contains(&writer) {
            self.deps[from].dependencies.push(writer);
        }
        let w = writer as usize;
        if w < self.deps.len() {
            let from = from as InsnIdx;
            if !self.deps[w].depended_by.contains(&from) {
                self.deps[w].depended_by.push(from);
            }
        }
    }

    /// Among not-yet-done blocks with at least one predecessor, in
    /// ascending id order, find one whose predecessors are all done, and
    /// merge their recorded states as its entry state. The scan keeps
    /// overwriting its choice, so the block picked is the *largest* ready
    /// id; `pick_first_ready_block` stops at the first instead. Inside a
    /// loop, blocks containing an exit are deferred until convergence.
    fn find_next(
        &self,
        cfg: &ControlFlowGraph,
        done: &BTreeSet<usize>,
        in_loop: bool,
    ) -> Option<(usize, RegState)> {
        let mut found: Option<(usize, RegState)> = None;
        for (&node, preds) in &cfg.pred {
            if done.contains(&node) {
                continue;
            }
            if in_loop {
                let blen = cfg.len.get(&node).copied().unwrap_or(0);
                let contains_exit = (node..node + blen)
                    .any(|i| i < self.insns.len() && self.insns[i].opcode == OP_EXIT);
                if contains_exit {
                    continue;
                }
            }
            if preds.iter().all(|p| done.contains(p)) {
                found = Some((node, merge_pred_states(cfg, preds)));
                if self.pick_first_ready_block {
                    break;
                }
            }
        }
        found
    }
}

fn merge_pred_states(cfg: &ControlFlowGraph, preds: &[usize]) -> RegState {
    let states: Vec<&RegState> = preds.iter().filter_map(|p| cfg.stats.get(p)).collect();
    RegState::merge(&states)
}

/// When no block is ready, look for a loop: a successor of a completed
/// block from which a DFS can return to itself. Candidates are examined in
/// ascending order and the first loop header found wins.
fn find_loop_head(cfg: &ControlFlowGraph, done: &BTreeSet<usize>) -> Option<usize> {
    let mut candidates: BTreeSet<usize> = BTreeSet::new();
    for b in done {
        if let Some(succs) = cfg.succ.get(b) {
            candidates.extend(succs.iter().filter(|s| !done.contains(s)));
        }
    }
    candidates.into_iter().find(|&c| {
        let mut visited = BTreeSet::new();
        detect_loop(c, c, &cfg.succ, &mut visited).map_or(false, |path| !path.is_empty())
    })
}

/// DFS from `start` looking for a path back to `stop`, returning the
/// visited path on success. A direct `start → stop` edge yields the empty
/// path, which the caller does not count as a loop; a single-block
/// self-loop is therefore reached through normal traversal order instead.
fn detect_loop(
    start: usize,
    stop: usize,
    succ: &BTreeMap<usize, Vec<usize>>,
    visited: &mut BTreeSet<usize>,
) -> Option<Vec<InsnIdx>> {
    let successors = succ.get(&start)?;
    if successors.is_empty() {
        return None;
    }
    if successors.contains(&stop) {
        return Some(vec![]);
    }
    let mut found = false;
    let mut path: Vec<InsnIdx> = vec![start as InsnIdx];
    for &s in successors {
        if !visited.insert(s) {
            continue;
        }
        if let Some(sub) = detect_loop(s, stop, succ, visited) {
            path.extend(sub);
            found = true;
        }
    }
    found.then(|| dedup_preserving_order(path))
}
