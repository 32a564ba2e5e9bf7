//! Superword store merging: coalesce runs of adjacent same-size immediate
//! stores into one wider store.
//!
//! Candidates come from the dependency walk. Groups are bounded by
//! barriers: any load or jump between two consecutive candidates ends the
//! group, including a branch with offset 0, which may carry a label other
//! control flow lands on. Within a group, runs are scanned starting at
//! every sorted position; the resulting overlapping candidates are pruned
//! by strict-subset elimination before emission.

use crate::insn::Instruction;
use crate::log::*;
use crate::opcodes::*;
use crate::opt_config::CONFIG;
use crate::section::Section;

pub fn run(s: &mut Section) {
    let candidates = s.store_candidates.clone();
    apply_with_candidates(s, &candidates, CONFIG.strict_store_merge_truncation);
}

#[derive(Clone, Copy)]
struct StoreRec {
    index: usize,
    dst: u8,
    offset: i16,
    size_bits: i32,
}

/// Memory operation width in bits, from the opcode's size field.
fn op_size_bits(opcode: u8) -> i32 {
    match opcode & 0x18 {
        SIZE_W => 32,
        SIZE_H => 16,
        SIZE_B => 8,
        _ => 64,
    }
}

fn size_mask(bits: i32) -> u8 {
    match bits {
        8 => SIZE_B,
        16 => SIZE_H,
        32 => SIZE_W,
        64 => SIZE_DW,
        _ => SIZE_W,
    }
}

/// Widest store a run starting at this offset may grow to, from its
/// natural alignment.
fn alignment_capacity(offset: i16) -> i32 {
    if offset % 8 == 0 {
        64
    } else if offset % 4 == 0 {
        32
    } else if offset % 2 == 0 {
        16
    } else {
        8
    }
}

fn is_barrier(insn: &Instruction) -> bool {
    matches!(insn.class(), BPF_LDX | BPF_JMP | BPF_JMP32)
}

fn has_barrier_between(insns: &[Instruction], start: usize, end: usize) -> bool {
    insns[start + 1..end].iter().any(is_barrier)
}

pub(crate) fn apply_with_candidates(s: &mut Section, store_candidates: &[usize], strict: bool) {
    if store_candidates.len() < 2 {
        return;
    }

    let mut all: Vec<Vec<usize>> = Vec::new();
    let mut group: Vec<usize> = Vec::new();
    for w in 0..store_candidates.len() - 1 {
        let cur = store_candidates[w];
        let next = store_candidates[w + 1];
        if group.is_empty() {
            group.push(cur);
        }
        if has_barrier_between(&s.insns, cur, next) {
            if group.len() >= 2 {
                all.extend(analyse_group(&s.insns, &group));
            }
            group.clear();
        } else {
            group.push(next);
        }
    }
    if group.len() >= 2 {
        all.extend(analyse_group(&s.insns, &group));
    }

    let merges = eliminate_subsets(all);
    if !merges.is_empty() {
        debug!("superword merge"; "section" => &s.name, "candidates" => merges.len());
    }
    apply_merges(s, merges, strict);
}

/// Sort the group by (destination register, offset) and grow a run from
/// every position: same register, same element size, exactly adjacent
/// offsets, total width within the first element's alignment capacity.
/// Runs longer than one element emit merge candidates by length.
fn analyse_group(insns: &[Instruction], indices: &[usize]) -> Vec<Vec<usize>> {
    if indices.len() < 2 {
        return Vec::new();
    }
    let mut recs: Vec<StoreRec> = indices
        .iter()
        .map(|&i| StoreRec {
            index: i,
            dst: insns[i].dst_reg,
            offset: insns[i].offset,
            size_bits: op_size_bits(insns[i].opcode),
        })
        .collect();
    recs.sort_by_key(|r| (r.dst, r.offset));

    let mut out = Vec::new();
    for j in 0..recs.len() {
        let first = recs[j];
        let capacity = alignment_capacity(first.offset);
        let mut run = vec![first.index];
        let mut offset = first.offset;
        for (steps, r) in recs[j + 1..].iter().enumerate() {
            let count = steps as i32 + 2;
            if r.dst == first.dst
                && offset + (first.size_bits / 8) as i16 == r.offset
                && r.size_bits == first.size_bits
                && first.size_bits * count <= capacity
            {
                offset = r.offset;
                run.push(r.index);
            } else {
                break;
            }
        }
        emit_run(&run, &mut out);
    }
    out
}

/// Split a run into emit-able widths: a full run of eight, else a four and
/// possibly a two off the front.
fn emit_run(run: &[usize], out: &mut Vec<Vec<usize>>) {
    let n = run.len();
    if n == 8 {
        out.push(run.to_vec());
    } else if n >= 6 {
        out.push(run[..4].to_vec());
        out.push(run[4..6].to_vec());
    } else if n >= 4 {
        out.push(run[..4].to_vec());
    } else if n >= 2 {
        out.push(run[..2].to_vec());
    }
}

fn is_subset(a: &[usize], b: &[usize]) -> bool {
    a.len() < b.len() && a.iter().all(|x| b.contains(x))
}

/// Drop every candidate that is a strict subset of another; overlapping
/// runs produced by the per-position scan collapse to the widest one.
fn eliminate_subsets(candidates: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
    let keep: Vec<bool> = candidates
        .iter()
        .map(|a| !candidates.iter().any(|b| is_subset(a, b)))
        .collect();
    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect()
}

fn apply_merges(s: &mut Section, candidates: Vec<Vec<usize>>, strict: bool) {
    for mut cand in candidates {
        if cand.len() < 2 {
            continue;
        }
        cand.sort_unstable();

        let first = &s.insns[cand[0]];
        let elem_bits = op_size_bits(first.opcode);
        let dst = first.dst_reg;
        // Every member must still be an immediate store of the same shape;
        // a register store has no immediate bytes to concatenate.
        let consistent = cand.iter().all(|&i| {
            let insn = &s.insns[i];
            insn.class() == BPF_ST && insn.dst_reg == dst && op_size_bits(insn.opcode) == elem_bits
        });
        if !consistent {
            continue;
        }
        // The grouping already avoided barriers; re-check on the final
        // index range before patching.
        if has_barrier_between(&s.insns, cand[0], *cand.last().expect("len >= 2")) {
            continue;
        }
        let new_bits = elem_bits * cand.len() as i32;
        if !matches!(new_bits, 16 | 32 | 64) {
            continue;
        }

        let imm_chars = (elem_bits / 4) as usize;
        let mut imm = String::new();
        for &i in &cand {
            imm.push_str(&s.insns[i].raw[8..8 + imm_chars]);
        }
        if new_bits == 64 && imm.len() > 8 {
            // The wide store still carries only a 32-bit immediate; the
            // upper half of the concatenation is dropped.
            if imm[8..].chars().any(|c| c != '0') {
                debug!("store merge drops non-zero immediate bits";
                    "section" => &s.name, "first" => cand[0], "discarded" => &imm[8..]);
                if strict {
                    continue;
                }
            }
            imm.truncate(8);
        }
        while imm.len() < 8 {
            imm.push('0');
        }

        let opcode = BPF_MEM | size_mask(new_bits) | BPF_ST;
        let hex = format!("{:02x}{}{}", opcode, &s.insns[cand[0]].raw[2..8], imm);
        s.insns[cand[0]] = Instruction::parse(&hex).expect("merged store is well-formed");
        for &i in &cand[1..] {
            s.insns[i].set_nop();
        }
    }
}
