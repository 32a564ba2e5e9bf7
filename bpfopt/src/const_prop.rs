//! Constant propagation: fold an immediate move into the stores that
//! consume it, turning register stores into immediate stores.

use crate::insn::Instruction;
use crate::log::*;
use crate::opcodes::*;
use crate::section::Section;

/// A move-immediate qualifies when every instruction depending on it is a
/// register store (class STX) whose only dependency is this move, and none
/// of them is an atomic. The store keeps its size, destination and offset;
/// the move's immediate bytes are spliced in and the move becomes a no-op.
pub fn run(s: &mut Section) {
    let mut candidates = Vec::new();
    for (i, insn) in s.insns.iter().enumerate() {
        if insn.opcode != 0xb7 && insn.opcode != 0xb4 {
            continue;
        }
        let foldable = s.deps[i].depended_by.iter().all(|&d| {
            let dep = &s.insns[d as usize];
            dep.class() == BPF_STX
                && s.deps[d as usize].dependencies.len() == 1
                && dep.opcode != STX_ATOMIC_DW
                && dep.opcode != STX_ATOMIC_W
        });
        if foldable {
            candidates.push(i);
        }
    }

    let mut folded = 0usize;
    for &c in &candidates {
        let imm_hex = s.insns[c].raw_imm().to_string();
        let dependents: Vec<usize> = s.deps[c].depended_by.iter().map(|&d| d as usize).collect();
        for d in dependents {
            let store = &s.insns[d];
            // Same size and mode, class switched to ST, source register
            // nibble cleared; dst and offset bytes are carried over.
            let opcode = (store.opcode & 0xf8) | BPF_ST;
            let hex = format!("{:02x}0{}{}", opcode, &store.raw[3..8], imm_hex);
            s.insns[d] = Instruction::parse(&hex).expect("spliced store is well-formed");
            s.deps[d].dependencies.clear();
            folded += 1;
        }
        s.insns[c].set_nop();
        s.deps[c].depended_by.clear();
    }
    if !candidates.is_empty() {
        debug!("constant propagation";
            "section" => &s.name, "moves" => candidates.len(), "stores_folded" => folded);
    }
}
