//! Shift-pair compaction: a left shift by 32 immediately followed by a
//! right shift by 32 of the same register is a 32-bit zero-extension, which
//! the ISA expresses as a single 32-bit register move.

use itertools::Itertools;

use crate::insn::Instruction;
use crate::log::*;
use crate::section::Section;

pub fn run(s: &mut Section) {
    let mut candidates = Vec::new();
    for ((i, lsh), (_, rsh)) in s.insns.iter().enumerate().tuple_windows() {
        if lsh.opcode != 0x67 || rsh.opcode != 0x77 {
            continue;
        }
        if lsh.raw_imm() != "20000000" || rsh.raw_imm() != "20000000" {
            continue;
        }
        if lsh.dst_reg != rsh.dst_reg {
            continue;
        }
        candidates.push(i);
    }

    for &i in &candidates {
        let reg = s.insns[i].raw[3..4].to_string();
        let hex = format!("bc{}{}000000000000", reg, reg);
        s.insns[i] = Instruction::parse(&hex).expect("move template is well-formed");
        s.insns[i + 1].set_nop();
    }
    if !candidates.is_empty() {
        debug!("shift-pair compaction"; "section" => &s.name, "pairs" => candidates.len());
    }
}
