//! Per-instruction effect analysis.
//!
//! [`analyze`] is a pure function from a decoded instruction to the record
//! of registers and stack slots it reads and writes. These records are the
//! only view of the instruction stream the control-flow and data-flow
//! layers consume.

use crate::insn::Instruction;
use crate::opcodes::*;

/// What one instruction reads and writes.
///
/// Stack accesses are `(frame offset, size)` pairs; the tail-call
/// convention of reading the entire caller frame is encoded as
/// `used_stack == Some((0, 0))` and handled specially downstream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InsnEffects {
    pub updated_reg: Option<u8>,
    pub updated_stack: Option<(i16, i16)>,
    pub used_regs: Vec<u8>,
    pub used_stack: Option<(i16, i16)>,
    pub branch_offset: i16,
    pub is_call: bool,
    pub is_exit: bool,
}

/// Registers a helper call reads, by helper id. Deviating from this table
/// changes liveness downstream, so it is mirrored exactly.
fn helper_used_regs(helper_id: i32) -> Vec<u8> {
    match helper_id {
        HELPER_TAIL_CALL => vec![1, 2, 3],
        1 | 3 | 23 | 44 => vec![1, 2], // map lookup, delete
        2 | 69 => vec![1, 2, 3, 4],    // map update
        4 | 51 => vec![1, 2, 3],
        5 | 7 | 8 => vec![], // only update r0
        9 | 10 | 11 => vec![1, 2, 3, 4, 5],
        _ => vec![1, 2, 3, 4, 5],
    }
}

fn memory_size(opcode: u8) -> i16 {
    1 << ((opcode >> 3) & 0x3)
}

/// Compute the effect record of a single instruction. Unrecognized
/// (class, operation) combinations yield the empty record: no reads, no
/// writes, which keeps the rewrite passes away from them.
pub fn analyze(insn: &Instruction) -> InsnEffects {
    let mut eff = InsnEffects::default();
    let dst = insn.dst_reg;
    let src = insn.src_reg;

    match insn.class() {
        BPF_ALU | BPF_ALU64 => match insn.op() {
            ALU_END => {
                eff.updated_reg = Some(dst);
                eff.used_regs = vec![dst];
            }
            ALU_MOV => {
                eff.updated_reg = Some(dst);
                if insn.opcode & BPF_X == BPF_X {
                    eff.used_regs = vec![src];
                }
            }
            _ => {
                eff.updated_reg = Some(dst);
                if insn.opcode & BPF_X == BPF_X {
                    eff.used_regs = vec![dst, src];
                } else {
                    eff.used_regs = vec![dst];
                }
            }
        },
        BPF_JMP | BPF_JMP32 => match insn.op() {
            JMP_CALL => {
                eff.is_call = true;
                eff.updated_reg = Some(0);
                eff.used_regs = helper_used_regs(insn.imm);
                if insn.imm == HELPER_TAIL_CALL {
                    eff.used_stack = Some((0, 0));
                }
            }
            JMP_EXIT => {
                eff.used_regs = vec![0];
                eff.is_exit = true;
            }
            JMP_A => {
                eff.branch_offset = insn.offset;
            }
            _ => {
                eff.used_regs = vec![dst, src];
                eff.branch_offset = insn.offset;
            }
        },
        BPF_STX => {
            let mode = insn.opcode & 0xe0;
            if mode == BPF_MEM || mode == BPF_MEMSX || mode == BPF_ATOMIC {
                if dst == REG_STACK {
                    eff.updated_stack = Some((insn.offset, memory_size(insn.opcode)));
                    eff.used_regs = vec![src];
                } else {
                    eff.used_regs = vec![dst, src];
                }
            }
        }
        BPF_ST => {
            let mode = insn.opcode & 0xe0;
            if mode == BPF_MEM || mode == BPF_MEMSX || mode == BPF_ATOMIC {
                if dst == REG_STACK {
                    eff.updated_stack = Some((insn.offset, memory_size(insn.opcode)));
                } else {
                    eff.used_regs = vec![dst];
                }
            }
        }
        BPF_LDX => {
            let mode = insn.opcode & 0xe0;
            if mode == BPF_MEM || mode == BPF_MEMSX {
                eff.updated_reg = Some(dst);
                if src == REG_STACK {
                    eff.used_stack = Some((insn.offset, memory_size(insn.opcode)));
                } else {
                    eff.used_regs = vec![src];
                }
            }
        }
        BPF_LD => {
            // Only the first slot of a wide-immediate load writes; the
            // all-zero second slot shares the IMM mode bits but is not an
            // instruction of its own.
            let mode = insn.opcode & 0xe0;
            if insn.opcode == BPF_LDDW {
                eff.updated_reg = Some(dst);
            } else if mode == BPF_ABS || mode == BPF_IND {
                eff.updated_reg = Some(dst);
                eff.used_regs = vec![src];
            }
        }
        _ => unreachable!("class is three bits"),
    }
    eff
}
