//! Opcode constants for the 64-bit sandboxed-bytecode instruction set.
//!
//! See <https://docs.kernel.org/bpf/instruction-set.html> for the encoding.
//! An opcode byte is `class | source-bit | operation` for ALU/JMP classes,
//! and `class | size | mode` for memory classes.

// Instruction classes (low three bits of the opcode)
pub const BPF_LD: u8 = 0x00;
pub const BPF_LDX: u8 = 0x01;
pub const BPF_ST: u8 = 0x02;
pub const BPF_STX: u8 = 0x03;
pub const BPF_ALU: u8 = 0x04;
pub const BPF_JMP: u8 = 0x05;
pub const BPF_JMP32: u8 = 0x06;
pub const BPF_ALU64: u8 = 0x07;

// Source operand selector
pub const BPF_K: u8 = 0x00;
pub const BPF_X: u8 = 0x08;

// ALU operations (high four bits)
pub const ALU_ADD: u8 = 0x00;
pub const ALU_SUB: u8 = 0x10;
pub const ALU_MUL: u8 = 0x20;
pub const ALU_DIV: u8 = 0x30;
pub const ALU_OR: u8 = 0x40;
pub const ALU_AND: u8 = 0x50;
pub const ALU_LSH: u8 = 0x60;
pub const ALU_RSH: u8 = 0x70;
pub const ALU_NEG: u8 = 0x80;
pub const ALU_MOD: u8 = 0x90;
pub const ALU_XOR: u8 = 0xa0;
pub const ALU_MOV: u8 = 0xb0;
pub const ALU_ARSH: u8 = 0xc0;
pub const ALU_END: u8 = 0xd0;

// JMP operations (high four bits)
pub const JMP_A: u8 = 0x00;
pub const JMP_EQ: u8 = 0x10;
pub const JMP_GT: u8 = 0x20;
pub const JMP_GE: u8 = 0x30;
pub const JMP_SET: u8 = 0x40;
pub const JMP_NE: u8 = 0x50;
pub const JMP_SGT: u8 = 0x60;
pub const JMP_SGE: u8 = 0x70;
pub const JMP_CALL: u8 = 0x80;
pub const JMP_EXIT: u8 = 0x90;
pub const JMP_LT: u8 = 0xa0;
pub const JMP_LE: u8 = 0xb0;
pub const JMP_SLT: u8 = 0xc0;
pub const JMP_SLE: u8 = 0xd0;

// Memory modes (high three bits)
pub const BPF_IMM: u8 = 0x00;
pub const BPF_ABS: u8 = 0x20;
pub const BPF_IND: u8 = 0x40;
pub const BPF_MEM: u8 = 0x60;
pub const BPF_MEMSX: u8 = 0x80;
pub const BPF_ATOMIC: u8 = 0xc0;

// Memory access sizes
pub const SIZE_W: u8 = 0x00;
pub const SIZE_H: u8 = 0x08;
pub const SIZE_B: u8 = 0x10;
pub const SIZE_DW: u8 = 0x18;

/// The 128-bit wide-immediate load; occupies two adjacent slots, the second
/// of which carries opcode 0x00 and the upper 32 immediate bits.
pub const BPF_LDDW: u8 = 0x18;

// Atomic store forms, disqualified from constant propagation
pub const STX_ATOMIC_DW: u8 = 0xdb;
pub const STX_ATOMIC_W: u8 = 0xc3;

/// Canonical no-op: an unconditional branch with offset 0. Instructions
/// removed by the rewrite passes are replaced with this, never deleted, so
/// section length is preserved.
pub const NOP_RAW: &str = "0500000000000000";

/// Opcode of the canonical no-op / unconditional branch.
pub const OP_JA: u8 = 0x05;

/// Opcode of the exit instruction.
pub const OP_EXIT: u8 = 0x95;

/// Opcode of the call instruction.
pub const OP_CALL: u8 = 0x85;

/// Register-to-register 64-bit move; one of the two opcodes that preserve a
/// stack alias on its destination.
pub const OP_MOV64_REG: u8 = 0xbf;

/// 64-bit add-immediate; advances a stack alias by its immediate.
pub const OP_ADD64_IMM: u8 = 0x07;

/// The helper id that, by host-kernel convention, consumes the entire
/// caller stack frame (the tail call).
pub const HELPER_TAIL_CALL: i32 = 12;

/// Number of general registers, r0 through r10.
pub const NUM_REGS: usize = 11;

/// The read-only stack pointer register.
pub const REG_STACK: u8 = 10;
