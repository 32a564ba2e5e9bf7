//! Instruction decoding and re-emission.
//!
//! Every instruction is an 8-byte slot. The 16-char lowercase hex form of
//! the slot is part of the instruction's identity: the rewrite passes patch
//! instructions by splicing substrings at known offsets within it, and
//! serialization is a plain concatenation of the raw forms. Decode is
//! therefore paired with the retained raw string rather than a re-encoder.

use crate::opcodes::*;

/// One decoded 8-byte slot plus its retained raw hex.
///
/// Field layout within the slot: opcode (byte 0), dst/src register nibbles
/// (byte 1, dst low), a little-endian signed 16-bit offset (bytes 2..4) and
/// a little-endian signed 32-bit immediate (bytes 4..8).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub raw: String,
    pub opcode: u8,
    pub dst_reg: u8,
    pub src_reg: u8,
    pub offset: i16,
    pub imm: i32,
}

impl Instruction {
    /// Decode a 16-char hex slot. The raw string is retained verbatim.
    pub fn parse(hex_str: &str) -> Result<Self, String> {
        if hex_str.len() != 16 {
            return Err(format!(
                "instruction must be 16 hex characters, got {}",
                hex_str.len()
            ));
        }
        let mut bytes = [0u8; 8];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::from_str_radix(&hex_str[2 * i..2 * i + 2], 16)
                .map_err(|e| format!("bad hex at byte {}: {}", i, e))?;
        }
        Ok(Instruction {
            raw: hex_str.to_string(),
            opcode: bytes[0],
            dst_reg: bytes[1] & 0x0f,
            src_reg: (bytes[1] & 0xf0) >> 4,
            offset: i16::from_le_bytes([bytes[2], bytes[3]]),
            imm: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    /// The raw hex form; serialization is concatenation of these.
    pub fn to_hex(&self) -> &str {
        &self.raw
    }

    /// Instruction class, the low three opcode bits.
    pub fn class(&self) -> u8 {
        self.opcode & 0x07
    }

    /// ALU/JMP operation, the high four opcode bits.
    pub fn op(&self) -> u8 {
        self.opcode & 0xf0
    }

    /// The immediate field's raw hex (chars 8..16 of the slot).
    pub fn raw_imm(&self) -> &str {
        &self.raw[8..16]
    }

    /// Whether this is the first slot of a 128-bit wide-immediate load.
    pub fn is_wide_imm_load(&self) -> bool {
        self.opcode == BPF_LDDW
    }

    pub fn is_nop(&self) -> bool {
        self.raw == NOP_RAW
    }

    /// Reset every field to the canonical no-op.
    pub fn set_nop(&mut self) {
        self.raw = NOP_RAW.to_string();
        self.opcode = OP_JA;
        self.dst_reg = 0;
        self.src_reg = 0;
        self.offset = 0;
        self.imm = 0;
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Opcode: {:#04x}, Dst: r{}, Src: r{}, Off: {}, Imm: {}, Raw: {}",
            self.opcode, self.dst_reg, self.src_reg, self.offset, self.imm, self.raw
        )
    }
}

/// Lowercase hex of a byte slice.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Inverse of [`bytes_to_hex`]; the input length must be even and the
/// content valid hex (guaranteed for raw forms we built ourselves).
pub fn hex_to_bytes(hex: &str) -> Vec<u8> {
    debug_assert!(hex.len() % 2 == 0);
    (0..hex.len() / 2)
        .map(|i| u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).expect("raw hex is well-formed"))
        .collect()
}
