//! The object-file host: locate the bytecode sections referenced by
//! function symbols, run the per-section pipeline, and splice the rewritten
//! bytes back in place. Only section contents change; headers, symbols and
//! relocations are preserved byte-for-byte, which a fixed-size rewrite
//! guarantees.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::OptError;
use crate::log::*;
use crate::section::{Section, SectionStats};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_NOBITS: u32 = 8;
const STT_FUNC: u8 = 2;
/// Section indices at or above this are reserved (absolute, common, ...).
const SHN_LORESERVE: u16 = 0xff00;

/// Per-section outcome of one optimization run.
pub struct ObjectStats {
    pub sections: Vec<(String, SectionStats)>,
}

impl ObjectStats {
    pub fn total_instructions(&self) -> usize {
        self.sections.iter().map(|(_, s)| s.total).sum()
    }
    pub fn nop_instructions(&self) -> usize {
        self.sections.iter().map(|(_, s)| s.nops).sum()
    }
}

/// Optimize `input` and write the rewritten object to `output`.
pub fn optimize_object(input: &Path, output: &Path) -> Result<ObjectStats, OptError> {
    let mut data = std::fs::read(input)?;
    let stats = optimize_object_bytes(&mut data)?;
    std::fs::write(output, &data)?;
    Ok(stats)
}

/// Rewrite every function section in the object image in place.
pub fn optimize_object_bytes(data: &mut Vec<u8>) -> Result<ObjectStats, OptError> {
    let mut stats = ObjectStats {
        sections: Vec::new(),
    };
    for (name, offset, size) in function_sections(data)? {
        let bytes = &data[offset..offset + size];
        let mut section = match Section::analyze(bytes, &name) {
            Ok(s) => s,
            Err(e) => {
                // A malformed section is fatal for that section only.
                warn!("skipping section"; "section" => &name, "error" => %e);
                continue;
            }
        };
        section.optimize();
        let rewritten = section.dump();
        assert_eq!(rewritten.len(), size, "section size must be preserved");
        data[offset..offset + size].copy_from_slice(&rewritten);
        let s = section.stats();
        info!("section optimized";
            "section" => &name, "total" => s.total, "nops" => s.nops);
        stats.sections.push((name, s));
    }
    Ok(stats)
}

/// Enumerate the sections referenced by `STT_FUNC` symbols, each once, as
/// `(name, file offset, size)`. Empty and no-bits sections are skipped.
fn function_sections(data: &[u8]) -> Result<Vec<(String, usize, usize)>, OptError> {
    let elf = |msg: String| OptError::Elf(msg);
    if data.len() < 64 {
        return Err(elf("too small for an ELF header".into()));
    }
    if data[0..4] != ELF_MAGIC {
        return Err(elf("not an ELF file".into()));
    }
    if data[4] != ELFCLASS64 {
        return Err(elf("not ELF64".into()));
    }
    if data[5] != ELFDATA2LSB {
        return Err(elf("not little-endian".into()));
    }

    let e_shoff = read_u64(data, 40) as usize;
    let e_shentsize = read_u16(data, 58) as usize;
    let e_shnum = read_u16(data, 60) as usize;
    let e_shstrndx = read_u16(data, 62) as usize;
    if e_shentsize < 64 {
        return Err(elf(format!("bad section header entry size {}", e_shentsize)));
    }
    if e_shoff + e_shnum * e_shentsize > data.len() {
        return Err(elf("section header table out of range".into()));
    }

    struct Shdr {
        name: u32,
        sh_type: u32,
        offset: usize,
        size: usize,
        entsize: usize,
    }
    let shdr = |i: usize| -> Shdr {
        let off = e_shoff + i * e_shentsize;
        Shdr {
            name: read_u32(data, off),
            sh_type: read_u32(data, off + 4),
            offset: read_u64(data, off + 24) as usize,
            size: read_u64(data, off + 32) as usize,
            entsize: read_u64(data, off + 56) as usize,
        }
    };

    if e_shstrndx >= e_shnum {
        return Err(elf("bad section name string table index".into()));
    }
    let shstr = shdr(e_shstrndx);
    let shstrtab = data
        .get(shstr.offset..shstr.offset + shstr.size)
        .ok_or_else(|| elf("section name string table out of range".into()))?;

    let mut out = Vec::new();
    let mut seen: BTreeSet<u16> = BTreeSet::new();
    for i in 0..e_shnum {
        let h = shdr(i);
        if h.sh_type != SHT_SYMTAB || h.entsize == 0 {
            continue;
        }
        let count = h.size / h.entsize;
        for j in 0..count {
            let off = h.offset + j * h.entsize;
            if off + 24 > data.len() {
                return Err(elf("symbol table out of range".into()));
            }
            let st_info = data[off + 4];
            let st_shndx = read_u16(data, off + 6);
            if st_info & 0xf != STT_FUNC {
                continue;
            }
            if st_shndx == 0 || st_shndx >= SHN_LORESERVE || (st_shndx as usize) >= e_shnum {
                continue;
            }
            if !seen.insert(st_shndx) {
                continue;
            }
            let target = shdr(st_shndx as usize);
            if target.size == 0 || target.sh_type == SHT_NOBITS {
                continue;
            }
            if target.offset + target.size > data.len() {
                return Err(elf("section contents out of range".into()));
            }
            let name = read_cstr(shstrtab, target.name as usize);
            out.push((name, target.offset, target.size));
        }
    }
    Ok(out)
}

fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn read_u64(data: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[off..off + 8]);
    u64::from_le_bytes(b)
}

fn read_cstr(strtab: &[u8], off: usize) -> String {
    let tail = &strtab[off.min(strtab.len())..];
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}
