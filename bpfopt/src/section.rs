//! A bytecode section: the unit the analyzer and rewriter operate on.
//!
//! A section is parsed from raw bytes, analyzed once into per-instruction
//! dependency sets, rewritten in place by the four passes in their fixed
//! order, and serialized back to bytes of the identical length.

use itertools::Itertools;

use crate::cfg::ControlFlowGraph;
use crate::depgraph::{self, DependencyInfo};
use crate::error::OptError;
use crate::insn::{bytes_to_hex, hex_to_bytes, Instruction};
use crate::log::*;
use crate::opt_config::CONFIG;
use crate::{compaction, const_prop, peephole, superword};

/// Instruction counts reported per section under `--stats`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SectionStats {
    pub total: usize,
    pub active: usize,
    pub nops: usize,
}

#[derive(Debug)]
pub struct Section {
    pub name: String,
    pub insns: Vec<Instruction>,
    /// Parallel to `insns`; canonical (sorted, duplicate-free) after
    /// analysis.
    pub deps: Vec<DependencyInfo>,
    pub cfg: ControlFlowGraph,
    /// Ascending, duplicate-free indices of plain stores seen during the
    /// dependency walk; input to the superword pass.
    pub store_candidates: Vec<usize>,
}

impl Section {
    /// Parse a section's bytes and run the dependency analysis. The length
    /// must be a multiple of the 8-byte slot size.
    pub fn analyze(bytes: &[u8], name: &str) -> Result<Section, OptError> {
        if bytes.len() % 8 != 0 {
            return Err(OptError::SectionSize {
                section: name.to_string(),
                len: bytes.len(),
            });
        }
        let hex = bytes_to_hex(bytes);
        let mut insns = Vec::with_capacity(hex.len() / 16);
        for i in 0..hex.len() / 16 {
            let slot = &hex[i * 16..(i + 1) * 16];
            insns.push(
                Instruction::parse(slot).map_err(|detail| OptError::BadInstruction {
                    section: name.to_string(),
                    index: i,
                    detail,
                })?,
            );
        }

        let mut deps = vec![DependencyInfo::default(); insns.len()];
        let mut cfg = ControlFlowGraph::build(&insns);
        let mut store_candidates = Vec::new();
        depgraph::build_dependencies(
            &insns,
            &mut cfg,
            &mut deps,
            &mut store_candidates,
            CONFIG.pick_first_ready_block,
        );
        debug!("section analyzed";
            "section" => name,
            "instructions" => insns.len(),
            "blocks" => cfg.len.len(),
            "store_candidates" => store_candidates.len(),
        );
        if CONFIG.debug_dump_dependencies {
            for (i, d) in deps.iter().enumerate() {
                debug!("dependency";
                    "insn" => i,
                    "deps" => format!("{:?}", d.dependencies),
                    "depended_by" => format!("{:?}", d.depended_by),
                );
            }
        }

        Ok(Section {
            name: name.to_string(),
            insns,
            deps,
            cfg,
            store_candidates,
        })
    }

    /// Run the rewrite passes. The order is fixed: each pass consumes the
    /// dependency arrays as produced by the analysis and none re-runs it.
    pub fn optimize(&mut self) {
        const_prop::run(self);
        compaction::run(self);
        peephole::run(self);
        superword::run(self);
    }

    /// Serialize back to bytes; always the same length the section was
    /// parsed from.
    pub fn dump(&self) -> Vec<u8> {
        hex_to_bytes(&self.insns.iter().map(|i| i.to_hex()).join(""))
    }

    pub fn stats(&self) -> SectionStats {
        let nops = self.insns.iter().filter(|i| i.is_nop()).count();
        SectionStats {
            total: self.insns.len(),
            active: self.insns.len() - nops,
            nops,
        }
    }
}
