//! Golden fixtures and end-to-end scenarios for the whole pipeline.
//!
//! Control-flow fixtures are written in the dict text form the historical
//! fixture dumps use (`{0: [1, 3], 1: [4]}`) and parsed by a small helper,
//! so they can be compared against new dumps directly.

use std::collections::BTreeMap;

use crate::insn::{bytes_to_hex, hex_to_bytes, Instruction};
use crate::section::Section;
use crate::state::{InsnIdx, ENTRY};

pub fn parse_graph_fixture(text: &str) -> BTreeMap<usize, Vec<usize>> {
    let inner = text.trim().trim_start_matches('{').trim_end_matches('}');
    let mut pairs: Vec<String> = Vec::new();
    let mut depth = 0;
    let mut cur = String::new();
    for ch in inner.chars() {
        match ch {
            '[' => {
                depth += 1;
                cur.push(ch);
            }
            ']' => {
                depth -= 1;
                cur.push(ch);
            }
            ',' if depth == 0 => {
                pairs.push(std::mem::take(&mut cur));
            }
            _ => cur.push(ch),
        }
    }
    if !cur.trim().is_empty() {
        pairs.push(cur);
    }

    let mut out = BTreeMap::new();
    for pair in pairs {
        let (key, list) = pair.split_once(':').expect("fixture pair has a colon");
        let key: usize = key.trim().parse().expect("fixture key is an integer");
        let list = list.trim().trim_start_matches('[').trim_end_matches(']');
        let values: Vec<usize> = list
            .split(',')
            .filter_map(|v| {
                let v = v.trim();
                (!v.is_empty()).then(|| v.parse().expect("fixture value is an integer"))
            })
            .collect();
        out.insert(key, values);
    }
    out
}

pub fn parse_len_fixture(text: &str) -> BTreeMap<usize, usize> {
    let inner = text.trim().trim_start_matches('{').trim_end_matches('}');
    inner
        .split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once(':').expect("fixture pair has a colon");
            (
                k.trim().parse().expect("fixture key is an integer"),
                v.trim().parse().expect("fixture value is an integer"),
            )
        })
        .collect()
}

pub fn section_bytes(hexes: &[&str]) -> Vec<u8> {
    hex_to_bytes(&hexes.concat())
}

pub fn analyzed(hexes: &[&str]) -> Section {
    Section::analyze(&section_bytes(hexes), "test").expect("test section parses")
}

pub fn optimized(hexes: &[&str]) -> Vec<String> {
    let mut s = analyzed(hexes);
    s.optimize();
    s.insns.iter().map(|i| i.raw.clone()).collect()
}

/// Dependency arrays as `(dependencies, depended_by)` pairs for goldens.
fn dep_pairs(s: &Section) -> Vec<(Vec<InsnIdx>, Vec<InsnIdx>)> {
    s.deps
        .iter()
        .map(|d| (d.dependencies.clone(), d.depended_by.clone()))
        .collect()
}

/// The symmetry invariant: `j ∈ dependencies[i]` iff `i ∈ depended_by[j]`,
/// with the entry sentinel never appearing in the reverse direction.
fn assert_symmetric(s: &Section) {
    for (i, d) in s.deps.iter().enumerate() {
        assert!(
            !d.depended_by.contains(&ENTRY),
            "insn {}: entry sentinel in depended_by",
            i
        );
        for &j in &d.dependencies {
            if j == ENTRY {
                continue;
            }
            assert!(
                s.deps[j as usize].depended_by.contains(&(i as InsnIdx)),
                "edge {} -> {} missing reverse direction",
                i,
                j
            );
        }
        for &j in &d.depended_by {
            assert!(
                s.deps[j as usize].dependencies.contains(&(i as InsnIdx)),
                "edge {} <- {} missing forward direction",
                i,
                j
            );
        }
    }
}

#[test]
fn graph_fixture_parser() {
    let g = parse_graph_fixture("{0: [1, 3], 1: [4], 5: []}");
    assert_eq!(
        g,
        BTreeMap::from([(0, vec![1, 3]), (1, vec![4]), (5, vec![])])
    );
    assert!(parse_graph_fixture("{}").is_empty());
    assert_eq!(
        parse_len_fixture("{0: 1, 1: 2}"),
        BTreeMap::from([(0, 1), (1, 2)])
    );
}

#[test]
fn cfg_golden_diamond() {
    // 0: if r1 != 0 goto +2    1: mov r0, 1    2: goto +1
    // 3: mov r0, 2             4: exit
    let s = analyzed(&[
        "5501020000000000",
        "b700000001000000",
        "0500010000000000",
        "b700000002000000",
        "9500000000000000",
    ]);
    assert_eq!(
        s.cfg.succ,
        parse_graph_fixture("{0: [1, 3], 1: [4], 3: [4]}")
    );
    assert_eq!(
        s.cfg.pred,
        parse_graph_fixture("{1: [0], 3: [0], 4: [1, 3]}")
    );
    assert_eq!(s.cfg.len, parse_len_fixture("{0: 1, 1: 2, 3: 1, 4: 1}"));
}

#[test]
fn cfg_golden_mixed() {
    // 0: mov r0, 0
    // 1: if r1 == 0 goto +3
    // 2: r1 += 1
    // 3: stw [r10-4], 0
    // 4: goto +1
    // 5: mov r0, 1
    // 6: exit
    let s = analyzed(&[
        "b700000000000000",
        "1501030000000000",
        "0701000001000000",
        "620afcff00000000",
        "0500010000000000",
        "b700000001000000",
        "9500000000000000",
    ]);
    assert_eq!(
        s.cfg.succ,
        parse_graph_fixture("{0: [1], 1: [2, 5], 2: [6], 5: [6]}")
    );
    assert_eq!(
        s.cfg.pred,
        parse_graph_fixture("{1: [0], 2: [1], 5: [1], 6: [2, 5]}")
    );
    assert_eq!(
        s.cfg.len,
        parse_len_fixture("{0: 1, 1: 1, 2: 3, 5: 1, 6: 1}")
    );
}

#[test]
fn deps_straight_line_def_use() {
    // mov r1, 10; stxw [r1+16], r0
    let s = analyzed(&["b70100000a000000", "6301100000000000"]);
    assert_eq!(dep_pairs(&s), vec![(vec![], vec![1]), (vec![0], vec![])]);
    assert_symmetric(&s);
}

#[test]
fn deps_call_clobbers_scratch_registers() {
    // 0: mov r1, 5       1: mov r2, 7     2: call 1
    // 3: mov r3, r1      4: mov r4, r0    5: exit
    let s = analyzed(&[
        "b701000005000000",
        "b702000007000000",
        "8500000001000000",
        "bf13000000000000",
        "bf04000000000000",
        "9500000000000000",
    ]);
    assert_eq!(
        dep_pairs(&s),
        vec![
            (vec![], vec![2]),
            (vec![], vec![2]),
            (vec![0, 1], vec![4, 5]),
            (vec![], vec![]), // r1 after the call has no known writer
            (vec![2], vec![]),
            (vec![2], vec![]),
        ]
    );
    assert_symmetric(&s);
}

#[test]
fn deps_track_stack_through_alias() {
    // 0: r1 = r10    1: r1 += -8    2: stw [r10-8], 42
    // 3: ldxb r3, [r1+0]    4: exit
    let s = analyzed(&[
        "bfa1000000000000",
        "07010000f8ffffff",
        "620af8ff2a000000",
        "7113000000000000",
        "9500000000000000",
    ]);
    assert_eq!(
        dep_pairs(&s),
        vec![
            (vec![ENTRY], vec![1]),
            (vec![ENTRY, 0], vec![3]),
            (vec![], vec![3]),
            (vec![1, 2], vec![]),
            (vec![], vec![]),
        ]
    );
    assert_eq!(s.store_candidates, vec![2]);
    assert_symmetric(&s);
}

#[test]
fn deps_alias_survives_call() {
    // The call wipes the scratch-register writer sets but leaves the
    // frame alias standing, so a load through r1 still reaches the store.
    // 0: r1 = r10    1: r1 += -8    2: stw [r10-8], 7
    // 3: call 5      4: ldxb r3, [r1+0]    5: exit
    let s = analyzed(&[
        "bfa1000000000000",
        "07010000f8ffffff",
        "620af8ff07000000",
        "8500000005000000",
        "7113000000000000",
        "9500000000000000",
    ]);
    assert_eq!(s.deps[4].dependencies, vec![2]);
    assert_eq!(s.deps[2].depended_by, vec![4]);
    assert_symmetric(&s);
}

#[test]
fn deps_loop_reaches_fixed_point() {
    // 0: mov r0, 0    1: mov r2, 3
    // 2: r0 += 1      3: r2 -= 1    4: if r2 != 0 goto -3
    // 5: exit
    let s = analyzed(&[
        "b700000000000000",
        "b702000003000000",
        "0700000001000000",
        "1702000001000000",
        "5502fdff00000000",
        "9500000000000000",
    ]);
    assert_eq!(
        dep_pairs(&s),
        vec![
            (vec![], vec![2]),
            (vec![], vec![3]),
            (vec![0, 2], vec![2, 4, 5]), // loop-carried self dependency
            (vec![1, 3], vec![3, 4]),
            (vec![2, 3], vec![]),
            (vec![2], vec![]),
        ]
    );
    assert_symmetric(&s);
}

#[test]
fn deps_nested_loops_converge() {
    // 0: mov r6, 3    1: mov r7, 2
    // 2: r7 -= 1      3: if r7 != 0 goto -2   (inner loop over r7)
    // 4: r6 -= 1      5: if r6 != 0 goto -5   (outer loop back to 1)
    // 6: exit
    let s = analyzed(&[
        "b706000003000000",
        "b707000002000000",
        "1707000001000000",
        "5507feff00000000",
        "1706000001000000",
        "5506fbff00000000",
        "9500000000000000",
    ]);
    assert_eq!(
        dep_pairs(&s),
        vec![
            (vec![], vec![4]),
            (vec![], vec![2]),
            (vec![1, 2], vec![2, 3]), // inner loop-carried r7
            (vec![2], vec![]),
            (vec![0, 4], vec![4, 5]), // outer loop-carried r6
            (vec![4], vec![]),
            (vec![], vec![]),
        ]
    );
    assert_symmetric(&s);
}

#[test]
fn deps_tail_call_reads_whole_frame() {
    // A stack store followed by a tail call must feed the call.
    let s = analyzed(&[
        "631afcff00000000", // stxw [r10-4], r1
        "850000000c000000", // call 12 (tail call)
        "9500000000000000",
    ]);
    assert!(s.deps[1].dependencies.contains(&0));
    assert!(s.deps[0].depended_by.contains(&1));
    assert_symmetric(&s);
}

#[test]
fn constant_propagation_folds_immediate_store() {
    assert_eq!(
        optimized(&["b70100000a000000", "6301100000000000"]),
        vec!["0500000000000000", "620110000a000000"]
    );
}

#[test]
fn shift_pair_becomes_zero_extension() {
    assert_eq!(
        optimized(&["6701000020000000", "7701000020000000"]),
        vec!["bc11000000000000", "0500000000000000"]
    );
}

#[test]
fn mask_shift_peephole_two_way() {
    assert_eq!(
        optimized(&[
            "18020000ffffffff", // lddw r2, 0xffffffff
            "0000000000000000",
            "5f21000000000000", // and64 r1, r2
            "7701000020000000", // rsh64 r1, 32
        ]),
        vec![
            "0500000000000000",
            "0500000000000000",
            "bc11000000000000",
            "7701000020000000",
        ]
    );
}

#[test]
fn mask_shift_peephole_three_way() {
    // A move-immediate feeding the AND folds into the rewritten move.
    assert_eq!(
        optimized(&[
            "18020000ffffffff", // lddw r2, 0xffffffff
            "0000000000000000",
            "b703000005000000", // mov r3, 5
            "5f23000000000000", // and64 r3, r2
            "7703000020000000", // rsh64 r3, 32
            "9500000000000000",
        ]),
        vec![
            "0500000000000000",
            "0500000000000000",
            "0500000000000000",
            "bc03000000000000",
            "7703000020000000",
            "9500000000000000",
        ]
    );
}

#[test]
fn superword_merges_adjacent_word_stores() {
    assert_eq!(
        optimized(&["6200000012000000", "6200040034000000"]),
        vec!["7a00000012000000", "0500000000000000"]
    );
}

#[test]
fn superword_merge_respects_barrier() {
    let input = [
        "7206f70f28000000",
        "0500000000000000",
        "7206f60f20000000",
    ];
    assert_eq!(optimized(&input), input.to_vec());
}

#[test]
fn superword_strict_truncation_refuses_lossy_merge() {
    let hexes = ["6200000012000000", "6200040034000000"];

    let mut lossy = analyzed(&hexes);
    let candidates = lossy.store_candidates.clone();
    crate::superword::apply_with_candidates(&mut lossy, &candidates, false);
    assert_eq!(lossy.insns[0].raw, "7a00000012000000");

    let mut strict = analyzed(&hexes);
    let candidates = strict.store_candidates.clone();
    crate::superword::apply_with_candidates(&mut strict, &candidates, true);
    assert_eq!(strict.insns[0].raw, hexes[0]);
    assert_eq!(strict.insns[1].raw, hexes[1]);

    // A merge whose dropped half is all zeroes is allowed either way.
    let clean = ["6200000012000000", "6200040000000000"];
    let mut strict = analyzed(&clean);
    let candidates = strict.store_candidates.clone();
    crate::superword::apply_with_candidates(&mut strict, &candidates, true);
    assert_eq!(strict.insns[0].raw, "7a00000012000000");
    assert!(strict.insns[1].is_nop());
}

const SCENARIOS: &[&[&str]] = &[
    &["b70100000a000000", "6301100000000000"],
    &["6701000020000000", "7701000020000000"],
    &[
        "18020000ffffffff",
        "0000000000000000",
        "5f21000000000000",
        "7701000020000000",
    ],
    &["6200000012000000", "6200040034000000"],
    &["7206f70f28000000", "0500000000000000", "7206f60f20000000"],
    &[
        "b700000000000000",
        "b702000003000000",
        "0700000001000000",
        "1702000001000000",
        "5502fdff00000000",
        "9500000000000000",
    ],
    &[
        "b706000003000000",
        "b707000002000000",
        "1707000001000000",
        "5507feff00000000",
        "1706000001000000",
        "5506fbff00000000",
        "9500000000000000",
    ],
];

#[test]
fn size_is_preserved() {
    for hexes in SCENARIOS {
        let input = section_bytes(hexes);
        let mut s = Section::analyze(&input, "test").unwrap();
        s.optimize();
        assert_eq!(s.dump().len(), input.len());
    }
}

#[test]
fn pipeline_is_idempotent() {
    for hexes in SCENARIOS {
        let mut first = analyzed(hexes);
        first.optimize();
        let once = first.dump();

        let mut second = Section::analyze(&once, "test").unwrap();
        second.optimize();
        assert_eq!(
            bytes_to_hex(&second.dump()),
            bytes_to_hex(&once),
            "second run changed bytes for {:?}",
            hexes
        );
    }
}

#[test]
fn pipeline_is_deterministic() {
    for hexes in SCENARIOS {
        let a = analyzed(hexes);
        let b = analyzed(hexes);
        assert_eq!(dep_pairs(&a), dep_pairs(&b));
        assert_eq!(a.store_candidates, b.store_candidates);

        let mut a = a;
        let mut b = b;
        a.optimize();
        b.optimize();
        assert_eq!(bytes_to_hex(&a.dump()), bytes_to_hex(&b.dump()));
    }
}

#[test]
fn dependency_symmetry_across_scenarios() {
    for hexes in SCENARIOS {
        assert_symmetric(&analyzed(hexes));
    }
}

#[test]
fn decode_then_reemit_is_identity() {
    for hexes in SCENARIOS {
        let input = section_bytes(hexes);
        let s = Section::analyze(&input, "test").unwrap();
        assert_eq!(s.dump(), input);
    }
}

#[test]
fn rejects_unaligned_sections() {
    let err = Section::analyze(&[0u8; 9], "odd").unwrap_err();
    assert!(err.to_string().contains("multiple of 8"));
}

#[test]
fn nop_display_and_parse() {
    let i = Instruction::parse(crate::opcodes::NOP_RAW).unwrap();
    assert!(i.is_nop());
    assert_eq!(
        i.to_string(),
        "Opcode: 0x05, Dst: r0, Src: r0, Off: 0, Imm: 0, Raw: 0500000000000000"
    );
}
