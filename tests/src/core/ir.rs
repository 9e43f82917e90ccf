use vu_core::decode::{BranchKind, DecodeError, DecodedInsn, FmacKind, FmacSrc, LowerInsn, UpperInsn};
use vu_core::dump::ir_to_string;
use vu_core::ir::{BlockEnd, IrConfig};
use vu_core::op::Hazard;
use vu_core::regs::{Lanes, RegInfo};
use vu_core::state::{PipelineState, EXACT_FORCED, EXACT_SINGLE, EXACT_STALL};

use super::{add, build, build_at, halt_after};

fn branch(kind: BranchKind, is: u8, it: u8, target: u32) -> LowerInsn {
    LowerInsn::Branch {
        kind,
        is,
        it,
        target,
    }
}

fn nops(n: usize) -> Vec<DecodedInsn> {
    vec![DecodedInsn::default(); n]
}

#[test]
fn test_read_after_write_stalls() {
    let ir = build(vec![
        DecodedInsn::upper(add(1, 2, 3, Lanes::XYZW)),
        DecodedInsn::upper(add(4, 1, 2, Lanes::XYZW)).with_e_bit(),
        DecodedInsn::default(),
    ]);
    let ops = ir.ops();
    assert_eq!(ops[0].stall, 0);
    assert_eq!(ops[0].issue_cycle, 0);
    assert_eq!(ops[1].stall, 3);
    assert_eq!(ops[1].issue_cycle, 4);
    assert_eq!(ops[2].issue_cycle, 5);
    assert_eq!(ir.cycles, 6);
    assert_eq!(ir.block.cycles, 6);
    assert_eq!(ir.block.guest_size, 24);
    assert_eq!(ir.end, Some(BlockEnd::Halt { next_pc: 24 }));
}

#[test]
fn test_untouched_lanes_do_not_stall() {
    let ir = build(halt_after(vec![
        DecodedInsn::upper(add(1, 2, 3, Lanes::X)),
        DecodedInsn::upper(add(4, 1, 2, Lanes::YZ)),
    ]));
    assert_eq!(ir.ops()[1].stall, 0);
}

#[test]
fn test_vf0_and_vi0_never_wait() {
    let ir = build(halt_after(vec![
        DecodedInsn::new(
            add(0, 2, 3, Lanes::XYZW),
            LowerInsn::Iaddi { it: 0, is: 0, imm: 1 },
        ),
        DecodedInsn::new(
            add(4, 0, 0, Lanes::XYZW),
            LowerInsn::Iaddi { it: 1, is: 0, imm: 1 },
        ),
    ]));
    assert_eq!(ir.ops()[1].stall, 0);
}

#[test]
fn test_vi_latency() {
    let ir = build(halt_after(vec![
        DecodedInsn::lower(LowerInsn::Iaddi { it: 1, is: 0, imm: 5 }),
        DecodedInsn::lower(LowerInsn::Iaddi { it: 2, is: 1, imm: 1 }),
    ]));
    assert_eq!(ir.ops()[1].stall, 0);
    assert_eq!(ir.ops()[1].issue_cycle, 1);
}

#[test]
fn test_pending_entry_state_drains() {
    let mut entry = PipelineState::new();
    entry.vf[1] = RegInfo { x: 2, y: 2, z: 2, w: 2 };
    let ir = build_at(
        halt_after(vec![DecodedInsn::upper(add(2, 1, 3, Lanes::XYZW))]),
        0,
        &entry,
        IrConfig::default(),
    )
    .unwrap();
    assert_eq!(ir.ops()[0].stall, 2);
    assert_ne!(ir.entry_state().need_exact_match & EXACT_STALL, 0);
    // The entry key keeps the timing it was translated for.
    assert_eq!(ir.entry_state().vf[1].x, 2);
}

#[test]
fn test_stall_on_own_write_is_not_exact() {
    let mut entry = PipelineState::new();
    entry.vf[1].x = 2;
    let ir = build_at(
        halt_after(vec![
            DecodedInsn::upper(add(1, 0, 0, Lanes::XYZW)),
            DecodedInsn::upper(add(4, 1, 0, Lanes::XYZW)),
        ]),
        0,
        &entry,
        IrConfig::default(),
    )
    .unwrap();
    assert_eq!(ir.ops()[1].stall, 3);
    assert_eq!(ir.entry_state().need_exact_match, 0);
}

#[test]
fn test_early_read_keys_block_exactly() {
    let prog = halt_after(vec![
        DecodedInsn::upper(add(4, 1, 2, Lanes::XYZW)),
        DecodedInsn::new(add(7, 3, 3, Lanes::XYZW), LowerInsn::Fsand { it: 2, imm: 1 }),
    ]);
    // Translated from an idle pipeline, nothing stalls, but the block
    // still depends on the entry timing of vf3.
    let idle = build(prog.clone());
    assert_eq!(idle.ops()[1].stall, 0);
    assert_ne!(idle.entry_state().need_exact_match & EXACT_STALL, 0);

    let mut entry = PipelineState::new();
    entry.vf[3] = RegInfo { x: 4, y: 4, z: 4, w: 4 };
    let busy = build_at(prog, 0, &entry, IrConfig::default()).unwrap();
    assert_eq!(busy.ops()[1].stall, 3);
    assert_eq!(idle.block.cycles, 4);
    assert_eq!(busy.block.cycles, 7);
    assert_eq!(idle.ops()[1].s_flag.read, 0);
    assert_eq!(busy.ops()[1].s_flag.read, 1);
}

#[test]
fn test_short_block_keys_exactly() {
    let ir = build(halt_after(vec![]));
    assert_eq!(ir.block.cycles, 2);
    assert_eq!(ir.entry_state().need_exact_match, EXACT_STALL);

    let ir = build(halt_after(nops(4)));
    assert_eq!(ir.entry_state().need_exact_match, 0);
}

#[test]
fn test_forced_exact_marker() {
    let config = IrConfig {
        force_exact_match: true,
        ..IrConfig::default()
    };
    let ir = build_at(halt_after(nops(4)), 0, &PipelineState::new(), config).unwrap();
    assert_eq!(ir.entry_state().need_exact_match, EXACT_FORCED);
    assert_eq!(ir.exit_state().need_exact_match, 0);
}

#[test]
fn test_lower_reads_upper_write_swaps() {
    let ir = build(halt_after(vec![DecodedInsn::new(
        add(3, 1, 2, Lanes::X),
        LowerInsn::Move {
            ft: 4,
            fs: 3,
            dest: Lanes::X,
        },
    )]));
    let op = &ir.ops()[0];
    assert_eq!(op.hazard, Some(Hazard::LowerReadsUpperWrite));
    assert!(op.swap_ops);
    assert!(!op.backup_vf);
}

#[test]
fn test_mutual_dependency_backs_up() {
    let ir = build(halt_after(vec![DecodedInsn::new(
        add(3, 4, 2, Lanes::XYZW),
        LowerInsn::Move {
            ft: 4,
            fs: 3,
            dest: Lanes::XYZW,
        },
    )]));
    let op = &ir.ops()[0];
    assert_eq!(op.hazard, Some(Hazard::LowerReadsUpperWrite));
    assert!(!op.swap_ops);
    assert!(op.backup_vf);
}

#[test]
fn test_disjoint_lanes_are_no_hazard() {
    let ir = build(halt_after(vec![DecodedInsn::new(
        add(3, 1, 2, Lanes::X),
        LowerInsn::Move {
            ft: 4,
            fs: 3,
            dest: Lanes::Y,
        },
    )]));
    assert_eq!(ir.ops()[0].hazard, None);
}

#[test]
fn test_same_destination_drops_lower_write() {
    let ir = build(halt_after(vec![DecodedInsn::new(
        add(3, 1, 2, Lanes::XYZW),
        LowerInsn::Move {
            ft: 3,
            fs: 5,
            dest: Lanes::XY,
        },
    )]));
    assert!(ir.ops()[0].lower.no_write_vf);
    assert_eq!(ir.ops()[0].hazard, None);
}

#[test]
fn test_flag_read_conflict() {
    let mut prog: Vec<_> = (1..=3)
        .map(|fd| DecodedInsn::upper(add(fd, 5, 6, Lanes::XYZW)))
        .collect();
    prog.push(DecodedInsn::new(add(4, 5, 6, Lanes::XYZW), LowerInsn::Fsand { it: 2, imm: 1 }));
    let ir = build(halt_after(prog));

    let op = &ir.ops()[3];
    assert_eq!(op.issue_cycle, 3);
    assert_eq!(op.s_flag.write, 0);
    assert_eq!(op.s_flag.read, 0);
    assert_eq!(op.hazard, Some(Hazard::FlagReadConflict));
    assert!(op.swap_ops);
}

#[test]
fn test_flag_read_instance_follows_latency() {
    let mut prog = vec![DecodedInsn::upper(add(1, 5, 6, Lanes::XYZW))];
    prog.extend(nops(2));
    prog.push(DecodedInsn::lower(LowerInsn::Fsand { it: 2, imm: 1 }));
    prog.push(DecodedInsn::lower(LowerInsn::Fsand { it: 3, imm: 1 }));
    let ir = build(halt_after(prog));

    let ops = ir.ops();
    assert_eq!(ops[0].s_flag.write, 1);
    assert_eq!(ops[3].issue_cycle, 3);
    assert_eq!(ops[3].s_flag.read, 0);
    assert_eq!(ops[4].issue_cycle, 4);
    assert_eq!(ops[4].s_flag.read, 1);
    assert_eq!(ir.exit_state().flags & 3, 1);
}

#[test]
fn test_q_instance_flips_when_result_lands() {
    let mut prog = vec![DecodedInsn::lower(LowerInsn::Div {
        fs: 1,
        fsf: 0,
        ft: 2,
        ftf: 0,
    })];
    prog.extend(nops(6));
    prog.push(DecodedInsn::upper(UpperInsn::Fmac {
        kind: FmacKind::Mul,
        fd: 3,
        fs: 1,
        ft: FmacSrc::Q,
        dest: Lanes::XYZW,
    }));
    let ir = build(halt_after(prog));

    let ops = ir.ops();
    assert_eq!(ops[0].write_q, 1);
    assert_eq!(ops[6].read_q, 0);
    assert_eq!(ops[7].issue_cycle, 7);
    assert_eq!(ops[7].read_q, 1);
    assert_eq!(ir.q_instance(), 1);
}

#[test]
fn test_waitq_stalls_until_result() {
    let ir = build(halt_after(vec![
        DecodedInsn::lower(LowerInsn::Div {
            fs: 1,
            fsf: 0,
            ft: 2,
            ftf: 0,
        }),
        DecodedInsn::lower(LowerInsn::WaitQ),
    ]));
    assert_eq!(ir.ops()[1].stall, 6);
    assert_eq!(ir.ops()[1].issue_cycle, 7);
    assert_eq!(ir.exit_state().q, 0);
}

#[test]
fn test_p_pending_at_exit() {
    let ir = build(halt_after(vec![DecodedInsn::lower(LowerInsn::Esqrt { fs: 1, fsf: 3 })]));
    // Issued at 0, three more cycles elapse before the block closes.
    assert_eq!(ir.exit_state().p, 12 - 3);
    assert_eq!(ir.p_instance(), 0);
}

#[test]
fn test_xgkick_waits_for_previous_transfer() {
    let ir = build(halt_after(vec![
        DecodedInsn::lower(LowerInsn::Xgkick { is: 1 }),
        DecodedInsn::lower(LowerInsn::Xgkick { is: 1 }),
    ]));
    assert!(ir.ops()[0].do_xgkick);
    assert_eq!(ir.ops()[1].stall, 7);
}

#[test]
fn test_halt_end() {
    let ir = build(halt_after(vec![]));
    assert_eq!(ir.end, Some(BlockEnd::Halt { next_pc: 16 }));
    assert!(ir.ops()[0].upper.e_bit);
    assert!(ir.ops()[1].is_bdelay);
    assert!(ir.ops()[1].is_eob);
}

#[test]
fn test_branch_end() {
    let ir = build(vec![
        DecodedInsn::lower(branch(BranchKind::B, 0, 0, 0x40)),
        DecodedInsn::default(),
    ]);
    assert_eq!(
        ir.end,
        Some(BlockEnd::Branch {
            kind: BranchKind::B,
            target: 0x40,
            fallthrough: 16,
        })
    );
    assert_eq!(ir.branch, Some(BranchKind::B));
    assert!(ir.ops()[1].is_bdelay);
}

#[test]
fn test_instruction_limit_falls_through() {
    let config = IrConfig {
        max_block_insns: 3,
        ..IrConfig::default()
    };
    let ir = build_at(nops(8), 0, &PipelineState::new(), config).unwrap();
    assert_eq!(ir.end, Some(BlockEnd::FallThrough { next_pc: 24 }));
    assert_eq!(ir.count, 3);
}

#[test]
fn test_pc_wraps_at_end_of_micro_memory() {
    let config = IrConfig {
        micro_mem_size: 32,
        ..IrConfig::default()
    };
    let ir = build_at(nops(4), 0, &PipelineState::new(), config).unwrap();
    assert_eq!(ir.end, Some(BlockEnd::FallThrough { next_pc: 0 }));

    let ir = build_at(
        vec![
            DecodedInsn::lower(branch(BranchKind::B, 0, 0, 0x48)),
            DecodedInsn::default(),
        ],
        0,
        &PipelineState::new(),
        config,
    )
    .unwrap();
    assert_eq!(
        ir.end,
        Some(BlockEnd::Branch {
            kind: BranchKind::B,
            target: 8,
            fallthrough: 16,
        })
    );
}

#[test]
fn test_branch_in_delay_slot() {
    let mut prog = vec![
        DecodedInsn::lower(branch(BranchKind::B, 0, 0, 0x40)),
        DecodedInsn::lower(branch(BranchKind::B, 0, 0, 0x80)),
    ];
    prog.extend(nops(8));
    let ir = build(prog.clone());

    assert!(ir.ops()[0].lower.bad_branch);
    assert!(ir.ops()[1].lower.evil_branch);
    assert_eq!(ir.exit_state().block_type, 1);
    assert_eq!(
        ir.end,
        Some(BlockEnd::Branch {
            kind: BranchKind::B,
            target: 0x40,
            fallthrough: 16,
        })
    );

    // The block at the first target runs one pair, then takes the
    // delayed branch.
    let single = build_at(prog, 0x40, ir.exit_state(), IrConfig::default()).unwrap();
    assert!(single.is_single());
    assert_eq!(single.count, 1);
    assert_eq!(single.end, Some(BlockEnd::DelayedBranch { fallthrough: 0x48 }));
    assert_ne!(single.entry_state().need_exact_match & EXACT_SINGLE, 0);
    assert_eq!(single.exit_state().block_type, 0);
}

#[test]
fn test_link_register_write_is_tracked() {
    let ir = build(vec![
        DecodedInsn::lower(branch(BranchKind::Bal, 0, 15, 0x40)),
        DecodedInsn::default(),
    ]);
    assert_eq!(ir.ops()[0].lower.vi_write.reg, 15);
    assert_eq!(ir.exit_state().vi[15], 0);
}

#[test]
fn test_decode_past_program_end() {
    let err = build_at(nops(1), 0, &PipelineState::new(), IrConfig::default()).unwrap_err();
    assert_eq!(err, DecodeError::OutOfRange { pc: 8 });
}

#[test]
fn test_misaligned_pc() {
    let err = build_at(nops(4), 4, &PipelineState::new(), IrConfig::default()).unwrap_err();
    assert!(matches!(err, DecodeError::UnsupportedSequence { pc: 4, .. }));
}

#[test]
fn test_register_out_of_range() {
    let err = build_at(
        halt_after(vec![DecodedInsn::upper(add(40, 1, 2, Lanes::XYZW))]),
        0,
        &PipelineState::new(),
        IrConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, DecodeError::InvalidOperand { pc: 0, .. }), "{err}");

    let bad_vi = DecodedInsn::lower(LowerInsn::Iaddi { it: 1, is: 32, imm: 1 });
    let err = build_at(
        vec![DecodedInsn::default(), bad_vi],
        0,
        &PipelineState::new(),
        IrConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, DecodeError::InvalidOperand { pc: 8, .. }), "{err}");

    // Unused Q source and zero lane masks are not register numbers.
    let mul_q = UpperInsn::Fmac {
        kind: FmacKind::Mul,
        fd: 31,
        fs: 31,
        ft: FmacSrc::Q,
        dest: Lanes::NONE,
    };
    let ir = build_at(
        halt_after(vec![DecodedInsn::upper(mul_q)]),
        0,
        &PipelineState::new(),
        IrConfig::default(),
    );
    assert!(ir.is_ok());
}

#[test]
fn test_rejected_control_combinations() {
    let b = || DecodedInsn::lower(branch(BranchKind::B, 0, 0, 0x40));
    let cases = [
        vec![b().with_e_bit(), DecodedInsn::default()],
        vec![DecodedInsn::default().with_e_bit(), b()],
        vec![b(), DecodedInsn::default().with_e_bit()],
    ];
    for prog in cases {
        let err = build_at(prog, 0, &PipelineState::new(), IrConfig::default()).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedSequence { .. }), "{err}");
    }
}

#[test]
fn test_dump_text() {
    crate::init_logger();
    let ir = build(halt_after(vec![DecodedInsn::new(
        add(3, 1, 2, Lanes::XYZW),
        LowerInsn::Iaddi { it: 1, is: 0, imm: -1 },
    )]));
    let text = ir_to_string(&ir);
    assert!(text.contains("block 0x0000"), "{text}");
    assert!(text.contains("add.xyzw vf3, vf1, vf2"), "{text}");
    assert!(text.contains("iaddi vi1, vi0, -1"), "{text}");
    assert!(text.contains("s[w1 r0]"), "{text}");
    assert!(text.contains("ebit"), "{text}");
    assert!(text.contains("end halt 0x0018"), "{text}");
}
