//! Integration tests for the block cache and the execution loop.

use vu_backend::X86_64CodeGen;
use vu_core::decode::{BranchKind, DecodeError, DecodedInsn, FmacKind, FmacSrc, LowerInsn, MicroProgram, UpperInsn};
use vu_core::regs::Lanes;
use vu_core::state::PipelineState;
use vu_core::vu::VuRegs;
use vu_exec::{cpu_exec_loop, ExecEnv, ExitReason, JitConfig, JitError};

fn new_env(config: JitConfig) -> ExecEnv<X86_64CodeGen> {
    ExecEnv::with_config(X86_64CodeGen::new(), config).unwrap()
}

/// `len` pairs of nops with `insns` placed at their pcs.
fn program(len: usize, insns: &[(u32, DecodedInsn)]) -> MicroProgram {
    let mut prog = MicroProgram::new(vec![DecodedInsn::default(); len]);
    for &(pc, insn) in insns {
        prog.patch(pc, insn).unwrap();
    }
    prog
}

fn halt_at(pc: u32) -> (u32, DecodedInsn) {
    (pc, DecodedInsn::default().with_e_bit())
}

fn add(fd: u8, fs: u8, ft: u8, dest: Lanes) -> UpperInsn {
    UpperInsn::Fmac {
        kind: FmacKind::Add,
        fd,
        fs,
        ft: FmacSrc::Vf(ft),
        dest,
    }
}

fn branch(kind: BranchKind, is: u8, it: u8, target: u32) -> DecodedInsn {
    DecodedInsn::lower(LowerInsn::Branch {
        kind,
        is,
        it,
        target,
    })
}

#[test]
fn test_env_setup() {
    let env = new_env(JitConfig::default());
    assert!(env.code_gen_start > 0);
    assert_eq!(env.code_buf.offset(), env.code_gen_start);
    assert!(env.block_store.is_empty());
}

#[test]
fn test_tolerant_hit_on_register_timing() {
    crate::init_logger();
    let mut env = new_env(JitConfig::default());
    // No register reads and long enough for entry timing to drain.
    let mut prog = program(8, &[halt_at(32)]);
    let (idx, _) = env.translate(&mut prog, 0, &PipelineState::new()).unwrap();
    assert_eq!(env.block_store.get(idx).entry.need_exact_match, 0);

    let mut live = PipelineState::new();
    live.vf[5].x = 2;
    let hit = env.lookup(0, &live).expect("tolerant lookup should hit");
    assert_eq!(hit.host_offset, env.block_store.get(idx).host_offset);

    live.q = 3;
    assert!(env.lookup(0, &live).is_none());
}

#[test]
fn test_register_timing_read_early_is_not_reused() {
    let mut env = new_env(JitConfig::default());
    let mut prog = program(
        4,
        &[
            (0, DecodedInsn::upper(add(4, 1, 2, Lanes::XYZW))),
            (
                8,
                DecodedInsn::new(add(7, 3, 3, Lanes::XYZW), LowerInsn::Fsand { it: 2, imm: 1 }),
            ),
            halt_at(16),
        ],
    );
    let (idle_idx, _) = env.translate(&mut prog, 0, &PipelineState::new()).unwrap();

    let mut live = PipelineState::new();
    live.vf[3] = vu_core::regs::RegInfo { x: 4, y: 4, z: 4, w: 4 };
    assert!(env.lookup(0, &live).is_none());

    let (busy_idx, _) = env.translate(&mut prog, 0, &live).unwrap();
    assert_ne!(busy_idx, idle_idx);
    assert_eq!(env.block_store.get(idle_idx).cycles, 4);
    assert_eq!(env.block_store.get(busy_idx).cycles, 7);
    assert_eq!(env.lookup(0, &live).unwrap().cycles, 7);
    assert_eq!(env.lookup(0, &PipelineState::new()).unwrap().cycles, 4);
}

#[test]
fn test_forced_exact_match_misses() {
    let config = JitConfig {
        force_exact_match: true,
        ..JitConfig::default()
    };
    let mut env = new_env(config);
    let mut prog = program(4, &[halt_at(0)]);
    env.translate(&mut prog, 0, &PipelineState::new()).unwrap();

    assert!(env.lookup(0, &PipelineState::new()).is_some());
    let mut live = PipelineState::new();
    live.vf[5].x = 2;
    assert!(env.lookup(0, &live).is_none());
}

#[test]
fn test_same_key_is_not_translated_twice() {
    let mut env = new_env(JitConfig::default());
    let mut prog = program(4, &[halt_at(0)]);
    let (a, _) = env.translate(&mut prog, 0, &PipelineState::new()).unwrap();
    let end = env.code_buf.offset();
    let (b, _) = env.translate(&mut prog, 0, &PipelineState::new()).unwrap();
    assert_eq!(a, b);
    assert_eq!(env.block_store.len(), 1);
    assert_eq!(env.code_buf.offset(), end);
}

#[test]
fn test_distinct_entry_states_get_own_blocks() {
    let mut env = new_env(JitConfig::default());
    let mut prog = program(4, &[halt_at(0)]);
    let other = PipelineState {
        flags: 0x15,
        ..PipelineState::new()
    };
    env.translate(&mut prog, 0, &PipelineState::new()).unwrap();
    env.translate(&mut prog, 0, &other).unwrap();
    assert_eq!(env.block_store.count_at(0), 2);
    assert_eq!(env.lookup(0, &other).unwrap().entry.flags, 0x15);
}

#[test]
fn test_decode_error_installs_nothing() {
    let mut env = new_env(JitConfig::default());
    let mut prog = program(1, &[]);
    let err = env.translate(&mut prog, 0, &PipelineState::new()).unwrap_err();
    assert!(matches!(err, JitError::Decode(DecodeError::OutOfRange { pc: 8 })), "{err}");
    assert!(env.block_store.is_empty());
    assert_eq!(env.code_buf.offset(), env.code_gen_start);
}

#[test]
fn test_bad_register_fails_translation_only() {
    let mut env = new_env(JitConfig::default());
    let mut prog = program(4, &[(0, DecodedInsn::upper(add(40, 1, 2, Lanes::XYZW)).with_e_bit())]);
    let err = env.translate(&mut prog, 0, &PipelineState::new()).unwrap_err();
    assert!(
        matches!(err, JitError::Decode(DecodeError::InvalidOperand { pc: 0, .. })),
        "{err}"
    );
    assert!(env.block_store.is_empty());
    assert_eq!(env.code_buf.offset(), env.code_gen_start);
}

#[test]
fn test_flush_reclaims_code_space() {
    let mut env = new_env(JitConfig::default());
    let mut prog = program(8, &[halt_at(0), halt_at(0x20)]);
    env.translate(&mut prog, 0, &PipelineState::new()).unwrap();
    env.translate(&mut prog, 0x20, &PipelineState::new()).unwrap();
    assert_eq!(env.block_store.len(), 2);
    assert!(env.code_buf.offset() > env.code_gen_start);

    env.flush();
    assert!(env.block_store.is_empty());
    assert!(env.lookup(0, &PipelineState::new()).is_none());
    assert_eq!(env.code_buf.offset(), env.code_gen_start);
}

#[test]
fn test_buffer_full() {
    let config = JitConfig {
        min_code_buf_remaining: 1 << 40,
        ..JitConfig::default()
    };
    let mut env = new_env(config);
    let mut prog = program(4, &[halt_at(0)]);
    let err = env.translate(&mut prog, 0, &PipelineState::new()).unwrap_err();
    assert!(matches!(err, JitError::BufferFull { .. }), "{err}");
    assert!(env.block_store.is_empty());

    // A flush cannot help either; the loop reports it without running.
    let mut vu = VuRegs::new();
    let reason = unsafe { cpu_exec_loop(&mut env, &mut vu, &mut prog, 10) }.unwrap();
    assert_eq!(reason, ExitReason::BufferFull);
}

#[cfg(target_arch = "x86_64")]
mod run {
    use super::*;

    fn run(prog: &mut MicroProgram, vu: &mut VuRegs) -> (ExitReason, ExecEnv<X86_64CodeGen>) {
        crate::init_logger();
        let mut env = new_env(JitConfig::default());
        let reason = unsafe { cpu_exec_loop(&mut env, vu, prog, 100) }.unwrap();
        (reason, env)
    }

    #[test]
    fn test_add_and_halt() {
        let mut vu = VuRegs::new();
        vu.vf[1] = [1.0, 2.0, 3.0, 4.0];
        vu.vf[2] = [10.0, 20.0, 30.0, 40.0];
        let mut prog = program(4, &[(0, DecodedInsn::upper(add(3, 1, 2, Lanes::XYZW)).with_e_bit())]);

        let (reason, env) = run(&mut prog, &mut vu);
        assert_eq!(reason, ExitReason::Halted);
        assert_eq!(vu.vf[3], [11.0, 22.0, 33.0, 44.0]);
        assert_eq!(vu.pc, 16);
        assert_eq!(vu.cycles, 2);
        assert_eq!(vu.vf[0], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(env.block_store.len(), 1);
    }

    #[test]
    fn test_status_and_mac_flags() {
        let mut vu = VuRegs::new();
        vu.vf[1] = [1.0, 0.0, -5.0, 2.0];
        vu.vf[2] = [0.0, 0.0, 0.0, 1.0];
        let mut prog = program(4, &[(0, DecodedInsn::upper(add(3, 1, 2, Lanes::XYZW)).with_e_bit())]);

        run(&mut prog, &mut vu);
        assert_eq!(vu.vf[3], [1.0, 0.0, -5.0, 3.0]);
        assert_eq!(vu.flag_instances, 0b01_01);
        assert_eq!(vu.mac_flag(), 0x42);
        assert_eq!(vu.status_flag(), 0xC3);
    }

    #[test]
    fn test_sticky_status_survives() {
        let mut vu = VuRegs::new();
        vu.status[0] = 0xC0;
        vu.vf[1] = [1.0, 1.0, 1.0, 1.0];
        let mut prog = program(4, &[(0, DecodedInsn::upper(add(3, 1, 1, Lanes::XYZW)).with_e_bit())]);

        run(&mut prog, &mut vu);
        assert_eq!(vu.status_flag(), 0xC0);
        assert_eq!(vu.mac_flag(), 0);
    }

    #[test]
    fn test_lower_reads_old_value() {
        let mut vu = VuRegs::new();
        vu.vf[1] = [1.0, 0.0, 0.0, 0.0];
        vu.vf[2] = [2.0, 0.0, 0.0, 0.0];
        vu.vf[3] = [7.0, 0.0, 0.0, 0.0];
        let pair = DecodedInsn::new(
            add(3, 1, 2, Lanes::X),
            LowerInsn::Move {
                ft: 4,
                fs: 3,
                dest: Lanes::X,
            },
        );
        let mut prog = program(4, &[(0, pair.with_e_bit())]);

        run(&mut prog, &mut vu);
        assert_eq!(vu.vf[4][0], 7.0);
        assert_eq!(vu.vf[3][0], 3.0);
    }

    #[test]
    fn test_exchange_through_backup() {
        let mut vu = VuRegs::new();
        vu.vf[2] = [2.0; 4];
        vu.vf[3] = [7.0; 4];
        vu.vf[4] = [1.0; 4];
        let pair = DecodedInsn::new(
            add(3, 4, 2, Lanes::XYZW),
            LowerInsn::Move {
                ft: 4,
                fs: 3,
                dest: Lanes::XYZW,
            },
        );
        let mut prog = program(4, &[(0, pair.with_e_bit())]);

        run(&mut prog, &mut vu);
        assert_eq!(vu.vf[3], [3.0; 4]);
        assert_eq!(vu.vf[4], [7.0; 4]);
    }

    #[test]
    fn test_countdown_loop() {
        let mut vu = VuRegs::new();
        vu.vi[1] = 3;
        let mut prog = program(
            6,
            &[
                (0, DecodedInsn::lower(LowerInsn::Iaddi { it: 1, is: 1, imm: -1 })),
                (8, branch(BranchKind::Ibne, 1, 0, 0)),
                halt_at(24),
            ],
        );

        let (reason, env) = run(&mut prog, &mut vu);
        assert_eq!(reason, ExitReason::Halted);
        assert_eq!(vu.vi[1], 0);
        assert_eq!(vu.pc, 40);
        assert_eq!(env.block_store.len(), 2);
        assert_eq!(vu.cycles, 3 * 3 + 2);
    }

    #[test]
    fn test_block_limit() {
        let mut vu = VuRegs::new();
        vu.vi[1] = 100;
        let mut prog = program(
            4,
            &[
                (0, DecodedInsn::lower(LowerInsn::Iaddi { it: 1, is: 1, imm: -1 })),
                (8, branch(BranchKind::Ibne, 1, 0, 0)),
            ],
        );
        let mut env = new_env(JitConfig::default());
        let reason = unsafe { cpu_exec_loop(&mut env, &mut vu, &mut prog, 5) }.unwrap();
        assert_eq!(reason, ExitReason::BlockLimit);
        assert_eq!(vu.vi[1], 95);
        assert_eq!(vu.pc, 0);
    }

    #[test]
    fn test_div_waitq_mul_q() {
        let mut vu = VuRegs::new();
        vu.vf[1] = [8.0, 0.0, 0.0, 0.0];
        vu.vf[2] = [2.0, 0.0, 0.0, 0.0];
        vu.vf[4] = [1.0, 2.0, 3.0, 4.0];
        let mul_q = UpperInsn::Fmac {
            kind: FmacKind::Mul,
            fd: 3,
            fs: 4,
            ft: FmacSrc::Q,
            dest: Lanes::XYZW,
        };
        let mut prog = program(
            6,
            &[
                (
                    0,
                    DecodedInsn::lower(LowerInsn::Div {
                        fs: 1,
                        fsf: 0,
                        ft: 2,
                        ftf: 0,
                    }),
                ),
                (8, DecodedInsn::lower(LowerInsn::WaitQ)),
                (16, DecodedInsn::upper(mul_q).with_e_bit()),
            ],
        );

        run(&mut prog, &mut vu);
        assert_eq!(vu.vf[3], [4.0, 8.0, 12.0, 16.0]);
        assert_eq!(vu.q_value(), 4.0);
    }

    #[test]
    fn test_esqrt_waitp_mfp() {
        let mut vu = VuRegs::new();
        vu.vf[1] = [0.0, 0.0, 0.0, 9.0];
        let mut prog = program(
            6,
            &[
                (0, DecodedInsn::lower(LowerInsn::Esqrt { fs: 1, fsf: 3 })),
                (8, DecodedInsn::lower(LowerInsn::WaitP)),
                (
                    16,
                    DecodedInsn::lower(LowerInsn::Mfp {
                        ft: 5,
                        dest: Lanes::XYZW,
                    })
                    .with_e_bit(),
                ),
            ],
        );

        run(&mut prog, &mut vu);
        assert_eq!(vu.vf[5], [3.0; 4]);
        assert_eq!(vu.p_value(), 3.0);
    }

    #[test]
    fn test_clip_judgement() {
        let clip = DecodedInsn::upper(UpperInsn::Clip { fs: 1, ft: 0 });
        let setup = |prev: u32| {
            let mut vu = VuRegs::new();
            vu.vf[1] = [2.0, -3.0, 0.5, 0.0];
            vu.clip[0] = prev;
            vu
        };

        let mut vu = setup(0);
        run(&mut program(4, &[(0, clip.with_e_bit())]), &mut vu);
        assert_eq!(vu.clip_flag(), 0x11);

        let mut vu = setup(3);
        run(&mut program(4, &[(0, clip.with_e_bit())]), &mut vu);
        assert_eq!(vu.clip_flag(), 0xD1);
    }

    #[test]
    fn test_fcand_sees_committed_clip() {
        let mut vu = VuRegs::new();
        vu.vf[1] = [2.0, -3.0, 0.5, 0.0];
        let mut prog = program(
            8,
            &[
                (0, DecodedInsn::upper(UpperInsn::Clip { fs: 1, ft: 0 })),
                (32, DecodedInsn::lower(LowerInsn::Fcand { imm: 0x10 }).with_e_bit()),
            ],
        );

        run(&mut prog, &mut vu);
        assert_eq!(vu.vi[1], 1);
    }

    #[test]
    fn test_masked_moves() {
        let cases = [
            (Lanes::XY, [1.0, 2.0, 9.0, 9.0]),
            (Lanes::ZW, [9.0, 9.0, 3.0, 4.0]),
            (Lanes::from_bits(0b0101), [1.0, 9.0, 3.0, 9.0]),
            (Lanes::W, [9.0, 9.0, 9.0, 4.0]),
        ];
        for (dest, expected) in cases {
            let mut vu = VuRegs::new();
            vu.vf[1] = [1.0, 2.0, 3.0, 4.0];
            vu.vf[2] = [9.0; 4];
            let mv = DecodedInsn::lower(LowerInsn::Move { ft: 2, fs: 1, dest });
            run(&mut program(4, &[(0, mv.with_e_bit())]), &mut vu);
            assert_eq!(vu.vf[2], expected, "dest {}", dest.suffix());
        }
    }

    #[test]
    fn test_bal_links() {
        let mut vu = VuRegs::new();
        let mut prog = program(8, &[(0, branch(BranchKind::Bal, 0, 15, 0x20)), halt_at(0x20)]);

        let (reason, _) = run(&mut prog, &mut vu);
        assert_eq!(reason, ExitReason::Halted);
        assert_eq!(vu.vi[15], 2);
        assert_eq!(vu.pc, 0x30);
    }

    #[test]
    fn test_ibltz_tests_bit_15() {
        for (vi2, end_pc) in [(0x8000u32, 0x30u32), (0x7FFF, 0x20)] {
            let mut vu = VuRegs::new();
            vu.vi[2] = vi2;
            let mut prog = program(
                8,
                &[(0, branch(BranchKind::Ibltz, 2, 0, 0x20)), halt_at(16), halt_at(0x20)],
            );
            run(&mut prog, &mut vu);
            assert_eq!(vu.pc, end_pc, "vi2 = {vi2:#x}");
        }
    }

    #[test]
    fn test_jr_uses_register_target() {
        let mut vu = VuRegs::new();
        vu.vi[4] = 0x20 >> 3;
        let mut prog = program(8, &[(0, branch(BranchKind::Jr, 4, 0, 0)), halt_at(0x20)]);
        run(&mut prog, &mut vu);
        assert_eq!(vu.pc, 0x30);
    }

    #[test]
    fn test_branch_in_delay_slot_chain() {
        let mut vu = VuRegs::new();
        let mut prog = program(
            20,
            &[
                (0, branch(BranchKind::B, 0, 0, 0x40)),
                (8, branch(BranchKind::B, 0, 0, 0x80)),
                (0x40, DecodedInsn::lower(LowerInsn::Iaddi { it: 3, is: 0, imm: 7 })),
                halt_at(0x80),
            ],
        );

        let (reason, env) = run(&mut prog, &mut vu);
        assert_eq!(reason, ExitReason::Halted);
        assert_eq!(vu.vi[3], 7);
        assert_eq!(vu.pc, 0x90);
        assert_eq!(env.block_store.len(), 3);
    }
}
