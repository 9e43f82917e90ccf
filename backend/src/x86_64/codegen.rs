use vu_core::block::EXIT_HALT;
use vu_core::decode::{BranchKind, FmacKind, FmacSrc, IntOp, LowerInsn, UpperInsn};
use vu_core::ir::{BlockEnd, MicroIr};
use vu_core::op::MicroOp;
use vu_core::regs::Lanes;
use vu_core::vu::{
    clip_offset, mac_offset, p_offset, q_offset, status_offset, vf_lane_offset, vf_offset,
    vi_offset, ABS_MASK_OFFSET, BRANCH_COND_OFFSET, BRANCH_TARGET_OFFSET, CLIP_HISTORY_MASK,
    CYCLES_OFFSET, DELAY_COND_OFFSET, DELAY_TARGET_OFFSET, FLAG_INSTANCES_OFFSET,
    MAC_SIGN_SHIFT, PC_OFFSET, SCRATCH_OFFSET, STATUS_STICKY, VF_BACKUP_OFFSET,
    XGKICK_ADDR_OFFSET, XGKICK_COUNT_OFFSET,
};

use crate::code_buffer::CodeBuffer;
use crate::x86_64::emitter::*;
use crate::x86_64::groups::{
    emit_bittest_ri, emit_dshift_ri, emit_movhl_store, emit_shift_ri, BitTestOp, DShiftDir,
    Half, Precision, ShiftOp,
};
use crate::x86_64::mem::{dword_ptr, qword_ptr, Mem};
use crate::x86_64::regs::{
    Gpr64, Xmm, AX, CALLEE_SAVED, CALL_ARG_REGS, CL, DL, EAX, ECX, EDX, RBP, RSP, STACK_ADDEND,
    VU_ENV,
};
use crate::HostCodeGen;

/// x86-64 host code generator for micro blocks.
///
/// Guest state never lives in host registers across cycles: every op
/// loads its operands from `VuRegs` through RBP and stores its results
/// back, using RAX/RCX/RDX and XMM0-XMM3 as scratch.
#[derive(Debug, Default)]
pub struct X86_64CodeGen {
    pub prologue_offset: usize,
    /// Epilogue entry that zeroes EAX first.
    pub epilogue_return_zero_offset: usize,
    /// Epilogue entry that keeps EAX.
    pub tb_ret_offset: usize,
    pub code_gen_start: usize,
}

impl X86_64CodeGen {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `[rbp + disp]`
#[inline]
fn env(disp: i32) -> Mem {
    Mem::at(VU_ENV, disp)
}

fn fmac_op(kind: FmacKind) -> SseOp {
    match kind {
        FmacKind::Add => SseOp::Add,
        FmacKind::Sub => SseOp::Sub,
        FmacKind::Mul => SseOp::Mul,
        FmacKind::Max => SseOp::Max,
        FmacKind::Mini => SseOp::Min,
    }
}

fn int_op(op: IntOp) -> ArithOp {
    match op {
        IntOp::Add => ArithOp::Add,
        IntOp::Sub => ArithOp::Sub,
        IntOp::And => ArithOp::And,
        IntOp::Or => ArithOp::Or,
    }
}

/// Where the lower op reads VF `reg` from. Under `backup_vf` the upper
/// op has already overwritten its destination, so the lower op reads
/// the copy taken before it ran.
fn lower_vf(op: &MicroOp, reg: u8) -> Mem {
    if op.backup_vf && reg == op.upper.vf_write.reg {
        env(VF_BACKUP_OFFSET)
    } else {
        env(vf_offset(reg))
    }
}

/// Store the `dest` lanes of `src` into VF `reg`. VF0 is read-only.
fn emit_masked_store(buf: &mut CodeBuffer, reg: u8, dest: Lanes, src: Xmm) {
    if reg == 0 || dest.is_empty() {
        return;
    }
    let base = vf_offset(reg);
    if dest == Lanes::XYZW {
        emit_movups_store(buf, &env(base), src);
    } else if dest == Lanes::XY {
        emit_movhl_store(buf, Half::Low, Precision::Single, &env(base), src);
    } else if dest == Lanes::ZW {
        emit_movhl_store(buf, Half::High, Precision::Single, &env(base + 8), src);
    } else {
        emit_movups_store(buf, &env(SCRATCH_OFFSET), src);
        for lane in dest.iter() {
            emit_load(buf, EAX, &env(SCRATCH_OFFSET + lane as i32 * 4));
            emit_store(buf, &env(vf_lane_offset(reg, lane)), EAX);
        }
    }
}

/// Status and mac flags from the result in XMM0, restricted to `dest`.
///
/// mac = zero lanes | sign lanes << 4. status = Z | S << 1, with the
/// same two bits copied into the sticky bits and or'ed with the sticky
/// bits of the previous instance.
fn emit_fmac_flags(buf: &mut CodeBuffer, op: &MicroOp, dest: Lanes) {
    let mask = i32::from(dest.bits());

    emit_sse_op(buf, SseOp::Xor, Xmm::Xmm2, Xmm::Xmm2);
    emit_cmpps(buf, Xmm::Xmm2, Xmm::Xmm0, CmpPred::Eq);
    emit_movmskps(buf, EAX, Xmm::Xmm2);
    emit_movmskps(buf, ECX, Xmm::Xmm0);
    emit_arith_ri(buf, ArithOp::And, EAX, mask);
    emit_arith_ri(buf, ArithOp::And, ECX, mask);

    emit_mov_rr(buf, EDX, ECX);
    emit_shift_ri(buf, ShiftOp::Shl, EDX, MAC_SIGN_SHIFT as u8);
    emit_arith_rr(buf, ArithOp::Or, EDX, EAX);
    emit_store(buf, &env(mac_offset(op.m_flag.write)), EDX);

    emit_zero(buf, EDX);
    emit_test_rr(buf, EAX, EAX);
    emit_setcc(buf, X86Cond::Jne, DL);
    emit_test_rr(buf, ECX, ECX);
    emit_setcc(buf, X86Cond::Jne, CL);
    emit_shift_ri(buf, ShiftOp::Shl, ECX, 1);
    emit_arith_rr(buf, ArithOp::Or, EDX, ECX);

    emit_mov_rr(buf, EAX, EDX);
    emit_shift_ri(buf, ShiftOp::Shl, EAX, 6);
    emit_arith_rr(buf, ArithOp::Or, EDX, EAX);
    emit_load(buf, EAX, &env(status_offset(op.s_flag.prev_write())));
    emit_arith_ri(buf, ArithOp::And, EAX, STATUS_STICKY as i32);
    emit_arith_rr(buf, ArithOp::Or, EDX, EAX);
    emit_store(buf, &env(status_offset(op.s_flag.write)), EDX);
}

/// Judge `fs.xyz` against `|ft.w|`.
///
/// The six new bits are `+x +y +z` (bits 0-2) and `-x -y -z` (bits
/// 3-5); they shift in below the previous instance's history.
fn emit_clip(buf: &mut CodeBuffer, op: &MicroOp, fs: u8, ft: u8) {
    emit_movups_load(buf, Xmm::Xmm0, &env(vf_offset(fs)));
    emit_movss_load(buf, Xmm::Xmm1, &env(vf_lane_offset(ft, 3)));
    emit_movups_load(buf, Xmm::Xmm2, &env(ABS_MASK_OFFSET));
    emit_sse_op(buf, SseOp::And, Xmm::Xmm1, Xmm::Xmm2);
    emit_shufps(buf, Xmm::Xmm1, Xmm::Xmm1, 0);

    emit_movaps_rr(buf, Xmm::Xmm2, Xmm::Xmm1);
    emit_cmpps(buf, Xmm::Xmm2, Xmm::Xmm0, CmpPred::Lt);
    emit_movmskps(buf, EAX, Xmm::Xmm2);

    emit_sse_op(buf, SseOp::Xor, Xmm::Xmm3, Xmm::Xmm3);
    emit_sse_op(buf, SseOp::Sub, Xmm::Xmm3, Xmm::Xmm1);
    emit_cmpps(buf, Xmm::Xmm0, Xmm::Xmm3, CmpPred::Lt);
    emit_movmskps(buf, ECX, Xmm::Xmm0);

    emit_arith_ri(buf, ArithOp::And, EAX, 7);
    emit_arith_ri(buf, ArithOp::And, ECX, 7);
    emit_shift_ri(buf, ShiftOp::Shl, ECX, 3);
    emit_arith_rr(buf, ArithOp::Or, EAX, ECX);

    emit_load(buf, EDX, &env(clip_offset(op.c_flag.prev_write())));
    emit_shift_ri(buf, ShiftOp::Shl, EAX, 26);
    emit_dshift_ri(buf, DShiftDir::Left, EDX, EAX, 6);
    emit_arith_ri(buf, ArithOp::And, EDX, CLIP_HISTORY_MASK as i32);
    emit_store(buf, &env(clip_offset(op.c_flag.write)), EDX);
}

fn emit_upper(buf: &mut CodeBuffer, op: &MicroOp) {
    match op.upper.insn {
        UpperInsn::Nop => {}
        UpperInsn::Fmac {
            kind,
            fd,
            fs,
            ft,
            dest,
        } => {
            emit_movups_load(buf, Xmm::Xmm0, &env(vf_offset(fs)));
            match ft {
                FmacSrc::Vf(ft) => emit_movups_load(buf, Xmm::Xmm1, &env(vf_offset(ft))),
                FmacSrc::Q => {
                    emit_movss_load(buf, Xmm::Xmm1, &env(q_offset(op.read_q)));
                    emit_shufps(buf, Xmm::Xmm1, Xmm::Xmm1, 0);
                }
            }
            emit_sse_op(buf, fmac_op(kind), Xmm::Xmm0, Xmm::Xmm1);
            if op.s_flag.do_flag {
                emit_fmac_flags(buf, op, dest);
            }
            emit_masked_store(buf, fd, dest, Xmm::Xmm0);
        }
        UpperInsn::Abs { ft, fs, dest } => {
            emit_movups_load(buf, Xmm::Xmm0, &env(vf_offset(fs)));
            emit_movups_load(buf, Xmm::Xmm1, &env(ABS_MASK_OFFSET));
            emit_sse_op(buf, SseOp::And, Xmm::Xmm0, Xmm::Xmm1);
            emit_masked_store(buf, ft, dest, Xmm::Xmm0);
        }
        UpperInsn::Clip { fs, ft } => emit_clip(buf, op, fs, ft),
    }
}

/// `vi[dst] = eax & 0xffff`, unless `dst` is VI0.
fn emit_vi_writeback(buf: &mut CodeBuffer, dst: u8) {
    emit_movzx_word(buf, EAX, AX);
    emit_store(buf, &env(vi_offset(dst)), EAX);
}

fn emit_lower(buf: &mut CodeBuffer, op: &MicroOp) {
    let lower = &op.lower;
    match lower.insn {
        LowerInsn::Nop | LowerInsn::WaitQ | LowerInsn::WaitP => {}
        LowerInsn::Move { ft, fs, dest } => {
            if lower.no_write_vf {
                return;
            }
            emit_movups_load(buf, Xmm::Xmm0, &lower_vf(op, fs));
            emit_masked_store(buf, ft, dest, Xmm::Xmm0);
        }
        LowerInsn::Mfp { ft, dest } => {
            if lower.no_write_vf {
                return;
            }
            emit_movss_load(buf, Xmm::Xmm0, &env(p_offset(op.read_p)));
            emit_shufps(buf, Xmm::Xmm0, Xmm::Xmm0, 0);
            emit_masked_store(buf, ft, dest, Xmm::Xmm0);
        }
        LowerInsn::IntAlu { op: alu, id, is, it } => {
            if id == 0 {
                return;
            }
            emit_load(buf, EAX, &env(vi_offset(is)));
            emit_arith_load(buf, int_op(alu), EAX, &env(vi_offset(it)));
            emit_vi_writeback(buf, id);
        }
        LowerInsn::Iaddi { it, is, imm } => {
            if it == 0 {
                return;
            }
            emit_load(buf, EAX, &env(vi_offset(is)));
            emit_arith_ri(buf, ArithOp::Add, EAX, i32::from(imm));
            emit_vi_writeback(buf, it);
        }
        LowerInsn::Div { fs, fsf, ft, ftf } => {
            let num = lower_vf(op, fs).offset(i32::from(fsf & 3) * 4);
            let den = lower_vf(op, ft).offset(i32::from(ftf & 3) * 4);
            emit_movss_load(buf, Xmm::Xmm0, &num);
            emit_movss_load(buf, Xmm::Xmm1, &den);
            emit_divss(buf, Xmm::Xmm0, Xmm::Xmm1);
            emit_movss_store(buf, &env(q_offset(op.write_q)), Xmm::Xmm0);
        }
        LowerInsn::Sqrt { ft, ftf } => {
            let src = lower_vf(op, ft).offset(i32::from(ftf & 3) * 4);
            emit_movss_load(buf, Xmm::Xmm0, &src);
            emit_sqrtss(buf, Xmm::Xmm0, Xmm::Xmm0);
            emit_movss_store(buf, &env(q_offset(op.write_q)), Xmm::Xmm0);
        }
        LowerInsn::Esqrt { fs, fsf } => {
            let src = lower_vf(op, fs).offset(i32::from(fsf & 3) * 4);
            emit_movss_load(buf, Xmm::Xmm0, &src);
            emit_sqrtss(buf, Xmm::Xmm0, Xmm::Xmm0);
            emit_movss_store(buf, &env(p_offset(op.write_p)), Xmm::Xmm0);
        }
        LowerInsn::Fsand { it, imm } => {
            if it == 0 {
                return;
            }
            emit_load(buf, EAX, &env(status_offset(op.s_flag.read)));
            emit_arith_ri(buf, ArithOp::And, EAX, i32::from(imm));
            emit_vi_writeback(buf, it);
        }
        LowerInsn::Fmand { it, is } => {
            if it == 0 {
                return;
            }
            emit_load(buf, EAX, &env(mac_offset(op.m_flag.read)));
            emit_arith_load(buf, ArithOp::And, EAX, &env(vi_offset(is)));
            emit_vi_writeback(buf, it);
        }
        LowerInsn::Fcand { imm } => {
            emit_zero(buf, ECX);
            emit_load(buf, EAX, &env(clip_offset(op.c_flag.read)));
            emit_test_ri(buf, EAX, (imm & CLIP_HISTORY_MASK) as i32);
            emit_setcc(buf, X86Cond::Jne, CL);
            emit_store(buf, &env(vi_offset(1)), ECX);
        }
        LowerInsn::Xgkick { is } => {
            emit_load(buf, EAX, &env(vi_offset(is)));
            emit_shift_ri(buf, ShiftOp::Shl, EAX, 4);
            emit_store(buf, &env(XGKICK_ADDR_OFFSET), EAX);
            emit_arith_ri(buf, ArithOp::Add, dword_ptr(env(XGKICK_COUNT_OFFSET)), 1);
        }
        LowerInsn::Branch {
            kind,
            is,
            it,
            target,
        } => emit_branch(buf, op, kind, is, it, target),
    }
}

/// Evaluate a branch into its condition/target slots. The pc is only
/// updated at block end, after the delay slot has run.
fn emit_branch(buf: &mut CodeBuffer, op: &MicroOp, kind: BranchKind, is: u8, it: u8, target: u32) {
    // A branch in a delay slot resolves in the next block.
    let (cond_at, target_at) = if op.lower.evil_branch {
        (DELAY_COND_OFFSET, DELAY_TARGET_OFFSET)
    } else {
        (BRANCH_COND_OFFSET, BRANCH_TARGET_OFFSET)
    };

    match kind {
        BranchKind::B | BranchKind::Bal => {
            emit_store_imm(buf, dword_ptr(env(cond_at)), 1);
            emit_store_imm(buf, dword_ptr(env(target_at)), target as i32);
        }
        BranchKind::Jr | BranchKind::Jalr => {
            emit_load(buf, EAX, &env(vi_offset(is)));
            emit_shift_ri(buf, ShiftOp::Shl, EAX, 3);
            emit_store(buf, &env(target_at), EAX);
            emit_store_imm(buf, dword_ptr(env(cond_at)), 1);
        }
        _ => {
            emit_zero(buf, ECX);
            emit_load(buf, EAX, &env(vi_offset(is)));
            let cond = match kind {
                BranchKind::Ibeq | BranchKind::Ibne => {
                    emit_arith_load(buf, ArithOp::Cmp, EAX, &env(vi_offset(it)));
                    if kind == BranchKind::Ibeq {
                        X86Cond::Je
                    } else {
                        X86Cond::Jne
                    }
                }
                BranchKind::Ibltz | BranchKind::Ibgez => {
                    emit_bittest_ri(buf, BitTestOp::Bt, EAX, 15);
                    if kind == BranchKind::Ibltz {
                        X86Cond::Jb
                    } else {
                        X86Cond::Jae
                    }
                }
                _ => {
                    // Sign-extend the 16-bit value into the flags.
                    emit_shift_ri(buf, ShiftOp::Shl, EAX, 16);
                    emit_test_rr(buf, EAX, EAX);
                    if kind == BranchKind::Ibgtz {
                        X86Cond::Jg
                    } else {
                        X86Cond::Jle
                    }
                }
            };
            emit_setcc(buf, cond, CL);
            emit_store(buf, &env(cond_at), ECX);
            emit_store_imm(buf, dword_ptr(env(target_at)), target as i32);
        }
    }

    if kind.links() && it != 0 {
        let link = (op.pc.wrapping_add(16) >> 3) & 0xFFFF;
        emit_store_imm(buf, dword_ptr(env(vi_offset(it))), link as i32);
    }
}

/// `pc = [cond] ? ecx : fallthrough`
fn emit_select_pc(buf: &mut CodeBuffer, cond_at: i32, fallthrough: u32) {
    emit_mov_ri(buf, EAX, fallthrough);
    emit_arith_ri(buf, ArithOp::Cmp, dword_ptr(env(cond_at)), 0);
    emit_cmovcc(buf, X86Cond::Jne, EAX, ECX);
    emit_store(buf, &env(PC_OFFSET), EAX);
}

impl HostCodeGen for X86_64CodeGen {
    fn emit_prologue(&mut self, buf: &mut CodeBuffer) {
        self.prologue_offset = buf.offset();
        for &reg in CALLEE_SAVED {
            emit_push(buf, reg);
        }
        // mov rbp, rdi (VuRegs)
        emit_mov_rr(buf, RBP, Gpr64::new(CALL_ARG_REGS[0]));
        // sub rsp, STACK_ADDEND
        emit_arith_ri(buf, ArithOp::Sub, RSP, STACK_ADDEND as i32);
        // jmp *rsi (block code pointer)
        emit_jmp_reg(buf, CALL_ARG_REGS[1]);
        self.code_gen_start = buf.offset();
    }

    fn emit_epilogue(&mut self, buf: &mut CodeBuffer) {
        self.epilogue_return_zero_offset = buf.offset();
        emit_zero(buf, EAX);
        self.tb_ret_offset = buf.offset();
        emit_arith_ri(buf, ArithOp::Add, RSP, STACK_ADDEND as i32);
        for &reg in CALLEE_SAVED.iter().rev() {
            emit_pop(buf, reg);
        }
        emit_ret(buf);
    }

    fn epilogue_offset(&self) -> usize {
        self.tb_ret_offset
    }

    fn emit_micro_op(&self, buf: &mut CodeBuffer, op: &MicroOp) {
        if op.backup_vf {
            emit_movups_load(buf, Xmm::Xmm0, &env(vf_offset(op.upper.vf_write.reg)));
            emit_movups_store(buf, &env(VF_BACKUP_OFFSET), Xmm::Xmm0);
        }
        if op.swap_ops {
            emit_lower(buf, op);
            emit_upper(buf, op);
        } else {
            emit_upper(buf, op);
            emit_lower(buf, op);
        }
    }

    fn emit_block_end(&self, buf: &mut CodeBuffer, ir: &MicroIr) {
        let exit = ir.exit_state();
        emit_store_imm(buf, dword_ptr(env(FLAG_INSTANCES_OFFSET)), i32::from(exit.flags));

        // Leave instance 0 current for the next block.
        if ir.q_instance() == 1 {
            emit_shift_ri(buf, ShiftOp::Rol, qword_ptr(env(q_offset(0))), 32);
        }
        if ir.p_instance() == 1 {
            emit_shift_ri(buf, ShiftOp::Rol, qword_ptr(env(p_offset(0))), 32);
        }

        emit_arith_ri(buf, ArithOp::Add, qword_ptr(env(CYCLES_OFFSET)), ir.cycles as i32);

        let end = ir.end.unwrap_or(BlockEnd::FallThrough {
            next_pc: ir.cur_pc,
        });
        match end {
            BlockEnd::FallThrough { next_pc } | BlockEnd::Halt { next_pc } => {
                emit_store_imm(buf, dword_ptr(env(PC_OFFSET)), next_pc as i32);
            }
            BlockEnd::Branch {
                kind,
                target,
                fallthrough,
            } => {
                if kind.is_indirect() {
                    emit_load(buf, EAX, &env(BRANCH_TARGET_OFFSET));
                    emit_store(buf, &env(PC_OFFSET), EAX);
                } else if kind.is_conditional() {
                    emit_mov_ri(buf, ECX, target);
                    emit_select_pc(buf, BRANCH_COND_OFFSET, fallthrough);
                } else {
                    emit_store_imm(buf, dword_ptr(env(PC_OFFSET)), target as i32);
                }
            }
            BlockEnd::DelayedBranch { fallthrough } => {
                emit_load(buf, ECX, &env(DELAY_TARGET_OFFSET));
                emit_select_pc(buf, DELAY_COND_OFFSET, fallthrough);
            }
        }

        if matches!(end, BlockEnd::Halt { .. }) {
            emit_mov_ri(buf, EAX, EXIT_HALT);
            emit_jmp(buf, self.tb_ret_offset);
        } else {
            emit_jmp(buf, self.epilogue_return_zero_offset);
        }
    }
}
