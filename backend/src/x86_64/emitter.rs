#![allow(non_upper_case_globals)]

//! Prefix and addressing encoders plus the plain instructions the code
//! generator needs. The parameterized instruction groups live in
//! [`groups`](super::groups).

use crate::code_buffer::CodeBuffer;
use crate::x86_64::mem::{Mem, MemStrict};
use crate::x86_64::regs::{Dword, Gpr, Gpr16, Gpr32, Gpr8, LongWidth, OpWidth, Reg, WordWidth, Xmm};

// -- Prefix flags, or'ed into an opcode word --

pub const P_EXT: u32 = 0x100; // 0x0F escape
pub const P_DATA16: u32 = 0x400; // 0x66 prefix
pub const P_REXW: u32 = 0x1000; // REX.W = 1
pub const P_REXB_R: u32 = 0x2000; // REG field as byte register
pub const P_REXB_RM: u32 = 0x4000; // R/M field as byte register
pub const P_SIMDF3: u32 = 0x20000; // 0xF3 prefix
pub const P_SIMDF2: u32 = 0x40000; // 0xF2 prefix

// -- Opcodes --

pub const OPC_ARITH_EvIb: u32 = 0x83;
pub const OPC_ARITH_EvIz: u32 = 0x81;
pub const OPC_ARITH_GvEv: u32 = 0x03;
pub const OPC_MOVL_EvGv: u32 = 0x89;
pub const OPC_MOVL_GvEv: u32 = 0x8B;
pub const OPC_MOVL_EvIz: u32 = 0xC7;
pub const OPC_MOVL_Iv: u32 = 0xB8;
pub const OPC_MOVZWL: u32 = 0xB7 | P_EXT;
pub const OPC_JMP_long: u32 = 0xE9;
pub const OPC_CMOVCC: u32 = 0x40 | P_EXT;
pub const OPC_SETCC: u32 = 0x90 | P_EXT | P_REXB_RM;
pub const OPC_TESTL: u32 = 0x85;
pub const OPC_GRP3_Ev: u32 = 0xF7;
pub const OPC_GRP5: u32 = 0xFF;
pub const OPC_PUSH_r32: u32 = 0x50;
pub const OPC_POP_r32: u32 = 0x58;
pub const OPC_RET: u32 = 0xC3;

// SSE
pub const OPC_MOVUPS_load: u32 = 0x10 | P_EXT;
pub const OPC_MOVUPS_store: u32 = 0x11 | P_EXT;
pub const OPC_MOVSS_load: u32 = 0x10 | P_EXT | P_SIMDF3;
pub const OPC_MOVSS_store: u32 = 0x11 | P_EXT | P_SIMDF3;
pub const OPC_MOVAPS: u32 = 0x28 | P_EXT;
pub const OPC_MOVMSKPS: u32 = 0x50 | P_EXT;
pub const OPC_SQRTSS: u32 = 0x51 | P_EXT | P_SIMDF3;
pub const OPC_DIVSS: u32 = 0x5E | P_EXT | P_SIMDF3;
pub const OPC_CMPPS: u32 = 0xC2 | P_EXT;
pub const OPC_SHUFPS: u32 = 0xC6 | P_EXT;

/// Arithmetic sub-opcodes (/r field of 0x81/0x83, shifted into GvEv).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Packed-single arithmetic and logic (`0F xx /r`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SseOp {
    And = 0x54,
    Xor = 0x57,
    Add = 0x58,
    Mul = 0x59,
    Sub = 0x5C,
    Min = 0x5D,
    Max = 0x5F,
}

/// CMPPS predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CmpPred {
    Eq = 0,
    Lt = 1,
    Le = 2,
    Neq = 4,
}

/// x86 condition codes for Jcc/SETcc/CMOVcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum X86Cond {
    Jo = 0x0,
    Jno = 0x1,
    Jb = 0x2,
    Jae = 0x3,
    Je = 0x4,
    Jne = 0x5,
    Jbe = 0x6,
    Ja = 0x7,
    Js = 0x8,
    Jns = 0x9,
    Jp = 0xA,
    Jnp = 0xB,
    Jl = 0xC,
    Jge = 0xD,
    Jle = 0xE,
    Jg = 0xF,
}

/// Prefix flags selecting operand width `W`.
#[inline]
pub fn width_prefix<W: OpWidth>() -> u32 {
    match W::BITS {
        8 => P_REXB_RM,
        16 => P_DATA16,
        64 => P_REXW,
        _ => 0,
    }
}

// -- Core encoding functions --

/// Emit prefixes, REX, escape and opcode byte. `r`, `index` and `rm`
/// are raw register numbers (0-15); pass 0 for unused fields.
pub fn emit_opc(buf: &mut CodeBuffer, opc: u32, r: u8, index: u8, rm: u8) {
    let mut rex: u8 = 0;
    if opc & P_REXW != 0 {
        rex |= 0x08; // REX.W
    }
    if r >= 8 {
        rex |= 0x04; // REX.R
    }
    if index >= 8 {
        rex |= 0x02; // REX.X
    }
    if rm >= 8 {
        rex |= 0x01; // REX.B
    }
    // SPL/BPL/SIL/DIL are only reachable with some REX present.
    let byte_reg = (opc & P_REXB_R != 0 && (4..8).contains(&r))
        || (opc & P_REXB_RM != 0 && (4..8).contains(&rm));
    if byte_reg && rex == 0 {
        rex = 0x40;
    }

    if opc & P_DATA16 != 0 {
        buf.emit_u8(0x66);
    }
    if opc & P_SIMDF3 != 0 {
        buf.emit_u8(0xF3);
    } else if opc & P_SIMDF2 != 0 {
        buf.emit_u8(0xF2);
    }
    if rex != 0 {
        buf.emit_u8(0x40 | rex);
    }
    if opc & P_EXT != 0 {
        buf.emit_u8(0x0F);
    }
    buf.emit_u8(opc as u8);
}

/// Opcode + register-direct ModR/M. `r` is a register or a /n extension.
pub fn emit_modrm_raw(buf: &mut CodeBuffer, opc: u32, r: u8, rm: u8) {
    emit_opc(buf, opc, r, 0, rm);
    buf.emit_u8(0xC0 | ((r & 7) << 3) | (rm & 7));
}

/// Opcode + ModR/M for register-register operation.
pub fn emit_modrm(buf: &mut CodeBuffer, opc: u32, r: Reg, rm: Reg) {
    emit_modrm_raw(buf, opc, r as u8, rm as u8);
}

/// Opcode + ModR/M with /r extension (for group opcodes).
pub fn emit_modrm_ext(buf: &mut CodeBuffer, opc: u32, ext: u8, rm: Reg) {
    emit_modrm_raw(buf, opc, ext, rm as u8);
}

fn emit_disp(buf: &mut CodeBuffer, disp: i32, short: bool) {
    if short {
        buf.emit_u8(disp as i8 as u8);
    } else {
        buf.emit_i32(disp);
    }
}

/// Opcode + ModR/M (+ SIB) (+ displacement) for a memory operand.
///
/// Picks the shortest form: no displacement when it is zero (except for
/// RBP/R13 bases, which need one), disp8 when it fits, disp32 otherwise.
/// RSP/R12 bases always take a SIB byte.
pub fn emit_modrm_mem(buf: &mut CodeBuffer, opc: u32, r: u8, mem: &Mem) {
    // A byte-register r/m flag means nothing for memory.
    let opc = opc & !P_REXB_RM;
    let r3 = (r & 7) << 3;

    match (mem.base, mem.index) {
        (None, None) => {
            emit_opc(buf, opc, r, 0, 0);
            buf.emit_u8(r3 | 0x04);
            buf.emit_u8(0x25); // SIB: no index, no base
            buf.emit_i32(mem.disp);
        }
        (None, Some(ix)) => {
            emit_opc(buf, opc, r, ix.reg() as u8, 0);
            buf.emit_u8(r3 | 0x04);
            buf.emit_u8(((ix.scale() as u8) << 6) | (ix.reg().low3() << 3) | 0x05);
            buf.emit_i32(mem.disp);
        }
        (Some(base), index) => {
            emit_opc(buf, opc, r, index.map_or(0, |ix| ix.reg() as u8), base as u8);
            let b3 = base.low3();
            let (mode, short) = if mem.disp == 0 && b3 != 5 {
                (0x00, None)
            } else if (-128..=127).contains(&mem.disp) {
                (0x40, Some(true))
            } else {
                (0x80, Some(false))
            };
            match index {
                Some(ix) => {
                    buf.emit_u8(mode | r3 | 0x04);
                    buf.emit_u8(((ix.scale() as u8) << 6) | (ix.reg().low3() << 3) | b3);
                }
                None if b3 == 4 => {
                    buf.emit_u8(mode | r3 | 0x04);
                    buf.emit_u8(0x24); // SIB: no index, base = RSP/R12
                }
                None => buf.emit_u8(mode | r3 | b3),
            }
            if let Some(short) = short {
                emit_disp(buf, mem.disp, short);
            }
        }
    }
}

/// A register-or-memory (`r/m`) operand of width `W`.
pub trait RmOperand<W: OpWidth>: Copy {
    /// Emit `opc` with this operand in the r/m field and `r` in the reg field.
    fn emit_rm(self, buf: &mut CodeBuffer, opc: u32, r: u8);
}

impl<W: OpWidth> RmOperand<W> for Gpr<W> {
    fn emit_rm(self, buf: &mut CodeBuffer, opc: u32, r: u8) {
        emit_modrm_raw(buf, opc, r, self.reg() as u8);
    }
}

impl<W: OpWidth> RmOperand<W> for MemStrict<W> {
    fn emit_rm(self, buf: &mut CodeBuffer, opc: u32, r: u8) {
        emit_modrm_mem(buf, opc, r, self.mem());
    }
}

// -- Arithmetic --

/// `op dst, src`
pub fn emit_arith_rr<W: WordWidth>(buf: &mut CodeBuffer, op: ArithOp, dst: Gpr<W>, src: Gpr<W>) {
    let opc = (OPC_ARITH_GvEv + ((op as u32) << 3)) | width_prefix::<W>();
    emit_modrm(buf, opc, dst.reg(), src.reg());
}

/// `op dst, [mem]`
pub fn emit_arith_load<W: WordWidth>(buf: &mut CodeBuffer, op: ArithOp, dst: Gpr<W>, src: &Mem) {
    let opc = (OPC_ARITH_GvEv + ((op as u32) << 3)) | width_prefix::<W>();
    emit_modrm_mem(buf, opc, dst.reg() as u8, src);
}

/// `op r/m, imm` (imm8 form when it fits).
pub fn emit_arith_ri<W: LongWidth, D: RmOperand<W>>(buf: &mut CodeBuffer, op: ArithOp, dst: D, imm: i32) {
    let w = width_prefix::<W>();
    if (-128..=127).contains(&imm) {
        dst.emit_rm(buf, OPC_ARITH_EvIb | w, op as u8);
        buf.emit_u8(imm as i8 as u8);
    } else {
        dst.emit_rm(buf, OPC_ARITH_EvIz | w, op as u8);
        buf.emit_i32(imm);
    }
}

/// `test a, b`
pub fn emit_test_rr<W: WordWidth>(buf: &mut CodeBuffer, a: Gpr<W>, b: Gpr<W>) {
    emit_modrm(buf, OPC_TESTL | width_prefix::<W>(), b.reg(), a.reg());
}

/// `test r/m, imm32`
pub fn emit_test_ri<W: LongWidth, D: RmOperand<W>>(buf: &mut CodeBuffer, dst: D, imm: i32) {
    dst.emit_rm(buf, OPC_GRP3_Ev | width_prefix::<W>(), 0);
    buf.emit_i32(imm);
}

// -- Data movement --

pub fn emit_mov_rr<W: WordWidth>(buf: &mut CodeBuffer, dst: Gpr<W>, src: Gpr<W>) {
    emit_modrm(buf, OPC_MOVL_EvGv | width_prefix::<W>(), src.reg(), dst.reg());
}

/// `mov dst, imm32`; zero becomes `xor dst, dst`, which clobbers flags.
pub fn emit_mov_ri(buf: &mut CodeBuffer, dst: Gpr32, imm: u32) {
    if imm == 0 {
        emit_arith_rr(buf, ArithOp::Xor, dst, dst);
    } else {
        emit_mov_ri_keep_flags(buf, dst, imm);
    }
}

/// `mov dst, imm32` without the `xor` shortcut.
pub fn emit_mov_ri_keep_flags(buf: &mut CodeBuffer, dst: Gpr32, imm: u32) {
    let reg = dst.reg();
    emit_opc(buf, OPC_MOVL_Iv + u32::from(reg.low3()), 0, 0, reg as u8);
    buf.emit_u32(imm);
}

/// `mov dst, [mem]`
pub fn emit_load<W: WordWidth>(buf: &mut CodeBuffer, dst: Gpr<W>, src: &Mem) {
    emit_modrm_mem(buf, OPC_MOVL_GvEv | width_prefix::<W>(), dst.reg() as u8, src);
}

/// `mov [mem], src`
pub fn emit_store<W: WordWidth>(buf: &mut CodeBuffer, dst: &Mem, src: Gpr<W>) {
    emit_modrm_mem(buf, OPC_MOVL_EvGv | width_prefix::<W>(), src.reg() as u8, dst);
}

/// `mov r/m, imm32` (sign-extended for 64-bit).
pub fn emit_store_imm<W: LongWidth, D: RmOperand<W>>(buf: &mut CodeBuffer, dst: D, imm: i32) {
    dst.emit_rm(buf, OPC_MOVL_EvIz | width_prefix::<W>(), 0);
    buf.emit_i32(imm);
}

/// `movzx dst, src` (16 to 32 bits).
pub fn emit_movzx_word(buf: &mut CodeBuffer, dst: Gpr32, src: Gpr16) {
    emit_modrm(buf, OPC_MOVZWL, dst.reg(), src.reg());
}

// -- Conditions and control flow --

pub fn emit_setcc(buf: &mut CodeBuffer, cond: X86Cond, dst: Gpr8) {
    emit_modrm_ext(buf, OPC_SETCC + (cond as u32), 0, dst.reg());
}

pub fn emit_cmovcc<W: WordWidth>(buf: &mut CodeBuffer, cond: X86Cond, dst: Gpr<W>, src: Gpr<W>) {
    emit_modrm(
        buf,
        (OPC_CMOVCC + (cond as u32)) | width_prefix::<W>(),
        dst.reg(),
        src.reg(),
    );
}

/// JMP rel32 to an absolute buffer offset.
pub fn emit_jmp(buf: &mut CodeBuffer, target_offset: usize) {
    buf.emit_u8(OPC_JMP_long as u8);
    let after = buf.offset() + 4;
    let disp = target_offset as i64 - after as i64;
    buf.emit_i32(disp as i32);
}

/// Indirect JMP through register.
pub fn emit_jmp_reg(buf: &mut CodeBuffer, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP5, 4, reg);
}

pub fn emit_push(buf: &mut CodeBuffer, reg: Reg) {
    emit_opc(buf, OPC_PUSH_r32 + u32::from(reg.low3()), 0, 0, reg as u8);
}

pub fn emit_pop(buf: &mut CodeBuffer, reg: Reg) {
    emit_opc(buf, OPC_POP_r32 + u32::from(reg.low3()), 0, 0, reg as u8);
}

pub fn emit_ret(buf: &mut CodeBuffer) {
    buf.emit_u8(OPC_RET as u8);
}

// -- SSE --

/// `op dst, src` on two XMM registers.
pub fn emit_sse_rr(buf: &mut CodeBuffer, opc: u32, dst: Xmm, src: Xmm) {
    emit_modrm_raw(buf, opc, dst as u8, src as u8);
}

/// XMM in the reg field, memory in r/m.
pub fn emit_sse_mem(buf: &mut CodeBuffer, opc: u32, reg: Xmm, mem: &Mem) {
    emit_modrm_mem(buf, opc, reg as u8, mem);
}

pub fn emit_movups_load(buf: &mut CodeBuffer, dst: Xmm, src: &Mem) {
    emit_sse_mem(buf, OPC_MOVUPS_load, dst, src);
}

pub fn emit_movups_store(buf: &mut CodeBuffer, dst: &Mem, src: Xmm) {
    emit_sse_mem(buf, OPC_MOVUPS_store, src, dst);
}

/// `movss dst, [mem]`: loads lane 0, zeroes the rest.
pub fn emit_movss_load(buf: &mut CodeBuffer, dst: Xmm, src: &Mem) {
    emit_sse_mem(buf, OPC_MOVSS_load, dst, src);
}

pub fn emit_movss_store(buf: &mut CodeBuffer, dst: &Mem, src: Xmm) {
    emit_sse_mem(buf, OPC_MOVSS_store, src, dst);
}

pub fn emit_movaps_rr(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_sse_rr(buf, OPC_MOVAPS, dst, src);
}

pub fn emit_sse_op(buf: &mut CodeBuffer, op: SseOp, dst: Xmm, src: Xmm) {
    emit_sse_rr(buf, u32::from(op as u8) | P_EXT, dst, src);
}

pub fn emit_sse_op_mem(buf: &mut CodeBuffer, op: SseOp, dst: Xmm, src: &Mem) {
    emit_sse_mem(buf, u32::from(op as u8) | P_EXT, dst, src);
}

pub fn emit_divss(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_sse_rr(buf, OPC_DIVSS, dst, src);
}

pub fn emit_sqrtss(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_sse_rr(buf, OPC_SQRTSS, dst, src);
}

/// `cmpps dst, src, pred`: per-lane all-ones where `dst pred src`.
pub fn emit_cmpps(buf: &mut CodeBuffer, dst: Xmm, src: Xmm, pred: CmpPred) {
    emit_sse_rr(buf, OPC_CMPPS, dst, src);
    buf.emit_u8(pred as u8);
}

pub fn emit_shufps(buf: &mut CodeBuffer, dst: Xmm, src: Xmm, imm: u8) {
    emit_sse_rr(buf, OPC_SHUFPS, dst, src);
    buf.emit_u8(imm);
}

/// `movmskps dst, src`: lane sign bits into bits 0-3.
pub fn emit_movmskps(buf: &mut CodeBuffer, dst: Gpr32, src: Xmm) {
    emit_modrm_raw(buf, OPC_MOVMSKPS, dst.reg() as u8, src as u8);
}

/// `xor dst, dst`; clobbers flags.
pub fn emit_zero(buf: &mut CodeBuffer, dst: Gpr<Dword>) {
    emit_arith_rr(buf, ArithOp::Xor, dst, dst);
}
