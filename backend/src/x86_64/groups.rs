#![allow(non_upper_case_globals)]

//! Parameterized instruction-group encoders.
//!
//! Each group is one opcode formula: a base opcode, a direction or size
//! bit folded into it, and a sub-operation selector in the ModR/M reg
//! field. The operation is picked by an enum, the width by the operand
//! types; widths a group cannot encode are excluded by its bounds.

use crate::code_buffer::CodeBuffer;
use crate::x86_64::emitter::{emit_modrm_mem, emit_sse_rr, width_prefix, RmOperand, P_DATA16, P_EXT};
use crate::x86_64::mem::Mem;
use crate::x86_64::regs::{Gpr, OpWidth, WordWidth, Xmm};

// -- Rotate / shift: C0/C1 ib, D0/D1 (by 1), D2/D3 (by CL) --

const OPC_SHIFT_Ib: u32 = 0xC0;
const OPC_SHIFT_1: u32 = 0xD0;
const OPC_SHIFT_cl: u32 = 0xD2;

/// Rotate/shift sub-operations (/n field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Rol = 0,
    Ror = 1,
    Rcl = 2,
    Rcr = 3,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

impl ShiftOp {
    pub const ALL: [ShiftOp; 7] = [
        ShiftOp::Rol,
        ShiftOp::Ror,
        ShiftOp::Rcl,
        ShiftOp::Rcr,
        ShiftOp::Shl,
        ShiftOp::Shr,
        ShiftOp::Sar,
    ];
}

/// Low opcode bit: 0 for the byte form, 1 otherwise.
#[inline]
fn size_bit<W: OpWidth>() -> u32 {
    u32::from(W::BITS != 8)
}

/// `op dst, count`.
///
/// A count of 0 emits nothing: a zero shift leaves the operand and the
/// flags alone. A count of 1 takes the short `D0/D1` form.
pub fn emit_shift_ri<W: OpWidth, D: RmOperand<W>>(buf: &mut CodeBuffer, op: ShiftOp, dst: D, count: u8) {
    if count == 0 {
        return;
    }
    let opc = size_bit::<W>() | width_prefix::<W>();
    if count == 1 {
        dst.emit_rm(buf, OPC_SHIFT_1 | opc, op as u8);
    } else {
        dst.emit_rm(buf, OPC_SHIFT_Ib | opc, op as u8);
        buf.emit_u8(count);
    }
}

/// `op dst, cl`
pub fn emit_shift_cl<W: OpWidth, D: RmOperand<W>>(buf: &mut CodeBuffer, op: ShiftOp, dst: D) {
    let opc = OPC_SHIFT_cl | size_bit::<W>() | width_prefix::<W>();
    dst.emit_rm(buf, opc, op as u8);
}

// -- Double shift: 0F A4/A5 (SHLD), 0F AC/AD (SHRD) --

const OPC_SHxD_Ib: u32 = 0xA4 | P_EXT;
const OPC_SHxD_cl: u32 = 0xA5 | P_EXT;

/// Direction bit of the double-shift opcode (bit 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DShiftDir {
    /// SHLD: shift `dst` left, filling from the top of `src`.
    Left = 0,
    /// SHRD: shift `dst` right, filling from the bottom of `src`.
    Right = 1,
}

/// `shld/shrd dst, src, count`. A count of 0 emits nothing.
pub fn emit_dshift_ri<W: WordWidth, D: RmOperand<W>>(
    buf: &mut CodeBuffer,
    dir: DShiftDir,
    dst: D,
    src: Gpr<W>,
    count: u8,
) {
    if count == 0 {
        return;
    }
    let opc = (OPC_SHxD_Ib + ((dir as u32) << 3)) | width_prefix::<W>();
    dst.emit_rm(buf, opc, src.reg() as u8);
    buf.emit_u8(count);
}

/// `shld/shrd dst, src, cl`
pub fn emit_dshift_cl<W: WordWidth, D: RmOperand<W>>(buf: &mut CodeBuffer, dir: DShiftDir, dst: D, src: Gpr<W>) {
    let opc = (OPC_SHxD_cl + ((dir as u32) << 3)) | width_prefix::<W>();
    dst.emit_rm(buf, opc, src.reg() as u8);
}

// -- Bit test: 0F BA /n ib, 0F A3/AB/B3/BB /r --

const OPC_GRPBT: u32 = 0xBA | P_EXT;
const OPC_BT_EvGv: u32 = 0xA3 | P_EXT;

/// Bit-test sub-operations. The value is the /n field of `0F BA`; the
/// register form's opcode is `A3 + ((n - 4) << 3)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BitTestOp {
    Bt = 4,
    Bts = 5,
    Btr = 6,
    Btc = 7,
}

impl BitTestOp {
    pub const ALL: [BitTestOp; 4] = [BitTestOp::Bt, BitTestOp::Bts, BitTestOp::Btr, BitTestOp::Btc];
}

/// `op dst, imm8`; CF receives the tested bit.
pub fn emit_bittest_ri<W: WordWidth, D: RmOperand<W>>(buf: &mut CodeBuffer, op: BitTestOp, dst: D, bit: u8) {
    dst.emit_rm(buf, OPC_GRPBT | width_prefix::<W>(), op as u8);
    buf.emit_u8(bit);
}

/// `op dst, bit`
pub fn emit_bittest_rr<W: WordWidth, D: RmOperand<W>>(buf: &mut CodeBuffer, op: BitTestOp, dst: D, bit: Gpr<W>) {
    let opc = (OPC_BT_EvGv + (((op as u32) - 4) << 3)) | width_prefix::<W>();
    dst.emit_rm(buf, opc, bit.reg() as u8);
}

// -- Vector high/low half moves: 0F 12/13 (low), 0F 16/17 (high) --

const OPC_MOVLPS_load: u32 = 0x12 | P_EXT;
const OPC_MOVLPS_store: u32 = 0x13 | P_EXT;

/// Which 64-bit half of the XMM register moves. Selects opcode bit 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Half {
    Low = 0,
    High = 1,
}

/// Single (`*ps`) or double (`*pd`, 0x66 prefix) flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Single,
    Double,
}

fn precision_prefix(prec: Precision) -> u32 {
    match prec {
        Precision::Single => 0,
        Precision::Double => P_DATA16,
    }
}

/// `movlps/movhps/movlpd/movhpd dst, [src]`: load 64 bits into one half.
pub fn emit_movhl_load(buf: &mut CodeBuffer, half: Half, prec: Precision, dst: Xmm, src: &Mem) {
    let opc = (OPC_MOVLPS_load + ((half as u32) << 2)) | precision_prefix(prec);
    emit_modrm_mem(buf, opc, dst as u8, src);
}

/// `movlps/movhps/movlpd/movhpd [dst], src`: store one half.
pub fn emit_movhl_store(buf: &mut CodeBuffer, half: Half, prec: Precision, dst: &Mem, src: Xmm) {
    let opc = (OPC_MOVLPS_store + ((half as u32) << 2)) | precision_prefix(prec);
    emit_modrm_mem(buf, opc, src as u8, dst);
}

/// Register form, single precision only: `half` is the destination half.
/// `Low` is MOVHLPS (high half of `src` into the low half of `dst`),
/// `High` is MOVLHPS (low half of `src` into the high half of `dst`).
pub fn emit_movhl_rr(buf: &mut CodeBuffer, half: Half, dst: Xmm, src: Xmm) {
    emit_sse_rr(buf, OPC_MOVLPS_load + ((half as u32) << 2), dst, src);
}
