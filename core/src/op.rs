//! Per-cycle translation records.

use crate::decode::{BranchKind, LowerInsn, UpperInsn};
use crate::flags::{FlagKind, FlagSet, MicroFlagInst};
use crate::regs::{MicroVfReg, MicroViReg};

/// Same-cycle dependency between the co-issued halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hazard {
    /// The lower op reads a VF lane the upper op writes this cycle.
    LowerReadsUpperWrite,
    /// The lower op reads the flag instance the upper op writes this cycle.
    FlagReadConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MicroUpperOp {
    pub insn: UpperInsn,
    pub is_nop: bool,
    pub e_bit: bool,
    pub vf_write: MicroVfReg,
    pub vf_read: [MicroVfReg; 2],
    pub flag_writes: FlagSet,
}

impl MicroUpperOp {
    pub fn new(insn: UpperInsn, e_bit: bool) -> Self {
        Self {
            insn,
            is_nop: insn.is_nop(),
            e_bit,
            vf_write: insn.vf_write(),
            vf_read: insn.vf_reads(),
            flag_writes: insn.flag_writes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MicroLowerOp {
    pub insn: LowerInsn,
    pub is_nop: bool,
    pub vf_write: MicroVfReg,
    pub vf_read: [MicroVfReg; 2],
    pub vi_write: MicroViReg,
    pub vi_read: [MicroViReg; 2],
    pub flag_reads: FlagSet,
    pub branch: Option<BranchKind>,
    /// The upper op writes the same lanes; the lower result is discarded.
    pub no_write_vf: bool,
    /// Branch whose delay slot holds another branch.
    pub bad_branch: bool,
    /// Branch in a delay slot; its outcome goes to the delay registers.
    pub evil_branch: bool,
}

impl MicroLowerOp {
    pub fn new(insn: LowerInsn) -> Self {
        Self {
            insn,
            is_nop: insn.is_nop(),
            vf_write: insn.vf_write(),
            vf_read: insn.vf_reads(),
            vi_write: insn.vi_write(),
            vi_read: insn.vi_reads(),
            flag_reads: insn.flag_reads(),
            branch: insn.branch(),
            no_write_vf: false,
            bad_branch: false,
            evil_branch: false,
        }
    }
}

/// Everything the code generator needs to know about one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MicroOp {
    pub pc: u32,
    /// Cycles waited before issue.
    pub stall: u8,
    pub issue_cycle: u32,
    pub is_eob: bool,
    /// Sits in a branch or E-bit delay slot.
    pub is_bdelay: bool,
    pub hazard: Option<Hazard>,
    /// Run the lower op before the upper op.
    pub swap_ops: bool,
    /// Save the upper destination before the upper op runs; the lower
    /// op reads the saved copy.
    pub backup_vf: bool,
    pub do_xgkick: bool,
    pub read_q: u8,
    pub write_q: u8,
    pub read_p: u8,
    pub write_p: u8,
    pub s_flag: MicroFlagInst,
    pub m_flag: MicroFlagInst,
    pub c_flag: MicroFlagInst,
    pub upper: MicroUpperOp,
    pub lower: MicroLowerOp,
}

impl MicroOp {
    pub fn flag(&self, kind: FlagKind) -> &MicroFlagInst {
        match kind {
            FlagKind::Status => &self.s_flag,
            FlagKind::Mac => &self.m_flag,
            FlagKind::Clip => &self.c_flag,
        }
    }
}
