//! Guest instruction descriptors and the decoder interface.
//!
//! The JIT never parses raw guest opcodes. A [`Decoder`] hands it one
//! structured [`DecodedInsn`] per instruction pair, and the descriptor
//! methods here answer which lanes, registers, flags and queues each
//! half reads or writes.

use thiserror::Error;

use crate::flags::FlagSet;
use crate::regs::{Lanes, MicroVfReg, MicroViReg, NUM_VF, NUM_VI};
use crate::vu::INSN_BYTES;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid opcode {raw:#018x} at pc {pc:#06x}")]
    InvalidOpcode { pc: u32, raw: u64 },
    #[error("pc {pc:#06x} is outside micro memory")]
    OutOfRange { pc: u32 },
    #[error("unsupported sequence at pc {pc:#06x}: {reason}")]
    UnsupportedSequence { pc: u32, reason: &'static str },
    #[error("invalid operand at pc {pc:#06x}: {reason}")]
    InvalidOperand { pc: u32, reason: &'static str },
}

/// Source of decoded instruction pairs.
pub trait Decoder {
    fn decode(&mut self, pc: u32) -> Result<DecodedInsn, DecodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmacKind {
    Add,
    Sub,
    Mul,
    Max,
    Mini,
}

impl FmacKind {
    pub fn sets_flags(self) -> bool {
        matches!(self, FmacKind::Add | FmacKind::Sub | FmacKind::Mul)
    }

    pub fn name(self) -> &'static str {
        match self {
            FmacKind::Add => "add",
            FmacKind::Sub => "sub",
            FmacKind::Mul => "mul",
            FmacKind::Max => "max",
            FmacKind::Mini => "mini",
        }
    }
}

/// Second FMAC operand: a VF register or the broadcast Q value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmacSrc {
    Vf(u8),
    Q,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpperInsn {
    #[default]
    Nop,
    Fmac {
        kind: FmacKind,
        fd: u8,
        fs: u8,
        ft: FmacSrc,
        dest: Lanes,
    },
    Abs {
        ft: u8,
        fs: u8,
        dest: Lanes,
    },
    /// Judge `fs.xyz` against `|ft.w|`.
    Clip {
        fs: u8,
        ft: u8,
    },
}

impl UpperInsn {
    pub fn is_nop(&self) -> bool {
        matches!(self, UpperInsn::Nop)
    }

    pub fn vf_write(&self) -> MicroVfReg {
        match *self {
            UpperInsn::Fmac { fd, dest, .. } => MicroVfReg::new(fd, dest),
            UpperInsn::Abs { ft, dest, .. } => MicroVfReg::new(ft, dest),
            UpperInsn::Nop | UpperInsn::Clip { .. } => MicroVfReg::NONE,
        }
    }

    pub fn vf_reads(&self) -> [MicroVfReg; 2] {
        match *self {
            UpperInsn::Fmac { fs, ft, dest, .. } => {
                let second = match ft {
                    FmacSrc::Vf(r) => MicroVfReg::new(r, dest),
                    FmacSrc::Q => MicroVfReg::NONE,
                };
                [MicroVfReg::new(fs, dest), second]
            }
            UpperInsn::Abs { fs, dest, .. } => [MicroVfReg::new(fs, dest), MicroVfReg::NONE],
            UpperInsn::Clip { fs, ft } => [MicroVfReg::new(fs, Lanes::XYZ), MicroVfReg::new(ft, Lanes::W)],
            UpperInsn::Nop => [MicroVfReg::NONE; 2],
        }
    }

    pub fn reads_q(&self) -> bool {
        matches!(self, UpperInsn::Fmac { ft: FmacSrc::Q, .. })
    }

    pub fn flag_writes(&self) -> FlagSet {
        match *self {
            UpperInsn::Fmac { kind, .. } if kind.sets_flags() => FlagSet::STATUS_MAC,
            UpperInsn::Clip { .. } => FlagSet::CLIP,
            _ => FlagSet::EMPTY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOp {
    Add,
    Sub,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    B,
    Bal,
    Ibeq,
    Ibne,
    Ibltz,
    Ibgtz,
    Iblez,
    Ibgez,
    Jr,
    Jalr,
}

impl BranchKind {
    pub fn is_conditional(self) -> bool {
        !matches!(
            self,
            BranchKind::B | BranchKind::Bal | BranchKind::Jr | BranchKind::Jalr
        )
    }

    /// Target comes from a register rather than the instruction.
    pub fn is_indirect(self) -> bool {
        matches!(self, BranchKind::Jr | BranchKind::Jalr)
    }

    /// Writes the return address into `it`.
    pub fn links(self) -> bool {
        matches!(self, BranchKind::Bal | BranchKind::Jalr)
    }

    pub fn name(self) -> &'static str {
        match self {
            BranchKind::B => "b",
            BranchKind::Bal => "bal",
            BranchKind::Ibeq => "ibeq",
            BranchKind::Ibne => "ibne",
            BranchKind::Ibltz => "ibltz",
            BranchKind::Ibgtz => "ibgtz",
            BranchKind::Iblez => "iblez",
            BranchKind::Ibgez => "ibgez",
            BranchKind::Jr => "jr",
            BranchKind::Jalr => "jalr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LowerInsn {
    #[default]
    Nop,
    Move {
        ft: u8,
        fs: u8,
        dest: Lanes,
    },
    IntAlu {
        op: IntOp,
        id: u8,
        is: u8,
        it: u8,
    },
    Iaddi {
        it: u8,
        is: u8,
        imm: i16,
    },
    /// `Q = fs.fsf / ft.ftf`
    Div {
        fs: u8,
        fsf: u8,
        ft: u8,
        ftf: u8,
    },
    Sqrt {
        ft: u8,
        ftf: u8,
    },
    /// `P = sqrt(fs.fsf)`
    Esqrt {
        fs: u8,
        fsf: u8,
    },
    WaitQ,
    WaitP,
    Mfp {
        ft: u8,
        dest: Lanes,
    },
    Fsand {
        it: u8,
        imm: u16,
    },
    Fmand {
        it: u8,
        is: u8,
    },
    /// `VI1 = (clip & imm) != 0`
    Fcand {
        imm: u32,
    },
    Xgkick {
        is: u8,
    },
    Branch {
        kind: BranchKind,
        is: u8,
        it: u8,
        /// Absolute target for the pc-relative forms.
        target: u32,
    },
}

impl LowerInsn {
    pub fn is_nop(&self) -> bool {
        matches!(self, LowerInsn::Nop)
    }

    pub fn branch(&self) -> Option<BranchKind> {
        match *self {
            LowerInsn::Branch { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn is_xgkick(&self) -> bool {
        matches!(self, LowerInsn::Xgkick { .. })
    }

    pub fn vf_write(&self) -> MicroVfReg {
        match *self {
            LowerInsn::Move { ft, dest, .. } | LowerInsn::Mfp { ft, dest } => {
                MicroVfReg::new(ft, dest)
            }
            _ => MicroVfReg::NONE,
        }
    }

    pub fn vf_reads(&self) -> [MicroVfReg; 2] {
        match *self {
            LowerInsn::Move { fs, dest, .. } => [MicroVfReg::new(fs, dest), MicroVfReg::NONE],
            LowerInsn::Div { fs, fsf, ft, ftf } => [
                MicroVfReg::new(fs, Lanes::single(fsf)),
                MicroVfReg::new(ft, Lanes::single(ftf)),
            ],
            LowerInsn::Sqrt { ft, ftf } => [MicroVfReg::new(ft, Lanes::single(ftf)), MicroVfReg::NONE],
            LowerInsn::Esqrt { fs, fsf } => [MicroVfReg::new(fs, Lanes::single(fsf)), MicroVfReg::NONE],
            _ => [MicroVfReg::NONE; 2],
        }
    }

    pub fn vi_write(&self) -> MicroViReg {
        match *self {
            LowerInsn::IntAlu { id, .. } => MicroViReg::new(id),
            LowerInsn::Iaddi { it, .. } | LowerInsn::Fsand { it, .. } | LowerInsn::Fmand { it, .. } => {
                MicroViReg::new(it)
            }
            LowerInsn::Fcand { .. } => MicroViReg::new(1),
            LowerInsn::Branch { kind, it, .. } if kind.links() => MicroViReg::new(it),
            _ => MicroViReg::NONE,
        }
    }

    pub fn vi_reads(&self) -> [MicroViReg; 2] {
        match *self {
            LowerInsn::IntAlu { is, it, .. } => [MicroViReg::new(is), MicroViReg::new(it)],
            LowerInsn::Iaddi { is, .. } | LowerInsn::Fmand { is, .. } | LowerInsn::Xgkick { is } => {
                [MicroViReg::new(is), MicroViReg::NONE]
            }
            LowerInsn::Branch { kind, is, it, .. } => match kind {
                BranchKind::Ibeq | BranchKind::Ibne => [MicroViReg::new(is), MicroViReg::new(it)],
                BranchKind::B | BranchKind::Bal => [MicroViReg::NONE; 2],
                _ => [MicroViReg::new(is), MicroViReg::NONE],
            },
            _ => [MicroViReg::NONE; 2],
        }
    }

    pub fn flag_reads(&self) -> FlagSet {
        match self {
            LowerInsn::Fsand { .. } => FlagSet::STATUS,
            LowerInsn::Fmand { .. } => FlagSet::MAC,
            LowerInsn::Fcand { .. } => FlagSet::CLIP,
            _ => FlagSet::EMPTY,
        }
    }

    /// Issues a new Q computation.
    pub fn writes_q(&self) -> bool {
        matches!(self, LowerInsn::Div { .. } | LowerInsn::Sqrt { .. })
    }

    pub fn writes_p(&self) -> bool {
        matches!(self, LowerInsn::Esqrt { .. })
    }

    /// Must wait for the pending Q result before issuing.
    pub fn waits_q(&self) -> bool {
        matches!(self, LowerInsn::WaitQ) || self.writes_q()
    }

    pub fn waits_p(&self) -> bool {
        matches!(self, LowerInsn::WaitP) || self.writes_p()
    }

    pub fn reads_p(&self) -> bool {
        matches!(self, LowerInsn::Mfp { .. })
    }
}

/// One upper/lower instruction pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodedInsn {
    pub upper: UpperInsn,
    pub lower: LowerInsn,
    /// End bit: the program halts after the next instruction pair.
    pub e_bit: bool,
}

impl DecodedInsn {
    pub const fn new(upper: UpperInsn, lower: LowerInsn) -> Self {
        Self {
            upper,
            lower,
            e_bit: false,
        }
    }

    pub const fn upper(upper: UpperInsn) -> Self {
        Self::new(upper, LowerInsn::Nop)
    }

    pub const fn lower(lower: LowerInsn) -> Self {
        Self::new(UpperInsn::Nop, lower)
    }

    pub const fn with_e_bit(mut self) -> Self {
        self.e_bit = true;
        self
    }

    /// Reject register numbers outside the VF/VI files. Unused operand
    /// slots read as register 0.
    pub fn check_registers(&self, pc: u32) -> Result<(), DecodeError> {
        let upper_vf = match self.upper {
            UpperInsn::Fmac { fd, fs, ft, .. } => {
                let ft = match ft {
                    FmacSrc::Vf(r) => r,
                    FmacSrc::Q => 0,
                };
                [fd, fs, ft]
            }
            UpperInsn::Abs { ft, fs, .. } => [ft, fs, 0],
            UpperInsn::Clip { fs, ft } => [fs, ft, 0],
            UpperInsn::Nop => [0; 3],
        };
        let (lower_vf, lower_vi) = match self.lower {
            LowerInsn::Move { ft, fs, .. } | LowerInsn::Div { fs, ft, .. } => ([ft, fs], [0; 3]),
            LowerInsn::Sqrt { ft, .. } | LowerInsn::Mfp { ft, .. } => ([ft, 0], [0; 3]),
            LowerInsn::Esqrt { fs, .. } => ([fs, 0], [0; 3]),
            LowerInsn::IntAlu { id, is, it, .. } => ([0; 2], [id, is, it]),
            LowerInsn::Iaddi { it, is, .. } | LowerInsn::Fmand { it, is } => ([0; 2], [it, is, 0]),
            LowerInsn::Branch { is, it, .. } => ([0; 2], [is, it, 0]),
            LowerInsn::Fsand { it, .. } => ([0; 2], [it, 0, 0]),
            LowerInsn::Xgkick { is } => ([0; 2], [is, 0, 0]),
            LowerInsn::Nop | LowerInsn::WaitQ | LowerInsn::WaitP | LowerInsn::Fcand { .. } => {
                ([0; 2], [0; 3])
            }
        };
        if upper_vf.iter().chain(&lower_vf).any(|&r| usize::from(r) >= NUM_VF) {
            return Err(DecodeError::InvalidOperand {
                pc,
                reason: "VF register out of range",
            });
        }
        if lower_vi.iter().any(|&r| usize::from(r) >= NUM_VI) {
            return Err(DecodeError::InvalidOperand {
                pc,
                reason: "VI register out of range",
            });
        }
        Ok(())
    }
}

/// Micro program held as already decoded pairs, one per 8-byte slot.
#[derive(Debug, Clone, Default)]
pub struct MicroProgram {
    insns: Vec<DecodedInsn>,
}

impl MicroProgram {
    pub fn new(insns: Vec<DecodedInsn>) -> Self {
        Self { insns }
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Replace the pair at `pc`, returning the previous one.
    pub fn patch(&mut self, pc: u32, insn: DecodedInsn) -> Option<DecodedInsn> {
        let slot = self.insns.get_mut((pc / INSN_BYTES) as usize)?;
        Some(std::mem::replace(slot, insn))
    }
}

impl Decoder for MicroProgram {
    fn decode(&mut self, pc: u32) -> Result<DecodedInsn, DecodeError> {
        if pc % INSN_BYTES != 0 {
            return Err(DecodeError::UnsupportedSequence {
                pc,
                reason: "misaligned pc",
            });
        }
        self.insns
            .get((pc / INSN_BYTES) as usize)
            .copied()
            .ok_or(DecodeError::OutOfRange { pc })
    }
}
