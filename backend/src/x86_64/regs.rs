//! Register operands.
//!
//! A general-purpose register operand carries its width in the type
//! ([`Gpr<W>`]), so an encoder can rule out widths it has no form for
//! through its bounds instead of checking at run time.

use std::marker::PhantomData;

/// x86-64 general-purpose register numbers, as encoded in ModR/M and REX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits of the register encoding (for ModR/M).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register requires a REX prefix (R8-R15).
    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }
}

/// SSE registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
    Xmm8 = 8,
    Xmm9 = 9,
    Xmm10 = 10,
    Xmm11 = 11,
    Xmm12 = 12,
    Xmm13 = 13,
    Xmm14 = 14,
    Xmm15 = 15,
}

impl Xmm {
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Operand width of a general-purpose register or strict memory operand.
pub trait OpWidth: sealed::Sealed + Copy + 'static {
    const BITS: u32;
}

/// Widths with a 16/32/64-bit encoding. Groups that have no 8-bit form
/// (bit test, double shift) bound on this.
pub trait WordWidth: OpWidth {}

/// Widths whose immediate forms take a 32-bit immediate.
pub trait LongWidth: WordWidth {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Byte;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dword;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qword;

impl sealed::Sealed for Byte {}
impl sealed::Sealed for Word {}
impl sealed::Sealed for Dword {}
impl sealed::Sealed for Qword {}

impl OpWidth for Byte {
    const BITS: u32 = 8;
}
impl OpWidth for Word {
    const BITS: u32 = 16;
}
impl OpWidth for Dword {
    const BITS: u32 = 32;
}
impl OpWidth for Qword {
    const BITS: u32 = 64;
}

impl WordWidth for Word {}
impl WordWidth for Dword {}
impl WordWidth for Qword {}

impl LongWidth for Dword {}
impl LongWidth for Qword {}

/// A general-purpose register used at width `W`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gpr<W: OpWidth> {
    reg: Reg,
    _width: PhantomData<W>,
}

impl<W: OpWidth> Gpr<W> {
    pub const fn new(reg: Reg) -> Self {
        Self {
            reg,
            _width: PhantomData,
        }
    }

    #[inline]
    pub const fn reg(self) -> Reg {
        self.reg
    }
}

pub type Gpr8 = Gpr<Byte>;
pub type Gpr16 = Gpr<Word>;
pub type Gpr32 = Gpr<Dword>;
pub type Gpr64 = Gpr<Qword>;

pub const AL: Gpr8 = Gpr::new(Reg::Rax);
pub const CL: Gpr8 = Gpr::new(Reg::Rcx);
pub const DL: Gpr8 = Gpr::new(Reg::Rdx);
pub const AX: Gpr16 = Gpr::new(Reg::Rax);
pub const EAX: Gpr32 = Gpr::new(Reg::Rax);
pub const ECX: Gpr32 = Gpr::new(Reg::Rcx);
pub const EDX: Gpr32 = Gpr::new(Reg::Rdx);
pub const RAX: Gpr64 = Gpr::new(Reg::Rax);
pub const RSP: Gpr64 = Gpr::new(Reg::Rsp);
pub const RBP: Gpr64 = Gpr::new(Reg::Rbp);

/// RBP holds the `VuRegs` pointer for the whole life of generated code.
pub const VU_ENV: Reg = Reg::Rbp;

/// Callee-saved registers that the prologue must save/restore (System V).
pub const CALLEE_SAVED: &[Reg] = &[Reg::Rbp, Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Function argument registers (System V AMD64 ABI).
pub const CALL_ARG_REGS: &[Reg] = &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

pub const STACK_ALIGN: usize = 16;

/// Return address plus callee-saved pushes.
pub const PUSH_SIZE: usize = (1 + CALLEE_SAVED.len()) * 8;

/// Frame size, 16-byte aligned. Blocks make no calls and keep all guest
/// state in `VuRegs`, so the frame holds nothing but the pushes.
pub const FRAME_SIZE: usize = (PUSH_SIZE + STACK_ALIGN - 1) & !(STACK_ALIGN - 1);

/// Stack adjustment after pushes.
pub const STACK_ADDEND: usize = FRAME_SIZE - PUSH_SIZE;
