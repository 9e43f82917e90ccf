//! Memory operands.

use std::marker::PhantomData;

use super::regs::{Byte, Dword, OpWidth, Qword, Reg, Word};

/// SIB scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Scale {
    S1 = 0,
    S2 = 1,
    S4 = 2,
    S8 = 3,
}

/// Scaled index register. RSP has no index encoding, so it cannot be one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Index {
    reg: Reg,
    scale: Scale,
}

impl Index {
    pub const fn new(reg: Reg, scale: Scale) -> Option<Self> {
        if matches!(reg, Reg::Rsp) {
            None
        } else {
            Some(Self { reg, scale })
        }
    }

    pub const fn reg(self) -> Reg {
        self.reg
    }

    pub const fn scale(self) -> Scale {
        self.scale
    }
}

/// `[base + index*scale + disp]`, any part optional except that a
/// displacement is always present (possibly zero).
///
/// With neither base nor index the operand is an absolute 32-bit
/// displacement. The operand says nothing about access width; an
/// encoder whose other operand is a register takes the width from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub base: Option<Reg>,
    pub index: Option<Index>,
    pub disp: i32,
}

impl Mem {
    /// `[base + disp]`
    pub const fn at(base: Reg, disp: i32) -> Self {
        Self {
            base: Some(base),
            index: None,
            disp,
        }
    }

    /// `[disp32]`
    pub const fn abs(disp: i32) -> Self {
        Self {
            base: None,
            index: None,
            disp,
        }
    }

    /// `[base + index*scale + disp]`; pass `None` for an index-only form.
    pub const fn indexed(base: Option<Reg>, index: Index, disp: i32) -> Self {
        Self {
            base,
            index: Some(index),
            disp,
        }
    }

    /// Same operand `delta` bytes further on.
    pub const fn offset(self, delta: i32) -> Self {
        Self {
            disp: self.disp.wrapping_add(delta),
            ..self
        }
    }
}

/// A memory operand pinned to width `W`.
///
/// Immediate and single-operand encodings have no register to take the
/// width from; they require this form so the width is never ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemStrict<W: OpWidth> {
    mem: Mem,
    _width: PhantomData<W>,
}

impl<W: OpWidth> MemStrict<W> {
    pub const fn new(mem: Mem) -> Self {
        Self {
            mem,
            _width: PhantomData,
        }
    }

    pub const fn mem(&self) -> &Mem {
        &self.mem
    }
}

pub const fn byte_ptr(mem: Mem) -> MemStrict<Byte> {
    MemStrict::new(mem)
}

pub const fn word_ptr(mem: Mem) -> MemStrict<Word> {
    MemStrict::new(mem)
}

pub const fn dword_ptr(mem: Mem) -> MemStrict<Dword> {
    MemStrict::new(mem)
}

pub const fn qword_ptr(mem: Mem) -> MemStrict<Qword> {
    MemStrict::new(mem)
}
