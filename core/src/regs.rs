//! Register identifiers and per-lane pipeline bookkeeping.

use std::ops::{BitAnd, BitOr};

/// Number of 128-bit vector float registers.
pub const NUM_VF: usize = 32;
/// Number of 16-bit integer registers.
pub const NUM_VI: usize = 32;

/// Lane mask of a VF register. Bit 0 is `x`, bit 3 is `w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Lanes(u8);

impl Lanes {
    pub const NONE: Self = Self(0);
    pub const X: Self = Self(0x1);
    pub const Y: Self = Self(0x2);
    pub const Z: Self = Self(0x4);
    pub const W: Self = Self(0x8);
    pub const XY: Self = Self(0x3);
    pub const YZ: Self = Self(0x6);
    pub const ZW: Self = Self(0xC);
    pub const XYZ: Self = Self(0x7);
    pub const XYZW: Self = Self(0xF);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0xF)
    }

    /// Mask holding the single lane `lane` (0 = x .. 3 = w).
    pub const fn single(lane: u8) -> Self {
        Self(1 << (lane & 3))
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, lane: usize) -> bool {
        lane < 4 && self.0 & (1 << lane) != 0
    }

    /// Lanes of `self` not in `other`.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..4).filter(move |&l| self.contains(l))
    }

    /// Dot-suffix notation, e.g. `xyw`.
    pub fn suffix(self) -> String {
        self.iter().map(|l| ['x', 'y', 'z', 'w'][l]).collect()
    }
}

impl BitOr for Lanes {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for Lanes {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Remaining cycles before each lane of a VF register is readable.
///
/// Zero means the lane holds a committed value. Part of the packed
/// pipeline state, so it must stay four plain bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegInfo {
    pub x: u8,
    pub y: u8,
    pub z: u8,
    pub w: u8,
}

impl RegInfo {
    pub const IDLE: Self = Self {
        x: 0,
        y: 0,
        z: 0,
        w: 0,
    };

    pub fn lane(&self, lane: usize) -> u8 {
        match lane {
            0 => self.x,
            1 => self.y,
            2 => self.z,
            _ => self.w,
        }
    }

    pub fn lane_mut(&mut self, lane: usize) -> &mut u8 {
        match lane {
            0 => &mut self.x,
            1 => &mut self.y,
            2 => &mut self.z,
            _ => &mut self.w,
        }
    }

    /// Longest wait over the selected lanes.
    pub fn max_over(&self, lanes: Lanes) -> u8 {
        lanes.iter().map(|l| self.lane(l)).max().unwrap_or(0)
    }

    pub fn set(&mut self, lanes: Lanes, cycles: u8) {
        for l in lanes.iter() {
            *self.lane_mut(l) = cycles;
        }
    }

    /// Lanes with a value still in flight.
    pub fn pending(&self) -> Lanes {
        let mut bits = 0;
        for l in 0..4 {
            if self.lane(l) != 0 {
                bits |= 1 << l;
            }
        }
        Lanes::from_bits(bits)
    }

    /// Per-lane maximum of `self` and `other`.
    pub fn merge(&mut self, other: &RegInfo) {
        for l in 0..4 {
            let v = self.lane_mut(l);
            *v = (*v).max(other.lane(l));
        }
    }

    pub fn advance(&mut self, cycles: u8) {
        for l in 0..4 {
            let v = self.lane_mut(l);
            *v = v.saturating_sub(cycles);
        }
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::IDLE
    }
}

/// A VF register operand together with the lanes it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MicroVfReg {
    pub reg: u8,
    pub lanes: Lanes,
}

impl MicroVfReg {
    pub const NONE: Self = Self {
        reg: 0,
        lanes: Lanes::NONE,
    };

    pub const fn new(reg: u8, lanes: Lanes) -> Self {
        Self { reg, lanes }
    }

    pub fn is_used(&self) -> bool {
        !self.lanes.is_empty()
    }

    /// VF0 is hardwired; accesses never wait and writes are dropped.
    pub fn is_tracked(&self) -> bool {
        self.reg != 0 && self.is_used()
    }

    pub fn overlaps(&self, other: &MicroVfReg) -> bool {
        self.is_tracked() && self.reg == other.reg && !(self.lanes & other.lanes).is_empty()
    }
}

/// A VI register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MicroViReg {
    pub reg: u8,
    pub used: bool,
}

impl MicroViReg {
    pub const NONE: Self = Self { reg: 0, used: false };

    pub const fn new(reg: u8) -> Self {
        Self { reg, used: true }
    }

    pub fn is_tracked(&self) -> bool {
        self.used && self.reg != 0
    }
}
