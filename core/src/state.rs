//! Packed pipeline state, the block cache key.
//!
//! The record is plain bytes in a fixed order. The leading "quick"
//! fields are all a tolerant comparison looks at; the trailing
//! `need_exact_match` marker switches the comparison to every byte
//! that precedes it.

use std::fmt;

use crate::flags::{unpack_instance, FlagKind};
use crate::regs::{RegInfo, NUM_VF, NUM_VI};
use crate::vu::VuRegs;

/// The block's timing depends on VF/VI values in flight at entry.
pub const EXACT_STALL: u8 = 0x01;
/// The block starts in a pending delayed-branch slot.
pub const EXACT_SINGLE: u8 = 0x02;
/// Exact matching forced by configuration.
pub const EXACT_FORCED: u8 = 0x80;

/// Size of the packed record.
pub const PIPELINE_STATE_SIZE: usize = 166;
/// Leading bytes compared by the tolerant match.
pub const QUICK_LEN: usize = 5;

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineState {
    /// Cycles until the pending Q result lands.
    pub q: u8,
    /// Cycles until the pending P result lands.
    pub p: u8,
    /// Cycles until an in-flight XGKICK transfer completes.
    pub xgkick: u8,
    /// Current flag instances: status bits 0-1, mac 2-3, clip 4-5.
    pub flags: u8,
    /// Non-zero when the block must resolve a delayed branch first.
    pub block_type: u8,
    pub vi: [u8; NUM_VI],
    pub vf: [RegInfo; NUM_VF],
    pub need_exact_match: u8,
}

const _: () = assert!(std::mem::size_of::<PipelineState>() == PIPELINE_STATE_SIZE);
const _: () = assert!(std::mem::align_of::<PipelineState>() == 1);

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    /// Idle pipeline: nothing in flight, flag instance 0 current.
    pub const fn new() -> Self {
        Self {
            q: 0,
            p: 0,
            xgkick: 0,
            flags: 0,
            block_type: 0,
            vi: [0; NUM_VI],
            vf: [RegInfo::IDLE; NUM_VF],
            need_exact_match: 0,
        }
    }

    /// Entry state for the first translation at an address, taken
    /// from the live register file.
    pub fn seed(vu: &VuRegs) -> Self {
        Self {
            flags: (vu.flag_instances & 0x3f) as u8,
            ..Self::new()
        }
    }

    pub fn as_bytes(&self) -> &[u8; PIPELINE_STATE_SIZE] {
        // SAFETY: repr(C) record of u8 fields only, so it has no padding
        // and is exactly PIPELINE_STATE_SIZE bytes with alignment 1.
        unsafe { &*(self as *const Self as *const [u8; PIPELINE_STATE_SIZE]) }
    }

    /// Fields compared by the tolerant match.
    pub fn quick(&self) -> &[u8] {
        &self.as_bytes()[..QUICK_LEN]
    }

    /// Every byte except the marker.
    pub fn body(&self) -> &[u8] {
        &self.as_bytes()[..PIPELINE_STATE_SIZE - 1]
    }

    pub fn needs_exact_match(&self) -> bool {
        self.need_exact_match != 0
    }

    /// Whether a block keyed by `cached` may run from this state.
    ///
    /// A marker on either side selects the exact compare, so a live
    /// state marked by the caller never reuses a tolerantly keyed block.
    pub fn is_compatible(&self, cached: &PipelineState) -> bool {
        if self.needs_exact_match() || cached.needs_exact_match() {
            self.body() == cached.body()
        } else {
            self.quick() == cached.quick()
        }
    }

    pub fn flag_instance(&self, kind: FlagKind) -> u8 {
        unpack_instance(self.flags, kind)
    }

    /// Nothing in flight anywhere.
    pub fn is_idle(&self) -> bool {
        self.q == 0
            && self.p == 0
            && self.xgkick == 0
            && self.vi.iter().all(|&c| c == 0)
            && self.vf.iter().all(RegInfo::is_idle)
    }
}

impl fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let busy_vf: Vec<_> = self
            .vf
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_idle())
            .map(|(i, r)| (i, [r.x, r.y, r.z, r.w]))
            .collect();
        let busy_vi: Vec<_> = self
            .vi
            .iter()
            .enumerate()
            .filter(|(_, &c)| c != 0)
            .map(|(i, &c)| (i, c))
            .collect();
        f.debug_struct("PipelineState")
            .field("q", &self.q)
            .field("p", &self.p)
            .field("xgkick", &self.xgkick)
            .field("flags", &format_args!("{:#04x}", self.flags))
            .field("block_type", &self.block_type)
            .field("vi", &busy_vi)
            .field("vf", &busy_vf)
            .field(
                "need_exact_match",
                &format_args!("{:#04x}", self.need_exact_match),
            )
            .finish()
    }
}
