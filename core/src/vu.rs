//! Guest vector-unit register file.
//!
//! Generated code addresses every field at a fixed offset from the env
//! pointer, so the layout is `repr(C)` and the offset helpers below are
//! the only way the backend refers to guest state.

use std::mem::offset_of;

use crate::regs::{NUM_VF, NUM_VI};

/// Status flag bits.
pub const STATUS_Z: u32 = 1 << 0;
pub const STATUS_S: u32 = 1 << 1;
pub const STATUS_ZS: u32 = 1 << 6;
pub const STATUS_SS: u32 = 1 << 7;
/// Sticky bits carried from the previous instance.
pub const STATUS_STICKY: u32 = STATUS_ZS | STATUS_SS;

/// MAC flag: zero bits per lane in 0-3, sign bits in 4-7 (bit = lane).
pub const MAC_ZERO_SHIFT: u32 = 0;
pub const MAC_SIGN_SHIFT: u32 = 4;

/// Clip flag history: 4 judgements of 6 bits each.
pub const CLIP_HISTORY_MASK: u32 = 0x00FF_FFFF;

/// Bytes per guest instruction pair.
pub const INSN_BYTES: u32 = 8;

#[repr(C, align(16))]
#[derive(Debug, Clone, PartialEq)]
pub struct VuRegs {
    pub vf: [[f32; 4]; NUM_VF],
    /// Upper destination saved before a same-cycle lower write.
    pub vf_backup: [f32; 4],
    /// Staging slot for masked write-backs.
    pub scratch: [f32; 4],
    /// `0x7fff_ffff` in every lane, used by ABS and CLIP.
    pub abs_mask: [u32; 4],
    pub vi: [u32; NUM_VI],
    pub status: [u32; 4],
    pub mac: [u32; 4],
    pub clip: [u32; 4],
    pub q: [f32; 2],
    pub p: [f32; 2],
    pub pc: u32,
    /// Current status/mac/clip instances, packed as in the state's flag byte.
    pub flag_instances: u32,
    pub branch_cond: u32,
    pub branch_target: u32,
    /// Outcome of a branch sitting in another branch's delay slot.
    pub delay_cond: u32,
    pub delay_target: u32,
    pub xgkick_addr: u32,
    pub xgkick_count: u32,
    pub cycles: u64,
}

impl Default for VuRegs {
    fn default() -> Self {
        Self::new()
    }
}

impl VuRegs {
    pub fn new() -> Self {
        let mut vf = [[0.0f32; 4]; NUM_VF];
        vf[0] = [0.0, 0.0, 0.0, 1.0];
        Self {
            vf,
            vf_backup: [0.0; 4],
            scratch: [0.0; 4],
            abs_mask: [0x7fff_ffff; 4],
            vi: [0; NUM_VI],
            status: [0; 4],
            mac: [0; 4],
            clip: [0; 4],
            q: [0.0; 2],
            p: [0.0; 2],
            pc: 0,
            flag_instances: 0,
            branch_cond: 0,
            branch_target: 0,
            delay_cond: 0,
            delay_target: 0,
            xgkick_addr: 0,
            xgkick_count: 0,
            cycles: 0,
        }
    }

    fn instance(&self, shift: u32) -> usize {
        ((self.flag_instances >> shift) & 3) as usize
    }

    /// Status flag as currently visible.
    pub fn status_flag(&self) -> u32 {
        self.status[self.instance(0)]
    }

    pub fn mac_flag(&self) -> u32 {
        self.mac[self.instance(2)]
    }

    pub fn clip_flag(&self) -> u32 {
        self.clip[self.instance(4)]
    }

    /// Current Q value. Blocks leave instance 0 current.
    pub fn q_value(&self) -> f32 {
        self.q[0]
    }

    pub fn p_value(&self) -> f32 {
        self.p[0]
    }
}

pub const fn vf_offset(reg: u8) -> i32 {
    (offset_of!(VuRegs, vf) + reg as usize * 16) as i32
}

pub const fn vf_lane_offset(reg: u8, lane: usize) -> i32 {
    vf_offset(reg) + (lane as i32) * 4
}

pub const fn vi_offset(reg: u8) -> i32 {
    (offset_of!(VuRegs, vi) + reg as usize * 4) as i32
}

pub const fn status_offset(inst: u8) -> i32 {
    (offset_of!(VuRegs, status) + (inst as usize & 3) * 4) as i32
}

pub const fn mac_offset(inst: u8) -> i32 {
    (offset_of!(VuRegs, mac) + (inst as usize & 3) * 4) as i32
}

pub const fn clip_offset(inst: u8) -> i32 {
    (offset_of!(VuRegs, clip) + (inst as usize & 3) * 4) as i32
}

pub const fn q_offset(inst: u8) -> i32 {
    (offset_of!(VuRegs, q) + (inst as usize & 1) * 4) as i32
}

pub const fn p_offset(inst: u8) -> i32 {
    (offset_of!(VuRegs, p) + (inst as usize & 1) * 4) as i32
}

pub const VF_BACKUP_OFFSET: i32 = offset_of!(VuRegs, vf_backup) as i32;
pub const SCRATCH_OFFSET: i32 = offset_of!(VuRegs, scratch) as i32;
pub const ABS_MASK_OFFSET: i32 = offset_of!(VuRegs, abs_mask) as i32;
pub const PC_OFFSET: i32 = offset_of!(VuRegs, pc) as i32;
pub const FLAG_INSTANCES_OFFSET: i32 = offset_of!(VuRegs, flag_instances) as i32;
pub const BRANCH_COND_OFFSET: i32 = offset_of!(VuRegs, branch_cond) as i32;
pub const BRANCH_TARGET_OFFSET: i32 = offset_of!(VuRegs, branch_target) as i32;
pub const DELAY_COND_OFFSET: i32 = offset_of!(VuRegs, delay_cond) as i32;
pub const DELAY_TARGET_OFFSET: i32 = offset_of!(VuRegs, delay_target) as i32;
pub const XGKICK_ADDR_OFFSET: i32 = offset_of!(VuRegs, xgkick_addr) as i32;
pub const XGKICK_COUNT_OFFSET: i32 = offset_of!(VuRegs, xgkick_count) as i32;
pub const CYCLES_OFFSET: i32 = offset_of!(VuRegs, cycles) as i32;
