//! Pipeline-state IR for one translated block.
//!
//! [`MicroIr`] walks the block one instruction pair per cycle. Each
//! cycle it advances the pipeline, computes the stall the reads cause,
//! resolves Q/P and flag instances, classifies same-cycle hazards
//! between the upper and lower halves, and finally commits the cycle's
//! writes into the running [`PipelineState`]. Nothing is emitted here;
//! the finished IR is handed to the backend as a whole.

use log::trace;

use crate::block::MicroBlock;
use crate::decode::{BranchKind, DecodeError, DecodedInsn, Decoder, LowerInsn};
use crate::flags::{pack_instances, FlagCycles, FlagKind};
use crate::op::{Hazard, MicroLowerOp, MicroOp, MicroUpperOp};
use crate::regs::{Lanes, MicroVfReg, MicroViReg, RegInfo, NUM_VF};
use crate::state::{PipelineState, EXACT_FORCED, EXACT_SINGLE, EXACT_STALL};
use crate::vu::INSN_BYTES;

/// Cycles from issue until a result is readable.
pub const FMAC_LATENCY: u8 = 4;
pub const LOWER_VF_LATENCY: u8 = 4;
pub const VI_LATENCY: u8 = 1;
pub const DIV_LATENCY: u8 = 7;
pub const SQRT_LATENCY: u8 = 7;
pub const ESQRT_LATENCY: u8 = 12;
pub const XGKICK_LATENCY: u8 = 8;

/// Longest latency a register entry of a pipeline state can carry. A
/// register read at or after this cycle cannot depend on entry timing.
const ENTRY_HORIZON: u32 = FMAC_LATENCY as u32;

/// Translation limits that shape a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrConfig {
    /// Instruction pairs before a block falls through.
    pub max_block_insns: u32,
    /// Bytes of micro memory; pcs wrap modulo this.
    pub micro_mem_size: u32,
    /// Key every block with the exact-match marker.
    pub force_exact_match: bool,
}

impl Default for IrConfig {
    fn default() -> Self {
        Self {
            max_block_insns: 256,
            micro_mem_size: 16 * 1024,
            force_exact_match: false,
        }
    }
}

/// Writes issued in the current cycle, committed at its end.
/// Slot 0 of `vf` is the upper op, slot 1 the lower op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MicroTempRegInfo {
    pub vf: [RegInfo; 2],
    pub vf_reg: [u8; 2],
    pub vi: u8,
    pub vi_reg: u8,
    pub q: u8,
    pub p: u8,
    pub xgkick: u8,
}

impl MicroTempRegInfo {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// How a block hands control on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// Instruction limit or end of micro memory.
    FallThrough { next_pc: u32 },
    /// Branch or jump, after its delay slot.
    Branch {
        kind: BranchKind,
        target: u32,
        fallthrough: u32,
    },
    /// E-bit reached, after its delay slot.
    Halt { next_pc: u32 },
    /// Single-pair block resolving a branch that sat in a delay slot.
    DelayedBranch { fallthrough: u32 },
}

#[derive(Debug, Clone)]
pub struct MicroIr {
    /// Cached block whose key matches this translation, if any.
    pub p_block: Option<usize>,
    pub block: MicroBlock,
    pub regs_temp: MicroTempRegInfo,
    /// One record per instruction pair.
    pub info: Vec<MicroOp>,
    /// Branch that ends the block.
    pub branch: Option<BranchKind>,
    pub end: Option<BlockEnd>,
    /// Cycles elapsed since block entry.
    pub cycles: u32,
    /// Instruction pairs analyzed.
    pub count: u32,
    pub start_pc: u32,
    pub cur_pc: u32,

    config: IrConfig,
    regs: PipelineState,
    /// Lanes not yet written in this block; their timing is whatever
    /// the entry state carried.
    unwritten_vf: [Lanes; NUM_VF],
    unwritten_vi: u32,
    flag_cycles: [FlagCycles; 3],
    q_inst: u8,
    p_inst: u8,
    exact: u8,
    pending_branch: Option<usize>,
    pending_halt: bool,
    delayed_branch: bool,
    finished: bool,
}

impl MicroIr {
    pub fn new(start_pc: u32, entry: &PipelineState, config: IrConfig) -> Self {
        let flag_cycles = FlagKind::ALL.map(|k| FlagCycles::new(entry.flag_instance(k)));
        Self {
            p_block: None,
            block: MicroBlock::new(start_pc, *entry),
            regs_temp: MicroTempRegInfo::default(),
            info: Vec::new(),
            branch: None,
            end: None,
            cycles: 0,
            count: 0,
            start_pc,
            cur_pc: start_pc,
            config,
            regs: *entry,
            unwritten_vf: [Lanes::XYZW; NUM_VF],
            unwritten_vi: u32::MAX,
            flag_cycles,
            q_inst: 0,
            p_inst: 0,
            exact: 0,
            pending_branch: None,
            pending_halt: false,
            delayed_branch: false,
            finished: false,
        }
    }

    /// Run the whole pass for the block starting at `start_pc`.
    ///
    /// A decode error abandons the pass; nothing has been emitted yet.
    pub fn build<D: Decoder + ?Sized>(
        decoder: &mut D,
        start_pc: u32,
        entry: &PipelineState,
        config: IrConfig,
    ) -> Result<Self, DecodeError> {
        let mut ir = Self::new(start_pc, entry, config);
        loop {
            let insn = decoder.decode(ir.cur_pc)?;
            if ir.analyze(insn)? {
                break;
            }
        }
        ir.finish();
        if log::log_enabled!(log::Level::Trace) {
            trace!("{}", crate::dump::ir_to_string(&ir));
        }
        Ok(ir)
    }

    /// Single-pair block resolving a branch from a delay slot.
    pub fn is_single(&self) -> bool {
        self.block.entry.block_type != 0
    }

    /// Running pipeline state after the cycles analyzed so far.
    pub fn state(&self) -> &PipelineState {
        &self.regs
    }

    pub fn entry_state(&self) -> &PipelineState {
        &self.block.entry
    }

    pub fn exit_state(&self) -> &PipelineState {
        &self.block.exit
    }

    /// Current Q instance; after [`finish`](Self::finish), the one
    /// the block leaves current.
    pub fn q_instance(&self) -> u8 {
        self.q_inst
    }

    pub fn p_instance(&self) -> u8 {
        self.p_inst
    }

    pub fn ops(&self) -> &[MicroOp] {
        &self.info
    }

    fn wrap(&self, pc: u32) -> u32 {
        pc.checked_rem(self.config.micro_mem_size).unwrap_or(pc)
    }

    /// Analyze one instruction pair. Returns `true` once the block ends.
    pub fn analyze(&mut self, insn: DecodedInsn) -> Result<bool, DecodeError> {
        debug_assert!(self.end.is_none(), "block already ended");
        let pc = self.cur_pc;
        insn.check_registers(pc)?;
        let lower_branch = insn.lower.branch();
        let in_delay_slot =
            self.pending_branch.is_some() || self.pending_halt || self.is_single();

        if self.pending_halt && lower_branch.is_some() {
            return Err(DecodeError::UnsupportedSequence {
                pc,
                reason: "branch in an E-bit delay slot",
            });
        }
        if self.is_single() && (lower_branch.is_some() || insn.e_bit) {
            return Err(DecodeError::UnsupportedSequence {
                pc,
                reason: "control transfer in a delayed-branch slot",
            });
        }
        if insn.e_bit && (in_delay_slot || lower_branch.is_some()) {
            return Err(DecodeError::UnsupportedSequence {
                pc,
                reason: "E-bit combined with a branch",
            });
        }

        if self.count > 0 {
            self.advance(1);
        }
        self.regs_temp.clear();

        let upper = MicroUpperOp::new(insn.upper, insn.e_bit);
        let mut lower = MicroLowerOp::new(insn.lower);

        let mut stall = 0u8;
        for r in upper.vf_read.iter().chain(lower.vf_read.iter()) {
            stall = stall.max(self.vf_wait(r));
        }
        for r in &lower.vi_read {
            stall = stall.max(self.vi_wait(r));
        }
        if insn.lower.waits_q() {
            stall = stall.max(self.regs.q);
        }
        if insn.lower.waits_p() {
            stall = stall.max(self.regs.p);
        }
        if insn.lower.is_xgkick() {
            stall = stall.max(self.regs.xgkick);
        }
        self.advance(stall);
        let issue = self.cycles;

        let (read_q, write_q) = (self.q_inst, self.q_inst ^ 1);
        let (read_p, write_p) = (self.p_inst, self.p_inst ^ 1);

        let writes = upper.flag_writes;
        let [s_flag, m_flag, c_flag] = FlagKind::ALL
            .map(|k| self.flag_cycles[k.index()].resolve(issue, writes.contains(k)));

        let lower_reads_upper = lower.vf_read.iter().any(|r| upper.vf_write.overlaps(r));
        let upper_reads_lower = upper.vf_read.iter().any(|r| lower.vf_write.overlaps(r));
        let flag_conflict = [s_flag, m_flag, c_flag]
            .iter()
            .zip(FlagKind::ALL)
            .any(|(f, k)| lower.flag_reads.contains(k) && f.do_flag && f.read == f.write);
        let hazard = if lower_reads_upper {
            Some(Hazard::LowerReadsUpperWrite)
        } else if flag_conflict {
            Some(Hazard::FlagReadConflict)
        } else {
            None
        };
        let (swap_ops, backup_vf) = match hazard {
            Some(Hazard::LowerReadsUpperWrite) if upper_reads_lower => (false, true),
            Some(_) => (true, false),
            None => (false, false),
        };
        if upper.vf_write.overlaps(&lower.vf_write) {
            lower.no_write_vf = true;
        }

        if upper.vf_write.is_tracked() {
            self.regs_temp.vf_reg[0] = upper.vf_write.reg;
            self.regs_temp.vf[0].set(upper.vf_write.lanes, FMAC_LATENCY);
        }
        if lower.vf_write.is_tracked() && !lower.no_write_vf {
            self.regs_temp.vf_reg[1] = lower.vf_write.reg;
            self.regs_temp.vf[1].set(lower.vf_write.lanes, LOWER_VF_LATENCY);
        }
        if lower.vi_write.is_tracked() {
            self.regs_temp.vi_reg = lower.vi_write.reg;
            self.regs_temp.vi = VI_LATENCY;
        }
        match insn.lower {
            LowerInsn::Div { .. } => self.regs_temp.q = DIV_LATENCY,
            LowerInsn::Sqrt { .. } => self.regs_temp.q = SQRT_LATENCY,
            LowerInsn::Esqrt { .. } => self.regs_temp.p = ESQRT_LATENCY,
            LowerInsn::Xgkick { .. } => self.regs_temp.xgkick = XGKICK_LATENCY,
            _ => {}
        }
        let temp = self.regs_temp;
        self.commit(&temp);

        let idx = self.info.len();
        let mut op = MicroOp {
            pc,
            stall,
            issue_cycle: issue,
            is_eob: false,
            is_bdelay: in_delay_slot,
            hazard,
            swap_ops,
            backup_vf,
            do_xgkick: insn.lower.is_xgkick(),
            read_q,
            write_q,
            read_p,
            write_p,
            s_flag,
            m_flag,
            c_flag,
            upper,
            lower,
        };
        self.count += 1;
        let next_pc = self.wrap(pc.wrapping_add(INSN_BYTES));
        self.cur_pc = next_pc;

        let end = if let Some(branch_idx) = self.pending_branch.take() {
            if lower_branch.is_some() {
                self.info[branch_idx].lower.bad_branch = true;
                op.lower.evil_branch = true;
                self.delayed_branch = true;
            }
            Some(self.branch_end(branch_idx))
        } else if self.pending_halt {
            Some(BlockEnd::Halt { next_pc })
        } else if self.is_single() {
            Some(BlockEnd::DelayedBranch {
                fallthrough: next_pc,
            })
        } else if let Some(kind) = lower_branch {
            self.pending_branch = Some(idx);
            self.branch = Some(kind);
            None
        } else if insn.e_bit {
            self.pending_halt = true;
            None
        } else if self.count >= self.config.max_block_insns || next_pc == 0 {
            Some(BlockEnd::FallThrough { next_pc })
        } else {
            None
        };
        op.is_eob = end.is_some();
        self.info.push(op);
        self.end = end;
        Ok(end.is_some())
    }

    fn branch_end(&self, branch_idx: usize) -> BlockEnd {
        let op = &self.info[branch_idx];
        let (kind, target) = match op.lower.insn {
            LowerInsn::Branch { kind, target, .. } => (kind, target),
            _ => unreachable!("pending branch slot without a branch"),
        };
        BlockEnd::Branch {
            kind,
            target: self.wrap(target),
            fallthrough: self.wrap(op.pc.wrapping_add(2 * INSN_BYTES)),
        }
    }

    fn vf_wait(&mut self, r: &MicroVfReg) -> u8 {
        if !r.is_tracked() {
            return 0;
        }
        let idx = r.reg as usize;
        let info = &self.regs.vf[idx];
        let inherited = self.unwritten_vf[idx] & r.lanes;
        let early = self.cycles < ENTRY_HORIZON;
        if !inherited.is_empty() && (early || info.max_over(inherited) != 0) {
            self.exact |= EXACT_STALL;
        }
        info.max_over(r.lanes)
    }

    fn vi_wait(&mut self, r: &MicroViReg) -> u8 {
        if !r.is_tracked() {
            return 0;
        }
        let wait = self.regs.vi[r.reg as usize];
        let early = self.cycles < ENTRY_HORIZON;
        if self.unwritten_vi & (1 << r.reg) != 0 && (early || wait != 0) {
            self.exact |= EXACT_STALL;
        }
        wait
    }

    /// Let `cycles` cycles elapse.
    fn advance(&mut self, cycles: u8) {
        if cycles == 0 {
            return;
        }
        self.cycles += u32::from(cycles);
        for vf in self.regs.vf.iter_mut() {
            vf.advance(cycles);
        }
        for vi in self.regs.vi.iter_mut() {
            *vi = vi.saturating_sub(cycles);
        }
        if self.regs.q != 0 {
            self.regs.q = self.regs.q.saturating_sub(cycles);
            if self.regs.q == 0 {
                self.q_inst ^= 1;
            }
        }
        if self.regs.p != 0 {
            self.regs.p = self.regs.p.saturating_sub(cycles);
            if self.regs.p == 0 {
                self.p_inst ^= 1;
            }
        }
        self.regs.xgkick = self.regs.xgkick.saturating_sub(cycles);
    }

    /// Fold the cycle's writes into the running state.
    fn commit(&mut self, temp: &MicroTempRegInfo) {
        for slot in 0..2 {
            let reg = temp.vf_reg[slot] as usize;
            if reg == 0 || temp.vf[slot].is_idle() {
                continue;
            }
            self.regs.vf[reg].merge(&temp.vf[slot]);
            self.unwritten_vf[reg] = self.unwritten_vf[reg].without(temp.vf[slot].pending());
        }
        if temp.vi_reg != 0 && temp.vi != 0 {
            let reg = temp.vi_reg as usize;
            self.regs.vi[reg] = self.regs.vi[reg].max(temp.vi);
            self.unwritten_vi &= !(1 << reg);
        }
        if temp.q != 0 {
            self.regs.q = temp.q;
        }
        if temp.p != 0 {
            self.regs.p = temp.p;
        }
        if temp.xgkick != 0 {
            self.regs.xgkick = temp.xgkick;
        }
    }

    /// Close the block: let the last cycle elapse, settle the exit
    /// state and the entry key's exact-match marker.
    ///
    /// The key is marked whenever the block would behave differently
    /// from some other entry timing of its VF/VI registers: a register
    /// read before the block writes it, early enough that an in-flight
    /// entry value could still stall it, or a block too short for entry
    /// values to drain before exit.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.advance(1);
        let [status, mac, clip] = FlagKind::ALL.map(|k| self.flag_cycles[k.index()].last_write());

        let mut exit = self.regs;
        exit.flags = pack_instances(status, mac, clip);
        exit.block_type = u8::from(self.delayed_branch);
        exit.need_exact_match = 0;

        let mut marker = self.exact;
        // Entry timing of untouched registers leaks into the exit state.
        if self.cycles < ENTRY_HORIZON {
            marker |= EXACT_STALL;
        }
        if self.is_single() {
            marker |= EXACT_SINGLE;
        }
        if self.config.force_exact_match {
            marker |= EXACT_FORCED;
        }
        self.block.entry.need_exact_match |= marker;
        self.block.exit = exit;
        self.block.cycles = self.cycles;
        self.block.guest_size = self.count * INSN_BYTES;
        self.finished = true;
    }
}
