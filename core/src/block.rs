use crate::state::PipelineState;

/// Exit codes returned by generated blocks.
pub const EXIT_CONTINUE: u32 = 0;
pub const EXIT_HALT: u32 = 1;

/// A translated block as kept by the cache.
///
/// This is the only part of a translation that outlives code emission.
/// The entry state is the cache key and never changes after insertion.
#[derive(Debug, Clone)]
pub struct MicroBlock {
    /// Guest pc of the first instruction pair.
    pub pc: u32,
    /// Entry pipeline state, including the exact-match marker.
    pub entry: PipelineState,
    /// Pipeline state the next block starts from.
    pub exit: PipelineState,
    /// Offset of the host code in the code buffer.
    pub host_offset: usize,
    pub host_size: usize,
    /// Guest bytes covered.
    pub guest_size: u32,
    /// Guest cycles the block accounts for, stalls included.
    pub cycles: u32,
}

impl MicroBlock {
    pub fn new(pc: u32, entry: PipelineState) -> Self {
        Self {
            pc,
            entry,
            exit: entry,
            host_offset: 0,
            host_size: 0,
            guest_size: 0,
            cycles: 0,
        }
    }

    pub fn guest_insns(&self) -> u32 {
        self.guest_size / crate::vu::INSN_BYTES
    }
}
