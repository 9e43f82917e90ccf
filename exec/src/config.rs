use vu_backend::code_buffer::DEFAULT_CODE_BUF_SIZE;
use vu_core::ir::IrConfig;

/// Minimum remaining bytes in code buffer before refusing
/// to translate a new block.
pub const MIN_CODE_BUF_REMAINING: usize = 4096;

/// VU1 micro memory size.
pub const MICRO_MEM_SIZE: u32 = 16 * 1024;

/// Tunables of the translator and its code cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitConfig {
    pub code_buffer_size: usize,
    pub min_code_buf_remaining: usize,
    /// Instruction pairs before a block falls through.
    pub max_block_insns: u32,
    /// Guest pcs wrap modulo this.
    pub micro_mem_size: u32,
    /// Key every block with the exact-match marker.
    pub force_exact_match: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            code_buffer_size: DEFAULT_CODE_BUF_SIZE,
            min_code_buf_remaining: MIN_CODE_BUF_REMAINING,
            max_block_insns: 256,
            micro_mem_size: MICRO_MEM_SIZE,
            force_exact_match: false,
        }
    }
}

impl JitConfig {
    pub fn ir_config(&self) -> IrConfig {
        IrConfig {
            max_block_insns: self.max_block_insns,
            micro_mem_size: self.micro_mem_size,
            force_exact_match: self.force_exact_match,
        }
    }

    /// Wrap a guest pc into micro memory.
    pub fn wrap_pc(&self, pc: u32) -> u32 {
        pc.checked_rem(self.micro_mem_size).unwrap_or(pc)
    }
}
