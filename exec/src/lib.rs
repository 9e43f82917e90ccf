//! Block cache and execution loop for the micro JIT.
//!
//! Drives the lookup → translate → execute cycle. Blocks are cached
//! per start pc and entry pipeline state; the cache only grows until
//! an explicit flush.

pub mod block_store;
pub mod config;
pub mod error;
pub mod exec_loop;

pub use block_store::BlockStore;
pub use config::JitConfig;
pub use error::{JitError, JitResult};
pub use exec_loop::{cpu_exec_loop, ExitReason};

use log::{debug, info, warn};
use vu_backend::code_buffer::CodeBuffer;
use vu_backend::translate::{estimate_size, translate};
use vu_backend::HostCodeGen;
use vu_core::block::MicroBlock;
use vu_core::decode::Decoder;
use vu_core::ir::MicroIr;
use vu_core::state::PipelineState;

/// Execution environment holding all shared translation state.
pub struct ExecEnv<B: HostCodeGen> {
    pub block_store: BlockStore,
    pub code_buf: CodeBuffer,
    pub backend: B,
    pub config: JitConfig,
    /// Offset where block code generation starts (after
    /// prologue/epilogue).
    pub code_gen_start: usize,
}

impl<B: HostCodeGen> ExecEnv<B> {
    pub fn new(backend: B) -> JitResult<Self> {
        Self::with_config(backend, JitConfig::default())
    }

    /// Create a new execution environment.
    ///
    /// Emits prologue and epilogue into the code buffer.
    pub fn with_config(mut backend: B, config: JitConfig) -> JitResult<Self> {
        let mut code_buf = CodeBuffer::new(config.code_buffer_size)?;
        backend.emit_prologue(&mut code_buf);
        backend.emit_epilogue(&mut code_buf);
        let code_gen_start = code_buf.offset();

        Ok(Self {
            block_store: BlockStore::new(),
            code_buf,
            backend,
            config,
            code_gen_start,
        })
    }

    /// Cached block for `pc` that may run from `state`.
    pub fn lookup(&self, pc: u32, state: &PipelineState) -> Option<&MicroBlock> {
        self.block_store
            .lookup(pc, state)
            .map(|idx| self.block_store.get(idx))
    }

    /// Translate the block at `pc` entered with `state`.
    ///
    /// The whole IR pass runs before anything is emitted, so a decode
    /// error leaves the cache and the code buffer untouched. Returns
    /// the block index and its exit state.
    pub fn translate<D: Decoder + ?Sized>(
        &mut self,
        decoder: &mut D,
        pc: u32,
        state: &PipelineState,
    ) -> JitResult<(usize, PipelineState)> {
        let mut ir = MicroIr::build(decoder, pc, state, self.config.ir_config())?;

        if let Some(idx) = self.block_store.find_exact(pc, ir.entry_state()) {
            ir.p_block = Some(idx);
            debug!("translate pc={pc:#06x}: key already cached as block {idx}");
            return Ok((idx, self.block_store.get(idx).exit));
        }

        let remaining = self.code_buf.remaining();
        if remaining < estimate_size(&ir).max(self.config.min_code_buf_remaining) {
            warn!("code buffer nearly full: {remaining} bytes left");
            return Err(JitError::BufferFull { remaining });
        }

        self.code_buf.set_writable()?;
        let start = translate(&ir, &self.backend, &mut self.code_buf);

        let mut block = ir.block;
        block.host_offset = start;
        block.host_size = self.code_buf.offset() - start;
        let exit = block.exit;
        debug!(
            "translate pc={:#06x}: {} insns, {} cycles, {} host bytes, marker={:#04x}",
            pc,
            block.guest_insns(),
            block.cycles,
            block.host_size,
            block.entry.need_exact_match,
        );
        let idx = self.block_store.insert(block);
        Ok((idx, exit))
    }

    /// Drop every cached block and reclaim the code space behind the
    /// prologue/epilogue.
    pub fn flush(&mut self) {
        info!(
            "flushing {} blocks ({} bytes of code)",
            self.block_store.len(),
            self.code_buf.offset() - self.code_gen_start
        );
        self.block_store.flush();
        self.code_buf.rewind(self.code_gen_start);
    }
}
