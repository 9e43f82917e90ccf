use log::debug;
use vu_backend::HostCodeGen;
use vu_core::block::EXIT_HALT;
use vu_core::decode::Decoder;
use vu_core::state::PipelineState;
use vu_core::vu::VuRegs;

use crate::{ExecEnv, JitError, JitResult};

/// Reason the execution loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A block ended on the E-bit.
    Halted,
    /// `max_blocks` blocks ran without halting.
    BlockLimit,
    /// A block did not fit even into a freshly flushed buffer.
    BufferFull,
}

/// Main execution loop.
///
/// Repeatedly looks up or translates blocks and executes them until a
/// block halts or `max_blocks` blocks have run. A full code buffer is
/// flushed once and the translation retried.
///
/// # Safety
/// The environment's backend must generate code for the host this runs
/// on; the generated code reads and writes `vu` directly.
pub unsafe fn cpu_exec_loop<B, D>(
    env: &mut ExecEnv<B>,
    vu: &mut VuRegs,
    decoder: &mut D,
    max_blocks: usize,
) -> JitResult<ExitReason>
where
    B: HostCodeGen,
    D: Decoder + ?Sized,
{
    let mut state = PipelineState::seed(vu);

    for _ in 0..max_blocks {
        let pc = env.config.wrap_pc(vu.pc);
        let idx = match env.block_store.lookup(pc, &state) {
            Some(idx) => idx,
            None => match block_translate(env, decoder, pc, &state)? {
                Some(idx) => idx,
                None => return Ok(ExitReason::BufferFull),
            },
        };

        let exit_code = cpu_block_exec(env, vu, idx)?;
        state = env.block_store.get(idx).exit;
        if exit_code == EXIT_HALT {
            debug!("halted at pc={:#06x}", vu.pc);
            return Ok(ExitReason::Halted);
        }
    }
    Ok(ExitReason::BlockLimit)
}

/// Translate with one flush-and-retry on a full buffer. `None` when
/// even an empty buffer is too small.
fn block_translate<B, D>(
    env: &mut ExecEnv<B>,
    decoder: &mut D,
    pc: u32,
    state: &PipelineState,
) -> JitResult<Option<usize>>
where
    B: HostCodeGen,
    D: Decoder + ?Sized,
{
    match env.translate(decoder, pc, state) {
        Ok((idx, _)) => return Ok(Some(idx)),
        Err(JitError::BufferFull { .. }) => env.flush(),
        Err(e) => return Err(e),
    }
    match env.translate(decoder, pc, state) {
        Ok((idx, _)) => Ok(Some(idx)),
        Err(JitError::BufferFull { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Execute one block through the prologue.
///
/// # Safety
/// `idx` must name a block emitted into `env.code_buf`.
unsafe fn cpu_block_exec<B: HostCodeGen>(
    env: &ExecEnv<B>,
    vu: &mut VuRegs,
    idx: usize,
) -> JitResult<u32> {
    env.code_buf.set_executable()?;
    let block = env.block_store.get(idx);

    // Prologue signature:
    //   fn(env: *mut VuRegs, block_ptr: *const u8) -> u32
    // RDI = env, RSI = block code pointer, returns EAX
    let prologue_fn: unsafe extern "C" fn(*mut VuRegs, *const u8) -> u32 =
        std::mem::transmute(env.code_buf.base_ptr());
    let block_ptr = env.code_buf.ptr_at(block.host_offset);
    Ok(prologue_fn(vu, block_ptr))
}
