pub mod code_buffer;
pub mod translate;
pub mod x86_64;

pub use code_buffer::CodeBuffer;
pub use x86_64::X86_64CodeGen;

use vu_core::ir::MicroIr;
use vu_core::op::MicroOp;

/// Trait for host architecture code generators.
///
/// A generator lowers the finished pipeline IR of one block, cycle by
/// cycle, into host code that runs against the guest `VuRegs`.
pub trait HostCodeGen {
    /// Emit the prologue: save callee-saved registers, set up
    /// env pointer, allocate stack frame, jump to block code.
    fn emit_prologue(&mut self, buf: &mut CodeBuffer);

    /// Emit the epilogue: restore callee-saved registers,
    /// deallocate stack frame, return to caller.
    fn emit_epilogue(&mut self, buf: &mut CodeBuffer);

    /// Return the offset of the block return path.
    fn epilogue_offset(&self) -> usize;

    /// Emit host code for one instruction pair.
    fn emit_micro_op(&self, buf: &mut CodeBuffer, op: &MicroOp);

    /// Emit the block tail: publish flag instances, normalize Q/P,
    /// account cycles, set the next pc and leave through the epilogue.
    fn emit_block_end(&self, buf: &mut CodeBuffer, ir: &MicroIr);
}
