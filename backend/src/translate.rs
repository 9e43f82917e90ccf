use crate::code_buffer::CodeBuffer;
use crate::HostCodeGen;
use vu_core::ir::MicroIr;

/// Worst-case host bytes for one instruction pair.
pub const MAX_OP_SIZE: usize = 256;
/// Worst-case host bytes for a block tail.
pub const MAX_BLOCK_END_SIZE: usize = 128;

/// Upper bound on the host code emitted for `ir`.
pub fn estimate_size(ir: &MicroIr) -> usize {
    ir.ops().len() * MAX_OP_SIZE + MAX_BLOCK_END_SIZE
}

/// Emit a finished IR. Returns the offset where block code starts in
/// the buffer.
pub fn translate(ir: &MicroIr, backend: &impl HostCodeGen, buf: &mut CodeBuffer) -> usize {
    let start = buf.offset();
    for op in ir.ops() {
        backend.emit_micro_op(buf, op);
    }
    backend.emit_block_end(buf, ir);
    start
}
