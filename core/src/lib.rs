pub mod block;
pub mod decode;
pub mod dump;
pub mod flags;
pub mod ir;
pub mod op;
pub mod regs;
pub mod state;
pub mod vu;

pub use block::{MicroBlock, EXIT_CONTINUE, EXIT_HALT};
pub use decode::{
    BranchKind, DecodeError, DecodedInsn, Decoder, FmacKind, FmacSrc, IntOp, LowerInsn,
    MicroProgram, UpperInsn,
};
pub use flags::{FlagCycles, FlagKind, FlagSet, MicroFlagInst, FLAG_INSTANCES, FLAG_LATENCY};
pub use ir::{BlockEnd, IrConfig, MicroIr, MicroTempRegInfo};
pub use op::{Hazard, MicroLowerOp, MicroOp, MicroUpperOp};
pub use regs::{Lanes, MicroVfReg, MicroViReg, RegInfo, NUM_VF, NUM_VI};
pub use state::{
    PipelineState, EXACT_FORCED, EXACT_SINGLE, EXACT_STALL, PIPELINE_STATE_SIZE, QUICK_LEN,
};
pub use vu::VuRegs;
