pub mod codegen;
pub mod emitter;
pub mod groups;
pub mod mem;
pub mod regs;

pub use codegen::X86_64CodeGen;
pub use mem::{Index, Mem, MemStrict, Scale};
pub use regs::{Gpr, Reg, Xmm};
