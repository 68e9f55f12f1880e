//! The PowerPC (Xenon) front end: architectural context, decode tables,
//! disassembler, function scanner and the per-opcode translators that
//! lower guest instructions into HIR.

pub mod context;
pub mod decode;
pub mod disasm;
pub mod instr;
pub mod scanner;
pub mod translate;

pub use context::{ContextInfo, PpcContext, CR_EQ, CR_GT, CR_LT, CR_SO};
pub use disasm::disasm;
pub use instr::PpcInstr;
pub use scanner::{scan_function, FunctionExtent, SCAN_BUDGET};
pub use translate::{FunctionTranslator, NoShims, ShimLookup};
