//! The x86-64 back end: lowering table, register assignment, code
//! emission, code cache and the transition thunks.

pub mod asm;
pub mod code_cache;
pub mod emitter;
pub mod lowering;
pub mod regalloc;
pub mod thunk;

pub use code_cache::{CodeBlob, CodeCache};
pub use emitter::{EmittedFunction, HelperTable, SourceMapEntry, X64Emitter};
pub use thunk::{build_host_to_guest_thunk, vector_op_helper, HostToGuestThunk};

use crate::error::Error;
use crate::hir::HirFunction;

/// Compiles one finalized function to a staged blob; publication into the
/// cache is the caller's (the runtime's) move.
pub fn compile(func: &HirFunction, helpers: &HelperTable) -> Result<EmittedFunction, Error> {
    let allocation = regalloc::allocate(func);
    X64Emitter::emit(func, &allocation, helpers)
}
