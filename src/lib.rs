//! The xenonvm crate: the guest-code execution engine of an Xbox-360
//! emulator. It turns PowerPC64 (Xenon, with the VMX128 vector extension)
//! guest instructions into executable x86-64 host code and runs them
//! against a simulated guest machine.
//!
//! The core consists of:
//!  * a PPC front end (decode tables, disassembler, per-opcode
//!    translators);
//!  * a machine-independent SSA-like intermediate representation with a
//!    builder API and a small optimization pipeline;
//!  * an x86-64 back end (lowering, linear-scan register assignment, code
//!    emission, an on-demand code cache);
//!  * a runtime owning the guest address space, a symbol database,
//!    per-thread guest contexts, an entry table and a debugger façade.
//!
//! Loaders, the virtual file system, kernel export shims, GPU and audio
//! are external collaborators: they see thread context read/write, symbol
//! declaration callbacks, a guest memory view, MMIO range registration
//! and the host-function hook for guest call targets.

pub mod backend;
pub mod config;
pub mod error;
pub mod hir;
pub mod memory;
pub mod mmio;
pub mod passes;
pub mod ppc;
pub mod runtime;
pub mod vec128;

pub use config::{BackendKind, Config};
pub use error::Error;
pub use memory::{Memory, Protect};
pub use mmio::MmioHandler;
pub use runtime::{DebugListener, Debugger, Module, Runtime, ThreadState};
pub use vec128::Vec128;
