//! This module provides an `Error` type for the crate using the [`thiserror`] crate.
//!
//! Each variant corresponds to a distinct failure path in the engine: decode
//! and translation failures fail the compilation of a single guest function,
//! while state-machine violations and runtime traps are fatal and stop
//! dispatch entirely.

use thiserror::Error;

/// The `Error` type.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown or reserved PPC encoding.
    #[error("cannot decode instruction {word:#010x} at {address:#010x}")]
    Decode { address: u32, word: u32 },
    /// The front end rejected an instruction sequence.
    #[error("cannot translate `{mnemonic}` at {address:#010x}")]
    Translation {
        address: u32,
        mnemonic: &'static str,
    },
    /// A HIR invariant was broken during construction or a pass.
    #[error("IR invariant violated: {0}")]
    Ir(String),
    /// The back end could not lay out a function.
    #[error("cannot emit function at {address:#010x}: {reason}")]
    Emit { address: u32, reason: String },
    /// The code cache or guest memory is exhausted.
    #[error("out of memory")]
    Alloc,
    /// The guest address is not covered by any module.
    #[error("address {0:#010x} is outside every module")]
    Address(u32),
    /// The symbol-table state machine observed an impossible transition.
    #[error("invalid symbol state transition at {address:#010x}: {from:?} -> {to:?}")]
    State {
        address: u32,
        from: crate::runtime::SymbolStatus,
        to: crate::runtime::SymbolStatus,
    },
    /// A runtime trap raised by generated code or the fault handler.
    #[error("guest trap at {pc:#010x} (tag {tag})")]
    Trap { pc: u32, tag: u32 },
    /// A recognized but unavailable configuration was requested.
    #[error("unsupported configuration: {0}")]
    Unsupported(&'static str),
    /// Wraps [`std::io::Error`].
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Wraps [`mmap_rs::Error`].
    #[error(transparent)]
    Mmap(#[from] mmap_rs::Error),
    /// Wraps an error that originates from any calls to the [`nix`] crate.
    #[error(transparent)]
    Nix(#[from] nix::Error),
}
