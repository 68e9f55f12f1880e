//! Runtime configuration recognized at startup.

use std::path::PathBuf;

/// Which back end the runtime should instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Pick the best back end available on this host.
    #[default]
    Any,
    /// The interpreter back end. Recognized but not built into this crate;
    /// selecting it fails runtime initialization.
    Ivm,
    /// The x86-64 JIT back end.
    X64,
}

impl BackendKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "any" => Some(Self::Any),
            "ivm" => Some(Self::Ivm),
            "x64" => Some(Self::X64),
            _ => None,
        }
    }
}

/// Options honored by [`crate::runtime::Runtime`] construction.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Back end selection (`runtime_backend`).
    pub backend: BackendKind,
    /// Keep dead context stores so every architectural register update is
    /// visible when single-stepping (`store_all_context_values`).
    pub store_all_context_values: bool,
    /// If set, write a human-readable symbol dump of each loaded module to
    /// this directory (`dump_module_map`).
    pub dump_module_map: Option<PathBuf>,
}
