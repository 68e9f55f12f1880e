//! Machine back ends. Only x86-64 is built into this crate; the runtime
//! selects it through [`crate::config::BackendKind`].

pub mod x64;
