//! Modules and their symbol database.
//!
//! A module owns the map from guest address to symbol and the declare/
//! define state machine guarding each one. The machine moves
//! `New -> Declaring -> Declared -> Defining -> Defined` (or `Failed`),
//! with exactly one thread winning each transient state; observers of a
//! transient state block on the symbol's condvar instead of spinning.

use crate::backend::x64::CodeBlob;
use crate::error::Error;
use log::{debug, info};
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::{Arc, Condvar, Mutex};

/// Lifecycle of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolStatus {
    New,
    Declaring,
    Declared,
    Defining,
    Defined,
    Failed,
}

/// What a symbol is, and the per-kind payload.
pub enum SymbolKind {
    Function {
        /// Address of the final instruction, established at declaration.
        end_address: u32,
        /// Published code, present once defined.
        blob: Option<Arc<CodeBlob>>,
        /// Breakpoint addresses the debugger has installed in the range.
        breakpoints: Vec<u32>,
    },
    Variable,
}

pub struct SymbolData {
    pub status: SymbolStatus,
    pub name: Option<String>,
    pub kind: SymbolKind,
}

/// One symbol slot. Shared out as `Arc`; the inner mutex serializes the
/// state machine and the condvar wakes threads waiting out a transient
/// state.
pub struct SymbolInfo {
    pub address: u32,
    state: Mutex<SymbolData>,
    cond: Condvar,
}

impl SymbolInfo {
    fn new_function(address: u32) -> Arc<Self> {
        Arc::new(Self {
            address,
            state: Mutex::new(SymbolData {
                status: SymbolStatus::New,
                name: None,
                kind: SymbolKind::Function {
                    end_address: address,
                    blob: None,
                    breakpoints: Vec::new(),
                },
            }),
            cond: Condvar::new(),
        })
    }

    pub fn status(&self) -> SymbolStatus {
        self.state.lock().unwrap().status
    }

    pub fn name(&self) -> Option<String> {
        self.state.lock().unwrap().name.clone()
    }

    pub fn set_name(&self, name: String) {
        self.state.lock().unwrap().name = Some(name);
    }

    pub fn end_address(&self) -> u32 {
        match &self.state.lock().unwrap().kind {
            SymbolKind::Function { end_address, .. } => *end_address,
            SymbolKind::Variable => self.address,
        }
    }

    pub fn blob(&self) -> Option<Arc<CodeBlob>> {
        match &self.state.lock().unwrap().kind {
            SymbolKind::Function { blob, .. } => blob.clone(),
            SymbolKind::Variable => None,
        }
    }

    pub fn add_breakpoint(&self, address: u32) {
        if let SymbolKind::Function { breakpoints, .. } =
            &mut self.state.lock().unwrap().kind
        {
            if !breakpoints.contains(&address) {
                breakpoints.push(address);
            }
        }
    }

    pub fn breakpoints(&self) -> Vec<u32> {
        match &self.state.lock().unwrap().kind {
            SymbolKind::Function { breakpoints, .. } => breakpoints.clone(),
            SymbolKind::Variable => Vec::new(),
        }
    }

    /// Publishes the declaration result and releases waiters.
    pub fn set_declared(&self, end_address: u32) {
        let mut state = self.state.lock().unwrap();
        if let SymbolKind::Function {
            end_address: slot, ..
        } = &mut state.kind
        {
            *slot = end_address;
        }
        state.status = SymbolStatus::Declared;
        self.cond.notify_all();
    }

    /// Publishes the definition and releases waiters.
    pub fn set_defined(&self, blob: Arc<CodeBlob>) {
        let mut state = self.state.lock().unwrap();
        if let SymbolKind::Function { blob: slot, .. } = &mut state.kind {
            *slot = Some(blob);
        }
        state.status = SymbolStatus::Defined;
        self.cond.notify_all();
    }

    pub fn set_failed(&self) {
        let mut state = self.state.lock().unwrap();
        state.status = SymbolStatus::Failed;
        self.cond.notify_all();
    }
}

/// Outcome of an atomic declare or define attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Caller won the transient state and must finish the transition.
    Won,
    /// Someone else already completed it.
    Done,
    Failed,
}

/// A loaded guest module: a named address range plus its symbols.
pub struct Module {
    pub name: String,
    pub base: u32,
    pub size: u32,
    symbols: Mutex<HashMap<u32, Arc<SymbolInfo>>>,
    /// Insertion order, for deterministic dumps.
    order: Mutex<Vec<u32>>,
}

impl Module {
    pub fn new(name: impl Into<String>, base: u32, size: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            base,
            size,
            symbols: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        })
    }

    pub fn contains_address(&self, address: u32) -> bool {
        address >= self.base && (address as u64) < self.base as u64 + self.size as u64
    }

    pub fn lookup_symbol(&self, address: u32) -> Option<Arc<SymbolInfo>> {
        self.symbols.lock().unwrap().get(&address).cloned()
    }

    /// Atomically finds or creates the function symbol at `address`. On
    /// `Claim::Won` the caller owns the `Declaring` state and must call
    /// `set_declared` or `set_failed`. Waits out another thread's
    /// declaration instead of spinning.
    pub fn declare_function(&self, address: u32) -> (Arc<SymbolInfo>, Claim) {
        let symbol = {
            let mut symbols = self.symbols.lock().unwrap();
            match symbols.get(&address) {
                Some(symbol) => symbol.clone(),
                None => {
                    let symbol = SymbolInfo::new_function(address);
                    symbols.insert(address, symbol.clone());
                    self.order.lock().unwrap().push(address);
                    symbol
                }
            }
        };
        let mut state = symbol.state.lock().unwrap();
        loop {
            match state.status {
                SymbolStatus::New => {
                    state.status = SymbolStatus::Declaring;
                    drop(state);
                    return (symbol, Claim::Won);
                }
                SymbolStatus::Declaring => {
                    state = symbol.cond.wait(state).unwrap();
                }
                SymbolStatus::Failed => {
                    drop(state);
                    return (symbol, Claim::Failed);
                }
                _ => {
                    drop(state);
                    return (symbol, Claim::Done);
                }
            }
        }
    }

    /// Atomically claims the `Defining` state of a declared symbol.
    pub fn define_function(&self, symbol: &Arc<SymbolInfo>) -> Claim {
        let mut state = symbol.state.lock().unwrap();
        loop {
            match state.status {
                SymbolStatus::Declared => {
                    state.status = SymbolStatus::Defining;
                    return Claim::Won;
                }
                SymbolStatus::Defining => {
                    state = symbol.cond.wait(state).unwrap();
                }
                SymbolStatus::Defined => return Claim::Done,
                SymbolStatus::Failed => return Claim::Failed,
                status => {
                    // Declare must complete before define can start.
                    log::error!(
                        "define observed impossible status {status:?} at {:#010x}",
                        symbol.address
                    );
                    return Claim::Failed;
                }
            }
        }
    }

    /// Reads a linker map file to give symbols names. Line format:
    /// `<ignored> <name> <hex-address> <type>` where type `f` marks a
    /// function.
    pub fn read_map(&self, reader: impl BufRead) -> Result<usize, Error> {
        let mut named = 0;
        for line in reader.lines() {
            let line = line?;
            let mut parts = line.split_whitespace();
            let (Some(_), Some(name), Some(address), Some(kind)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Ok(address) = u32::from_str_radix(address.trim_start_matches("0x"), 16)
            else {
                continue;
            };
            if kind != "f" || !self.contains_address(address) {
                continue;
            }
            let (symbol, claim) = self.declare_function(address);
            if claim == Claim::Won {
                // Name-only declaration; the front end will size it later.
                symbol.set_name(name.to_string());
                let mut state = symbol.state.lock().unwrap();
                state.status = SymbolStatus::New;
                symbol.cond.notify_all();
            } else {
                symbol.set_name(name.to_string());
            }
            named += 1;
        }
        info!("named {named} symbols in module {}", self.name);
        Ok(named)
    }

    /// Writes a human-readable symbol dump, one line per symbol in
    /// insertion order.
    pub fn dump(&self, out: &mut impl std::io::Write) -> Result<(), Error> {
        writeln!(
            out,
            "; module {} [{:08X}..{:08X})",
            self.name,
            self.base,
            self.base as u64 + self.size as u64
        )?;
        let order = self.order.lock().unwrap().clone();
        for address in order {
            let Some(symbol) = self.lookup_symbol(address) else {
                continue;
            };
            let state = symbol.state.lock().unwrap();
            let kind = match state.kind {
                SymbolKind::Function { end_address, .. } => {
                    format!("fn  [{address:08X}..{end_address:08X}]")
                }
                SymbolKind::Variable => format!("var [{address:08X}]"),
            };
            writeln!(
                out,
                "{kind} {:?} {}",
                state.status,
                state.name.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.lock().unwrap().len()
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        debug!("dropping module {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_is_atomic_and_waits() {
        let module = Module::new("test.xex", 0x8200_0000, 0x1000_0000);
        let (symbol, claim) = module.declare_function(0x8201_0000);
        assert_eq!(claim, Claim::Won);
        symbol.set_declared(0x8201_0010);

        let (again, claim) = module.declare_function(0x8201_0000);
        assert_eq!(claim, Claim::Done);
        assert!(Arc::ptr_eq(&symbol, &again));
        assert_eq!(again.end_address(), 0x8201_0010);
        assert_eq!(module.symbol_count(), 1);
    }

    #[test]
    fn define_requires_declared() {
        let module = Module::new("test.xex", 0x8200_0000, 0x1000_0000);
        let (symbol, _) = module.declare_function(0x8201_0000);
        symbol.set_declared(0x8201_0004);
        assert_eq!(module.define_function(&symbol), Claim::Won);
        symbol.set_failed();
        assert_eq!(module.define_function(&symbol), Claim::Failed);
    }

    #[test]
    fn read_map_names_functions() {
        let module = Module::new("test.xex", 0x8200_0000, 0x1000_0000);
        let map = "\
 0001:00000000 _start 82010000 f
 0001:00000010 g_data 82020000 d
 malformed line
 0001:00000020 helper 82010020 f
";
        let named = module.read_map(std::io::Cursor::new(map)).unwrap();
        assert_eq!(named, 2);
        let symbol = module.lookup_symbol(0x8201_0000).unwrap();
        assert_eq!(symbol.name().as_deref(), Some("_start"));
        // Map entries do not consume the declaration state machine.
        assert_eq!(symbol.status(), SymbolStatus::New);
        assert!(module.lookup_symbol(0x8202_0000).is_none());
    }

    #[test]
    fn contains_address_respects_bounds() {
        let module = Module::new("m", 0x1000, 0x100);
        assert!(module.contains_address(0x1000));
        assert!(module.contains_address(0x10FF));
        assert!(!module.contains_address(0x1100));
        assert!(!module.contains_address(0xFFF));
    }
}
