//! The runtime: owns guest memory, the module list, the entry table, the
//! code cache and the debugger, and provides the on-demand
//! decode-optimize-emit path behind [`Runtime::resolve_function`].

pub mod debugger;
pub mod entry_table;
pub mod module;
pub mod thread_state;

pub use debugger::{DebugListener, Debugger};
pub use entry_table::{Entry, EntryStatus, EntryTable, Resolution};
pub use module::{Claim, Module, SymbolInfo, SymbolKind, SymbolStatus};
pub use thread_state::ThreadState;

use crate::backend::x64::{
    self, build_host_to_guest_thunk, vector_op_helper, CodeBlob, CodeCache, HelperTable,
    HostToGuestThunk,
};
use crate::config::{BackendKind, Config};
use crate::error::Error;
use crate::memory::Memory;
use crate::mmio::MmioHandler;
use crate::passes::Pipeline;
use crate::ppc::{scan_function, FunctionTranslator, PpcContext, ShimLookup};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// A registered kernel-export shim, invoked in place of guest code at its
/// address.
pub type Shim = Arc<dyn Fn(&mut PpcContext) + Send + Sync>;

pub struct Runtime {
    config: Config,
    memory: Arc<Memory>,
    cache: CodeCache,
    entry_table: EntryTable,
    modules: Mutex<Vec<Arc<Module>>>,
    /// Most modules resolve repeatedly; remember the last hit.
    last_module: Mutex<Option<Arc<Module>>>,
    debugger: Arc<Debugger>,
    shims: RwLock<HashMap<u32, Shim>>,
    thunk_blob: Arc<CodeBlob>,
    helpers: HelperTable,
    /// First fatal error (state violation or trap); dispatch stops once
    /// this is set.
    fatal: Mutex<Option<Error>>,
    mmio: Option<Arc<MmioHandler>>,
}

struct RuntimeShims<'a>(&'a Runtime);

impl ShimLookup for RuntimeShims<'_> {
    fn is_shim(&self, address: u32) -> bool {
        self.0.shims.read().unwrap().contains_key(&address)
    }
}

impl Runtime {
    pub fn new(memory: Arc<Memory>, config: Config) -> Result<Arc<Self>, Error> {
        match config.backend {
            BackendKind::Any | BackendKind::X64 => {}
            BackendKind::Ivm => {
                return Err(Error::Unsupported(
                    "the interpreter backend is not built into this crate",
                ))
            }
        }
        let cache = CodeCache::new();
        let thunk_blob = build_host_to_guest_thunk(&cache)?;
        let helpers = HelperTable {
            resolve_and_call: resolve_and_call_helper as usize,
            call_extern: call_extern_helper as usize,
            trap: trap_helper as usize,
            debug_break: debug_break_helper as usize,
            vector_op: vector_op_helper as usize,
        };
        let mmio = match MmioHandler::install(memory.membase(), memory.size()) {
            Ok(handler) => Some(handler),
            Err(_) => {
                // A second runtime in this process shares the existing
                // handler if its membase matches, otherwise runs without
                // MMIO trapping.
                MmioHandler::global()
            }
        };
        Ok(Arc::new(Self {
            config,
            memory,
            cache,
            entry_table: EntryTable::new(),
            modules: Mutex::new(Vec::new()),
            last_module: Mutex::new(None),
            debugger: Debugger::new(),
            shims: RwLock::new(HashMap::new()),
            thunk_blob,
            helpers,
            fatal: Mutex::new(None),
            mmio,
        }))
    }

    pub fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }

    pub fn debugger(&self) -> &Arc<Debugger> {
        &self.debugger
    }

    pub fn mmio(&self) -> Option<&Arc<MmioHandler>> {
        self.mmio.as_ref()
    }

    pub fn add_module(&self, module: Arc<Module>) -> Result<(), Error> {
        if let Some(dir) = &self.config.dump_module_map {
            let path = dir.join(format!("{}.map.txt", module.name));
            let mut out = std::fs::File::create(path)?;
            module.dump(&mut out)?;
        }
        info!(
            "module {} added [{:08X}..{:08X})",
            module.name,
            module.base,
            module.base as u64 + module.size as u64
        );
        self.modules.lock().unwrap().push(module);
        Ok(())
    }

    pub fn get_module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules
            .lock()
            .unwrap()
            .iter()
            .find(|module| module.name == name)
            .cloned()
    }

    fn find_module(&self, address: u32) -> Option<Arc<Module>> {
        if let Some(module) = self.last_module.lock().unwrap().clone() {
            if module.contains_address(address) {
                return Some(module);
            }
        }
        let found = self
            .modules
            .lock()
            .unwrap()
            .iter()
            .find(|module| module.contains_address(address))
            .cloned()?;
        *self.last_module.lock().unwrap() = Some(found.clone());
        Some(found)
    }

    /// Maps a guest address to a native function. Registered addresses
    /// compile to host thunk calls instead of guest code.
    pub fn register_shim(
        &self,
        address: u32,
        shim: impl Fn(&mut PpcContext) + Send + Sync + 'static,
    ) {
        self.shims.write().unwrap().insert(address, Arc::new(shim));
    }

    /// The key runtime API: host code for the guest function at `address`.
    /// Concurrent callers for the same address block until the single
    /// winning compilation publishes.
    pub fn resolve_function(&self, address: u32) -> Result<Arc<CodeBlob>, Error> {
        match self.entry_table.get_or_create(address) {
            Resolution::Ready(blob) => Ok(blob),
            Resolution::Failed => Err(Error::Emit {
                address,
                reason: "function previously failed to compile".into(),
            }),
            Resolution::MustResolve(entry) => match self.demand_function(address) {
                Ok((blob, end_address)) => {
                    entry.publish_ready(blob.clone(), end_address);
                    Ok(blob)
                }
                Err(error) => {
                    error!("compilation of {address:#010x} failed: {error}");
                    entry.publish_failed();
                    Err(error)
                }
            },
        }
    }

    /// Declares (scans) and defines (compiles) the function at `address`.
    fn demand_function(&self, address: u32) -> Result<(Arc<CodeBlob>, u32), Error> {
        let module = self.find_module(address).ok_or(Error::Address(address))?;

        let fetch = |pc: u32| -> Option<u32> {
            (self.memory.contains(pc, 4) && self.memory.is_committed(pc))
                .then(|| self.memory.load_u32_be(pc))
        };

        let (symbol, claim) = module.declare_function(address);
        match claim {
            Claim::Won => match scan_function(address, fetch) {
                Ok(extent) => {
                    debug!(
                        "declared fn_{address:08X} [{:08X}..{:08X}] truncated={}",
                        extent.start, extent.end, extent.truncated
                    );
                    symbol.set_declared(extent.end);
                }
                Err(error) => {
                    symbol.set_failed();
                    return Err(error);
                }
            },
            Claim::Failed => {
                return Err(Error::Emit {
                    address,
                    reason: "symbol previously failed".into(),
                })
            }
            Claim::Done => {}
        }

        let end_address = symbol.end_address();
        match module.define_function(&symbol) {
            Claim::Won => match self.define_symbol(address, end_address) {
                Ok(blob) => {
                    symbol.set_defined(blob.clone());
                    // Let the debugger see it before anyone dispatches it.
                    self.debugger.on_function_defined(&symbol);
                    Ok((blob, end_address))
                }
                Err(error) => {
                    symbol.set_failed();
                    Err(error)
                }
            },
            Claim::Done => {
                let blob = symbol.blob().ok_or_else(|| Error::State {
                    address,
                    from: SymbolStatus::Defined,
                    to: SymbolStatus::Defined,
                })?;
                Ok((blob, end_address))
            }
            Claim::Failed => Err(Error::Emit {
                address,
                reason: "symbol previously failed".into(),
            }),
        }
    }

    /// Front end -> passes -> back end for one function.
    fn define_symbol(&self, address: u32, end_address: u32) -> Result<Arc<CodeBlob>, Error> {
        let shims = RuntimeShims(self);
        let breakpoints = self.debugger.breakpoints_in_range(address, end_address);
        let mut translator =
            FunctionTranslator::new(address, end_address, &shims).with_breakpoints(breakpoints);
        translator.run(|pc| self.memory.load_u32_be(pc))?;
        let mut func = translator.finish();
        Pipeline::new(&self.config).run(&mut func)?;
        let emitted = x64::compile(&func, &self.helpers)?;
        self.cache
            .publish(address, &emitted.code, emitted.source_map)
    }

    /// Runs the guest function at `address` on `thread` to completion.
    pub fn execute(
        self: &Arc<Self>,
        thread: &Arc<ThreadState>,
        address: u32,
    ) -> Result<(), Error> {
        if let Some(error) = self.fatal.lock().unwrap().take() {
            return Err(error);
        }
        thread.bind(Arc::as_ptr(self) as *const core::ffi::c_void);
        let blob = self.resolve_function(address)?;
        let thunk: HostToGuestThunk =
            unsafe { std::mem::transmute(self.thunk_blob.entry()) };
        thunk(blob.entry(), thread.ctx_ptr(), self.memory.membase());
        ThreadState::unbind();
        if let Some(error) = self.fatal.lock().unwrap().take() {
            return Err(error);
        }
        Ok(())
    }

    fn record_fatal(&self, error: Error) {
        error!("fatal guest error: {error}");
        self.debugger.suspend_all_threads();
        let mut fatal = self.fatal.lock().unwrap();
        if fatal.is_none() {
            *fatal = Some(error);
        }
    }

    /// Invokes already-published code on the current thread.
    fn invoke(&self, blob: &CodeBlob, ctx: *mut PpcContext) {
        let thunk: HostToGuestThunk =
            unsafe { std::mem::transmute(self.thunk_blob.entry()) };
        thunk(blob.entry(), ctx, self.memory.membase());
    }

    /// The guest-code dispatch helper: resolve and run `target`.
    fn resolve_and_call(&self, ctx: *mut PpcContext, target: u32) {
        if let Some(thread) = ThreadState::current() {
            thread.check_suspend();
        }
        match self.resolve_function(target) {
            Ok(blob) => self.invoke(&blob, ctx),
            Err(error) => self.record_fatal(error),
        }
    }
}

// Helper entry points baked into generated code. The context's runtime
// back-pointer recovers the owning runtime.

unsafe fn runtime_of<'a>(ctx: *mut PpcContext) -> &'a Runtime {
    &*((*ctx).runtime as *const Runtime)
}

extern "C" fn resolve_and_call_helper(ctx: *mut PpcContext, target: u64) {
    let runtime = unsafe { runtime_of(ctx) };
    runtime.resolve_and_call(ctx, target as u32);
}

extern "C" fn call_extern_helper(ctx: *mut PpcContext, address: u64) {
    let runtime = unsafe { runtime_of(ctx) };
    let shim = runtime.shims.read().unwrap().get(&(address as u32)).cloned();
    match shim {
        Some(shim) => shim(unsafe { &mut *ctx }),
        None => {
            let pc = unsafe { (*ctx).pc };
            runtime.record_fatal(Error::Trap { pc, tag: 0xFF });
        }
    }
}

extern "C" fn trap_helper(ctx: *mut PpcContext, tag: u64) {
    let runtime = unsafe { runtime_of(ctx) };
    let pc = unsafe { (*ctx).pc };
    runtime.record_fatal(Error::Trap { pc, tag: tag as u32 });
}

extern "C" fn debug_break_helper(ctx: *mut PpcContext) {
    let runtime = unsafe { runtime_of(ctx) };
    let pc = unsafe { (*ctx).pc };
    let thread_id = ThreadState::current().map(|thread| thread.id).unwrap_or(0);
    // Peers stop; the hitting thread delivers the event and parks only if
    // a listener suspended it.
    runtime.debugger.on_breakpoint_hit(thread_id, pc);
    if let Some(thread) = ThreadState::current() {
        thread.check_suspend();
    }
}
