//! The debugger façade: event listeners, the address-keyed breakpoint
//! multimap, and thread suspend bookkeeping.
//!
//! Events fire on the thread whose action caused them. Breakpoints
//! registered before a function is defined are installed into its symbol
//! at definition time; the front end emits a break for every installed
//! address it translates.

use crate::runtime::module::SymbolInfo;
use crate::runtime::thread_state::ThreadState;
use log::info;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

/// Embedder-facing event sink. All callbacks run on the causing thread.
pub trait DebugListener: Send + Sync {
    fn on_thread_created(&self, _thread_id: u32) {}
    fn on_thread_destroyed(&self, _thread_id: u32) {}
    fn on_function_defined(&self, _symbol: &SymbolInfo) {}
    fn on_breakpoint_hit(&self, _thread_id: u32, _address: u32) {}
}

impl<T: DebugListener + ?Sized> DebugListener for Arc<T> {
    fn on_thread_created(&self, thread_id: u32) {
        (**self).on_thread_created(thread_id)
    }
    fn on_thread_destroyed(&self, thread_id: u32) {
        (**self).on_thread_destroyed(thread_id)
    }
    fn on_function_defined(&self, symbol: &SymbolInfo) {
        (**self).on_function_defined(symbol)
    }
    fn on_breakpoint_hit(&self, thread_id: u32, address: u32) {
        (**self).on_breakpoint_hit(thread_id, address)
    }
}

struct Registered {
    thread: Arc<ThreadState>,
}

pub struct Debugger {
    listeners: RwLock<Vec<Box<dyn DebugListener>>>,
    /// Breakpoint addresses; the value counts registrations at the same
    /// address so removal behaves like a multimap.
    breakpoints: Mutex<BTreeMap<u32, u32>>,
    threads: Mutex<Vec<Registered>>,
}

impl Debugger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: RwLock::new(Vec::new()),
            breakpoints: Mutex::new(BTreeMap::new()),
            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn add_listener(&self, listener: Box<dyn DebugListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn add_breakpoint(&self, address: u32) {
        *self.breakpoints.lock().unwrap().entry(address).or_insert(0) += 1;
        info!("breakpoint added at {address:#010x}");
    }

    pub fn remove_breakpoint(&self, address: u32) {
        let mut breakpoints = self.breakpoints.lock().unwrap();
        if let Some(count) = breakpoints.get_mut(&address) {
            *count -= 1;
            if *count == 0 {
                breakpoints.remove(&address);
            }
        }
    }

    /// Breakpoints within `[start, end]`, for translation and installs.
    pub fn breakpoints_in_range(&self, start: u32, end: u32) -> Vec<u32> {
        self.breakpoints
            .lock()
            .unwrap()
            .range(start..=end)
            .map(|(address, _)| *address)
            .collect()
    }

    // Thread registry.

    pub fn register_thread(&self, thread: Arc<ThreadState>) {
        let id = thread.id;
        self.threads.lock().unwrap().push(Registered { thread });
        for listener in self.listeners.read().unwrap().iter() {
            listener.on_thread_created(id);
        }
    }

    pub fn deregister_thread(&self, thread_id: u32) {
        self.threads
            .lock()
            .unwrap()
            .retain(|registered| registered.thread.id != thread_id);
        for listener in self.listeners.read().unwrap().iter() {
            listener.on_thread_destroyed(thread_id);
        }
    }

    /// Definition hook: install matching breakpoints into the symbol and
    /// notify listeners.
    pub fn on_function_defined(&self, symbol: &Arc<SymbolInfo>) {
        for address in self.breakpoints_in_range(symbol.address, symbol.end_address()) {
            symbol.add_breakpoint(address);
        }
        for listener in self.listeners.read().unwrap().iter() {
            listener.on_function_defined(symbol);
        }
    }

    /// Breakpoint delivery: suspend every registered thread except the
    /// one that hit, then fire the event on the hitting thread.
    pub fn on_breakpoint_hit(&self, thread_id: u32, address: u32) {
        info!("breakpoint hit at {address:#010x} on thread {thread_id}");
        self.suspend_all_except(Some(thread_id));
        for listener in self.listeners.read().unwrap().iter() {
            listener.on_breakpoint_hit(thread_id, address);
        }
    }

    pub fn suspend_all_threads(&self) {
        self.suspend_all_except(None);
    }

    fn suspend_all_except(&self, skip: Option<u32>) {
        for registered in self.threads.lock().unwrap().iter() {
            if Some(registered.thread.id) != skip {
                registered.thread.suspend();
            }
        }
    }

    pub fn resume_all_threads(&self) {
        for registered in self.threads.lock().unwrap().iter() {
            registered.thread.resume();
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingListener {
        defined: AtomicU32,
        hits: AtomicU32,
    }

    impl DebugListener for &'static CountingListener {
        fn on_function_defined(&self, _symbol: &SymbolInfo) {
            self.defined.fetch_add(1, Ordering::SeqCst);
        }
        fn on_breakpoint_hit(&self, _thread_id: u32, _address: u32) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn breakpoint_multimap_counts_registrations() {
        let debugger = Debugger::new();
        debugger.add_breakpoint(0x1000);
        debugger.add_breakpoint(0x1000);
        debugger.add_breakpoint(0x2000);
        assert_eq!(debugger.breakpoints_in_range(0, u32::MAX), vec![0x1000, 0x2000]);
        debugger.remove_breakpoint(0x1000);
        assert_eq!(debugger.breakpoints_in_range(0, u32::MAX), vec![0x1000, 0x2000]);
        debugger.remove_breakpoint(0x1000);
        assert_eq!(debugger.breakpoints_in_range(0, u32::MAX), vec![0x2000]);
    }

    #[test]
    fn range_query_bounds() {
        let debugger = Debugger::new();
        debugger.add_breakpoint(0x1000);
        debugger.add_breakpoint(0x1010);
        debugger.add_breakpoint(0x2000);
        assert_eq!(debugger.breakpoints_in_range(0x1000, 0x1010), vec![0x1000, 0x1010]);
        assert_eq!(debugger.breakpoints_in_range(0x1004, 0x100C), Vec::<u32>::new());
    }
}
