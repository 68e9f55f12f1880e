//! Per-guest-thread state: the architectural context, a guest stack, an
//! optional TLS slot, and host suspend/resume plumbing. A host
//! thread-local points at the active state so helpers called from
//! generated code can recover it.

use crate::memory::Memory;
use crate::ppc::{ContextInfo, PpcContext};
use log::debug;
use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static ACTIVE_THREAD: Cell<*const ThreadState> = const { Cell::new(std::ptr::null()) };
}

pub struct ThreadState {
    pub id: u32,
    /// Boxed so the pointer baked into generated code stays stable.
    ctx: Box<PpcContext>,
    memory: Arc<Memory>,
    pub stack_base: u32,
    pub stack_size: u32,
    pub tls_address: u32,
    suspended: Mutex<bool>,
    resume_cond: Condvar,
}

// The raw pointers in the context are stable back-references; the context
// is only touched cross-thread while the owning thread is suspended.
unsafe impl Send for ThreadState {}
unsafe impl Sync for ThreadState {}

impl ThreadState {
    /// Creates a thread state with a guest stack carved out of guest
    /// memory; r1 points at the top with the ABI back-chain slot zeroed.
    pub fn new(
        memory: Arc<Memory>,
        stack_size: u32,
        tls_size: u32,
    ) -> Result<Arc<Self>, crate::error::Error> {
        let stack_base = memory.alloc(stack_size)?;
        let tls_address = if tls_size > 0 {
            memory.alloc(tls_size)?
        } else {
            0
        };
        let mut ctx = Box::new(PpcContext::new());
        ctx.membase = memory.membase();
        let stack_top = stack_base + stack_size - 0x10;
        ctx.r[1] = stack_top as u64;
        ctx.r[13] = tls_address as u64;
        memory.store_u64_be(stack_top, 0);
        let state = Arc::new(Self {
            id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            ctx,
            memory,
            stack_base,
            stack_size,
            tls_address,
            suspended: Mutex::new(false),
            resume_cond: Condvar::new(),
        });
        debug!(
            "thread {} created, stack [{:08X}..{:08X})",
            state.id,
            stack_base,
            stack_base + stack_size
        );
        Ok(state)
    }

    /// The context pointer generated code receives. The context is owned
    /// by this thread while guest code runs; the debugger only reads it
    /// while the thread is known-suspended.
    #[allow(clippy::mut_from_ref)]
    pub fn ctx_ptr(&self) -> *mut PpcContext {
        (&*self.ctx as *const PpcContext).cast_mut()
    }

    pub fn ctx(&self) -> &PpcContext {
        &self.ctx
    }

    /// Marks this state active on the current host thread and wires the
    /// back-pointer generated code uses.
    pub fn bind(self: &Arc<Self>, runtime: *const core::ffi::c_void) {
        unsafe {
            (*self.ctx_ptr()).runtime = runtime;
            (*self.ctx_ptr()).thread_state =
                Arc::as_ptr(self) as *const core::ffi::c_void;
        }
        ACTIVE_THREAD.with(|active| active.set(Arc::as_ptr(self)));
    }

    pub fn unbind() {
        ACTIVE_THREAD.with(|active| active.set(std::ptr::null()));
    }

    /// The state bound to the calling host thread, if any.
    pub fn current() -> Option<&'static ThreadState> {
        ACTIVE_THREAD.with(|active| {
            let ptr = active.get();
            if ptr.is_null() {
                None
            } else {
                Some(unsafe { &*ptr })
            }
        })
    }

    /// Requests suspension; the thread parks at its next safepoint.
    pub fn suspend(&self) {
        *self.suspended.lock().unwrap() = true;
    }

    pub fn resume(&self) {
        let mut suspended = self.suspended.lock().unwrap();
        *suspended = false;
        self.resume_cond.notify_all();
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended.lock().unwrap()
    }

    /// Parks until resumed if a suspension is pending. Called from host
    /// helpers; generated code itself never blocks.
    pub fn check_suspend(&self) {
        let mut suspended = self.suspended.lock().unwrap();
        while *suspended {
            suspended = self.resume_cond.wait(suspended).unwrap();
        }
    }

    /// Bumps the time base the guest reads through mftb.
    pub fn tick_time_base(&self, delta: u64) {
        unsafe {
            (*self.ctx_ptr()).tb = (*self.ctx_ptr()).tb.wrapping_add(delta);
        }
    }
}

impl Drop for ThreadState {
    fn drop(&mut self) {
        self.memory.free(self.stack_base, self.stack_size);
        debug!("thread {} destroyed", self.id);
    }
}

// Offsets used by generated code are derived from the same descriptor
// everywhere; keep the back-pointer slots in sync with it.
const _: () = {
    assert!(ContextInfo::thread_state() > ContextInfo::membase());
};

#[cfg(test)]
mod tests {
    use super::*;

    fn test_memory() -> Arc<Memory> {
        Arc::new(Memory::new(1 << 24).unwrap())
    }

    #[test]
    fn stack_lives_in_guest_memory() {
        let memory = test_memory();
        let thread = ThreadState::new(memory.clone(), 0x10000, 0x1000).unwrap();
        assert!(memory.is_committed(thread.stack_base));
        let r1 = thread.ctx().r[1] as u32;
        assert!(r1 > thread.stack_base);
        assert!(r1 < thread.stack_base + thread.stack_size);
        assert_eq!(thread.ctx().r[13] as u32, thread.tls_address);
    }

    #[test]
    fn bind_sets_thread_local() {
        let memory = test_memory();
        let thread = ThreadState::new(memory, 0x10000, 0).unwrap();
        assert!(ThreadState::current().is_none());
        thread.bind(std::ptr::null());
        assert_eq!(ThreadState::current().unwrap().id, thread.id);
        ThreadState::unbind();
        assert!(ThreadState::current().is_none());
    }

    #[test]
    fn suspend_resume_round_trip() {
        let memory = test_memory();
        let thread = ThreadState::new(memory, 0x10000, 0).unwrap();
        assert!(!thread.is_suspended());
        thread.suspend();
        assert!(thread.is_suspended());
        thread.resume();
        assert!(!thread.is_suspended());
        // check_suspend returns immediately when not suspended.
        thread.check_suspend();
    }
}
