//! Memory-mapped I/O ranges and the host fault handler that services them.
//!
//! Collaborators (GPU, audio) register guest physical ranges with read and
//! write callbacks. Generated code accesses those ranges like ordinary
//! guest memory; the pages are left uncommitted, so the access raises
//! SIGSEGV, and the handler decodes the faulting instruction. If it is one
//! of the simple `mov` forms the back end emits for guest accesses, the
//! callback is dispatched and execution resumes past the instruction. Any
//! other fault is fatal.

use crate::error::Error;
use log::error;
use once_cell::sync::OnceCell;
use rangemap::RangeMap;
use std::sync::{Arc, RwLock};

/// Reads a value from an MMIO register. The argument is the guest address.
pub type MmioReadFn = Box<dyn Fn(u32) -> u32 + Send + Sync>;
/// Writes a value to an MMIO register.
pub type MmioWriteFn = Box<dyn Fn(u32, u32) + Send + Sync>;

struct MmioRange {
    read: MmioReadFn,
    write: MmioWriteFn,
}

/// The process-wide MMIO handler. There can be only one, installed by the
/// runtime over its guest space.
pub struct MmioHandler {
    membase: usize,
    size: u64,
    ranges: RwLock<RangeMap<u32, usize>>,
    callbacks: RwLock<Vec<Arc<MmioRange>>>,
}

static GLOBAL_HANDLER: OnceCell<Arc<MmioHandler>> = OnceCell::new();

impl MmioHandler {
    /// Installs the handler over `membase..membase + size` and hooks
    /// SIGSEGV. Fails if a handler is already installed.
    pub fn install(membase: *mut u8, size: u64) -> Result<Arc<MmioHandler>, Error> {
        let handler = Arc::new(MmioHandler {
            membase: membase as usize,
            size,
            ranges: RwLock::new(RangeMap::new()),
            callbacks: RwLock::new(Vec::new()),
        });
        GLOBAL_HANDLER
            .set(handler.clone())
            .map_err(|_| Error::Ir("MMIO handler already installed".into()))?;
        unsafe {
            use nix::sys::signal;
            let action = signal::SigAction::new(
                signal::SigHandler::SigAction(segv_handler),
                signal::SaFlags::SA_SIGINFO,
                signal::SigSet::empty(),
            );
            signal::sigaction(signal::Signal::SIGSEGV, &action)?;
        }
        Ok(handler)
    }

    /// Returns the installed handler, if any.
    pub fn global() -> Option<Arc<MmioHandler>> {
        GLOBAL_HANDLER.get().cloned()
    }

    /// Registers `guest..guest + len` for MMIO dispatch.
    pub fn register_range(&self, guest: u32, len: u32, read: MmioReadFn, write: MmioWriteFn) {
        let mut callbacks = self.callbacks.write().unwrap();
        let index = callbacks.len();
        callbacks.push(Arc::new(MmioRange { read, write }));
        self.ranges
            .write()
            .unwrap()
            .insert(guest..guest + len, index);
    }

    fn lookup(&self, guest: u32) -> Option<Arc<MmioRange>> {
        let index = *self.ranges.read().unwrap().get(&guest)?;
        Some(self.callbacks.read().unwrap()[index].clone())
    }

    /// Dispatches a load if `guest` is a registered MMIO address.
    pub fn check_load(&self, guest: u32) -> Option<u32> {
        let range = self.lookup(guest)?;
        Some((range.read)(guest))
    }

    /// Dispatches a store if `guest` is a registered MMIO address.
    pub fn check_store(&self, guest: u32, value: u32) -> bool {
        match self.lookup(guest) {
            Some(range) => {
                (range.write)(guest, value);
                true
            }
            None => false,
        }
    }

    /// Services an access fault. Returns true when the fault was an MMIO
    /// access that has been emulated and skipped.
    fn handle_fault(&self, uctx: *mut libc::c_void, fault_address: usize) -> bool {
        if fault_address < self.membase
            || fault_address >= self.membase + self.size as usize
        {
            return false;
        }
        let guest = (fault_address - self.membase) as u32;
        let range = match self.lookup(guest) {
            Some(range) => range,
            None => return false,
        };

        let uctx = uctx as *mut libc::ucontext_t;
        let rip = unsafe { (*uctx).uc_mcontext.gregs[libc::REG_RIP as usize] } as usize;
        let mov = match decode_mov(unsafe { std::slice::from_raw_parts(rip as *const u8, 15) }) {
            Some(mov) => mov,
            None => return false,
        };

        // Guest memory is big-endian: mirror the swap the generated code
        // would have performed itself on a committed page.
        unsafe {
            let greg = &mut (*uctx).uc_mcontext.gregs[greg_index(mov.reg)];
            if mov.is_load {
                let value = (range.read)(guest);
                *greg = match mov.width {
                    1 => value as u8 as i64,
                    2 => (value as u16).swap_bytes() as i64,
                    _ => (value).swap_bytes() as i64,
                };
            } else {
                let raw = *greg as u64;
                let value = match mov.width {
                    1 => raw as u8 as u32,
                    2 => (raw as u16).swap_bytes() as u32,
                    _ => (raw as u32).swap_bytes(),
                };
                (range.write)(guest, value);
            }
            (*uctx).uc_mcontext.gregs[libc::REG_RIP as usize] = (rip + mov.len) as i64;
        }
        true
    }
}

struct DecodedMov {
    len: usize,
    /// x86 register number (REX.R folded in) moved to or from memory.
    reg: u8,
    width: u8,
    is_load: bool,
}

/// Decodes the subset of `mov` forms the back end (and rustc, for the
/// host-side helpers) emits against guest memory. Returns None for
/// anything else so the caller can treat the fault as fatal.
fn decode_mov(bytes: &[u8]) -> Option<DecodedMov> {
    let mut at = 0;
    let mut width = 4u8;
    // Legacy operand-size prefix.
    if bytes[at] == 0x66 {
        width = 2;
        at += 1;
    }
    let mut rex = 0u8;
    if bytes[at] & 0xF0 == 0x40 {
        rex = bytes[at];
        at += 1;
    }
    if rex & 0x08 != 0 {
        width = 8;
    }
    let (is_load, reg_width) = match bytes[at] {
        0x88 => (false, Some(1)),
        0x89 => (false, None),
        0x8A => (true, Some(1)),
        0x8B => (true, None),
        0x0F => {
            // movzx r32, r/m8 / r/m16
            at += 1;
            match bytes[at] {
                0xB6 => (true, Some(1)),
                0xB7 => (true, Some(2)),
                _ => return None,
            }
        }
        _ => return None,
    };
    if let Some(w) = reg_width {
        width = w;
    }
    at += 1;

    let modrm = bytes[at];
    at += 1;
    let md = modrm >> 6;
    let rm = modrm & 0x07;
    if md == 0b11 {
        // Register-to-register cannot fault.
        return None;
    }
    if rm == 0b100 {
        // SIB byte.
        let sib = bytes[at];
        at += 1;
        if md == 0b00 && sib & 0x07 == 0b101 {
            at += 4;
        }
    } else if md == 0b00 && rm == 0b101 {
        // RIP-relative.
        at += 4;
    }
    match md {
        0b01 => at += 1,
        0b10 => at += 4,
        _ => {}
    }

    let reg = ((modrm >> 3) & 0x07) | ((rex & 0x04) << 1);
    Some(DecodedMov {
        len: at,
        reg,
        width,
        is_load,
    })
}

/// Maps an x86 register number to its index in `uc_mcontext.gregs`.
fn greg_index(reg: u8) -> usize {
    (match reg {
        0 => libc::REG_RAX,
        1 => libc::REG_RCX,
        2 => libc::REG_RDX,
        3 => libc::REG_RBX,
        4 => libc::REG_RSP,
        5 => libc::REG_RBP,
        6 => libc::REG_RSI,
        7 => libc::REG_RDI,
        8 => libc::REG_R8,
        9 => libc::REG_R9,
        10 => libc::REG_R10,
        11 => libc::REG_R11,
        12 => libc::REG_R12,
        13 => libc::REG_R13,
        14 => libc::REG_R14,
        _ => libc::REG_R15,
    }) as usize
}

extern "C" fn segv_handler(
    _signo: libc::c_int,
    info: *mut libc::siginfo_t,
    uctx: *mut libc::c_void,
) {
    let fault_address = unsafe { (*info).si_addr() } as usize;
    if let Some(handler) = GLOBAL_HANDLER.get() {
        if handler.handle_fault(uctx, fault_address) {
            return;
        }
    }
    // Not ours: restore the default action and let the re-executed access
    // take the process down the normal way.
    error!("unhandled access violation at {fault_address:#x}");
    unsafe {
        use nix::sys::signal;
        let _ = signal::sigaction(
            signal::Signal::SIGSEGV,
            &signal::SigAction::new(
                signal::SigHandler::SigDfl,
                signal::SaFlags::empty(),
                signal::SigSet::empty(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_dword_load() {
        // mov eax, [rdi]
        let mov = decode_mov(&[0x8B, 0x07, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(mov.len, 2);
        assert_eq!(mov.reg, 0);
        assert_eq!(mov.width, 4);
        assert!(mov.is_load);
    }

    #[test]
    fn decodes_rex_store_with_disp() {
        // mov [r12 + 0x10], r9d => 45 89 4C 24 10
        let mov = decode_mov(&[0x45, 0x89, 0x4C, 0x24, 0x10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        assert_eq!(mov.len, 5);
        assert_eq!(mov.reg, 9);
        assert_eq!(mov.width, 4);
        assert!(!mov.is_load);
    }

    #[test]
    fn rejects_non_mov() {
        assert!(decode_mov(&[0x0F, 0xAE, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).is_none());
    }
}
