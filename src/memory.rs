//! This module provides the [`Memory`] struct which owns the flat 32-bit
//! guest physical address space, plus the byte-order helpers used by
//! everything that touches guest data.
//!
//! The whole space is one anonymous mapping; a `membase` host pointer lets
//! generated code compute `host = membase + guest32`. Pages start out
//! inaccessible and become usable via [`Memory::commit`]. Guest data is
//! big-endian, so all guest-visible accesses go through the `_be` flavors,
//! which swap on little-endian hosts.

use crate::error::Error;
use crate::vec128::Vec128;
use bitflags::bitflags;
use mmap_rs::{MmapMut, MmapOptions};
use std::ptr::NonNull;
use std::sync::{Mutex, RwLock};

/// Guest page granularity for commit/protect bookkeeping.
pub const PAGE_SIZE: u32 = 0x1000;

bitflags! {
    /// The protection flags used when committing or reprotecting guest pages.
    pub struct Protect: u32 {
        /// The guest is allowed to read from the pages.
        const READ    = 1 << 0;
        /// The guest is allowed to write to the pages.
        const WRITE   = 1 << 1;
        /// The guest is allowed to execute from the pages.
        const EXECUTE = 1 << 2;
    }
}

impl Protect {
    fn as_prot_flags(self) -> nix::sys::mman::ProtFlags {
        use nix::sys::mman::ProtFlags;
        let mut flags = ProtFlags::PROT_NONE;
        if self.contains(Protect::READ) {
            flags |= ProtFlags::PROT_READ;
        }
        if self.contains(Protect::WRITE) {
            flags |= ProtFlags::PROT_WRITE;
        }
        if self.contains(Protect::EXECUTE) {
            flags |= ProtFlags::PROT_EXEC;
        }
        flags
    }
}

struct Heap {
    cursor: u64,
    limit: u64,
    free: Vec<(u32, u32)>,
}

/// The guest physical address space.
///
/// Commit and protect take a write lock; loads and stores are lock-free.
/// Guest threads may race on the raw bytes exactly as the real hardware
/// would let them.
pub struct Memory {
    map: MmapMut,
    size: u64,
    committed: RwLock<Vec<u64>>,
    heap: Mutex<Heap>,
}

// The mapping is plain anonymous memory; all mutation goes through raw
// pointers that never alias Rust references.
unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

impl Memory {
    /// Maps a guest space of `size` bytes (page aligned, at most 4 GiB) with
    /// every page initially inaccessible. The heap region used by
    /// [`Memory::alloc`] occupies the upper half of the space.
    pub fn new(size: u64) -> Result<Self, Error> {
        assert!(size % PAGE_SIZE as u64 == 0 && size > 0 && size <= 1 << 32);
        let map = MmapOptions::new(size as usize)?.map_mut()?;
        let memory = Self {
            map,
            size,
            committed: RwLock::new(vec![0; (size / PAGE_SIZE as u64) as usize / 64 + 1]),
            heap: Mutex::new(Heap {
                cursor: size / 2,
                limit: size,
                free: Vec::new(),
            }),
        };
        // Nothing is committed yet; fault on any touch.
        unsafe {
            nix::sys::mman::mprotect(
                NonNull::new(memory.map.as_ptr() as *mut libc::c_void).unwrap(),
                size as usize,
                nix::sys::mman::ProtFlags::PROT_NONE,
            )?;
        }
        Ok(memory)
    }

    /// Yields the host pointer generated code adds guest offsets to.
    #[inline]
    pub fn membase(&self) -> *mut u8 {
        self.map.as_ptr() as *mut u8
    }

    /// Size of the guest space in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Translates a guest address to a host pointer. The pointer is only
    /// dereferenceable if the page has been committed.
    #[inline]
    pub fn translate(&self, guest: u32) -> *mut u8 {
        debug_assert!((guest as u64) < self.size);
        unsafe { self.membase().add(guest as usize) }
    }

    /// Whether `guest..guest + len` lies inside the space.
    pub fn contains(&self, guest: u32, len: u32) -> bool {
        guest as u64 + len as u64 <= self.size
    }

    /// Commits the pages covering `guest..guest + len` with the given
    /// protection.
    pub fn commit(&self, guest: u32, len: u32, protect: Protect) -> Result<(), Error> {
        if !self.contains(guest, len) {
            return Err(Error::Alloc);
        }
        let first = guest / PAGE_SIZE;
        let last = (guest + len - 1) / PAGE_SIZE;
        let mut committed = self.committed.write().unwrap();
        unsafe {
            nix::sys::mman::mprotect(
                NonNull::new(self.translate(first * PAGE_SIZE) as *mut libc::c_void).unwrap(),
                ((last - first + 1) * PAGE_SIZE) as usize,
                protect.as_prot_flags(),
            )?;
        }
        for page in first..=last {
            committed[(page / 64) as usize] |= 1 << (page % 64);
        }
        Ok(())
    }

    /// Changes the protection of already-committed pages.
    pub fn protect(&self, guest: u32, len: u32, protect: Protect) -> Result<(), Error> {
        if !self.contains(guest, len) {
            return Err(Error::Alloc);
        }
        let first = guest / PAGE_SIZE;
        let last = (guest + len - 1) / PAGE_SIZE;
        let _committed = self.committed.write().unwrap();
        unsafe {
            nix::sys::mman::mprotect(
                NonNull::new(self.translate(first * PAGE_SIZE) as *mut libc::c_void).unwrap(),
                ((last - first + 1) * PAGE_SIZE) as usize,
                protect.as_prot_flags(),
            )?;
        }
        Ok(())
    }

    /// Whether the page holding `guest` has been committed.
    pub fn is_committed(&self, guest: u32) -> bool {
        if guest as u64 >= self.size {
            return false;
        }
        let page = guest / PAGE_SIZE;
        let committed = self.committed.read().unwrap();
        committed[(page / 64) as usize] & (1 << (page % 64)) != 0
    }

    /// Allocates and commits `len` bytes from the guest heap, returning the
    /// guest address.
    pub fn alloc(&self, len: u32) -> Result<u32, Error> {
        let rounded = len.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let address = {
            let mut heap = self.heap.lock().unwrap();
            if let Some(at) = heap
                .free
                .iter()
                .position(|&(_, free_len)| free_len >= rounded)
            {
                let (address, free_len) = heap.free.swap_remove(at);
                if free_len > rounded {
                    heap.free.push((address + rounded, free_len - rounded));
                }
                address
            } else {
                if heap.cursor + rounded as u64 > heap.limit {
                    return Err(Error::Alloc);
                }
                let address = heap.cursor as u32;
                heap.cursor += rounded as u64;
                address
            }
        };
        self.commit(address, rounded, Protect::READ | Protect::WRITE)?;
        Ok(address)
    }

    /// Returns a heap allocation to the free list. The pages stay committed.
    pub fn free(&self, guest: u32, len: u32) {
        let rounded = len.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let mut heap = self.heap.lock().unwrap();
        heap.free.push((guest, rounded));
    }

    // Host-endian accessors.

    #[inline]
    pub fn load_u8(&self, guest: u32) -> u8 {
        unsafe { *self.translate(guest) }
    }

    #[inline]
    pub fn store_u8(&self, guest: u32, value: u8) {
        unsafe { *self.translate(guest) = value }
    }

    #[inline]
    pub fn load_u16(&self, guest: u32) -> u16 {
        unsafe { (self.translate(guest) as *const u16).read_unaligned() }
    }

    #[inline]
    pub fn store_u16(&self, guest: u32, value: u16) {
        unsafe { (self.translate(guest) as *mut u16).write_unaligned(value) }
    }

    #[inline]
    pub fn load_u32(&self, guest: u32) -> u32 {
        unsafe { (self.translate(guest) as *const u32).read_unaligned() }
    }

    #[inline]
    pub fn store_u32(&self, guest: u32, value: u32) {
        unsafe { (self.translate(guest) as *mut u32).write_unaligned(value) }
    }

    #[inline]
    pub fn load_u64(&self, guest: u32) -> u64 {
        unsafe { (self.translate(guest) as *const u64).read_unaligned() }
    }

    #[inline]
    pub fn store_u64(&self, guest: u32, value: u64) {
        unsafe { (self.translate(guest) as *mut u64).write_unaligned(value) }
    }

    // Guest-endian accessors. The swap happens here and only here.

    #[inline]
    pub fn load_u16_be(&self, guest: u32) -> u16 {
        u16::from_be(self.load_u16(guest))
    }

    #[inline]
    pub fn store_u16_be(&self, guest: u32, value: u16) {
        self.store_u16(guest, value.to_be())
    }

    #[inline]
    pub fn load_u32_be(&self, guest: u32) -> u32 {
        u32::from_be(self.load_u32(guest))
    }

    #[inline]
    pub fn store_u32_be(&self, guest: u32, value: u32) {
        self.store_u32(guest, value.to_be())
    }

    #[inline]
    pub fn load_u64_be(&self, guest: u32) -> u64 {
        u64::from_be(self.load_u64(guest))
    }

    #[inline]
    pub fn store_u64_be(&self, guest: u32, value: u64) {
        self.store_u64(guest, value.to_be())
    }

    #[inline]
    pub fn load_f32_be(&self, guest: u32) -> f32 {
        f32::from_bits(self.load_u32_be(guest))
    }

    #[inline]
    pub fn store_f32_be(&self, guest: u32, value: f32) {
        self.store_u32_be(guest, value.to_bits())
    }

    #[inline]
    pub fn load_f64_be(&self, guest: u32) -> f64 {
        f64::from_bits(self.load_u64_be(guest))
    }

    #[inline]
    pub fn store_f64_be(&self, guest: u32, value: f64) {
        self.store_u64_be(guest, value.to_bits())
    }

    /// Loads a 16-byte vector; logical byte lane 0 comes from the lowest
    /// guest address, matching `lvx`.
    pub fn load_vec128_be(&self, guest: u32) -> Vec128 {
        let mut v = Vec128::ZERO;
        for lane in 0..16 {
            v.set_u8(lane, self.load_u8(guest + lane as u32));
        }
        v
    }

    /// Stores a 16-byte vector, the reverse of [`Memory::load_vec128_be`].
    pub fn store_vec128_be(&self, guest: u32, value: Vec128) {
        for lane in 0..16 {
            self.store_u8(guest + lane as u32, value.u8(lane));
        }
    }

    /// Copies a byte slice into guest memory.
    pub fn write_bytes(&self, guest: u32, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.store_u8(guest + i as u32, *b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec128::vec128i;

    fn test_memory() -> Memory {
        let memory = Memory::new(1 << 24).unwrap();
        memory
            .commit(0, 1 << 20, Protect::READ | Protect::WRITE)
            .unwrap();
        memory
    }

    #[test]
    fn store_load_round_trip_every_width() {
        let memory = test_memory();
        for offset in [0u32, 1, 2, 3, 7] {
            memory.store_u16_be(0x1000 + offset, 0xBEEF);
            assert_eq!(memory.load_u16_be(0x1000 + offset), 0xBEEF);
            memory.store_u32_be(0x2000 + offset, 0xDEAD_BEEF);
            assert_eq!(memory.load_u32_be(0x2000 + offset), 0xDEAD_BEEF);
            memory.store_u64_be(0x3000 + offset, 0x0123_4567_89AB_CDEF);
            assert_eq!(memory.load_u64_be(0x3000 + offset), 0x0123_4567_89AB_CDEF);
        }
        memory.store_f64_be(0x4000, -2.5);
        assert_eq!(memory.load_f64_be(0x4000), -2.5);
        let v = vec128i(0x00010203, 0x04050607, 0x08090a0b, 0x0c0d0e0f);
        memory.store_vec128_be(0x5000, v);
        assert_eq!(memory.load_vec128_be(0x5000), v);
        // Big-endian in memory: byte 0 is the top byte of lane x.
        assert_eq!(memory.load_u8(0x5000), 0x00);
        assert_eq!(memory.load_u8(0x500f), 0x0f);
    }

    #[test]
    fn big_endian_byte_layout() {
        let memory = test_memory();
        memory.store_u32_be(0x100, 0x11223344);
        assert_eq!(memory.load_u8(0x100), 0x11);
        assert_eq!(memory.load_u8(0x103), 0x44);
    }

    #[test]
    fn heap_alloc_and_free() {
        let memory = test_memory();
        let a = memory.alloc(0x100).unwrap();
        let b = memory.alloc(0x2000).unwrap();
        assert_ne!(a, b);
        assert!(memory.is_committed(a));
        memory.free(a, 0x100);
        let c = memory.alloc(0x80).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn commit_tracks_pages() {
        let memory = Memory::new(1 << 20).unwrap();
        assert!(!memory.is_committed(0x5000));
        memory
            .commit(0x5000, 0x1000, Protect::READ | Protect::WRITE)
            .unwrap();
        assert!(memory.is_committed(0x5000));
        assert!(!memory.is_committed(0x7000));
    }
}
