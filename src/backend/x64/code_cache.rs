//! The executable code cache.
//!
//! Each emitted function becomes its own mapping: the staging bytes are
//! copied into a fresh writable mapping which is then flipped to
//! read-execute. The flip is the publication point; blobs are never moved
//! or freed while the runtime lives, so raw entry pointers stay valid.

use crate::backend::x64::emitter::SourceMapEntry;
use crate::error::Error;
use log::debug;
use mmap_rs::{Mmap, MmapOptions};
use std::sync::RwLock;

/// One published function.
pub struct CodeBlob {
    pub guest_address: u32,
    map: Mmap,
    len: usize,
    pub source_map: Vec<SourceMapEntry>,
}

impl CodeBlob {
    #[inline]
    pub fn entry(&self) -> *const u8 {
        self.map.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains_host(&self, host: usize) -> bool {
        let base = self.map.as_ptr() as usize;
        host >= base && host < base + self.len
    }

    /// Maps a host code address back to the guest PC that produced it.
    pub fn lookup_guest_pc(&self, host: usize) -> Option<u32> {
        let offset = host.checked_sub(self.map.as_ptr() as usize)? as u32;
        let mut best: Option<SourceMapEntry> = None;
        for entry in &self.source_map {
            if entry.host_offset <= offset {
                match best {
                    Some(previous) if previous.host_offset >= entry.host_offset => {}
                    _ => best = Some(*entry),
                }
            }
        }
        best.map(|entry| entry.guest_pc)
    }
}

/// Arena of published blobs.
pub struct CodeCache {
    blobs: RwLock<Vec<std::sync::Arc<CodeBlob>>>,
}

impl CodeCache {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(Vec::new()),
        }
    }

    /// Copies `code` into fresh executable memory and publishes it. On any
    /// failure the cache is left untouched.
    pub fn publish(
        &self,
        guest_address: u32,
        code: &[u8],
        source_map: Vec<SourceMapEntry>,
    ) -> Result<std::sync::Arc<CodeBlob>, Error> {
        let mut map = MmapOptions::new(code.len().max(1))?.map_mut()?;
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), map.as_mut_ptr(), code.len());
        }
        let map = map.make_exec().map_err(|(_, error)| Error::from(error))?;
        let blob = std::sync::Arc::new(CodeBlob {
            guest_address,
            map,
            len: code.len(),
            source_map,
        });
        debug!(
            "published {} bytes for fn_{guest_address:08X} at {:p}",
            code.len(),
            blob.entry()
        );
        self.blobs.write().unwrap().push(blob.clone());
        Ok(blob)
    }

    /// Finds the blob covering a host instruction pointer, for the fault
    /// handler and debugger.
    pub fn find_by_host(&self, host: usize) -> Option<std::sync::Arc<CodeBlob>> {
        self.blobs
            .read()
            .unwrap()
            .iter()
            .find(|blob| blob.contains_host(host))
            .cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.read().unwrap().len()
    }
}

impl Default for CodeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_round_trips_bytes_and_executes() {
        let cache = CodeCache::new();
        // mov eax, 42; ret
        let code = [0xB8u8, 42, 0, 0, 0, 0xC3];
        let blob = cache.publish(0x8200_0000, &code, Vec::new()).unwrap();
        assert_eq!(blob.len(), 6);
        let f: extern "C" fn() -> u32 = unsafe { std::mem::transmute(blob.entry()) };
        assert_eq!(f(), 42);
        assert_eq!(cache.blob_count(), 1);
        assert!(cache.find_by_host(blob.entry() as usize).is_some());
        assert!(cache.find_by_host(0x1234).is_none());
    }

    #[test]
    fn source_map_lookup_picks_latest_entry() {
        let cache = CodeCache::new();
        let code = [0xC3u8; 16];
        let map = vec![
            SourceMapEntry {
                guest_pc: 0x1000,
                hir_ordinal: 0,
                host_offset: 0,
            },
            SourceMapEntry {
                guest_pc: 0x1004,
                hir_ordinal: 4,
                host_offset: 8,
            },
        ];
        let blob = cache.publish(0x1000, &code, map).unwrap();
        let base = blob.entry() as usize;
        assert_eq!(blob.lookup_guest_pc(base + 2), Some(0x1000));
        assert_eq!(blob.lookup_guest_pc(base + 9), Some(0x1004));
    }
}
