//! Allocation shim over the guest's allocator exports.
//!
//! Host-side byte strings are staged into regions obtained from the guest's
//! own allocator. Every region the shim places is released through it as
//! well, and [`AllocStats`] keeps the books.

use super::memory::{LinearMemory, PtrLen};
use crate::error::{BridgeError, Result};

/// Alignment used for byte strings.
pub const BYTE_ALIGN: u32 = 1;

/// Running totals of shim activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Regions obtained from the guest allocator
    pub places: u64,
    /// Reallocations of placed regions
    pub extensions: u64,
    /// Placed regions returned to the guest allocator
    pub releases: u64,
    /// Guest-produced regions freed after the host consumed them
    pub reclaims: u64,
    /// Total bytes staged into guest memory
    pub bytes_placed: u64,
}

impl AllocStats {
    /// Regions placed but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.places.saturating_sub(self.releases)
    }
}

/// Places, extends and releases regions in guest memory.
#[derive(Debug, Clone, Default)]
pub struct AllocationShim {
    stats: AllocStats,
}

impl AllocationShim {
    /// Create a shim with zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics so far.
    pub fn stats(&self) -> AllocStats {
        self.stats
    }

    /// Count bytes written into a region obtained through [`reserve`](Self::reserve).
    pub(crate) fn account(&mut self, bytes: u32) {
        self.stats.bytes_placed += u64::from(bytes);
    }

    /// Reserve `size` bytes without writing them.
    pub fn reserve<M: LinearMemory + ?Sized>(&mut self, mem: &mut M, size: u32) -> Result<PtrLen> {
        let ptr = mem.malloc(size, BYTE_ALIGN)?;
        if ptr == 0 && size != 0 {
            return Err(BridgeError::AllocationFailure {
                requested: size,
                reason: "allocator returned null".to_string(),
            });
        }
        self.stats.places += 1;
        Ok(PtrLen::new(ptr, size))
    }

    /// Copy `bytes` into a freshly allocated region.
    pub fn place<M: LinearMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        bytes: &[u8],
    ) -> Result<PtrLen> {
        let size = u32::try_from(bytes.len()).map_err(|_| BridgeError::AllocationFailure {
            requested: u32::MAX,
            reason: format!("{} bytes exceed the 32-bit address space", bytes.len()),
        })?;
        let region = self.reserve(mem, size)?;

        // The allocator may have grown memory; fetch the view afresh.
        let written = mem
            .view()
            .and_then(|mut view| view.write(region.ptr, bytes));
        if let Err(e) = written {
            self.release(mem, region)?;
            return Err(e);
        }
        self.account(size);
        Ok(region)
    }

    /// Resize a placed region. The returned pointer may differ from `region.ptr`.
    pub fn extend<M: LinearMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        region: PtrLen,
        new_len: u32,
    ) -> Result<PtrLen> {
        let ptr = mem.realloc(region.ptr, region.len, new_len, BYTE_ALIGN)?;
        if ptr == 0 && new_len != 0 {
            return Err(BridgeError::AllocationFailure {
                requested: new_len,
                reason: "reallocator returned null".to_string(),
            });
        }
        self.stats.extensions += 1;
        Ok(PtrLen::new(ptr, new_len))
    }

    /// Hand a region back to the guest allocator.
    pub fn release<M: LinearMemory + ?Sized>(&mut self, mem: &mut M, region: PtrLen) -> Result<()> {
        mem.free(region.ptr, region.len, BYTE_ALIGN)?;
        self.stats.releases += 1;
        Ok(())
    }

    /// Free a region the guest allocated and handed over, such as an output string.
    pub fn reclaim<M: LinearMemory + ?Sized>(&mut self, mem: &mut M, region: PtrLen) -> Result<()> {
        mem.free(region.ptr, region.len, BYTE_ALIGN)?;
        self.stats.reclaims += 1;
        Ok(())
    }
}
