//! Views over guest linear memory.
//!
//! Linear memory is replaced wholesale whenever the guest grows it, so no
//! slice into it may be held across a call that can reach the guest. Every
//! access goes through [`LinearMemory::view`], which re-derives the slice from
//! the store, and the [`BufferStore`] numbers each distinct backing buffer so
//! growth is observable.

use crate::error::{BridgeError, Result};

/// A byte range inside guest linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtrLen {
    /// Offset within linear memory.
    pub ptr: u32,
    /// Length in bytes.
    pub len: u32,
}

impl PtrLen {
    /// Create a new pointer/length pair.
    pub const fn new(ptr: u32, len: u32) -> Self {
        Self { ptr, len }
    }

    /// Check if the range covers no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// End offset, widened so it cannot wrap.
    pub const fn end(&self) -> u64 {
        self.ptr as u64 + self.len as u64
    }

    /// Split into the `(i32, i32)` pair guest entry points take.
    pub fn to_abi(self) -> (i32, i32) {
        (self.ptr as i32, self.len as i32)
    }

    /// Reassemble from a guest `(i32, i32)` pair.
    pub fn from_abi(ptr: i32, len: i32) -> Self {
        Self::new(ptr as u32, len as u32)
    }
}

/// A borrowed window over linear memory, valid for one access.
pub struct MemoryView<'a> {
    bytes: &'a mut [u8],
    generation: u64,
}

impl<'a> MemoryView<'a> {
    /// Wrap the current backing bytes.
    pub fn new(bytes: &'a mut [u8], generation: u64) -> Self {
        Self { bytes, generation }
    }

    /// Byte length of the view.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the memory has no pages.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Generation of the buffer this view was taken from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn range(&self, region: PtrLen) -> Result<std::ops::Range<usize>> {
        if region.end() > self.bytes.len() as u64 {
            return Err(BridgeError::OutOfBounds {
                offset: region.ptr,
                len: region.len,
                memory_len: self.bytes.len(),
            });
        }
        Ok(region.ptr as usize..region.end() as usize)
    }

    /// Borrow the bytes of `region`.
    pub fn read(&self, region: PtrLen) -> Result<&[u8]> {
        let range = self.range(region)?;
        Ok(&self.bytes[range])
    }

    /// Copy `data` into memory starting at `offset`.
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let range = self.range(PtrLen::new(offset, data.len() as u32))?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }
}

/// Tracks the identity of the guest's backing buffer.
///
/// Linear memory only ever grows, so a change in byte length marks a new
/// buffer. Each change bumps the generation.
#[derive(Debug, Clone, Default)]
pub struct BufferStore {
    byte_len: usize,
    generation: u64,
}

impl BufferStore {
    /// Create a store that has not observed memory yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap freshly fetched memory bytes, recording growth.
    pub fn view<'a>(&mut self, bytes: &'a mut [u8]) -> MemoryView<'a> {
        self.observe(bytes.len());
        MemoryView::new(bytes, self.generation)
    }

    /// Record the current byte length of linear memory.
    pub fn observe(&mut self, byte_len: usize) {
        if byte_len != self.byte_len {
            tracing::trace!(
                old_len = self.byte_len,
                new_len = byte_len,
                generation = self.generation + 1,
                "linear memory buffer replaced"
            );
            self.byte_len = byte_len;
            self.generation += 1;
        }
    }

    /// Number of distinct buffers observed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Byte length at the last observation.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }
}

/// Guest linear memory together with the guest's allocator exports.
///
/// Implementations must re-derive the view on every call to [`view`]
/// rather than caching it, since any allocator call may grow memory.
///
/// [`view`]: LinearMemory::view
pub trait LinearMemory {
    /// Fetch the current view of linear memory.
    fn view(&mut self) -> Result<MemoryView<'_>>;

    /// Call the guest allocator.
    fn malloc(&mut self, size: u32, align: u32) -> Result<u32>;

    /// Call the guest reallocator. Only valid when [`has_realloc`] is true.
    ///
    /// [`has_realloc`]: LinearMemory::has_realloc
    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32>;

    /// Whether the guest exports a reallocator.
    fn has_realloc(&self) -> bool;

    /// Return a region to the guest allocator.
    fn free(&mut self, ptr: u32, size: u32, align: u32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptr_len_end_does_not_wrap() {
        let region = PtrLen::new(u32::MAX, 2);
        assert_eq!(region.end(), u32::MAX as u64 + 2);
    }

    #[test]
    fn test_ptr_len_abi_round_trip_high_offsets() {
        let region = PtrLen::new(0x8000_0010, 7);
        let (ptr, len) = region.to_abi();
        assert!(ptr < 0);
        assert_eq!(PtrLen::from_abi(ptr, len), region);
    }

    #[test]
    fn test_view_bounds() {
        let mut bytes = vec![0u8; 16];
        let mut view = MemoryView::new(&mut bytes, 1);
        assert!(view.write(12, b"abcd").is_ok());
        assert_eq!(view.read(PtrLen::new(12, 4)).unwrap(), b"abcd");
        assert!(matches!(
            view.write(14, b"abcd"),
            Err(BridgeError::OutOfBounds {
                offset: 14,
                len: 4,
                memory_len: 16,
            })
        ));
        assert!(view.read(PtrLen::new(u32::MAX, 1)).is_err());
    }

    #[test]
    fn test_buffer_store_generation_tracks_growth() {
        let mut store = BufferStore::new();
        assert_eq!(store.generation(), 0);

        let mut small = vec![0u8; 64];
        assert_eq!(store.view(&mut small).generation(), 1);
        assert_eq!(store.view(&mut small).generation(), 1);

        let mut grown = vec![0u8; 128];
        assert_eq!(store.view(&mut grown).generation(), 2);
        assert_eq!(store.byte_len(), 128);
    }
}
