//! Raw handle to one pinned memory region with a read/write cursor.

use anyhow::{ensure, Result};
use std::fmt;
use std::ptr::NonNull;

/// A contiguous region of pinned memory plus a cursor.
///
/// `capacity` is the number of bytes the owner asked for. The underlying
/// region may be larger (`allocated_len`) when it comes from a pooling
/// allocator; only the first `capacity` bytes are ever exposed.
///
/// The handle owns the region exclusively but has no `Drop`: release goes
/// through [`crate::PinnedAllocator::free`].
pub struct PinnedBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
    allocated_len: usize,
    position: usize,
    slot: usize,
}

// The region is exclusively owned by this handle; moving it across threads is
// no different from moving a `Box<[u8]>`.
unsafe impl Send for PinnedBuffer {}

impl PinnedBuffer {
    /// Wrap a raw region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `allocated_len` bytes for as
    /// long as the handle lives, must not be aliased, and `capacity` must not
    /// exceed `allocated_len`.
    pub unsafe fn from_raw_parts(
        ptr: NonNull<u8>,
        capacity: usize,
        allocated_len: usize,
        slot: usize,
    ) -> Self {
        debug_assert!(capacity <= allocated_len);
        Self {
            ptr,
            capacity,
            allocated_len,
            position: 0,
            slot,
        }
    }

    /// A zero-length buffer that owns no memory and never needs freeing.
    pub fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            capacity: 0,
            allocated_len: 0,
            position: 0,
            slot: 0,
        }
    }

    /// True for buffers created by [`PinnedBuffer::empty`].
    pub fn is_empty(&self) -> bool {
        self.allocated_len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn allocated_len(&self) -> usize {
        self.allocated_len
    }

    /// Allocator-private tag (e.g. the slab class the region belongs to).
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.position
    }

    /// Move the cursor back to the start. Contents are untouched.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Raw pointer to the start of the region, for handing to a device copy.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `allocated_len >= capacity` bytes and
        // exclusively owned (see `from_raw_parts`). A dangling pointer with
        // length zero is a valid empty slice.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees no other borrow.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }

    /// Copy `bytes` in at the cursor and advance it.
    pub fn put(&mut self, bytes: &[u8]) -> Result<()> {
        ensure!(
            bytes.len() <= self.remaining(),
            "buffer overflow: writing {} bytes at {} into capacity {}",
            bytes.len(),
            self.position,
            self.capacity
        );
        let start = self.position;
        self.as_mut_slice()[start..start + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }

    /// Borrow the next `n` bytes at the cursor and advance past them.
    pub fn take(&mut self, n: usize) -> Result<&[u8]> {
        ensure!(
            n <= self.remaining(),
            "buffer underflow: reading {} bytes at {} from capacity {}",
            n,
            self.position,
            self.capacity
        );
        let start = self.position;
        self.position += n;
        Ok(&self.as_slice()[start..start + n])
    }

    /// Fixed-size variant of [`PinnedBuffer::take`].
    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Re-issue the same region under a new capacity and slot. Used by pooling
    /// allocators when a region changes hands.
    pub(crate) fn reissue(mut self, capacity: usize, slot: usize) -> Self {
        debug_assert!(capacity <= self.allocated_len);
        self.capacity = capacity;
        self.slot = slot;
        self.position = 0;
        self
    }

    pub(crate) fn raw(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl fmt::Debug for PinnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBuffer")
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity)
            .field("allocated_len", &self.allocated_len)
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_buffer(storage: &mut Vec<u8>) -> PinnedBuffer {
        let len = storage.len();
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        unsafe { PinnedBuffer::from_raw_parts(ptr, len, len, 0) }
    }

    #[test]
    fn put_then_take_advances_cursor() {
        let mut storage = vec![0u8; 8];
        let mut buf = heap_buffer(&mut storage);
        buf.put(&[1, 2, 3, 4]).unwrap();
        assert_eq!(buf.position(), 4);
        assert_eq!(buf.remaining(), 4);

        buf.rewind();
        assert_eq!(buf.take_array::<4>().unwrap(), [1, 2, 3, 4]);
        assert_eq!(buf.position(), 4);
    }

    #[test]
    fn overflow_is_rejected() {
        let mut storage = vec![0u8; 2];
        let mut buf = heap_buffer(&mut storage);
        assert!(buf.put(&[1, 2, 3]).is_err());
        assert_eq!(buf.position(), 0);
        assert!(buf.take(3).is_err());
    }

    #[test]
    fn rewind_keeps_contents() {
        let mut storage = vec![0u8; 4];
        let mut buf = heap_buffer(&mut storage);
        buf.put(&[9, 9, 9, 9]).unwrap();
        buf.rewind();
        assert_eq!(buf.as_slice(), &[9, 9, 9, 9]);
    }

    #[test]
    fn empty_buffer_has_no_bytes() {
        let buf = PinnedBuffer::empty();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
        assert!(buf.as_slice().is_empty());
    }
}
