//! Block-aligned I/O buffers.
//!
//! With `O_DIRECT` the kernel requires the user buffer address, the file
//! offset and the transfer length to be multiples of the logical block size.
//! [`IoBuffer`] always starts on a [`BLOCK_ALIGNMENT`] boundary; callers stay
//! responsible for offsets and lengths.
//!
//! The allocation lives on the heap and never moves while the buffer is
//! alive, so the raw pointer handed to the OS context stays valid for as long
//! as the owning request holds the buffer.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::slice;

/// Block alignment for Direct I/O (4 KiB).
pub const BLOCK_ALIGNMENT: usize = 4096;

/// A heap buffer aligned to [`BLOCK_ALIGNMENT`].
pub struct IoBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// Safety: IoBuffer uniquely owns its allocation, like Box<[u8]>.
unsafe impl Send for IoBuffer {}
unsafe impl Sync for IoBuffer {}

impl IoBuffer {
    /// Allocates a zero-filled buffer of `len` bytes.
    ///
    /// A zero-length buffer performs no allocation.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        if len == 0 {
            return Self {
                ptr: aligned_dangling(),
                len: 0,
            };
        }
        let layout = layout_for(len);
        // Safety: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        Self { ptr, len }
    }

    /// Allocates a buffer holding a copy of `data`.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buffer = Self::zeroed(data.len());
        buffer.as_mut_slice().copy_from_slice(data);
        buffer
    }

    /// Returns the buffer length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the buffer contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // Safety: ptr is valid for len bytes (or dangling and aligned when len == 0).
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Returns the buffer contents mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: as above, and &mut self guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Returns the start address handed to the OS context.
    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Copies the contents into a `Vec<u8>`.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Drop for IoBuffer {
    fn drop(&mut self) {
        if self.len != 0 {
            // Safety: allocated in `zeroed` with exactly this layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout_for(self.len)) };
        }
    }
}

impl fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl AsRef<[u8]> for IoBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for IoBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl From<&[u8]> for IoBuffer {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

fn layout_for(len: usize) -> Layout {
    Layout::from_size_align(len, BLOCK_ALIGNMENT).expect("buffer size overflows layout")
}

fn aligned_dangling() -> NonNull<u8> {
    // Safety: BLOCK_ALIGNMENT is non-zero, so the address is non-null.
    unsafe { NonNull::new_unchecked(BLOCK_ALIGNMENT as *mut u8) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_buffer_is_aligned() {
        let buf = IoBuffer::zeroed(3 * BLOCK_ALIGNMENT);
        assert_eq!(buf.len(), 3 * BLOCK_ALIGNMENT);
        assert_eq!(buf.as_slice().as_ptr() as usize % BLOCK_ALIGNMENT, 0);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn from_slice_copies_data() {
        let buf = IoBuffer::from_slice(b"block data");
        assert_eq!(buf.as_slice(), b"block data");
        assert_eq!(buf.to_vec(), b"block data".to_vec());
    }

    #[test]
    fn empty_buffer_does_not_allocate() {
        let mut buf = IoBuffer::zeroed(0);
        assert!(buf.is_empty());
        assert!(buf.as_mut_slice().is_empty());
    }
}
