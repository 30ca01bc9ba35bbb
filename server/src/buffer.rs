// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A growable, contiguous byte buffer, and the per-worker pool that hands
//! fixed-capacity instances of it to connections.

use std::{
    alloc::{self, Layout},
    borrow::{Borrow, BorrowMut},
    io::Write,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr::{copy, copy_nonoverlapping, NonNull},
};

/// A growable, contiguous byte buffer with independent read and write
/// cursors, so previously-read bytes can be reclaimed without a copy until
/// the buffer needs to compact.
#[derive(Debug)]
pub struct Buffer {
    ptr: NonNull<u8>,
    cap: usize,
    read_offset: usize,
    write_offset: usize,
    desired_capacity: usize,
    _marker: PhantomData<u8>,
}

// SAFETY: Buffer owns its allocation exclusively; it carries no interior
// mutability or shared state, so it may be moved to another thread along
// with its owning Connection.
unsafe impl Send for Buffer {}

impl Buffer {
    /// Creates a new Buffer sized to (at least) `desired_capacity`.
    pub fn new(desired_capacity: usize) -> Self {
        let mut result = Self {
            ptr: NonNull::dangling(),
            cap: 0, // `grow_to_capacity` will set this
            read_offset: 0,
            write_offset: 0,
            desired_capacity: desired_capacity.next_power_of_two(),
            _marker: PhantomData,
        };

        if desired_capacity > 0 {
            result.desired_capacity = desired_capacity.next_power_of_two();
            result.grow_to_capacity(result.desired_capacity);
        }
        result
    }

    /// Reserves at least `capacity` additional bytes of write space.
    pub fn reserve(&mut self, capacity: usize) {
        self.grow_to_capacity(self.cap + capacity);
    }

    /// The number of unread bytes currently in the buffer.
    pub fn remaining(&self) -> usize {
        self.write_offset - self.read_offset
    }

    /// The number of bytes that can still be written before growing.
    pub fn remaining_mut(&self) -> usize {
        self.cap - self.write_offset
    }

    /// True once every written byte has been read back out.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Gets the current read position as a pointer. Use `remaining` for length.
    fn read_ptr(&self) -> *mut u8 {
        // SAFETY: read_offset <= write_offset <= cap is maintained by every
        // mutator below, so this stays within the allocation.
        unsafe { self.ptr.as_ptr().add(self.read_offset) }
    }

    /// Gets the current write position as a pointer. Use `remaining_mut` for length.
    fn write_ptr(&self) -> *mut u8 {
        // SAFETY: write_offset <= cap is maintained by every mutator below.
        unsafe { self.ptr.as_ptr().add(self.write_offset) }
    }

    /// Marks `amount` bytes as read, freeing them for reclamation. Skipping
    /// this after reading leaves the same bytes visible on the next read.
    pub fn mark_read(&mut self, amount: usize) {
        self.read_offset = self.write_offset.min(self.read_offset + amount);
        self.compact();
    }

    /// Marks `amount` bytes as written. Skipping this after writing causes
    /// the next write to overwrite the same region.
    pub fn mark_written(&mut self, amount: usize) {
        self.write_offset = self.cap.min(self.write_offset + amount);
    }

    /// Resets the buffer to a clean, empty state and returns it to its
    /// originally requested capacity, ready to be handed back to a pool.
    pub fn reset(&mut self) {
        self.clear();
    }

    fn grow_to_capacity(&mut self, capacity: usize) {
        assert!(capacity <= isize::MAX as usize);

        let new_cap = capacity.next_power_of_two().min(isize::MAX as usize);

        let new_layout = Layout::array::<u8>(new_cap).unwrap();
        let new_ptr = if self.cap == 0 {
            // SAFETY: allocation failure is handled below; layout is non-zero-sized.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Layout::array::<u8>(self.cap).unwrap();
            let old_ptr = self.ptr.as_ptr();

            // SAFETY: allocation failure is handled below; layout is non-zero-sized.
            unsafe { alloc::realloc(old_ptr, old_layout, new_layout.size()) }
        };

        self.ptr = match NonNull::new(new_ptr) {
            Some(p) => p,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.cap = new_cap;
    }

    fn clear(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;

        if self.cap > self.desired_capacity {
            let layout = Layout::array::<u8>(self.cap).unwrap();

            // SAFETY: allocation failure is handled below; layout is non-zero-sized.
            let new_ptr = unsafe { alloc::realloc(self.ptr.as_ptr(), layout, self.desired_capacity) };

            self.ptr = match NonNull::new(new_ptr) {
                Some(p) => p,
                None => alloc::handle_alloc_error(layout),
            };
            self.cap = self.desired_capacity;
        }
    }

    /// Reclaims space at the front of the buffer so further writes don't
    /// force a reallocation when only the read cursor has advanced.
    fn compact(&mut self) {
        if self.remaining() == 0 {
            self.clear();
            return;
        }

        if self.cap == self.desired_capacity {
            return;
        }

        if self.read_offset > self.desired_capacity {
            if self.remaining() < self.read_offset {
                // SAFETY: read_ptr() and ptr are valid for `remaining()` bytes and
                // don't overlap since the read region starts after the offset.
                unsafe { copy_nonoverlapping(self.read_ptr(), self.ptr.as_ptr(), self.remaining()) }
            } else {
                // SAFETY: read_ptr() and ptr are valid for `remaining()` bytes.
                unsafe { copy(self.read_ptr(), self.ptr.as_ptr(), self.remaining()) }
            }

            self.write_offset = self.remaining();
            self.read_offset = 0;
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.cap != 0 {
            let layout = Layout::array::<u8>(self.cap).unwrap();
            // SAFETY: `u8` needs no drop glue; `ptr`/`cap` describe this buffer's
            // own allocation, made with the same layout shape.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

impl Borrow<[u8]> for Buffer {
    fn borrow(&self) -> &[u8] {
        // SAFETY: `read_ptr` points `remaining()` initialized bytes into this
        // buffer's own allocation; no mutable borrow can be outstanding.
        unsafe { std::slice::from_raw_parts(self.read_ptr(), self.remaining()) }
    }
}

impl BorrowMut<[u8]> for Buffer {
    fn borrow_mut(&mut self) -> &mut [u8] {
        // SAFETY: `write_ptr` points to `remaining_mut()` bytes of spare
        // capacity in this buffer's own allocation.
        unsafe { std::slice::from_raw_parts_mut(self.write_ptr(), self.remaining_mut()) }
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.borrow()
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.borrow_mut()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.remaining_mut() < buf.len() {
            self.reserve(buf.len());
        }
        self.deref_mut()[0..buf.len()].clone_from_slice(buf);
        self.mark_written(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A single-threaded pool of fixed-capacity [`Buffer`]s, reused across
/// connections rather than freed and reallocated.
///
/// The pool never shrinks below demand: on exhaustion it allocates a fresh
/// buffer, matching the source's unbounded-growth behavior.
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    free: Vec<Buffer>,
    outstanding: usize,
}

impl BufferPool {
    /// Creates a pool that hands out buffers of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: Vec::new(),
            outstanding: 0,
        }
    }

    /// Acquires a buffer, reusing a released one if available.
    pub fn acquire(&mut self) -> Buffer {
        self.outstanding += 1;
        self.free.pop().unwrap_or_else(|| Buffer::new(self.capacity))
    }

    /// Returns a buffer to the pool, zero-resetting its cursors first.
    pub fn release(&mut self, mut buffer: Buffer) {
        buffer.reset();
        self.free.push(buffer);
        self.outstanding -= 1;
    }

    /// Number of buffers currently checked out (not yet released).
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_then_read_round_trips_bytes() {
        let mut buf = Buffer::new(16);
        buf.write_all(b"hello").unwrap();
        assert_eq!(5, buf.remaining());
        assert_eq!(b"hello", &buf[..]);
        buf.mark_read(5);
        assert_eq!(0, buf.remaining());
    }

    #[test]
    fn grows_when_write_exceeds_capacity() {
        let mut buf = Buffer::new(4);
        buf.write_all(b"0123456789").unwrap();
        assert_eq!(10, buf.remaining());
    }

    #[test]
    fn compact_reclaims_front_space_after_full_read() {
        let mut buf = Buffer::new(4);
        buf.write_all(b"data").unwrap();
        buf.mark_read(4);
        assert_eq!(0, buf.remaining());
        buf.write_all(b"more").unwrap();
        assert_eq!(b"more", &buf[..]);
    }

    #[test]
    fn pool_reuses_released_buffers() {
        let mut pool = BufferPool::new(64);
        let buf = pool.acquire();
        assert_eq!(1, pool.outstanding());
        pool.release(buf);
        assert_eq!(0, pool.outstanding());
        assert_eq!(1, pool.free.len());
    }

    #[test]
    fn pool_grows_when_exhausted() {
        let mut pool = BufferPool::new(64);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(2, pool.outstanding());
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn released_buffer_is_reset() {
        let mut pool = BufferPool::new(64);
        let mut buf = pool.acquire();
        buf.write_all(b"leftover").unwrap();
        pool.release(buf);
        let buf = pool.acquire();
        assert_eq!(0, buf.remaining());
    }
}
