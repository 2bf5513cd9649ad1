//! A region-backed general-purpose heap allocator with pluggable placement
//! policies.
//!
//! This crate provides [`HeapAllocator`], a standalone allocator engine that
//! manages its own memory directly from the OS via anonymous `mmap`
//! mappings, and [`Allocator`], a thin [`GlobalAlloc`] adapter around it so
//! a binary can install one as its process-wide allocator:
//!
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: procalloc::Allocator = procalloc::Allocator::new();
//!
//! fn main() {
//!     let v: Vec<u8> = Vec::with_capacity(64);
//!     drop(v);
//! }
//! ```
//!
//! # Placement policy
//! The block a request is served from is chosen by [`PlacementPolicy`],
//! selected at call time from the `ALLOCATOR_ALGORITHM` environment
//! variable (`first_fit`, `best_fit`, or `worst_fit`; unset or unrecognized
//! falls back to `first_fit`). Setting `ALLOCATOR_SCRIBBLE` to a nonzero
//! integer fills every freshly returned payload with `0xAA` before handing
//! it back, to help shake out code that reads uninitialized memory.
//!
//! # What this crate does not do
//! It does not replace `malloc`/`free`/`calloc`/`realloc` at the dynamic
//! linker level the way an `LD_PRELOAD`-able `cdylib` would. [`Allocator`]
//! only participates in Rust's own `#[global_allocator]` mechanism; reaching
//! every allocation in a process, including ones made by other languages'
//! runtimes sharing the same address space, is out of scope.

mod block;
mod engine;
mod error;
mod policy;
mod region;

#[doc(hidden)]
pub mod test_support;

use std::alloc::{GlobalAlloc, Layout};

pub use block::Block;
pub use engine::HeapAllocator;
pub use error::{RegionError, Result};
pub use policy::PlacementPolicy;

/// A [`GlobalAlloc`] adapter around a [`HeapAllocator`].
///
/// Every method simply forwards to the wrapped engine; `Layout::size` is
/// what becomes the engine's "payload bytes" argument, and `Layout::align`
/// is not separately honored beyond the engine's own fixed 8-byte alignment
/// (see [`Block::round_payload`]). Requests for an alignment wider than
/// that are a documented non-goal.
pub struct Allocator {
    inner: HeapAllocator,
}

impl Allocator {
    /// Creates an allocator with no memory mapped yet.
    pub const fn new() -> Self {
        Self {
            inner: HeapAllocator::new(),
        }
    }

    /// Gives access to the underlying engine, e.g. to call
    /// [`HeapAllocator::allocate_named`] or dump diagnostics with
    /// [`HeapAllocator::print_memory`]. `GlobalAlloc` itself only exposes
    /// the four operations the trait defines.
    pub fn engine(&self) -> &HeapAllocator {
        &self.inner
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: every method forwards to `HeapAllocator`, which validates its own
// arguments and never unwinds; layouts from a well-formed `Layout` always
// describe a size the engine can request.
unsafe impl GlobalAlloc for Allocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.inner.allocate(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: caller guarantees `ptr` was returned by this allocator's
        // `alloc`/`alloc_zeroed`/`realloc` and not already deallocated.
        unsafe { self.inner.free(ptr) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.inner.allocate_zeroed(1, layout.size())
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: caller guarantees `ptr` was returned by this allocator and
        // is still live.
        unsafe { self.inner.reallocate(ptr, new_size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_alloc_round_trips_through_alloc_and_dealloc() {
        let allocator = Allocator::new();
        let layout = Layout::from_size_align(64, 8).unwrap();
        // SAFETY: a fresh, valid, nonzero-size layout.
        unsafe {
            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            std::ptr::write_bytes(ptr, 7, layout.size());
            allocator.dealloc(ptr, layout);
        }
    }

    #[test]
    fn global_alloc_zeroed_is_actually_zero() {
        let allocator = Allocator::new();
        let layout = Layout::from_size_align(32, 8).unwrap();
        // SAFETY: a fresh, valid, nonzero-size layout.
        unsafe {
            let ptr = allocator.alloc_zeroed(layout);
            assert!(!ptr.is_null());
            let slice = std::slice::from_raw_parts(ptr, layout.size());
            assert!(slice.iter().all(|&b| b == 0));
            allocator.dealloc(ptr, layout);
        }
    }

    #[test]
    fn engine_accessor_exposes_named_allocation() {
        let allocator = Allocator::new();
        let payload = allocator.engine().allocate_named(16, "widget");
        assert!(!payload.is_null());
        // SAFETY: `payload` was just returned by this same engine.
        unsafe { allocator.engine().free(payload) };
    }
}
