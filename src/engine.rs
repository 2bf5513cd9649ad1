//! The allocator engine: the coordinator owning the global chain, the
//! allocation counter, and every region mapping, all behind one mutex,
//! guarding every public entry point for the duration of the call.

use std::io;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::block::{Block, DEFAULT_NAME, NAME_CAPACITY};
use crate::policy::{scribble_enabled, PlacementPolicy};
use crate::region::{map_region, round_up_to_page, unmap_region};

const SCRIBBLE_BYTE: u8 = 0xAA;

/// Everything the engine mutates, serialized by [`HeapAllocator`]'s mutex.
struct State {
    head: Option<NonNull<Block>>,
    next_alloc_id: u64,
}

// SAFETY: all access to `State` is serialized through `HeapAllocator`'s
// `Mutex`; the raw pointers it contains are never observed from more than
// one thread at a time.
unsafe impl Send for State {}

/// The allocator engine: region manager, block chain, placement engine,
/// splitter and release path behind one global lock.
///
/// Instances are independent of one another — each owns its own chain and
/// its own region mappings — which is what lets the test suite create a
/// fresh `HeapAllocator` per test instead of sharing hidden global state.
pub struct HeapAllocator {
    state: Mutex<State>,
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapAllocator {
    /// Creates an allocator with an empty chain. No memory is mapped until
    /// the first allocation request.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                head: None,
                next_alloc_id: 0,
            }),
        }
    }

    /// Allocates `n` payload bytes, returning a null pointer on failure.
    ///
    /// `n` is rounded via [`Block::round_payload`] (`n + n % 8`), not to
    /// the usual word boundary.
    pub fn allocate(&self, n: usize) -> *mut u8 {
        let real_size = Block::round_payload(n) + Block::HEADER_SIZE;
        let scribble = scribble_enabled();

        let mut state = self.lock();
        let policy = PlacementPolicy::from_env();

        // SAFETY: every block reachable from `state.head` is a live,
        // properly initialized `Block` maintained by this engine.
        if let Some(candidate) = unsafe { policy.select(state.head, real_size) } {
            // SAFETY: `candidate` was just returned by a live chain scan.
            let block = unsafe { Self::split(&mut state, candidate, real_size) };
            // SAFETY: `block` is a freshly claimed, properly sized block.
            let payload = unsafe { Block::payload_ptr(block) };
            if scribble {
                // SAFETY: the payload spans at least `n` writable bytes.
                unsafe { scribble_payload(payload, n) };
            }
            return payload.as_ptr();
        }

        let region_size = round_up_to_page(real_size);
        match map_region(region_size) {
            Ok(block_ptr) => {
                let alloc_id = Self::next_alloc_id(&mut state);
                // SAFETY: `block_ptr` is freshly mapped, writable memory at
                // least `region_size` bytes long; we write a full, valid
                // `Block` before anything else observes it.
                unsafe {
                    block_ptr.as_ptr().write(Block {
                        alloc_id,
                        name: default_name_bytes(),
                        size: region_size,
                        usage: real_size,
                        region_start: block_ptr,
                        region_size,
                        next: None,
                    });
                }
                Self::append_tail(&mut state, block_ptr);

                // SAFETY: `block_ptr` now holds a fully initialized `Block`.
                let payload = unsafe { Block::payload_ptr(block_ptr) };
                if scribble {
                    // SAFETY: the payload spans at least `n` writable bytes.
                    unsafe { scribble_payload(payload, n) };
                }
                payload.as_ptr()
            }
            Err(err) => {
                log::error!("procalloc: failed to map a fresh region: {err}");
                std::ptr::null_mut()
            }
        }
    }

    /// Allocates `size` payload bytes and assigns `name` to the resulting
    /// block (bounded to 31 bytes plus a NUL terminator).
    pub fn allocate_named(&self, size: usize, name: &str) -> *mut u8 {
        log::trace!("procalloc: named allocation request for {size} bytes as '{name}'");
        let payload = self.allocate(size);
        if payload.is_null() {
            return payload;
        }
        let _state = self.lock();
        // SAFETY: `payload` was just returned by `self.allocate` above.
        let header = unsafe { Block::header_of(NonNull::new_unchecked(payload)) };
        // SAFETY: `header` points at a live block owned by this engine.
        unsafe { &mut *header.as_ptr() }.set_name(name);
        payload
    }

    /// Allocates `count * elem_size` zeroed payload bytes.
    ///
    /// Returns a null pointer if either argument is zero.
    pub fn allocate_zeroed(&self, count: usize, elem_size: usize) -> *mut u8 {
        let total = match count.checked_mul(elem_size) {
            Some(0) | None => return std::ptr::null_mut(),
            Some(total) => total,
        };
        let payload = self.allocate(total);
        if !payload.is_null() {
            // SAFETY: `allocate` guarantees at least `total` writable bytes
            // at `payload` when it succeeds.
            unsafe { std::ptr::write_bytes(payload, 0, total) };
        }
        payload
    }

    /// Frees a payload pointer previously returned by this engine.
    ///
    /// A null pointer is a no-op. Freeing any other pointer not obtained
    /// from this engine is undefined behavior (documented non-goal).
    ///
    /// # Safety
    /// `payload` must be null or a pointer previously returned by this same
    /// `HeapAllocator`'s `allocate`/`allocate_zeroed`/`allocate_named`/
    /// `reallocate`, not already freed.
    pub unsafe fn free(&self, payload: *mut u8) {
        let Some(payload) = NonNull::new(payload) else {
            return;
        };
        log::trace!("procalloc: free request for {:p}", payload.as_ptr());

        let mut state = self.lock();
        // SAFETY: caller guarantees `payload` was issued by this engine.
        let block = unsafe { Block::header_of(payload) };
        // SAFETY: `block` is a live block owned by this engine.
        unsafe { &mut *block.as_ptr() }.usage = 0;

        // SAFETY: `block` is live; `region_start` always points at a live
        // region leader reachable from `state.head` (invariant I2/I3).
        let region_start = unsafe { block.as_ref().region_start };

        // Walk the region's contiguous run; abort reclamation if anything
        // in it is still in use.
        let mut iter = Some(region_start);
        let mut successor = None;
        let mut all_free = true;
        while let Some(cursor) = iter {
            // SAFETY: every block reachable from `state.head` is live.
            let b = unsafe { cursor.as_ref() };
            if b.region_start != region_start {
                successor = Some(cursor);
                break;
            }
            if b.usage != 0 {
                all_free = false;
                break;
            }
            iter = b.next;
            successor = iter;
        }

        if !all_free {
            return;
        }

        // SAFETY: `region_start` is live.
        let region_size = unsafe { region_start.as_ref().region_size };

        // Splice the whole region run out of the chain.
        if state.head == Some(region_start) {
            state.head = successor;
        } else {
            let mut cursor = state.head;
            while let Some(node) = cursor {
                // SAFETY: every reachable block is live.
                let next = unsafe { node.as_ref().next };
                if next == Some(region_start) {
                    // SAFETY: `node` is live and mutably reachable only
                    // through this locked state.
                    unsafe { &mut *node.as_ptr() }.next = successor;
                    break;
                }
                cursor = next;
            }
        }

        // SAFETY: `region_start`/`region_size` describe exactly the mapping
        // `map_region` returned when this region was created, and we have
        // just unlinked every block in it from the chain.
        if let Err(err) = unsafe { unmap_region(region_start, region_size) } {
            log::error!("procalloc: failed to unmap region: {err}");
        }
    }

    /// Resizes a previous allocation.
    ///
    /// # Safety
    /// `payload` must be null or a pointer previously returned by this same
    /// `HeapAllocator`, not already freed.
    pub unsafe fn reallocate(&self, payload: *mut u8, n: usize) -> *mut u8 {
        let Some(payload_nn) = NonNull::new(payload) else {
            return self.allocate(n);
        };

        let total = Block::round_payload(n) + Block::HEADER_SIZE;
        if total == 0 {
            // SAFETY: caller guarantees `payload` is a live allocation.
            unsafe { self.free(payload) };
            return std::ptr::null_mut();
        }

        // SAFETY: caller guarantees `payload` was issued by this engine.
        let block = unsafe { Block::header_of(payload_nn) };
        let (old_size, old_usage) = {
            let _state = self.lock();
            // SAFETY: `block` is live.
            let b = unsafe { block.as_ref() };
            (b.size, b.usage)
        };

        if old_size < total {
            let new_payload = self.allocate(n);
            if new_payload.is_null() {
                return std::ptr::null_mut();
            }
            let copy_len = old_usage - Block::HEADER_SIZE;
            // SAFETY: `payload` has at least `copy_len` readable bytes (its
            // own usage minus its header) and `new_payload` has at least
            // `n >= copy_len` writable bytes.
            unsafe {
                std::ptr::copy_nonoverlapping(payload, new_payload, copy_len);
                self.free(payload);
            }
            new_payload
        } else {
            let _state = self.lock();
            // SAFETY: `block` is live and exclusively reachable under the lock.
            unsafe { &mut *block.as_ptr() }.usage = total;
            payload
        }
    }

    /// Writes the current memory state to `sink`.
    pub fn write_memory(&self, sink: &mut dyn io::Write) -> io::Result<()> {
        let state = self.lock();
        writeln!(sink, "-- Current Memory State --")?;

        let mut current = state.head;
        let mut current_region: Option<NonNull<Block>> = None;
        while let Some(block) = current {
            // SAFETY: every block reachable from `state.head` is live.
            let b = unsafe { block.as_ref() };
            if current_region != Some(b.region_start) {
                current_region = Some(b.region_start);
                // SAFETY: `region_start` is a live region leader.
                let leader = unsafe { b.region_start.as_ref() };
                writeln!(
                    sink,
                    "[REGION] {:p}-{:p} {}",
                    b.region_start.as_ptr(),
                    // SAFETY: offsetting by the region's own mapped length
                    // stays within (one past) the mapping.
                    unsafe { b.region_start.as_ptr().cast::<u8>().add(leader.region_size) },
                    leader.region_size
                )?;
            }

            let effective_payload = if b.usage == 0 {
                0
            } else {
                b.usage - Block::HEADER_SIZE
            };
            writeln!(
                sink,
                "[BLOCK]  {:p}-{:p} ({}) '{}' {} {} {}",
                block.as_ptr(),
                // SAFETY: offsetting by this block's own `size` stays
                // within (one past) the block.
                unsafe { block.as_ptr().cast::<u8>().add(b.size) },
                b.alloc_id,
                b.name_str(),
                b.size,
                b.usage,
                effective_payload
            )?;

            current = b.next;
        }
        Ok(())
    }

    /// Writes the current memory state to standard out.
    pub fn print_memory(&self) {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        if let Err(err) = self.write_memory(&mut lock) {
            log::error!("procalloc: failed to print memory state: {err}");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_alloc_id(state: &mut State) -> u64 {
        let id = state.next_alloc_id;
        state.next_alloc_id += 1;
        id
    }

    /// Appends a freshly mapped region's leading block to the tail of the
    /// chain, walking from the head each time rather than keeping a
    /// cached tail pointer.
    fn append_tail(state: &mut State, block: NonNull<Block>) {
        match state.head {
            None => state.head = Some(block),
            Some(head) => {
                let mut cursor = head;
                loop {
                    // SAFETY: every block reachable from `state.head` is live.
                    let next = unsafe { cursor.as_ref().next };
                    match next {
                        Some(next) => cursor = next,
                        None => {
                            // SAFETY: `cursor` is live and exclusively
                            // reachable under the lock.
                            unsafe { &mut *cursor.as_ptr() }.next = Some(block);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Splits (or in-place claims) `candidate` to serve a request of
    /// `real_size` total bytes.
    ///
    /// # Safety
    /// `candidate` must be a live block reachable from `state.head`.
    unsafe fn split(
        state: &mut State,
        candidate: NonNull<Block>,
        real_size: usize,
    ) -> NonNull<Block> {
        // SAFETY: caller guarantees `candidate` is live.
        let is_free = unsafe { candidate.as_ref().is_free() };

        if is_free {
            let alloc_id = Self::next_alloc_id(state);
            // SAFETY: `candidate` is live and exclusively reachable under
            // the lock; this only updates fields already valid on an
            // existing block. Its `name` is intentionally left as-is —
            // reuse never touches the name of a previously-freed block.
            let b = unsafe { &mut *candidate.as_ptr() };
            b.alloc_id = alloc_id;
            b.usage = real_size;
            return candidate;
        }

        // Case B: carve a new trailing block at `candidate + candidate.usage`.
        // SAFETY: caller guarantees `candidate` is live.
        let (region_start, region_size, remaining_size, next) = unsafe {
            let b = candidate.as_ref();
            (b.region_start, b.region_size, b.size - b.usage, b.next)
        };
        let alloc_id = Self::next_alloc_id(state);

        // SAFETY: `candidate.usage` bytes from `candidate`'s own address are
        // this block's in-use span; the bytes right after it, up to
        // `candidate.size`, are this same mapped region's memory, not yet
        // claimed by any other block.
        let new_block = unsafe {
            NonNull::new_unchecked(
                candidate
                    .as_ptr()
                    .cast::<u8>()
                    .add(candidate.as_ref().usage)
                    .cast::<Block>(),
            )
        };
        // SAFETY: `new_block` points at unclaimed memory within the same
        // mapping; we write a full, valid `Block` before anything observes it.
        unsafe {
            new_block.as_ptr().write(Block {
                alloc_id,
                name: default_name_bytes(),
                size: remaining_size,
                usage: real_size,
                region_start,
                region_size,
                next,
            });
        }

        // SAFETY: `candidate` is live and exclusively reachable under the lock.
        let b = unsafe { &mut *candidate.as_ptr() };
        b.size = b.usage;
        b.next = Some(new_block);

        new_block
    }
}

fn default_name_bytes() -> [u8; NAME_CAPACITY] {
    let mut name = [0u8; NAME_CAPACITY];
    name[..DEFAULT_NAME.len()].copy_from_slice(DEFAULT_NAME.as_bytes());
    name
}

/// # Safety
/// `payload` must address at least `len` writable bytes.
unsafe fn scribble_payload(payload: NonNull<u8>, len: usize) {
    // SAFETY: caller guarantees `payload` addresses `len` writable bytes.
    unsafe { std::ptr::write_bytes(payload.as_ptr(), SCRIBBLE_BYTE, len) };
}
