//! Block headers: the single metadata record shared by regions and blocks.
//!
//! Every block and every region's leading block are the same Rust type.
//! A region has no standalone record; its only trace is the `region_size`
//! field of its first block.

use std::borrow::Cow;
use std::ptr::NonNull;

/// Bytes a block's payload is rounded up to (a machine word).
pub const ALIGN: usize = 8;

/// Capacity of [`Block::name`], including the NUL terminator.
pub const NAME_CAPACITY: usize = 32;

/// Name assigned to an allocation that was not given one explicitly.
///
/// Every freshly mapped block gets this literal name before any
/// caller-supplied name is applied, rather than one derived from the
/// allocation id (see DESIGN.md).
pub const DEFAULT_NAME: &str = "hoi";

/// Intrusive header placed at the low address of every block.
///
/// `Block` doubles as the region's metadata record: the leading block of a
/// region has `region_start` pointing at itself and a meaningful
/// `region_size`; every other block's `region_size` is unspecified and must
/// not be read (see DESIGN.md).
#[repr(C)]
pub struct Block {
    /// Unique, monotonically increasing across the whole process.
    pub alloc_id: u64,
    /// Human-readable, NUL-terminated, bounded to [`NAME_CAPACITY`] bytes.
    pub name: [u8; NAME_CAPACITY],
    /// Total bytes this block spans, header included.
    pub size: usize,
    /// Bytes currently in use, header included. Zero means free.
    pub usage: usize,
    /// Address of the owning region's leading block (self, if this block
    /// *is* the leader).
    pub region_start: NonNull<Block>,
    /// Meaningful only on the region leader: the mapping's total length.
    pub region_size: usize,
    /// Next block in the global chain, in creation order.
    pub next: Option<NonNull<Block>>,
}

const _HEADER_IS_WORD_MULTIPLE: () = assert!(core::mem::size_of::<Block>() % ALIGN == 0);

impl Block {
    /// Bytes occupied by the header itself.
    pub const HEADER_SIZE: usize = core::mem::size_of::<Block>();

    /// Rounds `n` up to `n + n % ALIGN`.
    ///
    /// This is *not* the usual `(n + ALIGN - 1) & !(ALIGN - 1)` idiom: for
    /// `n` already a multiple of [`ALIGN`] the two agree, but for e.g. `n =
    /// 5` this yields `10`, not a multiple of 8 at all. Kept intentionally
    /// as-is rather than silently corrected (see DESIGN.md).
    pub fn round_payload(n: usize) -> usize {
        n + n % ALIGN
    }

    /// Bytes free for reuse: `size - usage`.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.size - self.usage
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.usage == 0
    }

    /// Whether this block is the leading block of its region.
    #[inline]
    pub fn is_region_leader(&self, self_ptr: NonNull<Block>) -> bool {
        self.region_start == self_ptr
    }

    /// Writes `name`, truncated to `NAME_CAPACITY - 1` bytes, NUL-terminated.
    pub fn set_name(&mut self, name: &str) {
        self.name = [0u8; NAME_CAPACITY];
        let bytes = name.as_bytes();
        let copy_len = bytes.len().min(NAME_CAPACITY - 1);
        self.name[..copy_len].copy_from_slice(&bytes[..copy_len]);
    }

    /// Returns the name as a lossily-decoded string, stopping at the first NUL.
    pub fn name_str(&self) -> Cow<'_, str> {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end])
    }

    /// Payload pointer: one header's width past the block's own address.
    ///
    /// # Safety
    /// `block` must point at a live, properly initialized `Block`.
    #[inline]
    pub unsafe fn payload_ptr(block: NonNull<Block>) -> NonNull<u8> {
        // SAFETY: caller guarantees `block` is a valid, in-bounds allocation
        // whose header occupies exactly `HEADER_SIZE` bytes.
        unsafe { NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(Self::HEADER_SIZE)) }
    }

    /// Recovers the owning block's header from a payload pointer.
    ///
    /// # Safety
    /// `payload` must have been returned by [`Block::payload_ptr`] (or one
    /// of the allocator's public entry points) and not yet freed.
    #[inline]
    pub unsafe fn header_of(payload: NonNull<u8>) -> NonNull<Block> {
        // SAFETY: caller guarantees `payload` is header-width past a live block.
        unsafe {
            NonNull::new_unchecked(payload.as_ptr().sub(Self::HEADER_SIZE).cast::<Block>())
        }
    }
}
