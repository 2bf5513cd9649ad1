//! Placement engine: chooses a reusable block for a given request size.
//!
//! Three placement strategies, resolved freshly from `ALLOCATOR_ALGORITHM`
//! on every call rather than being cached once at startup.

use std::env;
use std::ptr::NonNull;

use crate::block::Block;

/// The three placement strategies the environment can select between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementPolicy {
    FirstFit,
    BestFit,
    WorstFit,
}

impl PlacementPolicy {
    /// Reads `ALLOCATOR_ALGORITHM`; any value other than `best_fit`/
    /// `worst_fit` (including an absent variable) falls back to `FirstFit`,
    /// silently defaulting rather than erroring on an unrecognized value.
    pub fn from_env() -> Self {
        match env::var("ALLOCATOR_ALGORITHM").as_deref() {
            Ok("best_fit") => PlacementPolicy::BestFit,
            Ok("worst_fit") => PlacementPolicy::WorstFit,
            _ => PlacementPolicy::FirstFit,
        }
    }

    /// Scans the chain starting at `head` for a block this policy accepts.
    ///
    /// A block is a candidate whenever its free capacity (`size - usage`)
    /// is at least `size` bytes, whether or not it is fully free — the
    /// splitter (src/engine.rs) is what turns a partially-used candidate
    /// into a fitted allocation.
    ///
    /// # Safety
    /// Every block reachable from `head` via `next` must be a live,
    /// properly initialized `Block`.
    pub unsafe fn select(self, head: Option<NonNull<Block>>, size: usize) -> Option<NonNull<Block>> {
        match self {
            PlacementPolicy::FirstFit => unsafe { first_fit(head, size) },
            PlacementPolicy::BestFit => unsafe { best_fit(head, size) },
            PlacementPolicy::WorstFit => unsafe { worst_fit(head, size) },
        }
    }
}

/// # Safety
/// See [`PlacementPolicy::select`].
unsafe fn first_fit(head: Option<NonNull<Block>>, size: usize) -> Option<NonNull<Block>> {
    let mut current = head;
    while let Some(block) = current {
        // SAFETY: caller guarantees the chain is live.
        let b = unsafe { block.as_ref() };
        if b.free_capacity() >= size {
            return Some(block);
        }
        current = b.next;
    }
    None
}

/// # Safety
/// See [`PlacementPolicy::select`].
unsafe fn best_fit(head: Option<NonNull<Block>>, size: usize) -> Option<NonNull<Block>> {
    let mut current = head;
    let mut best: Option<(NonNull<Block>, usize)> = None;
    while let Some(block) = current {
        // SAFETY: caller guarantees the chain is live.
        let b = unsafe { block.as_ref() };
        let capacity = b.free_capacity();
        if capacity >= size {
            if capacity == size {
                return Some(block);
            }
            if best.map_or(true, |(_, best_capacity)| capacity < best_capacity) {
                best = Some((block, capacity));
            }
        }
        current = b.next;
    }
    best.map(|(block, _)| block)
}

/// # Safety
/// See [`PlacementPolicy::select`].
unsafe fn worst_fit(head: Option<NonNull<Block>>, size: usize) -> Option<NonNull<Block>> {
    let mut current = head;
    let mut worst: Option<(NonNull<Block>, usize)> = None;
    while let Some(block) = current {
        // SAFETY: caller guarantees the chain is live.
        let b = unsafe { block.as_ref() };
        let capacity = b.free_capacity();
        if capacity >= size {
            if worst.map_or(true, |(_, worst_capacity)| capacity > worst_capacity) {
                worst = Some((block, capacity));
            }
        }
        current = b.next;
    }
    worst.map(|(block, _)| block)
}

/// Snapshot of the scribble flag, read fresh on every allocation from
/// `ALLOCATOR_SCRIBBLE`, re-checked on every allocation rather than cached.
pub fn scribble_enabled() -> bool {
    env::var("ALLOCATOR_SCRIBBLE")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .map(|v| v != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_first_fit() {
        // This test does not touch ALLOCATOR_ALGORITHM itself; callers that
        // do must serialize via crate::test_support::env_lock().
        if std::env::var("ALLOCATOR_ALGORITHM").is_err() {
            assert_eq!(PlacementPolicy::from_env(), PlacementPolicy::FirstFit);
        }
    }

    #[test]
    fn unknown_values_default_to_first_fit() {
        let _guard = crate::test_support::env_lock();
        std::env::set_var("ALLOCATOR_ALGORITHM", "quantum_fit");
        assert_eq!(PlacementPolicy::from_env(), PlacementPolicy::FirstFit);
        std::env::remove_var("ALLOCATOR_ALGORITHM");
    }

    #[test]
    fn recognizes_best_and_worst_fit() {
        let _guard = crate::test_support::env_lock();
        std::env::set_var("ALLOCATOR_ALGORITHM", "best_fit");
        assert_eq!(PlacementPolicy::from_env(), PlacementPolicy::BestFit);
        std::env::set_var("ALLOCATOR_ALGORITHM", "worst_fit");
        assert_eq!(PlacementPolicy::from_env(), PlacementPolicy::WorstFit);
        std::env::remove_var("ALLOCATOR_ALGORITHM");
    }

    #[test]
    fn scribble_defaults_to_disabled() {
        let _guard = crate::test_support::env_lock();
        std::env::remove_var("ALLOCATOR_SCRIBBLE");
        assert!(!scribble_enabled());
        std::env::set_var("ALLOCATOR_SCRIBBLE", "1");
        assert!(scribble_enabled());
        std::env::set_var("ALLOCATOR_SCRIBBLE", "0");
        assert!(!scribble_enabled());
        std::env::remove_var("ALLOCATOR_SCRIBBLE");
    }
}
