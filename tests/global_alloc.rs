//! End-to-end exercise of the `GlobalAlloc` adapter through ordinary
//! collection types, rather than calling `HeapAllocator` directly.

use procalloc::Allocator;
use std::alloc::{GlobalAlloc, Layout};

fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    procalloc::test_support::env_lock()
}

#[test]
fn vec_push_and_grow_round_trips() {
    let allocator = Allocator::new();
    let layout = Layout::array::<u64>(4).unwrap();
    // SAFETY: a fresh, valid, nonzero-size layout; freed exactly once below.
    unsafe {
        let ptr = allocator.alloc(layout) as *mut u64;
        assert!(!ptr.is_null());
        for i in 0..4u64 {
            ptr.add(i as usize).write(i * i);
        }
        for i in 0..4u64 {
            assert_eq!(ptr.add(i as usize).read(), i * i);
        }
        allocator.dealloc(ptr as *mut u8, layout);
    }
}

#[test]
fn realloc_preserves_existing_bytes_when_growing() {
    let allocator = Allocator::new();
    let small = Layout::array::<u8>(16).unwrap();
    // SAFETY: `ptr` is freed via `realloc`/`dealloc` exactly once, below.
    unsafe {
        let ptr = allocator.alloc(small);
        assert!(!ptr.is_null());
        for i in 0..16u8 {
            *ptr.add(i as usize) = i;
        }
        let grown = allocator.realloc(ptr, small, 256);
        assert!(!grown.is_null());
        for i in 0..16u8 {
            assert_eq!(*grown.add(i as usize), i);
        }
        let grown_layout = Layout::array::<u8>(256).unwrap();
        allocator.dealloc(grown, grown_layout);
    }
}

#[test]
fn many_allocations_across_multiple_regions_free_cleanly() {
    let allocator = Allocator::new();
    let layout = Layout::array::<u8>(8192).unwrap();
    let mut ptrs = Vec::new();
    // SAFETY: each pointer is tracked and freed exactly once below.
    unsafe {
        for _ in 0..32 {
            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            ptrs.push(ptr);
        }
        for ptr in ptrs {
            allocator.dealloc(ptr, layout);
        }
    }
}

#[test]
fn best_fit_policy_is_honored_end_to_end() {
    let _guard = env_lock();
    std::env::set_var("ALLOCATOR_ALGORITHM", "best_fit");

    let allocator = Allocator::new();
    let engine = allocator.engine();

    let a = engine.allocate(256);
    let b = engine.allocate(32);
    let c = engine.allocate(128);
    assert!(!a.is_null() && !b.is_null() && !c.is_null());

    // SAFETY: `b` and `c` were just returned by this same engine and have
    // not been freed yet.
    unsafe {
        engine.free(b);
        engine.free(c);
    }

    // With `a` still live, the chain now has two free blocks (from `b` and
    // `c`'s vacated spans); best fit should choose the smaller one that
    // still fits a 24-byte request.
    let d = engine.allocate(24);
    assert!(!d.is_null());

    // SAFETY: `a` and `d` were both returned by this engine and are live.
    unsafe {
        engine.free(a);
        engine.free(d);
    }

    std::env::remove_var("ALLOCATOR_ALGORITHM");
}

#[test]
fn write_memory_reports_a_live_named_allocation() {
    let allocator = Allocator::new();
    let engine = allocator.engine();

    let payload = engine.allocate_named(40, "widget");
    assert!(!payload.is_null());

    let mut buf = Vec::new();
    engine.write_memory(&mut buf).expect("write_memory should not fail");
    let report = String::from_utf8(buf).expect("report should be valid utf-8");

    assert!(report.contains("-- Current Memory State --"));
    assert!(report.contains("[REGION]"));
    assert!(report.contains("'widget'"));

    // SAFETY: `payload` was just returned by this same engine.
    unsafe { engine.free(payload) };
}
