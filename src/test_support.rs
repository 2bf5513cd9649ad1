//! Test-only coordination helpers.
//!
//! `ALLOCATOR_ALGORITHM`/`ALLOCATOR_SCRIBBLE` are read from the real process
//! environment, and the default Rust test harness runs tests concurrently,
//! so any test that mutates either variable must serialize against every
//! other such test. This mutex is unrelated to the allocator's own internal
//! lock (src/engine.rs) — it exists purely so the test suite doesn't race
//! itself.

use std::sync::{Mutex, MutexGuard, OnceLock};

static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

/// Acquires the process-wide environment-variable test lock.
///
/// Hold the returned guard for the duration of any test that sets or reads
/// `ALLOCATOR_ALGORITHM` or `ALLOCATOR_SCRIBBLE`.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_MUTEX
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
