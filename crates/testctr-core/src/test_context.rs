//! The capability the lifecycle engine consumes instead of a native test handle.
//!
//! Rust has no built-in analogue of Go's `*testing.T` with a `Cleanup`
//! hook, so `TestContext` makes that capability explicit. [`Harness`] is
//! the provided implementation: it runs registered cleanups in LIFO order
//! on `Drop`, the same way a host test framework runs `t.Cleanup` callbacks
//! at the end of a test, and tolerates the test panicking mid-`New` the
//! same way `devc`'s `TestContainerGuard` tolerates a panicking E2E test.

use std::sync::Mutex;

/// The opaque "test" capability `New` and the handle it returns consume.
/// All engine/handle surfaces go through this; nothing exits the process
/// directly.
pub trait TestContext: Send + Sync {
    /// The test's name, used for derived container names and DSN database names.
    fn name(&self) -> &str;

    /// Non-fatal diagnostic logging.
    fn log(&self, message: &str);

    /// Fail the test fatally with `message`. Never returns.
    fn fatal(&self, message: &str) -> !;

    /// Register a cleanup callback, run in LIFO order when the test ends.
    fn cleanup(&self, f: Box<dyn FnOnce() + Send>);
}

/// A standalone [`TestContext`] for use outside a host test framework's own
/// binding (e.g. plain `#[tokio::test]` functions): logs via `tracing`,
/// fatals by panicking, and runs registered cleanups on `Drop`.
///
/// Cleanup closures frequently need to await async backend calls; `Harness`
/// runs them via [`tokio::task::block_in_place`], which requires a
/// multi-threaded Tokio runtime (`#[tokio::test(flavor = "multi_thread")]`
/// or the `rt-multi-thread` feature).
pub struct Harness {
    name: String,
    cleanups: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Harness {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    /// Run all registered cleanups now, in LIFO order, without waiting for `Drop`.
    pub fn run_cleanups(&self) {
        let mut cleanups = self.cleanups.lock().unwrap();
        while let Some(f) = cleanups.pop() {
            f();
        }
    }
}

impl TestContext for Harness {
    fn name(&self) -> &str {
        &self.name
    }

    fn log(&self, message: &str) {
        tracing::info!(test = %self.name, "{message}");
    }

    fn fatal(&self, message: &str) -> ! {
        tracing::error!(test = %self.name, "{message}");
        panic!("testctr: {}: {message}", self.name);
    }

    fn cleanup(&self, f: Box<dyn FnOnce() + Send>) {
        self.cleanups.lock().unwrap().push(f);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.run_cleanups();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn cleanups_run_lifo_on_drop() {
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let harness = Harness::new("t");
            for i in 0..3 {
                let order = order.clone();
                harness.cleanup(Box::new(move || order.lock().unwrap().push(i)));
            }
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn cleanup_twice_is_safe() {
        let calls = Arc::new(AtomicUsize::new(0));
        let harness = Harness::new("t");
        let calls2 = calls.clone();
        harness.cleanup(Box::new(move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));
        harness.run_cleanups();
        harness.run_cleanups();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
