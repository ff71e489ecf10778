//! Ambient M: a thread-local scoped reporter, mirroring the teacher's own
//! `report::{get_default, set_scoped}` pattern used around `compile_parallel`
//! (`src/compile/project.rs`) — not retrieved itself among the teacher's
//! source files (it lives in a sibling crate there), so this is a fresh
//! design matching the usage shape: a `Reporter` trait object installed once
//! at startup, propagated into `tokio::spawn`ed worker tasks without
//! threading it through every function signature, so the out-of-core
//! status-line renderer (Component L) can subscribe without the core
//! depending on a concrete terminal implementation.

use std::{cell::RefCell, sync::Arc};

/// Everything Component L needs to know about as the scheduler ticks.
/// Default-implemented as no-ops so a caller only overrides the events it
/// cares about.
pub trait Reporter: Send + Sync {
    fn target_dirty(&self, _target: &str) {}
    fn compile_started(&self, _target: &str) {}
    fn compile_finished(&self, _target: &str, _status: &str) {}
    fn install_started(&self, _package_manifest: &str) {}
    fn install_finished(&self, _package_manifest: &str, _success: bool) {}
}

/// Drops everything on the floor; installed globally until something calls
/// [`set_scoped`].
pub struct NoopReporter;
impl Reporter for NoopReporter {}

fn global_default() -> Arc<dyn Reporter> {
    Arc::new(NoopReporter)
}

thread_local! {
    static CURRENT: RefCell<Vec<Arc<dyn Reporter>>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f` with the current thread's scoped reporter (or the global no-op
/// default if none is installed), mirroring the teacher's
/// `report::get_default(|reporter| reporter.clone())` call shape.
pub fn get_default<R>(f: impl FnOnce(&Arc<dyn Reporter>) -> R) -> R {
    CURRENT.with(|stack| match stack.borrow().last() {
        Some(reporter) => f(reporter),
        None => f(&global_default()),
    })
}

/// Installs `reporter` as the current thread's scoped reporter until the
/// returned guard is dropped, restoring whatever was active before (possibly
/// nothing). Each `tokio::spawn`ed task must call this again at its own top —
/// scoping is thread-local, not task-local, and tokio may move a task across
/// worker threads between `.await` points.
#[must_use]
pub fn set_scoped(reporter: &Arc<dyn Reporter>) -> ScopedReporterGuard {
    CURRENT.with(|stack| stack.borrow_mut().push(Arc::clone(reporter)));
    ScopedReporterGuard { _private: () }
}

pub struct ScopedReporterGuard {
    _private: (),
}

impl Drop for ScopedReporterGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReporter {
        compiles: AtomicUsize,
    }
    impl Reporter for CountingReporter {
        fn compile_started(&self, _target: &str) {
            self.compiles.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_reporter_is_a_noop() {
        get_default(|reporter| reporter.compile_started("Main"));
    }

    #[test]
    fn scoped_reporter_is_observed_while_installed_then_restored() {
        let counter = Arc::new(CountingReporter { compiles: AtomicUsize::new(0) });
        let reporter: Arc<dyn Reporter> = Arc::clone(&counter) as Arc<dyn Reporter>;
        {
            let _guard = set_scoped(&reporter);
            get_default(|r| r.compile_started("Main"));
        }
        assert_eq!(counter.compiles.load(Ordering::SeqCst), 1);

        // after the guard drops, the scoped reporter is gone; the no-op default
        // is invoked instead and the counter does not move.
        get_default(|r| r.compile_started("Main"));
        assert_eq!(counter.compiles.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_scopes_restore_the_outer_one() {
        let outer: Arc<dyn Reporter> = Arc::new(NoopReporter);
        let inner: Arc<dyn Reporter> = Arc::new(NoopReporter);
        let _outer_guard = set_scoped(&outer);
        {
            let _inner_guard = set_scoped(&inner);
            CURRENT.with(|stack| assert_eq!(stack.borrow().len(), 2));
        }
        CURRENT.with(|stack| assert_eq!(stack.borrow().len(), 1));
    }
}
