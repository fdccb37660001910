//! Reentrancy guard for instrumentation entry points
//!
//! Communication libraries sometimes call their own public entry points
//! internally. When those entry points are instrumented, the instrumentation
//! itself can trigger a second, nested round of instrumentation. The guard
//! marks "instrumentation code is running" so nested entries skip straight to
//! the real operation without recording anything.
//!
//! The flag is a `Cell<bool>`, so a guard (and anything owning one) is
//! `!Sync`: each controlling thread owns its own guard. This only protects a
//! thread from re-entering itself; it is not a lock between threads.

use std::cell::Cell;

/// Marks whether instrumentation code is currently executing
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    active: Cell<bool>,
}

impl ReentrancyGuard {
    pub const fn new() -> Self {
        Self {
            active: Cell::new(false),
        }
    }

    /// Mark instrumentation as running
    pub fn enter(&self) {
        self.active.set(true);
    }

    /// Mark instrumentation as finished
    pub fn exit(&self) {
        self.active.set(false);
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Enter the guard for the lifetime of the returned scope
    ///
    /// Returns `None` when the guard is already held, in which case the
    /// caller must skip its instrumentation work.
    pub fn try_enter(&self) -> Option<GuardScope<'_>> {
        if self.is_active() {
            return None;
        }
        self.enter();
        Some(GuardScope { guard: self })
    }
}

/// RAII scope returned by [`ReentrancyGuard::try_enter`]
#[derive(Debug)]
pub struct GuardScope<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        self.guard.exit();
    }
}
