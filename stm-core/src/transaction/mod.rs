pub mod engine;

pub use engine::{atomically, atomically_with_err, Transaction};

use std::cell::Cell;

thread_local!(static TRANSACTION_RUNNING: Cell<bool> = const { Cell::new(false) });

/// `TransactionGuard` checks against nested STM calls.
///
/// Flat nesting (`spec.md` §4.B, "nested TM_BEGIN increments a depth
/// counter; only the outermost TM_END attempts a commit") falls out for
/// free in this API: composing sub-operations means threading the same
/// `&mut Transaction` through ordinary function calls, never re-entering
/// `atomically`. What this guard actually forbids is a *second*,
/// independent top-level transaction starting on the same thread while one
/// is already running, which would silently break atomicity.
struct TransactionGuard;

impl TransactionGuard {
    pub fn new() -> TransactionGuard {
        TRANSACTION_RUNNING.with(|t| {
            assert!(!t.get(), "STM: Nested Transaction");
            t.set(true);
        });
        TransactionGuard
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        TRANSACTION_RUNNING.with(|t| {
            t.set(false);
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionControl {
    Retry,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionResult<T, E> {
    Validated(T),
    Cancelled(E),
    Abandoned,
}
