//! This crate implements
//! [software transactional memory](https://en.wikipedia.org/wiki/Software_transactional_memory),
//! tuned for the throughput-oriented, batch-style workloads of the STAMP
//! benchmark suite rather than for Haskell-style blocking concurrency.
//!
//! Concretely this is a TL2-style engine: every `TVar` is backed by an
//! ownership record ("orec", see [`orec`]) instead of its own lock. A
//! transaction takes a snapshot of the global version clock at begin,
//! reads directly against the live vars while checking their orecs stay
//! unlocked and unchanged, buffers writes into a redo log, and at commit
//! acquires the write set's orecs in a fixed order, bumps the clock, and
//! revalidates the read set before publishing. Conflicts abort and retry
//! with exponential backoff; a thread stuck aborting repeatedly escalates
//! to a process-wide exclusive lock so it always eventually makes
//! progress (`spec.md` §5).
//!
//! With locks the sequential composition of two
//! threadsafe actions is no longer threadsafe because
//! other threads may interfere in between of these actions.
//! Applying a third lock to protect both may lead to common sources of errors
//! like deadlocks or race conditions.
//!
//! Unlike locks Software transactional memory is composable.
//!
//! Panicking within a transaction does not poison the `TVar`s. The engine
//! ensures consistency by never committing on panic: the `RwLock` guards
//! inside each var are only ever held for the instant of a single load or
//! store, never across the panicking frame.
//!
//! # Usage
//!
//! You should only use functions that are transaction-safe.
//! Transaction-safe functions don't have side effects, except those provided
//! by `TVar`. Mutexes and other blocking mechanisms are especially
//! dangerous, because they can interfere with the engine's own locking and
//! cause deadlocks.
//!
//! Note that transaction-safety does *not* mean safety in the rust sense, but
//! is a subset of allowed behavior. Even if code is not transaction-safe, no
//! segmentation faults will happen.
//!
//! Every transaction needs a [`RuntimeContext`], which owns the orec table,
//! the global clock and the fallback lock. Construct one and share it (it
//! is `Send + Sync`) across every thread that should see each other's
//! commits:
//!
//! ```
//! # use stm_core::*;
//! let ctx = RuntimeContext::default();
//!
//! atomically(&ctx, |trans| {
//!     // some action
//!     // return value as `Result`, for example
//!     Ok(42)
//! });
//! ```
//!
//! Nested calls to `atomically` are not allowed. A run-time check prevents
//! this. Instead of using atomically internally, add a `&mut Transaction`
//! parameter and return `StmResult`.
//!
//! Use `?` on `StmResult`, to propagate a transaction error through the
//! system. Do not handle the error yourself.
//!
//! ```
//! # use stm_core::*;
//! let ctx = RuntimeContext::default();
//! let var = TVar::new(0);
//!
//! let x = atomically(&ctx, |trans| {
//!     var.write(trans, 42)?; // Pass failure to parent.
//!     var.read(trans) // Return the value saved in var.
//! });
//!
//! println!("var = {}", x);
//! // var = 42
//! ```
//!
//! # Transaction safety
//!
//! Software transactional memory is completely safe in the rust sense, so
//! undefined behavior will never occur. Still there are multiple rules that
//! you should obey when dealing with software transactional memory.
//!
//! * Don't run code with side effects, especially no IO-code.
//!   Transactions repeat on conflict. Using IO would repeat this IO-code.
//!   Return a closure if you have to.
//! * Don't handle `StmResult` yourself.
//!   Use `Transaction::or` to combine alternative paths and `optionally` to
//!   check if an inner function has failed. Always use `?` and never ignore
//!   a `StmResult`.
//! * Don't run `atomically` inside of another. `atomically` is designed to
//!   have side effects and will therefore break transaction safety. Nested
//!   calls are detected at runtime and handled with panicking. When you use
//!   STM in the inner of a function, then express it in the public
//!   interface by taking `&mut Transaction` as parameter and returning
//!   `StmResult<T>`. Callers can safely compose it into larger blocks.
//! * Don't mix locks and transactions. Your code will easily deadlock or
//!   slow down unpredictably.
//! * Don't use inner mutability to change the content of a `TVar`.
//!
//! Panicking in a transaction is transaction-safe. The transaction aborts
//! and all changes are discarded. No poisoning or half written transactions
//! happen.
//!
//! # Speed
//!
//! Generally keep your atomic blocks as small as possible, because the
//! more time you spend, the more likely it is to collide with other
//! threads. Every used `TVar` increases both the work done on every read
//! and the chance of a conflict at commit, so keep the amount of accessed
//! variables as low as needed.

// Extra linting with exceptions
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::should_panic_without_expect)]

extern crate parking_lot;

mod alloc;
mod orec;
mod result;
mod runtime;
mod transaction;
mod tvar;

pub use alloc::{p_malloc, reset_arena, tm_alloc, tm_free, with_arena, TmBox};
pub use result::*;
pub use runtime::{RuntimeContext, StmConfig};
pub use transaction::engine::{atomically, atomically_with_err};
pub use transaction::{Transaction, TransactionControl, TransactionResult};
pub use tvar::TVar;

/// Convert a `TransactionClosureResult<T, E_A>` to `TransactionClosureResult<T, E_B>`.
///
/// This macro is used to cleanly write transactions where multiple kind of errors are
/// possible during execution. The macro will not fail as long as the specified target
/// error `$to` implements `From<E>`, `E` being the error possibly returned by `$op`.
/// It expands to:
///
/// ```ignore
/// $op.map_err(|e| match e {
///         stm_core::TransactionError::Abort(e) => stm_core::TransactionError::Abort($to::from(e)),
///         stm_core::TransactionError::Stm(e) => stm_core::TransactionError::Stm(e),
///     })?
/// ```
///
/// # Example
///
/// ```rust
/// # use stm_core::{abort, atomically_with_err, try_or_coerce, RuntimeContext, Transaction, TransactionClosureResult};
///
/// struct Error1;
/// struct Error2;
///
/// impl From<Error1> for Error2 {
///     fn from(e: Error1) -> Self {
///         Error2
///     }
/// }
///
/// fn op1(trans: &mut Transaction<'_>) -> TransactionClosureResult<(), Error1> {
///     Ok(())
/// }
///
/// fn op2(trans: &mut Transaction<'_>) -> TransactionClosureResult<(), Error2> {
///     Ok(())
/// }
///
/// let ctx = RuntimeContext::default();
/// let res: Result<(), Error2> = atomically_with_err(&ctx, |trans| {
///     try_or_coerce!(op1(trans), Error2);
///     op2(trans)?;
///     Ok(())
/// });
/// ```
#[macro_export]
macro_rules! try_or_coerce {
    ($op: expr, $to: ident) => {
        $op.map_err(|e| match e {
            $crate::TransactionError::Abort(e) => $crate::TransactionError::Abort($to::from(e)),
            $crate::TransactionError::Stm(e) => $crate::TransactionError::Stm(e),
        })?
    };
}

#[inline]
/// Call `abort` to abort a transaction and pass the error as the return value.
///
/// # Examples
///
/// ```
/// # use stm_core::*;
/// struct MyError;
///
/// let ctx = RuntimeContext::default();
/// let execute_once: Result<u32, _> = atomically_with_err(&ctx, |_| {
///     abort(MyError)
/// });
///
/// assert!(execute_once.is_err());
/// ```
pub fn abort<T, E>(e: E) -> TransactionClosureResult<T, E> {
    Err(TransactionError::Abort(e))
}

#[inline]
/// Call `retry` to abort the current attempt and try again.
///
/// `retry` counts the same as a conflict towards the backoff/escalation
/// policy in `spec.md` §5 — it signals a conflict the engine itself
/// couldn't see (an invariant the body knows about but the orec table
/// doesn't), not a value mismatch.
///
/// `Transaction::or` allows to define alternatives. If the first function
/// wants to retry, the second one has a chance to run within the same
/// attempt.
///
/// # Examples
///
/// ```no_run
/// # use stm_core::*;
/// let ctx = RuntimeContext::default();
/// let infinite_retry: i32 = atomically(&ctx, |_| retry());
/// ```
pub fn retry<T>() -> StmClosureResult<T> {
    Err(StmError::Retry)
}

#[inline]
/// Unwrap `Option` or call retry if it is `None`.
///
/// `optionally` is the inverse of `unwrap_or_retry`.
///
/// # Example
///
/// ```
/// # use stm_core::*;
/// let ctx = RuntimeContext::default();
/// let x = TVar::new(Some(42));
///
/// atomically(&ctx, |tx| {
///         let inner = unwrap_or_retry(x.read(tx)?)?;
///         assert_eq!(inner, 42); // inner is always 42.
///         Ok(inner)
///     }
/// );
/// ```
pub fn unwrap_or_retry<T>(option: Option<T>) -> StmClosureResult<T> {
    match option {
        Some(x) => Ok(x),
        None => retry(),
    }
}

#[inline]
/// Retry until `cond` is true.
///
/// # Example
///
/// ```
/// # use stm_core::*;
/// let ctx = RuntimeContext::default();
/// let var = TVar::new(42);
///
/// let x = atomically(&ctx, |tx| {
///     let v = var.read(tx)?;
///     guard(v==42)?;
///     // v is now always 42.
///     Ok(v)
/// });
/// assert_eq!(x, 42);
/// ```
pub fn guard(cond: bool) -> StmClosureResult<()> {
    if cond {
        Ok(())
    } else {
        retry()
    }
}

#[inline]
/// Optionally run a transaction `f`. If `f` fails with a `retry()`, it does
/// not cancel the whole transaction, but returns `None`.
///
/// Note that `optionally` does not always recover the function, if
/// inconsistencies where found.
///
/// `unwrap_or_retry` is the inverse of `optionally`.
///
/// # Example
///
/// ```
/// # use stm_core::*;
/// let ctx = RuntimeContext::default();
/// let x: Option<i32> = atomically(&ctx, |tx|
///     optionally(tx, |_| retry()));
/// assert_eq!(x, None);
/// ```
pub fn optionally<T, F>(tx: &mut Transaction<'_>, f: F) -> StmClosureResult<Option<T>>
where
    F: Fn(&mut Transaction<'_>) -> StmClosureResult<T>,
{
    tx.or(|t| f(t).map(Some), |_| Ok(None))
}
