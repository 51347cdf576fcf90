//! The transaction-aware allocator (`spec.md` §4.D).
//!
//! STAMP's `lib/memory.c` is "a very simple pseudo thread-local memory
//! allocator": each worker gets its own arena and nothing is ever freed
//! back to the OS until the whole run ends. `TmBox<T>` keeps that shape —
//! allocation is cheap and thread-local scratch space is available via
//! [`with_arena`] — but rollback safety is handled by `Arc<T>`'s own
//! reference counting rather than hand-rolled free lists: an object
//! logged by `tm_alloc` and never published is dropped the instant the
//! failed attempt's stack frame unwinds, and an object named by `tm_free`
//! stays alive for as long as whatever live structure still references
//! it, exactly like the "is garbage" flag STAMP's containers set instead
//! of freeing immediately.

use std::any::Any;
use std::cell::RefCell;
use std::ops::Deref;
use std::sync::Arc;

use bumpalo::Bump;

use crate::transaction::Transaction;

thread_local! {
    /// Per-thread scratch arena, the Rust-side stand-in for STAMP's
    /// `P_MALLOC` pool. Reset (not dropped) at `thread_shutdown`
    /// (`stm-runtime`), so the allocator is reused across a worker's
    /// whole lifetime rather than rebuilt per transaction.
    static ARENA: RefCell<Bump> = RefCell::new(Bump::new());
}

/// Run `f` against this thread's scratch arena.
///
/// Intended for transient, single-attempt buffers that never need to
/// survive a commit or escape the closure — rollback-sensitive data
/// belongs in a [`TmBox`] instead.
pub fn with_arena<R>(f: impl FnOnce(&Bump) -> R) -> R {
    ARENA.with(|a| f(&a.borrow()))
}

/// Release every allocation made through this thread's arena since the
/// last reset. Called by `stm-runtime`'s `thread_shutdown`.
pub fn reset_arena() {
    ARENA.with(|a| a.borrow_mut().reset());
}

/// A transactionally-allocated value (`spec.md` §4.D's `TM_ALLOC`
/// result).
pub struct TmBox<T: ?Sized>(Arc<T>);

// Written by hand rather than `#[derive(Clone)]`: deriving would add a
// spurious `T: Clone` bound, but `Arc<T>` is cloneable regardless of
// whether `T` is.
impl<T: ?Sized> Clone for TmBox<T> {
    fn clone(&self) -> Self {
        TmBox(self.0.clone())
    }
}

impl<T> TmBox<T>
where
    T: Any + Send + Sync,
{
    fn new(value: T) -> Self {
        TmBox(Arc::new(value))
    }
}

impl<T: ?Sized> Deref for TmBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> TmBox<T> {
    /// Check if two boxes name the same allocation.
    pub fn ptr_eq(this: &TmBox<T>, other: &TmBox<T>) -> bool {
        Arc::ptr_eq(&this.0, &other.0)
    }
}

/// `TM_ALLOC`: allocate `value` inside a transaction.
///
/// The allocation is logged so that if this attempt aborts, the log's
/// reference (ordinarily the only remaining one, since the closure that
/// created it has already unwound) is dropped and the memory is released
/// right away rather than leaking for the lifetime of the process.
pub fn tm_alloc<T>(trans: &mut Transaction<'_>, value: T) -> TmBox<T>
where
    T: Any + Send + Sync,
{
    let boxed = TmBox::new(value);
    trans.log_alloc(boxed.0.clone() as Arc<dyn Any + Send + Sync>);
    boxed
}

/// `TM_FREE`: mark `obj` for release at commit.
///
/// Nothing is actually deallocated here. The log entry is dropped either
/// at commit (releasing the log's reference — real if the caller's own
/// copy of `obj` was its last use) or at abort (where it is never more
/// than a redundant reference, since the object is still reachable
/// through whatever structure the aborted attempt would have unlinked it
/// from).
pub fn tm_free<T>(trans: &mut Transaction<'_>, obj: TmBox<T>)
where
    T: Any + Send + Sync,
{
    trans.log_free(obj.0);
}

/// Non-transactional allocation, for sequential setup code run outside
/// any `atomically` block.
pub fn p_malloc<T>(value: T) -> TmBox<T>
where
    T: Any + Send + Sync,
{
    TmBox::new(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::runtime::RuntimeContext;
    use crate::transaction::atomically;

    #[test]
    fn alloc_survives_commit() {
        let ctx = RuntimeContext::default();
        let boxed = atomically(&ctx, |tx| Ok(tm_alloc(tx, 7_u32)));
        assert_eq!(*boxed, 7);
    }

    #[test]
    fn scratch_arena_round_trips() {
        let out = with_arena(|arena| {
            let v: &mut [u32] = arena.alloc_slice_fill_copy(4, 0);
            v[2] = 9;
            v[2]
        });
        assert_eq!(out, 9);
        reset_arena();
    }
}
