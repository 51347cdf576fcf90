//! A transactional growable vector (`spec.md` §4.K).
//!
//! `size` and the backing buffer are separate `TVar`s, read independently by
//! `tm_push_back` the way `spec.md` describes: a push reads size and the
//! buffer, and only allocates a new (doubled) buffer when the old one is
//! full. The old buffer is handed to the free log exactly once, on the
//! attempt that actually outgrows it.

use stm_core::{tm_alloc, tm_free, RuntimeContext, StmClosureResult, TVar, Transaction, TmBox};

type Buffer<T> = TmBox<Vec<T>>;

/// A transactional growable array over `T`.
pub struct TVector<T> {
    buffer: TVar<Buffer<T>>,
    size: TVar<usize>,
}

impl<T> Default for TVector<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TVector<T>
where
    T: Clone + Send + Sync + 'static,
{
    const INITIAL_CAPACITY: usize = 16;

    pub fn new() -> Self {
        TVector {
            buffer: TVar::new(stm_core::p_malloc(Vec::with_capacity(Self::INITIAL_CAPACITY))),
            size: TVar::new(0),
        }
    }

    /// `tm_push_back`: append `value`, growing the backing buffer by
    /// doubling when it's at capacity.
    pub fn tm_push_back(trans: &mut Transaction<'_>, vec: &Self, value: T) -> StmClosureResult<()> {
        let size = vec.size.read(trans)?;
        let old = vec.buffer.read(trans)?;

        if size < old.capacity() {
            let mut data = (*old).clone();
            data.push(value);
            let fresh = tm_alloc(trans, data);
            vec.buffer.write(trans, fresh)?;
            tm_free(trans, old);
        } else {
            let new_capacity = (old.capacity().max(1)) * 2;
            let mut data = Vec::with_capacity(new_capacity);
            data.extend_from_slice(&old);
            data.push(value);
            let fresh = tm_alloc(trans, data);
            vec.buffer.write(trans, fresh)?;
            tm_free(trans, old);
        }

        vec.size.write(trans, size + 1)
    }

    /// `tm_pop_back`: remove and return the last element, if any.
    pub fn tm_pop_back(trans: &mut Transaction<'_>, vec: &Self) -> StmClosureResult<Option<T>> {
        let size = vec.size.read(trans)?;
        if size == 0 {
            return Ok(None);
        }

        let old = vec.buffer.read(trans)?;
        let mut data = (*old).clone();
        let popped = data.pop();
        let fresh = tm_alloc(trans, data);
        vec.buffer.write(trans, fresh)?;
        tm_free(trans, old);
        vec.size.write(trans, size - 1)?;
        Ok(popped)
    }

    /// `tm_get`: read the element at `index`, if in bounds.
    pub fn tm_get(trans: &mut Transaction<'_>, vec: &Self, index: usize) -> StmClosureResult<Option<T>> {
        let size = vec.size.read(trans)?;
        if index >= size {
            return Ok(None);
        }
        let buffer = vec.buffer.read(trans)?;
        Ok(buffer.get(index).cloned())
    }

    /// `tm_len`.
    pub fn tm_len(trans: &mut Transaction<'_>, vec: &Self) -> StmClosureResult<usize> {
        vec.size.read(trans)
    }

    /// Sequential `push_back`.
    pub fn push_back(&self, ctx: &RuntimeContext, value: T) {
        stm_core::atomically(ctx, |trans| Self::tm_push_back(trans, self, value.clone()));
    }

    /// Sequential `pop_back`.
    pub fn pop_back(&self, ctx: &RuntimeContext) -> Option<T> {
        stm_core::atomically(ctx, |trans| Self::tm_pop_back(trans, self))
    }

    /// Sequential `get`.
    pub fn get(&self, ctx: &RuntimeContext, index: usize) -> Option<T> {
        stm_core::atomically(ctx, |trans| Self::tm_get(trans, self, index))
    }

    /// Sequential `len`.
    pub fn len(&self, ctx: &RuntimeContext) -> usize {
        stm_core::atomically(ctx, |trans| Self::tm_len(trans, self))
    }

    /// `len(ctx) == 0`.
    pub fn is_empty(&self, ctx: &RuntimeContext) -> bool {
        self.len(ctx) == 0
    }
}
