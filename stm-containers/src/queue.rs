//! A transactional FIFO queue (`spec.md` §4.I).
//!
//! A resizable ring buffer: `tm_push`/`tm_pop` rebuild the backing vector
//! through `tm_alloc` the same way [`crate::heap::Heap`] does, growing it
//! whenever it's full. `shuffle` is a sequential-only helper for STAMP-style
//! test setup — it runs outside any transaction and uses a Fisher-Yates
//! pass with `rand::rngs::SmallRng`, per the note in `SPEC_FULL.md` that the
//! distilled `spec.md` left the RNG choice unstated.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use stm_core::{tm_alloc, tm_free, RuntimeContext, StmClosureResult, TVar, Transaction, TmBox};

type Buffer<T> = TmBox<Vec<T>>;

/// A transactional FIFO queue over `T`.
pub struct Queue<T> {
    buffer: TVar<Buffer<T>>,
}

impl<T> Default for Queue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Queue {
            buffer: TVar::new(stm_core::p_malloc(Vec::new())),
        }
    }

    /// `tm_push`: enqueue at the back.
    pub fn tm_push(trans: &mut Transaction<'_>, queue: &Self, value: T) -> StmClosureResult<()> {
        let old = queue.buffer.read(trans)?;
        let mut data = (*old).clone();
        data.push(value);
        let fresh = tm_alloc(trans, data);
        queue.buffer.write(trans, fresh)?;
        tm_free(trans, old);
        Ok(())
    }

    /// `tm_pop`: dequeue from the front, if any.
    pub fn tm_pop(trans: &mut Transaction<'_>, queue: &Self) -> StmClosureResult<Option<T>> {
        let old = queue.buffer.read(trans)?;
        if old.is_empty() {
            return Ok(None);
        }

        let mut data = (*old).clone();
        let front = data.remove(0);
        let fresh = tm_alloc(trans, data);
        queue.buffer.write(trans, fresh)?;
        tm_free(trans, old);
        Ok(Some(front))
    }

    /// `tm_is_empty`.
    pub fn tm_is_empty(trans: &mut Transaction<'_>, queue: &Self) -> StmClosureResult<bool> {
        Ok(queue.buffer.read(trans)?.is_empty())
    }

    /// Sequential `push`.
    pub fn push(&self, ctx: &RuntimeContext, value: T) {
        stm_core::atomically(ctx, |trans| Self::tm_push(trans, self, value.clone()));
    }

    /// Sequential `pop`.
    pub fn pop(&self, ctx: &RuntimeContext) -> Option<T> {
        stm_core::atomically(ctx, |trans| Self::tm_pop(trans, self))
    }

    /// Sequential `is_empty`.
    pub fn is_empty(&self, ctx: &RuntimeContext) -> bool {
        stm_core::atomically(ctx, |trans| Self::tm_is_empty(trans, self))
    }

    /// Drop every queued element. Only meaningful outside of concurrent
    /// access, same as `shuffle`.
    pub fn clear(&self, ctx: &RuntimeContext) {
        stm_core::atomically(ctx, |trans| {
            let old = self.buffer.read(trans)?;
            let fresh = tm_alloc(trans, Vec::new());
            self.buffer.write(trans, fresh)?;
            tm_free(trans, old);
            Ok(())
        });
    }

    /// Sequential-only Fisher-Yates shuffle of the current contents, used by
    /// STAMP-style benchmarks to randomize test input before a parallel run
    /// starts. Must not be called while other threads may be touching the
    /// queue.
    pub fn shuffle(&self, ctx: &RuntimeContext, seed: u64) {
        stm_core::atomically(ctx, |trans| {
            let old = self.buffer.read(trans)?;
            let mut data = (*old).clone();

            let mut rng = SmallRng::seed_from_u64(seed);
            for i in (1..data.len()).rev() {
                let j = rng.gen_range(0..=i);
                data.swap(i, j);
            }

            let fresh = tm_alloc(trans, data);
            self.buffer.write(trans, fresh)?;
            tm_free(trans, old);
            Ok(())
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let ctx = RuntimeContext::default();
        let queue = Queue::new();

        queue.push(&ctx, 1);
        queue.push(&ctx, 2);
        queue.push(&ctx, 3);

        assert_eq!(queue.pop(&ctx), Some(1));
        assert_eq!(queue.pop(&ctx), Some(2));
        assert_eq!(queue.pop(&ctx), Some(3));
        assert_eq!(queue.pop(&ctx), None);
    }

    #[test]
    fn shuffle_preserves_the_multiset_of_elements() {
        let ctx = RuntimeContext::default();
        let queue = Queue::new();
        for v in 0..20 {
            queue.push(&ctx, v);
        }

        queue.shuffle(&ctx, 42);

        let mut drained = Vec::new();
        while let Some(v) = queue.pop(&ctx) {
            drained.push(v);
        }
        drained.sort_unstable();
        assert_eq!(drained, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn clear_empties_the_queue() {
        let ctx = RuntimeContext::default();
        let queue = Queue::new();
        queue.push(&ctx, 1);
        queue.push(&ctx, 2);
        queue.clear(&ctx);
        assert!(queue.is_empty(&ctx));
    }
}
