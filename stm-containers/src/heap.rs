//! A transactional priority heap (`spec.md` §4.H).
//!
//! Array-backed binary heap ordered by a caller-supplied comparator, where
//! `cmp(a, b) < 0` means `a` has strictly higher priority than `b`. Every
//! mutation rebuilds the backing vector through `tm_alloc` and hands the
//! previous one to the free log, the same rebuild-and-splice shape the
//! ordered map uses for its node links.

use std::sync::Arc;

use stm_core::{tm_alloc, tm_free, RuntimeContext, StmClosureResult, TVar, Transaction, TmBox};

type Buffer<T> = TmBox<Vec<T>>;

/// A transactional binary heap over `T`, ordered by a caller-supplied
/// comparator rather than `Ord`.
pub struct Heap<T> {
    buffer: TVar<Buffer<T>>,
    cmp: Arc<dyn Fn(&T, &T) -> i32 + Send + Sync>,
}

impl<T> Heap<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Build an empty heap. `cmp(a, b) < 0` means `a` outranks `b`.
    pub fn new(cmp: impl Fn(&T, &T) -> i32 + Send + Sync + 'static) -> Self {
        Heap {
            buffer: TVar::new(stm_core::p_malloc(Vec::new())),
            cmp: Arc::new(cmp),
        }
    }

    fn higher_priority(heap: &Self, a: &T, b: &T) -> bool {
        (heap.cmp)(a, b) < 0
    }

    /// `tm_insert`: push a value, restoring heap order by sifting up.
    pub fn tm_insert(trans: &mut Transaction<'_>, heap: &Self, value: T) -> StmClosureResult<()> {
        let old = heap.buffer.read(trans)?;
        let mut data = (*old).clone();
        data.push(value);

        let mut idx = data.len() - 1;
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if Self::higher_priority(heap, &data[idx], &data[parent]) {
                data.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }

        let fresh = tm_alloc(trans, data);
        heap.buffer.write(trans, fresh)?;
        tm_free(trans, old);
        Ok(())
    }

    /// `tm_remove_max`: pop the highest-priority element, if any.
    pub fn tm_remove_max(trans: &mut Transaction<'_>, heap: &Self) -> StmClosureResult<Option<T>> {
        let old = heap.buffer.read(trans)?;
        if old.is_empty() {
            return Ok(None);
        }

        let mut data = (*old).clone();
        let top = data.swap_remove(0);

        let len = data.len();
        let mut idx = 0;
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut best = idx;
            if left < len && Self::higher_priority(heap, &data[left], &data[best]) {
                best = left;
            }
            if right < len && Self::higher_priority(heap, &data[right], &data[best]) {
                best = right;
            }
            if best == idx {
                break;
            }
            data.swap(idx, best);
            idx = best;
        }

        let fresh = tm_alloc(trans, data);
        heap.buffer.write(trans, fresh)?;
        tm_free(trans, old);
        Ok(Some(top))
    }

    /// `tm_is_empty`.
    pub fn tm_is_empty(trans: &mut Transaction<'_>, heap: &Self) -> StmClosureResult<bool> {
        Ok(heap.buffer.read(trans)?.is_empty())
    }

    /// Sequential `insert`.
    pub fn insert(&self, ctx: &RuntimeContext, value: T) {
        stm_core::atomically(ctx, |trans| Self::tm_insert(trans, self, value.clone()));
    }

    /// Sequential `remove_max`.
    pub fn remove_max(&self, ctx: &RuntimeContext) -> Option<T> {
        stm_core::atomically(ctx, |trans| Self::tm_remove_max(trans, self))
    }

    /// Sequential `is_empty`.
    pub fn is_empty(&self, ctx: &RuntimeContext) -> bool {
        stm_core::atomically(ctx, |trans| Self::tm_is_empty(trans, self))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn min_heap() -> Heap<i32> {
        Heap::new(|a, b| a - b)
    }

    #[test]
    fn pops_in_priority_order() {
        let ctx = RuntimeContext::default();
        let heap = min_heap();

        for v in [5, 1, 9, 3, 7, 2] {
            heap.insert(&ctx, v);
        }

        let mut popped = Vec::new();
        while let Some(v) = heap.remove_max(&ctx) {
            popped.push(v);
        }
        assert_eq!(popped, vec![1, 2, 3, 5, 7, 9]);
    }

    #[test]
    fn empty_heap_pops_none() {
        let ctx = RuntimeContext::default();
        let heap: Heap<i32> = min_heap();
        assert!(heap.is_empty(&ctx));
        assert_eq!(heap.remove_max(&ctx), None);
    }

    #[test]
    fn handles_a_larger_run() {
        let ctx = RuntimeContext::default();
        let heap = min_heap();
        for v in 0..100 {
            heap.insert(&ctx, 100 - v);
        }
        let mut last = i32::MIN;
        let mut count = 0;
        while let Some(v) = heap.remove_max(&ctx) {
            assert!(v >= last);
            last = v;
            count += 1;
        }
        assert_eq!(count, 100);
    }
}
