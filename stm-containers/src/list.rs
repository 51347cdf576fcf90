//! A transactional sorted linked list (`spec.md` §4.J).
//!
//! A singly-linked chain kept sorted by a caller-supplied comparator.
//! Traversal reads each `next` pointer through the transaction, so walking
//! the whole list is snapshot-like: it only conflicts with another
//! transaction if the chain it actually walked gets mutated before commit,
//! same as the ordered map's node-by-node traversal.

use std::sync::Arc;

use stm_core::{tm_alloc, tm_free, RuntimeContext, StmClosureResult, TVar, Transaction, TmBox};

struct Node<T> {
    value: T,
    next: TVar<Link<T>>,
}

type Link<T> = Option<TmBox<Node<T>>>;

/// A transactional sorted singly-linked list over `T`.
pub struct SortedList<T> {
    head: TVar<Link<T>>,
    cmp: Arc<dyn Fn(&T, &T) -> i32 + Send + Sync>,
}

impl<T> SortedList<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Build an empty list ordered by `cmp(a, b) < 0` meaning `a` sorts
    /// before `b`.
    pub fn new(cmp: impl Fn(&T, &T) -> i32 + Send + Sync + 'static) -> Self {
        SortedList {
            head: TVar::new(None),
            cmp: Arc::new(cmp),
        }
    }

    /// `tm_insert`: insert `value` at its sorted position. Duplicates (per
    /// the comparator) are kept, inserted after any equal run.
    pub fn tm_insert(trans: &mut Transaction<'_>, list: &Self, value: T) -> StmClosureResult<()> {
        let head = list.head.read(trans)?;
        let new_head = Self::insert_into(trans, list, head, value)?;
        list.head.write(trans, new_head)
    }

    fn insert_into(
        trans: &mut Transaction<'_>,
        list: &Self,
        link: Link<T>,
        value: T,
    ) -> StmClosureResult<Link<T>> {
        match link {
            Some(node) if (list.cmp)(&node.value, &value) <= 0 => {
                let next = node.next.read(trans)?;
                let new_next = Self::insert_into(trans, list, next, value)?;
                node.next.write(trans, new_next)?;
                Ok(Some(node))
            }
            link => {
                let fresh = tm_alloc(
                    trans,
                    Node {
                        value,
                        next: TVar::new(link),
                    },
                );
                Ok(Some(fresh))
            }
        }
    }

    /// `tm_contains`.
    pub fn tm_contains(trans: &mut Transaction<'_>, list: &Self, value: &T) -> StmClosureResult<bool>
    where
        T: PartialEq,
    {
        let mut current = list.head.read(trans)?;
        while let Some(node) = current {
            let order = (list.cmp)(&node.value, value);
            if order == 0 && node.value == *value {
                return Ok(true);
            }
            if order > 0 {
                return Ok(false);
            }
            current = node.next.read(trans)?;
        }
        Ok(false)
    }

    /// `tm_remove`: remove the first node equal to `value` under `cmp`.
    pub fn tm_remove(trans: &mut Transaction<'_>, list: &Self, value: &T) -> StmClosureResult<bool> {
        let head = list.head.read(trans)?;
        let (new_head, removed) = Self::remove_from(trans, list, head, value)?;
        list.head.write(trans, new_head)?;
        Ok(removed)
    }

    fn remove_from(
        trans: &mut Transaction<'_>,
        list: &Self,
        link: Link<T>,
        value: &T,
    ) -> StmClosureResult<(Link<T>, bool)> {
        let Some(node) = link else {
            return Ok((None, false));
        };

        let order = (list.cmp)(&node.value, value);
        if order > 0 {
            return Ok((Some(node), false));
        }
        if order == 0 {
            let rest = node.next.read(trans)?;
            tm_free(trans, node);
            return Ok((rest, true));
        }

        let rest = node.next.read(trans)?;
        let (new_rest, removed) = Self::remove_from(trans, list, rest, value)?;
        node.next.write(trans, new_rest)?;
        Ok((Some(node), removed))
    }

    /// Snapshot the whole list into a `Vec`, in sorted order.
    pub fn tm_to_vec(trans: &mut Transaction<'_>, list: &Self) -> StmClosureResult<Vec<T>> {
        let mut out = Vec::new();
        let mut current = list.head.read(trans)?;
        while let Some(node) = current {
            out.push(node.value.clone());
            current = node.next.read(trans)?;
        }
        Ok(out)
    }

    /// Sequential `insert`.
    pub fn insert(&self, ctx: &RuntimeContext, value: T) {
        stm_core::atomically(ctx, |trans| Self::tm_insert(trans, self, value.clone()));
    }

    /// Sequential `remove`.
    pub fn remove(&self, ctx: &RuntimeContext, value: &T) -> bool {
        stm_core::atomically(ctx, |trans| Self::tm_remove(trans, self, value))
    }

    /// Sequential `contains`.
    pub fn contains(&self, ctx: &RuntimeContext, value: &T) -> bool
    where
        T: PartialEq,
    {
        stm_core::atomically(ctx, |trans| Self::tm_contains(trans, self, value))
    }

    /// Sequential snapshot into a sorted `Vec`.
    pub fn to_vec(&self, ctx: &RuntimeContext) -> Vec<T> {
        stm_core::atomically(ctx, |trans| Self::tm_to_vec(trans, self))
    }
}
