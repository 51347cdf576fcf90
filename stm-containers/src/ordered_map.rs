//! A height-balanced ordered map (`spec.md` §4.F).
//!
//! Grounded on `original_source/lib/avltree.c`: an AVL tree with no parent
//! pointers, rebalanced by rebuilding the path from the inserted/deleted
//! leaf back up to the root. Each node's child links and cached height
//! are themselves `TVar`s, so a `tm_*` traversal participates in the
//! enclosing transaction's conflict detection one pointer-chase at a time,
//! exactly as `spec.md` asks ("every node pointer traversal, every
//! balance-factor update... uses `tm_read`/`tm_write`").

use std::cmp::Ordering as CmpOrdering;

use stm_core::{tm_alloc, tm_free, RuntimeContext, StmClosureResult, Transaction, TVar, TmBox};

struct Node<K, V> {
    key: K,
    value: TVar<V>,
    left: TVar<Option<TmBox<Node<K, V>>>>,
    right: TVar<Option<TmBox<Node<K, V>>>>,
    height: TVar<i32>,
}

type Link<K, V> = Option<TmBox<Node<K, V>>>;

/// A transactional AVL map from `K` to `V`.
pub struct OrderedMap<K, V> {
    root: TVar<Link<K, V>>,
}

impl<K, V> Default for OrderedMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> OrderedMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        OrderedMap {
            root: TVar::new(None),
        }
    }

    fn height(trans: &mut Transaction<'_>, link: &Link<K, V>) -> StmClosureResult<i32> {
        match link {
            Some(node) => node.height.read(trans),
            None => Ok(0),
        }
    }

    fn update_height(trans: &mut Transaction<'_>, node: &TmBox<Node<K, V>>) -> StmClosureResult<()> {
        let left = node.left.read(trans)?;
        let right = node.right.read(trans)?;
        let h = 1 + Self::height(trans, &left)?.max(Self::height(trans, &right)?);
        node.height.write(trans, h)
    }

    fn balance_factor(trans: &mut Transaction<'_>, node: &TmBox<Node<K, V>>) -> StmClosureResult<i32> {
        let left = node.left.read(trans)?;
        let right = node.right.read(trans)?;
        Ok(Self::height(trans, &left)? - Self::height(trans, &right)?)
    }

    fn rotate_right(
        trans: &mut Transaction<'_>,
        node: TmBox<Node<K, V>>,
    ) -> StmClosureResult<TmBox<Node<K, V>>> {
        let new_root = node
            .left
            .read(trans)?
            .expect("rotate_right requires a left child");
        let shifted = new_root.right.read(trans)?;
        node.left.write(trans, shifted)?;
        Self::update_height(trans, &node)?;
        new_root.right.write(trans, Some(node))?;
        Self::update_height(trans, &new_root)?;
        Ok(new_root)
    }

    fn rotate_left(
        trans: &mut Transaction<'_>,
        node: TmBox<Node<K, V>>,
    ) -> StmClosureResult<TmBox<Node<K, V>>> {
        let new_root = node
            .right
            .read(trans)?
            .expect("rotate_left requires a right child");
        let shifted = new_root.left.read(trans)?;
        node.right.write(trans, shifted)?;
        Self::update_height(trans, &node)?;
        new_root.left.write(trans, Some(node))?;
        Self::update_height(trans, &new_root)?;
        Ok(new_root)
    }

    fn rebalance(
        trans: &mut Transaction<'_>,
        node: TmBox<Node<K, V>>,
    ) -> StmClosureResult<TmBox<Node<K, V>>> {
        Self::update_height(trans, &node)?;
        let balance = Self::balance_factor(trans, &node)?;

        if balance > 1 {
            let left = node.left.read(trans)?.expect("balance > 1 implies a left child");
            if Self::balance_factor(trans, &left)? < 0 {
                let rotated = Self::rotate_left(trans, left)?;
                node.left.write(trans, Some(rotated))?;
            }
            return Self::rotate_right(trans, node);
        }

        if balance < -1 {
            let right = node
                .right
                .read(trans)?
                .expect("balance < -1 implies a right child");
            if Self::balance_factor(trans, &right)? > 0 {
                let rotated = Self::rotate_right(trans, right)?;
                node.right.write(trans, Some(rotated))?;
            }
            return Self::rotate_left(trans, node);
        }

        Ok(node)
    }

    fn insert_into(
        trans: &mut Transaction<'_>,
        link: Link<K, V>,
        key: &K,
        value: &V,
    ) -> StmClosureResult<(TmBox<Node<K, V>>, bool)> {
        let Some(node) = link else {
            let fresh = tm_alloc(
                trans,
                Node {
                    key: key.clone(),
                    value: TVar::new(value.clone()),
                    left: TVar::new(None),
                    right: TVar::new(None),
                    height: TVar::new(1),
                },
            );
            return Ok((fresh, true));
        };

        match key.cmp(&node.key) {
            CmpOrdering::Equal => Ok((node, false)),
            CmpOrdering::Less => {
                let left = node.left.read(trans)?;
                let (new_left, inserted) = Self::insert_into(trans, left, key, value)?;
                node.left.write(trans, Some(new_left))?;
                Ok((Self::rebalance(trans, node)?, inserted))
            }
            CmpOrdering::Greater => {
                let right = node.right.read(trans)?;
                let (new_right, inserted) = Self::insert_into(trans, right, key, value)?;
                node.right.write(trans, Some(new_right))?;
                Ok((Self::rebalance(trans, node)?, inserted))
            }
        }
    }

    /// `tm_insert`: insert `key`/`value`. Returns `false` (and leaves the
    /// map untouched) if `key` is already present.
    pub fn tm_insert(trans: &mut Transaction<'_>, map: &Self, key: K, value: V) -> StmClosureResult<bool> {
        let root = map.root.read(trans)?;
        let (new_root, inserted) = Self::insert_into(trans, root, &key, &value)?;
        map.root.write(trans, Some(new_root))?;
        Ok(inserted)
    }

    fn min_node(trans: &mut Transaction<'_>, node: &TmBox<Node<K, V>>) -> StmClosureResult<TmBox<Node<K, V>>> {
        match node.left.read(trans)? {
            Some(left) => Self::min_node(trans, &left),
            None => Ok(node.clone()),
        }
    }

    fn delete_from(
        trans: &mut Transaction<'_>,
        link: Link<K, V>,
        key: &K,
    ) -> StmClosureResult<(Link<K, V>, bool)> {
        let Some(node) = link else {
            return Ok((None, false));
        };

        match key.cmp(&node.key) {
            CmpOrdering::Less => {
                let left = node.left.read(trans)?;
                let (new_left, deleted) = Self::delete_from(trans, left, key)?;
                node.left.write(trans, new_left)?;
                Ok((Some(Self::rebalance(trans, node)?), deleted))
            }
            CmpOrdering::Greater => {
                let right = node.right.read(trans)?;
                let (new_right, deleted) = Self::delete_from(trans, right, key)?;
                node.right.write(trans, new_right)?;
                Ok((Some(Self::rebalance(trans, node)?), deleted))
            }
            CmpOrdering::Equal => {
                let left = node.left.read(trans)?;
                let right = node.right.read(trans)?;

                let replacement = match (left, right) {
                    (None, None) => {
                        tm_free(trans, node);
                        return Ok((None, true));
                    }
                    (Some(left), None) => {
                        tm_free(trans, node);
                        left
                    }
                    (None, Some(right)) => {
                        tm_free(trans, node);
                        right
                    }
                    (Some(left), Some(right)) => {
                        let successor = Self::min_node(trans, &right)?;
                        let (new_right, _) =
                            Self::delete_from(trans, Some(right), &successor.key)?;
                        let spliced = tm_alloc(
                            trans,
                            Node {
                                key: successor.key.clone(),
                                value: TVar::new(successor.value.read(trans)?),
                                left: TVar::new(Some(left)),
                                right: TVar::new(new_right),
                                height: TVar::new(1),
                            },
                        );
                        tm_free(trans, node);
                        spliced
                    }
                };

                Ok((Some(Self::rebalance(trans, replacement)?), true))
            }
        }
    }

    /// `tm_delete`: remove `key` if present, returning whether it was
    /// found.
    pub fn tm_delete(trans: &mut Transaction<'_>, map: &Self, key: &K) -> StmClosureResult<bool> {
        let root = map.root.read(trans)?;
        let (new_root, deleted) = Self::delete_from(trans, root, key)?;
        map.root.write(trans, new_root)?;
        Ok(deleted)
    }

    fn find(
        trans: &mut Transaction<'_>,
        link: &Link<K, V>,
        key: &K,
    ) -> StmClosureResult<Option<TmBox<Node<K, V>>>> {
        let mut current = link.clone();
        loop {
            match current {
                None => return Ok(None),
                Some(node) => match key.cmp(&node.key) {
                    CmpOrdering::Equal => return Ok(Some(node)),
                    CmpOrdering::Less => current = node.left.read(trans)?,
                    CmpOrdering::Greater => current = node.right.read(trans)?,
                },
            }
        }
    }

    /// `tm_contains`.
    pub fn tm_contains(trans: &mut Transaction<'_>, map: &Self, key: &K) -> StmClosureResult<bool> {
        let root = map.root.read(trans)?;
        Ok(Self::find(trans, &root, key)?.is_some())
    }

    /// `tm_get`.
    pub fn tm_get(trans: &mut Transaction<'_>, map: &Self, key: &K) -> StmClosureResult<Option<V>> {
        let root = map.root.read(trans)?;
        match Self::find(trans, &root, key)? {
            Some(node) => Ok(Some(node.value.read(trans)?)),
            None => Ok(None),
        }
    }

    /// Sequential `insert`, run as its own single-operation transaction.
    pub fn insert(&self, ctx: &RuntimeContext, key: K, value: V) -> bool {
        stm_core::atomically(ctx, |trans| Self::tm_insert(trans, self, key.clone(), value.clone()))
    }

    /// Sequential `delete`.
    pub fn delete(&self, ctx: &RuntimeContext, key: &K) -> bool {
        stm_core::atomically(ctx, |trans| Self::tm_delete(trans, self, key))
    }

    /// Sequential `contains`.
    pub fn contains(&self, ctx: &RuntimeContext, key: &K) -> bool {
        stm_core::atomically(ctx, |trans| Self::tm_contains(trans, self, key))
    }

    /// Sequential `get`.
    pub fn get(&self, ctx: &RuntimeContext, key: &K) -> Option<V> {
        stm_core::atomically(ctx, |trans| Self::tm_get(trans, self, key))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_get_delete_roundtrip() {
        let ctx = RuntimeContext::default();
        let map: OrderedMap<i32, &'static str> = OrderedMap::new();

        assert!(map.insert(&ctx, 5, "five"));
        assert!(map.insert(&ctx, 2, "two"));
        assert!(map.insert(&ctx, 8, "eight"));
        assert!(!map.insert(&ctx, 5, "five-again"), "duplicate insert must be rejected");

        assert_eq!(map.get(&ctx, &5), Some("five"));
        assert_eq!(map.get(&ctx, &2), Some("two"));
        assert_eq!(map.get(&ctx, &100), None);

        assert!(map.delete(&ctx, &2));
        assert!(!map.contains(&ctx, &2));
        assert!(map.contains(&ctx, &5));
    }

    /// Insert a run of ascending keys, which forces repeated left
    /// rotations; every key should remain reachable afterwards.
    #[test]
    fn stays_balanced_under_sorted_insertion() {
        let ctx = RuntimeContext::default();
        let map: OrderedMap<i32, i32> = OrderedMap::new();

        for i in 0..200 {
            assert!(map.insert(&ctx, i, i * 2));
        }
        for i in 0..200 {
            assert_eq!(map.get(&ctx, &i), Some(i * 2));
        }
    }

    #[test]
    fn delete_of_missing_key_is_noop() {
        let ctx = RuntimeContext::default();
        let map: OrderedMap<i32, i32> = OrderedMap::new();
        map.insert(&ctx, 1, 10);
        assert!(!map.delete(&ctx, &999));
        assert_eq!(map.get(&ctx, &1), Some(10));
    }
}
