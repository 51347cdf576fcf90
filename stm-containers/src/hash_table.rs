//! A transactional hash table (`spec.md` §4.G).
//!
//! Bucketed closed addressing with a fixed, power-of-two bucket count
//! chosen at construction; there is no rehashing. Each bucket is an
//! ordered singly-linked chain of key/value pairs, and `tm_insert` reads
//! the whole chain transactionally before prepending on a miss, exactly
//! as `spec.md` describes. Callers supply their own hash and equality
//! closures at construction rather than relying on `Hash`/`Eq`, so the
//! same key type can back tables with different notions of equality.

use std::sync::Arc;

use stm_core::{tm_alloc, tm_free, RuntimeContext, StmClosureResult, TVar, Transaction, TmBox};

struct Entry<K, V> {
    key: K,
    value: TVar<V>,
    next: TVar<Link<K, V>>,
}

type Link<K, V> = Option<TmBox<Entry<K, V>>>;

/// A transactional hash table keyed by `K`, using caller-supplied hash and
/// equality functions instead of the `Hash`/`Eq` traits.
pub struct HashTable<K, V> {
    buckets: Vec<TVar<Link<K, V>>>,
    mask: u64,
    hash_fn: Arc<dyn Fn(&K) -> u64 + Send + Sync>,
    eq_fn: Arc<dyn Fn(&K, &K) -> bool + Send + Sync>,
}

impl<K, V> HashTable<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Build a table with `bucket_count` buckets, rounded up to the next
    /// power of two. `hash_fn`/`eq_fn` replace the usual `Hash`/`Eq` bounds.
    pub fn new(
        bucket_count: usize,
        hash_fn: impl Fn(&K) -> u64 + Send + Sync + 'static,
        eq_fn: impl Fn(&K, &K) -> bool + Send + Sync + 'static,
    ) -> Self {
        let bucket_count = bucket_count.next_power_of_two().max(1);
        let buckets = (0..bucket_count).map(|_| TVar::new(None)).collect();
        HashTable {
            buckets,
            mask: (bucket_count - 1) as u64,
            hash_fn: Arc::new(hash_fn),
            eq_fn: Arc::new(eq_fn),
        }
    }

    fn bucket_for(&self, key: &K) -> &TVar<Link<K, V>> {
        let idx = ((self.hash_fn)(key) & self.mask) as usize;
        &self.buckets[idx]
    }

    /// `tm_insert`: insert `key`/`value`, replacing any existing entry for
    /// an equal key. Returns `true` if this was a fresh key.
    pub fn tm_insert(
        trans: &mut Transaction<'_>,
        table: &Self,
        key: K,
        value: V,
    ) -> StmClosureResult<bool> {
        let bucket = table.bucket_for(&key);
        let mut current = bucket.read(trans)?;

        while let Some(entry) = current {
            if (table.eq_fn)(&entry.key, &key) {
                entry.value.write(trans, value)?;
                return Ok(false);
            }
            current = entry.next.read(trans)?;
        }

        let head = bucket.read(trans)?;
        let fresh = tm_alloc(
            trans,
            Entry {
                key,
                value: TVar::new(value),
                next: TVar::new(head),
            },
        );
        bucket.write(trans, Some(fresh))?;
        Ok(true)
    }

    /// `tm_get`.
    pub fn tm_get(trans: &mut Transaction<'_>, table: &Self, key: &K) -> StmClosureResult<Option<V>> {
        let bucket = table.bucket_for(key);
        let mut current = bucket.read(trans)?;

        while let Some(entry) = current {
            if (table.eq_fn)(&entry.key, key) {
                return Ok(Some(entry.value.read(trans)?));
            }
            current = entry.next.read(trans)?;
        }
        Ok(None)
    }

    /// `tm_contains`.
    pub fn tm_contains(trans: &mut Transaction<'_>, table: &Self, key: &K) -> StmClosureResult<bool> {
        Ok(Self::tm_get(trans, table, key)?.is_some())
    }

    /// `tm_remove`. Returns whether a matching entry was found.
    pub fn tm_remove(trans: &mut Transaction<'_>, table: &Self, key: &K) -> StmClosureResult<bool> {
        let bucket = table.bucket_for(key);
        let head = bucket.read(trans)?;
        let (new_head, removed) = Self::remove_from(trans, table, head, key)?;
        bucket.write(trans, new_head)?;
        Ok(removed)
    }

    fn remove_from(
        trans: &mut Transaction<'_>,
        table: &Self,
        link: Link<K, V>,
        key: &K,
    ) -> StmClosureResult<(Link<K, V>, bool)> {
        let Some(entry) = link else {
            return Ok((None, false));
        };

        if (table.eq_fn)(&entry.key, key) {
            let rest = entry.next.read(trans)?;
            tm_free(trans, entry);
            return Ok((rest, true));
        }

        let rest = entry.next.read(trans)?;
        let (new_rest, removed) = Self::remove_from(trans, table, rest, key)?;
        entry.next.write(trans, new_rest)?;
        Ok((Some(entry), removed))
    }

    /// Sequential `insert`, run as its own single-operation transaction.
    pub fn insert(&self, ctx: &RuntimeContext, key: K, value: V) -> bool {
        stm_core::atomically(ctx, |trans| Self::tm_insert(trans, self, key.clone(), value.clone()))
    }

    /// Sequential `get`.
    pub fn get(&self, ctx: &RuntimeContext, key: &K) -> Option<V> {
        stm_core::atomically(ctx, |trans| Self::tm_get(trans, self, key))
    }

    /// Sequential `contains`.
    pub fn contains(&self, ctx: &RuntimeContext, key: &K) -> bool {
        stm_core::atomically(ctx, |trans| Self::tm_contains(trans, self, key))
    }

    /// Sequential `remove`.
    pub fn remove(&self, ctx: &RuntimeContext, key: &K) -> bool {
        stm_core::atomically(ctx, |trans| Self::tm_remove(trans, self, key))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn identity_table() -> HashTable<u32, &'static str> {
        HashTable::new(16, |k: &u32| u64::from(*k), |a, b| a == b)
    }

    #[test]
    fn insert_get_remove_roundtrip() {
        let ctx = RuntimeContext::default();
        let table = identity_table();

        assert!(table.insert(&ctx, 1, "one"));
        assert!(table.insert(&ctx, 17, "seventeen")); // collides with 1 at 16 buckets
        assert_eq!(table.get(&ctx, &1), Some("one"));
        assert_eq!(table.get(&ctx, &17), Some("seventeen"));

        assert!(table.remove(&ctx, &1));
        assert!(!table.contains(&ctx, &1));
        assert!(table.contains(&ctx, &17));
    }

    #[test]
    fn insert_of_existing_key_overwrites_and_reports_not_fresh() {
        let ctx = RuntimeContext::default();
        let table = identity_table();

        assert!(table.insert(&ctx, 4, "four"));
        assert!(!table.insert(&ctx, 4, "four-again"));
        assert_eq!(table.get(&ctx, &4), Some("four-again"));
    }

    #[test]
    fn remove_of_missing_key_is_noop() {
        let ctx = RuntimeContext::default();
        let table = identity_table();
        assert!(!table.remove(&ctx, &999));
    }
}
