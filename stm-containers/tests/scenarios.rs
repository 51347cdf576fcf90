//! Multi-threaded stress tests for the ordered map and the priority heap.
//! Scaled down from benchmark-scale iteration counts, but still enough
//! concurrent contention on shared keys/handles to exercise the commit
//! protocol's conflict detection for real.

use std::sync::Arc;
use std::thread;

use rand::Rng;

use stm_containers::{Heap, OrderedMap};
use stm_core::RuntimeContext;

/// Several workers hammer the same small key space with interleaved
/// insert/delete/contains. The map must never panic or corrupt itself:
/// afterward, every key's `contains` must agree with its `get`.
#[test]
fn ordered_map_survives_concurrent_churn() {
    const WORKERS: usize = 4;
    const ITERATIONS: usize = 2_000;
    const KEY_SPACE: i32 = 64;

    let ctx = Arc::new(RuntimeContext::default());
    let map: Arc<OrderedMap<i32, i32>> = Arc::new(OrderedMap::new());

    let handles: Vec<_> = (0..WORKERS)
        .map(|seed| {
            let ctx = ctx.clone();
            let map = map.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for i in 0..ITERATIONS {
                    let key = rng.gen_range(0..KEY_SPACE);
                    match i % 3 {
                        0 => {
                            map.insert(&ctx, key, (seed * 100_000 + i) as i32);
                        }
                        1 => {
                            map.delete(&ctx, &key);
                        }
                        _ => {
                            let _ = map.contains(&ctx, &key);
                        }
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for key in 0..KEY_SPACE {
        assert_eq!(map.contains(&ctx, &key), map.get(&ctx, &key).is_some());
    }
}

/// A heap preloaded with distinct priorities, drained concurrently by
/// several workers racing `remove_max`. Every priority must come out of
/// exactly one worker's pops — none lost, none duplicated.
#[test]
fn heap_workers_drain_every_item_exactly_once() {
    const ITEMS: i32 = 2_000;
    const WORKERS: usize = 4;

    let ctx = Arc::new(RuntimeContext::default());
    let heap: Arc<Heap<i32>> = Arc::new(Heap::new(|a, b| a - b));
    for i in 0..ITEMS {
        heap.insert(&ctx, i);
    }

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let ctx = ctx.clone();
            let heap = heap.clone();
            thread::spawn(move || {
                let mut popped = Vec::new();
                while let Some(v) = heap.remove_max(&ctx) {
                    popped.push(v);
                }
                popped
            })
        })
        .collect();

    let mut all: Vec<i32> = Vec::new();
    for h in handles {
        all.extend(h.join().unwrap());
    }
    all.sort_unstable();

    assert_eq!(all, (0..ITEMS).collect::<Vec<_>>());
    assert!(heap.is_empty(&ctx));
}
