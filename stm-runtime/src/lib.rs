//! Worker pool and barrier (`spec.md` component E).
//!
//! STAMP's harness starts a fixed number of worker threads, has each one
//! record its own id and the total thread count in thread-local state, and
//! uses a barrier to keep phases of a benchmark (e.g. "load the input",
//! "run the timed region", "verify the result") synchronized across
//! workers. `WorkerPool` plays that role here: `startup` fixes the worker
//! count, `run` is `thread_start` for every worker plus an implicit
//! `thread_shutdown` once the body returns, and `thread_barrier_wait` is
//! the rendezvous point a body can call at any phase boundary.

use std::cell::RefCell;
use std::sync::{Arc, Barrier};
use std::thread;

use stm_core::RuntimeError;

thread_local! {
    static WORKER: RefCell<Option<WorkerSlot>> = const { RefCell::new(None) };
}

struct WorkerSlot {
    id: usize,
    num_threads: usize,
    barrier: Arc<Barrier>,
}

/// A fixed-size pool of worker threads sharing one barrier.
pub struct WorkerPool {
    barrier: Arc<Barrier>,
    num_threads: usize,
}

impl WorkerPool {
    /// `TM_STARTUP`: fix the number of workers and build the shared
    /// barrier they'll rendezvous on.
    pub fn startup(num_threads: usize) -> Result<WorkerPool, RuntimeError> {
        if num_threads == 0 {
            return Err(RuntimeError::ZeroWorkers);
        }
        Ok(WorkerPool {
            barrier: Arc::new(Barrier::new(num_threads)),
            num_threads,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// `TM_THREAD_START`: spawn every worker running `body(worker_id)`,
    /// and block until all of them return — at which point each has
    /// already run `thread_shutdown` on its own thread.
    ///
    /// `body` is shared across every worker via `Arc`, mirroring STAMP's
    /// single benchmark entry point run once per thread with a different
    /// id.
    pub fn run<F>(&self, body: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let body = Arc::new(body);

        let handles: Vec<_> = (0..self.num_threads)
            .map(|id| {
                let barrier = self.barrier.clone();
                let body = body.clone();
                let num_threads = self.num_threads;
                thread::Builder::new()
                    .name(format!("stm-worker-{id}"))
                    .spawn(move || {
                        thread_start(id, num_threads, barrier);
                        body(id);
                        thread_shutdown();
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

fn thread_start(id: usize, num_threads: usize, barrier: Arc<Barrier>) {
    tracing::debug!(worker = id, num_threads, "thread_start");
    WORKER.with(|w| {
        *w.borrow_mut() = Some(WorkerSlot {
            id,
            num_threads,
            barrier,
        });
    });
}

/// `TM_SHUTDOWN` for a single worker: release its thread-local scratch
/// arena and clear its identity.
fn thread_shutdown() {
    stm_core::reset_arena();
    WORKER.with(|w| {
        if let Some(slot) = w.borrow().as_ref() {
            tracing::debug!(worker = slot.id, "thread_shutdown");
        }
        *w.borrow_mut() = None;
    });
}

/// `thread_getId`: this worker's id, `0..num_threads`.
///
/// # Panics
/// Panics if called from a thread that isn't part of a [`WorkerPool`].
pub fn thread_get_id() -> usize {
    WORKER.with(|w| {
        w.borrow()
            .as_ref()
            .expect("thread_get_id called outside a worker thread")
            .id
    })
}

/// `thread_getNumThread`: the total number of workers in this run.
///
/// # Panics
/// Panics if called from a thread that isn't part of a [`WorkerPool`].
pub fn thread_get_num_threads() -> usize {
    WORKER.with(|w| {
        w.borrow()
            .as_ref()
            .expect("thread_get_num_threads called outside a worker thread")
            .num_threads
    })
}

/// `TM_BARRIER_WAIT`: block until every worker in the pool has called
/// this at least once since the last release.
///
/// # Panics
/// Panics if called from a thread that isn't part of a [`WorkerPool`].
pub fn thread_barrier_wait() {
    WORKER.with(|w| {
        let slot = w.borrow();
        let slot = slot
            .as_ref()
            .expect("thread_barrier_wait called outside a worker thread");
        slot.barrier.wait();
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_workers_is_rejected() {
        assert!(WorkerPool::startup(0).is_err());
    }

    #[test]
    fn every_worker_sees_a_distinct_id() {
        let pool = WorkerPool::startup(4).unwrap();
        let seen: Arc<std::sync::Mutex<Vec<usize>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();

        pool.run(move |id| {
            assert_eq!(thread_get_id(), id);
            assert_eq!(thread_get_num_threads(), 4);
            seen2.lock().unwrap().push(id);
        });

        let mut ids = seen.lock().unwrap().clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    /// Every worker increments a counter, then waits at the barrier
    /// before reading it. No worker should observe a partial count.
    #[test]
    fn barrier_holds_every_worker_back() {
        let pool = WorkerPool::startup(8).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let observed_before_release: Arc<std::sync::Mutex<Vec<usize>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));

        let counter2 = counter.clone();
        let observed2 = observed_before_release.clone();
        pool.run(move |_id| {
            counter2.fetch_add(1, Ordering::SeqCst);
            thread_barrier_wait();
            observed2
                .lock()
                .unwrap()
                .push(counter2.load(Ordering::SeqCst));
        });

        for observed in observed_before_release.lock().unwrap().iter() {
            assert_eq!(*observed, 8);
        }
    }
}
