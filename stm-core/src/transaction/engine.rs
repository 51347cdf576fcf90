//! The TL2-style transaction descriptor and commit/abort engine
//! (`spec.md` §4.B and §4.C).

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;

use crate::orec::OrecSnapshot;
use crate::result::{StmClosureResult, StmError, TransactionClosureResult, TransactionError};
use crate::runtime::{RuntimeContext, StmConfig};
use crate::tvar::{TVar, VarControlBlock};

use super::{TransactionControl, TransactionGuard, TransactionResult};

cfg_if::cfg_if! {
    if #[cfg(feature = "hash-registers")] {
        use rustc_hash::FxHashSet;
        type ReadSeenSet = FxHashSet<u64>;
    } else {
        use std::collections::BTreeSet;
        type ReadSeenSet = BTreeSet<u64>;
    }
}

type ArcAny = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct WriteEntry {
    control_block: Arc<VarControlBlock>,
    value: ArcAny,
}

/// Run a function atomically against `ctx`'s orec table and global clock.
///
/// Nested calls to `atomically` are not allowed on the same thread. A
/// run-time check prevents this; see `Transaction::read`/`write` to express
/// composable sub-operations instead.
pub fn atomically<T, F>(ctx: &RuntimeContext, f: F) -> T
where
    F: Fn(&mut Transaction<'_>) -> StmClosureResult<T>,
{
    match Transaction::with_control(ctx, |_| TransactionControl::Retry, f) {
        Some(t) => t,
        None => unreachable!("a Retry-only control never abandons the loop"),
    }
}

/// Run a function atomically, allowing the body to abort with a client
/// error `E` via [`crate::abort`].
pub fn atomically_with_err<T, E, F>(ctx: &RuntimeContext, f: F) -> Result<T, E>
where
    F: Fn(&mut Transaction<'_>) -> TransactionClosureResult<T, E>,
{
    Transaction::with_err(ctx, f)
}

/// Exponential random backoff, `spec.md` §5: delay ~ `uniform[0, 2^min(k,K)]
/// * base`, doubling the window on every consecutive failed attempt up to
/// `K = config.backoff_cap`.
fn backoff(config: &StmConfig, attempt: u32) {
    let exponent = attempt.min(config.backoff_cap);
    let max_units = 1u64 << exponent;
    let units = rand::thread_rng().gen_range(0..=max_units);
    std::thread::sleep(config.backoff_base * units as u32);
}

/// A transaction attempt: read set, write set, and the allocator logs it
/// carries for `spec.md` §4.D's rollback-safe allocation.
///
/// One `Transaction` is reused across every attempt of a single
/// `atomically` call; `reset` rewinds it between attempts instead of
/// allocating a fresh descriptor each time.
pub struct Transaction<'ctx> {
    ctx: &'ctx RuntimeContext,

    /// Snapshot of the global clock taken at the start of this attempt.
    rv: u64,

    /// Ordered (orec index, version-at-read) pairs, used to revalidate the
    /// whole snapshot at commit.
    read_set: Vec<(usize, u64)>,

    /// Handles already present in `read_set`, so repeat reads of the same
    /// `TVar` within one attempt don't grow it.
    read_seen: ReadSeenSet,

    /// Redo log keyed by handle, giving commit a fixed lock-acquisition
    /// order no matter what order the body touched the vars in.
    write_set: BTreeMap<u64, WriteEntry>,

    alloc_log: Vec<ArcAny>,
    free_log: Vec<ArcAny>,

    /// Always 1 for the lifetime of an attempt. See `TransactionGuard`'s
    /// doc comment: real re-entrant nesting is expressed by threading the
    /// same `&mut Transaction` through ordinary calls, so this never needs
    /// to move.
    #[allow(dead_code)]
    nest_level: u32,
}

impl<'ctx> Transaction<'ctx> {
    fn new(ctx: &'ctx RuntimeContext) -> Transaction<'ctx> {
        Transaction {
            ctx,
            rv: ctx.clock.read(),
            read_set: Vec::new(),
            read_seen: ReadSeenSet::default(),
            write_set: BTreeMap::new(),
            alloc_log: Vec::new(),
            free_log: Vec::new(),
            nest_level: 1,
        }
    }

    /// Rewind to a fresh attempt: drop whatever the previous attempt logged
    /// and take a new snapshot of the clock.
    ///
    /// Dropping `alloc_log` here is what actually releases memory on
    /// abort: the closure body that created those entries has already
    /// returned (and dropped its own locals) by the time we get here, so
    /// our log held the last reference. `free_log` is dropped the same
    /// way; nothing was ever published, so the objects it named stay
    /// reachable through whatever live structure still points at them.
    fn reset(&mut self) {
        self.rv = self.ctx.clock.read();
        self.read_set.clear();
        self.read_seen.clear();
        self.write_set.clear();
        self.alloc_log.clear();
        self.free_log.clear();
    }

    #[allow(clippy::needless_pass_by_value)]
    fn downcast<T: Any + Clone>(var: ArcAny) -> T {
        match var.downcast_ref::<T>() {
            Some(s) => s.clone(),
            None => unreachable!("TVar has wrong type"),
        }
    }

    /// Read a variable and return the value.
    ///
    /// The returned value may be stale with respect to the final,
    /// committed state of the transaction; it is only ever guaranteed
    /// consistent with the snapshot this attempt began with. Code run
    /// inside a transaction must tolerate that without looping forever —
    /// `commit` is what rejects a transaction that read a stale value.
    pub fn read<T: Send + Sync + Any + Clone>(&mut self, var: &TVar<T>) -> StmClosureResult<T> {
        let handle = var.handle();

        if let Some(entry) = self.write_set.get(&handle) {
            return Ok(Self::downcast(entry.value.clone()));
        }

        let idx = self.ctx.orecs.index_of(handle);
        let orec = self.ctx.orecs.at(idx);

        let before = orec.load();
        if before.is_locked() || before.version() > self.rv {
            return Err(StmError::Failure);
        }

        let value = var.read_ref_atomic();

        let after = orec.load();
        if after != before {
            return Err(StmError::Failure);
        }

        if self.read_seen.insert(handle) {
            self.read_set.push((idx, before.version()));
        }

        Ok(Self::downcast(value))
    }

    /// Write a variable.
    ///
    /// Buffered in the redo log; not visible to other threads until
    /// `commit` publishes it.
    pub fn write<T: Any + Send + Sync + Clone>(
        &mut self,
        var: &TVar<T>,
        value: T,
    ) -> StmClosureResult<()> {
        let handle = var.handle();
        let boxed: ArcAny = Arc::new(value);
        self.write_set.insert(
            handle,
            WriteEntry {
                control_block: var.control_block().clone(),
                value: boxed,
            },
        );
        Ok(())
    }

    /// Append an allocation to this attempt's alloc log (`spec.md` §4.D).
    pub(crate) fn log_alloc(&mut self, obj: ArcAny) {
        self.alloc_log.push(obj);
    }

    /// Append a pending free to this attempt's free log.
    pub(crate) fn log_free(&mut self, obj: ArcAny) {
        self.free_log.push(obj);
    }

    /// Combine two calculations. If the first asks to retry, run the
    /// second instead, but keep validating everything the first one read
    /// so a value it depended on still aborts the whole attempt if it
    /// changes before commit.
    pub fn or<T, F1, F2>(&mut self, first: F1, second: F2) -> StmClosureResult<T>
    where
        F1: Fn(&mut Transaction<'_>) -> StmClosureResult<T>,
        F2: Fn(&mut Transaction<'_>) -> StmClosureResult<T>,
    {
        let reads_before = self.read_set.clone();
        let seen_before = self.read_seen.clone();
        let writes_before = self.write_set.clone();

        match first(self) {
            Err(StmError::Retry) => {
                let discarded_reads =
                    std::mem::replace(&mut self.read_set, reads_before);
                self.read_seen = seen_before;
                self.write_set = writes_before;

                let result = second(self);
                self.read_set.extend(discarded_reads);
                result
            }
            x => x,
        }
    }

    /// Write the log back to the vars, per `spec.md` §4.C's commit
    /// protocol: acquire the write set's orecs in ascending index order,
    /// bump the clock, revalidate the read set unless the fast path
    /// applies, publish, then release.
    fn commit(&mut self) -> bool {
        if self.write_set.is_empty() {
            return self.read_set.iter().all(|&(idx, version)| {
                let s = self.ctx.orecs.at(idx).load();
                !s.is_locked() && s.version() == version
            });
        }

        let mut idxs: Vec<usize> = self
            .write_set
            .values()
            .map(|e| self.ctx.orecs.index_of(e.control_block.handle))
            .collect();
        idxs.sort_unstable();
        idxs.dedup();

        let mut locked: Vec<(usize, OrecSnapshot)> = Vec::with_capacity(idxs.len());
        for &idx in &idxs {
            let orec = self.ctx.orecs.at(idx);
            let snapshot = orec.load();
            if snapshot.is_locked() || !orec.try_lock(snapshot) {
                for (locked_idx, _) in &locked {
                    self.ctx.orecs.at(*locked_idx).unlock_keep_version();
                }
                return false;
            }
            locked.push((idx, snapshot));
        }

        let wv = self.ctx.clock.bump();

        if wv != self.rv + 1 {
            for &(ridx, rversion) in &self.read_set {
                // A stripe we also wrote is locked by us, so `load()` would
                // see our own lock bit and its pre-bump version, not the
                // version at the time of the read. Compare against the
                // snapshot captured before we locked it instead — a
                // concurrent writer could still have bumped that stripe
                // between our read and our lock acquisition, and this must
                // catch that (spec.md §8 invariants 2/3; a read-modify-write
                // on the same TVar must not silently keep a stale read).
                if let Ok(pos) = idxs.binary_search(&ridx) {
                    if locked[pos].1.version() != rversion {
                        for (locked_idx, _) in &locked {
                            self.ctx.orecs.at(*locked_idx).unlock_keep_version();
                        }
                        return false;
                    }
                    continue;
                }
                let s = self.ctx.orecs.at(ridx).load();
                if s.is_locked() || s.version() != rversion {
                    for (locked_idx, _) in &locked {
                        self.ctx.orecs.at(*locked_idx).unlock_keep_version();
                    }
                    return false;
                }
            }
        }

        for entry in self.write_set.values() {
            *entry.control_block.value.write() = entry.value.clone();
        }
        for (idx, _) in &locked {
            self.ctx.orecs.at(*idx).unlock_with_version(wv);
        }

        true
    }

    /// Run a function with a transaction.
    ///
    /// Equivalent to `atomically`.
    pub fn with<T, F>(ctx: &RuntimeContext, f: F) -> T
    where
        F: Fn(&mut Transaction<'_>) -> StmClosureResult<T>,
    {
        match Transaction::with_control(ctx, |_| TransactionControl::Retry, f) {
            Some(t) => t,
            None => unreachable!(),
        }
    }

    /// Run a function with a transaction, retrying with backoff until it
    /// commits or `control` decides to abandon it.
    ///
    /// After `ctx`'s `max_attempts` consecutive failures, the engine
    /// escalates: it takes the process-wide fallback lock exclusively and
    /// reruns the body non-speculatively (`spec.md` §5's contention
    /// fallback). With no other transaction able to start, the first
    /// attempt under the lock always commits, so escalation always makes
    /// progress.
    pub fn with_control<T, F, C>(ctx: &RuntimeContext, mut control: C, f: F) -> Option<T>
    where
        F: Fn(&mut Transaction<'_>) -> StmClosureResult<T>,
        C: FnMut(StmError) -> TransactionControl,
    {
        let _guard = TransactionGuard::new();
        let mut transaction = Transaction::new(ctx);
        let mut attempts: u32 = 0;

        loop {
            if attempts >= ctx.config().max_attempts {
                let _exclusive = ctx.fallback.write();
                loop {
                    transaction.reset();
                    match f(&mut transaction) {
                        Ok(t) => {
                            if transaction.commit() {
                                return Some(t);
                            }
                        }
                        Err(e) => {
                            if let TransactionControl::Abort = control(e) {
                                return None;
                            }
                        }
                    }
                }
            }

            let shared = ctx.fallback.read();
            match f(&mut transaction) {
                Ok(t) => {
                    if transaction.commit() {
                        return Some(t);
                    }
                }
                Err(e) => {
                    if let TransactionControl::Abort = control(e) {
                        return None;
                    }
                }
            }

            attempts += 1;
            drop(shared);
            backoff(ctx.config(), attempts);
            transaction.reset();
        }
    }

    /// Run a function with a transaction that may abort with a client
    /// error `E`.
    pub fn with_err<T, F, E>(ctx: &RuntimeContext, f: F) -> Result<T, E>
    where
        F: Fn(&mut Transaction<'_>) -> TransactionClosureResult<T, E>,
    {
        let _guard = TransactionGuard::new();
        let mut transaction = Transaction::new(ctx);
        let mut attempts: u32 = 0;

        loop {
            if attempts >= ctx.config().max_attempts {
                let _exclusive = ctx.fallback.write();
                loop {
                    transaction.reset();
                    match f(&mut transaction) {
                        Ok(t) => {
                            if transaction.commit() {
                                return Ok(t);
                            }
                        }
                        Err(TransactionError::Abort(err)) => return Err(err),
                        Err(TransactionError::Stm(_)) => {}
                    }
                }
            }

            let shared = ctx.fallback.read();
            match f(&mut transaction) {
                Ok(t) => {
                    if transaction.commit() {
                        return Ok(t);
                    }
                }
                Err(TransactionError::Abort(err)) => return Err(err),
                Err(TransactionError::Stm(_)) => {}
            }

            attempts += 1;
            drop(shared);
            backoff(ctx.config(), attempts);
            transaction.reset();
        }
    }

    /// Run a function with a transaction and a control function, allowing
    /// both client aborts and control-driven abandonment.
    pub fn with_control_and_err<T, F, C, E>(
        ctx: &RuntimeContext,
        mut control: C,
        f: F,
    ) -> TransactionResult<T, E>
    where
        F: Fn(&mut Transaction<'_>) -> TransactionClosureResult<T, E>,
        C: FnMut(StmError) -> TransactionControl,
    {
        let _guard = TransactionGuard::new();
        let mut transaction = Transaction::new(ctx);
        let mut attempts: u32 = 0;

        loop {
            if attempts >= ctx.config().max_attempts {
                let _exclusive = ctx.fallback.write();
                loop {
                    transaction.reset();
                    match f(&mut transaction) {
                        Ok(t) => {
                            if transaction.commit() {
                                return TransactionResult::Validated(t);
                            }
                        }
                        Err(TransactionError::Abort(err)) => {
                            return TransactionResult::Cancelled(err);
                        }
                        Err(TransactionError::Stm(_)) => {}
                    }
                }
            }

            let shared = ctx.fallback.read();
            match f(&mut transaction) {
                Ok(t) => {
                    if transaction.commit() {
                        return TransactionResult::Validated(t);
                    }
                }
                Err(TransactionError::Abort(err)) => {
                    return TransactionResult::Cancelled(err);
                }
                Err(TransactionError::Stm(err)) => {
                    if let TransactionControl::Abort = control(err) {
                        return TransactionResult::Abandoned;
                    }
                }
            }

            attempts += 1;
            drop(shared);
            backoff(ctx.config(), attempts);
            transaction.reset();
        }
    }
}
