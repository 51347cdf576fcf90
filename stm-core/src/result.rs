/// Failure signal of a single step inside a transaction body.
///
/// Never handle this yourself beyond `?`; it is consumed by the retry loop
/// in `atomically`/`atomically_with_err`.
#[derive(Eq, PartialEq, Clone, Copy, Debug, thiserror::Error)]
pub enum StmError {
    /// A read or a commit-time revalidation observed a version outside the
    /// transaction's snapshot, or the CAS to lock an orec for writing lost
    /// a race. Counts towards the consecutive-abort backoff.
    #[error("transaction failure signal")]
    Failure,

    /// The client called `retry()` / `TM_RESTART` to signal a conflict the
    /// engine itself cannot see. Accounted identically to `Failure` for
    /// backoff purposes (spec: "Client-signalled abort").
    #[error("transaction retry signal")]
    Retry,
}

/// Result of a single step of a transaction.
pub type StmResult<T> = Result<T, StmError>;

/// Result of a whole transaction body that may only call `retry`.
pub type StmClosureResult<T> = Result<T, StmError>;

/// Error of a transaction body that may also abort with a client error `E`.
#[derive(Eq, PartialEq, Clone, Copy, Debug, thiserror::Error)]
pub enum TransactionError<E> {
    /// Failed due to a [`StmError`] (conflict, or voluntary retry).
    #[error(transparent)]
    Stm(#[from] StmError),

    /// `abort(e)` was called. The transaction is abandoned and `e` is
    /// returned to the caller of `atomically_with_err`.
    #[error("transaction aborted")]
    Abort(E),
}

/// Result of a transaction body that can fail with a client error `E`.
pub type TransactionClosureResult<T, E> = Result<T, TransactionError<E>>;

/// Misconfiguration refused at startup (spec §7, "Startup misconfiguration").
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("thread_startup requires at least one worker thread")]
    ZeroWorkers,

    #[error("failed to allocate an orec table of 2^{requested_bits} entries")]
    OrecTableAllocFailed { requested_bits: u32 },
}
