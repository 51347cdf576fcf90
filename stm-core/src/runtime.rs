//! The explicit, passed-around runtime context.
//!
//! `spec.md` §9 calls out the orec table, the global clock and the worker
//! barrier as the only process-wide shared resources, and asks that they be
//! "encapsulate[d] behind an explicit runtime context that is passed to
//! every public operation" rather than kept as ambient globals. `RuntimeContext`
//! is that context for the STM engine (the barrier lives in `stm-runtime`).

use parking_lot::RwLock;

use crate::orec::{GlobalClock, OrecTable, DEFAULT_OREC_TABLE_BITS};
use crate::result::RuntimeError;

/// Tuning knobs for the backoff/escalation policy (`spec.md` §5, §7, §9).
#[derive(Clone, Copy, Debug)]
pub struct StmConfig {
    /// Size of the orec table, as a power of two.
    pub orec_table_bits: u32,

    /// Consecutive aborts before escalating to the fallback lock.
    /// Left to the implementer by `spec.md` §9; we default to 64.
    pub max_attempts: u32,

    /// Cap on the backoff exponent (`K` in `spec.md` §5).
    pub backoff_cap: u32,

    /// Base unit of the backoff delay (`spec.md` §5: `[0, 2^min(k,K)] * base`).
    pub backoff_base: std::time::Duration,
}

impl Default for StmConfig {
    fn default() -> Self {
        StmConfig {
            orec_table_bits: DEFAULT_OREC_TABLE_BITS,
            max_attempts: 64,
            backoff_cap: 8,
            backoff_base: std::time::Duration::from_micros(50),
        }
    }
}

/// The process-wide state the STM engine needs: the orec table, the global
/// version clock, and the fallback exclusive lock used once optimistic
/// execution has failed `max_attempts` times in a row.
pub struct RuntimeContext {
    pub(crate) orecs: OrecTable,
    pub(crate) clock: GlobalClock,
    pub(crate) fallback: RwLock<()>,
    pub(crate) config: StmConfig,
}

impl RuntimeContext {
    pub fn new(config: StmConfig) -> Result<Self, RuntimeError> {
        if config.orec_table_bits > 30 {
            return Err(RuntimeError::OrecTableAllocFailed {
                requested_bits: config.orec_table_bits,
            });
        }
        Ok(RuntimeContext {
            orecs: OrecTable::with_bits(config.orec_table_bits),
            clock: GlobalClock::new(),
            fallback: RwLock::new(()),
            config,
        })
    }

    pub fn config(&self) -> &StmConfig {
        &self.config
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        RuntimeContext::new(StmConfig::default()).expect("default config is always valid")
    }
}
