//! Facade crate re-exporting the transactional runtime's three pieces under
//! one name, for workload crates that want all of it: the engine
//! (`stm-core`), the worker pool (`stm-runtime`) and the transactional
//! containers (`stm-containers`).

pub use stm_core::*;

pub mod runtime {
    pub use stm_runtime::*;
}

pub mod containers {
    pub use stm_containers::*;
}
