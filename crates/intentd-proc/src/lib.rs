//! Process priority management for intentd.
//!
//! The process-side half of the runtime core:
//!
//! - **[`oom`]** -- the adjustment ladder and the six-bucket `minfree`
//!   threshold computation.
//! - **[`lmkd`]** -- the binary socket protocol to the kernel-resident
//!   low-memory-killer daemon.
//! - **[`process`]** -- [`ProcessList`]: managed process records, priority
//!   pushes, and PSS sample scheduling.
//! - **[`pss`]** -- table-driven PSS sampling intervals per process state.
//! - **[`activity`]** -- per-activity lifecycle records.
//! - **[`tuning`]** -- deployment tunables, TOML-loadable.
//!
//! Nothing here kills a process: the adjustment value pushed through the
//! socket is the policy signal; eviction is the kernel daemon's job.

pub mod activity;
pub mod error;
pub mod lmkd;
pub mod oom;
pub mod process;
pub mod pss;
pub mod tuning;

pub use activity::{ActivityRecord, ActivityState};
pub use error::{ProcError, Result};
pub use lmkd::{LmkCommand, LmkdClient, LmkdConnection, LmkdConnector, SeqpacketConnector};
pub use oom::{OomLevels, oom_adj_label};
pub use process::{ProcessList, ProcessRecord, is_alive, read_total_memory_bytes};
pub use pss::{ProcMem, ProcessState, compute_next_pss_time, proc_states_differ_for_mem};
pub use tuning::ProcessTuning;
