//! PSS sampling policy.
//!
//! How often to sample a process's proportional set size depends on what
//! the process is doing: a foreground app changes quickly and is sampled
//! every couple of minutes, a cached process barely moves and waits half
//! an hour. Instrumented ("test") runs shorten every interval so memory
//! regressions surface within a test's lifetime.
//!
//! All times are milliseconds on the same monotonic clock the caller uses.

use serde::{Deserialize, Serialize};

/// Execution state of a process, most to least important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    Persistent = 0,
    PersistentUi = 1,
    Top = 2,
    BoundForegroundService = 3,
    ForegroundService = 4,
    TopSleeping = 5,
    ImportantForeground = 6,
    ImportantBackground = 7,
    Backup = 8,
    HeavyWeight = 9,
    Service = 10,
    Receiver = 11,
    Home = 12,
    LastActivity = 13,
    CachedActivity = 14,
    CachedActivityClient = 15,
    CachedEmpty = 16,
}

pub const PROCESS_STATE_COUNT: usize = 17;

/// Memory-accounting bucket of a process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcMem {
    Persistent,
    Top,
    Important,
    Service,
    Cached,
}

const PROC_STATE_TO_PROC_MEM: [ProcMem; PROCESS_STATE_COUNT] = [
    ProcMem::Persistent, // Persistent
    ProcMem::Persistent, // PersistentUi
    ProcMem::Top,        // Top
    ProcMem::Important,  // BoundForegroundService
    ProcMem::Important,  // ForegroundService
    ProcMem::Top,        // TopSleeping
    ProcMem::Important,  // ImportantForeground
    ProcMem::Important,  // ImportantBackground
    ProcMem::Important,  // Backup
    ProcMem::Important,  // HeavyWeight
    ProcMem::Service,    // Service
    ProcMem::Cached,     // Receiver
    ProcMem::Cached,     // Home
    ProcMem::Cached,     // LastActivity
    ProcMem::Cached,     // CachedActivity
    ProcMem::Cached,     // CachedActivityClient
    ProcMem::Cached,     // CachedEmpty
];

/// How long after a state change a sample is free of transition noise.
pub const PSS_SAFE_TIME_FROM_STATE_CHANGE_MS: u64 = 1000;

/// Minimum interval after a state change before sampling.
pub const PSS_MIN_TIME_FROM_STATE_CHANGE_MS: u64 = 15 * 1000;

/// Longest we let any process go unsampled.
pub const PSS_MAX_INTERVAL_MS: u64 = 30 * 60 * 1000;

/// Minimum interval between whole-system sampling sweeps.
pub const PSS_ALL_INTERVAL_MS: u64 = 10 * 60 * 1000;

const PSS_SHORT_INTERVAL_MS: u64 = 2 * 60 * 1000;
const PSS_FIRST_TOP_INTERVAL_MS: u64 = 10 * 1000;
const PSS_FIRST_BACKGROUND_INTERVAL_MS: u64 = 20 * 1000;
const PSS_FIRST_CACHED_INTERVAL_MS: u64 = 30 * 1000;
const PSS_SAME_IMPORTANT_INTERVAL_MS: u64 = 15 * 60 * 1000;
const PSS_SAME_SERVICE_INTERVAL_MS: u64 = 20 * 60 * 1000;
const PSS_SAME_CACHED_INTERVAL_MS: u64 = 30 * 60 * 1000;

pub const PSS_TEST_MIN_TIME_FROM_STATE_CHANGE_MS: u64 = 10 * 1000;
const PSS_TEST_FIRST_TOP_INTERVAL_MS: u64 = 3 * 1000;
const PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS: u64 = 5 * 1000;
const PSS_TEST_SAME_IMPORTANT_INTERVAL_MS: u64 = 10 * 1000;
const PSS_TEST_SAME_BACKGROUND_INTERVAL_MS: u64 = 15 * 1000;

const FIRST_AWAKE_PSS_TIMES: [u64; PROCESS_STATE_COUNT] = [
    PSS_SHORT_INTERVAL_MS,            // Persistent
    PSS_SHORT_INTERVAL_MS,            // PersistentUi
    PSS_FIRST_TOP_INTERVAL_MS,        // Top
    PSS_FIRST_BACKGROUND_INTERVAL_MS, // BoundForegroundService
    PSS_FIRST_BACKGROUND_INTERVAL_MS, // ForegroundService
    PSS_FIRST_BACKGROUND_INTERVAL_MS, // TopSleeping
    PSS_FIRST_BACKGROUND_INTERVAL_MS, // ImportantForeground
    PSS_FIRST_BACKGROUND_INTERVAL_MS, // ImportantBackground
    PSS_FIRST_BACKGROUND_INTERVAL_MS, // Backup
    PSS_FIRST_BACKGROUND_INTERVAL_MS, // HeavyWeight
    PSS_FIRST_BACKGROUND_INTERVAL_MS, // Service
    PSS_FIRST_CACHED_INTERVAL_MS,     // Receiver
    PSS_FIRST_CACHED_INTERVAL_MS,     // Home
    PSS_FIRST_CACHED_INTERVAL_MS,     // LastActivity
    PSS_FIRST_CACHED_INTERVAL_MS,     // CachedActivity
    PSS_FIRST_CACHED_INTERVAL_MS,     // CachedActivityClient
    PSS_FIRST_CACHED_INTERVAL_MS,     // CachedEmpty
];

const SAME_AWAKE_PSS_TIMES: [u64; PROCESS_STATE_COUNT] = [
    PSS_SAME_IMPORTANT_INTERVAL_MS, // Persistent
    PSS_SAME_IMPORTANT_INTERVAL_MS, // PersistentUi
    PSS_SHORT_INTERVAL_MS,          // Top
    PSS_SAME_IMPORTANT_INTERVAL_MS, // BoundForegroundService
    PSS_SAME_IMPORTANT_INTERVAL_MS, // ForegroundService
    PSS_SAME_IMPORTANT_INTERVAL_MS, // TopSleeping
    PSS_SAME_IMPORTANT_INTERVAL_MS, // ImportantForeground
    PSS_SAME_IMPORTANT_INTERVAL_MS, // ImportantBackground
    PSS_SAME_IMPORTANT_INTERVAL_MS, // Backup
    PSS_SAME_IMPORTANT_INTERVAL_MS, // HeavyWeight
    PSS_SAME_SERVICE_INTERVAL_MS,   // Service
    PSS_SAME_SERVICE_INTERVAL_MS,   // Receiver
    PSS_SAME_CACHED_INTERVAL_MS,    // Home
    PSS_SAME_CACHED_INTERVAL_MS,    // LastActivity
    PSS_SAME_CACHED_INTERVAL_MS,    // CachedActivity
    PSS_SAME_CACHED_INTERVAL_MS,    // CachedActivityClient
    PSS_SAME_CACHED_INTERVAL_MS,    // CachedEmpty
];

const TEST_FIRST_AWAKE_PSS_TIMES: [u64; PROCESS_STATE_COUNT] = [
    PSS_TEST_FIRST_TOP_INTERVAL_MS,        // Persistent
    PSS_TEST_FIRST_TOP_INTERVAL_MS,        // PersistentUi
    PSS_TEST_FIRST_TOP_INTERVAL_MS,        // Top
    PSS_FIRST_BACKGROUND_INTERVAL_MS,      // BoundForegroundService
    PSS_FIRST_BACKGROUND_INTERVAL_MS,      // ForegroundService
    PSS_FIRST_BACKGROUND_INTERVAL_MS,      // TopSleeping
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // ImportantForeground
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // ImportantBackground
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // Backup
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // HeavyWeight
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // Service
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // Receiver
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // Home
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // LastActivity
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // CachedActivity
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // CachedActivityClient
    PSS_TEST_FIRST_BACKGROUND_INTERVAL_MS, // CachedEmpty
];

const TEST_SAME_AWAKE_PSS_TIMES: [u64; PROCESS_STATE_COUNT] = [
    PSS_TEST_SAME_BACKGROUND_INTERVAL_MS, // Persistent
    PSS_TEST_SAME_BACKGROUND_INTERVAL_MS, // PersistentUi
    PSS_TEST_SAME_IMPORTANT_INTERVAL_MS,  // Top
    PSS_TEST_SAME_IMPORTANT_INTERVAL_MS,  // BoundForegroundService
    PSS_TEST_SAME_IMPORTANT_INTERVAL_MS,  // ForegroundService
    PSS_TEST_SAME_IMPORTANT_INTERVAL_MS,  // TopSleeping
    PSS_TEST_SAME_IMPORTANT_INTERVAL_MS,  // ImportantForeground
    PSS_TEST_SAME_IMPORTANT_INTERVAL_MS,  // ImportantBackground
    PSS_TEST_SAME_IMPORTANT_INTERVAL_MS,  // Backup
    PSS_TEST_SAME_IMPORTANT_INTERVAL_MS,  // HeavyWeight
    PSS_TEST_SAME_BACKGROUND_INTERVAL_MS, // Service
    PSS_TEST_SAME_BACKGROUND_INTERVAL_MS, // Receiver
    PSS_TEST_SAME_BACKGROUND_INTERVAL_MS, // Home
    PSS_TEST_SAME_BACKGROUND_INTERVAL_MS, // LastActivity
    PSS_TEST_SAME_BACKGROUND_INTERVAL_MS, // CachedActivity
    PSS_TEST_SAME_BACKGROUND_INTERVAL_MS, // CachedActivityClient
    PSS_TEST_SAME_BACKGROUND_INTERVAL_MS, // CachedEmpty
];

impl ProcessState {
    pub const ALL: [ProcessState; PROCESS_STATE_COUNT] = [
        ProcessState::Persistent,
        ProcessState::PersistentUi,
        ProcessState::Top,
        ProcessState::BoundForegroundService,
        ProcessState::ForegroundService,
        ProcessState::TopSleeping,
        ProcessState::ImportantForeground,
        ProcessState::ImportantBackground,
        ProcessState::Backup,
        ProcessState::HeavyWeight,
        ProcessState::Service,
        ProcessState::Receiver,
        ProcessState::Home,
        ProcessState::LastActivity,
        ProcessState::CachedActivity,
        ProcessState::CachedActivityClient,
        ProcessState::CachedEmpty,
    ];

    pub fn proc_mem(&self) -> ProcMem {
        PROC_STATE_TO_PROC_MEM[*self as usize]
    }

    /// Compact tag for dump output.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessState::Persistent => "P ",
            ProcessState::PersistentUi => "PU",
            ProcessState::Top => "T ",
            ProcessState::BoundForegroundService => "SB",
            ProcessState::ForegroundService => "SF",
            ProcessState::TopSleeping => "TS",
            ProcessState::ImportantForeground => "IF",
            ProcessState::ImportantBackground => "IB",
            ProcessState::Backup => "BU",
            ProcessState::HeavyWeight => "HW",
            ProcessState::Service => "S ",
            ProcessState::Receiver => "R ",
            ProcessState::Home => "HO",
            ProcessState::LastActivity => "LA",
            ProcessState::CachedActivity => "CA",
            ProcessState::CachedActivityClient => "Ca",
            ProcessState::CachedEmpty => "CE",
        }
    }
}

/// Whether two states land in different memory-accounting buckets (a
/// transition between them warrants a fresh sample).
pub fn proc_states_differ_for_mem(a: ProcessState, b: ProcessState) -> bool {
    a.proc_mem() != b.proc_mem()
}

/// Minimum interval after a state change before sampling is safe.
pub fn min_time_from_state_change(test: bool) -> u64 {
    if test { PSS_TEST_MIN_TIME_FROM_STATE_CHANGE_MS } else { PSS_MIN_TIME_FROM_STATE_CHANGE_MS }
}

/// When to sample `state` next: `first` selects the just-entered-state
/// table, `test` the instrumented tables.
pub fn compute_next_pss_time(state: ProcessState, first: bool, test: bool, now_ms: u64) -> u64 {
    let table = match (test, first) {
        (true, true) => &TEST_FIRST_AWAKE_PSS_TIMES,
        (true, false) => &TEST_SAME_AWAKE_PSS_TIMES,
        (false, true) => &FIRST_AWAKE_PSS_TIMES,
        (false, false) => &SAME_AWAKE_PSS_TIMES,
    };
    now_ms + table[state as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_mapping() {
        assert_eq!(ProcessState::Persistent.proc_mem(), ProcMem::Persistent);
        assert_eq!(ProcessState::Top.proc_mem(), ProcMem::Top);
        assert_eq!(ProcessState::TopSleeping.proc_mem(), ProcMem::Top);
        assert_eq!(ProcessState::Backup.proc_mem(), ProcMem::Important);
        assert_eq!(ProcessState::Service.proc_mem(), ProcMem::Service);
        assert_eq!(ProcessState::Receiver.proc_mem(), ProcMem::Cached);
        assert_eq!(ProcessState::CachedEmpty.proc_mem(), ProcMem::Cached);
    }

    #[test]
    fn mem_bucket_transitions() {
        assert!(proc_states_differ_for_mem(ProcessState::Top, ProcessState::Service));
        assert!(!proc_states_differ_for_mem(ProcessState::Home, ProcessState::CachedEmpty));
        assert!(!proc_states_differ_for_mem(ProcessState::Top, ProcessState::TopSleeping));
    }

    #[test]
    fn steady_state_intervals_span_service_to_cached() {
        let now = 1_000_000;
        assert_eq!(
            compute_next_pss_time(ProcessState::Service, false, false, now),
            now + 20 * 60 * 1000
        );
        assert_eq!(
            compute_next_pss_time(ProcessState::CachedEmpty, false, false, now),
            now + 30 * 60 * 1000
        );
        // A top app is resampled on the short interval even in steady state.
        assert_eq!(
            compute_next_pss_time(ProcessState::Top, false, false, now),
            now + 2 * 60 * 1000
        );
    }

    #[test]
    fn first_intervals_are_shorter_than_steady_state() {
        let now = 0;
        for state in ProcessState::ALL {
            let first = compute_next_pss_time(state, true, false, now);
            let same = compute_next_pss_time(state, false, false, now);
            assert!(first <= same, "{state:?}: first {first} > same {same}");
        }
    }

    #[test]
    fn test_mode_shortens_every_interval() {
        let now = 0;
        for state in ProcessState::ALL {
            for first in [true, false] {
                let normal = compute_next_pss_time(state, first, false, now);
                let test = compute_next_pss_time(state, first, true, now);
                assert!(test <= normal, "{state:?} first={first}");
            }
        }
        // Strictly shorter for a steady-state important process.
        assert!(
            compute_next_pss_time(ProcessState::ImportantForeground, false, true, now)
                < compute_next_pss_time(ProcessState::ImportantForeground, false, false, now)
        );
        assert_eq!(min_time_from_state_change(true), 10 * 1000);
        assert_eq!(min_time_from_state_change(false), 15 * 1000);
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(ProcessState::Top.label(), "T ");
        assert_eq!(ProcessState::CachedActivityClient.label(), "Ca");
    }
}
