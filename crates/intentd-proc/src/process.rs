//! The process list.
//!
//! Tracks every managed process with its adjustment and execution state,
//! owns the computed [`OomLevels`] for this device, and pushes target and
//! per-process priority updates to the kernel-side killer through
//! [`LmkdClient`]. The adjustment value is the policy signal; the killer
//! makes the actual eviction decisions.

use std::collections::HashMap;
use std::io;
use std::time::Instant;

use crate::error::Result;
use crate::lmkd::{LmkCommand, LmkdClient};
use crate::oom::{OomLevels, UNKNOWN_ADJ};
use crate::pss::{ProcessState, compute_next_pss_time, proc_states_differ_for_mem};
use crate::tuning::ProcessTuning;

/// Writes slower than this are logged; the killer socket should be fast.
const SLOW_ADJ_WRITE_MS: u128 = 250;

/// One managed process.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub pid: i32,
    pub uid: u32,
    pub name: String,
    /// Adjustment computed by the most recent evaluation.
    pub cur_adj: i32,
    /// Adjustment last pushed to the killer.
    pub set_adj: i32,
    pub proc_state: ProcessState,
    /// When the last PSS sample was taken, ms.
    pub last_pss_time: u64,
    /// When the next PSS sample is due, ms.
    pub next_pss_time: u64,
}

/// Registry of managed processes plus the device's killer thresholds.
pub struct ProcessList {
    tuning: ProcessTuning,
    total_mem_bytes: u64,
    levels: OomLevels,
    lmkd: LmkdClient,
    procs: HashMap<i32, ProcessRecord>,
    have_display_size: bool,
}

impl ProcessList {
    /// Build against the real device memory size from `/proc/meminfo`.
    pub fn new(tuning: ProcessTuning, lmkd: LmkdClient) -> Result<Self> {
        let total_mem_bytes = read_total_memory_bytes()?;
        Ok(Self::with_total_memory(tuning, lmkd, total_mem_bytes))
    }

    /// Build with an explicit memory size (tests, containers).
    pub fn with_total_memory(tuning: ProcessTuning, lmkd: LmkdClient, total_mem_bytes: u64) -> Self {
        let levels = OomLevels::compute(total_mem_bytes / (1024 * 1024), 0, 0, &tuning);
        Self { tuning, total_mem_bytes, levels, lmkd, procs: HashMap::new(), have_display_size: false }
    }

    /// Recompute thresholds once the display size is known, then push them.
    pub fn apply_display_size(&mut self, width: u32, height: u32) {
        if self.have_display_size || width == 0 || height == 0 {
            return;
        }
        self.update_oom_levels(width, height, true);
        self.have_display_size = true;
    }

    /// Recompute the minfree thresholds and optionally push the 6-pair
    /// target packet to the killer.
    pub fn update_oom_levels(&mut self, display_width: u32, display_height: u32, write: bool) {
        self.levels = OomLevels::compute(
            self.total_mem_bytes / (1024 * 1024),
            display_width,
            display_height,
            &self.tuning,
        );
        tracing::info!(
            minfree_kb = ?self.levels.minfree_kb(),
            extra_free_kb = self.levels.extra_free_kb(),
            "oom levels updated"
        );
        if write {
            self.lmkd.write(&LmkCommand::Target(self.levels.target_pairs().to_vec()));
        }
    }

    /// Push one process's adjustment to the killer and remember it.
    ///
    /// `UNKNOWN_ADJ` is a placeholder, never sent.
    pub fn set_oom_adj(&mut self, pid: i32, uid: u32, adj: i32) {
        if adj == UNKNOWN_ADJ {
            return;
        }
        let start = Instant::now();
        self.lmkd.write(&LmkCommand::ProcPrio { pid, uid: uid as i32, adj });
        let elapsed = start.elapsed().as_millis();
        if elapsed > SLOW_ADJ_WRITE_MS {
            tracing::warn!(pid, adj, elapsed_ms = elapsed as u64, "slow oom adj write");
        }
        if let Some(record) = self.procs.get_mut(&pid) {
            record.set_adj = adj;
            record.cur_adj = adj;
        }
    }

    /// Forget a process, killer-side and locally.
    pub fn remove(&mut self, pid: i32) {
        self.lmkd.write(&LmkCommand::ProcRemove { pid });
        self.procs.remove(&pid);
    }

    /// Track a new process at the unknown adjustment.
    pub fn add_process(&mut self, pid: i32, uid: u32, name: impl Into<String>) {
        let name = name.into();
        tracing::debug!(pid, uid, name = %name, "process added");
        self.procs.insert(
            pid,
            ProcessRecord {
                pid,
                uid,
                name,
                cur_adj: UNKNOWN_ADJ,
                set_adj: UNKNOWN_ADJ,
                proc_state: ProcessState::CachedEmpty,
                last_pss_time: 0,
                next_pss_time: 0,
            },
        );
    }

    /// Record a state change and reschedule the process's next PSS sample.
    /// Crossing a memory-accounting bucket selects the first-in-state
    /// interval table.
    pub fn update_proc_state(&mut self, pid: i32, state: ProcessState, test: bool, now_ms: u64) {
        let Some(record) = self.procs.get_mut(&pid) else {
            return;
        };
        let first = proc_states_differ_for_mem(record.proc_state, state);
        record.proc_state = state;
        record.next_pss_time = compute_next_pss_time(state, first, test, now_ms);
    }

    /// Record that a PSS sample was taken now.
    pub fn note_pss_sampled(&mut self, pid: i32, test: bool, now_ms: u64) {
        if let Some(record) = self.procs.get_mut(&pid) {
            record.last_pss_time = now_ms;
            record.next_pss_time = compute_next_pss_time(record.proc_state, false, test, now_ms);
        }
    }

    pub fn record(&self, pid: i32) -> Option<&ProcessRecord> {
        self.procs.get(&pid)
    }

    pub fn records(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.procs.values()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Minfree threshold in bytes for an adjustment; see
    /// [`OomLevels::mem_level`].
    pub fn mem_level(&self, adj: i32) -> u64 {
        self.levels.mem_level(adj)
    }

    /// Maximum PSS in KB at which a cached process may be restored while
    /// RAM is low.
    pub fn cached_restore_threshold_kb(&self) -> i64 {
        self.levels.cached_restore_threshold_kb()
    }

    pub fn levels(&self) -> &OomLevels {
        &self.levels
    }

    pub fn tuning(&self) -> &ProcessTuning {
        &self.tuning
    }

    /// How many of `total_limit` processes may be empty on this device.
    pub fn compute_empty_process_limit(&self, total_limit: i32) -> i32 {
        self.tuning.empty_process_limit(total_limit, self.total_mem_bytes)
    }
}

/// Total device memory from `/proc/meminfo`, in bytes.
pub fn read_total_memory_bytes() -> Result<u64> {
    let contents = std::fs::read_to_string("/proc/meminfo")?;
    parse_meminfo_total(&contents).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "MemTotal missing from /proc/meminfo").into()
    })
}

fn parse_meminfo_total(contents: &str) -> Option<u64> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.trim().strip_suffix("kB"))
        .and_then(|kb| kb.trim().parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Whether `pid` is alive and not on its way out.
///
/// Reads `/proc/<pid>/stat`: a zombie state or a pending KILL signal both
/// count as dead; a missing entry does too.
pub fn is_alive(pid: i32, noisy: bool) -> bool {
    let stat_path = format!("/proc/{pid}/stat");
    let contents = match std::fs::read_to_string(&stat_path) {
        Ok(contents) => contents,
        Err(_) => {
            if !std::path::Path::new(&stat_path).exists() {
                if noisy {
                    tracing::info!(pid, "stat entry does not exist");
                }
                return false;
            }
            return true;
        }
    };

    // Fields after the parenthesized command name: state first, the
    // pending-signal mask at offset 28 (field 31 of the stat line).
    let Some(after_comm) = contents.rsplit_once(')').map(|(_, rest)| rest.trim_start()) else {
        return true;
    };
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    if fields.first() == Some(&"Z") {
        if noisy {
            tracing::info!(pid, "process is in zombie state");
        }
        return false;
    }
    if let Some(signals) = fields.get(28).and_then(|s| s.parse::<u64>().ok()) {
        if signals & (1 << 8) != 0 {
            if noisy {
                tracing::info!(pid, "process has pending signal 9");
            }
            return false;
        }
    } else if let Some(raw) = fields.get(28) {
        tracing::warn!(pid, signals = %raw, "unknown pending signal mask");
    }
    true
}
