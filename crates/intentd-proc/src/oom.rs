//! The OOM-adjustment ladder.
//!
//! Every managed process carries an integer adjustment from most precious
//! (`SYSTEM_ADJ`) to most disposable (`CACHED_APP_MAX_ADJ`). The value is
//! pure policy: the kernel-side killer consumes it to decide eviction
//! order under memory pressure; nothing in this crate kills directly.
//!
//! Six representative buckets of the ladder map to six kernel `minfree`
//! thresholds, interpolated between a low-end and a high-end device table
//! by both total memory and display resolution.

use crate::tuning::ProcessTuning;

// Adjustment used where the real value is not known yet (something headed
// for the cached range, exact slot undecided).
pub const UNKNOWN_ADJ: i32 = 16;

// Only hosts invisible activities; killable without disruption.
pub const CACHED_APP_MAX_ADJ: i32 = 15;
pub const CACHED_APP_MIN_ADJ: i32 = 9;

// The B list of services: old and decrepit, first to go among services.
pub const SERVICE_B_ADJ: i32 = 8;

// The previous application the user was in; kept above other background
// work because switching back is common.
pub const PREVIOUS_APP_ADJ: i32 = 7;

// The home application.
pub const HOME_APP_ADJ: i32 = 6;

// A process hosting an application service.
pub const SERVICE_ADJ: i32 = 5;

// A heavy-weight application in the background.
pub const HEAVY_WEIGHT_APP_ADJ: i32 = 4;

// Currently hosting a backup operation.
pub const BACKUP_APP_ADJ: i32 = 3;

// Perceptible to the user without being visible (background playback).
pub const PERCEPTIBLE_APP_ADJ: i32 = 2;

// Hosting visible activities.
pub const VISIBLE_APP_ADJ: i32 = 1;

// The current foreground app.
pub const FOREGROUND_APP_ADJ: i32 = 0;

// Bound to by the system or a persistent process and marked important.
pub const PERSISTENT_SERVICE_ADJ: i32 = -11;

// A persistent system process.
pub const PERSISTENT_PROC_ADJ: i32 = -12;

pub const SYSTEM_ADJ: i32 = -16;

// Native processes the system does not manage.
pub const NATIVE_ADJ: i32 = -17;

pub const PAGE_SIZE: i64 = 4 * 1024;

/// The minimum number of cached apps kept around regardless of empty apps.
pub const MIN_CACHED_APPS: i32 = 2;

/// Longest an empty process may stick around, in milliseconds.
pub const MAX_EMPTY_TIME_MS: u64 = 30 * 60 * 1000;

/// Cached+empty count at which memory is considered critical.
pub const TRIM_CRITICAL_THRESHOLD: i32 = 3;

/// Cached+empty count at which memory is considered low.
pub const TRIM_LOW_THRESHOLD: i32 = 5;

/// The six ladder buckets reported to the kernel killer, ascending. The
/// killer supports exactly six slots.
pub const OOM_ADJ: [i32; 6] = [
    FOREGROUND_APP_ADJ,
    VISIBLE_APP_ADJ,
    PERCEPTIBLE_APP_ADJ,
    BACKUP_APP_ADJ,
    CACHED_APP_MIN_ADJ,
    CACHED_APP_MAX_ADJ,
];

// Minfree tables in KB. Low end is an HVGA-class device under 512MB; high
// end a 1280x800 screen with around 1GB.
const OOM_MINFREE_LOW_32BIT: [i32; 6] = [12288, 18432, 24576, 36864, 43008, 49152];
const OOM_MINFREE_HIGH_32BIT: [i32; 6] = [61440, 76800, 92160, 107520, 137660, 174948];
const OOM_MINFREE_LOW: [i32; 6] = [12288, 18432, 24576, 36864, 43008, 49152];
const OOM_MINFREE_HIGH: [i32; 6] = [73728, 92160, 110592, 129024, 147456, 184320];

/// The computed killer thresholds for this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OomLevels {
    minfree_kb: [i32; 6],
    cached_restore_kb: i64,
    extra_free_kb: i64,
}

impl OomLevels {
    /// Compute thresholds for this build's ABI.
    pub fn compute(
        total_mem_mb: u64,
        display_width: u32,
        display_height: u32,
        tuning: &ProcessTuning,
    ) -> Self {
        Self::compute_for_abi(
            total_mem_mb,
            display_width,
            display_height,
            cfg!(target_pointer_width = "64"),
            tuning,
        )
    }

    /// Compute thresholds with the ABI made explicit.
    ///
    /// `scale = clamp(max(scale_mem, scale_disp), 0, 1)` where the memory
    /// scale runs from 350MB to 700MB and the display scale from 480x800
    /// to 1280x800 pixels.
    pub fn compute_for_abi(
        total_mem_mb: u64,
        display_width: u32,
        display_height: u32,
        is_64bit: bool,
        tuning: &ProcessTuning,
    ) -> Self {
        let scale_mem = (total_mem_mb as f32 - 350.0) / (700.0 - 350.0);

        let min_size = 480.0 * 800.0;
        let max_size = 1280.0 * 800.0;
        let display = (display_width as f32) * (display_height as f32);
        let scale_disp = (display - min_size) / (max_size - min_size);

        let scale = scale_mem.max(scale_disp).clamp(0.0, 1.0);

        let mut minfree_kb = [0i32; 6];
        for i in 0..OOM_ADJ.len() {
            let (low, high) = if is_64bit {
                let mut high = OOM_MINFREE_HIGH[i];
                // Boost the high-end cached buckets on 64-bit builds.
                if i == 4 {
                    high = high * 3 / 2;
                } else if i == 5 {
                    high = high * 7 / 4;
                }
                (OOM_MINFREE_LOW[i], high)
            } else {
                (OOM_MINFREE_LOW_32BIT[i], OOM_MINFREE_HIGH_32BIT[i])
            };
            minfree_kb[i] = low + ((high - low) as f32 * scale) as i32;
        }

        if tuning.minfree_absolute >= 0 {
            let top = minfree_kb[OOM_ADJ.len() - 1] as f32;
            for slot in &mut minfree_kb {
                *slot = (tuning.minfree_absolute as f32 * *slot as f32 / top) as i32;
            }
        }

        if tuning.minfree_adjust != 0 {
            let top = minfree_kb[OOM_ADJ.len() - 1] as f32;
            for slot in &mut minfree_kb {
                *slot += (tuning.minfree_adjust as f32 * *slot as f32 / top) as i32;
                if *slot < 0 {
                    *slot = 0;
                }
            }
        }

        let levels = Self { minfree_kb, cached_restore_kb: 0, extra_free_kb: 0 };
        // The maximum size we will restore a cached process at when under
        // duress: a third of what is reserved before killing background
        // processes.
        let cached_restore_kb = (levels.mem_level(CACHED_APP_MAX_ADJ) as i64 / 1024) / 3;

        // Keep enough free memory for 3 full-screen 32bpp buffers.
        let mut extra_free_kb =
            (display_width as i64) * (display_height as i64) * 4 * 3 / 1024;
        if tuning.extra_free_absolute >= 0 {
            extra_free_kb = tuning.extra_free_absolute;
        }
        if tuning.extra_free_adjust != 0 {
            extra_free_kb += tuning.extra_free_adjust;
            if extra_free_kb < 0 {
                extra_free_kb = 0;
            }
        }

        Self { minfree_kb, cached_restore_kb, extra_free_kb }
    }

    /// Minfree threshold in bytes for `adjustment`: the value of the first
    /// bucket whose canonical adj is at least the query, or the top bucket
    /// beyond the ladder.
    pub fn mem_level(&self, adjustment: i32) -> u64 {
        for (i, &bucket_adj) in OOM_ADJ.iter().enumerate() {
            if adjustment <= bucket_adj {
                return self.minfree_kb[i] as u64 * 1024;
            }
        }
        self.minfree_kb[OOM_ADJ.len() - 1] as u64 * 1024
    }

    pub fn minfree_kb(&self) -> &[i32; 6] {
        &self.minfree_kb
    }

    /// The `(minfree-in-pages, adj)` pairs of the killer target packet.
    pub fn target_pairs(&self) -> [(i32, i32); 6] {
        let mut pairs = [(0, 0); 6];
        for i in 0..OOM_ADJ.len() {
            pairs[i] = (((self.minfree_kb[i] as i64 * 1024) / PAGE_SIZE) as i32, OOM_ADJ[i]);
        }
        pairs
    }

    /// Maximum PSS in KB at which a cached process may be restored to run
    /// in the background while RAM is low.
    pub fn cached_restore_threshold_kb(&self) -> i64 {
        self.cached_restore_kb
    }

    /// Extra free memory in KB the kernel is asked to keep for display
    /// buffers.
    pub fn extra_free_kb(&self) -> i64 {
        self.extra_free_kb
    }
}

/// Compact ladder tag for dump output, e.g. `cch+3` or `svc`.
pub fn oom_adj_label(adj: i32) -> String {
    fn tag(prefix: &str, pad: bool, val: i32, base: i32) -> String {
        if val == base {
            if pad { format!("{prefix}  ") } else { prefix.to_string() }
        } else {
            format!("{prefix}+{}", val - base)
        }
    }
    if adj >= CACHED_APP_MIN_ADJ {
        tag("cch", true, adj, CACHED_APP_MIN_ADJ)
    } else if adj >= SERVICE_B_ADJ {
        tag("svcb ", false, adj, SERVICE_B_ADJ)
    } else if adj >= PREVIOUS_APP_ADJ {
        tag("prev ", false, adj, PREVIOUS_APP_ADJ)
    } else if adj >= HOME_APP_ADJ {
        tag("home ", false, adj, HOME_APP_ADJ)
    } else if adj >= SERVICE_ADJ {
        tag("svc  ", false, adj, SERVICE_ADJ)
    } else if adj >= HEAVY_WEIGHT_APP_ADJ {
        tag("hvy  ", false, adj, HEAVY_WEIGHT_APP_ADJ)
    } else if adj >= BACKUP_APP_ADJ {
        tag("bkup ", false, adj, BACKUP_APP_ADJ)
    } else if adj >= PERCEPTIBLE_APP_ADJ {
        tag("prcp ", false, adj, PERCEPTIBLE_APP_ADJ)
    } else if adj >= VISIBLE_APP_ADJ {
        tag("vis  ", false, adj, VISIBLE_APP_ADJ)
    } else if adj >= FOREGROUND_APP_ADJ {
        tag("fore ", false, adj, FOREGROUND_APP_ADJ)
    } else if adj >= PERSISTENT_SERVICE_ADJ {
        tag("psvc ", false, adj, PERSISTENT_SERVICE_ADJ)
    } else if adj >= PERSISTENT_PROC_ADJ {
        tag("pers ", false, adj, PERSISTENT_PROC_ADJ)
    } else if adj >= SYSTEM_ADJ {
        tag("sys  ", false, adj, SYSTEM_ADJ)
    } else if adj >= NATIVE_ADJ {
        tag("ntv  ", false, adj, NATIVE_ADJ)
    } else {
        adj.to_string()
    }
}
