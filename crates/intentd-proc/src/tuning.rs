//! Process tuning properties.
//!
//! Deployment-level knobs for the cached/empty process limits and the
//! memory-trim thresholds, loadable from TOML. Every field has the stock
//! default, so an empty config is valid.

use serde::{Deserialize, Serialize};

use crate::error::Result;

const GIB: u64 = 1024 * 1024 * 1024;

/// Tunables consumed by the process list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessTuning {
    /// Maximum number of cached background processes to keep around.
    pub bg_apps_limit: i32,
    /// Use the percentage-based trim settings below instead of the fixed
    /// divisors.
    pub use_trim_settings: bool,
    /// Share of the cached limit granted to empty processes, in percent.
    pub empty_app_percent: i32,
    /// Empty-process count below which trimming is unnecessary, in percent
    /// of the empty limit.
    pub trim_empty_percent: i32,
    /// Cached-process count below which trimming is unnecessary, in
    /// percent of the cached limit.
    pub trim_cache_percent: i32,
    /// Trim settings only apply on devices with less total memory than
    /// this, in bytes.
    pub trim_enable_memory: u64,
    /// Absolute override of the top minfree bucket in KB; the other
    /// buckets rescale proportionally. Negative leaves the computed values.
    pub minfree_absolute: i64,
    /// Additive shift of the minfree buckets in KB, applied proportionally
    /// and floored at zero. Zero leaves the computed values.
    pub minfree_adjust: i64,
    /// Absolute override of the extra-free kernel reserve in KB.
    pub extra_free_absolute: i64,
    /// Additive shift of the extra-free kernel reserve in KB.
    pub extra_free_adjust: i64,
}

impl Default for ProcessTuning {
    fn default() -> Self {
        Self {
            bg_apps_limit: 32,
            use_trim_settings: false,
            empty_app_percent: 50,
            trim_empty_percent: 100,
            trim_cache_percent: 100,
            trim_enable_memory: GIB,
            minfree_absolute: -1,
            minfree_adjust: 0,
            extra_free_absolute: -1,
            extra_free_adjust: 0,
        }
    }
}

impl ProcessTuning {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load tuning from a TOML file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Whether the trim settings apply on a device with this much memory.
    pub fn allow_trim(&self, total_mem_bytes: u64) -> bool {
        total_mem_bytes < self.trim_enable_memory
    }

    /// How many of `total_limit` processes may be empty.
    pub fn empty_process_limit(&self, total_limit: i32, total_mem_bytes: u64) -> i32 {
        if self.use_trim_settings && self.allow_trim(total_mem_bytes) {
            total_limit * self.empty_app_percent / 100
        } else {
            total_limit / 2
        }
    }

    /// Empty-process count at which memory trimming becomes unnecessary.
    pub fn trim_empty_apps(&self, total_mem_bytes: u64) -> i32 {
        let max_empty = self.empty_process_limit(self.bg_apps_limit, total_mem_bytes);
        if self.use_trim_settings && self.allow_trim(total_mem_bytes) {
            max_empty * self.trim_empty_percent / 100
        } else {
            max_empty / 2
        }
    }

    /// Cached-process count at which memory trimming becomes unnecessary.
    pub fn trim_cached_apps(&self, total_mem_bytes: u64) -> i32 {
        let max_empty = self.empty_process_limit(self.bg_apps_limit, total_mem_bytes);
        if self.use_trim_settings && self.allow_trim(total_mem_bytes) {
            self.bg_apps_limit * self.trim_cache_percent / 100
        } else {
            (self.bg_apps_limit - max_empty) / 3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_values() {
        let tuning = ProcessTuning::default();
        assert_eq!(tuning.bg_apps_limit, 32);
        assert!(!tuning.use_trim_settings);
        assert_eq!(tuning.empty_app_percent, 50);
        assert_eq!(tuning.trim_enable_memory, GIB);
    }

    #[test]
    fn empty_config_parses_to_defaults() {
        assert_eq!(ProcessTuning::from_toml_str("").unwrap(), ProcessTuning::default());
    }

    #[test]
    fn partial_config_overrides_only_named_keys() {
        let tuning = ProcessTuning::from_toml_str(
            "bg_apps_limit = 64\nuse_trim_settings = true\nempty_app_percent = 25\n",
        )
        .unwrap();
        assert_eq!(tuning.bg_apps_limit, 64);
        assert!(tuning.use_trim_settings);
        assert_eq!(tuning.empty_app_percent, 25);
        assert_eq!(tuning.trim_cache_percent, 100);
    }

    #[test]
    fn malformed_config_is_rejected() {
        assert!(ProcessTuning::from_toml_str("bg_apps_limit = \"many\"").is_err());
    }

    #[test]
    fn load_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "trim_enable_memory = 536870912").unwrap();
        let tuning = ProcessTuning::load(file.path()).unwrap();
        assert_eq!(tuning.trim_enable_memory, 512 * 1024 * 1024);
    }

    #[test]
    fn empty_process_limit_with_trim_disabled_halves() {
        let tuning = ProcessTuning::default();
        assert_eq!(tuning.empty_process_limit(32, GIB / 2), 16);
        assert_eq!(tuning.empty_process_limit(7, GIB / 2), 3);
    }

    #[test]
    fn empty_process_limit_with_trim_enabled_uses_percent() {
        let tuning = ProcessTuning {
            use_trim_settings: true,
            empty_app_percent: 25,
            ..Default::default()
        };
        // Below the enable threshold: percentage applies.
        assert_eq!(tuning.empty_process_limit(32, GIB / 2), 32 * 25 / 100);
        // At or above the threshold trim is disallowed: back to /2.
        assert_eq!(tuning.empty_process_limit(32, 2 * GIB), 16);
    }

    #[test]
    fn trim_thresholds() {
        let tuning = ProcessTuning::default();
        // max_empty = 16; disabled path: 16/2 and (32-16)/3.
        assert_eq!(tuning.trim_empty_apps(GIB / 2), 8);
        assert_eq!(tuning.trim_cached_apps(GIB / 2), 5);

        let enabled = ProcessTuning {
            use_trim_settings: true,
            trim_empty_percent: 50,
            trim_cache_percent: 75,
            ..Default::default()
        };
        // max_empty = 16; enabled path: 16*50/100 and 32*75/100.
        assert_eq!(enabled.trim_empty_apps(GIB / 2), 8);
        assert_eq!(enabled.trim_cached_apps(GIB / 2), 24);
    }
}
