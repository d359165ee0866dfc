//! Build-time configuration.
//!
//! Every tunable of the builders lives in [`StoreConfig`]. The struct is
//! serde-friendly so a build can be driven from a JSON file:
//!
//! ```json
//! { "sort_buffer_bytes": 16777216, "split_mode": "prefix_suffix", "min_shared_reuse": 2 }
//! ```
//!
//! Missing fields take their defaults.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::split::SplitMode;

const DEFAULT_SORT_BUFFER_BYTES: usize = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Parent directory for builder temp directories. Defaults to the system temp dir.
    pub work_dir: Option<PathBuf>,
    /// Approximate in-memory budget of one external sorter before it spills a run.
    ///
    /// The composite builder also keeps an 8-byte fingerprint per distinct
    /// term between its two passes. That set is not bounded by this budget.
    pub sort_buffer_bytes: usize,
    /// Which shared substrings the composite builder externalizes.
    pub split_mode: SplitMode,
    /// Shared parts shorter than this are not worth an extra lookup.
    pub min_shared_len: u16,
    /// A shared candidate must be reused by at least this many distinct terms to be kept.
    pub min_shared_reuse: u64,
    /// Compress spilled sort runs with zstd (requires the `zstd` feature).
    pub compress_runs: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            sort_buffer_bytes: DEFAULT_SORT_BUFFER_BYTES,
            split_mode: SplitMode::PrefixSuffix,
            min_shared_len: 4,
            min_shared_reuse: 1,
            compress_runs: false,
        }
    }
}

impl StoreConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Directory under which builders create their private temp directories.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_sort_buffer_bytes(mut self, bytes: usize) -> Self {
        self.sort_buffer_bytes = bytes;
        self
    }

    pub fn with_split_mode(mut self, mode: SplitMode) -> Self {
        self.split_mode = mode;
        self
    }

    pub fn with_min_shared_len(mut self, len: u16) -> Self {
        self.min_shared_len = len;
        self
    }

    pub fn with_min_shared_reuse(mut self, n: u64) -> Self {
        self.min_shared_reuse = n;
        self
    }

    pub fn with_compress_runs(mut self, on: bool) -> Self {
        self.compress_runs = on;
        self
    }
}
