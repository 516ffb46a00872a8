//! Runtime configuration for the resync core.
//!
//! Every knob defaults to the constant observed in production; a TOML file may
//! override any subset of them:
//!
//! ```toml
//! [backoff]
//! base_ms = 600
//!
//! [pagination]
//! hidden_page_size = 40
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, SyncError};

const DEFAULT_CONFIG_RELATIVE_PATH: &str = "resync/resync.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 600,
            cap_ms: 15_000,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub tick_interval_ms: u64,
    /// A tick delta above this means the process was suspended.
    pub clock_jump_threshold_ms: u64,
    /// A visible, error-free stream silent for this long is considered stalled.
    pub stall_threshold_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2_000,
            clock_jump_threshold_ms: 8_000,
            stall_threshold_ms: 45_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    pub force_reconnect_gap_ms: u64,
    pub stale_chunk_age_ms: u64,
    pub resync_min_spacing_ms: u64,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            force_reconnect_gap_ms: 20_000,
            stale_chunk_age_ms: 45_000,
            resync_min_spacing_ms: 1_500,
        }
    }
}

/// Page sizes for list refetches after a resume.
///
/// The values are empirical; they are kept as a lookup table rather than a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub hidden_page_size: usize,
    pub default_page_size: usize,
    pub default_large_gap_page_size: usize,
    pub moderate_page_size: usize,
    pub moderate_large_gap_page_size: usize,
    pub shallow_page_size: usize,
    pub shallow_large_gap_page_size: usize,
    /// At or below this many expanded directories the UI fetches deepest.
    pub shallow_expanded_threshold: usize,
    pub moderate_expanded_threshold: usize,
    pub large_gap_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            hidden_page_size: 40,
            default_page_size: 80,
            default_large_gap_page_size: 120,
            moderate_page_size: 120,
            moderate_large_gap_page_size: 140,
            shallow_page_size: 160,
            shallow_large_gap_page_size: 200,
            shallow_expanded_threshold: 3,
            moderate_expanded_threshold: 8,
            large_gap_ms: 20_000,
        }
    }
}

impl PaginationConfig {
    pub fn page_size(&self, gap_ms: u64, expanded_directories: usize, visible: bool) -> usize {
        if !visible {
            return self.hidden_page_size;
        }
        let large_gap = gap_ms >= self.large_gap_ms;
        let (normal, bumped) = if expanded_directories <= self.shallow_expanded_threshold {
            (self.shallow_page_size, self.shallow_large_gap_page_size)
        } else if expanded_directories <= self.moderate_expanded_threshold {
            (self.moderate_page_size, self.moderate_large_gap_page_size)
        } else {
            (self.default_page_size, self.default_large_gap_page_size)
        };
        if large_gap {
            bumped
        } else {
            normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub output_buffer_max_bytes: usize,
    pub probe_before_retry: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            output_buffer_max_bytes: 256 * 1024,
            probe_before_retry: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub pagination_min_spacing_ms: u64,
    pub list_refresh_min_spacing_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            pagination_min_spacing_ms: 900,
            list_refresh_min_spacing_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub backoff: BackoffConfig,
    pub liveness: LivenessConfig,
    pub resume: ResumeConfig,
    pub pagination: PaginationConfig,
    pub terminal: TerminalConfig,
    pub throttle: ThrottleConfig,
}

/// Returns the default config location (`<config_dir>/resync/resync.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

/// Loads configuration, returning defaults when the file doesn't exist.
pub fn load_config(path: Option<PathBuf>) -> Result<SyncConfig> {
    let config_path = match path.or_else(default_config_path) {
        Some(path) => path,
        None => return Ok(SyncConfig::default()),
    };

    if !config_path.exists() {
        return Ok(SyncConfig::default());
    }

    let content =
        fs_err::read_to_string(&config_path).map_err(|source| SyncError::ConfigRead {
            path: config_path.clone(),
            source,
        })?;
    parse_config(&content).map_err(|details| SyncError::ConfigMalformed {
        path: config_path,
        details,
    })
}

pub fn parse_config(content: &str) -> std::result::Result<SyncConfig, String> {
    toml::from_str::<SyncConfig>(content).map_err(|err| err.to_string())
}
