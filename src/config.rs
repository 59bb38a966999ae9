//! Core configuration
//!
//! Tunables for the multiplexing core: buffer budgets, debounce windows,
//! connect/RPC timeouts and the exit retention policy. Stored as JSON under
//! the user's home directory (`~/.termplex/config.json`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::buffer::BufferLimits;
use crate::session::state::CloseReason;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Get the termplex configuration directory (`~/.termplex`)
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".termplex"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Default config file path (`~/.termplex/config.json`)
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json"))
}

/// Decides whether an exited session's tab stays visible for diagnosis.
///
/// The defaults reproduce the client's historical behavior: a timeout keeps
/// the tab, an unclassified close keeps it only when the exit code is
/// non-zero. Both knobs are independent so the policy can be tightened or
/// disabled without touching lifecycle code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Keep the tab when the user confirmed a connect-timeout cancel
    pub keep_on_timeout: bool,
    /// Keep the tab when an unclassified close carries a non-zero exit code
    pub keep_unknown_failures: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_on_timeout: true,
            keep_unknown_failures: true,
        }
    }
}

impl RetentionPolicy {
    /// Whether an exited session's record should stay in the registry.
    ///
    /// A user-requested close never lingers. An unclassified close with exit
    /// code zero is an ordinary remote logout; a non-zero code with no
    /// recorded reason is evidence of a failure the user did not request.
    pub fn should_retain(&self, reason: CloseReason, exit_code: u32) -> bool {
        match reason {
            CloseReason::User => false,
            CloseReason::Timeout => self.keep_on_timeout,
            CloseReason::Unknown => self.keep_unknown_failures && exit_code != 0,
        }
    }
}

/// Core tunables. Every field has a serde default so a partial (or empty)
/// config file yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MuxConfig {
    /// Character budget per session buffer
    pub char_budget: usize,
    /// Visible chunk budget per session buffer
    pub chunk_budget: usize,
    /// Trailing window scanned for interactive prompts, in characters
    pub prompt_tail_chars: usize,
    /// Debounce window for continuous resize signals (ms)
    pub resize_debounce_ms: u64,
    /// One-shot resize delay after a session switch (ms)
    pub switch_resize_delay_ms: u64,
    /// Post-activation settle loop: number of re-measures
    pub settle_ticks: u32,
    /// Post-activation settle loop: interval between re-measures (ms)
    pub settle_interval_ms: u64,
    /// Connect-attempt timeout before asking the user to cancel (s)
    pub connect_timeout_secs: u64,
    /// Per-stage timeout for connect-time RPCs (s)
    pub rpc_timeout_secs: u64,
    /// Exit retention policy
    pub retention: RetentionPolicy,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            char_budget: 2_000_000,
            chunk_budget: 2_048,
            prompt_tail_chars: 800,
            resize_debounce_ms: 50,
            switch_resize_delay_ms: 30,
            settle_ticks: 3,
            settle_interval_ms: 120,
            connect_timeout_secs: 15,
            rpc_timeout_secs: 10,
            retention: RetentionPolicy::default(),
        }
    }
}

impl MuxConfig {
    /// Load configuration from a JSON file. A missing file is not an error;
    /// it yields the defaults, matching first-run behavior.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist configuration as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Buffer eviction limits derived from the budgets
    pub fn buffer_limits(&self) -> BufferLimits {
        BufferLimits {
            char_budget: self.char_budget,
            chunk_budget: self.chunk_budget,
        }
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    pub fn switch_resize_delay(&self) -> Duration {
        Duration::from_millis(self.switch_resize_delay_ms)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MuxConfig::default();
        assert_eq!(config.char_budget, 2_000_000);
        assert_eq!(config.chunk_budget, 2_048);
        assert_eq!(config.prompt_tail_chars, 800);
        assert_eq!(config.resize_debounce_ms, 50);
        assert_eq!(config.connect_timeout_secs, 15);
        assert!(config.retention.keep_on_timeout);
        assert!(config.retention.keep_unknown_failures);
    }

    #[test]
    fn test_empty_json_yields_defaults() {
        let config: MuxConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.char_budget, MuxConfig::default().char_budget);
        assert_eq!(config.rpc_timeout_secs, 10);
    }

    #[test]
    fn test_partial_override() {
        let config: MuxConfig =
            serde_json::from_str(r#"{"charBudget": 500, "retention": {"keepOnTimeout": false}}"#)
                .unwrap();
        assert_eq!(config.char_budget, 500);
        assert!(!config.retention.keep_on_timeout);
        // untouched fields keep defaults
        assert!(config.retention.keep_unknown_failures);
        assert_eq!(config.chunk_budget, 2_048);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let config = MuxConfig::load(&path).unwrap();
        assert_eq!(config.char_budget, 2_000_000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = MuxConfig::default();
        config.chunk_budget = 64;
        config.save(&path).unwrap();

        let reloaded = MuxConfig::load(&path).unwrap();
        assert_eq!(reloaded.chunk_budget, 64);
        assert_eq!(reloaded.char_budget, 2_000_000);
    }
}
