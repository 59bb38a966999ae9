//! Host directory and secret store contracts
//!
//! Hosts are owned by the host-management layer; this core only reads them.
//! The secret store is consulted once per connect attempt and its failures
//! degrade to "no saved secret"; it is a convenience, not a gate.

pub mod command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use command::SpawnSpec;

/// A saved host entry, referenced read-only by the session core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: String,
    /// Display alias; falls back to `user@hostname` when empty
    #[serde(default)]
    pub alias: String,
    pub hostname: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Private key path passed to ssh via `-i`
    #[serde(default)]
    pub identity_file: Option<String>,
    /// Jump host passed to ssh via `-J`
    #[serde(default)]
    pub proxy_jump: Option<String>,
    /// Free-form `KEY=VALUE` lines injected into the spawned environment
    #[serde(default)]
    pub env_vars: Option<String>,
    /// Whether the secret store holds a password for this host
    #[serde(default)]
    pub has_saved_secret: bool,
    /// Live insight probing enabled for this host
    #[serde(default)]
    pub live_insight: bool,
    /// Static insight probing enabled for this host
    #[serde(default)]
    pub static_insight: bool,
}

fn default_port() -> u16 {
    22
}

impl Host {
    /// Display label: the alias, or `user@hostname` when no alias is set.
    pub fn label(&self) -> String {
        if !self.alias.trim().is_empty() {
            return self.alias.clone();
        }
        if self.user.is_empty() {
            self.hostname.clone()
        } else {
            format!("{}@{}", self.user, self.hostname)
        }
    }
}

/// Host directory errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("Host not found: {0}")]
    NotFound(String),

    #[error("Host store error: {0}")]
    Store(String),
}

/// Read-only view of the host store, plus the recency bump the original
/// client persists when a connection starts.
#[async_trait]
pub trait HostDirectory: Send + Sync {
    async fn list(&self) -> Result<Vec<Host>, HostError>;

    async fn get(&self, host_id: &str) -> Result<Option<Host>, HostError>;

    /// Record that the host was just used (sort-order / recency bump).
    async fn touch(&self, host_id: &str) -> Result<(), HostError>;
}

/// Secret store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SecretError {
    #[error("Secret store error: {0}")]
    Store(String),
}

/// Saved-password lookup. Consulted once per connect attempt; the plaintext
/// never touches persistence on this side of the boundary.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, host_id: &str) -> Result<Option<String>, SecretError>;
}
