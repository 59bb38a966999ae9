//! Spawn command construction
//!
//! Translates a saved host into the `ssh` invocation the backend spawns.
//! The backend only knows how to run a command in a pseudo-terminal; the
//! argument vector and environment are assembled here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Host;

/// What to spawn: command, arguments, working directory and environment.
/// Mirrors the backend's spawn call shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Host {
    /// Build the `ssh` spawn spec for this host.
    ///
    /// Port is passed only when non-default; identity file and jump host are
    /// forwarded verbatim. Host-specific `KEY=VALUE` lines override the
    /// baseline environment.
    pub fn spawn_spec(&self) -> SpawnSpec {
        let mut args = Vec::new();

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }
        if let Some(identity) = self.identity_file.as_deref().filter(|s| !s.trim().is_empty()) {
            args.push("-i".to_string());
            args.push(identity.to_string());
        }
        if let Some(jump) = self.proxy_jump.as_deref().filter(|s| !s.trim().is_empty()) {
            args.push("-J".to_string());
            args.push(jump.to_string());
        }

        let target = if self.user.is_empty() {
            self.hostname.clone()
        } else {
            format!("{}@{}", self.user, self.hostname)
        };
        args.push(target);

        let mut env = BTreeMap::new();
        env.insert("TERM".to_string(), "xterm-256color".to_string());
        for (key, value) in parse_env_vars(self.env_vars.as_deref().unwrap_or_default()) {
            env.insert(key, value);
        }

        SpawnSpec {
            command: "ssh".to_string(),
            args,
            working_dir: None,
            env,
        }
    }
}

/// Parse free-form `KEY=VALUE` lines. Blank lines and lines without `=` are
/// skipped; values may themselves contain `=`.
fn parse_env_vars(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
