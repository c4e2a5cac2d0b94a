use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Root that cloud paths are translated into
    #[serde(default = "default_fs_root")]
    pub fs_root: PathBuf,

    /// How the helper process is started
    #[serde(default)]
    pub helper: HelperConfig,

    /// Session lifetime
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Cloud user to unix identity mapping
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Helper executable
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the protocol arguments (e.g. a sudo wrapper)
    #[serde(default)]
    pub args: Vec<String>,

    /// How long to wait for the ready boundary on stderr
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Liveness poll interval during the handshake
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Read buffer size per stream
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Sessions unused for this long are closed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often the reaper looks for idle sessions
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub cloud_user: String,
    /// Unix account name, used for ACL entries. Defaults to `cloud_user`.
    #[serde(default)]
    pub unix_user: Option<String>,
    pub uid: u32,
    pub gid: u32,
}

fn default_fs_root() -> PathBuf {
    PathBuf::from("/mnt/cephfs")
}

fn default_program() -> String {
    "ceph-interpreter".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    20
}

fn default_buffer_size() -> usize {
    32 * 1024
}

fn default_idle_timeout_secs() -> u64 {
    15 * 60
}

fn default_reap_interval_secs() -> u64 {
    60
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            fs_root: default_fs_root(),
            helper: HelperConfig::default(),
            sessions: SessionsConfig::default(),
            users: Vec::new(),
        }
    }
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

impl BridgeConfig {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

impl HelperConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl SessionsConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}
