//! apkrelay configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/apkrelay/apkrelay.toml`
//! - Windows: `%APPDATA%/apkrelay/apkrelay.toml`
//!
//! `--config <path>` overrides the location.

use std::path::{Path, PathBuf};
use std::time::Duration;

use apkrelay_orchestrator::TransferConfig;
use apkrelay_protocol::OversizePolicy;
use apkrelay_protocol::constants::{DEFAULT_CEILING, DEFAULT_CHUNK_SIZE, DEFAULT_RELAY_PORT};
use apkrelay_relay::ServerConfig;
use serde::{Deserialize, Serialize};

/// apkrelay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transfer: TransferSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub output: OutputSection,
}

/// `[transfer]`: how payloads are moved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    /// Largest payload delivered in one piece, in bytes.
    #[serde(default = "default_ceiling")]
    pub ceiling: u64,

    /// Part size for chunked transfers, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// `chunked` or `relay`, for payloads above the ceiling.
    #[serde(default)]
    pub oversize_policy: OversizePolicy,

    /// Extra attempts after a transient delivery failure (0-3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Overall limit per transfer in seconds (0 = no limit).
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Accepted package extensions (empty = any).
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,
}

/// `[relay]`: client base URL and server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    /// Relay used by `send`; unset disables the relay strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// Base URL placed in returned links (defaults to the bound address).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Largest accepted upload in bytes (0 = unlimited).
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

/// `[output]`: where `send` delivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Whether numbered parts may be delivered.
    #[serde(default = "default_true")]
    pub chunk_capable: bool,
}

fn default_ceiling() -> u64 {
    DEFAULT_CEILING
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_deadline_secs() -> u64 {
    30 * 60
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("apkrelay")
}

fn default_extensions() -> Vec<String> {
    vec!["apk".into()]
}

fn default_bind() -> String {
    format!("0.0.0.0:{DEFAULT_RELAY_PORT}")
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_upload_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_true() -> bool {
    true
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            ceiling: default_ceiling(),
            chunk_size: default_chunk_size(),
            oversize_policy: OversizePolicy::default(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            deadline_secs: default_deadline_secs(),
            temp_dir: default_temp_dir(),
            allowed_extensions: default_extensions(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            url: None,
            bind: default_bind(),
            public_url: None,
            storage_dir: default_storage_dir(),
            allowed_extensions: default_extensions(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            chunk_capable: default_true(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the platform default), creating
    /// a default file if none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_path()?,
        };

        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.transfer.ceiling == 0 {
            anyhow::bail!("transfer.ceiling must be greater than zero");
        }
        if self.transfer.chunk_size == 0 {
            anyhow::bail!("transfer.chunk_size must be greater than zero");
        }
        Ok(())
    }

    /// Orchestrator settings from `[transfer]`.
    pub fn transfer_config(&self) -> TransferConfig {
        let t = &self.transfer;
        TransferConfig {
            ceiling: t.ceiling,
            chunk_size: t.chunk_size,
            oversize_policy: t.oversize_policy,
            max_retries: t.max_retries,
            retry_delay: Duration::from_secs(t.retry_delay_secs),
            deadline: (t.deadline_secs > 0).then(|| Duration::from_secs(t.deadline_secs)),
            temp_dir: t.temp_dir.clone(),
            allowed_extensions: t.allowed_extensions.clone(),
        }
    }

    /// Relay server settings from `[relay]`.
    pub fn server_config(&self) -> ServerConfig {
        let r = &self.relay;
        ServerConfig {
            bind: r.bind.clone(),
            public_url: r.public_url.clone(),
            storage_dir: r.storage_dir.clone(),
            allowed_extensions: r.allowed_extensions.clone(),
            max_upload_size: r.max_upload_size,
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("apkrelay")
            .join("apkrelay.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("apkrelay").join("apkrelay.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/apkrelay/apkrelay.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.transfer.ceiling, 50 * 1024 * 1024);
        assert_eq!(config.transfer.chunk_size, config.transfer.ceiling);
        assert_eq!(config.transfer.oversize_policy, OversizePolicy::Chunked);
        assert_eq!(config.transfer.allowed_extensions, vec!["apk"]);
        assert!(config.relay.url.is_none());
        assert_eq!(config.relay.bind, "0.0.0.0:8000");
        assert!(config.output.chunk_capable);
    }

    #[test]
    fn config_roundtrip_toml() {
        let mut config = Config::default();
        config.transfer.oversize_policy = OversizePolicy::Relay;
        config.transfer.max_retries = 3;
        config.relay.url = Some("http://relay:8000".into());

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.transfer.oversize_policy, OversizePolicy::Relay);
        assert_eq!(parsed.transfer.max_retries, 3);
        assert_eq!(parsed.relay.url.as_deref(), Some("http://relay:8000"));
    }

    #[test]
    fn config_partial_toml() {
        // Only the policy is set, everything else falls back to defaults.
        let toml_str = "[transfer]\noversize_policy = \"relay\"\n";
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.transfer.oversize_policy, OversizePolicy::Relay);
        assert_eq!(config.transfer.ceiling, DEFAULT_CEILING);
        assert_eq!(config.output.dir, PathBuf::from("output"));
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path().unwrap();
        assert!(path.to_string_lossy().contains("apkrelay"));
    }

    #[test]
    fn load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("apkrelay.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.transfer.ceiling, DEFAULT_CEILING);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn load_rejects_zero_chunk_size() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("apkrelay.toml");
        std::fs::write(&path, "[transfer]\nchunk_size = 0\n").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn zero_deadline_means_unbounded() {
        let mut config = Config::default();
        config.transfer.deadline_secs = 0;
        assert!(config.transfer_config().deadline.is_none());

        config.transfer.deadline_secs = 5;
        assert_eq!(
            config.transfer_config().deadline,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn server_config_from_relay_section() {
        let mut config = Config::default();
        config.relay.public_url = Some("https://relay.example".into());
        let server = config.server_config();
        assert_eq!(server.bind, "0.0.0.0:8000");
        assert_eq!(server.public_url.as_deref(), Some("https://relay.example"));
    }
}
