use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::Deserialize;

use tools::toml;

const CONFIG_FILE: &str = "sekia.toml";

/// Top-level configuration for the `sekia` server binary (SPEC_FULL.md
/// §A.3). Search order: `--config <path>`, then `./sekia.toml`, then
/// `$HOME/.config/sekia/sekia.toml`, then `/etc/sekia/sekia.toml`.
///
/// A handful of values can be overridden without editing the file via
/// `SEKIA_SOCKET_PATH`, `SEKIA_WORKFLOW_DIR`, and `SEKIA_COMMAND_SECRET`.
#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub workflows: WorkflowSettings,
    #[serde(default)]
    pub journal: JournalSettings,
    #[serde(default)]
    pub command_secret: String,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub socket_path: PathBuf,
    pub http_addr: String,
    pub metrics_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            socket_path: sekia_control_api::default_path(),
            http_addr: "127.0.0.1:8089".to_owned(),
            metrics_addr: "127.0.0.1:8090".to_owned(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub dir: PathBuf,
    pub verify_integrity: bool,
    pub handler_timeout_secs: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self { dir: PathBuf::from("./workflows"), verify_integrity: true, handler_timeout_secs: 30 }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Config {
    /// Loads configuration from `override_path` if given, else the standard
    /// search order, then applies `SEKIA_*` environment overrides.
    pub fn parse(override_path: Option<&Path>) -> anyhow::Result<Self> {
        let path = override_path.map(Path::to_path_buf).or_else(Self::discover).ok_or_else(|| {
            anyhow::anyhow!("no {CONFIG_FILE} found in cwd, $HOME/.config/sekia, or /etc/sekia")
        })?;

        let mut config: Self =
            toml::parse_file(&path).with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides();
        config.validate()
    }

    fn discover() -> Option<PathBuf> {
        let cwd = PathBuf::from(CONFIG_FILE);
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let candidate = PathBuf::from(home).join(".config/sekia").join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
        }

        let system = PathBuf::from("/etc/sekia").join(CONFIG_FILE);
        system.exists().then_some(system)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SEKIA_SOCKET_PATH") {
            self.server.socket_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("SEKIA_WORKFLOW_DIR") {
            self.workflows.dir = PathBuf::from(dir);
        }
        if let Ok(secret) = std::env::var("SEKIA_COMMAND_SECRET") {
            self.command_secret = secret;
        }
    }

    fn validate(self) -> anyhow::Result<Self> {
        if self.server.http_addr == self.server.metrics_addr {
            bail!("server.http_addr and server.metrics_addr must differ");
        }
        Ok(self)
    }
}
