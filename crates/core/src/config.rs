use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sandbox root, container identity and command limits.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxSettings {
    /// Sandbox root on the host. No resolved path may leave it.
    pub home_dir: PathBuf,
    /// Logical working directory of the container. Agents often echo paths
    /// carrying this prefix back; the resolver strips it.
    pub container_workdir: String,
    /// Name of the pre-provisioned, already running container.
    pub container_name: String,
    /// User that commands run as inside the container.
    pub container_user: String,
    /// Shell used to interpret command text.
    pub shell: String,
    pub command_timeout_secs: u64,
    /// Workspace activated at startup, if any.
    pub default_workspace: Option<String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            home_dir: PathBuf::from("/tmp/devbox"),
            container_workdir: "/home/user".into(),
            container_name: "devbox-sandbox".into(),
            container_user: "user".into(),
            shell: "sh".into(),
            command_timeout_secs: 60,
            default_workspace: None,
        }
    }
}

impl SandboxSettings {
    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,devbox=debug".into(),
            json: false,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("DEVBOX_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map DEVBOX__SANDBOX__HOME_DIR=/srv/sandbox to sandbox.home_dir
            .add_source(Environment::with_prefix("DEVBOX").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Load from a single explicit file plus environment overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("DEVBOX").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
