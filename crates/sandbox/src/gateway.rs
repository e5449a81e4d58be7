//! Policy-gated command execution in the sandbox container.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use devbox_core::config::SandboxSettings;
use devbox_core::{Error, Result};
use devbox_governance::{CommandPolicy, PolicyDecision, BLOCKED_EXIT_CODE};

use crate::engine::{ContainerRuntime, ContainerSummary, ExecRequest};

/// Where and how commands run inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub container_name: String,
    pub container_user: String,
    /// Logical working directory; the active workspace is appended to it.
    pub container_workdir: String,
    pub shell: String,
    pub timeout: Duration,
}

impl From<&SandboxSettings> for GatewayConfig {
    fn from(settings: &SandboxSettings) -> Self {
        Self {
            container_name: settings.container_name.clone(),
            container_user: settings.container_user.clone(),
            container_workdir: settings.container_workdir.clone(),
            shell: settings.shell.clone(),
            timeout: settings.command_timeout(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&SandboxSettings::default())
    }
}

/// Decoded output of a command, or the policy refusal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    /// True when the policy refused the command; `exit_code` is then 126.
    #[serde(default)]
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyDecision>,
}

impl CommandResult {
    fn blocked(decision: PolicyDecision) -> Self {
        Self {
            stdout: String::new(),
            stderr: decision.message(),
            exit_code: BLOCKED_EXIT_CODE,
            blocked: true,
            policy: Some(decision),
        }
    }

    pub fn success(&self) -> bool {
        !self.blocked && self.exit_code == 0
    }
}

pub struct CommandGateway {
    runtime: Arc<dyn ContainerRuntime>,
    policy: CommandPolicy,
    config: GatewayConfig,
}

impl CommandGateway {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: GatewayConfig) -> Self {
        Self {
            runtime,
            policy: CommandPolicy::new(),
            config,
        }
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    /// Find the configured container among the running ones.
    pub async fn find_container(&self) -> Result<ContainerSummary> {
        let containers = self.runtime.list_containers().await?;
        containers
            .into_iter()
            .find(|c| c.running && c.name == self.config.container_name)
            .ok_or_else(|| Error::container_not_found(&self.config.container_name))
    }

    /// Working directory for commands in `workspace`.
    pub fn working_dir(&self, workspace: Option<&str>) -> String {
        let base = self.config.container_workdir.trim_end_matches('/');
        match workspace {
            Some(ws) => format!("{}/{}", base, ws),
            None if base.is_empty() => "/".to_string(),
            None => base.to_string(),
        }
    }

    /// Run `command` with the configured timeout.
    pub async fn run(&self, command: &str, workspace: Option<&str>) -> Result<CommandResult> {
        self.run_with_timeout(command, workspace, self.config.timeout)
            .await
    }

    /// Run `command` through the shell inside the container.
    ///
    /// Policy refusals come back as a result with exit code 126. A missing
    /// container and an expired timeout are errors: neither has output worth
    /// returning.
    pub async fn run_with_timeout(
        &self,
        command: &str,
        workspace: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let container = self.find_container().await?;

        let decision = self.policy.evaluate(command);
        if !decision.allowed {
            return Ok(CommandResult::blocked(decision));
        }

        let request = ExecRequest {
            container_id: container.id,
            cmd: vec![
                self.config.shell.clone(),
                "-c".to_string(),
                command.to_string(),
            ],
            user: Some(self.config.container_user.clone()),
            working_dir: Some(self.working_dir(workspace)),
        };

        tracing::info!(
            command = %command,
            container = %self.config.container_name,
            workdir = ?request.working_dir,
            "Dispatching command"
        );

        let runtime = Arc::clone(&self.runtime);
        let mut task = tokio::spawn(async move { runtime.exec(request).await });

        let output = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => {
                joined.map_err(|e| Error::internal(format!("Command task failed: {}", e)))??
            }
            Err(_) => {
                task.abort();
                tracing::warn!(command = %command, timeout = ?timeout, "Command timed out");
                return Err(Error::timeout(command, timeout));
            }
        };

        tracing::debug!(
            command = %command,
            exit_code = output.exit_code,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "Command finished"
        );

        Ok(CommandResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            blocked: false,
            policy: None,
        })
    }
}
