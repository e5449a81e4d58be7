//! Container runtime backends.
//!
//! The sandbox never creates or destroys containers. It only needs to find a
//! pre-provisioned one by name and run a command inside it, so the
//! `ContainerRuntime` trait exposes exactly those two primitives. Docker is
//! reached through `bollard`; `MockRuntime` stands in for it in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use devbox_core::{Error, Result};

// =============================================================================
// Runtime Types
// =============================================================================

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    /// Name without Docker's leading `/`.
    pub name: String,
    pub running: bool,
}

/// One command execution inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub container_id: String,
    /// Full argv, already wrapped for the shell.
    pub cmd: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
}

/// Raw output of a finished execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// =============================================================================
// Container Runtime Trait
// =============================================================================

/// Client for an external container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List running containers.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Run a command to completion and collect its output.
    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput>;

    /// Check if the runtime is reachable (e.g., Docker daemon running).
    async fn is_available(&self) -> bool;
}

// =============================================================================
// Docker Runtime
// =============================================================================

/// Docker-backed runtime using the `bollard` crate.
pub struct DockerRuntime {
    docker: bollard::Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::container_runtime(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self { docker })
    }

    /// Wrap an existing bollard client.
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        use bollard::container::ListContainersOptions;

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::container_runtime(format!("Failed to list containers: {}", e)))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .next()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                Some(ContainerSummary {
                    id,
                    name,
                    running: c.state.as_deref() == Some("running"),
                })
            })
            .collect())
    }

    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let exec_options = CreateExecOptions {
            cmd: Some(request.cmd.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: request.working_dir.clone(),
            user: request.user.clone(),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&request.container_id, exec_options)
            .await
            .map_err(|e| Error::container_runtime(format!("Failed to create exec: {}", e)))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::container_runtime(format!("Failed to start exec: {}", e)))?;

        let mut buffers = OutputBuffers::default();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            use futures::StreamExt;

            while let Some(msg) = output.next().await {
                let chunk = msg.map_err(|e| {
                    Error::container_runtime(format!("Exec output stream failed: {}", e))
                })?;
                buffers.push(chunk);
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::container_runtime(format!("Failed to inspect exec: {}", e)))?;

        Ok(buffers.finish(inspect.exit_code.unwrap_or(-1)))
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

/// Raw exec output, decoded only once the stream ends so a multi-byte
/// character split across two chunks stays intact.
#[derive(Debug, Default)]
struct OutputBuffers {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl OutputBuffers {
    fn push(&mut self, chunk: bollard::container::LogOutput) {
        use bollard::container::LogOutput;

        match chunk {
            LogOutput::StdOut { message } => self.stdout.extend_from_slice(&message),
            LogOutput::StdErr { message } => self.stderr.extend_from_slice(&message),
            // stdin echoes and raw console output
            _ => {}
        }
    }

    fn finish(self, exit_code: i64) -> ExecOutput {
        ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}

// =============================================================================
// Mock Runtime (for testing without Docker)
// =============================================================================

/// In-memory runtime with scripted responses and recorded calls.
#[derive(Clone, Default)]
pub struct MockRuntime {
    containers: Vec<ContainerSummary>,
    responses: Arc<tokio::sync::Mutex<VecDeque<ExecOutput>>>,
    calls: Arc<tokio::sync::Mutex<Vec<ExecRequest>>>,
    delay: Option<Duration>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running container named `name`.
    pub fn with_container(mut self, name: impl Into<String>) -> Self {
        self.containers.push(ContainerSummary {
            id: format!("mock-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            running: true,
        });
        self
    }

    /// Queue responses returned by successive `exec` calls.
    pub fn with_responses(self, responses: Vec<ExecOutput>) -> Self {
        Self {
            responses: Arc::new(tokio::sync::Mutex::new(responses.into())),
            ..self
        }
    }

    /// Sleep this long inside every `exec`, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn push_response(&self, output: ExecOutput) {
        self.responses.lock().await.push_back(output);
    }

    /// Every request `exec` received, in order.
    pub async fn calls(&self) -> Vec<ExecRequest> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        Ok(self.containers.clone())
    }

    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput> {
        if !self.containers.iter().any(|c| c.id == request.container_id) {
            return Err(Error::container_runtime(format!(
                "No such container: {}",
                request.container_id
            )));
        }
        self.calls.lock().await.push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.lock().await.pop_front();
        Ok(scripted.unwrap_or_else(|| ExecOutput {
            exit_code: 0,
            stdout: "[mock] command executed".to_string(),
            stderr: String::new(),
        }))
    }

    async fn is_available(&self) -> bool {
        true
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_success() {
        assert!(ExecOutput::default().success());
        let failed = ExecOutput {
            exit_code: 2,
            ..Default::default()
        };
        assert!(!failed.success());
    }

    #[tokio::test]
    async fn test_mock_runtime_scripted_responses() {
        let mock = MockRuntime::new()
            .with_container("box")
            .with_responses(vec![ExecOutput {
                exit_code: 0,
                stdout: "hello\n".into(),
                stderr: String::new(),
            }]);

        let containers = mock.list_containers().await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "box");
        assert!(containers[0].running);

        let request = ExecRequest {
            container_id: containers[0].id.clone(),
            cmd: vec!["sh".into(), "-c".into(), "echo hello".into()],
            user: Some("user".into()),
            working_dir: None,
        };
        let first = mock.exec(request.clone()).await.unwrap();
        assert_eq!(first.stdout, "hello\n");

        // Queue exhausted, falls back to the default response.
        let second = mock.exec(request.clone()).await.unwrap();
        assert_eq!(second.stdout, "[mock] command executed");

        mock.push_response(ExecOutput {
            exit_code: 3,
            stdout: String::new(),
            stderr: "late\n".into(),
        })
        .await;
        let third = mock.exec(request.clone()).await.unwrap();
        assert_eq!(third.exit_code, 3);
        assert_eq!(third.stderr, "late\n");

        assert_eq!(
            mock.calls().await,
            vec![request.clone(), request.clone(), request]
        );
    }

    #[test]
    fn test_output_decoded_after_stream_ends() {
        use bollard::container::LogOutput;

        let mut buffers = OutputBuffers::default();
        // "café ✓" with both multi-byte characters split across chunks
        buffers.push(LogOutput::StdOut {
            message: b"caf\xC3".to_vec().into(),
        });
        buffers.push(LogOutput::StdErr {
            message: b"warn\xE2\x9C".to_vec().into(),
        });
        buffers.push(LogOutput::StdOut {
            message: b"\xA9 ".to_vec().into(),
        });
        buffers.push(LogOutput::StdErr {
            message: b"\x93\n".to_vec().into(),
        });
        buffers.push(LogOutput::StdIn {
            message: b"ignored".to_vec().into(),
        });

        let output = buffers.finish(0);
        assert_eq!(output.stdout, "café ");
        assert_eq!(output.stderr, "warn✓\n");
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_mock_runtime_unknown_container() {
        let mock = MockRuntime::new();
        let err = mock
            .exec(ExecRequest {
                container_id: "ghost".into(),
                cmd: vec![],
                user: None,
                working_dir: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContainerRuntime(_)));
        assert!(mock.calls().await.is_empty());
    }
}
