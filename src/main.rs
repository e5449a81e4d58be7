#![deny(unused)]
//! Devbox - a sandboxed virtual computer for LLM agents.
//!
//! Loads configuration, initializes tracing, registers the sandbox tools and
//! either lists them or invokes one with JSON arguments.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use devbox_core::config::AppConfig;
use devbox_core::ToolRegistry;
use devbox_sandbox::{
    register_sandbox_tools, CommandGateway, ContainerRuntime, DockerRuntime, GatewayConfig,
    SandboxManager,
};
use devbox_skills::DefaultToolRegistry;

#[derive(Parser)]
#[command(name = "devbox")]
#[command(about = "Sandboxed workspace and command gateway for LLM agents")]
#[command(version)]
struct Cli {
    /// Configuration file (default: config/default, config/$DEVBOX_ENV, config/local)
    #[arg(long, global = true, env = "DEVBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Workspace to activate before running the command
    #[arg(short, long, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the definitions of all tools as JSON
    Tools,

    /// Execute a tool directly
    Call {
        /// Tool name (e.g. read_file, grep)
        #[arg(index = 1)]
        tool: String,

        /// JSON arguments (e.g. '{"path": "src/main.py"}')
        #[arg(index = 2, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    devbox_governance::configure_tracing(&config.logging)?;

    tracing::info!(
        home = %config.sandbox.home_dir.display(),
        container = %config.sandbox.container_name,
        "Starting devbox v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut manager = SandboxManager::from_settings(&config.sandbox)?;
    if let Some(workspace) = &cli.workspace {
        manager.workspace().set(workspace.clone())?;
    }

    // Commands need a reachable container runtime; file tools do not.
    if matches!(cli.command, Commands::Call { ref tool, .. } if tool == "run_command") {
        match DockerRuntime::new() {
            Ok(runtime) if runtime.is_available().await => {
                let gateway = CommandGateway::new(
                    Arc::new(runtime),
                    GatewayConfig::from(&config.sandbox),
                );
                manager = manager.with_gateway(Arc::new(gateway));
            }
            Ok(_) => tracing::warn!("Docker daemon not reachable, run_command disabled"),
            Err(e) => tracing::warn!(error = %e, "Docker unavailable, run_command disabled"),
        }
    }

    let registry = DefaultToolRegistry::new();
    register_sandbox_tools(&registry, Arc::new(manager)).await?;

    match cli.command {
        Commands::Tools => {
            let definitions = registry.list().await?;
            println!("{}", serde_json::to_string_pretty(&definitions)?);
        }
        Commands::Call { tool, args } => {
            let args: serde_json::Value = serde_json::from_str(&args)?;
            let output = registry.execute(&tool, args).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            if !output.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
