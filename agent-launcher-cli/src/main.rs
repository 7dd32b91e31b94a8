//! Agent Launcher CLI - Launch and supervise an agent workload

use agent_launcher::{
    CliRuntime, LaunchOptions, LauncherConfig, ProcessWorkload, SandboxConfig, SandboxManager,
    Supervisor, SupervisorState,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "agent-launcher")]
#[command(about = "Launch and supervise an agent workload", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (overrides agent-launcher.toml)
    #[arg(short, long, global = true, env = "AGENT_LAUNCHER_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the agent and supervise it until Ctrl-C
    Run {
        /// Run as a local process instead of in a container
        #[arg(long)]
        direct: bool,

        /// Port the agent listens on
        #[arg(short, long, default_value_t = 7777, env = "AGENT_LAUNCHER_PORT")]
        port: u16,

        /// Host data directory mounted into the container
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Extra environment for the agent (KEY=VALUE, repeatable)
        #[arg(short, long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,

        /// Agent binary for direct mode (overrides direct.program)
        #[arg(long)]
        program: Option<PathBuf>,
    },
    /// Show container status as JSON
    Status,
    /// Print recent container logs
    Logs {
        /// Number of lines from the end
        #[arg(short, long, default_value_t = 100)]
        tail: usize,
    },
    /// Run a shell command inside the container
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Build the agent image
    Build,
    /// Stop and remove the agent container
    Stop,
    /// Version information
    Version,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{}`", s))?;
    if key.is_empty() {
        return Err(format!("empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => LauncherConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LauncherConfig::load().context("Failed to load configuration")?,
    };

    match cli.command {
        Commands::Version => {
            println!("agent-launcher {}", env!("CARGO_PKG_VERSION"));
            println!("agent-launcher library {}", agent_launcher::VERSION);
        }
        Commands::Run {
            direct,
            port,
            data_dir,
            env,
            program,
        } => run(config, direct, port, data_dir, env, program).await?,
        Commands::Status => {
            let status = sandbox(&config).get_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Logs { tail } => {
            let logs = sandbox(&config).get_logs(tail).await?;
            print!("{}", logs);
        }
        Commands::Exec { command } => {
            let output = sandbox(&config).exec_in_container(&command.join(" ")).await?;
            print!("{}", output);
        }
        Commands::Build => {
            if !sandbox(&config).build_image().await {
                bail!("Failed to build image {}", config.sandbox.image_name);
            }
            println!("Built {}", config.sandbox.image_name);
        }
        Commands::Stop => {
            if !sandbox(&config).stop_container().await {
                bail!("Failed to stop container {}", config.sandbox.container_name);
            }
            println!("Stopped {}", config.sandbox.container_name);
        }
    }

    Ok(())
}

/// Manager for one-shot commands against the configured container
fn sandbox(config: &LauncherConfig) -> SandboxManager {
    let settings = &config.sandbox;
    SandboxManager::new(
        SandboxConfig::new(&settings.container_name, &settings.image_name)
            .with_build_context(&settings.build_context),
        Arc::new(CliRuntime::new(config.runtime.clone())),
        config.runtime.stop_grace,
    )
}

async fn run(
    config: LauncherConfig,
    direct: bool,
    port: u16,
    data_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    program: Option<PathBuf>,
) -> Result<()> {
    let mut options = if direct {
        LaunchOptions::direct(port)
    } else {
        LaunchOptions::containerized(port)
    };
    options.data_volume = data_dir;
    options.environment.extend(env);

    let mut supervisor = if direct {
        let program = program
            .or_else(|| config.direct.program.clone())
            .context("Direct mode needs --program or direct.program in the config")?;
        let workload = ProcessWorkload::new(program).with_args(config.direct.args.clone());
        Supervisor::new(config).with_workload(Arc::new(workload))
    } else {
        Supervisor::new(config)
    };

    supervisor.initialize(options).await?;
    if let Err(e) = supervisor.launch().await {
        shutdown(&mut supervisor).await;
        return Err(e.into());
    }

    let status = supervisor.get_status().await;
    info!("Agent is running: {}", serde_json::to_string(&status)?);

    let mut state = supervisor.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down");
        }
        _ = state.wait_for(|s| *s == SupervisorState::Failed) => {
            error!("Supervisor failed, giving up");
        }
    }

    if supervisor.state() == SupervisorState::Failed {
        shutdown(&mut supervisor).await;
        bail!("Agent could not be kept running");
    }
    supervisor.stop().await?;
    Ok(())
}

/// Best-effort teardown on a failure exit, so no container outlives the launcher
async fn shutdown(supervisor: &mut Supervisor) {
    if let Err(e) = supervisor.stop().await {
        warn!("Shutdown was not clean: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("API_KEY=a=b").unwrap(),
            ("API_KEY".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("NOVALUE").is_err());
        assert!(parse_key_value("=value").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "agent-launcher",
            "run",
            "--port",
            "8080",
            "-e",
            "MODE=dev",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                direct, port, env, ..
            } => {
                assert!(!direct);
                assert_eq!(port, 8080);
                assert_eq!(env, vec![("MODE".to_string(), "dev".to_string())]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parses_exec_trailing_args() {
        let cli = Cli::try_parse_from(["agent-launcher", "exec", "ls", "-la", "/app"]).unwrap();
        match cli.command {
            Commands::Exec { command } => assert_eq!(command, vec!["ls", "-la", "/app"]),
            _ => panic!("expected exec"),
        }
    }
}
