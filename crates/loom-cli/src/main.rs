//! Loom CLI - chat-driven project scaffolding
//!
//! Usage:
//!   loom init [path]            Write a default .loom/config.toml
//!   loom serve                  Run the chat server
//!   loom extract <file>         Print the actions of a saved model response
//!   loom run <file>             Execute a saved model response in the sandbox

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loom_actions::{extract_artifact, find_artifact, ActionExecutor, LocalSandbox, Sandbox};
use loom_core::LoomConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "loom")]
#[command(author, version, about = "Turn model output into files, commands and a live preview")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Project path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run the chat server
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Project root holding .loom/ and the sandbox directory
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Explicit configuration file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Print the actions found in a saved model response as JSON
    Extract {
        /// File holding the assistant message
        file: PathBuf,
    },

    /// Execute the actions of a saved model response
    Run {
        /// File holding the assistant message
        file: PathBuf,

        /// Project root holding .loom/ and the sandbox directory
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose when set
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Serve {
            host,
            port,
            root,
            config,
        } => cmd_serve(host, port, root, config).await,
        Commands::Extract { file } => cmd_extract(file).await,
        Commands::Run { file, root } => cmd_run(file, root).await,
    }
}

fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing Loom in {:?}", path);

    let config_path = LoomConfig::write_default(&path).context("Failed to write config")?;

    println!("Initialized Loom in {:?}", path);
    println!("Created:");
    println!("  {}", config_path.display());
    Ok(())
}

async fn cmd_serve(
    host: Option<String>,
    port: Option<u16>,
    root: PathBuf,
    config: Option<PathBuf>,
) -> Result<()> {
    let mut config = match config {
        Some(path) => LoomConfig::load(&path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => load_config(&root)?,
    }
    .with_env_overrides();

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    loom_server::run(config, &root).await
}

async fn cmd_extract(file: PathBuf) -> Result<()> {
    let text = read_response(&file).await?;
    let artifact = extract_artifact(&text);

    if artifact.is_empty() {
        warn!("No actions found in {:?}", file);
    }
    println!("{}", serde_json::to_string_pretty(&artifact)?);
    Ok(())
}

async fn cmd_run(file: PathBuf, root: PathBuf) -> Result<()> {
    let text = read_response(&file).await?;
    let Some(artifact) = find_artifact(&text) else {
        println!("No artifact found in {:?}", file);
        return Ok(());
    };

    for skipped in &artifact.skipped {
        println!("Skipped action {}: {}", skipped.index, skipped.reason);
    }

    let config = load_config(&root)?;
    config.validate()?;
    let sandbox = LocalSandbox::from_config(&config.sandbox, &root);
    let executor = ActionExecutor::from_config(&config.sandbox)?;

    println!(
        "Running {} actions in {}",
        artifact.actions.len(),
        sandbox.root().display()
    );
    let report = executor.run(&artifact, &sandbox).await;

    for error in &report.errors {
        println!("  error: {}", error);
    }
    println!("{}", report.summary());

    match report.preview {
        Some(preview) => {
            println!("Preview: {}", preview.url);
            println!("Press Ctrl+C to stop the development server");
            tokio::signal::ctrl_c().await?;
            sandbox.halt();
        }
        None => println!("Development server did not report a preview URL"),
    }
    Ok(())
}

fn load_config(root: &Path) -> Result<LoomConfig> {
    LoomConfig::load_or_default(root)
        .with_context(|| format!("Failed to load config from {:?}", root))
}

async fn read_response(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))
}
