//! fdk: diagnostics CLI over flagdeck-core.
//!
//! Thin wrapper exposing the bridge core for inspection from a terminal:
//! content identities, canonical forms, and an end-to-end demo session
//! against a scripted panel frame.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};

use flagdeck_core::bridge::{BridgeCollaborators, ToolbarBridge};
use flagdeck_core::config::{BridgeConfig, LogFormat};
use flagdeck_core::entity_hash::{canonical_string, content_identity};
use flagdeck_core::logging::init_logging;
use flagdeck_core::protocol::CommandKind;
use flagdeck_core::testkit::MockPanelFrame;

#[derive(Parser)]
#[command(name = "fdk", version, about = "Diagnostics for the flagdeck toolbar bridge")]
struct Cli {
    /// Path to a flagdeck.toml config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the content identity of a JSON record
    Identity {
        /// Path to a JSON file holding the record
        path: PathBuf,
    },
    /// Print the canonical serialization of a JSON record
    Canon {
        /// Path to a JSON file holding the record
        path: PathBuf,
    },
    /// Run an end-to-end session against a scripted panel frame
    Demo,
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load_from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log.format = format.into();
    }
    Ok(config)
}

fn read_record(path: &PathBuf) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {} as JSON", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.log).context("initializing logging")?;

    match &cli.command {
        Command::Identity { path } => {
            let record = read_record(path)?;
            println!("{}", content_identity(&record));
        }
        Command::Canon { path } => {
            let record = read_record(path)?;
            println!("{}", canonical_string(&record));
        }
        Command::Demo => run_demo(&config).await?,
    }
    Ok(())
}

/// Mount a scripted panel frame, authenticate, fetch each collection, and
/// log out again — exercising the full bridge stack.
async fn run_demo(config: &BridgeConfig) -> Result<()> {
    let bridge = Arc::new(ToolbarBridge::new(config, BridgeCollaborators::default()));

    let (frame, mut replies) = MockPanelFrame::new(config.trusted_origin.clone());
    frame.set_items(
        CommandKind::GetProjects,
        vec![json!({ "key": "demo-project", "name": "Demo Project" })],
    );
    frame.set_items(
        CommandKind::GetFlags,
        vec![
            json!({ "key": "new-checkout", "on": true }),
            json!({ "key": "dark-mode", "on": false }),
        ],
    );
    frame.set_items(
        CommandKind::GetContexts,
        vec![json!({ "key": "user" }), json!({ "key": "organization" })],
    );
    bridge.mount_frame(frame.clone());

    let pump = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.pump(&mut replies).await })
    };
    tracing::debug!(origin = %config.trusted_origin, "demo frame mounted");

    println!("session: {:?}", bridge.auth_state());
    frame.emit(json!({ "type": "api-ready" }));
    frame.emit(json!({ "type": "authenticated", "accountId": "acct-demo", "memberId": "mem-demo" }));

    let mut watcher = bridge.watch_auth();
    tokio::time::timeout(Duration::from_secs(5), watcher.wait_for(|state| state.authenticated))
        .await
        .context("timed out waiting for authentication")?
        .context("auth watcher closed")?;
    println!("session: {:?}", bridge.auth_state());

    let projects = bridge.projects().get_project_scoped("demo-project").await;
    println!("projects ({}):", projects.total_count);
    for project in &projects.items {
        println!("  - {}", project.key);
    }

    let flags = bridge.flags().get_project_scoped("demo-project").await;
    println!("flags ({}):", flags.total_count);
    for flag in &flags.items {
        println!("  - {}", flag.key);
    }

    let contexts = bridge.contexts().get_project_scoped("demo-project").await;
    println!("contexts ({}):", contexts.total_count);
    for context in &contexts.items {
        println!("  - {}", context.key);
    }

    bridge.logout().context("sending logout")?;
    let mut watcher = bridge.watch_auth();
    tokio::time::timeout(
        Duration::from_secs(5),
        watcher.wait_for(|state| !state.authenticated),
    )
    .await
    .context("timed out waiting for logout")?
    .context("auth watcher closed")?;
    println!("session: {:?}", bridge.auth_state());

    pump.abort();
    Ok(())
}
