//! # Flowgate Configuration Validator
//!
//! Loads the layered node configuration for an environment and reports what
//! the node would refuse at startup, before it is deployed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flowgate_core::config::{ConfigManager, FlowgateConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, Level};

#[derive(Parser)]
#[command(name = "config-validator", version, about = "Validate flowgate node configuration files")]
struct Cli {
    /// Environment overlay to load (flowgate.{environment}.toml)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory (default: $FLOWGATE_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Repeat for more log output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Load, validate and summarize every section
    All,
    /// Summarize one section after validating the whole configuration
    Section {
        #[arg(value_enum)]
        section: Section,
    },
    /// Print the effective configuration as JSON
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[value(rename_all = "snake_case")]
enum Section {
    Node,
    Dispatch,
    Heartbeat,
    Expiration,
    Executor,
    FlowTask,
    TaskLog,
    Database,
}

const ALL_SECTIONS: [Section; 8] = [
    Section::Node,
    Section::Dispatch,
    Section::Heartbeat,
    Section::Expiration,
    Section::Executor,
    Section::FlowTask,
    Section::TaskLog,
    Section::Database,
];

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = [Level::WARN, Level::INFO, Level::DEBUG]
        .get(usize::from(cli.verbose))
        .copied()
        .unwrap_or(Level::TRACE);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let outcome = load(&cli).and_then(|config| match cli.command {
        None | Some(Command::All) => {
            ALL_SECTIONS.iter().for_each(|s| summarize(&config, *s));
            println!("\n🎉 {} is valid", cli.environment);
            Ok(())
        }
        Some(Command::Section { section }) => {
            summarize(&config, section);
            Ok(())
        }
        Some(Command::Show) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    });

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("configuration rejected: {e:#}");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load(cli: &Cli) -> Result<FlowgateConfig> {
    debug!(environment = %cli.environment, dir = ?cli.config_dir, "loading configuration");
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("environment '{}'", cli.environment))?;
    println!(
        "🔧 {} from {}",
        manager.environment(),
        manager.config_directory().display()
    );
    Ok(manager.config().clone())
}

fn summarize(config: &FlowgateConfig, section: Section) {
    let line = match section {
        Section::Node => format!(
            "node       {}:{} ({})",
            config.node.host, config.node.port, config.node.site_url
        ),
        Section::Dispatch => format!(
            "dispatch   timeout {}ms, connect {}ms",
            config.dispatch.timeout_ms, config.dispatch.connect_timeout_ms
        ),
        Section::Heartbeat => {
            let hb = &config.heartbeat;
            let mut line = format!(
                "heartbeat  enabled={} every {}s, stale after {}s, scan every {}s, IN <= {}",
                hb.enabled,
                hb.interval_secs,
                hb.timeout_secs,
                hb.effective_scan_interval().as_secs(),
                hb.max_in_clause_size
            );
            if hb.effective_scan_interval().as_secs() != hb.scan_interval_secs {
                line.push_str(" ⚠️ scan interval raised to 3x heartbeat");
            }
            line
        }
        Section::Expiration => format!(
            "expiration enabled={} scan every {}s",
            config.expiration.enabled,
            config.expiration.scan_interval().as_secs()
        ),
        Section::Executor => {
            let ex = &config.executor;
            format!(
                "executor   mock_data {}x{}, loader_dumper {}x{}, default {}x{}, {:?} when full",
                ex.mock_data.workers,
                ex.mock_data.queue_capacity,
                ex.loader_dumper.workers,
                ex.loader_dumper.queue_capacity,
                ex.default.workers,
                ex.default.queue_capacity,
                ex.rejection_policy
            )
        }
        Section::FlowTask => {
            let ft = &config.flow_task;
            format!(
                "flow_task  sql <= {}B, export <= {} objects, apply <= {} databases, expiry {}h",
                ft.sql_content_max_length,
                ft.max_export_objects,
                ft.max_apply_databases,
                ft.default_execution_expiration_hours
            )
        }
        Section::TaskLog => format!(
            "task_log   logs {}, data {}",
            config.task_log.log_root.display(),
            config.task_log.data_root.display()
        ),
        Section::Database => match &config.database.url {
            Some(_) => format!("database   url set, {} connections", config.database.max_connections),
            None => "database   url unset, in-memory store".to_string(),
        },
    };
    println!("  {line}");
}
