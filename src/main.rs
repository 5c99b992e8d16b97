use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xvault_keeper::blockchain::{connect_chain, ChainRegistry};
use xvault_keeper::bridges::{RouteClass, RouteReconciler};
use xvault_keeper::config::KeeperConfig;
use xvault_keeper::mocks::{is_mock_mode, MockNetwork};
use xvault_keeper::preflight::run_preflight;
use xvault_keeper::storage::{open_repair_log, open_store};
use xvault_keeper::sync::{RoundSyncController, RunStatus};

fn cli() -> Command {
    Command::new("xvault-keeper")
        .version(env!("CARGO_PKG_VERSION"))
        .author("xVault Team <team@xvault.dev>")
        .about("🦀 Cross-chain round keeper for the xVault yield vault")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Config file path")
                .default_value("config/keeper.toml")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .default_value("info")
                .global(true),
        )
        .subcommand(
            Command::new("init")
                .about("Write a sample config file")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help("Overwrite an existing file")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("preflight").about("Verify endpoints serve the configured chains and contracts"))
        .subcommand(Command::new("status").about("Quorum snapshot of round, epoch and pause state per chain"))
        .subcommand(Command::new("sync").about("Run or resume a round synchronization"))
        .subcommand(
            Command::new("reconcile")
                .about("Verify bridge routes between every pair of chains and repair misconfigured ones")
                .arg(
                    Arg::new("check-only")
                        .long("check-only")
                        .help("Report route status without writing")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("runs").about("List persisted synchronization runs"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    let log_filter = match log_level {
        "trace" | "debug" | "info" | "warn" | "error" => log_level,
        _ => "info",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| "config/keeper.toml".to_string());

    if let Some(("init", sub)) = matches.subcommand() {
        return init_config(&config_path, sub).await;
    }

    info!("📋 loading config: {}", config_path);
    let config = KeeperConfig::load(&config_path).await?;
    info!("✅ config loaded ({} chains)", config.chains.len());

    match matches.subcommand() {
        Some(("preflight", _)) => preflight(&config).await,
        Some(("status", _)) => status(&config).await,
        Some(("sync", _)) => sync(&config).await,
        Some(("reconcile", sub)) => reconcile(&config, sub.get_flag("check-only")).await,
        Some(("runs", _)) => runs(&config).await,
        Some((other, _)) => Err(anyhow!("unknown command {}", other)),
        None => Err(anyhow!("no command given")),
    }
}

async fn init_config(path: &str, matches: &ArgMatches) -> Result<()> {
    if Path::new(path).exists() && !matches.get_flag("force") {
        return Err(anyhow!("{} already exists (use --force to overwrite)", path));
    }
    KeeperConfig::sample()
        .save(path)
        .await
        .with_context(|| format!("failed to write {}", path))?;
    info!("📝 sample config written to {}", path);
    Ok(())
}

/// Live chains, or in-memory chains behind the same topology when API_MODE=mock
fn build_registry(config: &KeeperConfig) -> Result<Arc<ChainRegistry>> {
    let descriptors = config.descriptors()?;

    if is_mock_mode() {
        warn!("🧪 API_MODE=mock - using in-memory chains");
        let network = MockNetwork::from_descriptors(descriptors);
        return Ok(Arc::new(network.try_registry()?));
    }

    let private_key = KeeperConfig::private_key();
    let handles = descriptors
        .into_iter()
        .map(|descriptor| connect_chain(descriptor, private_key.as_deref()))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to connect chains")?;
    Ok(Arc::new(ChainRegistry::new(handles)?))
}

async fn preflight(config: &KeeperConfig) -> Result<()> {
    let registry = build_registry(config)?;
    let reader = config.sync_policy()?.reader();

    let report = run_preflight(&registry, &reader).await;
    for check in &report.checks {
        println!("[{}] {:<20} {}", check.status, check.chain, check.message);
    }

    if !report.is_ready() {
        return Err(anyhow!("preflight failed: {} critical checks", report.failures().len()));
    }
    info!("✅ preflight passed ({})", report.overall());
    Ok(())
}

async fn status(config: &KeeperConfig) -> Result<()> {
    let registry = build_registry(config)?;
    let reader = config.sync_policy()?.reader();

    let mut rounds = Vec::new();
    println!("{:<20} {:<10} {:>8} {:>8} {:>8}", "chain", "role", "round", "epoch", "paused");
    for chain in registry.sync_order() {
        match reader.snapshot(chain).await {
            Ok(snapshot) => {
                println!(
                    "{:<20} {:<10} {:>8} {:>8} {:>8}",
                    chain.label(),
                    snapshot.role,
                    snapshot.round,
                    snapshot.epoch,
                    snapshot.paused
                );
                if !snapshot.is_paired() {
                    warn!("⚠️ {}: round {} not paired with epoch {}", chain.label(), snapshot.round, snapshot.epoch);
                }
                rounds.push(snapshot.round);
            }
            Err(e) => error!("❌ {}: {}", chain.label(), e),
        }
    }

    rounds.sort_unstable();
    rounds.dedup();
    if rounds.len() > 1 {
        warn!("⚠️ chains disagree on the current round: {:?}", rounds);
    }
    Ok(())
}

async fn sync(config: &KeeperConfig) -> Result<()> {
    let registry = build_registry(config)?;
    let policy = config.sync_policy()?;
    let store = open_store(&config.storage).await?;

    let controller = RoundSyncController::new(registry, &policy, store);
    match controller.run().await {
        Ok(state) => {
            info!(
                "🎉 run {} completed: every chain at round {}",
                state.run_id, state.target_round
            );
            Ok(())
        }
        Err(e) => {
            error!("❌ {}", e);
            Err(e.into())
        }
    }
}

async fn reconcile(config: &KeeperConfig, check_only: bool) -> Result<()> {
    let registry = build_registry(config)?;
    let policy = config.sync_policy()?;
    let repairs = open_repair_log(&config.storage).await?;
    let reconciler = RouteReconciler::new(
        registry,
        policy.reader(),
        policy.confirmation,
        config.route_exclusions(),
        repairs,
    );

    let report = if check_only {
        reconciler.inspect().await?
    } else {
        reconciler.reconcile().await?
    };

    for status in &report.statuses {
        println!("{}", status);
    }
    for (source, destination) in &report.repaired {
        info!("🔧 repaired {} -> {}", source, destination);
    }
    info!(
        "📊 {} configured, {} misconfigured, {} not configured, {} writes",
        report.count(RouteClass::Configured),
        report.count(RouteClass::Misconfigured),
        report.count(RouteClass::NotConfigured),
        report.writes
    );

    for (source, destination) in &report.pending {
        warn!("♻️ {} -> {} removed by an unfinished repair, rerun reconcile to re-add it", source, destination);
    }

    if !report.is_clean() {
        return Err(anyhow!(
            "{} misconfigured routes, {} awaiting re-add",
            report.count(RouteClass::Misconfigured),
            report.pending.len()
        ));
    }
    Ok(())
}

async fn runs(config: &KeeperConfig) -> Result<()> {
    let store = open_store(&config.storage).await?;
    let runs = store.list().await?;
    if runs.is_empty() {
        println!("no runs recorded");
        return Ok(());
    }

    for run in runs {
        let status = match &run.status {
            RunStatus::Running => "running".to_string(),
            RunStatus::Completed => "completed".to_string(),
            RunStatus::Halted(reason) => format!("halted: {}", reason),
        };
        println!(
            "{}  {}  target round {:<6} step {:<22} {}",
            run.run_id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.target_round,
            run.step.to_string(),
            status
        );
    }
    Ok(())
}
