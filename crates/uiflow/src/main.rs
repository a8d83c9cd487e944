use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uiflow_common::config::UiflowConfig;
use uiflow_common::model::OverallStatus;
use uiflow_engine::bridge::HttpBridge;
use uiflow_engine::config::ConfigLoader;
use uiflow_engine::fixture;
use uiflow_engine::otp::OneTimeCodes;
use uiflow_engine::reaper::OrphanReaper;
use uiflow_engine::session::SessionManager;
use uiflow_engine::workflow::WorkflowExecutor;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "uiflow", version, about = "Run generated UI test cases against a browser bridge")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: ./uiflow.yaml, then ~/.uiflow/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bridge base URL, overrides the config file
    #[arg(long, env = "MCP_BRIDGE_URL", global = true)]
    bridge_url: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a test case file (YAML or JSON)
    Run {
        #[arg(long)]
        case: PathBuf,

        /// Write the result JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use this run id instead of a random one
        #[arg(long)]
        run_id: Option<Uuid>,
    },
    /// Open a session, print its tool catalog and release it
    Check,
    /// Kill orphaned browser and bridge processes once
    Sweep,
    /// Print the current one-time code
    Otp {
        /// Base32 secret (default: the configured environment variable)
        #[arg(long)]
        secret: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // stdout carries results; logs go to stderr.
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref(), args.verbose))
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// `RUST_LOG` wins when it parses; otherwise `--verbose` picks the level.
fn log_filter(rust_log: Option<&str>, verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback))
}

/// Returns whether the command succeeded.
async fn run(args: Args) -> anyhow::Result<bool> {
    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };
    if let Some(url) = args.bridge_url {
        config.bridge.url = url;
    }

    match args.command {
        Command::Run {
            case,
            output,
            run_id,
        } => run_case(&config, case, output, run_id).await,
        Command::Check => check(&config).await,
        Command::Sweep => sweep(&config).await,
        Command::Otp { secret } => {
            let code = OneTimeCodes::new(&config.otp).fresh_code(secret.as_deref(), "")?;
            println!("{}", code);
            Ok(true)
        }
    }
}

async fn run_case(
    config: &UiflowConfig,
    case_path: PathBuf,
    output: Option<PathBuf>,
    run_id: Option<Uuid>,
) -> anyhow::Result<bool> {
    let case = fixture::load_test_case(&case_path)
        .await
        .with_context(|| format!("loading {}", case_path.display()))?;
    info!(case = %case.id, steps = case.steps.len(), bridge = %config.bridge.url, "running test case");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current step");
            on_signal.cancel();
        }
    });

    let reaper_stop = CancellationToken::new();
    let reaper = OrphanReaper::new(&config.session)?.spawn(
        Duration::from_secs(config.session.sweep_interval_secs.max(1)),
        reaper_stop.clone(),
    );

    let manager = SessionManager::new(config.session.clone());
    let bridge = HttpBridge::new(config.bridge.clone());
    let outcome = manager
        .scoped(bridge, |bridge, handle| async move {
            info!(session = %handle.id, "session ready");
            let mut executor =
                WorkflowExecutor::new(&*bridge, config, OneTimeCodes::new(&config.otp))?
                    .with_cancellation(cancel);
            if let Some(id) = run_id {
                executor = executor.with_run_id(id);
            }
            anyhow::Ok(executor.run(&case.id, &case.steps).await)
        })
        .await;

    reaper_stop.cancel();
    let _ = reaper.await;
    let result = outcome??;

    let json = serde_json::to_string_pretty(&result)?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "result written");
        }
        None => println!("{}", json),
    }
    info!("{}", result.summary());
    Ok(result.overall_status == OverallStatus::Passed)
}

async fn check(config: &UiflowConfig) -> anyhow::Result<bool> {
    let manager = SessionManager::new(config.session.clone());
    let handle = manager
        .scoped(HttpBridge::new(config.bridge.clone()), |_, handle| async move { handle })
        .await?;
    println!("{}", serde_json::to_string_pretty(&handle)?);
    Ok(true)
}

async fn sweep(config: &UiflowConfig) -> anyhow::Result<bool> {
    let reaper = OrphanReaper::new(&config.session)?;
    let report = reaper.sweep().await;
    for p in &report.found {
        println!("{}\t{}s\t{}", p.pid, p.age.as_secs(), p.cmdline);
    }
    info!(
        found = report.found.len(),
        terminated = report.terminated.len(),
        killed = report.killed.len(),
        "sweep finished"
    );
    if report.terminated.len() < report.found.len() {
        bail!("some orphaned processes could not be signalled");
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_overrides_verbosity() {
        let filter = log_filter(Some("uiflow_engine=trace"), false).to_string();
        assert!(filter.contains("uiflow_engine=trace"), "{}", filter);
        assert!(!filter.contains("info"));
    }

    #[test]
    fn test_verbosity_applies_without_rust_log() {
        assert_eq!(log_filter(None, true).to_string(), "debug");
        assert_eq!(log_filter(None, false).to_string(), "info");
    }
}
