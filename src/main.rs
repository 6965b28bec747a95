use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use graphmirror::config::SyncConfig;
use graphmirror::credentials::ClientCredentialsProvider;
use graphmirror::gateway::GraphGateway;
use graphmirror::orchestrator::SyncOrchestrator;

/// Incremental one-way mirror of remote document-store drives to a local
/// filesystem. All configuration is read from the environment; see
/// `SyncConfig::from_env` for the full variable list.
#[derive(Parser, Debug)]
#[command(name = "graphmirror", version)]
struct Cli {
    /// Run reconciliation (archive + redownload checks) but never delete
    /// local originals, overriding PRUNE for this invocation.
    #[arg(long = "dry-run", default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match SyncConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    if cli.dry_run {
        config.prune = false;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: SyncConfig) -> Result<()> {
    let run_timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();

    if config.enable_logging {
        let log_path = graphmirror::logging::log_file_path(&config.local_root, &run_timestamp);
        graphmirror::logging::init(&log_path, true, config.log_level)?;
    }
    graphmirror::logging::info(format!(
        "starting sync run={run_timestamp} site={} drives={:?}",
        config.site_id, config.drives
    ));

    let credentials = Arc::new(ClientCredentialsProvider::new(
        &config.tenant_id,
        &config.client_id,
        &config.client_secret,
    ));
    let gateway = Arc::new(GraphGateway::new(config.graph_base_url.clone(), credentials));

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone());

    let mut orchestrator = SyncOrchestrator::new(config, gateway, run_timestamp, cancel.clone());
    orchestrator.select_drives().await?;

    let result = orchestrator.run().await;
    match result {
        Ok(()) => {
            graphmirror::logging::info("sync run completed");
            Ok(())
        }
        Err(graphmirror::gateway::GatewayError::Cancelled) => {
            graphmirror::logging::info(
                "sync run cancelled; the interrupted drive was already reconciled against what it observed",
            );
            Ok(())
        }
        Err(e) => {
            graphmirror::logging::error(format!("sync run failed: {e}"));
            Err(e.into())
        }
    }
}

/// Installs both SIGINT and SIGTERM handlers and trips `cancel` on whichever
/// fires first, matching the graceful-shutdown contract the rest of the
/// engine polls for at every suspension point.
fn install_signal_handlers(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    graphmirror::logging::error(format!("failed to install SIGTERM handler: {e}"));
                    let _ = ctrl_c.await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        graphmirror::logging::info("shutdown signal received; cancelling in-flight work");
        cancel.cancel();
    });
}
