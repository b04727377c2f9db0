use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use speaker_core::{MemorySpeaker, RouteSpeaker, SpeakerController, SpeakerMetrics};
use speaker_gobgp::GobgpSpeaker;
use speaker_kube::SpeakerClient;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod args;
mod server;

use args::{Args, LogFormat};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);
    args.validate()?;

    let config = args.speaker_config()?;
    info!(mode = %config.mode, node = %config.node_name, "Starting bgp-speaker...");

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    let metrics = SpeakerMetrics::new()?;
    let metrics_server = tokio::spawn(server::serve(
        args.metrics_addr,
        metrics.clone(),
        token.clone(),
    ));

    let speaker: Arc<dyn RouteSpeaker> = if args.dry_run {
        warn!("Dry run: routes are kept in memory and never reach a BGP peer");
        Arc::new(MemorySpeaker::new())
    } else {
        let gobgp = GobgpSpeaker::new(args.gobgp_cli(), args.bgp_config());
        gobgp.configure().await?;
        Arc::new(gobgp)
    };

    let client = SpeakerClient::new().await?;
    let watches = client.start_watches(&config, &token);
    let controller = SpeakerController::new(config, watches.caches, speaker, metrics)?;

    let result = controller.run(watches.eip_events, token.clone()).await;
    token.cancel();

    for task in watches.tasks {
        if let Err(e) = task.await {
            warn!("Watch task failed: {}", e);
        }
    }
    match metrics_server.await {
        Ok(Err(e)) => warn!("Metrics server failed: {}", e),
        Err(e) => warn!("Metrics server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    result?;
    info!("bgp-speaker stopped");
    Ok(())
}
