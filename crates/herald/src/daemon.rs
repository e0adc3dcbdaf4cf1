//! Long-running mode: sweep, recover stuck claims and check tokens on timers
//! until Ctrl-C, then drain the workers.

use herald_scheduler::Pipeline;
use herald_store::ContentStatus;
use miette::{IntoDiagnostic, Result};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

pub async fn run(pipeline: Pipeline) -> Result<()> {
    let recovered = pipeline.recover_interrupted().into_diagnostic()?;
    if recovered > 0 {
        warn!(recovered, "returned stuck schedules to pending");
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let statuses = tokio::spawn(log_status_events(pipeline.subscribe()));

    pipeline.run(shutdown_rx).await;
    pipeline.shutdown().await;

    // Ends once the last status sender is gone
    let _ = statuses.await;

    info!("herald daemon stopped");
    Ok(())
}

/// Stand-in subscriber for the notification collaborator.
async fn log_status_events(mut rx: broadcast::Receiver<herald_scheduler::StatusEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event.status {
                ContentStatus::Published => info!(
                    item_id = event.item_id,
                    owner_id = event.owner_id,
                    "{}",
                    event.message
                ),
                _ => warn!(
                    item_id = event.item_id,
                    owner_id = event.owner_id,
                    status = %event.status,
                    "{}",
                    event.message
                ),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "status subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
