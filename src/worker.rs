use std::sync::Arc;

use anyhow::{Error, Result};
use futures_util::StreamExt;
use lapin::message::Delivery;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    clients::rbmq::{BatchCommand, BatchQueueClient},
    engine::NotificationEngine,
};

/// Consumes batch commands until the queue closes or `shutdown` is cancelled.
pub async fn run_batch_consumer(
    engine: Arc<NotificationEngine>,
    queue: Arc<BatchQueueClient>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let mut consumer = queue.create_consumer().await?;

    info!("Batch worker started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Batch worker stopping");
                break;
            }
            next = consumer.next() => match next {
                Some(Ok(delivery)) => handle_delivery(&engine, &queue, delivery).await?,
                Some(Err(e)) => {
                    error!(error = %e, "Failed to receive batch command");
                }
                None => {
                    warn!("Batch queue consumer closed");
                    break;
                }
            },
        }
    }

    Ok(())
}

async fn handle_delivery(
    engine: &NotificationEngine,
    queue: &BatchQueueClient,
    delivery: Delivery,
) -> Result<(), Error> {
    let command: BatchCommand = match serde_json::from_slice(&delivery.data) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "Discarding malformed batch command");
            return queue.reject(delivery.delivery_tag, false).await;
        }
    };

    match engine.run_batch(command.batch_id).await {
        Ok(batch) => {
            info!(
                batch_id = %batch.id,
                status = %batch.status,
                "Batch command processed"
            );
            queue.acknowledge(delivery.delivery_tag).await
        }
        Err(e) => {
            error!(batch_id = %command.batch_id, error = %e, "Batch command failed");
            queue.reject(delivery.delivery_tag, false).await
        }
    }
}
