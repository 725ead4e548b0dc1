use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;

/// Queue payload asking a worker to run one stored batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCommand {
    pub batch_id: Uuid,
}

pub struct BatchQueueClient {
    // Dropping the connection closes every channel on it.
    _connection: Connection,
    channel: Channel,
    queue_name: String,
}

impl BatchQueueClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        channel
            .queue_declare(
                &config.batch_queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare batch queue: {}", e))?;

        info!(queue = %config.batch_queue_name, "RabbitMQ batch queue declared");

        Ok(Self {
            _connection: connection,
            channel,
            queue_name: config.batch_queue_name.clone(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.channel.status().connected()
    }

    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                "batch_worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue = %self.queue_name, "Batch consumer created");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))?;

        Ok(())
    }
}

/// Hands a stored batch to whichever worker picks it up.
#[async_trait]
pub trait BatchPublisher: Send + Sync {
    async fn publish_batch(&self, batch_id: Uuid) -> Result<(), Error>;
}

#[async_trait]
impl BatchPublisher for BatchQueueClient {
    async fn publish_batch(&self, batch_id: Uuid) -> Result<(), Error> {
        let payload = serde_json::to_vec(&BatchCommand { batch_id })?;

        self.channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish batch command: {}", e))?;

        debug!(batch_id = %batch_id, queue = %self.queue_name, "Batch command published");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_command_wire_format() {
        let batch_id = Uuid::new_v4();
        let json = serde_json::to_string(&BatchCommand { batch_id }).unwrap();

        assert_eq!(json, format!("{{\"batch_id\":\"{}\"}}", batch_id));
        assert_eq!(
            serde_json::from_str::<BatchCommand>(&json).unwrap().batch_id,
            batch_id
        );
    }
}
