//! AMQP connection and subscription management.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use lapin::options::{
    BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{info, warn};
use updater_common::{AmqpSettings, RoutingKey};

use crate::delivery::{DeliveryAcker, Notification};
use crate::error::{BusError, Result};

pub type NotificationStream = Pin<Box<dyn Stream<Item = Result<Notification>> + Send>>;

/// A live connection to the MO topic exchange.
pub struct AmqpSystem {
    connection: Connection,
    channel: Channel,
    settings: AmqpSettings,
}

impl AmqpSystem {
    /// Open the connection and channel, apply prefetch, and declare the exchange.
    pub async fn connect(settings: &AmqpSettings) -> Result<Self> {
        let connection = Connection::connect(
            settings.url.expose(),
            ConnectionProperties::default().with_connection_name(settings.queue_prefix.clone().into()),
        )
        .await
        .map_err(|e| BusError::Connection(e.to_string()))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(200, "channel setup failed").await;
                return Err(BusError::Connection(format!("channel creation failed: {e}")));
            }
        };

        let system = Self {
            connection,
            channel,
            settings: settings.clone(),
        };
        if let Err(e) = system.declare().await {
            system.close().await;
            return Err(e);
        }

        info!(exchange = %settings.exchange, "Connected to AMQP broker");
        Ok(system)
    }

    async fn declare(&self) -> Result<()> {
        self.channel
            .basic_qos(self.settings.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Topology(format!("failed to set QoS: {e}")))?;

        self.channel
            .exchange_declare(
                &self.settings.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("failed to declare exchange: {e}")))?;
        Ok(())
    }

    /// Durable queue name for a binding.
    pub fn queue_name(&self, binding: &RoutingKey) -> String {
        queue_name(&self.settings.queue_prefix, binding)
    }

    /// Bind a durable queue to `binding` and start consuming from it.
    pub async fn subscribe(&self, binding: RoutingKey) -> Result<NotificationStream> {
        let queue = self.queue_name(&binding);
        let pattern = binding.to_string();

        self.channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("failed to declare {queue}: {e}")))?;

        self.channel
            .queue_bind(
                &queue,
                &self.settings.exchange,
                &pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("failed to bind {queue} to {pattern}: {e}")))?;

        let consumer = self
            .channel
            .basic_consume(
                &queue,
                &format!("{}_consumer", self.settings.queue_prefix),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Consume(e.to_string()))?;

        info!(queue = %queue, binding = %pattern, "Subscribed to notifications");

        let stream = consumer.map(|delivery| {
            let delivery = delivery.map_err(|e| BusError::Consume(e.to_string()))?;
            let acker: Arc<dyn DeliveryAcker> = Arc::new(delivery.acker);
            Ok(Notification::new(
                delivery.routing_key.as_str(),
                delivery.data,
                delivery.redelivered,
                acker,
            ))
        });
        Ok(Box::pin(stream))
    }

    /// Both the connection and the channel are open.
    pub fn healthcheck(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Close channel, then connection. Unacknowledged deliveries return to the queue.
    pub async fn close(&self) {
        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(200, "Bye").await {
                warn!(error = %e, "Failed to close AMQP channel");
            }
        }
        if self.connection.status().connected() {
            if let Err(e) = self.connection.close(200, "Bye").await {
                warn!(error = %e, "Failed to close AMQP connection");
            }
        }
    }
}

fn queue_name(prefix: &str, binding: &RoutingKey) -> String {
    format!("{prefix}_{binding}")
}
