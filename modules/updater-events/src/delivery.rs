use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use updater_common::{RoutingKey, RoutingKeyError};

use crate::error::{BusError, Result};

/// Settles one delivery with the broker.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    /// Remove the message from the queue.
    async fn ack(&self) -> Result<()>;

    /// Hand the message back. With `requeue` the broker delivers it again.
    async fn reject(&self, requeue: bool) -> Result<()>;
}

#[async_trait]
impl DeliveryAcker for Acker {
    async fn ack(&self) -> Result<()> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| BusError::Acknowledge(e.to_string()))
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        Acker::nack(
            self,
            BasicNackOptions {
                requeue,
                ..Default::default()
            },
        )
        .await
        .map(|_| ())
        .map_err(|e| BusError::Acknowledge(e.to_string()))
    }
}

/// One message received from the bus, not yet settled.
pub struct Notification {
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
    acker: Arc<dyn DeliveryAcker>,
}

impl Notification {
    pub fn new(
        routing_key: impl Into<String>,
        body: Vec<u8>,
        redelivered: bool,
        acker: Arc<dyn DeliveryAcker>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            body,
            redelivered,
            acker,
        }
    }

    pub fn raw_routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn routing_key(&self) -> std::result::Result<RoutingKey, RoutingKeyError> {
        self.routing_key.parse()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether the broker has delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn reject(&self, requeue: bool) -> Result<()> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("routing_key", &self.routing_key)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
