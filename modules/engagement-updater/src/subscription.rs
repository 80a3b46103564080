//! Event-bus trigger path.
//!
//! Each notification is decoded into an entity reference and dispatched.
//! Success acknowledges the delivery. Any failure waits out the retry delay
//! and hands the delivery back to the broker for redelivery, so a notification
//! is retried until it succeeds and is never dropped on the floor.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use updater_common::{EntityReference, NotificationPayload, RoutingKey};
use updater_events::{Notification, NotificationStream};

use crate::dispatch::Dispatcher;
use crate::lifecycle::shutdown_requested;

/// How a notification was settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acknowledged,
    /// Handed back for redelivery after a failure.
    Requeued,
    /// Outside the binding; dropped without redelivery.
    Discarded,
    /// The broker could not be told; it redelivers once the channel closes.
    Unsettled,
}

pub struct SubscriptionHandler {
    dispatcher: Dispatcher,
    binding: RoutingKey,
    retry_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SubscriptionHandler {
    pub fn new(
        dispatcher: Dispatcher,
        binding: RoutingKey,
        retry_delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            dispatcher,
            binding,
            retry_delay,
            shutdown,
        }
    }

    pub fn binding(&self) -> RoutingKey {
        self.binding
    }

    /// Process and settle one delivery.
    pub async fn handle(&self, notification: Notification) -> Settlement {
        match notification.routing_key() {
            Ok(key) if self.binding.matches(&key) => {}
            Ok(_) | Err(_) => {
                warn!(
                    routing_key = notification.raw_routing_key(),
                    binding = %self.binding,
                    "Notification outside binding, discarding"
                );
                return match notification.reject(false).await {
                    Ok(()) => Settlement::Discarded,
                    Err(e) => {
                        error!(error = %e, "Failed to discard notification");
                        Settlement::Unsettled
                    }
                };
            }
        }

        let failure = match NotificationPayload::from_slice(notification.body()) {
            Ok(payload) => {
                let reference = EntityReference::from(payload);
                match self.dispatcher.dispatch(&reference).await {
                    Ok(outcome) => {
                        debug!(engagement = %reference.engagement(), ?outcome, "Notification handled");
                        return match notification.ack().await {
                            Ok(()) => Settlement::Acknowledged,
                            Err(e) => {
                                error!(error = %e, "Failed to acknowledge notification");
                                Settlement::Unsettled
                            }
                        };
                    }
                    Err(e) => e.to_string(),
                }
            }
            Err(e) => format!("undecodable payload: {e}"),
        };

        warn!(
            routing_key = notification.raw_routing_key(),
            redelivered = notification.redelivered(),
            retry_delay_secs = self.retry_delay.as_secs_f64(),
            error = %failure,
            "Notification failed, requeueing after delay"
        );
        self.back_off().await;

        match notification.reject(true).await {
            Ok(()) => Settlement::Requeued,
            Err(e) => {
                error!(error = %e, "Failed to requeue notification");
                Settlement::Unsettled
            }
        }
    }

    /// Sleep for the retry delay, cut short by shutdown.
    async fn back_off(&self) {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.retry_delay) => {}
            _ = shutdown_requested(&mut shutdown) => {}
        }
    }

    /// Pull deliveries and handle up to `limit` of them at once.
    ///
    /// Returns when the stream ends or shutdown is signalled. In-flight
    /// handlers get `grace` to finish; the rest are aborted and their
    /// deliveries return to the queue when the channel closes.
    pub async fn consume(self: Arc<Self>, mut stream: NotificationStream, limit: usize, grace: Duration) {
        let limit = limit.max(1);
        let mut shutdown = self.shutdown.clone();
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.len() >= limit {
                reap(in_flight.join_next().await);
            }

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Shutdown requested, no longer accepting notifications");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(notification)) => {
                        let handler = self.clone();
                        in_flight.spawn(async move { handler.handle(notification).await });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Notification stream failed");
                        break;
                    }
                    None => {
                        info!("Notification stream ended");
                        break;
                    }
                },
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => reap(Some(done)),
            }
        }

        drop(stream);
        let pending = in_flight.len();
        if pending == 0 {
            return;
        }

        info!(pending, "Draining in-flight notifications");
        let drained = tokio::time::timeout(grace, async {
            while let Some(done) = in_flight.join_next().await {
                reap(Some(done));
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                "Drain timed out, aborting in-flight notifications"
            );
            in_flight.abort_all();
            while let Some(done) = in_flight.join_next().await {
                reap(Some(done));
            }
        }
    }
}

fn reap(done: Option<Result<Settlement, tokio::task::JoinError>>) {
    if let Some(Err(e)) = done {
        if e.is_panic() {
            error!(error = %e, "Notification handler panicked");
        }
    }
}
