//! Process-wide client lifetime.
//!
//! Clients are acquired in a fixed order (query, command, event bus) and
//! released in the reverse order, whether the scope body succeeds, fails, or
//! acquisition itself stops partway.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;
use updater_common::{Api, Settings};

use crate::traits::{CommandApi, EventBus, QueryApi};

/// Builds the three upstream clients.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn query_api(&self, settings: &Settings) -> anyhow::Result<Arc<dyn QueryApi>>;

    async fn command_api(&self, settings: &Settings) -> anyhow::Result<Arc<dyn CommandApi>>;

    async fn event_bus(&self, settings: &Settings) -> anyhow::Result<Arc<dyn EventBus>>;
}

/// Everything a trigger path needs, valid for the life of the process.
pub struct ProcessContext {
    pub settings: Arc<Settings>,
    pub query: Arc<dyn QueryApi>,
    pub command: Arc<dyn CommandApi>,
    pub bus: Arc<dyn EventBus>,
}

enum Held {
    Query(Arc<dyn QueryApi>),
    Command(Arc<dyn CommandApi>),
    Bus(Arc<dyn EventBus>),
}

impl Held {
    fn api(&self) -> Api {
        match self {
            Held::Query(_) => Api::Query,
            Held::Command(_) => Api::Command,
            Held::Bus(_) => Api::EventBus,
        }
    }

    async fn release(self) {
        match self {
            Held::Query(client) => client.close().await,
            Held::Command(client) => client.close().await,
            Held::Bus(bus) => bus.close().await,
        }
    }
}

/// Acquire the clients, run `body` with them, and release them afterwards.
pub async fn with_context<F, Fut, T>(
    settings: Settings,
    factory: &dyn ClientFactory,
    body: F,
) -> anyhow::Result<T>
where
    F: FnOnce(Arc<ProcessContext>) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let settings = Arc::new(settings);
    let mut held = Vec::with_capacity(3);

    let result = async {
        let query = factory
            .query_api(&settings)
            .await
            .context("failed to set up the query API client")?;
        held.push(Held::Query(query.clone()));

        let command = factory
            .command_api(&settings)
            .await
            .context("failed to set up the command API client")?;
        held.push(Held::Command(command.clone()));

        let bus = factory
            .event_bus(&settings)
            .await
            .context("failed to connect to the event bus")?;
        held.push(Held::Bus(bus.clone()));

        info!("Clients ready");
        body(Arc::new(ProcessContext {
            settings: settings.clone(),
            query,
            command,
            bus,
        }))
        .await
    }
    .await;

    while let Some(resource) = held.pop() {
        info!(api = %resource.api(), "Releasing client");
        resource.release().await;
    }
    result
}

/// Resolves once shutdown has been signalled, or the signalling side is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
