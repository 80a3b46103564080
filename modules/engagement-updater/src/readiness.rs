//! Aggregated readiness of the three upstream dependencies.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tracing::warn;
use updater_common::Api;

use crate::traits::{CommandApi, EventBus, QueryApi};

/// One dependency's health check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn api(&self) -> Api;

    async fn check(&self) -> anyhow::Result<bool>;
}

/// Per-dependency health, keyed by dependency name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    checks: BTreeMap<&'static str, bool>,
}

impl HealthReport {
    pub fn is_ready(&self) -> bool {
        self.checks.values().all(|healthy| *healthy)
    }

    pub fn get(&self, api: Api) -> Option<bool> {
        self.checks.get(api.as_str()).copied()
    }

    pub fn unhealthy(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(name, _)| *name)
            .collect()
    }
}

pub struct ReadinessAggregator {
    probes: Vec<Arc<dyn HealthProbe>>,
}

impl ReadinessAggregator {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>) -> Self {
        Self { probes }
    }

    /// Probes for the event bus, query API and command API.
    pub fn for_dependencies(
        bus: Arc<dyn EventBus>,
        query: Arc<dyn QueryApi>,
        command: Arc<dyn CommandApi>,
    ) -> Self {
        Self::new(vec![
            Arc::new(EventBusProbe(bus)),
            Arc::new(QueryProbe(query)),
            Arc::new(CommandProbe(command)),
        ])
    }

    /// Run every probe concurrently. A probe that errors or panics reports
    /// unhealthy without affecting the others.
    pub async fn check(&self) -> HealthReport {
        let results = join_all(self.probes.iter().map(|probe| async move {
            let api = probe.api();
            let healthy = match AssertUnwindSafe(probe.check()).catch_unwind().await {
                Ok(Ok(healthy)) => healthy,
                Ok(Err(e)) => {
                    warn!(api = %api, error = %e, "Health check failed");
                    false
                }
                Err(_) => {
                    warn!(api = %api, "Health check panicked");
                    false
                }
            };
            (api.as_str(), healthy)
        }))
        .await;

        HealthReport {
            checks: results.into_iter().collect(),
        }
    }
}

struct EventBusProbe(Arc<dyn EventBus>);

#[async_trait]
impl HealthProbe for EventBusProbe {
    fn api(&self) -> Api {
        Api::EventBus
    }

    async fn check(&self) -> anyhow::Result<bool> {
        Ok(self.0.healthcheck())
    }
}

struct QueryProbe(Arc<dyn QueryApi>);

#[async_trait]
impl HealthProbe for QueryProbe {
    fn api(&self) -> Api {
        Api::Query
    }

    async fn check(&self) -> anyhow::Result<bool> {
        Ok(self.0.healthcheck().await?)
    }
}

struct CommandProbe(Arc<dyn CommandApi>);

#[async_trait]
impl HealthProbe for CommandProbe {
    fn api(&self) -> Api {
        Api::Command
    }

    async fn check(&self) -> anyhow::Result<bool> {
        Ok(self.0.healthcheck().await?)
    }
}
