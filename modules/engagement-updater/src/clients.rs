//! Production implementations of the upstream seams.

use std::sync::Arc;

use async_trait::async_trait;
use mo_client::{
    Association, Engagement, EngagementPage, GraphQlClient, ServiceApiClient, TokenProvider,
};
use updater_common::{RoutingKey, Settings, UpstreamError};
use updater_events::{AmqpSystem, BusError, NotificationStream};
use uuid::Uuid;

use crate::lifecycle::ClientFactory;
use crate::planner::PlannedUpdate;
use crate::traits::{CommandApi, EventBus, QueryApi};

#[async_trait]
impl QueryApi for GraphQlClient {
    async fn engagement(&self, uuid: Uuid) -> Result<Option<Engagement>, UpstreamError> {
        GraphQlClient::engagement(self, uuid)
            .await
            .map_err(UpstreamError::query)
    }

    async fn engagement_page(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<EngagementPage, UpstreamError> {
        GraphQlClient::engagement_page(self, limit, offset)
            .await
            .map_err(UpstreamError::query)
    }

    async fn associations(&self, person: Uuid) -> Result<Vec<Association>, UpstreamError> {
        GraphQlClient::associations(self, person)
            .await
            .map_err(UpstreamError::query)
    }

    async fn class_uuid(&self, user_key: &str) -> Result<Option<Uuid>, UpstreamError> {
        GraphQlClient::class_uuid(self, user_key)
            .await
            .map_err(UpstreamError::query)
    }

    async fn healthcheck(&self) -> Result<bool, UpstreamError> {
        self.org_uuid()
            .await
            .map(|_| true)
            .map_err(UpstreamError::query)
    }

    async fn close(&self) {
        GraphQlClient::close(self).await
    }
}

#[async_trait]
impl CommandApi for ServiceApiClient {
    async fn apply(&self, update: &PlannedUpdate) -> Result<(), UpstreamError> {
        let result = match update {
            PlannedUpdate::CreateAssociation(create) => self.create_association(create).await,
            PlannedUpdate::MoveAssociation(edit) => self.edit_association(edit).await,
        };
        result.map_err(UpstreamError::command)
    }

    /// MO serves exactly one organisation.
    async fn healthcheck(&self) -> Result<bool, UpstreamError> {
        self.organisations()
            .await
            .map(|orgs| orgs.len() == 1)
            .map_err(UpstreamError::command)
    }

    async fn close(&self) {
        ServiceApiClient::close(self).await
    }
}

#[async_trait]
impl EventBus for AmqpSystem {
    async fn subscribe(&self, binding: RoutingKey) -> Result<NotificationStream, BusError> {
        AmqpSystem::subscribe(self, binding).await
    }

    fn healthcheck(&self) -> bool {
        AmqpSystem::healthcheck(self)
    }

    async fn close(&self) {
        AmqpSystem::close(self).await
    }
}

/// Builds MO clients sharing one token provider, and the AMQP connection.
pub struct MoClientFactory {
    auth: Arc<TokenProvider>,
}

impl MoClientFactory {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.service_api_timeout)
            .build()?;
        Ok(Self {
            auth: Arc::new(TokenProvider::new(client, settings)),
        })
    }
}

#[async_trait]
impl ClientFactory for MoClientFactory {
    async fn query_api(&self, settings: &Settings) -> anyhow::Result<Arc<dyn QueryApi>> {
        Ok(Arc::new(GraphQlClient::new(settings, self.auth.clone())?))
    }

    async fn command_api(&self, settings: &Settings) -> anyhow::Result<Arc<dyn CommandApi>> {
        Ok(Arc::new(ServiceApiClient::new(settings, self.auth.clone())?))
    }

    async fn event_bus(&self, settings: &Settings) -> anyhow::Result<Arc<dyn EventBus>> {
        Ok(Arc::new(AmqpSystem::connect(&settings.amqp).await?))
    }
}
