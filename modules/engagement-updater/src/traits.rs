//! Seams between the update machinery and the outside world.

use async_trait::async_trait;
use mo_client::{Association, Engagement, EngagementPage};
use updater_common::{DispatchError, EntityReference, RoutingKey, UpstreamError};
use updater_events::{BusError, NotificationStream};
use uuid::Uuid;

use crate::planner::PlannedUpdate;

/// Read side of MO.
#[async_trait]
pub trait QueryApi: Send + Sync {
    async fn engagement(&self, uuid: Uuid) -> Result<Option<Engagement>, UpstreamError>;

    async fn engagement_page(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<EngagementPage, UpstreamError>;

    async fn associations(&self, person: Uuid) -> Result<Vec<Association>, UpstreamError>;

    async fn class_uuid(&self, user_key: &str) -> Result<Option<Uuid>, UpstreamError>;

    /// Minimal read. `Ok(false)` when the answer is well-formed but unusable.
    async fn healthcheck(&self) -> Result<bool, UpstreamError>;

    async fn close(&self);
}

/// Write side of MO.
#[async_trait]
pub trait CommandApi: Send + Sync {
    async fn apply(&self, update: &PlannedUpdate) -> Result<(), UpstreamError>;

    /// Minimal read. `Ok(false)` when the answer is well-formed but unusable.
    async fn healthcheck(&self) -> Result<bool, UpstreamError>;

    async fn close(&self);
}

/// Connection to the notification bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn subscribe(&self, binding: RoutingKey) -> Result<NotificationStream, BusError>;

    fn healthcheck(&self) -> bool;

    async fn close(&self);
}

/// Derives the update an engagement needs.
///
/// Returns `None` when current state already matches the desired state.
/// Implementations only read; writing is the dispatcher's job.
#[async_trait]
pub trait UpdatePlanner: Send + Sync {
    async fn plan(&self, reference: &EntityReference)
        -> Result<Option<PlannedUpdate>, DispatchError>;
}
