//! Derives the association an engagement should have.
//!
//! Every engagement is backed by one association of the configured type,
//! placed in the engagement's org unit. The association's uuid is derived
//! from the engagement, so repeated or racing creates address the same MO
//! object and two engagements of one person never compete for one
//! association. The planner compares that with what MO currently has and
//! proposes the smallest write that closes the gap, or nothing.

use std::sync::Arc;

use async_trait::async_trait;
use mo_client::{AssociationCreate, AssociationEdit};
use tokio::sync::OnceCell;
use tracing::debug;
use updater_common::{DispatchError, EntityReference, UpstreamError};
use uuid::Uuid;

use crate::traits::{QueryApi, UpdatePlanner};

/// A single write against the command API.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedUpdate {
    CreateAssociation(AssociationCreate),
    MoveAssociation(AssociationEdit),
}

pub struct AssociationPlanner {
    query: Arc<dyn QueryApi>,
    association_type: String,
    association_type_uuid: OnceCell<Uuid>,
}

impl AssociationPlanner {
    /// `association_type` is the user key of the association class to maintain.
    pub fn new(query: Arc<dyn QueryApi>, association_type: impl Into<String>) -> Self {
        Self {
            query,
            association_type: association_type.into(),
            association_type_uuid: OnceCell::new(),
        }
    }

    /// Resolved once; a failed lookup is retried on the next call.
    async fn association_type_uuid(&self) -> Result<Uuid, DispatchError> {
        let uuid = self
            .association_type_uuid
            .get_or_try_init(|| async {
                self.query
                    .class_uuid(&self.association_type)
                    .await?
                    .ok_or_else(|| {
                        UpstreamError::query(format!(
                            "association type {:?} does not exist",
                            self.association_type
                        ))
                    })
            })
            .await?;
        Ok(*uuid)
    }
}

/// Stable uuid of the association backing `engagement`.
pub fn association_uuid(association_type: Uuid, engagement: Uuid) -> Uuid {
    Uuid::new_v5(&association_type, engagement.as_bytes())
}

#[async_trait]
impl UpdatePlanner for AssociationPlanner {
    async fn plan(
        &self,
        reference: &EntityReference,
    ) -> Result<Option<PlannedUpdate>, DispatchError> {
        let engagement = self
            .query
            .engagement(reference.engagement())
            .await?
            .ok_or(DispatchError::NotFound(reference.engagement()))?;
        let association_type = self.association_type_uuid().await?;

        let keyed = association_uuid(association_type, engagement.uuid);

        let associations = self.query.associations(engagement.employee_uuid).await?;
        let of_type: Vec<_> = associations
            .iter()
            .filter(|a| a.association_type_uuid == Some(association_type))
            .collect();
        let own = of_type.iter().find(|a| a.uuid == keyed);

        let from = engagement
            .validity
            .from_date()
            .unwrap_or_else(|| reference.time().date_naive());

        let update = match own {
            Some(own) if own.org_unit_uuid == engagement.org_unit_uuid => {
                debug!(engagement = %engagement.uuid, "Association already in place");
                return Ok(None);
            }
            Some(own) => PlannedUpdate::MoveAssociation(AssociationEdit::move_to(
                own.uuid,
                engagement.org_unit_uuid,
                from,
            )),
            // One made by hand in the right unit counts.
            None if of_type
                .iter()
                .any(|a| a.org_unit_uuid == engagement.org_unit_uuid) =>
            {
                debug!(engagement = %engagement.uuid, "Association already in place");
                return Ok(None);
            }
            None => PlannedUpdate::CreateAssociation(AssociationCreate::new(
                keyed,
                engagement.employee_uuid,
                engagement.org_unit_uuid,
                association_type,
                from,
            )),
        };
        Ok(Some(update))
    }
}
