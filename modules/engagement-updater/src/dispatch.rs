use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};
use updater_common::{DispatchError, EntityReference};

use crate::planner::PlannedUpdate;
use crate::traits::{CommandApi, UpdatePlanner};

/// What a successful dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// One write was issued.
    Applied,
    /// State already matched; nothing was written.
    Unchanged,
}

/// Recomputes one engagement and writes the result back.
///
/// Every trigger path ends here. Dispatching the same reference twice against
/// unchanged upstream state writes at most once.
#[derive(Clone)]
pub struct Dispatcher {
    planner: Arc<dyn UpdatePlanner>,
    command: Arc<dyn CommandApi>,
}

impl Dispatcher {
    pub fn new(planner: Arc<dyn UpdatePlanner>, command: Arc<dyn CommandApi>) -> Self {
        Self { planner, command }
    }

    #[instrument(skip(self), fields(engagement = %reference.engagement(), person = %reference.person()))]
    pub async fn dispatch(
        &self,
        reference: &EntityReference,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(update) = self.planner.plan(reference).await? else {
            return Ok(DispatchOutcome::Unchanged);
        };

        self.command.apply(&update).await?;
        match &update {
            PlannedUpdate::CreateAssociation(create) => {
                info!(association = %create.uuid, org_unit = %create.org_unit.uuid, "Created association")
            }
            PlannedUpdate::MoveAssociation(edit) => {
                info!(association = %edit.uuid, org_unit = %edit.data.org_unit.uuid, "Moved association")
            }
        }
        Ok(DispatchOutcome::Applied)
    }
}
