//! Keeps the association backing each engagement in step with its org unit.
//!
//! Recomputation is triggered three ways: by engagement change notifications
//! from the event bus, by a bulk HTTP trigger covering every engagement, and
//! by a single-engagement HTTP trigger. All three end in [`Dispatcher::dispatch`].

pub mod clients;
pub mod dispatch;
pub mod jobs;
pub mod lifecycle;
pub mod metrics;
pub mod planner;
pub mod readiness;
pub mod routes;
pub mod runner;
pub mod server;
pub mod source;
pub mod subscription;
pub mod telemetry;
pub mod traits;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use jobs::{BulkJobs, JobStatus, JobSummary, Trigger};
pub use lifecycle::{with_context, ClientFactory, ProcessContext};
pub use metrics::Metrics;
pub use planner::{association_uuid, AssociationPlanner, PlannedUpdate};
pub use readiness::{HealthProbe, HealthReport, ReadinessAggregator};
pub use runner::{run_bounded, BoundedRunner, RunReport, RunnerError, UnitFailure, UnitResult};
pub use source::EngagementSource;
pub use subscription::{Settlement, SubscriptionHandler};
pub use traits::{CommandApi, EventBus, QueryApi, UpdatePlanner};
