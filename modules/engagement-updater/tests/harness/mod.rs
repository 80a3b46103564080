//! In-memory stand-ins for MO and the event bus.
//!
//! `FakeMo` serves both the query and the command side from one state, so
//! writes are visible to later reads the way they are against a real MO.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use futures::channel::mpsc;
use mo_client::{Association, Engagement, EngagementPage, EngagementStub, Validity};
use updater_common::{NotificationPayload, RoutingKey, UpstreamError};
use updater_events::{BusError, DeliveryAcker, Notification, NotificationStream};
use uuid::Uuid;

use engagement_updater::{CommandApi, EventBus, PlannedUpdate, QueryApi};

pub const ASSOCIATION_TYPE: &str = "member";

/// How a fake dependency answers its health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
    Failing,
}

#[derive(Default)]
struct MoState {
    engagements: Vec<Engagement>,
    associations: Vec<Association>,
    without_registration: HashSet<Uuid>,
    writes: Vec<PlannedUpdate>,
    failing_queries: usize,
    failing_commands: usize,
    failing_page_offset: Option<usize>,
}

pub struct FakeMo {
    pub association_type: Uuid,
    state: Mutex<MoState>,
    query_health: Mutex<Health>,
    command_health: Mutex<Health>,
    write_delay: Mutex<Duration>,
    class_lookups: AtomicUsize,
    page_requests: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    pub closed: AtomicBool,
}

impl FakeMo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            association_type: Uuid::new_v4(),
            state: Mutex::new(MoState::default()),
            query_health: Mutex::new(Health::Healthy),
            command_health: Mutex::new(Health::Healthy),
            write_delay: Mutex::new(Duration::ZERO),
            class_lookups: AtomicUsize::new(0),
            page_requests: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Add an engagement for `person` in `org_unit`, valid from 2024-01-01.
    pub fn add_engagement(&self, person: Uuid, org_unit: Uuid) -> Uuid {
        let uuid = Uuid::new_v4();
        self.state.lock().unwrap().engagements.push(Engagement {
            uuid,
            employee_uuid: person,
            org_unit_uuid: org_unit,
            validity: validity_from(2024, 1, 1),
        });
        uuid
    }

    /// An engagement that shows up in listings but has no current registration.
    pub fn add_historic_engagement(&self) -> Uuid {
        let uuid = self.add_engagement(Uuid::new_v4(), Uuid::new_v4());
        self.state.lock().unwrap().without_registration.insert(uuid);
        uuid
    }

    /// Move an existing engagement to another org unit.
    pub fn move_engagement(&self, engagement: Uuid, org_unit: Uuid) {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.engagements.iter_mut().find(|e| e.uuid == engagement) {
            existing.org_unit_uuid = org_unit;
        }
    }

    pub fn add_association(&self, person: Uuid, org_unit: Uuid, association_type: Uuid) -> Uuid {
        let uuid = Uuid::new_v4();
        self.state.lock().unwrap().associations.push(Association {
            uuid,
            employee_uuid: person,
            org_unit_uuid: org_unit,
            association_type_uuid: Some(association_type),
            validity: validity_from(2023, 6, 1),
        });
        uuid
    }

    pub fn associations_of(&self, person: Uuid) -> Vec<Association> {
        self.state
            .lock()
            .unwrap()
            .associations
            .iter()
            .filter(|a| a.employee_uuid == person)
            .cloned()
            .collect()
    }

    pub fn writes(&self) -> Vec<PlannedUpdate> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Fail the next `n` query calls.
    pub fn fail_queries(&self, n: usize) {
        self.state.lock().unwrap().failing_queries = n;
    }

    /// Fail the next `n` writes.
    pub fn fail_commands(&self, n: usize) {
        self.state.lock().unwrap().failing_commands = n;
    }

    /// Fail the page fetch starting at `offset`.
    pub fn fail_page_at(&self, offset: usize) {
        self.state.lock().unwrap().failing_page_offset = Some(offset);
    }

    pub fn set_query_health(&self, health: Health) {
        *self.query_health.lock().unwrap() = health;
    }

    pub fn set_command_health(&self, health: Health) {
        *self.command_health.lock().unwrap() = health;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    pub fn class_lookups(&self) -> usize {
        self.class_lookups.load(Ordering::SeqCst)
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn query_call(&self) -> Result<(), UpstreamError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(UpstreamError::query("connection refused"));
        }
        Ok(())
    }
}

fn validity_from(year: i32, month: u32, day: u32) -> Validity {
    let from = NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_local_timezone(FixedOffset::east_opt(3600).unwrap())
        .unwrap();
    Validity {
        from: Some(from),
        to: None,
    }
}

fn health_result(health: Health, api: &str) -> Result<bool, UpstreamError> {
    match health {
        Health::Healthy => Ok(true),
        Health::Unhealthy => Ok(false),
        Health::Failing if api == "query" => Err(UpstreamError::query("timed out")),
        Health::Failing => Err(UpstreamError::command("timed out")),
    }
}

#[async_trait]
impl QueryApi for FakeMo {
    async fn engagement(&self, uuid: Uuid) -> Result<Option<Engagement>, UpstreamError> {
        self.query_call()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .engagements
            .iter()
            .find(|e| e.uuid == uuid && !state.without_registration.contains(&e.uuid))
            .cloned())
    }

    async fn engagement_page(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<EngagementPage, UpstreamError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        self.query_call()?;
        let state = self.state.lock().unwrap();
        if state.failing_page_offset == Some(offset) {
            return Err(UpstreamError::query("page fetch failed"));
        }
        let scanned: Vec<&Engagement> = state.engagements.iter().skip(offset).take(limit).collect();
        Ok(EngagementPage {
            scanned: scanned.len(),
            engagements: scanned
                .into_iter()
                .filter(|e| !state.without_registration.contains(&e.uuid))
                .map(|e| EngagementStub {
                    uuid: e.uuid,
                    employee_uuid: e.employee_uuid,
                })
                .collect(),
        })
    }

    async fn associations(&self, person: Uuid) -> Result<Vec<Association>, UpstreamError> {
        self.query_call()?;
        Ok(self.associations_of(person))
    }

    async fn class_uuid(&self, user_key: &str) -> Result<Option<Uuid>, UpstreamError> {
        self.class_lookups.fetch_add(1, Ordering::SeqCst);
        self.query_call()?;
        Ok((user_key == ASSOCIATION_TYPE).then_some(self.association_type))
    }

    async fn healthcheck(&self) -> Result<bool, UpstreamError> {
        let health = *self.query_health.lock().unwrap();
        health_result(health, "query")
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandApi for FakeMo {
    async fn apply(&self, update: &PlannedUpdate) -> Result<(), UpstreamError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        if state.failing_commands > 0 {
            state.failing_commands -= 1;
            return Err(UpstreamError::command("503 Service Unavailable"));
        }
        match update {
            PlannedUpdate::CreateAssociation(create) => {
                let created = Association {
                    uuid: create.uuid,
                    employee_uuid: create.person.uuid,
                    org_unit_uuid: create.org_unit.uuid,
                    association_type_uuid: Some(create.association_type.uuid),
                    validity: Validity {
                        from: None,
                        to: None,
                    },
                };
                // MO keys objects by uuid: a second create replaces the first.
                match state.associations.iter_mut().find(|a| a.uuid == create.uuid) {
                    Some(existing) => *existing = created,
                    None => state.associations.push(created),
                }
            }
            PlannedUpdate::MoveAssociation(edit) => {
                if let Some(existing) = state.associations.iter_mut().find(|a| a.uuid == edit.uuid) {
                    existing.org_unit_uuid = edit.data.org_unit.uuid;
                }
            }
        }
        state.writes.push(update.clone());
        Ok(())
    }

    async fn healthcheck(&self) -> Result<bool, UpstreamError> {
        let health = *self.command_health.lock().unwrap();
        health_result(health, "command")
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Event bus whose subscription is fed by the test.
pub struct FakeBus {
    pub healthy: AtomicBool,
    stream: Mutex<Option<NotificationStream>>,
}

impl FakeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
            stream: Mutex::new(None),
        })
    }

    pub fn with_stream(stream: NotificationStream) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
            stream: Mutex::new(Some(stream)),
        })
    }
}

#[async_trait]
impl EventBus for FakeBus {
    async fn subscribe(&self, _binding: RoutingKey) -> Result<NotificationStream, BusError> {
        self.stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| BusError::Consume("already subscribed".to_string()))
    }

    fn healthcheck(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Ack,
    Reject { requeue: bool },
}

/// Records settlements. With a redelivery channel, requeued messages are
/// delivered again the way the broker would.
pub struct FakeAcker {
    log: Arc<Mutex<Vec<Settled>>>,
    redeliver: Option<(mpsc::UnboundedSender<Result<Notification, BusError>>, String, Vec<u8>)>,
}

#[async_trait]
impl DeliveryAcker for FakeAcker {
    async fn ack(&self) -> updater_events::Result<()> {
        self.log.lock().unwrap().push(Settled::Ack);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> updater_events::Result<()> {
        self.log.lock().unwrap().push(Settled::Reject { requeue });
        if let (true, Some((sender, key, body))) = (requeue, &self.redeliver) {
            let acker = Arc::new(FakeAcker {
                log: self.log.clone(),
                redeliver: self.redeliver.clone(),
            });
            let _ = sender.unbounded_send(Ok(Notification::new(key.clone(), body.clone(), true, acker)));
        }
        Ok(())
    }
}

/// A notification whose settlements land in `log`.
pub fn notification(key: &str, body: Vec<u8>, log: &Arc<Mutex<Vec<Settled>>>) -> Notification {
    let acker = Arc::new(FakeAcker {
        log: log.clone(),
        redeliver: None,
    });
    Notification::new(key, body, false, acker)
}

/// A broker stand-in: returns the stream to consume and publishes `body`
/// under `key`. Requeued deliveries come back on the same stream.
pub fn redelivering_broker(
    key: &str,
    body: Vec<u8>,
    log: &Arc<Mutex<Vec<Settled>>>,
) -> (NotificationStream, mpsc::UnboundedSender<Result<Notification, BusError>>) {
    let (sender, receiver) = mpsc::unbounded();
    let acker = Arc::new(FakeAcker {
        log: log.clone(),
        redeliver: Some((sender.clone(), key.to_string(), body.clone())),
    });
    sender
        .unbounded_send(Ok(Notification::new(key, body, false, acker)))
        .unwrap();
    (Box::pin(receiver), sender)
}

pub fn payload_for(person: Uuid, engagement: Uuid) -> Vec<u8> {
    serde_json::to_vec(&NotificationPayload {
        uuid: person,
        object_uuid: engagement,
        time: Utc::now(),
    })
    .unwrap()
}

pub fn timestamp(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
}
