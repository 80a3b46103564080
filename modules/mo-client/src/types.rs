use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- GraphQL read models ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Validity {
    pub from: Option<DateTime<FixedOffset>>,
    pub to: Option<DateTime<FixedOffset>>,
}

impl Validity {
    pub fn from_date(&self) -> Option<NaiveDate> {
        self.from.map(|from| from.date_naive())
    }
}

/// Current state of one engagement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Engagement {
    pub uuid: Uuid,
    pub employee_uuid: Uuid,
    pub org_unit_uuid: Uuid,
    pub validity: Validity,
}

/// Minimal engagement record used when paging through all engagements.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngagementStub {
    pub uuid: Uuid,
    pub employee_uuid: Uuid,
}

/// One page of the engagement listing.
///
/// `scanned` counts engagements the server returned, including ones without a
/// current registration; zero means the listing is exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementPage {
    pub engagements: Vec<EngagementStub>,
    pub scanned: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Association {
    pub uuid: Uuid,
    pub employee_uuid: Uuid,
    pub org_unit_uuid: Uuid,
    pub association_type_uuid: Option<Uuid>,
    pub validity: Validity,
}

/// One organisation as listed by `GET /service/o/`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrganisationSummary {
    pub uuid: Uuid,
    #[serde(default)]
    pub name: Option<String>,
}

// --- Service API write models ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UuidRef {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidityWrite {
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
}

/// Body item for `POST /service/details/create`.
///
/// MO keeps the supplied `uuid`, so sending the same create twice addresses
/// one association object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationCreate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub uuid: Uuid,
    pub person: UuidRef,
    pub org_unit: UuidRef,
    pub association_type: UuidRef,
    pub validity: ValidityWrite,
}

impl AssociationCreate {
    pub fn new(
        uuid: Uuid,
        person: Uuid,
        org_unit: Uuid,
        association_type: Uuid,
        from: NaiveDate,
    ) -> Self {
        Self {
            kind: "association",
            uuid,
            person: UuidRef { uuid: person },
            org_unit: UuidRef { uuid: org_unit },
            association_type: UuidRef {
                uuid: association_type,
            },
            validity: ValidityWrite { from, to: None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationEditData {
    pub org_unit: UuidRef,
    pub validity: ValidityWrite,
}

/// Body item for `POST /service/details/edit`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationEdit {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub uuid: Uuid,
    pub data: AssociationEditData,
}

impl AssociationEdit {
    pub fn move_to(association: Uuid, org_unit: Uuid, from: NaiveDate) -> Self {
        Self {
            kind: "association",
            uuid: association,
            data: AssociationEditData {
                org_unit: UuidRef { uuid: org_unit },
                validity: ValidityWrite { from, to: None },
            },
        }
    }
}

// --- GraphQL envelopes ---

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlErrorMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlErrorMessage {
    pub message: String,
}

/// MO wraps bitemporal results as `[{uuid, objects: [...]}]`.
#[derive(Debug, Deserialize)]
pub(crate) struct ObjectsOf<T> {
    pub objects: Vec<T>,
}
