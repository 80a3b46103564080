use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;
use updater_common::Settings;
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::error::{MoError, Result};
use crate::types::{
    Association, Engagement, EngagementPage, EngagementStub, GraphQlResponse, ObjectsOf,
};

const HEALTHCHECK_QUERY: &str = r#"
query HealthcheckQuery {
    org {
        uuid
    }
}
"#;

const ENGAGEMENT_QUERY: &str = r#"
query EngagementQuery($uuids: [UUID!]) {
    engagements(uuids: $uuids) {
        objects {
            uuid
            employee_uuid
            org_unit_uuid
            validity { from to }
        }
    }
}
"#;

const ENGAGEMENT_PAGE_QUERY: &str = r#"
query EngagementPageQuery($limit: Int!, $offset: Int!) {
    engagements(limit: $limit, offset: $offset) {
        objects {
            uuid
            employee_uuid
        }
    }
}
"#;

const ASSOCIATIONS_QUERY: &str = r#"
query AssociationsQuery($employees: [UUID!]) {
    associations(employees: $employees) {
        objects {
            uuid
            employee_uuid
            org_unit_uuid
            association_type_uuid
            validity { from to }
        }
    }
}
"#;

const CLASS_QUERY: &str = r#"
query ClassQuery($user_keys: [String!]) {
    classes(user_keys: $user_keys) {
        uuid
    }
}
"#;

/// Read-side client for MO's GraphQL endpoint.
pub struct GraphQlClient {
    client: reqwest::Client,
    url: String,
    auth: Arc<TokenProvider>,
}

impl GraphQlClient {
    /// Build a client whose requests time out after `settings.graphql_timeout`.
    pub fn new(settings: &Settings, auth: Arc<TokenProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.graphql_timeout)
            .build()?;
        Ok(Self::with_client(
            client,
            format!("{}/graphql/v2", settings.mo_url),
            auth,
        ))
    }

    pub fn with_client(client: reqwest::Client, url: String, auth: Arc<TokenProvider>) -> Self {
        Self { client, url, auth }
    }

    /// Execute a query and deserialize its `data` member.
    pub async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let token = self.auth.token().await?;
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        let resp = crate::check_status(resp).await?;

        let body: GraphQlResponse<T> = resp.json().await?;
        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(MoError::GraphQl(messages.join("; ")));
        }
        body.data
            .ok_or_else(|| MoError::Parse("response carried neither data nor errors".into()))
    }

    /// Minimal read used by readiness probes.
    #[instrument(skip(self))]
    pub async fn org_uuid(&self) -> Result<Uuid> {
        #[derive(Deserialize)]
        struct Org {
            uuid: Uuid,
        }
        #[derive(Deserialize)]
        struct Data {
            org: Org,
        }

        let data: Data = self.execute(HEALTHCHECK_QUERY, json!({})).await?;
        Ok(data.org.uuid)
    }

    #[instrument(skip(self))]
    pub async fn engagement(&self, uuid: Uuid) -> Result<Option<Engagement>> {
        #[derive(Deserialize)]
        struct Data {
            engagements: Vec<ObjectsOf<Engagement>>,
        }

        let data: Data = self
            .execute(ENGAGEMENT_QUERY, json!({ "uuids": [uuid] }))
            .await?;
        Ok(data
            .engagements
            .into_iter()
            .flat_map(|e| e.objects)
            .next())
    }

    /// One page of engagements, starting at `offset`.
    #[instrument(skip(self))]
    pub async fn engagement_page(&self, limit: usize, offset: usize) -> Result<EngagementPage> {
        #[derive(Deserialize)]
        struct Data {
            engagements: Vec<ObjectsOf<EngagementStub>>,
        }

        let data: Data = self
            .execute(
                ENGAGEMENT_PAGE_QUERY,
                json!({ "limit": limit, "offset": offset }),
            )
            .await?;
        let scanned = data.engagements.len();
        // Each engagement may carry several registrations; the first is current.
        let engagements = data
            .engagements
            .into_iter()
            .filter_map(|e| e.objects.into_iter().next())
            .collect();
        Ok(EngagementPage {
            engagements,
            scanned,
        })
    }

    #[instrument(skip(self))]
    pub async fn associations(&self, employee: Uuid) -> Result<Vec<Association>> {
        #[derive(Deserialize)]
        struct Data {
            associations: Vec<ObjectsOf<Association>>,
        }

        let data: Data = self
            .execute(ASSOCIATIONS_QUERY, json!({ "employees": [employee] }))
            .await?;
        Ok(data
            .associations
            .into_iter()
            .flat_map(|a| a.objects)
            .collect())
    }

    /// Resolve a facet class by its user key.
    #[instrument(skip(self))]
    pub async fn class_uuid(&self, user_key: &str) -> Result<Option<Uuid>> {
        #[derive(Deserialize)]
        struct Class {
            uuid: Uuid,
        }
        #[derive(Deserialize)]
        struct Data {
            classes: Vec<Class>,
        }

        let data: Data = self
            .execute(CLASS_QUERY, json!({ "user_keys": [user_key] }))
            .await?;
        Ok(data.classes.into_iter().next().map(|c| c.uuid))
    }

    /// Release the client's credentials.
    pub async fn close(&self) {
        self.auth.invalidate().await;
    }
}
