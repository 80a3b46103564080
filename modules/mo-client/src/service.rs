use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;
use updater_common::Settings;

use crate::auth::TokenProvider;
use crate::error::Result;
use crate::types::{AssociationCreate, AssociationEdit, OrganisationSummary};

/// Write-side client for MO's service API.
pub struct ServiceApiClient {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<TokenProvider>,
}

impl ServiceApiClient {
    pub fn new(settings: &Settings, auth: Arc<TokenProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.service_api_timeout)
            .build()?;
        Ok(Self::with_client(client, settings.mo_url.clone(), auth))
    }

    pub fn with_client(client: reqwest::Client, base_url: String, auth: Arc<TokenProvider>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// `GET /service/o/`: the configured organisations. Used as a health read.
    #[instrument(skip(self))]
    pub async fn organisations(&self) -> Result<Vec<OrganisationSummary>> {
        let token = self.auth.token().await?;
        let resp = self
            .client
            .get(format!("{}/service/o/", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        let resp = crate::check_status(resp).await?;
        Ok(resp.json().await?)
    }

    #[instrument(skip(self), fields(person = %create.person.uuid, org_unit = %create.org_unit.uuid))]
    pub async fn create_association(&self, create: &AssociationCreate) -> Result<()> {
        self.post_details("create", &[create]).await
    }

    #[instrument(skip(self), fields(association = %edit.uuid, org_unit = %edit.data.org_unit.uuid))]
    pub async fn edit_association(&self, edit: &AssociationEdit) -> Result<()> {
        self.post_details("edit", &[edit]).await
    }

    async fn post_details<T: Serialize>(&self, action: &str, details: &[T]) -> Result<()> {
        let token = self.auth.token().await?;
        let resp = self
            .client
            .post(format!("{}/service/details/{}", self.base_url, action))
            .bearer_auth(token)
            .json(details)
            .send()
            .await?;
        crate::check_status(resp).await?;
        Ok(())
    }

    /// Release the client's credentials.
    pub async fn close(&self) {
        self.auth.invalidate().await;
    }
}
