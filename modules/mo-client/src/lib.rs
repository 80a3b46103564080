pub mod auth;
pub mod error;
pub mod graphql;
pub mod service;
pub mod types;

pub use auth::TokenProvider;
pub use error::{MoError, Result};
pub use graphql::GraphQlClient;
pub use service::ServiceApiClient;
pub use types::{
    Association, AssociationCreate, AssociationEdit, Engagement, EngagementPage, EngagementStub,
    OrganisationSummary, Validity,
};

pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(MoError::Api {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(resp)
}
