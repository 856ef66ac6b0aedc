//! Remote database provisioning.
//!
//! The platform API is the organization/database/token shape used by hosted
//! libSQL providers:
//!
//! - `POST   /v1/organizations/{org}/databases`                  create
//! - `POST   /v1/organizations/{org}/databases/{name}/auth/tokens` mint token
//! - `GET    /v1/organizations/{org}/databases/{name}`           describe
//! - `DELETE /v1/organizations/{org}/databases/{name}`           destroy

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use worldgraph_core::config::ProvisioningConfig;
use worldgraph_core::{WorldgraphError, WorldgraphResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedDatabase {
    pub name: String,
    pub hostname: String,
}

/// External service that owns remote world databases.
#[async_trait]
pub trait ProvisioningService: Send + Sync {
    async fn create(&self, name: &str) -> WorldgraphResult<ProvisionedDatabase>;
    async fn create_token(&self, name: &str) -> WorldgraphResult<String>;
    async fn get(&self, name: &str) -> WorldgraphResult<ProvisionedDatabase>;
    async fn delete(&self, name: &str) -> WorldgraphResult<()>;
}

// ============================================================================
// HTTP client
// ============================================================================

pub struct HttpProvisioningClient {
    client: Client,
    base_url: String,
    organization: String,
    group: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct DatabaseEnvelope {
    database: DatabaseBody,
}

#[derive(Debug, Deserialize)]
struct DatabaseBody {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Hostname")]
    hostname: String,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    jwt: String,
}

impl HttpProvisioningClient {
    pub fn new(
        base_url: impl Into<String>,
        organization: impl Into<String>,
        group: impl Into<String>,
        api_token: impl Into<String>,
    ) -> WorldgraphResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WorldgraphError::upstream(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            organization: organization.into(),
            group: group.into(),
            api_token: api_token.into(),
        })
    }

    pub fn from_config(config: &ProvisioningConfig) -> WorldgraphResult<Self> {
        Self::new(
            config.base_url.clone(),
            config.organization.clone(),
            config.group.clone(),
            config.api_token()?,
        )
    }

    fn databases_url(&self) -> String {
        format!("{}/v1/organizations/{}/databases", self.base_url, self.organization)
    }

    fn database_url(&self, name: &str) -> String {
        format!("{}/{name}", self.databases_url())
    }
}

/// Map a non-success status to the error taxonomy.
async fn check_status(response: Response, what: &str) -> WorldgraphResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => WorldgraphError::not_found(format!("{what}: {body}")),
        StatusCode::CONFLICT => WorldgraphError::conflict(format!("{what}: {body}")),
        StatusCode::BAD_REQUEST => WorldgraphError::invalid(format!("{what}: {body}")),
        _ => WorldgraphError::upstream(format!("{what}: HTTP {status}: {body}")),
    })
}

#[async_trait]
impl ProvisioningService for HttpProvisioningClient {
    async fn create(&self, name: &str) -> WorldgraphResult<ProvisionedDatabase> {
        let response = self
            .client
            .post(self.databases_url())
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({ "name": name, "group": self.group }))
            .send()
            .await?;
        let response = check_status(response, &format!("create database {name}")).await?;
        let envelope: DatabaseEnvelope = response.json().await?;
        Ok(ProvisionedDatabase {
            name: envelope.database.name,
            hostname: envelope.database.hostname,
        })
    }

    async fn create_token(&self, name: &str) -> WorldgraphResult<String> {
        let response = self
            .client
            .post(format!("{}/auth/tokens", self.database_url(name)))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        let response = check_status(response, &format!("create token for {name}")).await?;
        let body: TokenBody = response.json().await?;
        Ok(body.jwt)
    }

    async fn get(&self, name: &str) -> WorldgraphResult<ProvisionedDatabase> {
        let response = self
            .client
            .get(self.database_url(name))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        let response = check_status(response, &format!("get database {name}")).await?;
        let envelope: DatabaseEnvelope = response.json().await?;
        Ok(ProvisionedDatabase {
            name: envelope.database.name,
            hostname: envelope.database.hostname,
        })
    }

    async fn delete(&self, name: &str) -> WorldgraphResult<()> {
        let response = self
            .client
            .delete(self.database_url(name))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        check_status(response, &format!("delete database {name}")).await?;
        Ok(())
    }
}
