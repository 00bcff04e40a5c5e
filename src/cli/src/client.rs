//! HTTP client for the CRM API server.

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Success envelope returned by the server.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
}

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorInfo,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    organization: Option<Uuid>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>, organization: Option<Uuid>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            organization,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Attach the bearer token and organization header, when configured.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        match &self.organization {
            Some(org) => request.header("X-Organization-Id", org.to_string()),
            None => request,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        unwrap_data(resp, &url).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .authorize(self.client.get(&url).query(query))
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        unwrap_data(resp, &url).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .authorize(self.client.post(&url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        unwrap_data(resp, &url).await
    }

    /// Unauthenticated GET returning the raw JSON, for the health check.
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

async fn unwrap_data<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => {
                let mut msg = format!("{} ({}): {}", err.error.code, status.as_u16(), err.error.message);
                if let Some(hint) = err
                    .error
                    .details
                    .as_ref()
                    .and_then(|d| d.get("suggested_action"))
                    .and_then(|v| v.as_str())
                {
                    msg.push_str(&format!("\n  {}", hint));
                }
                anyhow::anyhow!(msg)
            }
            Err(_) => anyhow::anyhow!("API error ({}): {}", status, body),
        });
    }

    let api_resp: ApiResponse<T> = resp
        .json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))?;
    api_resp
        .data
        .ok_or_else(|| anyhow::anyhow!("API returned success but no data"))
}
