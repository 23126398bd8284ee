//! HTTP implementation of [`ContentSource`] against the headless content
//! source's read/write API.
//!
//! Reads and writes are authenticated with a bearer token obtained through a
//! client-credentials exchange; the token is cached and refreshed on expiry
//! or on a 401. Asset binaries are content-addressed and fetched without
//! auth.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::SourceConfig;
use crate::contract::{ContentSource, Page, PageQuery, SchemaDef};
use crate::error::{EngineError, Result};

/// Refresh the token this long before the server-declared expiry.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Token {
    bearer: String,
    expires_at: Instant,
}

impl Token {
    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

pub struct HttpContentSource {
    config: SourceConfig,
    client: Client,
    token: Mutex<Option<Token>>,
}

impl HttpContentSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            token: Mutex::new(None),
        }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn content_url(&self, namespace: &str, entity_type: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/content/{namespace}/{entity_type}/{id}", self.base()),
            None => format!("{}/content/{namespace}/{entity_type}", self.base()),
        }
    }

    fn assets_url(&self, namespace: &str) -> String {
        format!("{}/apps/{namespace}/assets", self.base())
    }

    fn schemas_url(&self, namespace: &str) -> String {
        format!("{}/apps/{namespace}/schemas/", self.base())
    }

    fn token_url(&self) -> String {
        format!("{}/identity-server/connect/token", self.base())
    }

    /// Exchange client credentials for a fresh bearer token.
    async fn exchange_credentials(&self) -> Result<Token> {
        let url = self.token_url();
        info!(url = %url, "Exchanging client credentials for bearer token");
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, url = %url, "Token endpoint unreachable");
                EngineError::Unavailable(format!("token endpoint unreachable: {e}"))
            })?;
        if response.status() == StatusCode::UNAUTHORIZED
            || response.status() == StatusCode::FORBIDDEN
            || response.status() == StatusCode::BAD_REQUEST
        {
            return Err(EngineError::Unauthorized(
                "client credentials were rejected by the token endpoint".into(),
            ));
        }
        let status = response.status();
        if !status.is_success() {
            return Err(upstream_failure(status, response).await);
        }
        let body: TokenResponse = response.json().await.map_err(|e| {
            EngineError::Unavailable(format!("bad token endpoint response: {e}"))
        })?;
        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(300));
        Ok(Token {
            bearer: body.access_token,
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_SLACK),
        })
    }

    async fn bearer(&self, force_refresh: bool) -> Result<String> {
        let mut guard = self.token.lock().await;
        let stale = force_refresh || guard.as_ref().map(Token::expired).unwrap_or(true);
        if stale {
            *guard = Some(self.exchange_credentials().await?);
        }
        Ok(guard.as_ref().map(|t| t.bearer.clone()).unwrap_or_default())
    }

    /// Send an authenticated request; on a 401 the token is refreshed and the
    /// request retried exactly once.
    async fn send_authed<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let token = self.bearer(false).await?;
        let response = build()
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(format!("source unreachable: {e}")))?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        debug!("Bearer token rejected, refreshing and retrying once");
        let token = self.bearer(true).await?;
        build()
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(format!("source unreachable: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, query: Option<&PageQuery>) -> Result<T> {
        let response = self
            .send_authed(|| {
                let mut builder = self.client.request(Method::GET, url);
                if let Some(q) = query {
                    builder = builder.query(&[("q", query_param(q))]);
                }
                builder
            })
            .await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(EngineError::Unauthorized(format!(
                "source rejected credentials for {url}"
            )));
        }
        if !status.is_success() {
            return Err(upstream_failure(status, response).await);
        }
        response.json::<T>().await.map_err(|e| {
            EngineError::Unavailable(format!("bad response body from {url}: {e}"))
        })
    }
}

/// The windowing query is shipped as one `q` JSON parameter.
fn query_param(query: &PageQuery) -> String {
    let mut q = json!({
        "take": query.take,
        "skip": query.skip,
    });
    if let Some(filter) = &query.filter {
        q["filter"] = Value::String(filter.clone());
    }
    if let Some(sort) = &query.sort {
        q["sort"] = Value::String(sort.clone());
    }
    q.to_string()
}

async fn upstream_failure(status: StatusCode, response: Response) -> EngineError {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<failed to decode response body>"));
    let details = if body.is_empty() {
        None
    } else {
        // Keep a bounded excerpt; never the whole payload.
        Some(body.chars().take(512).collect::<String>())
    };
    EngineError::Upstream {
        status: status.as_u16(),
        message: status
            .canonical_reason()
            .unwrap_or("upstream error")
            .to_string(),
        details,
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch_page(
        &self,
        namespace: &str,
        entity_type: &str,
        query: &PageQuery,
    ) -> Result<Page> {
        let url = self.content_url(namespace, entity_type, None);
        self.get_json(&url, Some(query)).await
    }

    async fn fetch_asset_page(&self, namespace: &str, query: &PageQuery) -> Result<Page> {
        let url = self.assets_url(namespace);
        self.get_json(&url, Some(query)).await
    }

    async fn fetch_schemas(&self, namespace: &str) -> Result<Vec<SchemaDef>> {
        let url = self.schemas_url(namespace);
        self.get_json(&url, None).await
    }

    async fn fetch_entity(&self, namespace: &str, entity_type: &str, id: &str) -> Result<Value> {
        let url = self.content_url(namespace, entity_type, Some(id));
        self.get_json(&url, None).await
    }

    async fn patch_entity(
        &self,
        namespace: &str,
        entity_type: &str,
        id: &str,
        body: &Value,
    ) -> Result<()> {
        let url = self.content_url(namespace, entity_type, Some(id));
        let response = self
            .send_authed(|| self.client.request(Method::PATCH, &url).json(body))
            .await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(EngineError::Unauthorized(format!(
                "source rejected credentials for {url}"
            )));
        }
        if !status.is_success() {
            return Err(upstream_failure(status, response).await);
        }
        info!(namespace, entity_type, id, "Patched entity");
        Ok(())
    }

    async fn fetch_asset_binary(&self, href: &str, version: Option<i64>) -> Result<Vec<u8>> {
        // Content-addressed, no auth.
        let mut request = self.client.get(href);
        if let Some(v) = version {
            request = request.query(&[("version", v)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(format!("asset host unreachable: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(upstream_failure(status, response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Unavailable(format!("asset download failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}
