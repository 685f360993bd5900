//! Request plumbing shared by every adapter: credential resolution, auth placement,
//! endpoint building and the status check every call goes through.

use super::error::ProviderError;
use crate::auth::{Credential, CredentialSource};
use crate::models::RequestConfig;
use reqwest::Client;
use secrecy::ExposeSecret;
use std::collections::BTreeMap;
use url::Url;

pub const ACCEPT_JSON: &str = "application/json";
pub const ACCEPT_EVENT_STREAM: &str = "text/event-stream";

/// Where the API key goes on each request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlacement {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Key sent verbatim in the named header
    Header(&'static str),
    /// Key appended to the URL as the named query parameter
    Query(&'static str),
}

/// Resolve a named credential, failing before any network call if it is absent or blank
pub fn resolve_credential(
    source: &dyn CredentialSource,
    name: &str,
) -> Result<Credential, ProviderError> {
    match source.lookup(name) {
        Some(value) if !value.expose_secret().trim().is_empty() => Ok(Credential::new(name, value)),
        _ => {
            tracing::warn!("Credential '{}' is not configured", name);
            Err(ProviderError::AuthConfig(name.to_string()))
        }
    }
}

/// Pull the answer text out of a success body at a JSON pointer
pub fn extract_answer(raw_body: &str, pointer: &str) -> Result<String, ProviderError> {
    serde_json::from_str::<serde_json::Value>(raw_body)
        .ok()
        .as_ref()
        .and_then(|json| json.pointer(pointer))
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            tracing::error!("Response is missing {}", pointer);
            tracing::error!("Response body was: {}", raw_body);
            ProviderError::ResponseFormat {
                raw_body: raw_body.to_string(),
            }
        })
}

/// Shared per-adapter client state
pub struct BaseClient {
    credential: Credential,
    auth: AuthPlacement,
    base_url: String,
    config: RequestConfig,
    /// Fixed provider headers (e.g. "anthropic-version")
    custom_headers: Vec<(String, String)>,
    http: Client,
}

impl BaseClient {
    pub fn new(
        credential: Credential,
        auth: AuthPlacement,
        base_url: impl Into<String>,
        config: RequestConfig,
        http: Client,
    ) -> Self {
        Self {
            credential,
            auth,
            base_url: base_url.into(),
            config,
            custom_headers: Vec::new(),
            http,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.custom_headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Standard headers for a JSON request; a pure function of the credential
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Accept".to_string(), ACCEPT_JSON.to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        match self.auth {
            AuthPlacement::Bearer => {
                headers.insert(
                    "Authorization".to_string(),
                    format!("Bearer {}", self.credential.expose()),
                );
            }
            AuthPlacement::Header(name) => {
                headers.insert(name.to_string(), self.credential.expose().to_string());
            }
            AuthPlacement::Query(_) => {}
        }

        for (name, value) in &self.custom_headers {
            headers.insert(name.clone(), value.clone());
        }

        headers
    }

    /// Build `<base_url><path>` with extra query pairs and, for query auth, the key
    pub fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let raw = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut url = Url::parse(&raw)
            .map_err(|e| ProviderError::Config(format!("Invalid endpoint '{}': {}", raw, e)))?;

        let key_param = match self.auth {
            AuthPlacement::Query(param) => Some(param),
            _ => None,
        };

        if !query.is_empty() || key_param.is_some() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
            if let Some(param) = key_param {
                pairs.append_pair(param, self.credential.expose());
            }
        }

        Ok(url)
    }

    /// POST a JSON body expecting `accept` back; non-2xx responses become `Http`
    /// without reading them as success
    pub async fn send(
        &self,
        url: Url,
        body: Vec<u8>,
        accept: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut headers = self.headers();
        headers.insert("Accept".to_string(), accept.to_string());

        // Path only: query-authenticated URLs carry the key
        tracing::debug!("POST {}{} (accept: {})", url.host_str().unwrap_or(""), url.path(), accept);

        let mut req_builder = self.http.post(url);
        for (name, value) in &headers {
            req_builder = req_builder.header(name.as_str(), value.as_str());
        }

        let response = req_builder.body(body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            tracing::debug!("Provider error body ({}): {}", status, error_text);
            return Err(ProviderError::Http { status });
        }

        Ok(response)
    }

    /// Send a single-shot request and extract the answer at `pointer`
    pub async fn complete(
        &self,
        url: Url,
        body: Vec<u8>,
        pointer: &str,
    ) -> Result<String, ProviderError> {
        let response = self.send(url, body, ACCEPT_JSON).await?;
        let response_text = response.text().await?;
        tracing::debug!("Provider response body: {}", response_text);

        extract_answer(&response_text, pointer)
    }
}
