//! Thin HTTP client for the hosted, OpenAI-compatible model service.
//!
//! Embedding, chat completion, text recognition and speech all go through
//! [`ApiClient`]. The API key is read from the environment on every call,
//! so a missing credential surfaces as [`ServiceError::CredentialMissing`]
//! at the call that needs it instead of an opaque HTTP 401 later.
//!
//! Calls are made once. There is no retry: failures are returned to the
//! caller, which leaves its own state untouched.

use std::time::Duration;

use crate::config::ApiConfig;
use crate::error::ServiceError;

/// How a failed call is reported. Each service maps failures to its own
/// [`ServiceError`] variant.
pub type ErrorKind = fn(String) -> ServiceError;

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    key_env: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_env: config.key_env.clone(),
            http,
        }
    }

    /// Read the API key. Empty values count as missing.
    pub fn api_key(&self) -> Result<String, ServiceError> {
        match std::env::var(&self.key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ServiceError::CredentialMissing(self.key_env.clone())),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body and return the raw successful response.
    pub async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        kind: ErrorKind,
    ) -> Result<reqwest::Response, ServiceError> {
        let api_key = self.api_key()?;
        let url = self.url(path);
        tracing::debug!(%url, "calling model service");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| kind(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(kind(format!("API error {}: {}", status, body_text)));
        }
        Ok(response)
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        kind: ErrorKind,
    ) -> Result<serde_json::Value, ServiceError> {
        let response = self.post(path, body, kind).await?;
        response
            .json()
            .await
            .map_err(|e| kind(format!("invalid JSON response: {}", e)))
    }
}
