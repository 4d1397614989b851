use serde::de::DeserializeOwned;

use crate::config::RuntimeConfig;
use crate::error::AppError;

use super::types::{ConversationTurn, SessionSummary};
use super::SessionReader;

/// Convert any displayable error into `AppError::Runtime`.
fn runtime_err(e: impl std::fmt::Display) -> AppError {
    AppError::Runtime(e.to_string())
}

/// HTTP client for the AI runtime gateways. One client serves every
/// instance; the host comes from the instance's container mapping.
pub struct RuntimeClient {
    http: reqwest::Client,
    scheme: String,
    api_key: Option<String>,
}

impl RuntimeClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(runtime_err)?;

        Ok(Self {
            http,
            scheme: config.scheme.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, host: &str, path: &str) -> String {
        format!("{}://{}{}", self.scheme, host.trim_end_matches('/'), path)
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Send a request, check the status code, and deserialize the JSON response.
    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, AppError> {
        req.send()
            .await
            .map_err(runtime_err)?
            .error_for_status()
            .map_err(runtime_err)?
            .json()
            .await
            .map_err(runtime_err)
    }
}

#[async_trait::async_trait]
impl SessionReader for RuntimeClient {
    /// `GET /containers/{container}/sessions`
    async fn list_sessions(&self, host: &str, container: &str) -> Result<Vec<SessionSummary>, AppError> {
        let url = self.url(host, &format!("/containers/{}/sessions", container));
        self.send_json(self.get(url)).await
    }

    /// `GET /containers/{container}/sessions/{id}/messages`
    async fn get_session_messages(
        &self,
        host: &str,
        container: &str,
        session_id: &str,
    ) -> Result<Vec<ConversationTurn>, AppError> {
        let url = self.url(
            host,
            &format!("/containers/{}/sessions/{}/messages", container, session_id),
        );
        self.send_json(self.get(url)).await
    }
}
