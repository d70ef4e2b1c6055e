//! Name lookup service.
//!
//! The profile asks a [`NameService`] for the user's display name. The HTTP
//! implementation expects a JSON body of the form `{"name": "Andrew"}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum NameServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("name service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response carried no name")]
    MissingName,

    #[error("name service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait NameService: Send + Sync {
    async fn fetch_name(&self) -> Result<String, NameServiceError>;
}

#[derive(Debug, Deserialize)]
struct NamePayload {
    name: Option<String>,
}

/// Parse a `{"name": ...}` body into a trimmed, non-empty name.
pub fn decode_name(body: &str) -> Result<String, NameServiceError> {
    let payload: NamePayload = serde_json::from_str(body)?;
    payload
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or(NameServiceError::MissingName)
}

/// Fetches the name from an HTTP endpoint.
pub struct HttpNameService {
    client: reqwest::Client,
    url: String,
}

impl HttpNameService {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NameService for HttpNameService {
    async fn fetch_name(&self) -> Result<String, NameServiceError> {
        debug!(url = %self.url, "fetching name");

        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NameServiceError::Status { status, body });
        }

        let body = response.text().await?;
        decode_name(&body)
    }
}

/// In-process name service with optional latency and failure.
#[derive(Debug, Clone)]
pub struct StaticNameService {
    name: String,
    delay: Duration,
    failure: Option<String>,
}

impl StaticNameService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            failure: None,
        }
    }

    /// A service whose every lookup fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            delay: Duration::ZERO,
            failure: Some(reason.into()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl NameService for StaticNameService {
    async fn fetch_name(&self) -> Result<String, NameServiceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.failure {
            Some(reason) => Err(NameServiceError::Unavailable(reason.clone())),
            None => Ok(self.name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_name() {
        assert_eq!(decode_name(r#"{"name":"Andrew"}"#).unwrap(), "Andrew");
        assert_eq!(decode_name(r#"{"name":"  Andrew "}"#).unwrap(), "Andrew");
    }

    #[test]
    fn test_decode_rejects_missing_or_blank_name() {
        assert!(matches!(
            decode_name(r#"{}"#),
            Err(NameServiceError::MissingName)
        ));
        assert!(matches!(
            decode_name(r#"{"name":""}"#),
            Err(NameServiceError::MissingName)
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_name("<html>"),
            Err(NameServiceError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_static_service() {
        let service = StaticNameService::new("Andrew");
        assert_eq!(service.fetch_name().await.unwrap(), "Andrew");

        let service = StaticNameService::failing("offline");
        let err = service.fetch_name().await.unwrap_err();
        assert_eq!(err.to_string(), "name service unavailable: offline");
    }
}
