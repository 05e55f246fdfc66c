use super::{FetchOutcome, RemoteError, RemoteStore, decode_payload};
use crate::models::Snapshot;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

/// Remote store reached over HTTP.
///
/// - `GET {base}/state` returns the snapshot as JSON, or 204 / an empty body
///   when nothing has been stored yet.
/// - `POST {base}/state` with the full snapshot replaces it.
///
/// A successful response whose `Content-Type` is not JSON is reported as
/// [`RemoteError::UnexpectedContentType`]. That usually means a proxy or
/// dev server answered with an HTML page in place of the API.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/state", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// `application/json` or any `+json` structured suffix, parameters ignored.
fn is_json_content_type(value: &str) -> bool {
    let media_type = value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    media_type == "application/json" || media_type.ends_with("+json")
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch(&self) -> Result<FetchOutcome, RemoteError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(FetchOutcome::Empty);
        }
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if let Some(found) = content_type.filter(|ct| !is_json_content_type(ct)) {
            return Err(RemoteError::UnexpectedContentType { found });
        }

        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;

        decode_payload(&body)
    }

    async fn replace(&self, snapshot: &Snapshot) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(snapshot)
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}
