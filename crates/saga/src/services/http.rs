//! Shared plumbing for the HTTP collaborators.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{Result, SagaError};

/// Builds a client whose requests give up after `timeout`.
pub(crate) fn client(service: &'static str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SagaError::Collaborator {
            service,
            reason: format!("Failed to create HTTP client: {e}"),
        })
}

/// Joins a base URL and a resource id.
pub(crate) fn resource_url(base_url: &str, id: impl std::fmt::Display) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), id)
}

/// Fetches a JSON resource, mapping 404 to `None`.
pub(crate) async fn get_optional<T: DeserializeOwned>(
    client: &Client,
    service: &'static str,
    url: &str,
) -> Result<Option<T>> {
    let response = client.get(url).send().await.map_err(|e| {
        tracing::warn!(service, url, error = %e, "collaborator request failed");
        SagaError::Collaborator {
            service,
            reason: format!("request failed: {e}"),
        }
    })?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        tracing::warn!(service, url, status = %status, "collaborator returned error");
        return Err(SagaError::Collaborator {
            service,
            reason: format!("{url} returned {status}"),
        });
    }

    response
        .json()
        .await
        .map(Some)
        .map_err(|e| SagaError::Collaborator {
            service,
            reason: format!("Failed to parse response: {e}"),
        })
}
