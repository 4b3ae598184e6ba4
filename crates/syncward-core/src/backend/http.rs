// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for the platform's internal API.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | `get_state` | `POST /api/v1/state/get` |
//! | `create_or_update_state` | `POST /api/v1/state/create_or_update` |
//! | `save_stats` | `POST /api/v1/attempt/save_stats` |
//! | `create` | `POST /api/v1/workload/create` (204 created, 200 already exists) |
//! | `get` | `GET /api/v1/workload/{id}` |
//! | `cancel` | `PUT /api/v1/workload/cancel` (410 when already terminal) |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::{AttemptApi, ConnectionState, SaveStatsRequest, StateApi};
use crate::workload::{CreateOutcome, Workload, WorkloadApi, WorkloadCreateRequest};

/// Connection settings for [`HttpApiClient`].
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// Base URL, e.g. `http://platform:8001`
    pub base_url: String,
    /// Bearer token sent with every request
    pub auth_token: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl HttpApiConfig {
    /// Config for `base_url` with a 30 second timeout and no auth.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Send `token` as a bearer token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionIdRequest {
    connection_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrUpdateStateRequest<'a> {
    connection_id: Uuid,
    connection_state: &'a ConnectionState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadCancelRequest<'a> {
    workload_id: &'a str,
    reason: &'a str,
    source: &'a str,
}

/// reqwest-based implementation of [`StateApi`], [`AttemptApi`] and [`WorkloadApi`].
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: reqwest::Client,
    config: HttpApiConfig,
}

impl HttpApiClient {
    /// Build a client.
    pub fn new(config: HttpApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, self.url(path));
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Map non-success statuses to [`ApiError`].
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::SERVICE_UNAVAILABLE => ApiError::Unavailable(message),
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::GONE => ApiError::Gone(message),
        other => ApiError::Http {
            status: other.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl StateApi for HttpApiClient {
    async fn get_state(&self, connection_id: Uuid) -> Result<ConnectionState, ApiError> {
        let response = self
            .request(reqwest::Method::POST, "/api/v1/state/get")
            .json(&ConnectionIdRequest { connection_id })
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn create_or_update_state(&self, state: &ConnectionState) -> Result<(), ApiError> {
        let response = self
            .request(reqwest::Method::POST, "/api/v1/state/create_or_update")
            .json(&CreateOrUpdateStateRequest {
                connection_id: state.connection_id,
                connection_state: state,
            })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl AttemptApi for HttpApiClient {
    async fn save_stats(&self, request: &SaveStatsRequest) -> Result<(), ApiError> {
        let response = self
            .request(reqwest::Method::POST, "/api/v1/attempt/save_stats")
            .json(request)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkloadApi for HttpApiClient {
    async fn create(&self, request: &WorkloadCreateRequest) -> Result<CreateOutcome, ApiError> {
        let response = self
            .request(reqwest::Method::POST, "/api/v1/workload/create")
            .json(request)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CONFLICT => {
                debug!(workload_id = %request.workload_id, "Workload already exists");
                Ok(CreateOutcome::AlreadyExists)
            }
            _ => {
                check_status(response).await?;
                Ok(CreateOutcome::Created)
            }
        }
    }

    async fn get(&self, workload_id: &str) -> Result<Workload, ApiError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/api/v1/workload/{workload_id}"))
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn cancel(&self, workload_id: &str, reason: &str, source: &str) -> Result<(), ApiError> {
        let response = self
            .request(reqwest::Method::PUT, "/api/v1/workload/cancel")
            .json(&WorkloadCancelRequest {
                workload_id,
                reason,
                source,
            })
            .send()
            .await?;

        match check_status(response).await {
            Ok(_) => Ok(()),
            Err(ApiError::Gone(_)) => {
                debug!(workload_id, "Workload already terminal, nothing to cancel");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
