// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FleetLink.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Fleet API client
//!
//! Provisioning, device status and logs, and the application target commit
//! all go through the remote fleet API.

use crate::error::{Result, SupervisorError};
use async_trait::async_trait;
use chrono::Utc;
use fleetlink_core::{DeviceStatus, FleetError, Provisioner, StatusReporter};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Deserialize)]
struct ProvisionedDevice {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApplicationState {
    #[serde(default)]
    commit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FleetApiClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl FleetApiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("fleetlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SupervisorError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        })
    }

    #[must_use]
    pub fn with_retry_config(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Register a new device under `application_id`; returns its id.
    /// Sent once: a retry after a lost response would register the node
    /// twice.
    pub async fn provision(&self, application_id: &str) -> Result<String> {
        let url = format!("{}/v1/applications/{application_id}/devices", self.base_url);
        let response = self
            .request(Method::POST, &url)
            .json(&json!({}))
            .send()
            .await?;
        let device: ProvisionedDevice = check_status(response).await?.json().await?;
        debug!(application = %application_id, remote_id = %device.id, "Device provisioned");
        Ok(device.id)
    }

    pub async fn update_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        commit: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/v1/devices/{device_id}", self.base_url);
        let body = json!({
            "status": status,
            "online": status == DeviceStatus::Online,
            "commit": commit,
            "reported_at": Utc::now(),
        });
        let response = self
            .retry_request(|| self.request(Method::PATCH, &url).json(&body).send())
            .await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn post_log(&self, device_id: &str, message: &str) -> Result<()> {
        let url = format!("{}/v1/devices/{device_id}/logs", self.base_url);
        let body = json!({
            "message": message,
            "timestamp": Utc::now(),
        });
        let response = self
            .retry_request(|| self.request(Method::POST, &url).json(&body).send())
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Commit the application should run, if the fleet API has one
    pub async fn target_commit(&self, application_id: &str) -> Result<Option<String>> {
        let url = format!("{}/v1/applications/{application_id}", self.base_url);
        let response = self
            .retry_request(|| self.request(Method::GET, &url).send())
            .await?;
        let state: ApplicationState = check_status(response).await?.json().await?;
        Ok(state.commit.filter(|c| !c.is_empty()))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Retry transport failures with exponential backoff
    async fn retry_request<F, Fut>(&self, mut request_fn: F) -> Result<Response>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<Response, reqwest::Error>>,
    {
        let mut attempts = 0;
        let mut delay = self.retry_delay;

        loop {
            attempts += 1;
            match request_fn().await {
                Ok(response) => return Ok(response),
                Err(e) if attempts >= self.max_retries => {
                    error!("Request failed after {attempts} attempts: {e}");
                    return Err(SupervisorError::Http(e));
                }
                Err(e) => {
                    warn!(
                        "Request failed (attempt {attempts}/{}): {e}. Retrying in {delay:?}",
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}

async fn check_status(response: Response) -> Result<Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SupervisorError::AuthenticationFailed)
        }
        status => {
            let message = response.text().await.unwrap_or_default();
            Err(SupervisorError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl Provisioner for FleetApiClient {
    async fn provision_device(&self, application_id: &str) -> fleetlink_core::Result<String> {
        self.provision(application_id)
            .await
            .map_err(|e| FleetError::Api(e.to_string()))
    }
}

#[async_trait]
impl StatusReporter for FleetApiClient {
    async fn report_status(&self, remote_id: &str, status: DeviceStatus, commit: Option<&str>) {
        if let Err(e) = self.update_status(remote_id, status, commit).await {
            warn!(device = %remote_id, "Failed to report status: {e}");
        }
    }

    async fn report_log(&self, remote_id: &str, message: &str) {
        if let Err(e) = self.post_log(remote_id, message).await {
            warn!(device = %remote_id, "Failed to report log: {e}");
        }
    }
}
