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

//! Firmware distribution with SHA256 verification
//!
//! Firmware for an application commit is published as `application.bin`,
//! `application.dat` and a `SHA256SUMS` file. Files are downloaded into a
//! temp directory, verified, then moved to
//! `<root>/<application>/<commit>` in one rename.

use crate::error::{Result, SupervisorError};
use async_trait::async_trait;
use fleetlink_core::{FirmwareSource, FleetError};
use fleetlink_dfu::firmware::{BINARY_FILE, INIT_DATA_FILE};
use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const CHECKSUM_FILE: &str = "SHA256SUMS";

const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(5)];

#[derive(Debug, Clone)]
pub struct HttpFirmwareSource {
    base_url: String,
    api_key: Option<String>,
    client: Client,
    root: PathBuf,
    retry_delays: Vec<Duration>,
}

impl HttpFirmwareSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("fleetlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SupervisorError::Download(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            root: root.into(),
            retry_delays: RETRY_DELAYS.to_vec(),
        })
    }

    /// Pause before each retry; an empty list disables retries
    #[must_use]
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// `<root>/<application>/<commit>`. Both ids must be a single plain
    /// path segment so the result never leaves the firmware root.
    pub fn commit_dir(&self, application_id: &str, commit: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join(path_segment(application_id, "application id")?)
            .join(path_segment(commit, "commit")?))
    }

    /// Directory holding verified firmware for `commit`, downloading it
    /// first when it is not on disk yet
    pub async fn fetch(&self, application_id: &str, commit: &str) -> Result<PathBuf> {
        let target = self.commit_dir(application_id, commit)?;
        if is_extracted(&target) {
            debug!(application = %application_id, commit, "Firmware already extracted");
            return Ok(target);
        }

        let mut last_error = None;
        for attempt in 0..=self.retry_delays.len() {
            if attempt > 0 {
                warn!(
                    "Retrying firmware download (attempt {}/{})",
                    attempt + 1,
                    self.retry_delays.len() + 1
                );
                tokio::time::sleep(self.retry_delays[attempt - 1]).await;
            }

            match self.download_and_verify(application_id, commit, &target).await {
                Ok(()) => {
                    info!(application = %application_id, commit, "Firmware ready in {}", target.display());
                    return Ok(target);
                }
                // A checksum mismatch will not fix itself
                Err(e @ SupervisorError::ChecksumMismatch { .. }) => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| SupervisorError::Download("No error recorded".to_string())))
    }

    async fn download_and_verify(
        &self,
        application_id: &str,
        commit: &str,
        target: &Path,
    ) -> Result<()> {
        let app_root = self.root.join(application_id);
        tokio::fs::create_dir_all(&app_root).await?;
        let staging = app_root.join(format!(".{commit}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging).await?;

        let result = self.download_into(application_id, commit, &staging).await;
        if result.is_ok() {
            if tokio::fs::try_exists(target).await? {
                tokio::fs::remove_dir_all(target).await?;
            }
            tokio::fs::rename(&staging, target).await?;
        } else if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            warn!("Failed to clean up {}: {e}", staging.display());
        }
        result
    }

    async fn download_into(&self, application_id: &str, commit: &str, staging: &Path) -> Result<()> {
        let base = format!(
            "{}/v1/applications/{application_id}/firmware/{commit}",
            self.base_url
        );
        let checksums = self.download_to_string(&format!("{base}/{CHECKSUM_FILE}")).await?;

        for file in [BINARY_FILE, INIT_DATA_FILE] {
            let expected = parse_sha256sums(&checksums, file)?;
            let actual = self
                .download_with_checksum(&format!("{base}/{file}"), &staging.join(file))
                .await?;
            if actual != expected {
                return Err(SupervisorError::ChecksumMismatch {
                    file: file.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SupervisorError::Download(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SupervisorError::Download(format!(
                "Download of {url} failed with status: {}",
                response.status()
            )));
        }
        Ok(response)
    }

    async fn download_to_string(&self, url: &str) -> Result<String> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| SupervisorError::Download(format!("Failed to read response: {e}")))
    }

    async fn download_with_checksum(&self, url: &str, path: &Path) -> Result<String> {
        let mut stream = self.get(url).await?.bytes_stream();
        let mut file = tokio::fs::File::create(path).await?;
        let mut hasher = Sha256::new();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| SupervisorError::Download(format!("Failed to read body: {e}")))?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn path_segment<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(segment)), None) if segment == value => Ok(value),
        _ => Err(SupervisorError::Download(format!(
            "{what} '{value}' is not a plain directory name"
        ))),
    }
}

fn is_extracted(dir: &Path) -> bool {
    dir.join(BINARY_FILE).is_file() && dir.join(INIT_DATA_FILE).is_file()
}

/// Expected digest for `file_name` from `sha256sum`-style output
fn parse_sha256sums(content: &str, file_name: &str) -> Result<String> {
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if let [hash, name, ..] = parts.as_slice()
            && name.trim_start_matches('*') == file_name
        {
            return Ok(hash.to_lowercase());
        }
    }

    Err(SupervisorError::Download(format!(
        "{CHECKSUM_FILE} does not contain entry for {file_name}"
    )))
}

#[async_trait]
impl FirmwareSource for HttpFirmwareSource {
    async fn fetch_and_extract(
        &self,
        application_id: &str,
        commit: &str,
    ) -> fleetlink_core::Result<PathBuf> {
        self.fetch(application_id, commit)
            .await
            .map_err(|e| FleetError::Firmware {
                commit: commit.to_string(),
                message: e.to_string(),
            })
    }
}
