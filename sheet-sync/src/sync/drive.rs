//! Google Drive v3 store
//!
//! Authenticated calls use a bearer access token obtained elsewhere. Without
//! a token only downloads work, through the public usercontent endpoint.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::store::RemoteStore;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://drive.usercontent.google.com";

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Non-success HTTP response
#[derive(Debug, Clone)]
pub struct HttpStatusError {
    pub status: u16,
    pub message: String,
}

impl std::fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}: {}", self.status, self.message)
    }
}

impl std::error::Error for HttpStatusError {}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Endpoints used by `DriveStore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveEndpoints {
    pub api_base: String,
    pub upload_base: String,
    pub download_base: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriveStore {
    client: Client,
    access_token: Option<String>,
    endpoints: DriveEndpoints,
}

impl DriveStore {
    pub fn new(access_token: Option<String>, endpoints: DriveEndpoints) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;
        let endpoints = DriveEndpoints {
            api_base: endpoints.api_base.trim_end_matches('/').to_string(),
            upload_base: endpoints.upload_base.trim_end_matches('/').to_string(),
            download_base: endpoints.download_base.trim_end_matches('/').to_string(),
        };
        Ok(Self {
            client,
            access_token: access_token.filter(|t| !t.trim().is_empty()),
            endpoints,
        })
    }

    pub fn has_token(&self) -> bool {
        self.access_token.is_some()
    }

    fn token(&self, op: &str) -> Result<&str> {
        match self.access_token.as_deref() {
            Some(token) => Ok(token),
            None => bail!("Google Drive {} requires an access token", op),
        }
    }

    fn media_url(&self, id: &str) -> String {
        format!(
            "{}/files/{}?alt=media&supportsAllDrives=true",
            self.endpoints.api_base,
            urlencoding::encode(id)
        )
    }

    fn public_download_url(&self, id: &str) -> String {
        format!(
            "{}/download?id={}&export=download&confirm=t",
            self.endpoints.download_base,
            urlencoding::encode(id)
        )
    }

    fn search_url(&self, name: &str) -> String {
        format!(
            "{}/files?q={}&fields=files(id,name)&pageSize=10&supportsAllDrives=true&includeItemsFromAllDrives=true",
            self.endpoints.api_base,
            urlencoding::encode(&name_query(name))
        )
    }

    fn update_media_url(&self, id: &str) -> String {
        format!(
            "{}/files/{}?uploadType=media&supportsAllDrives=true",
            self.endpoints.upload_base,
            urlencoding::encode(id)
        )
    }

    fn create_media_url(&self) -> String {
        format!("{}/files?uploadType=media&supportsAllDrives=true", self.endpoints.upload_base)
    }

    fn metadata_url(&self, id: &str) -> String {
        format!(
            "{}/files/{}?supportsAllDrives=true",
            self.endpoints.api_base,
            urlencoding::encode(id)
        )
    }
}

/// Drive search expression for an exact, non-trashed name
fn name_query(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    format!("name = '{}' and trashed = false", escaped)
}

/// Turn a non-success response into an `HttpStatusError`
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(HttpStatusError {
        status: status.as_u16(),
        message: message.chars().take(300).collect(),
    }
    .into())
}

#[async_trait]
impl RemoteStore for DriveStore {
    fn describe(&self) -> String {
        "Google Drive".to_string()
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>> {
        let request = match self.access_token.as_deref() {
            Some(token) => self.client.get(self.media_url(id)).bearer_auth(token),
            None => {
                log::debug!("No access token, using public download for {}", id);
                self.client.get(self.public_download_url(id))
            }
        };

        let response = request
            .send()
            .await
            .with_context(|| format!("Request for Drive file {} failed", id))?;
        let response = check(response)
            .await
            .with_context(|| format!("Drive refused download of {}", id))?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read Drive file {}", id))?;

        log::info!("Downloaded {} bytes from Drive file {}", bytes.len(), id);
        Ok(bytes.to_vec())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<String>> {
        let token = self.token("search")?;
        let response = self
            .client
            .get(self.search_url(name))
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Drive search for '{}' failed", name))?;
        let list: FileList = check(response)
            .await
            .with_context(|| format!("Drive refused search for '{}'", name))?
            .json()
            .await
            .context("Unexpected Drive search response")?;

        if list.files.len() > 1 {
            log::warn!(
                "{} Drive files named '{}'; using {}",
                list.files.len(),
                name,
                list.files[0].id
            );
        }
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn upload(&self, bytes: Vec<u8>, name: &str, existing_id: Option<&str>) -> Result<String> {
        let token = self.token("upload")?;
        let size = bytes.len();

        if let Some(id) = existing_id {
            let response = self
                .client
                .patch(self.update_media_url(id))
                .bearer_auth(token)
                .header(reqwest::header::CONTENT_TYPE, XLSX_MIME)
                .body(bytes)
                .send()
                .await
                .with_context(|| format!("Upload to Drive file {} failed", id))?;
            let file: DriveFile = check(response)
                .await
                .with_context(|| format!("Drive refused update of {}", id))?
                .json()
                .await
                .context("Unexpected Drive upload response")?;
            log::info!("Updated Drive file {} ({} bytes)", file.id, size);
            return Ok(file.id);
        }

        let response = self
            .client
            .post(self.create_media_url())
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, XLSX_MIME)
            .body(bytes)
            .send()
            .await
            .context("Drive file creation failed")?;
        let created: DriveFile = check(response)
            .await
            .context("Drive refused file creation")?
            .json()
            .await
            .context("Unexpected Drive create response")?;

        let response = self
            .client
            .patch(self.metadata_url(&created.id))
            .bearer_auth(token)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .with_context(|| format!("Renaming Drive file {} failed", created.id))?;
        let renamed: DriveFile = check(response)
            .await
            .with_context(|| format!("Drive refused rename of {}", created.id))?
            .json()
            .await
            .context("Unexpected Drive metadata response")?;

        log::info!("Created Drive file {} '{}' ({} bytes)", renamed.id, renamed.name, size);
        Ok(renamed.id)
    }
}
