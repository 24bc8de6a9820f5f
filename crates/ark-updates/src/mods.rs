//! Mod change detection against the CurseForge API.
//!
//! A mod is considered changed when the upload timestamp of its newest file
//! moves; the timestamp itself is the version token recorded in status.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::UpdateError;

/// Registry exposing the last-modified stamp of a mod's newest file.
#[async_trait]
pub trait ModRegistry: Send + Sync {
    async fn latest_file_stamp(&self, mod_id: u32) -> Result<String, UpdateError>;
}

pub const DEFAULT_CURSEFORGE_API_URL: &str = "https://api.curseforge.com";

#[derive(Debug)]
pub struct CurseForgeApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CurseForgeApi {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpdateError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(UpdateError::MissingAuth);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl ModRegistry for CurseForgeApi {
    async fn latest_file_stamp(&self, mod_id: u32) -> Result<String, UpdateError> {
        let url = format!("{}/v1/mods/{mod_id}", self.base_url);
        debug!(%url, "fetching mod metadata");
        let body: Value = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.pointer("/data/latestFiles/0/fileDate")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| UpdateError::Parse(format!("mod {mod_id} has no latest file")))
    }
}
