//! Latest-build lookup against a SteamCMD web API.
//!
//! Only the build identifier is consumed; no content is downloaded.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::UpdateError;

/// ARK: Survival Ascended dedicated server app id.
pub const ASA_SERVER_APP_ID: u32 = 2430930;

pub const DEFAULT_STEAM_API_URL: &str = "https://api.steamcmd.net";

/// Source of the latest published build id for a Steam app.
#[async_trait]
pub trait BuildSource: Send + Sync {
    async fn latest_build(&self, app_id: u32) -> Result<u64, UpdateError>;
}

#[derive(Debug)]
pub struct SteamWebApi {
    client: reqwest::Client,
    base_url: String,
}

impl SteamWebApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl BuildSource for SteamWebApi {
    async fn latest_build(&self, app_id: u32) -> Result<u64, UpdateError> {
        let url = format!("{}/v1/info/{app_id}", self.base_url);
        debug!(%url, "fetching latest build id");
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let build = body
            .pointer(&format!(
                "/data/{app_id}/depots/branches/public/buildid"
            ))
            .and_then(|v| v.as_str())
            .ok_or_else(|| UpdateError::Parse("missing public branch buildid".to_owned()))?;

        build
            .parse()
            .map_err(|_| UpdateError::Parse(format!("buildid is not a number: {build}")))
    }
}
