//! Operator configuration.
//!
//! Every recognized option with its default, validated at construction;
//! no dynamic keyword bags.

use std::time::Duration;

use ark_updates::{DEFAULT_CURSEFORGE_API_URL, DEFAULT_STEAM_API_URL};

pub const DEFAULT_SERVER_IMAGE: &str = "ghcr.io/mort-is/ark-server:latest";

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace watched for `ArkCluster` resources.
    pub namespace: String,
    /// Fixed reconcile worker pool size.
    pub workers: usize,
    /// Log intended mutations without performing them.
    pub dry_run: bool,
    /// How often an idle cluster re-checks for updates.
    pub update_interval: Duration,
    /// Periodic full re-enqueue of every cluster.
    pub requeue_interval: Duration,
    /// Delay between readiness/job polls.
    pub poll_interval: Duration,
    /// Readiness polls per map before a rollout step is marked failed.
    pub max_poll_attempts: u32,
    /// Install job retry budget before the cluster enters `Error`.
    pub job_retries: u32,
    /// Status-write conflict retries per reconcile pass.
    pub conflict_retries: u32,
    pub rcon_password: Option<String>,
    pub rcon_timeout: Duration,
    pub registry_timeout: Duration,
    /// TTL of cached build/mod registry answers.
    pub cache_ttl: Duration,
    pub steam_api_url: String,
    pub curseforge_api_url: String,
    pub curseforge_api_key: Option<String>,
    /// Image for server pods and install jobs.
    pub server_image: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_owned(),
            workers: 2,
            dry_run: false,
            update_interval: Duration::from_secs(15 * 60),
            requeue_interval: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: 60,
            job_retries: 3,
            conflict_retries: 3,
            rcon_password: None,
            rcon_timeout: Duration::from_secs(5),
            registry_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(15 * 60),
            steam_api_url: DEFAULT_STEAM_API_URL.to_owned(),
            curseforge_api_url: DEFAULT_CURSEFORGE_API_URL.to_owned(),
            curseforge_api_key: None,
            server_image: DEFAULT_SERVER_IMAGE.to_owned(),
        }
    }
}
