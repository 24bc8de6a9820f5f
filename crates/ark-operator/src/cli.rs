//!
//! # CLI for the ARK cluster operator
//!
//! Parameters are overwritten in the following sequence:
//!     1) default values
//!     2) environment variables
//!     3) cli parameters
//!

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::OperatorConfig;

#[derive(Debug, Parser)]
#[command(name = "ark-operator", about = "ARK: Survival Ascended cluster operator")]
pub struct OperatorOpt {
    #[command(subcommand)]
    pub command: OperatorCmd,
}

#[derive(Debug, Subcommand)]
pub enum OperatorCmd {
    /// Run the reconciliation controller
    Run(RunOpt),
    /// Print the ArkCluster CRD manifest
    Crd,
}

#[derive(Debug, Args)]
pub struct RunOpt {
    /// namespace watched for ArkCluster resources
    #[arg(short = 'n', long, env = "ARK_OP_NAMESPACE", default_value = "default")]
    namespace: String,

    /// reconcile worker count
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// log intended mutations without performing them
    #[arg(long)]
    dry_run: bool,

    /// how often idle clusters re-check for updates
    #[arg(long, value_parser = humantime::parse_duration, default_value = "15m")]
    update_interval: Duration,

    /// periodic full re-enqueue interval
    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    requeue_interval: Duration,

    /// shared RCON password for all managed servers
    #[arg(long, env = "ARK_OP_RCON_PASSWORD", hide_env_values = true)]
    rcon_password: Option<String>,

    /// base url of the SteamCMD web API
    #[arg(long, env = "ARK_OP_STEAM_API_URL")]
    steam_api_url: Option<String>,

    /// CurseForge API key; mod tracking is disabled without it
    #[arg(long, env = "ARK_OP_CURSEFORGE_API_KEY", hide_env_values = true)]
    curseforge_api_key: Option<String>,

    /// container image for server pods and install jobs
    #[arg(long, env = "ARK_OP_SERVER_IMAGE")]
    server_image: Option<String>,
}

impl RunOpt {
    pub fn into_config(self) -> OperatorConfig {
        let mut config = OperatorConfig {
            namespace: self.namespace,
            workers: self.workers.max(1),
            dry_run: self.dry_run,
            update_interval: self.update_interval,
            requeue_interval: self.requeue_interval,
            rcon_password: self.rcon_password,
            curseforge_api_key: self.curseforge_api_key,
            ..Default::default()
        };
        if let Some(url) = self.steam_api_url {
            config.steam_api_url = url;
        }
        if let Some(image) = self.server_image {
            config.server_image = image;
        }
        config
    }
}
