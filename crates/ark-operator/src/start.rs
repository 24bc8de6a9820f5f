//! Operator startup.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use ark_updates::{CurseForgeApi, SteamWebApi, UpdateDetector};

use crate::api::k8::K8ClusterApi;
use crate::config::OperatorConfig;
use crate::console::RconConsole;
use crate::context::Context;
use crate::controllers::ClusterController;
use crate::reconcile::Reconciler;

/// Wire everything up and run until interrupted.
pub async fn run(config: OperatorConfig) -> Result<()> {
    info!(
        namespace = %config.namespace,
        workers = config.workers,
        dry_run = config.dry_run,
        "starting ark operator"
    );

    let client = k8_client::load_and_share().context("loading kubernetes config")?;
    let api = K8ClusterApi::new(client, &config.namespace, config.dry_run);

    let build_source = SteamWebApi::new(config.steam_api_url.clone(), config.registry_timeout)
        .context("building steam api client")?;
    let mod_registry = match &config.curseforge_api_key {
        Some(key) => Some(Arc::new(CurseForgeApi::new(
            config.curseforge_api_url.clone(),
            key.clone(),
            config.registry_timeout,
        )?) as Arc<dyn ark_updates::ModRegistry>),
        None => {
            warn!("no curseforge api key, mod update tracking disabled");
            None
        }
    };
    let detector = UpdateDetector::new(Arc::new(build_source), mod_registry, config.cache_ttl);

    let password = config.rcon_password.clone().unwrap_or_default();
    if password.is_empty() {
        warn!("no rcon password configured, restart warnings will not reach players");
    }
    let console = RconConsole::new(password, config.rcon_timeout);

    let reconciler = Reconciler::new(
        api.clone(),
        Arc::new(console),
        Arc::new(detector),
        config.clone(),
    );
    let ctx = Context::shared(config, api, reconciler);
    ClusterController::start(Arc::clone(&ctx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    ctx.queue().close();
    Ok(())
}
