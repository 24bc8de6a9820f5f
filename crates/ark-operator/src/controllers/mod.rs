//! Cluster controller: dispatch loop plus a fixed reconcile worker pool.
//!
//! The dispatch loop periodically lists every cluster in the watched
//! namespace and enqueues its key; workers drain the queue, taking the
//! per-cluster lock so no two passes over the same cluster interleave.
//! Reconcile passes that wait on an external condition re-enqueue
//! themselves with a delay instead of occupying a worker.

use tracing::{debug, error, info, instrument};

use crate::api::ClusterKey;
use crate::context::SharedContext;
use crate::reconcile::Next;

pub struct ClusterController(SharedContext);

impl ClusterController {
    pub fn start(ctx: SharedContext) {
        let controller = Self(ctx);
        controller.run();
    }

    fn run(self) {
        let workers = self.0.config().workers;
        info!(workers, "starting cluster controller");
        for id in 0..workers {
            let ctx = self.0.clone();
            tokio::spawn(async move { worker_loop(ctx, id).await });
        }
        tokio::spawn(async move { self.dispatch_loop().await });
    }

    #[instrument(skip(self))]
    async fn dispatch_loop(self) {
        let mut interval = tokio::time::interval(self.0.config().requeue_interval);
        loop {
            interval.tick().await;
            match self.0.api().list_clusters().await {
                Ok(clusters) => {
                    debug!(count = clusters.len(), "periodic re-enqueue");
                    let keys: Vec<ClusterKey> =
                        clusters.iter().map(|cluster| cluster.meta.key()).collect();
                    for key in &keys {
                        self.0.queue().enqueue(key.clone());
                    }
                    self.0.prune_locks(&keys);
                }
                Err(err) => {
                    error!(%err, "cluster listing failed");
                }
            }
        }
    }
}

#[instrument(skip(ctx))]
async fn worker_loop(ctx: SharedContext, id: usize) {
    debug!("worker started");
    while let Some(key) = ctx.queue().next().await {
        let lock = ctx.lock_for(&key);
        let _guard = lock.lock().await;
        match ctx.reconciler().reconcile(&key).await {
            Ok(Next::Done) => {}
            Ok(Next::RequeueAfter(delay)) => {
                ctx.queue().enqueue_after(key, delay);
            }
            Err(err) => {
                error!(%key, %err, "reconcile failed");
                ctx.queue()
                    .enqueue_after(key, ctx.config().poll_interval);
            }
        }
    }
    debug!("worker terminated");
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use ark_model::ArkClusterSpec;
    use ark_rcon::RconError;
    use ark_updates::UpdateCheck;

    use crate::api::memory::MemoryClusterApi;
    use crate::api::{ClusterApi, ClusterKey};
    use crate::config::OperatorConfig;
    use crate::console::Console;
    use crate::context::Context;
    use crate::reconcile::{Reconciler, UpdateSource};

    struct QuietUpdates;

    #[async_trait]
    impl UpdateSource for QuietUpdates {
        async fn check(
            &self,
            _current_build: Option<u64>,
            _tracked_mods: &[u32],
            _known_mods: &std::collections::BTreeMap<String, String>,
        ) -> UpdateCheck {
            UpdateCheck::default()
        }
    }

    struct NoConsole;

    #[async_trait]
    impl Console for NoConsole {
        async fn run(&self, _: &str, _: u16, _: &str) -> Result<String, RconError> {
            Ok(String::new())
        }
    }

    fn test_context(api: &Arc<MemoryClusterApi>, config: OperatorConfig) -> crate::context::SharedContext {
        let reconciler = Reconciler::new(
            Arc::clone(api) as Arc<dyn ClusterApi>,
            Arc::new(NoConsole),
            Arc::new(QuietUpdates),
            config.clone(),
        );
        Context::shared(config, Arc::clone(api) as Arc<dyn ClusterApi>, reconciler)
    }

    #[tokio::test]
    async fn test_lock_table_drops_deleted_clusters() {
        let api = Arc::new(MemoryClusterApi::new());
        let ctx = test_context(&api, OperatorConfig::default());

        let keep = ClusterKey::new("games", "asa");
        let gone = ClusterKey::new("games", "retired");
        let busy = ClusterKey::new("games", "migrating");

        let kept_entry = Arc::downgrade(&ctx.lock_for(&keep));
        let gone_entry = Arc::downgrade(&ctx.lock_for(&gone));
        let busy_lock = ctx.lock_for(&busy);
        let _guard = busy_lock.lock().await;

        ctx.prune_locks(&[keep.clone()]);

        // live key survives, deleted key is dropped, held lock survives
        // its cluster's deletion until the pass releases it
        assert!(kept_entry.upgrade().is_some());
        assert!(gone_entry.upgrade().is_none());
        assert!(Arc::ptr_eq(&ctx.lock_for(&busy), &busy_lock));
    }

    #[tokio::test]
    async fn test_dispatch_drives_cluster_to_completion() {
        let api = Arc::new(MemoryClusterApi::new());
        let key = ClusterKey::new("games", "asa");
        let mut spec = ArkClusterSpec::default();
        spec.server.maps = vec!["TheIsland_WP".to_owned()];
        api.insert_cluster(&key, spec);

        let mut config = OperatorConfig::default();
        config.workers = 2;
        config.requeue_interval = Duration::from_millis(10);
        config.poll_interval = Duration::from_millis(5);

        let ctx = test_context(&api, config);
        super::ClusterController::start(Arc::clone(&ctx));

        // feed the externally-driven conditions as the passes reach them
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            api.bind_volumes(&key);
            if api.has_job(&key, "asa-init") {
                api.complete_job(&key, "asa-init", None);
            }
            if api.status(&key).state == ark_model::ClusterState::Idle {
                break;
            }
        }

        assert_eq!(api.status(&key).state, ark_model::ClusterState::Idle);
        assert_eq!(api.pod_names(&key), vec!["asa-theisland".to_owned()]);
        ctx.queue().close();
    }
}
