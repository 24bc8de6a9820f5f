//! Shared controller context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::api::{ClusterApi, ClusterKey};
use crate::config::OperatorConfig;
use crate::queue::WorkQueue;
use crate::reconcile::Reconciler;

pub type SharedContext = Arc<Context>;

pub struct Context {
    config: OperatorConfig,
    api: Arc<dyn ClusterApi>,
    queue: Arc<WorkQueue>,
    reconciler: Reconciler,
    // one lock per cluster: a key dequeued while its previous pass still
    // runs waits instead of racing it
    locks: Mutex<HashMap<ClusterKey, Arc<async_lock::Mutex<()>>>>,
}

impl Context {
    pub fn shared(
        config: OperatorConfig,
        api: Arc<dyn ClusterApi>,
        reconciler: Reconciler,
    ) -> SharedContext {
        Arc::new(Self {
            config,
            api,
            queue: WorkQueue::new(),
            reconciler,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn api(&self) -> &Arc<dyn ClusterApi> {
        &self.api
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn lock_for(&self, key: &ClusterKey) -> Arc<async_lock::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Drop lock entries for clusters that no longer exist. An entry a
    /// worker still holds (or waits on) stays until released.
    pub fn prune_locks(&self, live: &[ClusterKey]) {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        locks.retain(|key, lock| live.contains(key) || Arc::strong_count(lock) > 1);
    }
}
