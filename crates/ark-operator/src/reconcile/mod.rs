//! Cluster reconciliation.
//!
//! One pass reads the cluster, converges owned objects toward the spec and
//! advances the state machine by at most one transition, then writes status
//! conditionally on the resource version it read. Passes are idempotent;
//! anything waiting on an external condition reports a requeue delay
//! instead of blocking a worker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use ark_model::{
    ArkClusterSpec, ArkClusterStatus, ClusterState, GameMap, RestartIntent, RestartKind,
    VolumeName,
};
use ark_updates::{UpdateCheck, UpdateDetector};

use crate::api::{ClusterApi, ClusterApiError, ClusterKey, ClusterMeta, ClusterObject, Result};
use crate::backoff::Backoff;
use crate::config::OperatorConfig;
use crate::console::Console;
use crate::resources::{
    cluster_service, init_job, init_job_name, install_job, install_job_name, pod_name, server_pod,
    volume_claims,
};
use crate::rollout::{RolloutOrchestrator, RolloutProgress};
use crate::volumes::{begin_install, commit_swap};

/// Update detection seam, so reconcile tests script check outcomes.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn check(
        &self,
        current_build: Option<u64>,
        tracked_mods: &[u32],
        known_mods: &BTreeMap<String, String>,
    ) -> UpdateCheck;
}

#[async_trait]
impl UpdateSource for UpdateDetector {
    async fn check(
        &self,
        current_build: Option<u64>,
        tracked_mods: &[u32],
        known_mods: &BTreeMap<String, String>,
    ) -> UpdateCheck {
        UpdateDetector::check(self, current_build, tracked_mods, known_mods).await
    }
}

/// What the worker should do after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Nothing pending; the periodic re-enqueue will revisit.
    Done,
    RequeueAfter(Duration),
}

impl Next {
    fn now() -> Self {
        Self::RequeueAfter(Duration::ZERO)
    }
}

pub struct Reconciler {
    api: Arc<dyn ClusterApi>,
    updates: Arc<dyn UpdateSource>,
    rollout: RolloutOrchestrator,
    config: OperatorConfig,
}

impl Reconciler {
    pub fn new(
        api: Arc<dyn ClusterApi>,
        console: Arc<dyn Console>,
        updates: Arc<dyn UpdateSource>,
        config: OperatorConfig,
    ) -> Self {
        let rollout = RolloutOrchestrator::new(
            console,
            config.poll_interval,
            config.max_poll_attempts,
        );
        Self {
            api,
            updates,
            rollout,
            config,
        }
    }

    /// Reconcile one cluster, retrying status-write conflicts with a fresh
    /// read and recompute. Exhausting the retry budget is not fatal; the
    /// pass is requeued and its object mutations were idempotent.
    #[instrument(skip(self), fields(cluster = %key))]
    pub async fn reconcile(&self, key: &ClusterKey) -> Result<Next> {
        let mut backoff = Backoff::conflict();
        loop {
            let cluster = match self.api.get_cluster(key).await {
                Ok(cluster) => cluster,
                Err(ClusterApiError::NotFound(_)) => {
                    debug!("cluster gone, nothing to reconcile");
                    return Ok(Next::Done);
                }
                Err(err) => return Err(err),
            };

            let mut status = cluster.status.clone();
            let next = self.pass(&cluster, &mut status).await?;
            if status == cluster.status {
                return Ok(next);
            }

            match self.api.update_status(&cluster.meta, &status).await {
                Ok(_) => return Ok(next),
                Err(ClusterApiError::Conflict)
                    if backoff.attempt() < self.config.conflict_retries =>
                {
                    warn!(attempt = backoff.attempt(), "status conflict, recomputing");
                    tokio::time::sleep(backoff.wait()).await;
                }
                Err(ClusterApiError::Conflict) => {
                    warn!("status conflict retries exhausted, requeueing");
                    return Ok(Next::RequeueAfter(self.config.poll_interval));
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn pass(&self, cluster: &ClusterObject, status: &mut ArkClusterStatus) -> Result<Next> {
        let meta = &cluster.meta;
        let spec = &cluster.spec;
        let maps = spec.game_maps();

        if maps.is_empty() {
            status.fail("declared maps resolve to an empty set");
            status.observed_generation = Some(meta.generation);
            return Ok(Next::Done);
        }

        if status.state == ClusterState::Error {
            if status.observed_generation == Some(meta.generation) {
                // stays down until the spec is touched
                return Ok(Next::Done);
            }
            info!("spec changed, leaving error state");
            status.enter(ClusterState::Initializing);
        }
        status.observed_generation = Some(meta.generation);
        if status.active_volume.is_none() {
            // a wiped status is recovered from the labels of surviving pods
            let pods = self.api.list_pods(&meta.key()).await?;
            let adopted = pods.iter().find_map(|p| p.volume);
            if let Some(volume) = adopted {
                info!(%volume, "recovered active volume from pod labels");
            }
            status.active_volume = Some(adopted.unwrap_or(VolumeName::ServerA));
            if status.active_build_id.is_none() {
                status.active_build_id = pods.iter().find_map(|p| p.build_id);
            }
        }

        if status.state != ClusterState::Initializing {
            self.converge(meta, spec, status, &maps).await?;
        }

        match status.state {
            ClusterState::Initializing => self.initialize(meta, spec, status).await,
            ClusterState::CheckingUpdates => self.check_updates(spec, status).await,
            ClusterState::Updating => self.update(meta, status).await,
            ClusterState::Validating => self.validate(meta, status).await,
            ClusterState::Swapping => self.swap(meta, spec, status).await,
            ClusterState::RollingRestart => self.rolling_restart(meta, spec, status).await,
            ClusterState::Idle => Ok(self.idle(status)),
            ClusterState::Error => Ok(Next::Done),
        }
    }

    /// Converge owned objects toward the spec: service, one pod per map,
    /// removal of pods whose map left the spec. Also refreshes the per-map
    /// stages and pod counters.
    async fn converge(
        &self,
        meta: &ClusterMeta,
        spec: &ArkClusterSpec,
        status: &mut ArkClusterStatus,
        maps: &[GameMap],
    ) -> Result<()> {
        let key = meta.key();
        self.api
            .ensure_service(meta, &cluster_service(meta, spec, maps))
            .await?;

        let mut pods = self.api.list_pods(&key).await?;
        for pod in &pods {
            if !maps.iter().any(|m| pod_name(&meta.name, m) == pod.name) {
                info!(pod = %pod.name, "map left the spec, deleting pod");
                self.api.delete_pod(&key, &pod.name).await?;
            }
        }
        pods.retain(|p| maps.iter().any(|m| pod_name(&meta.name, m) == p.name));

        // maps a shutdown intent is draining must stay down
        let draining: Vec<&str> = status
            .restart
            .as_ref()
            .filter(|intent| intent.kind == RestartKind::Shutdown)
            .map(|intent| intent.maps.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let mut created = 0u32;
        let mut ready = 0u32;
        let mut suspended = 0u32;
        let mut stages = BTreeMap::new();

        for map in maps {
            let is_suspended = spec.is_suspended(&map.id);
            if is_suspended {
                suspended += 1;
            }

            let name = pod_name(&meta.name, map);
            let mut pod = pods.iter().find(|p| p.name == name).cloned();
            if pod.is_none() && !draining.contains(&map.id.as_str()) {
                let desired = server_pod(meta, spec, status, map, &self.config);
                if self.api.apply_pod(meta, &desired).await? {
                    debug!(pod = %name, "created server pod");
                }
                pod = self
                    .api
                    .list_pods(&key)
                    .await?
                    .into_iter()
                    .find(|p| p.name == name);
            }

            if let Some(pod) = &pod {
                created += 1;
                if pod.ready {
                    ready += 1;
                }
            }
            stages.insert(
                map.id.clone(),
                ark_model::MapStage {
                    ready: pod.as_ref().map(|p| p.ready).unwrap_or(false),
                    suspended: is_suspended,
                    build_id: pod.as_ref().and_then(|p| p.build_id),
                },
            );
        }

        let all_ready = maps
            .iter()
            .filter(|m| !spec.is_suspended(&m.id))
            .all(|m| stages.get(&m.id).map(|s| s.ready).unwrap_or(false));

        status.created_pods = created;
        status.ready_pods = ready;
        status.suspended_pods = suspended;
        status.stages = stages;
        status.ready = all_ready;
        Ok(())
    }

    /// Claims bound and the data volume laid out by the init job.
    async fn initialize(
        &self,
        meta: &ClusterMeta,
        spec: &ArkClusterSpec,
        status: &mut ArkClusterStatus,
    ) -> Result<Next> {
        let key = meta.key();
        let claims = volume_claims(meta, spec);
        for claim in &claims {
            self.api.ensure_volume(meta, claim).await?;
        }
        for claim in &claims {
            match self.api.volume_phase(&key, &claim.name).await? {
                Some(crate::api::VolumePhase::Bound) => {}
                _ => {
                    debug!(claim = %claim.name, "waiting for claim to bind");
                    return Ok(Next::RequeueAfter(self.config.poll_interval));
                }
            }
        }

        let name = init_job_name(&meta.name);
        match self.api.get_job(&key, &name).await? {
            None => {
                info!("starting init job");
                self.api.create_job(meta, &init_job(meta, spec, &self.config)).await?;
                Ok(Next::RequeueAfter(self.config.poll_interval))
            }
            Some(job) if job.completed() => {
                self.api.delete_job(&key, &name).await?;
                status.enter(ClusterState::CheckingUpdates);
                Ok(Next::now())
            }
            Some(job) if job.failed >= self.config.job_retries => {
                self.api
                    .record_event(meta, "InitFailed", "data volume init job exhausted retries")
                    .await?;
                status.fail(format!(
                    "init job failed {} times",
                    job.failed
                ));
                Ok(Next::Done)
            }
            Some(_) => Ok(Next::RequeueAfter(self.config.poll_interval)),
        }
    }

    async fn check_updates(
        &self,
        spec: &ArkClusterSpec,
        status: &mut ArkClusterStatus,
    ) -> Result<Next> {
        let check = self
            .updates
            .check(
                status.active_build_id,
                &spec.global_settings.mods,
                &status.mods,
            )
            .await;
        status.last_update_check = Some(Utc::now());
        if check.latest_build_id.is_some() {
            status.latest_build_id = check.latest_build_id;
        }
        // merge fresh stamps; an outage reports nothing for a mod we know
        for (id, stamp) in check.mod_stamps {
            status.mods.insert(id, stamp);
        }
        // a mod dropped from the spec stops being tracked
        status.mods.retain(|id, _| {
            id.parse::<u32>()
                .map(|id| spec.global_settings.mods.contains(&id))
                .unwrap_or(false)
        });
        if status.active_build_id.is_none() {
            // first observation: freshly created pods run the image's
            // current install, adopt it as the active build
            status.active_build_id = status.latest_build_id;
        }

        if check.available {
            info!(
                latest = ?status.latest_build_id,
                mods = ?check.changed_mods,
                "update available"
            );
            status.update_reason = Some(
                if check.latest_build_id.is_some()
                    && check.latest_build_id != status.active_build_id
                {
                    "ARK update".to_owned()
                } else {
                    let mods = check
                        .changed_mods
                        .iter()
                        .map(|m| m.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("mod update ({mods})")
                },
            );
            status.enter(ClusterState::Updating);
            Ok(Next::now())
        } else {
            status.enter(ClusterState::Idle);
            Ok(Next::RequeueAfter(self.config.update_interval))
        }
    }

    fn idle(&self, status: &mut ArkClusterStatus) -> Next {
        let due = match status.last_update_check {
            None => true,
            Some(checked) => {
                let elapsed = (Utc::now() - checked)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                elapsed >= self.config.update_interval
            }
        };
        if due {
            status.enter(ClusterState::CheckingUpdates);
            Next::now()
        } else {
            Next::RequeueAfter(self.config.update_interval)
        }
    }

    /// Install job writes the standby volume; single-flight.
    async fn update(&self, meta: &ClusterMeta, status: &mut ArkClusterStatus) -> Result<Next> {
        let job = install_job(meta, status, &self.config);
        match begin_install(self.api.as_ref(), meta, &job).await? {
            None => Ok(Next::RequeueAfter(self.config.poll_interval)),
            Some(state) if state.completed() => {
                status.enter(ClusterState::Validating);
                Ok(Next::now())
            }
            Some(state) if state.failed >= self.config.job_retries => {
                self.api
                    .record_event(meta, "InstallFailed", "install job exhausted retries")
                    .await?;
                status.fail(format!("install job failed {} times", state.failed));
                Ok(Next::Done)
            }
            Some(_) => Ok(Next::RequeueAfter(self.config.poll_interval)),
        }
    }

    /// The finished install must report the build it was asked for before
    /// the pair flips.
    async fn validate(&self, meta: &ClusterMeta, status: &mut ArkClusterStatus) -> Result<Next> {
        let name = install_job_name(&meta.name);
        let job = self.api.get_job(&meta.key(), &name).await?;
        match job {
            Some(job) if job.completed() && job.build_id == status.latest_build_id => {
                commit_swap(status);
                status.enter(ClusterState::Swapping);
                Ok(Next::now())
            }
            Some(job) => {
                self.api
                    .record_event(meta, "ValidationFailed", "standby install rejected")
                    .await?;
                status.fail(format!(
                    "install reported build {:?}, expected {:?}",
                    job.build_id, status.latest_build_id
                ));
                Ok(Next::Done)
            }
            None => {
                status.fail("install job disappeared before validation");
                Ok(Next::Done)
            }
        }
    }

    /// Clean up the install job and raise the rollout intent.
    async fn swap(
        &self,
        meta: &ClusterMeta,
        spec: &ArkClusterSpec,
        status: &mut ArkClusterStatus,
    ) -> Result<Next> {
        self.api
            .delete_job(&meta.key(), &install_job_name(&meta.name))
            .await?;
        if status.restart.is_none() {
            let covered: Vec<String> =
                spec.active_maps().iter().map(|m| m.id.clone()).collect();
            info!(maps = covered.len(), "scheduling post-update rolling restart");
            let reason = status
                .update_reason
                .take()
                .unwrap_or_else(|| "ARK update".to_owned());
            status.restart = Some(RestartIntent {
                time: Some(
                    Utc::now()
                        + chrono::Duration::from_std(spec.server.graceful_shutdown)
                            .unwrap_or_else(|_| chrono::Duration::zero()),
                ),
                maps: covered,
                kind: RestartKind::Restart,
                reason,
                active_volume: status.active_volume(),
                active_build_id: status.active_build_id,
                ..Default::default()
            });
        }
        status.enter(ClusterState::RollingRestart);
        Ok(Next::now())
    }

    async fn rolling_restart(
        &self,
        meta: &ClusterMeta,
        spec: &ArkClusterSpec,
        status: &mut ArkClusterStatus,
    ) -> Result<Next> {
        match self.rollout.tick(self.api.as_ref(), meta, spec, status).await? {
            RolloutProgress::Waiting { requeue } => Ok(Next::RequeueAfter(requeue)),
            RolloutProgress::Finished { failed } => {
                if !failed.is_empty() {
                    self.api
                        .record_event(
                            meta,
                            "RolloutIncomplete",
                            &format!("maps failed to restart: {}", failed.join(", ")),
                        )
                        .await?;
                }
                status.enter(ClusterState::Idle);
                Ok(Next::now())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    use ark_rcon::RconError;

    use crate::api::memory::MemoryClusterApi;

    struct ScriptedUpdates {
        checks: Mutex<Vec<UpdateCheck>>,
    }

    impl ScriptedUpdates {
        fn quiet() -> Arc<Self> {
            Arc::new(Self {
                checks: Mutex::new(vec![]),
            })
        }

        fn push(&self, check: UpdateCheck) {
            self.checks.lock().unwrap().push(check);
        }
    }

    #[async_trait]
    impl UpdateSource for ScriptedUpdates {
        async fn check(
            &self,
            _current_build: Option<u64>,
            _tracked_mods: &[u32],
            _known_mods: &BTreeMap<String, String>,
        ) -> UpdateCheck {
            let mut checks = self.checks.lock().unwrap();
            if checks.is_empty() {
                UpdateCheck::default()
            } else {
                checks.remove(0)
            }
        }
    }

    struct SilentConsole;

    #[async_trait]
    impl Console for SilentConsole {
        async fn run(
            &self,
            _host: &str,
            _port: u16,
            _command: &str,
        ) -> std::result::Result<String, RconError> {
            Ok(String::new())
        }
    }

    struct Harness {
        api: Arc<MemoryClusterApi>,
        updates: Arc<ScriptedUpdates>,
        reconciler: Reconciler,
        key: ClusterKey,
    }

    fn harness(spec: ArkClusterSpec) -> Harness {
        let api = Arc::new(MemoryClusterApi::new());
        let updates = ScriptedUpdates::quiet();
        let key = ClusterKey::new("games", "asa");
        api.insert_cluster(&key, spec);

        let mut config = OperatorConfig::default();
        config.poll_interval = Duration::from_millis(1);
        config.max_poll_attempts = 3;

        let reconciler = Reconciler::new(
            Arc::clone(&api) as Arc<dyn ClusterApi>,
            Arc::new(SilentConsole),
            Arc::clone(&updates) as Arc<dyn UpdateSource>,
            config,
        );
        Harness {
            api,
            updates,
            reconciler,
            key,
        }
    }

    fn one_map_spec() -> ArkClusterSpec {
        let mut spec = ArkClusterSpec::default();
        spec.server.maps = vec!["TheIsland_WP".to_owned()];
        spec.server.graceful_shutdown = Duration::ZERO;
        spec
    }

    async fn step(h: &Harness) -> Next {
        h.reconciler.reconcile(&h.key).await.expect("reconcile")
    }

    /// Drive passes until the cluster settles in the given state.
    async fn run_until(h: &Harness, state: ClusterState, max_steps: usize) {
        for _ in 0..max_steps {
            step(h).await;
            if h.api.status(&h.key).state == state {
                return;
            }
        }
        panic!(
            "never reached {state}, stuck in {}",
            h.api.status(&h.key).state
        );
    }

    #[tokio::test]
    async fn test_fresh_cluster_initializes_to_idle() {
        let h = harness(one_map_spec());

        // claims created but unbound: still initializing
        step(&h).await;
        assert_eq!(h.api.status(&h.key).state, ClusterState::Initializing);

        h.api.bind_volumes(&h.key);
        step(&h).await; // creates the init job
        h.api.complete_job(&h.key, "asa-init", None);

        run_until(&h, ClusterState::Idle, 5).await;

        let status = h.api.status(&h.key);
        assert_eq!(status.active_volume, Some(VolumeName::ServerA));
        assert_eq!(h.api.pod_names(&h.key), vec!["asa-theisland".to_owned()]);
        assert!(!h.api.has_job(&h.key, "asa-init"));
    }

    async fn settle_idle(h: &Harness) {
        step(h).await; // creates the claims
        h.api.bind_volumes(&h.key);
        step(h).await; // starts the init job
        h.api.complete_job(&h.key, "asa-init", None);
        run_until(h, ClusterState::Idle, 5).await;
        h.api.set_all_pods_ready(&h.key);
    }

    #[tokio::test]
    async fn test_update_installs_standby_and_swaps() {
        let h = harness(one_map_spec());
        settle_idle(&h).await;

        // force the next idle pass into a check that reports build 101
        let mut seeded = h.api.status(&h.key);
        seeded.active_build_id = Some(100);
        seeded.last_update_check = None;
        force_status(&h, seeded).await;
        h.updates.push(UpdateCheck {
            available: true,
            latest_build_id: Some(101),
            ..Default::default()
        });

        run_until(&h, ClusterState::Updating, 3).await;
        step(&h).await; // creates the install job
        assert!(h.api.has_job(&h.key, "asa-install"));

        h.api.complete_job(&h.key, "asa-install", Some(101));
        run_until(&h, ClusterState::RollingRestart, 5).await;

        let status = h.api.status(&h.key);
        assert_eq!(status.active_volume, Some(VolumeName::ServerB));
        assert_eq!(status.active_build_id, Some(101));
        let intent = status.restart.expect("intent raised");
        assert_eq!(intent.maps, vec!["TheIsland_WP".to_owned()]);
        assert_eq!(intent.reason, "ARK update");
        assert!(!h.api.has_job(&h.key, "asa-install"));

        // old pod cycles onto server-b, then the rollout drains
        loop {
            step(&h).await;
            if let Some(pod) = h.api.pod(&h.key, "asa-theisland") {
                if pod.volume == Some(VolumeName::ServerB) {
                    h.api.set_pod_ready(&h.key, "asa-theisland", true);
                }
            }
            if h.api.status(&h.key).state == ClusterState::Idle {
                break;
            }
        }
        assert!(h.api.status(&h.key).restart.is_none());
    }

    #[tokio::test]
    async fn test_wiped_status_recovers_volume_from_pod_labels() {
        let h = harness(one_map_spec());
        settle_idle(&h).await;

        let mut seeded = h.api.status(&h.key);
        seeded.active_build_id = Some(100);
        seeded.last_update_check = None;
        force_status(&h, seeded).await;
        h.updates.push(UpdateCheck {
            available: true,
            latest_build_id: Some(101),
            ..Default::default()
        });
        run_until(&h, ClusterState::Updating, 3).await;
        step(&h).await;
        h.api.complete_job(&h.key, "asa-install", Some(101));
        run_until(&h, ClusterState::RollingRestart, 5).await;
        loop {
            step(&h).await;
            if let Some(pod) = h.api.pod(&h.key, "asa-theisland") {
                if pod.volume == Some(VolumeName::ServerB) {
                    h.api.set_pod_ready(&h.key, "asa-theisland", true);
                }
            }
            if h.api.status(&h.key).state == ClusterState::Idle {
                break;
            }
        }

        // someone clears the status; the surviving pod still carries its
        // volume and build labels
        force_status(&h, ArkClusterStatus::default()).await;
        step(&h).await;

        let status = h.api.status(&h.key);
        assert_eq!(status.active_volume, Some(VolumeName::ServerB));
        assert_eq!(status.active_build_id, Some(101));
    }

    #[tokio::test]
    async fn test_mods_dropped_from_spec_leave_status() {
        let mut spec = one_map_spec();
        spec.global_settings.mods = vec![900001];
        let h = harness(spec);
        settle_idle(&h).await;

        let mut seeded = h.api.status(&h.key);
        seeded
            .mods
            .insert("900001".to_owned(), "stamp-a".to_owned());
        seeded
            .mods
            .insert("111111".to_owned(), "stamp-removed".to_owned());
        seeded.last_update_check = None;
        force_status(&h, seeded).await;

        step(&h).await; // idle pass schedules the check
        step(&h).await; // quiet check runs
        let status = h.api.status(&h.key);
        assert_eq!(
            status.mods.keys().collect::<Vec<_>>(),
            vec!["900001"]
        );
    }

    #[tokio::test]
    async fn test_validation_mismatch_enters_error() {
        let h = harness(one_map_spec());
        settle_idle(&h).await;

        let mut seeded = h.api.status(&h.key);
        seeded.active_build_id = Some(100);
        seeded.last_update_check = None;
        force_status(&h, seeded).await;
        h.updates.push(UpdateCheck {
            available: true,
            latest_build_id: Some(101),
            ..Default::default()
        });

        run_until(&h, ClusterState::Updating, 3).await;
        step(&h).await;
        // install claims a different build than requested
        h.api.complete_job(&h.key, "asa-install", Some(99));

        run_until(&h, ClusterState::Error, 5).await;
        let status = h.api.status(&h.key);
        // the pair never flipped
        assert_eq!(status.active_volume, Some(VolumeName::ServerA));
        assert!(h
            .api
            .events()
            .iter()
            .any(|(_, reason, _)| reason == "ValidationFailed"));
    }

    #[tokio::test]
    async fn test_error_recovers_on_spec_touch() {
        let h = harness(ArkClusterSpec {
            server: ark_model::ServerSpec {
                maps: vec![],
                ..Default::default()
            },
            ..Default::default()
        });

        step(&h).await;
        assert_eq!(h.api.status(&h.key).state, ClusterState::Error);

        // error is sticky while the spec stays put
        let writes = h.api.mutation_count();
        step(&h).await;
        assert_eq!(h.api.mutation_count(), writes);

        h.api.set_spec(&h.key, one_map_spec());
        step(&h).await;
        assert_ne!(h.api.status(&h.key).state, ClusterState::Error);
    }

    #[tokio::test]
    async fn test_idle_passes_are_idempotent() {
        let h = harness(one_map_spec());
        settle_idle(&h).await;

        // let the counters settle, then verify a quiet pass writes nothing
        step(&h).await;
        let writes = h.api.mutation_count();
        step(&h).await;
        assert_eq!(h.api.mutation_count(), writes);
    }

    #[tokio::test]
    async fn test_removed_map_pod_deleted() {
        let mut spec = one_map_spec();
        spec.server.maps = vec!["TheIsland_WP".to_owned(), "Aberration_WP".to_owned()];
        let h = harness(spec);
        settle_idle(&h).await;
        assert_eq!(h.api.pod_names(&h.key).len(), 2);

        h.api.set_spec(&h.key, one_map_spec());
        step(&h).await;
        assert_eq!(h.api.pod_names(&h.key), vec!["asa-theisland".to_owned()]);
    }

    #[tokio::test]
    async fn test_suspension_counts_and_skips_rollout() {
        let mut spec = one_map_spec();
        spec.server.maps = vec!["TheIsland_WP".to_owned(), "ScorchedEarth_WP".to_owned()];
        let h = harness(spec.clone());
        settle_idle(&h).await;

        // suspend one map while raising a restart intent over both
        spec.server.suspend = vec!["TheIsland_WP".to_owned()];
        h.api.set_spec(&h.key, spec);
        let mut status = h.api.status(&h.key);
        status.restart = Some(RestartIntent {
            time: None,
            maps: vec!["TheIsland_WP".to_owned(), "ScorchedEarth_WP".to_owned()],
            reason: "maintenance".to_owned(),
            ..Default::default()
        });
        status.state = ClusterState::RollingRestart;
        force_status(&h, status).await;

        loop {
            step(&h).await;
            h.api.set_all_pods_ready(&h.key);
            if h.api.status(&h.key).state == ClusterState::Idle {
                break;
            }
        }

        let status = h.api.status(&h.key);
        assert_eq!(status.suspended_pods, 1);
        // the suspended map was never cycled
        assert!(status
            .restart
            .is_none());
        assert!(h.api.pod(&h.key, "asa-theisland").is_some());
    }

    #[tokio::test]
    async fn test_status_conflict_is_retried() {
        let h = harness(one_map_spec());
        h.api.inject_conflict();
        // first write conflicts, the pass re-reads and succeeds
        step(&h).await;
        assert!(h.api.mutation_count() > 0);
    }

    #[tokio::test]
    async fn test_clusters_are_isolated() {
        let h = harness(one_map_spec());
        let other = ClusterKey::new("games", "asb");
        h.api.insert_cluster(&other, one_map_spec());

        settle_idle(&h).await;
        // the sibling cluster saw no reconcile and owns no objects
        assert!(h.api.pod_names(&other).is_empty());
        assert_eq!(h.api.status(&other).state, ClusterState::Initializing);
    }

    /// Write a status directly, bypassing the reconciler.
    async fn force_status(h: &Harness, status: ArkClusterStatus) {
        let cluster = h.api.get_cluster(&h.key).await.expect("cluster");
        h.api
            .update_status(&cluster.meta, &status)
            .await
            .expect("status write");
    }
}
