//! In-memory [`ClusterApi`] for tests.
//!
//! Mirrors the optimistic-concurrency behavior of the real API server:
//! status writes are conditional on the resource version and bump it.
//! Mutating calls are counted so idempotence is assertable.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use ark_model::{ArkClusterSpec, ArkClusterStatus, VolumeName, MAP_LABEL, ACTIVE_VOLUME_LABEL, BUILD_LABEL};

use crate::resources::{ClusterService, InstallJob, ServerPod, VolumeClaim};

use super::{
    ClusterApi, ClusterApiError, ClusterKey, ClusterMeta, ClusterObject, JobState, PodState,
    Result, VolumePhase,
};

#[derive(Debug, Clone)]
struct StoredCluster {
    spec: ArkClusterSpec,
    status: ArkClusterStatus,
    resource_version: u64,
    generation: i64,
}

#[derive(Default)]
struct State {
    clusters: HashMap<ClusterKey, StoredCluster>,
    pods: HashMap<(ClusterKey, String), PodState>,
    jobs: HashMap<(ClusterKey, String), JobState>,
    volumes: HashMap<(ClusterKey, String), VolumePhase>,
    services: HashMap<(ClusterKey, String), ClusterService>,
    events: Vec<(ClusterKey, String, String)>,
    mutations: u64,
    fail_next_status_write: bool,
}

#[derive(Default)]
pub struct MemoryClusterApi {
    state: Mutex<State>,
}

impl MemoryClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_cluster(&self, key: &ClusterKey, spec: ArkClusterSpec) {
        let mut state = self.lock();
        state.clusters.insert(
            key.clone(),
            StoredCluster {
                spec,
                status: ArkClusterStatus::default(),
                resource_version: 1,
                generation: 1,
            },
        );
    }

    /// Replace the spec, bumping generation like a user edit would.
    pub fn set_spec(&self, key: &ClusterKey, spec: ArkClusterSpec) {
        let mut state = self.lock();
        let cluster = state.clusters.get_mut(key).expect("cluster exists");
        cluster.spec = spec;
        cluster.generation += 1;
        cluster.resource_version += 1;
    }

    pub fn status(&self, key: &ClusterKey) -> ArkClusterStatus {
        self.lock().clusters[key].status.clone()
    }

    /// Mark every claim of the cluster bound, as a provisioner would.
    pub fn bind_volumes(&self, key: &ClusterKey) {
        let mut state = self.lock();
        for ((cluster, _), phase) in state.volumes.iter_mut() {
            if cluster == key {
                *phase = VolumePhase::Bound;
            }
        }
    }

    pub fn complete_job(&self, key: &ClusterKey, name: &str, build_id: Option<u64>) {
        let mut state = self.lock();
        let job = state
            .jobs
            .get_mut(&(key.clone(), name.to_owned()))
            .expect("job exists");
        job.active = false;
        job.succeeded = 1;
        job.build_id = build_id;
    }

    pub fn fail_job(&self, key: &ClusterKey, name: &str, failures: u32) {
        let mut state = self.lock();
        let job = state
            .jobs
            .get_mut(&(key.clone(), name.to_owned()))
            .expect("job exists");
        job.active = false;
        job.failed = failures;
    }

    pub fn has_job(&self, key: &ClusterKey, name: &str) -> bool {
        self.lock().jobs.contains_key(&(key.clone(), name.to_owned()))
    }

    pub fn set_pod_ready(&self, key: &ClusterKey, name: &str, ready: bool) {
        let mut state = self.lock();
        let pod = state
            .pods
            .get_mut(&(key.clone(), name.to_owned()))
            .expect("pod exists");
        pod.ready = ready;
    }

    pub fn set_all_pods_ready(&self, key: &ClusterKey) {
        let mut state = self.lock();
        for ((cluster, _), pod) in state.pods.iter_mut() {
            if cluster == key {
                pod.ready = true;
            }
        }
    }

    pub fn pod(&self, key: &ClusterKey, name: &str) -> Option<PodState> {
        self.lock().pods.get(&(key.clone(), name.to_owned())).cloned()
    }

    pub fn pod_names(&self, key: &ClusterKey) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .pods
            .keys()
            .filter(|(cluster, _)| cluster == key)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn mutation_count(&self) -> u64 {
        self.lock().mutations
    }

    /// Make the next status write fail with a conflict.
    pub fn inject_conflict(&self) {
        self.lock().fail_next_status_write = true;
    }

    pub fn events(&self) -> Vec<(ClusterKey, String, String)> {
        self.lock().events.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory api lock poisoned")
    }

    fn meta_of(key: &ClusterKey, stored: &StoredCluster) -> ClusterMeta {
        ClusterMeta {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            uid: format!("uid-{}", key.name),
            resource_version: stored.resource_version.to_string(),
            generation: stored.generation,
        }
    }
}

#[async_trait]
impl ClusterApi for MemoryClusterApi {
    async fn list_clusters(&self) -> Result<Vec<ClusterObject>> {
        let state = self.lock();
        Ok(state
            .clusters
            .iter()
            .map(|(key, stored)| ClusterObject {
                meta: Self::meta_of(key, stored),
                spec: stored.spec.clone(),
                status: stored.status.clone(),
            })
            .collect())
    }

    async fn get_cluster(&self, key: &ClusterKey) -> Result<ClusterObject> {
        let state = self.lock();
        let stored = state
            .clusters
            .get(key)
            .ok_or_else(|| ClusterApiError::NotFound(key.to_string()))?;
        Ok(ClusterObject {
            meta: Self::meta_of(key, stored),
            spec: stored.spec.clone(),
            status: stored.status.clone(),
        })
    }

    async fn update_status(
        &self,
        meta: &ClusterMeta,
        status: &ArkClusterStatus,
    ) -> Result<ClusterMeta> {
        let mut state = self.lock();
        if state.fail_next_status_write {
            state.fail_next_status_write = false;
            return Err(ClusterApiError::Conflict);
        }
        let key = meta.key();
        let stored = state
            .clusters
            .get_mut(&key)
            .ok_or_else(|| ClusterApiError::NotFound(key.to_string()))?;
        if stored.resource_version.to_string() != meta.resource_version {
            return Err(ClusterApiError::Conflict);
        }
        stored.status = status.clone();
        stored.resource_version += 1;
        let updated = Self::meta_of(&key, stored);
        state.mutations += 1;
        Ok(updated)
    }

    async fn list_pods(&self, key: &ClusterKey) -> Result<Vec<PodState>> {
        let state = self.lock();
        let mut pods: Vec<PodState> = state
            .pods
            .iter()
            .filter(|((cluster, _), _)| cluster == key)
            .map(|(_, pod)| pod.clone())
            .collect();
        pods.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pods)
    }

    async fn apply_pod(&self, meta: &ClusterMeta, pod: &ServerPod) -> Result<bool> {
        let mut state = self.lock();
        let id = (meta.key(), pod.name.clone());
        if state.pods.contains_key(&id) {
            return Ok(false);
        }
        let volume = pod
            .labels
            .get(ACTIVE_VOLUME_LABEL)
            .map(|v| match v.as_str() {
                "server-b" => VolumeName::ServerB,
                _ => VolumeName::ServerA,
            });
        let build_id = pod.labels.get(BUILD_LABEL).and_then(|b| b.parse().ok());
        state.pods.insert(
            id,
            PodState {
                name: pod.name.clone(),
                map_id: pod
                    .labels
                    .get(MAP_LABEL)
                    .cloned()
                    .unwrap_or_else(|| pod.map.id.clone()),
                volume,
                build_id,
                ready: false,
            },
        );
        state.mutations += 1;
        Ok(true)
    }

    async fn delete_pod(&self, key: &ClusterKey, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.pods.remove(&(key.clone(), name.to_owned())).is_some() {
            state.mutations += 1;
        }
        Ok(())
    }

    async fn ensure_volume(&self, meta: &ClusterMeta, claim: &VolumeClaim) -> Result<()> {
        let mut state = self.lock();
        let id = (meta.key(), claim.name.clone());
        if !state.volumes.contains_key(&id) {
            state.volumes.insert(id, VolumePhase::Pending);
            state.mutations += 1;
        }
        Ok(())
    }

    async fn volume_phase(&self, key: &ClusterKey, name: &str) -> Result<Option<VolumePhase>> {
        Ok(self
            .lock()
            .volumes
            .get(&(key.clone(), name.to_owned()))
            .copied())
    }

    async fn get_job(&self, key: &ClusterKey, name: &str) -> Result<Option<JobState>> {
        Ok(self
            .lock()
            .jobs
            .get(&(key.clone(), name.to_owned()))
            .cloned())
    }

    async fn create_job(&self, meta: &ClusterMeta, job: &InstallJob) -> Result<()> {
        let mut state = self.lock();
        let id = (meta.key(), job.name.clone());
        if state.jobs.contains_key(&id) {
            return Err(ClusterApiError::Client(format!(
                "job {} already exists",
                job.name
            )));
        }
        state.jobs.insert(
            id,
            JobState {
                name: job.name.clone(),
                active: true,
                succeeded: 0,
                failed: 0,
                build_id: None,
            },
        );
        state.mutations += 1;
        Ok(())
    }

    async fn delete_job(&self, key: &ClusterKey, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.jobs.remove(&(key.clone(), name.to_owned())).is_some() {
            state.mutations += 1;
        }
        Ok(())
    }

    async fn ensure_service(&self, meta: &ClusterMeta, service: &ClusterService) -> Result<()> {
        let mut state = self.lock();
        let id = (meta.key(), service.name.clone());
        if state.services.get(&id) != Some(service) {
            state.services.insert(id, service.clone());
            state.mutations += 1;
        }
        Ok(())
    }

    async fn record_event(&self, meta: &ClusterMeta, reason: &str, message: &str) -> Result<()> {
        self.lock()
            .events
            .push((meta.key(), reason.to_owned(), message.to_owned()));
        Ok(())
    }
}
