//! Platform API seam.
//!
//! The reconciler talks to the orchestration platform through the
//! [`ClusterApi`] trait in domain terms: clusters, server pods, install
//! jobs, volume claims. Two implementations exist, a Kubernetes client for
//! production and an in-memory one for tests, so the state machine is
//! exercised without a live API server.

pub mod k8;
pub mod memory;

use std::fmt;

use async_trait::async_trait;

use ark_model::{ArkClusterSpec, ArkClusterStatus, VolumeName};

use crate::resources::{ClusterService, InstallJob, ServerPod, VolumeClaim};

pub type Result<T> = std::result::Result<T, ClusterApiError>;

#[derive(thiserror::Error, Debug)]
pub enum ClusterApiError {
    /// Another writer moved the resource version under us.
    #[error("resource version conflict")]
    Conflict,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("platform api error: {0}")]
    Client(String),
}

/// Namespaced cluster identity used as the work-queue key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMeta {
    pub name: String,
    pub namespace: String,
    /// Server-assigned uid, referenced by owned objects for garbage
    /// collection.
    pub uid: String,
    /// Last-read resource version; every status write is conditional on it.
    pub resource_version: String,
    /// Spec revision token. Moves whenever the user touches the spec;
    /// recorded in status as `observedGeneration` for error recovery.
    pub generation: i64,
}

impl ClusterMeta {
    pub fn key(&self) -> ClusterKey {
        ClusterKey::new(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone)]
pub struct ClusterObject {
    pub meta: ClusterMeta,
    pub spec: ArkClusterSpec,
    pub status: ArkClusterStatus,
}

/// Observed state of one server pod, reduced to what reconciliation needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodState {
    pub name: String,
    pub map_id: String,
    /// Install volume the pod was created against, from its label.
    pub volume: Option<VolumeName>,
    pub build_id: Option<u64>,
    pub ready: bool,
}

/// Observed state of an install/init job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobState {
    pub name: String,
    pub active: bool,
    pub succeeded: u32,
    pub failed: u32,
    /// Build id the job reported on completion, from its annotation.
    pub build_id: Option<u64>,
}

impl JobState {
    pub fn completed(&self) -> bool {
        self.succeeded > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumePhase {
    Pending,
    Bound,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_clusters(&self) -> Result<Vec<ClusterObject>>;

    async fn get_cluster(&self, key: &ClusterKey) -> Result<ClusterObject>;

    /// Conditional status write. Fails with [`ClusterApiError::Conflict`]
    /// when `meta.resource_version` is no longer current.
    async fn update_status(
        &self,
        meta: &ClusterMeta,
        status: &ArkClusterStatus,
    ) -> Result<ClusterMeta>;

    async fn list_pods(&self, key: &ClusterKey) -> Result<Vec<PodState>>;

    /// Create the pod if missing. Returns `true` when a pod was created.
    /// Existing pods are left alone: pod volume/port changes require
    /// recreation, which is the rollout orchestrator's job.
    async fn apply_pod(&self, meta: &ClusterMeta, pod: &ServerPod) -> Result<bool>;

    async fn delete_pod(&self, key: &ClusterKey, name: &str) -> Result<()>;

    async fn ensure_volume(&self, meta: &ClusterMeta, claim: &VolumeClaim) -> Result<()>;

    async fn volume_phase(&self, key: &ClusterKey, name: &str) -> Result<Option<VolumePhase>>;

    async fn get_job(&self, key: &ClusterKey, name: &str) -> Result<Option<JobState>>;

    async fn create_job(&self, meta: &ClusterMeta, job: &InstallJob) -> Result<()>;

    async fn delete_job(&self, key: &ClusterKey, name: &str) -> Result<()>;

    async fn ensure_service(&self, meta: &ClusterMeta, service: &ClusterService) -> Result<()>;

    /// Audit event attached to the cluster resource.
    async fn record_event(&self, meta: &ClusterMeta, reason: &str, message: &str) -> Result<()>;
}
