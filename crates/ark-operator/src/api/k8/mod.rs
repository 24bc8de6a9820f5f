//! Kubernetes-backed [`ClusterApi`].
//!
//! Thin translation layer: domain objects from [`crate::resources`] become
//! core-kind API objects, and raw API objects are reduced back to the
//! observed-state structs the reconciler consumes. All writes go through the
//! shared client; `--dry-run` suppresses them with a log line instead.

pub mod objects;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use k8_client::http::status::StatusCode;
use k8_client::meta_client::MetadataClient;
use k8_client::SharedK8Client;
use k8_types::{
    InputK8Obj, InputObjectMeta, K8Obj, MetaStatus, OwnerReferences, Spec, UpdateK8ObjStatus,
};
use tracing::{debug, info, instrument};

use ark_model::{
    ArkClusterSpec, ArkClusterStatus, VolumeName, ACTIVE_VOLUME_LABEL, BUILD_LABEL, CLUSTER_LABEL,
    MAP_LABEL,
};

use crate::resources::{ClusterService, InstallJob, ServerPod, VolumeClaim, DATA_MOUNT};

use self::objects::{
    K8Container, K8ContainerPort, K8EnvFromSource, K8EnvSourceRef, K8EnvVar, K8JobSpec,
    K8PodSecurityContext, K8PodSpec, K8PodTemplate, K8Probe, K8PvcSource, K8PvcSpec,
    K8ResourceRequirements, K8ServicePort, K8ServiceSpec, K8TcpSocketAction, K8TemplateMeta,
    K8Toleration, K8Volume, K8VolumeMount,
};

use super::{
    ClusterApi, ClusterApiError, ClusterKey, ClusterMeta, ClusterObject, JobState, PodState,
    Result, VolumePhase,
};

pub struct K8ClusterApi {
    client: SharedK8Client,
    namespace: String,
    dry_run: bool,
}

impl K8ClusterApi {
    pub fn new(client: SharedK8Client, namespace: impl Into<String>, dry_run: bool) -> Arc<Self> {
        Arc::new(Self {
            client,
            namespace: namespace.into(),
            dry_run,
        })
    }

    fn named(&self, name: &str) -> InputObjectMeta {
        InputObjectMeta::named(name, &self.namespace)
    }

    /// Metadata for an object garbage-collected with its cluster.
    fn owned(&self, name: &str, owner: &ClusterMeta) -> InputObjectMeta {
        let mut metadata = self.named(name);
        metadata.owner_references = vec![owner_reference(owner)];
        metadata
    }

    fn to_cluster(item: K8Obj<ArkClusterSpec>) -> ClusterObject {
        let generation = spec_revision(&item.spec);
        ClusterObject {
            meta: ClusterMeta {
                name: item.metadata.name.clone(),
                namespace: item.metadata.namespace.clone(),
                uid: item.metadata.uid.clone(),
                resource_version: item.metadata.resource_version.clone(),
                generation,
            },
            spec: item.spec,
            status: item.status,
        }
    }

    /// Create, logging instead when running with `--dry-run`.
    async fn create<S>(&self, input: InputK8Obj<S>) -> Result<()>
    where
        S: k8_types::Spec + serde::Serialize + std::fmt::Debug + Send + Sync,
    {
        if self.dry_run {
            info!(
                kind = S::metadata().names.kind,
                name = %input.metadata.name,
                "dry-run: skipping create"
            );
            return Ok(());
        }
        self.client.create_item(input).await.map_err(map_err)?;
        Ok(())
    }

    async fn delete<S>(&self, name: &str) -> Result<()>
    where
        S: k8_types::Spec + Send + Sync,
        S::Status: Send + Sync,
        S::Header: Send + Sync,
    {
        if self.dry_run {
            info!(
                kind = S::metadata().names.kind,
                name,
                "dry-run: skipping delete"
            );
            return Ok(());
        }
        match self.client.delete_item::<S, _>(&self.named(name)).await {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(map_err(err)),
        }
    }
}

#[async_trait]
impl ClusterApi for K8ClusterApi {
    async fn list_clusters(&self) -> Result<Vec<ClusterObject>> {
        let items = self
            .client
            .retrieve_items::<ArkClusterSpec, _>(self.namespace.as_str())
            .await
            .map_err(map_err)?;
        Ok(items.items.into_iter().map(Self::to_cluster).collect())
    }

    async fn get_cluster(&self, key: &ClusterKey) -> Result<ClusterObject> {
        let meta = InputObjectMeta::named(&key.name, &key.namespace);
        self.client
            .retrieve_item::<ArkClusterSpec, _>(&meta)
            .await
            .map_err(map_err)?
            .map(Self::to_cluster)
            .ok_or_else(|| ClusterApiError::NotFound(key.to_string()))
    }

    #[instrument(skip(self, status), fields(cluster = %meta.key()))]
    async fn update_status(
        &self,
        meta: &ClusterMeta,
        status: &ArkClusterStatus,
    ) -> Result<ClusterMeta> {
        if self.dry_run {
            info!(state = %status.state, "dry-run: skipping status write");
            return Ok(meta.clone());
        }
        // re-read so the write is conditional on the version this pass
        // reconciled against, not on whatever is current
        let current = self
            .client
            .retrieve_item::<ArkClusterSpec, _>(&InputObjectMeta::named(&meta.name, &meta.namespace))
            .await
            .map_err(map_err)?
            .ok_or_else(|| ClusterApiError::NotFound(meta.key().to_string()))?;
        if current.metadata.resource_version != meta.resource_version {
            debug!(
                read = %meta.resource_version,
                current = %current.metadata.resource_version,
                "stale resource version"
            );
            return Err(ClusterApiError::Conflict);
        }
        let update: UpdateK8ObjStatus<ArkClusterSpec> = UpdateK8ObjStatus {
            api_version: ArkClusterSpec::api_version(),
            kind: ArkClusterSpec::kind(),
            metadata: current.metadata.clone().into(),
            status: status.clone(),
            ..Default::default()
        };
        let updated = self.client.update_status(&update).await.map_err(map_err)?;
        Ok(ClusterMeta {
            name: meta.name.clone(),
            namespace: meta.namespace.clone(),
            uid: meta.uid.clone(),
            resource_version: updated.metadata.resource_version.clone(),
            generation: meta.generation,
        })
    }

    async fn list_pods(&self, key: &ClusterKey) -> Result<Vec<PodState>> {
        let items = self
            .client
            .retrieve_items::<K8PodSpec, _>(key.namespace.as_str())
            .await
            .map_err(map_err)?;
        let mut pods: Vec<PodState> = items
            .items
            .into_iter()
            .filter(|item| item.metadata.labels.get(CLUSTER_LABEL) == Some(&key.name))
            .map(|item| {
                let labels = &item.metadata.labels;
                PodState {
                    name: item.metadata.name.clone(),
                    map_id: labels.get(MAP_LABEL).cloned().unwrap_or_default(),
                    volume: labels
                        .get(ACTIVE_VOLUME_LABEL)
                        .map(|v| match v.as_str() {
                            "server-b" => VolumeName::ServerB,
                            _ => VolumeName::ServerA,
                        }),
                    build_id: labels.get(BUILD_LABEL).and_then(|b| b.parse().ok()),
                    ready: item.status.is_ready(),
                }
            })
            .collect();
        pods.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pods)
    }

    async fn apply_pod(&self, meta: &ClusterMeta, pod: &ServerPod) -> Result<bool> {
        let existing = self
            .client
            .retrieve_item::<K8PodSpec, _>(&self.named(&pod.name))
            .await
            .map_err(map_err)?;
        if existing.is_some() {
            return Ok(false);
        }

        let mut metadata = self.owned(&pod.name, meta);
        metadata.labels = pod.labels.clone().into_iter().collect();
        self.create(InputK8Obj::new(pod_spec(pod), metadata)).await?;
        Ok(true)
    }

    async fn delete_pod(&self, _key: &ClusterKey, name: &str) -> Result<()> {
        self.delete::<K8PodSpec>(name).await
    }

    async fn ensure_volume(&self, meta: &ClusterMeta, claim: &VolumeClaim) -> Result<()> {
        let existing = self
            .client
            .retrieve_item::<K8PvcSpec, _>(&self.named(&claim.name))
            .await
            .map_err(map_err)?;
        if existing.is_some() {
            return Ok(());
        }

        let mut metadata = self.named(&claim.name);
        metadata.owner_references = claim_owner_references(claim, meta);
        metadata.labels = claim.labels.clone().into_iter().collect();
        self.create(InputK8Obj::new(claim_spec(claim), metadata)).await
    }

    async fn volume_phase(&self, key: &ClusterKey, name: &str) -> Result<Option<VolumePhase>> {
        let meta = InputObjectMeta::named(name, &key.namespace);
        let item = self
            .client
            .retrieve_item::<K8PvcSpec, _>(&meta)
            .await
            .map_err(map_err)?;
        Ok(item.map(|item| match item.status.phase.as_deref() {
            Some("Bound") => VolumePhase::Bound,
            _ => VolumePhase::Pending,
        }))
    }

    async fn get_job(&self, key: &ClusterKey, name: &str) -> Result<Option<JobState>> {
        let meta = InputObjectMeta::named(name, &key.namespace);
        let item = self
            .client
            .retrieve_item::<K8JobSpec, _>(&meta)
            .await
            .map_err(map_err)?;
        Ok(item.map(|item| JobState {
            name: item.metadata.name.clone(),
            active: item.status.active.unwrap_or(0) > 0,
            succeeded: item.status.succeeded.unwrap_or(0),
            failed: item.status.failed.unwrap_or(0),
            build_id: item
                .metadata
                .annotations
                .get(BUILD_LABEL)
                .and_then(|b| b.parse().ok()),
        }))
    }

    async fn create_job(&self, meta: &ClusterMeta, job: &InstallJob) -> Result<()> {
        let mut metadata = self.owned(&job.name, meta);
        metadata.labels = job.labels.clone().into_iter().collect();
        self.create(InputK8Obj::new(job_spec(job), metadata)).await
    }

    async fn delete_job(&self, _key: &ClusterKey, name: &str) -> Result<()> {
        self.delete::<K8JobSpec>(name).await
    }

    async fn ensure_service(&self, meta: &ClusterMeta, service: &ClusterService) -> Result<()> {
        let desired = service_spec(service);
        match self
            .client
            .retrieve_item::<K8ServiceSpec, _>(&self.named(&service.name))
            .await
        {
            Ok(Some(item)) if item.spec == desired => return Ok(()),
            Ok(_) | Err(_) => {}
        }

        if self.dry_run {
            info!(name = %service.name, "dry-run: skipping service apply");
            return Ok(());
        }
        let mut metadata = self.owned(&service.name, meta);
        metadata.labels = service.labels.clone().into_iter().collect();
        metadata.annotations = service.annotations.clone().into_iter().collect();
        self.client
            .apply(InputK8Obj::new(desired, metadata))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn record_event(&self, meta: &ClusterMeta, reason: &str, message: &str) -> Result<()> {
        // events land in the operator log; the status message carries the
        // user-facing copy
        info!(cluster = %meta.key(), reason, message, "cluster event");
        Ok(())
    }
}

/// Spec revision token recorded as `observedGeneration`.
///
/// Derived from the serialized spec so any user edit moves it, which is what
/// error recovery keys on.
pub fn spec_revision(spec: &ArkClusterSpec) -> i64 {
    let serialized = serde_json::to_string(spec).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    // keep it positive so it reads like a generation in kubectl output
    (hasher.finish() >> 1) as i64
}

/// Reference marking an object as owned by its `ArkCluster`, so the API
/// server garbage-collects it with the cluster.
fn owner_reference(owner: &ClusterMeta) -> OwnerReferences {
    OwnerReferences {
        api_version: ArkClusterSpec::api_version(),
        kind: ArkClusterSpec::kind(),
        name: owner.name.clone(),
        uid: owner.uid.clone(),
        controller: Some(true),
        ..Default::default()
    }
}

/// Persistent claims outlive the cluster, so they get no owner reference
/// and survive deletion for the next install to adopt.
fn claim_owner_references(claim: &VolumeClaim, owner: &ClusterMeta) -> Vec<OwnerReferences> {
    if claim.persist {
        Vec::new()
    } else {
        vec![owner_reference(owner)]
    }
}

fn api_code(err: &anyhow::Error) -> Option<u16> {
    let status = err
        .downcast_ref::<MetaStatus>()
        .or_else(|| err.root_cause().downcast_ref::<MetaStatus>())?;
    status.code
}

fn map_err(err: anyhow::Error) -> ClusterApiError {
    match api_code(&err) {
        Some(code) if code == StatusCode::CONFLICT.as_u16() => ClusterApiError::Conflict,
        Some(code) if code == StatusCode::NOT_FOUND.as_u16() => {
            ClusterApiError::NotFound(err.to_string())
        }
        _ => ClusterApiError::Client(err.to_string()),
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    api_code(err) == Some(StatusCode::NOT_FOUND.as_u16())
}

fn env_vars(envs: &std::collections::BTreeMap<String, String>) -> Vec<K8EnvVar> {
    envs.iter()
        .map(|(name, value)| K8EnvVar {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn pod_spec(pod: &ServerPod) -> K8PodSpec {
    K8PodSpec {
        containers: vec![K8Container {
            name: "ark-server".to_owned(),
            image: pod.image.clone(),
            env: env_vars(&pod.envs),
            env_from: env_from_sources(pod),
            ports: vec![
                K8ContainerPort {
                    name: Some("game".to_owned()),
                    container_port: pod.map.game_port,
                    protocol: Some("UDP".to_owned()),
                },
                K8ContainerPort {
                    name: Some("rcon".to_owned()),
                    container_port: pod.map.rcon_port,
                    protocol: Some("TCP".to_owned()),
                },
            ],
            volume_mounts: vec![
                K8VolumeMount {
                    name: "server".to_owned(),
                    mount_path: crate::resources::INSTALL_MOUNT.to_owned(),
                    sub_path: None,
                    read_only: true,
                },
                K8VolumeMount {
                    name: "data".to_owned(),
                    mount_path: DATA_MOUNT.to_owned(),
                    sub_path: Some(pod.data_subpath.clone()),
                    read_only: false,
                },
            ],
            // the RCON listener only comes up once the world is loaded, so
            // a TCP check doubles as a players-can-join gate
            readiness_probe: Some(K8Probe {
                tcp_socket: Some(K8TcpSocketAction {
                    port: pod.map.rcon_port,
                }),
                initial_delay_seconds: 30,
                period_seconds: 15,
                failure_threshold: 8,
            }),
        }],
        volumes: vec![
            K8Volume {
                name: "server".to_owned(),
                persistent_volume_claim: Some(K8PvcSource {
                    claim_name: pod.volume_claim.clone(),
                    read_only: true,
                }),
            },
            K8Volume {
                name: "data".to_owned(),
                persistent_volume_claim: Some(K8PvcSource {
                    claim_name: pod.data_claim.clone(),
                    read_only: false,
                }),
            },
        ],
        node_selector: (!pod.node_selector.is_empty()).then(|| pod.node_selector.clone()),
        tolerations: pod
            .tolerations
            .iter()
            .map(|t| K8Toleration {
                key: t.key.clone(),
                operator: t.operator.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
                toleration_seconds: t.toleration_seconds,
            })
            .collect(),
        security_context: security_context(pod),
        restart_policy: Some("Always".to_owned()),
        termination_grace_period_seconds: None,
    }
}

fn security_context(pod: &ServerPod) -> Option<K8PodSecurityContext> {
    (pod.run_as_user.is_some() || pod.run_as_group.is_some()).then(|| K8PodSecurityContext {
        run_as_user: pod.run_as_user,
        run_as_group: pod.run_as_group,
        // group ownership on the shared data volume follows the server group
        fs_group: pod.run_as_group,
    })
}

// Overlay ConfigMaps/Secrets are user-managed and frequently absent, so
// every source is optional.
fn env_from_sources(pod: &ServerPod) -> Vec<K8EnvFromSource> {
    let mut sources: Vec<K8EnvFromSource> = pod
        .config_env_sources
        .iter()
        .map(|name| K8EnvFromSource {
            config_map_ref: Some(K8EnvSourceRef {
                name: name.clone(),
                optional: true,
            }),
            secret_ref: None,
        })
        .collect();
    sources.extend(pod.secret_env_sources.iter().map(|name| K8EnvFromSource {
        config_map_ref: None,
        secret_ref: Some(K8EnvSourceRef {
            name: name.clone(),
            optional: true,
        }),
    }));
    sources
}

fn job_spec(job: &InstallJob) -> K8JobSpec {
    let mount_path = job
        .envs
        .get("ARK_OP_INSTALL_TARGET")
        .cloned()
        .unwrap_or_else(|| crate::resources::INSTALL_MOUNT.to_owned());
    K8JobSpec {
        backoff_limit: Some(job.backoff_limit),
        ttl_seconds_after_finished: None,
        template: K8PodTemplate {
            metadata: Some(K8TemplateMeta {
                labels: job.labels.clone(),
            }),
            spec: K8PodSpec {
                containers: vec![K8Container {
                    name: "ark-install".to_owned(),
                    image: job.image.clone(),
                    env: env_vars(&job.envs),
                    env_from: Vec::new(),
                    ports: Vec::new(),
                    volume_mounts: vec![K8VolumeMount {
                        name: "target".to_owned(),
                        mount_path,
                        sub_path: None,
                        read_only: false,
                    }],
                    readiness_probe: None,
                }],
                volumes: vec![K8Volume {
                    name: "target".to_owned(),
                    persistent_volume_claim: Some(K8PvcSource {
                        claim_name: job.target_claim.clone(),
                        read_only: false,
                    }),
                }],
                node_selector: None,
                tolerations: Vec::new(),
                security_context: None,
                restart_policy: Some("Never".to_owned()),
                termination_grace_period_seconds: None,
            },
        },
    }
}

fn claim_spec(claim: &VolumeClaim) -> K8PvcSpec {
    let mode = if claim.shared {
        "ReadWriteMany"
    } else {
        "ReadWriteOnce"
    };
    K8PvcSpec {
        access_modes: vec![mode.to_owned()],
        storage_class_name: claim.storage_class.clone(),
        resources: K8ResourceRequirements {
            requests: [("storage".to_owned(), claim.size.clone())].into(),
        },
    }
}

fn service_spec(service: &ClusterService) -> K8ServiceSpec {
    K8ServiceSpec {
        service_type: service
            .load_balancer_ip
            .is_some()
            .then(|| "LoadBalancer".to_owned()),
        selector: service.selector.clone(),
        ports: service
            .ports
            .iter()
            .map(|(name, port)| K8ServicePort {
                name: name.clone(),
                port: *port,
                protocol: Some(if name.starts_with("rcon-") {
                    "TCP".to_owned()
                } else {
                    "UDP".to_owned()
                }),
            })
            .collect(),
        load_balancer_ip: service.load_balancer_ip.clone(),
    }
}
