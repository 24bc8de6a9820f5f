//! Builders for the objects a cluster owns.
//!
//! These are platform-neutral descriptions; the [`crate::api`]
//! implementations translate them into concrete API objects.

use std::collections::BTreeMap;

use ark_model::{
    ArkClusterSpec, ArkClusterStatus, GameMap, Toleration, VolumeName, ACTIVE_VOLUME_LABEL,
    BUILD_LABEL, CLUSTER_LABEL, MAP_LABEL, OPERATOR_VERSION_LABEL,
};

use crate::api::ClusterMeta;
use crate::config::OperatorConfig;

/// Paths inside server containers.
pub const INSTALL_MOUNT: &str = "/srv/ark/server";
pub const DATA_MOUNT: &str = "/srv/ark/data";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerPod {
    pub name: String,
    pub map: GameMap,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub envs: BTreeMap<String, String>,
    /// Active install volume, mounted read-only.
    pub volume: VolumeName,
    pub volume_claim: String,
    pub data_claim: String,
    /// Per-map writable subpath on the data volume.
    pub data_subpath: String,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
    pub run_as_user: Option<i64>,
    pub run_as_group: Option<i64>,
    /// ConfigMaps sourced into the environment when present.
    pub config_env_sources: Vec<String>,
    /// Secrets sourced into the environment when present.
    pub secret_env_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeClaim {
    pub name: String,
    pub size: String,
    pub storage_class: Option<String>,
    /// Survives cluster deletion when set.
    pub persist: bool,
    /// Mounted by every map pod at once (the data volume).
    pub shared: bool,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallJob {
    pub name: String,
    pub image: String,
    /// Standby volume written by the install.
    pub target_volume: VolumeName,
    pub target_claim: String,
    pub labels: BTreeMap<String, String>,
    pub envs: BTreeMap<String, String>,
    pub backoff_limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterService {
    pub name: String,
    /// (port name, port) pairs; one game and one rcon port per map.
    pub ports: Vec<(String, u16)>,
    pub selector: BTreeMap<String, String>,
    pub load_balancer_ip: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

pub fn pod_name(cluster: &str, map: &GameMap) -> String {
    format!("{cluster}-{}", map.slug)
}

pub fn volume_claim_name(cluster: &str, volume: VolumeName) -> String {
    format!("{cluster}-{volume}")
}

pub fn data_claim_name(cluster: &str) -> String {
    format!("{cluster}-data")
}

pub fn install_job_name(cluster: &str) -> String {
    format!("{cluster}-install")
}

pub fn init_job_name(cluster: &str) -> String {
    format!("{cluster}-init")
}

pub fn service_name(cluster: &str) -> String {
    cluster.to_owned()
}

/// In-cluster DNS name servers are reachable at for RCON.
pub fn cluster_host(meta: &ClusterMeta) -> String {
    format!("{}.{}.svc.cluster.local", service_name(&meta.name), meta.namespace)
}

pub fn cluster_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CLUSTER_LABEL.to_owned(), cluster.to_owned())])
}

pub fn server_pod(
    meta: &ClusterMeta,
    spec: &ArkClusterSpec,
    status: &ArkClusterStatus,
    map: &GameMap,
    config: &OperatorConfig,
) -> ServerPod {
    let volume = status.active_volume();
    let mut labels = cluster_labels(&meta.name);
    labels.insert(MAP_LABEL.to_owned(), map.id.clone());
    labels.insert(ACTIVE_VOLUME_LABEL.to_owned(), volume.to_string());
    labels.insert(
        OPERATOR_VERSION_LABEL.to_owned(),
        env!("CARGO_PKG_VERSION").to_owned(),
    );
    if let Some(build) = status.active_build_id {
        labels.insert(BUILD_LABEL.to_owned(), build.to_string());
    }

    let mut envs = spec.global_settings.map_envs(map);
    envs.insert("ARK_CLUSTER_NAME".to_owned(), meta.name.clone());
    envs.insert("ARK_CLUSTER_NAMESPACE".to_owned(), meta.namespace.clone());
    if config.dry_run {
        envs.insert("ARK_OP_DRY_RUN".to_owned(), "true".to_owned());
    }

    ServerPod {
        name: pod_name(&meta.name, map),
        map: map.clone(),
        image: config.server_image.clone(),
        labels,
        envs,
        volume,
        volume_claim: volume_claim_name(&meta.name, volume),
        data_claim: data_claim_name(&meta.name),
        data_subpath: format!("maps/{}", map.slug),
        node_selector: spec.server.node_selector.clone(),
        tolerations: spec.server.tolerations.clone(),
        run_as_user: spec.run_as_user,
        run_as_group: spec.run_as_group,
        config_env_sources: vec![
            format!("{}-global-envs", meta.name),
            format!("{}-map-envs-{}", meta.name, map.slug),
        ],
        secret_env_sources: vec![format!("{}-cluster-secrets", meta.name)],
    }
}

pub fn volume_claims(meta: &ClusterMeta, spec: &ArkClusterSpec) -> Vec<VolumeClaim> {
    let labels = cluster_labels(&meta.name);
    vec![
        VolumeClaim {
            name: volume_claim_name(&meta.name, VolumeName::ServerA),
            size: spec.server.size.clone(),
            storage_class: spec.server.storage_class.clone(),
            persist: spec.server.persist,
            shared: false,
            labels: labels.clone(),
        },
        VolumeClaim {
            name: volume_claim_name(&meta.name, VolumeName::ServerB),
            size: spec.server.size.clone(),
            storage_class: spec.server.storage_class.clone(),
            persist: spec.server.persist,
            shared: false,
            labels: labels.clone(),
        },
        VolumeClaim {
            name: data_claim_name(&meta.name),
            size: spec.data.size.clone(),
            storage_class: spec.data.storage_class.clone(),
            persist: spec.data.persist,
            shared: true,
            labels,
        },
    ]
}

/// Install job writing the standby volume.
pub fn install_job(
    meta: &ClusterMeta,
    status: &ArkClusterStatus,
    config: &OperatorConfig,
) -> InstallJob {
    let target = status.standby_volume();
    let mut labels = cluster_labels(&meta.name);
    labels.insert(ACTIVE_VOLUME_LABEL.to_owned(), target.to_string());

    let mut envs = BTreeMap::from([
        ("ARK_CLUSTER_NAME".to_owned(), meta.name.clone()),
        ("ARK_CLUSTER_NAMESPACE".to_owned(), meta.namespace.clone()),
        ("ARK_OP_INSTALL_TARGET".to_owned(), INSTALL_MOUNT.to_owned()),
    ]);
    if let Some(latest) = status.latest_build_id {
        envs.insert("ARK_OP_EXPECTED_BUILD".to_owned(), latest.to_string());
    }
    if config.dry_run {
        envs.insert("ARK_OP_DRY_RUN".to_owned(), "true".to_owned());
    }

    InstallJob {
        name: install_job_name(&meta.name),
        image: config.server_image.clone(),
        target_volume: target,
        target_claim: volume_claim_name(&meta.name, target),
        labels,
        envs,
        backoff_limit: config.job_retries,
    }
}

/// One-shot job preparing the shared data volume layout.
pub fn init_job(
    meta: &ClusterMeta,
    spec: &ArkClusterSpec,
    config: &OperatorConfig,
) -> InstallJob {
    let mut envs = BTreeMap::from([
        ("ARK_CLUSTER_NAME".to_owned(), meta.name.clone()),
        ("ARK_CLUSTER_NAMESPACE".to_owned(), meta.namespace.clone()),
        ("ARK_OP_INSTALL_TARGET".to_owned(), DATA_MOUNT.to_owned()),
        (
            "ARK_OP_MAPS".to_owned(),
            spec.game_maps()
                .iter()
                .map(|m| m.id.clone())
                .collect::<Vec<_>>()
                .join(","),
        ),
    ]);
    if config.dry_run {
        envs.insert("ARK_OP_DRY_RUN".to_owned(), "true".to_owned());
    }

    InstallJob {
        name: init_job_name(&meta.name),
        image: config.server_image.clone(),
        target_volume: VolumeName::ServerA,
        target_claim: data_claim_name(&meta.name),
        labels: cluster_labels(&meta.name),
        envs,
        backoff_limit: config.job_retries,
    }
}

pub fn cluster_service(
    meta: &ClusterMeta,
    spec: &ArkClusterSpec,
    maps: &[GameMap],
) -> ClusterService {
    let mut ports = Vec::with_capacity(maps.len() * 2);
    for map in maps {
        ports.push((format!("game-{}", map.slug), map.game_port));
        ports.push((format!("rcon-{}", map.slug), map.rcon_port));
    }
    ClusterService {
        name: service_name(&meta.name),
        ports,
        selector: cluster_labels(&meta.name),
        load_balancer_ip: spec.server.load_balancer_ip.clone(),
        labels: cluster_labels(&meta.name),
        annotations: spec.server.service_annotations.clone(),
    }
}
