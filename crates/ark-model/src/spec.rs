//! User-authored half of the `ArkCluster` resource.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::maps::{resolve_maps, GameMap};

/// Declared desired state for one ARK cluster.
///
/// One cluster fans out into one pod per resolved map, a shared data volume
/// and a blue/green pair of install volumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArkClusterSpec {
    pub server: ServerSpec,
    pub data: DataSpec,
    pub global_settings: GlobalSettings,
    pub run_as_user: Option<i64>,
    pub run_as_group: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSpec {
    /// Ordered map list. Entries may be concrete map ids, `@canonical` /
    /// `@official` groups (optionally suffixed `NoClub`) or `-Map`
    /// exclusions.
    pub maps: Vec<String>,
    /// Maps excluded from automated restart/update handling.
    pub suspend: Vec<String>,
    pub game_port_start: u16,
    pub rcon_port_start: u16,
    /// Requested size of each install volume, e.g. `50Gi`.
    pub size: String,
    pub storage_class: Option<String>,
    /// Keep install volumes when the cluster is deleted.
    pub persist: bool,
    pub load_balancer_ip: Option<String>,
    /// Extra annotations on the cluster service, e.g. for external-dns
    /// or cloud load-balancer tuning.
    pub service_annotations: BTreeMap<String, String>,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
    /// Grace period between the first restart warning and shutdown.
    #[serde(with = "humantime_serde")]
    pub graceful_shutdown: Duration,
    pub messages: MessageFormats,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            maps: vec!["@canonical".to_owned()],
            suspend: vec![],
            game_port_start: 7777,
            rcon_port_start: 27020,
            size: "50Gi".to_owned(),
            storage_class: None,
            persist: false,
            load_balancer_ip: None,
            service_annotations: BTreeMap::new(),
            node_selector: BTreeMap::new(),
            tolerations: vec![],
            graceful_shutdown: Duration::from_secs(30 * 60),
            messages: MessageFormats::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataSpec {
    /// Requested size of the shared data volume.
    pub size: String,
    pub storage_class: Option<String>,
    pub persist: bool,
}

impl Default for DataSpec {
    fn default() -> Self {
        Self {
            size: "50Gi".to_owned(),
            storage_class: None,
            persist: true,
        }
    }
}

/// Restart broadcast templates. `{interval}`, `{reason}` and `{map_name}`
/// are substituted at send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageFormats {
    pub restart: String,
    pub shutdown: String,
}

impl Default for MessageFormats {
    fn default() -> Self {
        Self {
            restart: "Server is restarting in {interval} for {reason}".to_owned(),
            shutdown: "Server is shutting down for {reason}".to_owned(),
        }
    }
}

/// Scheduling toleration, shape-compatible with `pod.spec.tolerations`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Toleration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Settings shared by every map's server process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    /// Session name template, `{map_name}` is replaced per map.
    pub session_name_format: String,
    pub max_players: u32,
    pub cluster_id: String,
    pub battleye: bool,
    pub allowed_platforms: Vec<String>,
    pub whitelist: bool,
    pub multihome_ip: Option<String>,
    /// Extra `?` params appended to the map url.
    pub params: Vec<String>,
    /// Extra `-` switches appended to the command line.
    pub opts: Vec<String>,
    /// CurseForge project ids of tracked mods.
    pub mods: Vec<u32>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            session_name_format: "ASA - {map_name}".to_owned(),
            max_players: 70,
            cluster_id: "ark-cluster".to_owned(),
            battleye: true,
            allowed_platforms: vec!["ALL".to_owned()],
            whitelist: false,
            multihome_ip: None,
            params: vec![],
            opts: vec![],
            mods: vec![],
        }
    }
}

impl ArkClusterSpec {
    /// Resolve the declared map list into concrete maps with assigned ports.
    pub fn game_maps(&self) -> Vec<GameMap> {
        resolve_maps(
            &self.server.maps,
            self.server.game_port_start,
            self.server.rcon_port_start,
        )
    }

    /// Resolved maps that are not suspended.
    pub fn active_maps(&self) -> Vec<GameMap> {
        self.game_maps()
            .into_iter()
            .filter(|m| !self.is_suspended(&m.id))
            .collect()
    }

    pub fn is_suspended(&self, map_id: &str) -> bool {
        self.server.suspend.iter().any(|m| m == map_id)
    }
}

impl GlobalSettings {
    /// Environment contract of a per-map server pod.
    pub fn map_envs(&self, map: &GameMap) -> BTreeMap<String, String> {
        let mut envs = BTreeMap::new();
        envs.insert("ARK_SERVER_MAP".to_owned(), map.id.clone());
        envs.insert(
            "ARK_SERVER_SESSION_NAME".to_owned(),
            self.session_name_format.replace("{map_name}", &map.name),
        );
        envs.insert(
            "ARK_SERVER_GAME_PORT".to_owned(),
            map.game_port.to_string(),
        );
        envs.insert(
            "ARK_SERVER_RCON_PORT".to_owned(),
            map.rcon_port.to_string(),
        );
        envs.insert(
            "ARK_SERVER_MAX_PLAYERS".to_owned(),
            self.max_players.to_string(),
        );
        envs.insert("ARK_SERVER_CLUSTER_ID".to_owned(), self.cluster_id.clone());
        envs.insert(
            "ARK_SERVER_BATTLEYE".to_owned(),
            self.battleye.to_string(),
        );
        envs.insert(
            "ARK_SERVER_ALLOWED_PLATFORMS".to_owned(),
            self.allowed_platforms.join(","),
        );
        envs.insert(
            "ARK_SERVER_WHITELIST".to_owned(),
            self.whitelist.to_string(),
        );
        envs.insert("ARK_SERVER_AUTO_UPDATE".to_owned(), "false".to_owned());
        envs.insert("ARK_SERVER_CLUSTER_MODE".to_owned(), "true".to_owned());
        if let Some(multihome) = &self.multihome_ip {
            envs.insert("ARK_SERVER_MULTIHOME".to_owned(), multihome.clone());
        }
        if !self.params.is_empty() {
            envs.insert("ARK_SERVER_PARAMS".to_owned(), self.params.join("?"));
        }
        if !self.opts.is_empty() {
            envs.insert("ARK_SERVER_OPTS".to_owned(), self.opts.join(" "));
        }
        if !self.mods.is_empty() {
            envs.insert(
                "ARK_SERVER_MODS".to_owned(),
                self.mods
                    .iter()
                    .map(|m| m.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        envs
    }
}
