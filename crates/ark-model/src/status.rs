//! Controller-authored half of the `ArkCluster` resource.
//!
//! The status sub-document is the only shared mutable state per cluster.
//! It is written exclusively by the reconciliation task, conditional on the
//! last-read resource version.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level reconciliation state.
///
/// Per-map suspension is orthogonal: it lives in the spec's suspend list and
/// the per-map [`MapStage`], not here, so a suspended map never blocks other
/// maps' progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterState {
    Idle,
    #[default]
    Initializing,
    CheckingUpdates,
    Updating,
    Validating,
    Swapping,
    RollingRestart,
    Error,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::CheckingUpdates => "CheckingUpdates",
            Self::Updating => "Updating",
            Self::Validating => "Validating",
            Self::Swapping => "Swapping",
            Self::RollingRestart => "RollingRestart",
            Self::Error => "Error",
        };
        write!(f, "{label}")
    }
}

/// One of the two install volumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeName {
    #[default]
    #[serde(rename = "server-a")]
    ServerA,
    #[serde(rename = "server-b")]
    ServerB,
}

impl VolumeName {
    pub fn other(&self) -> Self {
        match self {
            Self::ServerA => Self::ServerB,
            Self::ServerB => Self::ServerA,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerA => "server-a",
            Self::ServerB => "server-b",
        }
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartKind {
    #[default]
    Restart,
    Shutdown,
}

/// Persisted record of one coordinated restart in progress.
///
/// Consumed map-by-map, so a controller restart resumes from the last
/// completed map instead of rewinding the rollout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestartIntent {
    /// When the shutdown phase begins; warnings run until then.
    pub time: Option<DateTime<Utc>>,
    /// Map ids covered by this rollout, in spec order.
    pub maps: Vec<String>,
    #[serde(rename = "type")]
    pub kind: RestartKind,
    pub reason: String,
    /// Active volume snapshot taken when the intent was created.
    pub active_volume: VolumeName,
    pub active_build_id: Option<u64>,
    /// Warning-ladder marks (seconds before shutdown) already broadcast.
    pub notified: Vec<u64>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Readiness poll attempts per in-flight map.
    pub attempts: BTreeMap<String, u32>,
}

impl RestartIntent {
    pub fn is_done(&self, map_id: &str) -> bool {
        self.completed.iter().any(|m| m == map_id) || self.failed.iter().any(|m| m == map_id)
    }
}

/// Per-map install/ready progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MapStage {
    pub ready: bool,
    pub suspended: bool,
    /// Build id the map's pod is currently running.
    pub build_id: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArkClusterStatus {
    pub ready: bool,
    pub state: ClusterState,
    /// Operator-facing detail for `Error` and transient conditions.
    pub message: Option<String>,
    pub observed_generation: Option<i64>,
    pub active_volume: Option<VolumeName>,
    pub active_build_id: Option<u64>,
    pub latest_build_id: Option<u64>,
    /// Why the in-flight update cycle started (`"ARK update"` or
    /// `"mod update (<ids>)"`); consumed when the restart intent is raised.
    pub update_reason: Option<String>,
    /// Last seen registry timestamp per tracked mod id.
    pub mods: BTreeMap<String, String>,
    pub stages: BTreeMap<String, MapStage>,
    pub restart: Option<RestartIntent>,
    pub created_pods: u32,
    pub ready_pods: u32,
    pub suspended_pods: u32,
    pub last_update_check: Option<DateTime<Utc>>,
}

impl ArkClusterStatus {
    /// Active install volume; `server-a` until the first swap is recorded.
    pub fn active_volume(&self) -> VolumeName {
        self.active_volume.unwrap_or_default()
    }

    pub fn standby_volume(&self) -> VolumeName {
        self.active_volume().other()
    }

    pub fn stage_mut(&mut self, map_id: &str) -> &mut MapStage {
        self.stages.entry(map_id.to_owned()).or_default()
    }

    pub fn enter(&mut self, state: ClusterState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "state transition");
            self.state = state;
        }
        if state != ClusterState::Error {
            self.message = None;
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = ClusterState::Error;
        self.ready = false;
        self.message = Some(message.into());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_volume_serde_names() {
        assert_eq!(
            serde_json::to_string(&VolumeName::ServerA).expect("json"),
            "\"server-a\""
        );
        assert_eq!(VolumeName::ServerB.other(), VolumeName::ServerA);
    }

    #[test]
    fn test_empty_status_starts_initializing() {
        let status = ArkClusterStatus::default();
        assert_eq!(status.state, ClusterState::Initializing);
        assert_eq!(status.active_volume(), VolumeName::ServerA);
        assert_eq!(status.standby_volume(), VolumeName::ServerB);
    }

    #[test]
    fn test_intent_kind_uses_type_key() {
        let intent = RestartIntent {
            maps: vec!["TheIsland_WP".to_owned()],
            reason: "update".to_owned(),
            ..Default::default()
        };
        let value = serde_json::to_value(&intent).expect("json");
        assert_eq!(value["type"], "restart");
        assert_eq!(value["activeVolume"], "server-a");
    }

    #[test]
    fn test_fail_records_message() {
        let mut status = ArkClusterStatus::default();
        status.fail("install job exhausted retries");
        assert_eq!(status.state, ClusterState::Error);
        assert!(!status.ready);
        assert!(status.message.as_deref().is_some_and(|m| m.contains("install")));
    }
}
