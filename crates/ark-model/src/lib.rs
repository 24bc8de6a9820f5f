pub mod maps;
pub mod spec;
pub mod status;

mod k8;

pub use k8::{GROUP, V1};
pub use maps::GameMap;
pub use spec::{ArkClusterSpec, DataSpec, GlobalSettings, MessageFormats, ServerSpec, Toleration};
pub use status::{ArkClusterStatus, ClusterState, MapStage, RestartIntent, RestartKind, VolumeName};

/// Label carrying the install volume a pod was created against.
pub const ACTIVE_VOLUME_LABEL: &str = "mort.is/active-volume";
/// Label/annotation carrying a build id.
pub const BUILD_LABEL: &str = "mort.is/ark-build";
/// Label carrying the map id a pod serves.
pub const MAP_LABEL: &str = "mort.is/map";
/// Label tying owned objects back to their cluster.
pub const CLUSTER_LABEL: &str = "mort.is/cluster";

/// Operator release that created the object.
pub const OPERATOR_VERSION_LABEL: &str = "mort.is/operator-version";
