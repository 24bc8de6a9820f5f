//! Kubernetes binding for the `ArkCluster` custom resource.

use k8_types::{Crd, CrdNames, DefaultHeader, Spec, Status};

use crate::spec::ArkClusterSpec;
use crate::status::ArkClusterStatus;

pub const GROUP: &str = "mort.is";
pub const V1: &str = "v1";

const ARK_CLUSTER_API: Crd = Crd {
    group: GROUP,
    version: V1,
    names: CrdNames {
        kind: "ArkCluster",
        plural: "arkclusters",
        singular: "arkcluster",
    },
};

impl Spec for ArkClusterSpec {
    type Status = ArkClusterStatus;
    type Header = DefaultHeader;

    fn metadata() -> &'static Crd {
        &ARK_CLUSTER_API
    }
}

impl Status for ArkClusterStatus {}
