//! Blue/green install volume pair.
//!
//! Each cluster owns two server install volumes. One is active and mounted
//! read-only by every map pod; the other is the standby the install job
//! writes into. A successful, validated install flips the pair.

use tracing::{debug, info};

use ark_model::{ArkClusterStatus, ClusterState, VolumeName};

use crate::api::{ClusterApi, ClusterMeta, JobState, Result};
use crate::resources::InstallJob;

/// Start the install job unless one is already running.
///
/// Returns the observed job when it already exists, so callers never race a
/// second install against a live one.
pub async fn begin_install(
    api: &dyn ClusterApi,
    meta: &ClusterMeta,
    job: &InstallJob,
) -> Result<Option<JobState>> {
    if let Some(existing) = api.get_job(&meta.key(), &job.name).await? {
        debug!(job = %job.name, "install job already present");
        return Ok(Some(existing));
    }
    info!(job = %job.name, target = %job.target_volume, "starting install job");
    api.create_job(meta, job).await?;
    Ok(None)
}

/// Flip the active volume after a validated install.
///
/// Only legal from [`ClusterState::Validating`]; calling it from any other
/// state is a reconciler bug, and panicking here is preferable to corrupting
/// which volume the fleet mounts.
pub fn commit_swap(status: &mut ArkClusterStatus) -> VolumeName {
    assert_eq!(
        status.state,
        ClusterState::Validating,
        "volume swap outside validation"
    );
    let fresh = status.standby_volume();
    status.active_volume = Some(fresh);
    status.active_build_id = status.latest_build_id;
    info!(active = %fresh, build = ?status.active_build_id, "committed volume swap");
    fresh
}
