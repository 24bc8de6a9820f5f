//! Coordinated rolling restarts.
//!
//! A rollout is driven by the persisted [`RestartIntent`] on the cluster
//! status, consumed map-by-map so a controller restart resumes mid-rollout.
//! Two phases: a warning ladder broadcast over RCON until the intent's
//! shutdown time, then a per-map save/exit/recreate cycle. One map is in
//! flight at a time; a map that cannot come back is recorded as failed and
//! the rollout moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use ark_model::{ArkClusterSpec, ArkClusterStatus, GameMap, RestartIntent, RestartKind};

use crate::api::{ClusterApi, ClusterMeta, Result};
use crate::console::Console;
use crate::resources::{cluster_host, pod_name};

/// Fixed warning marks, in seconds before shutdown.
const WARNING_LADDER: &[u64] = &[3600, 1800, 300, 60, 30, 10];

/// Warning marks for a grace period: the full period itself, then every
/// ladder mark inside it, descending.
pub fn notify_intervals(grace: Duration) -> Vec<u64> {
    let grace = grace.as_secs();
    if grace == 0 {
        return vec![];
    }
    let mut marks = vec![grace];
    marks.extend(WARNING_LADDER.iter().copied().filter(|m| *m < grace));
    marks
}

/// Maps still owed a restart, in spec order. Suspended maps are skipped
/// even when the intent was created before they were suspended.
pub fn pending_maps(spec: &ArkClusterSpec, intent: &RestartIntent) -> Vec<GameMap> {
    spec.game_maps()
        .into_iter()
        .filter(|m| intent.maps.iter().any(|id| id == &m.id))
        .filter(|m| !spec.is_suspended(&m.id))
        .filter(|m| !intent.is_done(&m.id))
        .collect()
}

#[derive(Debug, PartialEq)]
pub enum RolloutProgress {
    /// Rollout is mid-flight; reconcile again after the delay.
    Waiting { requeue: Duration },
    /// Every covered map is completed or failed and the intent is cleared.
    Finished { failed: Vec<String> },
}

pub struct RolloutOrchestrator {
    console: Arc<dyn Console>,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl RolloutOrchestrator {
    pub fn new(console: Arc<dyn Console>, poll_interval: Duration, max_poll_attempts: u32) -> Self {
        Self {
            console,
            poll_interval,
            max_poll_attempts,
        }
    }

    /// Advance the rollout by one step.
    ///
    /// Mutates `status.restart` in place; the caller persists the status.
    #[instrument(skip_all, fields(cluster = %meta.key()))]
    pub async fn tick(
        &self,
        api: &dyn ClusterApi,
        meta: &ClusterMeta,
        spec: &ArkClusterSpec,
        status: &mut ArkClusterStatus,
    ) -> Result<RolloutProgress> {
        let Some(mut intent) = status.restart.clone() else {
            return Ok(RolloutProgress::Finished { failed: vec![] });
        };
        let host = cluster_host(meta);
        let pending = pending_maps(spec, &intent);

        if let Some(time) = intent.time {
            let remaining = (time - Utc::now()).num_seconds();
            if remaining > 0 {
                let requeue =
                    self.warn(&host, spec, &mut intent, &pending, remaining as u64).await;
                status.restart = Some(intent);
                return Ok(RolloutProgress::Waiting { requeue });
            }
        }

        // shutdown phase, one map in flight at a time
        for map in &pending {
            let attempts = intent.attempts.get(&map.id).copied().unwrap_or(0);
            if attempts == 0 {
                self.stop_map(api, meta, &host, spec, &intent, map).await?;
                intent.attempts.insert(map.id.clone(), 1);
                status.restart = Some(intent);
                return Ok(RolloutProgress::Waiting {
                    requeue: self.poll_interval,
                });
            }

            if self.map_settled(api, meta, status, &intent, map).await? {
                info!(map = %map.id, "restart complete");
                intent.completed.push(map.id.clone());
                intent.attempts.remove(&map.id);
                continue;
            }

            if attempts >= self.max_poll_attempts {
                warn!(map = %map.id, attempts, "map did not come back, giving up");
                api.record_event(
                    meta,
                    "RestartFailed",
                    &format!("{} did not become ready after restart", map.id),
                )
                .await?;
                intent.failed.push(map.id.clone());
                intent.attempts.remove(&map.id);
                continue;
            }

            intent.attempts.insert(map.id.clone(), attempts + 1);
            status.restart = Some(intent);
            return Ok(RolloutProgress::Waiting {
                requeue: self.poll_interval,
            });
        }

        let failed = intent.failed.clone();
        status.restart = None;
        Ok(RolloutProgress::Finished { failed })
    }

    /// Broadcast the largest due warning mark that has not been sent yet.
    ///
    /// Send failures are logged per map and do not block the rollout; a map
    /// whose server is already down has nobody to warn.
    async fn warn(
        &self,
        host: &str,
        spec: &ArkClusterSpec,
        intent: &mut RestartIntent,
        pending: &[GameMap],
        remaining: u64,
    ) -> Duration {
        let ladder = notify_intervals(spec.server.graceful_shutdown);
        // largest crossed mark not yet broadcast; a late controller start
        // collapses the missed marks into one message
        let due = ladder
            .iter()
            .copied()
            .filter(|mark| remaining <= *mark && !intent.notified.contains(mark))
            .max();

        if let Some(mark) = due {
            let message = warning_message(spec, intent, mark);
            for map in pending {
                if let Err(err) = self
                    .console
                    .run(host, map.rcon_port, &format!("ServerChat {message}"))
                    .await
                {
                    warn!(map = %map.id, %err, "warning broadcast failed");
                }
            }
            intent.notified.push(mark);
            debug!(mark, "warning mark broadcast");
        }

        // wake when the next un-notified mark comes due
        let next = ladder
            .iter()
            .copied()
            .filter(|mark| *mark < remaining && !intent.notified.contains(mark))
            .max();
        match next {
            Some(mark) => Duration::from_secs(remaining - mark),
            None => Duration::from_secs(remaining),
        }
    }

    /// Gracefully stop one map and delete its pod.
    async fn stop_map(
        &self,
        api: &dyn ClusterApi,
        meta: &ClusterMeta,
        host: &str,
        spec: &ArkClusterSpec,
        intent: &RestartIntent,
        map: &GameMap,
    ) -> Result<()> {
        info!(map = %map.id, kind = ?intent.kind, "stopping server");
        let farewell = shutdown_message(spec, intent);
        let commands = [
            format!("ServerChat {farewell}"),
            "SaveWorld".to_owned(),
            "DoExit".to_owned(),
        ];
        for command in &commands {
            if let Err(err) = self.console.run(host, map.rcon_port, command).await {
                // unreachable server: the pod delete below still tears it down
                warn!(map = %map.id, command = %command, %err, "rcon command failed");
                break;
            }
        }
        api.delete_pod(&meta.key(), &pod_name(&meta.name, map)).await
    }

    /// Whether a stopped map has reached its target state: recreated on the
    /// active volume and ready for restarts, gone for shutdowns.
    async fn map_settled(
        &self,
        api: &dyn ClusterApi,
        meta: &ClusterMeta,
        status: &ArkClusterStatus,
        intent: &RestartIntent,
        map: &GameMap,
    ) -> Result<bool> {
        let name = pod_name(&meta.name, map);
        let pod = api
            .list_pods(&meta.key())
            .await?
            .into_iter()
            .find(|p| p.name == name);
        Ok(match intent.kind {
            RestartKind::Shutdown => pod.is_none(),
            RestartKind::Restart => pod
                .map(|p| p.ready && p.volume == Some(status.active_volume()))
                .unwrap_or(false),
        })
    }
}

fn warning_message(spec: &ArkClusterSpec, intent: &RestartIntent, mark: u64) -> String {
    let interval = humantime::format_duration(Duration::from_secs(mark)).to_string();
    spec.server
        .messages
        .restart
        .replace("{interval}", &interval)
        .replace("{reason}", &intent.reason)
}

fn shutdown_message(spec: &ArkClusterSpec, intent: &RestartIntent) -> String {
    spec.server
        .messages
        .shutdown
        .replace("{reason}", &intent.reason)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use ark_model::VolumeName;
    use ark_rcon::RconError;

    use crate::api::memory::MemoryClusterApi;
    use crate::api::ClusterKey;
    use crate::config::OperatorConfig;
    use crate::resources::server_pod;

    #[derive(Default)]
    struct MockConsole {
        commands: Mutex<Vec<(u16, String)>>,
        fail: bool,
    }

    impl MockConsole {
        fn commands(&self) -> Vec<(u16, String)> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Console for MockConsole {
        async fn run(
            &self,
            _host: &str,
            port: u16,
            command: &str,
        ) -> std::result::Result<String, RconError> {
            if self.fail {
                return Err(RconError::ConnectionLost);
            }
            self.commands.lock().unwrap().push((port, command.to_owned()));
            Ok(String::new())
        }
    }

    fn spec_one_map() -> ArkClusterSpec {
        let mut spec = ArkClusterSpec::default();
        spec.server.maps = vec!["TheIsland_WP".to_owned()];
        spec
    }

    fn meta() -> ClusterMeta {
        ClusterMeta {
            name: "asa".to_owned(),
            namespace: "games".to_owned(),
            uid: "uid-asa".to_owned(),
            resource_version: "1".to_owned(),
            generation: 1,
        }
    }

    fn intent_for(spec: &ArkClusterSpec, time_offset_secs: i64) -> RestartIntent {
        RestartIntent {
            time: Some(Utc::now() + ChronoDuration::seconds(time_offset_secs)),
            maps: spec.game_maps().iter().map(|m| m.id.clone()).collect(),
            reason: "update".to_owned(),
            ..Default::default()
        }
    }

    fn orchestrator(console: Arc<MockConsole>, max_attempts: u32) -> RolloutOrchestrator {
        RolloutOrchestrator::new(console, Duration::from_millis(1), max_attempts)
    }

    #[test]
    fn test_notify_intervals() {
        assert_eq!(
            notify_intervals(Duration::from_secs(3600)),
            vec![3600, 1800, 300, 60, 30, 10]
        );
        assert_eq!(
            notify_intervals(Duration::from_secs(120)),
            vec![120, 60, 30, 10]
        );
        assert!(notify_intervals(Duration::ZERO).is_empty());
    }

    #[tokio::test]
    async fn test_warning_broadcasts_largest_due_mark() {
        let api = MemoryClusterApi::new();
        let key = ClusterKey::new("games", "asa");
        let mut spec = spec_one_map();
        spec.server.graceful_shutdown = Duration::from_secs(30);
        api.insert_cluster(&key, spec.clone());

        let console = Arc::new(MockConsole::default());
        let runner = orchestrator(Arc::clone(&console), 3);

        let mut status = ArkClusterStatus::default();
        status.restart = Some(intent_for(&spec, 25));

        let progress = runner.tick(&api, &meta(), &spec, &mut status).await.unwrap();
        assert!(matches!(progress, RolloutProgress::Waiting { .. }));

        let commands = console.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, 27020);
        assert_eq!(
            commands[0].1,
            "ServerChat Server is restarting in 30s for update"
        );
        assert_eq!(status.restart.as_ref().unwrap().notified, vec![30]);

        // the 10s mark is not due yet, so an immediate re-tick stays quiet
        runner.tick(&api, &meta(), &spec, &mut status).await.unwrap();
        assert_eq!(console.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_cycle_completes_when_pod_returns() {
        let api = MemoryClusterApi::new();
        let key = ClusterKey::new("games", "asa");
        let spec = spec_one_map();
        api.insert_cluster(&key, spec.clone());

        let mut status = ArkClusterStatus::default();
        status.active_volume = Some(VolumeName::ServerB);
        status.active_build_id = Some(101);
        status.restart = Some(intent_for(&spec, -1));

        // old pod still on server-a
        let mut old_status = ArkClusterStatus::default();
        old_status.active_volume = Some(VolumeName::ServerA);
        let maps = spec.game_maps();
        let map = &maps[0];
        let old_pod = server_pod(&meta(), &spec, &old_status, map, &OperatorConfig::default());
        api.apply_pod(&meta(), &old_pod).await.unwrap();

        let console = Arc::new(MockConsole::default());
        let runner = orchestrator(Arc::clone(&console), 5);

        // first tick saves, exits and deletes the old pod
        let progress = runner.tick(&api, &meta(), &spec, &mut status).await.unwrap();
        assert!(matches!(progress, RolloutProgress::Waiting { .. }));
        assert!(api.pod(&key, "asa-theisland").is_none());
        let commands: Vec<String> = console.commands().into_iter().map(|(_, c)| c).collect();
        assert!(commands.contains(&"SaveWorld".to_owned()));
        assert!(commands.contains(&"DoExit".to_owned()));

        // convergence recreated the pod on the active volume
        let new_pod = server_pod(&meta(), &spec, &status, map, &OperatorConfig::default());
        api.apply_pod(&meta(), &new_pod).await.unwrap();
        api.set_pod_ready(&key, "asa-theisland", true);

        let progress = runner.tick(&api, &meta(), &spec, &mut status).await.unwrap();
        assert_eq!(progress, RolloutProgress::Finished { failed: vec![] });
        assert!(status.restart.is_none());
    }

    #[tokio::test]
    async fn test_map_failed_after_poll_budget() {
        let api = MemoryClusterApi::new();
        let key = ClusterKey::new("games", "asa");
        let spec = spec_one_map();
        api.insert_cluster(&key, spec.clone());

        let mut status = ArkClusterStatus::default();
        status.restart = Some(intent_for(&spec, -1));

        let console = Arc::new(MockConsole::default());
        let runner = orchestrator(console, 2);

        // stop, then poll out the budget with the pod never coming back
        loop {
            match runner.tick(&api, &meta(), &spec, &mut status).await.unwrap() {
                RolloutProgress::Waiting { .. } => continue,
                RolloutProgress::Finished { failed } => {
                    assert_eq!(failed, vec!["TheIsland_WP".to_owned()]);
                    break;
                }
            }
        }
        assert!(status.restart.is_none());
        assert!(api
            .events()
            .iter()
            .any(|(_, reason, _)| reason == "RestartFailed"));
    }

    #[tokio::test]
    async fn test_shutdown_kind_settles_on_absence() {
        let api = MemoryClusterApi::new();
        let key = ClusterKey::new("games", "asa");
        let spec = spec_one_map();
        api.insert_cluster(&key, spec.clone());

        let mut intent = intent_for(&spec, -1);
        intent.kind = RestartKind::Shutdown;
        let mut status = ArkClusterStatus::default();
        status.restart = Some(intent);

        let console = Arc::new(MockConsole::default());
        let runner = orchestrator(console, 3);

        let progress = runner.tick(&api, &meta(), &spec, &mut status).await.unwrap();
        assert!(matches!(progress, RolloutProgress::Waiting { .. }));
        // pod stays gone, so the next tick finishes
        let progress = runner.tick(&api, &meta(), &spec, &mut status).await.unwrap();
        assert_eq!(progress, RolloutProgress::Finished { failed: vec![] });
    }

    #[tokio::test]
    async fn test_suspended_map_is_skipped() {
        let api = MemoryClusterApi::new();
        let key = ClusterKey::new("games", "asa");
        let mut spec = ArkClusterSpec::default();
        spec.server.maps = vec!["TheIsland_WP".to_owned(), "Aberration_WP".to_owned()];
        api.insert_cluster(&key, spec.clone());

        let mut status = ArkClusterStatus::default();
        status.restart = Some(intent_for(&spec, -1));

        // suspension arrives mid-rollout
        spec.server.suspend = vec!["TheIsland_WP".to_owned()];

        let console = Arc::new(MockConsole::default());
        let runner = orchestrator(Arc::clone(&console), 2);

        loop {
            match runner.tick(&api, &meta(), &spec, &mut status).await.unwrap() {
                RolloutProgress::Waiting { .. } => continue,
                RolloutProgress::Finished { failed } => {
                    // the suspended map is neither completed nor failed
                    assert_eq!(failed, vec!["Aberration_WP".to_owned()]);
                    break;
                }
            }
        }
        assert!(console
            .commands()
            .iter()
            .all(|(port, _)| *port != spec.game_maps()[0].rcon_port));
    }

    #[tokio::test]
    async fn test_unreachable_server_still_deleted() {
        let api = MemoryClusterApi::new();
        let key = ClusterKey::new("games", "asa");
        let spec = spec_one_map();
        api.insert_cluster(&key, spec.clone());

        let mut status = ArkClusterStatus::default();
        status.restart = Some(intent_for(&spec, -1));

        let maps = spec.game_maps();
        let pod = server_pod(&meta(), &spec, &status, &maps[0], &OperatorConfig::default());
        api.apply_pod(&meta(), &pod).await.unwrap();

        let console = Arc::new(MockConsole {
            fail: true,
            ..Default::default()
        });
        let runner = orchestrator(console, 2);

        runner.tick(&api, &meta(), &spec, &mut status).await.unwrap();
        assert!(api.pod(&key, "asa-theisland").is_none());
    }
}
