//! Update detection for ARK clusters.
//!
//! Polls an external build source and mod registry on behalf of the
//! reconciliation loop. Cadence is controller-driven; the detector only
//! bounds call volume with a TTL cache and absorbs registry outages by
//! degrading to the last known answer instead of raising.

mod cache;
mod error;
mod mods;
mod steam;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

pub use cache::TtlCache;
pub use error::UpdateError;
pub use mods::{CurseForgeApi, ModRegistry, DEFAULT_CURSEFORGE_API_URL};
pub use steam::{BuildSource, SteamWebApi, ASA_SERVER_APP_ID, DEFAULT_STEAM_API_URL};

/// Outcome of one detection cycle. Never an error: registry failures leave
/// the last-known values in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateCheck {
    pub available: bool,
    pub latest_build_id: Option<u64>,
    /// Tracked mods whose registry stamp moved since last recorded.
    pub changed_mods: BTreeSet<u32>,
    /// Current registry stamp per tracked mod id, for recording in status.
    pub mod_stamps: BTreeMap<String, String>,
}

pub struct UpdateDetector {
    build_source: Arc<dyn BuildSource>,
    mod_registry: Option<Arc<dyn ModRegistry>>,
    app_id: u32,
    cache: TtlCache<String, String>,
}

impl UpdateDetector {
    pub fn new(
        build_source: Arc<dyn BuildSource>,
        mod_registry: Option<Arc<dyn ModRegistry>>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            build_source,
            mod_registry,
            app_id: ASA_SERVER_APP_ID,
            cache: TtlCache::new(cache_ttl, 64),
        }
    }

    pub fn with_app_id(mut self, app_id: u32) -> Self {
        self.app_id = app_id;
        self
    }

    /// Run one detection cycle.
    ///
    /// `current_build` is the build the active volume runs; `known_mods`
    /// maps tracked mod ids to the registry stamp last recorded in status.
    #[instrument(skip(self, known_mods))]
    pub async fn check(
        &self,
        current_build: Option<u64>,
        tracked_mods: &[u32],
        known_mods: &BTreeMap<String, String>,
    ) -> UpdateCheck {
        let latest_build_id = self.latest_build().await;

        let mut changed_mods = BTreeSet::new();
        let mut mod_stamps = BTreeMap::new();
        for mod_id in tracked_mods {
            if let Some(stamp) = self.mod_stamp(*mod_id).await {
                let key = mod_id.to_string();
                if known_mods.get(&key).is_some_and(|known| known != &stamp) {
                    changed_mods.insert(*mod_id);
                }
                mod_stamps.insert(key, stamp);
            }
        }

        let build_moved = match (latest_build_id, current_build) {
            (Some(latest), Some(current)) => latest > current,
            // first observation: nothing to compare against yet
            (Some(_), None) => false,
            (None, _) => false,
        };

        UpdateCheck {
            available: build_moved || !changed_mods.is_empty(),
            latest_build_id,
            changed_mods,
            mod_stamps,
        }
    }

    async fn latest_build(&self) -> Option<u64> {
        let key = "buildid".to_owned();
        if let Some(cached) = self.cache.get(&key) {
            debug!("build id served from cache");
            return cached.parse().ok();
        }
        match self.build_source.latest_build(self.app_id).await {
            Ok(build) => {
                self.cache.insert(key, build.to_string());
                Some(build)
            }
            Err(err) => {
                warn!(%err, "build source unavailable, using last known build id");
                self.cache.get_stale(&key).and_then(|v| v.parse().ok())
            }
        }
    }

    async fn mod_stamp(&self, mod_id: u32) -> Option<String> {
        let registry = self.mod_registry.as_ref()?;
        let key = format!("mod/{mod_id}");
        if let Some(cached) = self.cache.get(&key) {
            return Some(cached);
        }
        match registry.latest_file_stamp(mod_id).await {
            Ok(stamp) => {
                self.cache.insert(key, stamp.clone());
                Some(stamp)
            }
            Err(err) => {
                warn!(mod_id, %err, "mod registry unavailable, using last known stamp");
                self.cache.get_stale(&key)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;

    struct ScriptedSource {
        build: std::sync::Mutex<Result<u64, ()>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn returning(build: u64) -> Self {
            Self {
                build: std::sync::Mutex::new(Ok(build)),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                build: std::sync::Mutex::new(Err(())),
                calls: AtomicUsize::new(0),
            }
        }

        fn set(&self, result: Result<u64, ()>) {
            *self.build.lock().unwrap() = result;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BuildSource for ScriptedSource {
        async fn latest_build(&self, _app_id: u32) -> Result<u64, UpdateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.build
                .lock()
                .unwrap()
                .map_err(|_| UpdateError::Parse("scripted failure".to_owned()))
        }
    }

    struct ScriptedRegistry {
        stamp: std::sync::Mutex<Result<String, ()>>,
        calls: AtomicUsize,
    }

    impl ScriptedRegistry {
        fn returning(stamp: &str) -> Self {
            Self {
                stamp: std::sync::Mutex::new(Ok(stamp.to_owned())),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                stamp: std::sync::Mutex::new(Err(())),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModRegistry for ScriptedRegistry {
        async fn latest_file_stamp(&self, _mod_id: u32) -> Result<String, UpdateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.stamp
                .lock()
                .unwrap()
                .clone()
                .map_err(|_| UpdateError::Parse("scripted failure".to_owned()))
        }
    }

    fn detector(source: Arc<ScriptedSource>) -> UpdateDetector {
        UpdateDetector::new(source, None, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_build_update_detected() {
        let source = Arc::new(ScriptedSource::returning(101));
        let check = detector(source)
            .check(Some(100), &[], &BTreeMap::new())
            .await;
        assert!(check.available);
        assert_eq!(check.latest_build_id, Some(101));
    }

    #[tokio::test]
    async fn test_no_update_when_current() {
        let source = Arc::new(ScriptedSource::returning(101));
        let check = detector(source)
            .check(Some(101), &[], &BTreeMap::new())
            .await;
        assert!(!check.available);
    }

    #[tokio::test]
    async fn test_second_check_within_ttl_uses_cache() {
        let source = Arc::new(ScriptedSource::returning(101));
        let detector = detector(source.clone());
        detector.check(Some(100), &[], &BTreeMap::new()).await;
        detector.check(Some(100), &[], &BTreeMap::new()).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_source_failure_degrades_to_last_known() {
        let source = Arc::new(ScriptedSource::returning(101));
        let detector = UpdateDetector::new(source.clone(), None, Duration::from_millis(1));
        let first = detector.check(Some(100), &[], &BTreeMap::new()).await;
        assert!(first.available);

        tokio::time::sleep(Duration::from_millis(10)).await;
        source.set(Err(()));
        let second = detector.check(Some(100), &[], &BTreeMap::new()).await;
        // stale answer, no error surfaced
        assert_eq!(second.latest_build_id, Some(101));
        assert!(second.available);
    }

    #[tokio::test]
    async fn test_source_failure_with_no_history_is_quiet() {
        let source = Arc::new(ScriptedSource::failing());
        let check = detector(source)
            .check(Some(100), &[], &BTreeMap::new())
            .await;
        assert!(!check.available);
        assert_eq!(check.latest_build_id, None);
    }

    #[tokio::test]
    async fn test_mod_change_detected() {
        let source = Arc::new(ScriptedSource::returning(100));
        let registry = Arc::new(ScriptedRegistry::returning("2026-08-02T10:00:00Z"));
        let detector =
            UpdateDetector::new(source, Some(registry), Duration::from_secs(60));

        let mut known = BTreeMap::new();
        known.insert("927090".to_owned(), "2026-08-01T10:00:00Z".to_owned());
        let check = detector.check(Some(100), &[927090], &known).await;
        assert!(check.available);
        assert_eq!(check.changed_mods, BTreeSet::from([927090]));
        assert_eq!(check.mod_stamps["927090"], "2026-08-02T10:00:00Z");
    }

    #[tokio::test]
    async fn test_first_mod_observation_not_a_change() {
        let source = Arc::new(ScriptedSource::returning(100));
        let registry = Arc::new(ScriptedRegistry::returning("2026-08-02T10:00:00Z"));
        let detector =
            UpdateDetector::new(source, Some(registry), Duration::from_secs(60));

        let check = detector.check(Some(100), &[927090], &BTreeMap::new()).await;
        assert!(!check.available);
        assert_eq!(check.mod_stamps.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_outage_keeps_known_stamps() {
        let source = Arc::new(ScriptedSource::returning(100));
        let registry = Arc::new(ScriptedRegistry::failing());
        let detector =
            UpdateDetector::new(source, Some(registry), Duration::from_secs(60));

        let mut known = BTreeMap::new();
        known.insert("927090".to_owned(), "2026-08-01T10:00:00Z".to_owned());
        let check = detector.check(Some(100), &[927090], &known).await;
        assert!(!check.available);
        assert!(check.changed_mods.is_empty());
    }
}
