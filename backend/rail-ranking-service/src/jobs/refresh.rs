// ============================================
// Rail Refresh Job
// ============================================
//
// Background job that keeps the latest RailSet published for the UI.
//
// Workflow:
// 1. Snapshot the interaction log
// 2. Prepare affinity, veto set and generated categories
// 3. Fetch inventory for catalog + generated categories
// 4. Assemble and publish over a watch channel
//
// Triggers arriving within the debounce window are coalesced into one
// computation. A timer refresh runs every poll interval regardless.
// A failed refresh keeps the previously published rails.

use crate::models::{parse_log, RailSet};
use crate::services::pipeline::RailPipeline;
use crate::services::sources::{InteractionLog, InventorySource, SourceError};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout_at, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Refresh job configuration
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Window in which bursts of triggers collapse into one computation
    pub debounce_ms: u64,
    /// Interval between timer-driven refreshes
    pub poll_interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            poll_interval_secs: 30,
        }
    }
}

impl RefreshConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            debounce_ms: std::env::var("RAILS_REFRESH_DEBOUNCE_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .unwrap_or(250),
            poll_interval_secs: std::env::var("RAILS_REFRESH_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
        }
    }
}

/// What asked for a recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    InteractionRecorded,
    InventoryChanged,
    Manual,
}

impl RefreshTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTrigger::InteractionRecorded => "interaction_recorded",
            RefreshTrigger::InventoryChanged => "inventory_changed",
            RefreshTrigger::Manual => "manual",
        }
    }
}

/// Refresh job statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub computations: u64,
    pub failures: u64,
    pub triggers_received: u64,
}

#[derive(Default)]
struct Counters {
    computations: AtomicU64,
    failures: AtomicU64,
    triggers_received: AtomicU64,
}

/// Published rail state; `None` until the first successful refresh
pub type RailUpdates = watch::Receiver<Option<Arc<RailSet>>>;

/// Rail refresh job runner
pub struct RailRefreshJob {
    config: RefreshConfig,
    pipeline: RailPipeline,
    log: Arc<dyn InteractionLog>,
    inventory: Arc<dyn InventorySource>,
    publisher: watch::Sender<Option<Arc<RailSet>>>,
    counters: Counters,
}

impl RailRefreshJob {
    pub fn new(
        config: RefreshConfig,
        pipeline: RailPipeline,
        log: Arc<dyn InteractionLog>,
        inventory: Arc<dyn InventorySource>,
    ) -> Self {
        let (publisher, _) = watch::channel(None);
        Self {
            config,
            pipeline,
            log,
            inventory,
            publisher,
            counters: Counters::default(),
        }
    }

    pub fn subscribe(&self) -> RailUpdates {
        self.publisher.subscribe()
    }

    /// Most recently published rails
    pub fn latest(&self) -> Option<Arc<RailSet>> {
        self.publisher.borrow().clone()
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            computations: self.counters.computations.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            triggers_received: self.counters.triggers_received.load(Ordering::Relaxed),
        }
    }

    /// Compute and publish one RailSet
    ///
    /// On a collaborator failure nothing is published and the error is
    /// returned; subscribers keep the previous rails.
    pub async fn refresh_now(&self) -> Result<Arc<RailSet>, SourceError> {
        let computation_id = Uuid::new_v4();
        let start_time = Instant::now();

        let result = self.compute(computation_id).await;
        match &result {
            Ok(set) => {
                self.counters.computations.fetch_add(1, Ordering::Relaxed);
                self.publisher.send_replace(Some(set.clone()));
                info!(
                    computation_id = %computation_id,
                    rails = set.rails.len(),
                    personalized = set.personalized,
                    interactions = set.interaction_count,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    "Published rails"
                );
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    computation_id = %computation_id,
                    error = %e,
                    "Rail refresh failed, keeping previous rails"
                );
            }
        }
        result
    }

    async fn compute(&self, computation_id: Uuid) -> Result<Arc<RailSet>, SourceError> {
        let records = self.log.snapshot().await?;
        let parsed = parse_log(&records);
        let prepared = self.pipeline.prepare(&parsed, Utc::now());

        let categories = self.pipeline.categories(&prepared);
        debug!(
            computation_id = %computation_id,
            records = records.len(),
            categories = categories.len(),
            "Fetching inventory"
        );
        let inventory = self.inventory.snapshot(&categories).await?;

        Ok(Arc::new(self.pipeline.assemble(prepared, &inventory)))
    }

    /// Run until `shutdown` flips to true, its sender drops, or the trigger
    /// channel closes
    pub async fn run(
        &self,
        mut triggers: mpsc::Receiver<RefreshTrigger>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut poll = interval_at(tokio::time::Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if *shutdown.borrow_and_update() {
            info!("Shutdown already requested, rail refresh job not started");
            return;
        }

        info!(
            debounce_ms = self.config.debounce_ms,
            poll_interval_secs = self.config.poll_interval_secs,
            "Starting rail refresh job"
        );
        let _ = self.refresh_now().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    let _ = self.refresh_now().await;
                }
                trigger = triggers.recv() => {
                    let Some(trigger) = trigger else {
                        info!("Trigger channel closed");
                        break;
                    };
                    let coalesced = self.debounce(&mut triggers, trigger).await;
                    debug!(
                        trigger = trigger.as_str(),
                        coalesced = coalesced,
                        "Refreshing after trigger"
                    );
                    let _ = self.refresh_now().await;
                    poll.reset();
                }
            }
        }

        info!("Rail refresh job stopped");
    }

    /// Drain triggers until the window closes; returns how many were folded in
    async fn debounce(
        &self,
        triggers: &mut mpsc::Receiver<RefreshTrigger>,
        first: RefreshTrigger,
    ) -> u64 {
        self.counters.triggers_received.fetch_add(1, Ordering::Relaxed);
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.debounce_ms);
        let mut coalesced = 1;

        while let Ok(Some(next)) = timeout_at(deadline, triggers.recv()).await {
            self.counters.triggers_received.fetch_add(1, Ordering::Relaxed);
            coalesced += 1;
            debug!(trigger = next.as_str(), first = first.as_str(), "Coalesced trigger");
        }

        coalesced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_catalog, RailConfig};
    use crate::models::{InventoryItem, RawInteraction, RawTimestamp};
    use crate::services::sources::{
        InventorySnapshot, MemoryInteractionLog, MockInteractionLog, MockInventorySource,
        StaticInventory,
    };
    use std::sync::atomic::AtomicUsize;

    fn click(category: &str) -> RawInteraction {
        RawInteraction {
            kind: "click".to_string(),
            timestamp: Some(RawTimestamp::Text(Utc::now().to_rfc3339())),
            category: Some(category.to_string()),
            ..Default::default()
        }
    }

    fn stocked_catalog() -> InventorySnapshot {
        default_catalog()
            .iter()
            .fold(InventorySnapshot::default(), |snapshot, category| {
                let items = (0..5)
                    .map(|i| InventoryItem::new(format!("{}-{}", category.id, i), "event"))
                    .collect();
                snapshot.with_category(category.id.clone(), items)
            })
    }

    fn pipeline() -> RailPipeline {
        RailPipeline::new(&RailConfig::default(), default_catalog())
    }

    #[test]
    fn test_config_defaults() {
        let config = RefreshConfig::default();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.poll_interval_secs, 30);
    }

    #[tokio::test]
    async fn test_refresh_now_publishes() {
        let mut log = MockInteractionLog::new();
        log.expect_snapshot()
            .times(1)
            .returning(|| Ok((0..6).map(|_| click("comedy")).collect()));
        let mut inventory = MockInventorySource::new();
        inventory
            .expect_snapshot()
            .times(1)
            .returning(|_| Ok(stocked_catalog()));

        let job = RailRefreshJob::new(
            RefreshConfig::default(),
            pipeline(),
            Arc::new(log),
            Arc::new(inventory),
        );
        let updates = job.subscribe();
        assert!(updates.borrow().is_none());

        let set = job.refresh_now().await.unwrap();
        assert!(set.personalized);
        assert_eq!(set.rails[0].category_id, "comedy");

        let published = updates.borrow().clone().unwrap();
        assert_eq!(published.rails, set.rails);
        assert_eq!(job.stats().computations, 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_rails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut log = MockInteractionLog::new();
        log.expect_snapshot().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Vec::new())
            } else {
                Err(SourceError::LogUnavailable("storage locked".to_string()))
            }
        });
        let mut inventory = MockInventorySource::new();
        inventory
            .expect_snapshot()
            .returning(|_| Ok(stocked_catalog()));

        let job = RailRefreshJob::new(
            RefreshConfig::default(),
            pipeline(),
            Arc::new(log),
            Arc::new(inventory),
        );

        let first = tokio_test::assert_ok!(job.refresh_now().await);
        let err = tokio_test::assert_err!(job.refresh_now().await);
        assert!(matches!(err, SourceError::LogUnavailable(_)));

        let latest = job.latest().unwrap();
        assert!(Arc::ptr_eq(&latest, &first));
        assert_eq!(job.stats().computations, 1);
        assert_eq!(job.stats().failures, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_inventory_requested_for_generated_categories() {
        let mut log = MockInteractionLog::new();
        log.expect_snapshot().returning(|| {
            let mut records: Vec<_> = (0..3).map(|_| click("comedy")).collect();
            for _ in 0..3 {
                records.push(RawInteraction {
                    kind: "search".to_string(),
                    timestamp: Some(RawTimestamp::Text(Utc::now().to_rfc3339())),
                    query: Some("jazz".to_string()),
                    ..Default::default()
                });
            }
            Ok(records)
        });
        let mut inventory = MockInventorySource::new();
        inventory
            .expect_snapshot()
            .withf(|categories| categories.iter().any(|c| c.id == "dyn-search-jazz"))
            .times(1)
            .returning(|_| Ok(InventorySnapshot::default()));

        let job = RailRefreshJob::new(
            RefreshConfig::default(),
            pipeline(),
            Arc::new(log),
            Arc::new(inventory),
        );

        job.refresh_now().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_refreshes_on_trigger_and_stops() {
        let log = Arc::new(MemoryInteractionLog::new());
        let inventory = Arc::new(StaticInventory::new(stocked_catalog()));
        let job = Arc::new(RailRefreshJob::new(
            RefreshConfig {
                debounce_ms: 10,
                poll_interval_secs: 3600,
            },
            pipeline(),
            log.clone(),
            inventory,
        ));
        let mut updates = job.subscribe();
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn({
            let job = job.clone();
            async move { job.run(trigger_rx, shutdown_rx).await }
        });

        // Initial refresh on start
        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updates.borrow_and_update().as_ref().unwrap().interaction_count, 0);

        for _ in 0..6 {
            log.record(click("comedy")).await;
        }
        trigger_tx.send(RefreshTrigger::InteractionRecorded).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .unwrap()
            .unwrap();
        let set = updates.borrow_and_update().clone().unwrap();
        assert_eq!(set.interaction_count, 6);
        assert_eq!(set.rails[0].category_id, "comedy");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_burst_of_triggers_is_coalesced() {
        let log = Arc::new(MemoryInteractionLog::new());
        let inventory = Arc::new(StaticInventory::new(stocked_catalog()));
        let job = Arc::new(RailRefreshJob::new(
            RefreshConfig {
                debounce_ms: 20,
                poll_interval_secs: 3600,
            },
            pipeline(),
            log,
            inventory,
        ));
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        for trigger in [
            RefreshTrigger::InteractionRecorded,
            RefreshTrigger::InventoryChanged,
            RefreshTrigger::Manual,
        ] {
            trigger_tx.send(trigger).await.unwrap();
        }
        drop(trigger_tx);

        // Closing the trigger channel ends the loop once the burst is handled
        tokio::time::timeout(Duration::from_secs(5), job.run(trigger_rx, shutdown_rx))
            .await
            .unwrap();

        let stats = job.stats();
        assert_eq!(stats.triggers_received, 3);
        // Initial refresh plus one coalesced trigger refresh
        assert_eq!(stats.computations, 2);
    }

    #[tokio::test]
    async fn test_run_returns_when_shutdown_already_requested() {
        let job = RailRefreshJob::new(
            RefreshConfig {
                debounce_ms: 10,
                poll_interval_secs: 3600,
            },
            pipeline(),
            Arc::new(MemoryInteractionLog::new()),
            Arc::new(StaticInventory::new(stocked_catalog())),
        );
        let (_trigger_tx, trigger_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        tokio::time::timeout(Duration::from_secs(5), job.run(trigger_rx, shutdown_rx))
            .await
            .unwrap();

        assert_eq!(job.stats().computations, 0);
        assert!(job.subscribe().borrow().is_none());
    }
}
