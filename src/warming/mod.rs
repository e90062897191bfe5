//! Background cache warming
//!
//! A priority-queued scheduler that pre-populates the tiered store
//! while the application is idle. Tasks run with bounded concurrency
//! and a fixed inter-task delay; idleness is judged by polling a shared
//! in-flight counter owned by the application's data-fetching layer,
//! which the scheduler never mutates.

pub mod candidates;
pub mod queue;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::WarmingConfig;
use crate::store::TieredStore;

pub use candidates::{plan_candidates, Candidate, WarmingContext};
pub use queue::{Producer, WarmingTask};

use queue::TaskQueue;

/// Count of foreground data fetches currently in flight.
///
/// Owned by the application's fetch layer, which brackets each request
/// with `begin`/`end`; the warming scheduler only reads it.
#[derive(Debug, Default)]
pub struct FetchActivity {
    in_flight: AtomicUsize,
}

impl FetchActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub active: usize,
    pub running: bool,
    pub completed: u64,
    pub failed: u64,
    /// Tasks resolved without fetching because a valid entry already
    /// existed.
    pub skipped: u64,
}

/// Idle-gated, concurrency-limited warming scheduler.
pub struct WarmingScheduler {
    store: Arc<TieredStore>,
    activity: Arc<FetchActivity>,
    config: WarmingConfig,
    queue: Arc<Mutex<TaskQueue>>,
    active: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
}

impl WarmingScheduler {
    pub fn new(store: Arc<TieredStore>, activity: Arc<FetchActivity>, config: WarmingConfig) -> Self {
        Self {
            store,
            activity,
            config,
            queue: Arc::new(Mutex::new(TaskQueue::new())),
            active: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            completed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue a task. A task with the same key merges by keeping the
    /// higher priority.
    pub async fn add_task(&self, task: WarmingTask) {
        let mut queue = self.queue.lock().await;
        let key = task.key.clone();
        let priority = task.priority;
        if queue.add(task) {
            debug!(key = %key, priority = priority, "Queued warming task");
        } else {
            debug!(key = %key, priority = priority, "Merged duplicate warming task");
        }
    }

    /// Drop all queued (not yet started) tasks. In-flight tasks are not
    /// aborted.
    pub async fn clear_queue(&self) {
        let mut queue = self.queue.lock().await;
        let dropped = queue.len();
        queue.clear();
        if dropped > 0 {
            info!(dropped = dropped, "Cleared warming queue");
        }
    }

    pub async fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.queue.lock().await.len(),
            active: self.active.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    /// Request the drive loop to stop after the current dispatch.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Start draining the queue. Idempotent: a second call while the
    /// loop is running does nothing.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Warming scheduler already running");
            return tokio::spawn(async {});
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.drive().await;
        })
    }

    async fn drive(self: Arc<Self>) {
        info!("Warming scheduler started");

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            // Concurrency gate.
            if self.active.load(Ordering::SeqCst) >= self.config.max_concurrent {
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            }

            let queued = {
                let mut queue = self.queue.lock().await;
                queue.pop()
            };
            let queued = match queued {
                Some(queued) => queued,
                None => break,
            };

            // Idle gate: return the task to the front and wait, up to a
            // bounded number of polls so sustained foreground traffic
            // cannot starve warming indefinitely.
            if !self.activity.is_idle() && queued.requeues < self.config.max_idle_polls {
                let mut queue = self.queue.lock().await;
                queue.requeue_front(queued);
                drop(queue);
                tokio::time::sleep(Duration::from_millis(self.config.idle_poll_ms)).await;
                continue;
            }
            if queued.requeues >= self.config.max_idle_polls {
                debug!(
                    key = %queued.task.key,
                    polls = queued.requeues,
                    "Idle wait bound reached, dispatching anyway"
                );
            }

            self.active.fetch_add(1, Ordering::SeqCst);
            let scheduler = Arc::clone(&self);
            let task = queued.task;
            tokio::spawn(async move {
                scheduler.execute(task).await;
                scheduler.active.fetch_sub(1, Ordering::SeqCst);
            });

            // Fixed spacing between dispatches keeps warming traffic
            // from contending with foreground fetches.
            tokio::time::sleep(Duration::from_millis(self.config.inter_task_delay_ms)).await;
        }

        // Wait for in-flight tasks before reporting the drain.
        while self.active.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Warming scheduler drained");
    }

    async fn execute(&self, task: WarmingTask) {
        // A valid entry under the task's key means the work is already
        // done; avoid duplicate network fetches.
        let existing: Option<Value> = self.store.get(&task.key, task.class).await;
        if existing.is_some() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(key = %task.key, "Warming task skipped, entry already cached");
            return;
        }

        match (task.producer)().await {
            Ok(value) => {
                self.store.set(&task.key, &value, task.class).await;
                self.completed.fetch_add(1, Ordering::Relaxed);
                debug!(key = %task.key, "Warming task completed");
            }
            Err(e) => {
                // No automatic retry; the next warming pass may re-add it.
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(key = %task.key, error = %e, "Warming task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheClassId, ClassRegistry};
    use crate::error::CacheError;
    use crate::store::MemoryMedium;
    use std::sync::atomic::AtomicI32;

    fn test_store() -> Arc<TieredStore> {
        Arc::new(TieredStore::new(
            Arc::new(MemoryMedium::new()),
            Arc::new(MemoryMedium::new()),
            ClassRegistry::default(),
            "test:",
        ))
    }

    fn fast_config() -> WarmingConfig {
        WarmingConfig {
            max_concurrent: 2,
            idle_poll_ms: 10,
            max_idle_polls: 1000,
            inter_task_delay_ms: 0,
        }
    }

    fn scheduler_with(config: WarmingConfig) -> Arc<WarmingScheduler> {
        Arc::new(WarmingScheduler::new(
            test_store(),
            Arc::new(FetchActivity::new()),
            config,
        ))
    }

    fn value_producer(value: Value) -> Producer {
        Arc::new(move || {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        })
    }

    async fn wait_until_drained(scheduler: &Arc<WarmingScheduler>) {
        for _ in 0..500 {
            let stats = scheduler.stats().await;
            if !stats.running && stats.active == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scheduler did not drain in time");
    }

    #[tokio::test]
    async fn completed_task_populates_the_store() {
        let scheduler = scheduler_with(fast_config());

        scheduler
            .add_task(WarmingTask::new(
                "route:/rent",
                5,
                CacheClassId::SearchResults,
                value_producer(serde_json::json!({"total": 3})),
            ))
            .await;
        scheduler.start();
        wait_until_drained(&scheduler).await;

        let warmed: Option<Value> = scheduler
            .store
            .get("route:/rent", CacheClassId::SearchResults)
            .await;
        assert_eq!(warmed, Some(serde_json::json!({"total": 3})));
        assert_eq!(scheduler.stats().await.completed, 1);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_cap() {
        let scheduler = scheduler_with(fast_config());

        let current = Arc::new(AtomicI32::new(0));
        let max_seen = Arc::new(AtomicI32::new(0));

        for i in 0..5 {
            let current = Arc::clone(&current);
            let max_seen = Arc::clone(&max_seen);
            let producer: Producer = Arc::new(move || {
                let current = Arc::clone(&current);
                let max_seen = Arc::clone(&max_seen);
                Box::pin(async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                })
            });
            scheduler
                .add_task(WarmingTask::new(
                    format!("task-{}", i),
                    1,
                    CacheClassId::SearchResults,
                    producer,
                ))
                .await;
        }

        scheduler.start();
        wait_until_drained(&scheduler).await;

        assert_eq!(scheduler.stats().await.completed, 5);
        assert!(
            max_seen.load(Ordering::SeqCst) <= 2,
            "observed {} concurrent tasks",
            max_seen.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn tasks_run_in_priority_order() {
        let config = WarmingConfig {
            max_concurrent: 1,
            ..fast_config()
        };
        let scheduler = scheduler_with(config);

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for (key, priority) in [("low", 1), ("high", 9), ("mid", 5)] {
            let order = Arc::clone(&order);
            let producer: Producer = Arc::new(move || {
                let order = Arc::clone(&order);
                let key = key.to_string();
                Box::pin(async move {
                    order.lock().unwrap().push(key);
                    Ok(Value::Null)
                })
            });
            scheduler
                .add_task(WarmingTask::new(
                    key,
                    priority,
                    CacheClassId::SearchResults,
                    producer,
                ))
                .await;
        }

        scheduler.start();
        wait_until_drained(&scheduler).await;

        assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn valid_cached_entry_skips_the_producer() {
        let scheduler = scheduler_with(fast_config());
        scheduler
            .store
            .set("warm-key", &"already here", CacheClassId::SearchResults)
            .await;

        let calls = Arc::new(AtomicU64::new(0));
        let calls_in_producer = Arc::clone(&calls);
        let producer: Producer = Arc::new(move || {
            calls_in_producer.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Value::Null) })
        });

        scheduler
            .add_task(WarmingTask::new(
                "warm-key",
                5,
                CacheClassId::SearchResults,
                producer,
            ))
            .await;
        scheduler.start();
        wait_until_drained(&scheduler).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().await.skipped, 1);
    }

    #[tokio::test]
    async fn failed_task_is_logged_not_retried() {
        let scheduler = scheduler_with(fast_config());

        let calls = Arc::new(AtomicU64::new(0));
        let calls_in_producer = Arc::clone(&calls);
        let producer: Producer = Arc::new(move || {
            calls_in_producer.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(CacheError::Network("unreachable".into())) })
        });

        scheduler
            .add_task(WarmingTask::new(
                "failing",
                5,
                CacheClassId::SearchResults,
                producer,
            ))
            .await;
        scheduler.start();
        wait_until_drained(&scheduler).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1, "no automatic retry");
        let stats = scheduler.stats().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn waits_for_idle_before_dispatching() {
        let activity = Arc::new(FetchActivity::new());
        let scheduler = Arc::new(WarmingScheduler::new(
            test_store(),
            Arc::clone(&activity),
            fast_config(),
        ));

        activity.begin();
        scheduler
            .add_task(WarmingTask::new(
                "gated",
                5,
                CacheClassId::SearchResults,
                value_producer(Value::Null),
            ))
            .await;
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let stats = scheduler.stats().await;
        assert_eq!(stats.completed, 0, "task must wait while a fetch is in flight");
        assert_eq!(stats.queued, 1);

        activity.end();
        wait_until_drained(&scheduler).await;
        assert_eq!(scheduler.stats().await.completed, 1);
    }

    #[tokio::test]
    async fn idle_wait_bound_prevents_starvation() {
        let activity = Arc::new(FetchActivity::new());
        activity.begin(); // never ends

        let config = WarmingConfig {
            max_idle_polls: 3,
            ..fast_config()
        };
        let scheduler = Arc::new(WarmingScheduler::new(test_store(), activity, config));

        scheduler
            .add_task(WarmingTask::new(
                "starved",
                5,
                CacheClassId::SearchResults,
                value_producer(Value::Null),
            ))
            .await;
        scheduler.start();
        wait_until_drained(&scheduler).await;

        assert_eq!(scheduler.stats().await.completed, 1);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let scheduler = scheduler_with(fast_config());

        let calls = Arc::new(AtomicU64::new(0));
        let calls_in_producer = Arc::clone(&calls);
        let producer: Producer = Arc::new(move || {
            calls_in_producer.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(Value::Null)
            })
        });
        scheduler
            .add_task(WarmingTask::new(
                "once",
                5,
                CacheClassId::SearchResults,
                producer,
            ))
            .await;

        scheduler.start();
        scheduler.start();
        wait_until_drained(&scheduler).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_queue_drops_pending_tasks() {
        let scheduler = scheduler_with(fast_config());

        for i in 0..4 {
            scheduler
                .add_task(WarmingTask::new(
                    format!("pending-{}", i),
                    1,
                    CacheClassId::SearchResults,
                    value_producer(Value::Null),
                ))
                .await;
        }
        assert_eq!(scheduler.stats().await.queued, 4);

        scheduler.clear_queue().await;
        assert_eq!(scheduler.stats().await.queued, 0);

        scheduler.start();
        wait_until_drained(&scheduler).await;
        assert_eq!(scheduler.stats().await.completed, 0);
    }
}
