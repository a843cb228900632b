//! Job registry
//!
//! Process-wide table of upload jobs: created on upload, read by status
//! polls and stream attaches, and evicted by a periodic sweep once a
//! terminal job has outlived the retention window. A job with attached
//! subscribers is never evicted.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::publisher::ProgressPublisher;
use super::types::UploadJob;

/// Shared handle to one job's mutable state.
///
/// Written only by the owning ingest job; read by any number of callers.
pub type JobHandle = Arc<RwLock<UploadJob>>;

pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobHandle>>,
    retention: Duration,
    recent_capacity: usize,
}

impl JobRegistry {
    pub fn new(retention: Duration, recent_capacity: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
            recent_capacity,
        }
    }

    /// Register a new queued job and return its fresh identifier.
    ///
    /// Identifiers are uuids and never reused.
    pub async fn create(&self, total: u64) -> (String, JobHandle) {
        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(RwLock::new(UploadJob::new(
            id.clone(),
            total,
            self.recent_capacity,
        )));
        let mut jobs = self.jobs.write().await;
        jobs.insert(id.clone(), handle.clone());
        (id, handle)
    }

    pub async fn get(&self, upload_id: &str) -> Option<JobHandle> {
        let jobs = self.jobs.read().await;
        jobs.get(upload_id).cloned()
    }

    pub async fn remove(&self, upload_id: &str) {
        let mut jobs = self.jobs.write().await;
        jobs.remove(upload_id);
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Evict terminal jobs whose retention window has elapsed and which have
    /// no attached subscribers. Returns the evicted ids.
    pub async fn sweep(&self, publisher: &ProgressPublisher) -> Vec<String> {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let candidates: Vec<String> = {
            let jobs = self.jobs.read().await;
            let mut expired = Vec::new();
            for (id, handle) in jobs.iter() {
                let job = handle.read().await;
                if let Some(finished_at) = job.finished_at {
                    if job.is_terminal() && now - finished_at >= retention {
                        expired.push(id.clone());
                    }
                }
            }
            expired
        };

        let mut evicted = Vec::new();
        for id in candidates {
            if publisher.subscriber_count(&id).await > 0 {
                debug!(upload_id = %id, "retention elapsed but subscribers attached, keeping job");
                continue;
            }
            self.remove(&id).await;
            publisher.remove(&id).await;
            evicted.push(id);
        }

        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted expired import jobs");
        }
        evicted
    }
}

/// Spawn the periodic eviction sweep.
pub fn spawn_sweeper(
    registry: Arc<JobRegistry>,
    publisher: Arc<ProgressPublisher>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            registry.sweep(&publisher).await;
        }
    })
}
