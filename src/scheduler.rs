/// Named, restartable periodic jobs.
///
/// Used to drive the gossip loop: each bucket peer gets its own named job,
/// ticking on a fixed interval and re-spawned with the peer's address
/// baked into its closure whenever a view-change changes who that peer
/// is. `DashMap` backs the job table since jobs are added, cancelled, and
/// looked up concurrently from request handlers without needing to
/// serialize against the rest of the store.
use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

pub struct GossipScheduler {
    jobs: DashMap<String, JoinHandle<()>>,
}

impl Default for GossipScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl GossipScheduler {
    pub fn new() -> Self {
        Self { jobs: DashMap::new() }
    }

    /// Starts a periodic job under `id`, ticking every `period`. If a job
    /// is already registered under that id, it is aborted first — a
    /// view-change that re-targets the same peer id just replaces the
    /// closure rather than leaving the stale task running alongside the
    /// new one.
    pub fn add_job<F, Fut>(&self, id: impl Into<String>, period: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = id.into();
        self.cancel(&id);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                task().await;
            }
        });
        self.jobs.insert(id, handle);
    }

    /// Aborts and removes the job registered under `id`, if any.
    pub fn cancel(&self, id: &str) {
        if let Some((_, handle)) = self.jobs.remove(id) {
            handle.abort();
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Aborts every running job, used when a view-change rebuilds the
    /// entire set of peer gossip jobs from scratch.
    pub fn clear_jobs(&self) {
        for entry in self.jobs.iter() {
            entry.value().abort();
        }
        self.jobs.clear();
    }
}

impl Drop for GossipScheduler {
    fn drop(&mut self) {
        self.clear_jobs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn job_ticks_on_interval() {
        let scheduler = GossipScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        scheduler.add_job("peer-a", Duration::from_millis(10), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(counter.load(Ordering::SeqCst) >= 3);
        scheduler.clear_jobs();
    }

    #[tokio::test]
    async fn re_adding_same_id_replaces_old_job() {
        let scheduler = GossipScheduler::new();
        scheduler.add_job("peer-a", Duration::from_millis(100), || async {});
        assert_eq!(scheduler.job_count(), 1);
        scheduler.add_job("peer-a", Duration::from_millis(100), || async {});
        assert_eq!(scheduler.job_count(), 1);
    }

    #[tokio::test]
    async fn clear_jobs_removes_everything() {
        let scheduler = GossipScheduler::new();
        scheduler.add_job("a", Duration::from_secs(5), || async {});
        scheduler.add_job("b", Duration::from_secs(5), || async {});
        scheduler.clear_jobs();
        assert_eq!(scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn cancel_stops_ticking() {
        let scheduler = GossipScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        scheduler.add_job("peer-a", Duration::from_millis(10), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(25)).await;
        scheduler.cancel("peer-a");
        let seen_after_cancel = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen_after_cancel);
    }
}
