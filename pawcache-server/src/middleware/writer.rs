use crate::core::CacheCounters;
use crate::metrics;
use crate::store::SharedStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct PendingWrite {
    key: String,
    payload: Vec<u8>,
    ttl_secs: u64,
    epoch: u64,
}

/// Orders queued writes against invalidations
///
/// Each invalidation advances `epoch`. A write is only applied if no
/// invalidation started since its response was produced. `in_flight` is held
/// across a store write so an invalidation waits for one already under way
/// before deleting.
#[derive(Default)]
struct Fence {
    epoch: AtomicU64,
    in_flight: tokio::sync::Mutex<()>,
}

/// Background worker performing the cache writes the read path does not wait for
///
/// Writes queue on a bounded channel; a full queue drops the write. On
/// shutdown the worker stops accepting writes and drains what is queued.
#[derive(Clone)]
pub struct CacheWriter {
    tx: mpsc::Sender<PendingWrite>,
    store: SharedStore,
    fence: Arc<Fence>,
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CacheWriter {
    /// Spawn the worker; must be called inside a tokio runtime
    pub fn spawn(store: SharedStore, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let fence = Arc::new(Fence::default());

        let task = tokio::spawn(Self::run(store.clone(), fence.clone(), rx, shutdown_rx));
        info!("Cache writer started (queue capacity={})", capacity.max(1));

        Self {
            tx,
            store,
            fence,
            shutdown: Arc::new(Mutex::new(Some(shutdown_tx))),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Current invalidation epoch; read it before producing a response to cache
    pub fn epoch(&self) -> u64 {
        self.fence.epoch.load(Ordering::SeqCst)
    }

    /// Queue a write without waiting for it
    ///
    /// `epoch` is the value of [`CacheWriter::epoch`] taken before the
    /// response was produced.
    pub fn enqueue(&self, key: String, payload: Vec<u8>, ttl_secs: u64, epoch: u64) {
        let write = PendingWrite {
            key,
            payload,
            ttl_secs,
            epoch,
        };

        if let Err(e) = self.tx.try_send(write) {
            let (reason, write) = match e {
                mpsc::error::TrySendError::Full(write) => ("queue full", write),
                mpsc::error::TrySendError::Closed(write) => ("writer stopped", write),
            };
            CacheCounters::incr(&self.store.counters().writes_dropped);
            metrics::record_write("dropped");
            warn!(key = %write.key, reason, "Dropping cache write");
        }
    }

    /// Supersede every write produced so far, waiting out one in progress
    ///
    /// Call before deleting: once this returns, no write that predates it can
    /// land in the store.
    pub async fn fence(&self) {
        self.fence.epoch.fetch_add(1, Ordering::SeqCst);
        drop(self.fence.in_flight.lock().await);
    }

    /// Writes waiting in the queue
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Stop the worker after draining queued writes
    pub async fn shutdown(&self) {
        if let Some(signal) = self.shutdown.lock().take() {
            let _ = signal.send(());
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Cache writer task ended abnormally: {}", e);
            }
        }
    }

    async fn run(
        store: SharedStore,
        fence: Arc<Fence>,
        mut rx: mpsc::Receiver<PendingWrite>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                write = rx.recv() => match write {
                    Some(write) => Self::apply(&store, &fence, write).await,
                    None => return,
                },
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Some(write) = rx.recv().await {
            Self::apply(&store, &fence, write).await;
            drained += 1;
        }
        info!("Cache writer stopped ({} queued writes drained)", drained);
    }

    async fn apply(store: &SharedStore, fence: &Fence, write: PendingWrite) {
        let _in_flight = fence.in_flight.lock().await;

        if write.epoch != fence.epoch.load(Ordering::SeqCst) {
            CacheCounters::incr(&store.counters().writes_superseded);
            metrics::record_write("superseded");
            debug!(key = %write.key, "Skipping cache write older than the last invalidation");
            return;
        }

        if store.set(&write.key, write.payload, write.ttl_secs).await {
            CacheCounters::incr(&store.counters().sets);
            metrics::record_write("ok");
            debug!(key = %write.key, ttl_secs = write.ttl_secs, "Cached response");
        } else {
            CacheCounters::incr(&store.counters().set_failures);
            metrics::record_write("error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MemoryStoreConfig;
    use crate::store::{CacheStore, MemoryStore};
    use std::time::Duration;

    fn shared() -> SharedStore {
        SharedStore::new(
            Arc::new(MemoryStore::new(MemoryStoreConfig::default())),
            Duration::from_millis(250),
        )
    }

    #[tokio::test]
    async fn test_queued_writes_land() {
        let store = shared();
        let writer = CacheWriter::spawn(store.clone(), 16);

        writer.enqueue("pet:42".into(), b"rex".to_vec(), 60, writer.epoch());
        writer.shutdown().await;

        assert_eq!(store.get("pet:42").await, Some(b"rex".to_vec()));
        assert_eq!(store.stats().sets, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let store = shared();
        let writer = CacheWriter::spawn(store.clone(), 64);

        for i in 0..20 {
            writer.enqueue(format!("pet:{}", i), b"x".to_vec(), 60, writer.epoch());
        }
        writer.shutdown().await;

        for i in 0..20 {
            assert!(store.exists(&format!("pet:{}", i)).await);
        }
    }

    #[tokio::test]
    async fn test_writes_after_shutdown_are_dropped() {
        let store = shared();
        let writer = CacheWriter::spawn(store.clone(), 4);
        writer.shutdown().await;

        writer.enqueue("pet:1".into(), b"x".to_vec(), 60, writer.epoch());
        assert!(!store.exists("pet:1").await);
        assert_eq!(store.stats().writes_dropped, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_writes() {
        let store = shared();
        let writer = CacheWriter::spawn(store.clone(), 1);

        // The worker cannot run until this task yields, so the second write finds the queue full
        writer.enqueue("pet:1".into(), b"x".to_vec(), 60, writer.epoch());
        writer.enqueue("pet:2".into(), b"x".to_vec(), 60, writer.epoch());
        assert_eq!(store.stats().writes_dropped, 1);

        writer.shutdown().await;
        assert!(store.exists("pet:1").await);
        assert!(!store.exists("pet:2").await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_writes_older_than_an_invalidation_are_skipped() {
        let store = shared();
        let writer = CacheWriter::spawn(store.clone(), 16);

        let epoch = writer.epoch();
        writer.enqueue("pet:42".into(), b"rex".to_vec(), 60, epoch);
        writer.fence().await;
        writer.enqueue("pet:43".into(), b"max".to_vec(), 60, writer.epoch());
        writer.shutdown().await;

        assert!(!store.exists("pet:42").await);
        assert!(store.exists("pet:43").await);
        assert_eq!(store.stats().writes_superseded, 1);
        assert_eq!(store.stats().sets, 1);
    }

    struct SlowSet(MemoryStore);

    #[async_trait::async_trait]
    impl crate::store::CacheStore for SlowSet {
        async fn get(&self, key: &str) -> crate::core::Result<Option<Vec<u8>>> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> crate::core::Result<()> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.0.set(key, value, ttl_secs).await
        }

        async fn delete_matching(&self, pattern: &str) -> crate::core::Result<usize> {
            self.0.delete_matching(pattern).await
        }

        async fn exists(&self, key: &str) -> crate::core::Result<bool> {
            self.0.exists(key).await
        }

        fn backend(&self) -> &'static str {
            "slow-set"
        }
    }

    #[tokio::test]
    async fn test_fence_waits_for_write_in_progress() {
        let memory = MemoryStore::new(MemoryStoreConfig::default());
        let store = SharedStore::new(
            Arc::new(SlowSet(memory.clone())),
            Duration::from_millis(250),
        );
        let writer = CacheWriter::spawn(store.clone(), 16);

        writer.enqueue("pet:42".into(), b"rex".to_vec(), 60, writer.epoch());
        // Let the worker pick the write up and start the slow set
        tokio::time::sleep(Duration::from_millis(30)).await;

        writer.fence().await;
        assert!(memory.exists("pet:42").await.unwrap());
        assert_eq!(store.delete_matching("pet:*").await, Some(1));

        writer.shutdown().await;
        assert!(!memory.exists("pet:42").await.unwrap());
    }
}
