use super::*;
use crate::archiver::tests::{drain, harness};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn id(raw: &str) -> ExternalId {
    ExternalId::new(raw).unwrap()
}

fn policy() -> PhasePolicy {
    PhasePolicy {
        download_attempts: 2,
        download_backoff: Duration::from_millis(1),
        upload_attempts: 3,
        upload_backoff: Duration::from_millis(1),
    }
}

/// Pipeline failing the first N calls of each phase
#[derive(Default)]
struct ScriptedPipeline {
    download_failures: AtomicU32,
    upload_failures: AtomicU32,
    downloads: AtomicU32,
    uploads: AtomicU32,
}

impl ScriptedPipeline {
    fn failing(download: u32, upload: u32) -> Self {
        Self {
            download_failures: AtomicU32::new(download),
            upload_failures: AtomicU32::new(upload),
            ..Default::default()
        }
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ItemPipeline for ScriptedPipeline {
    async fn download(&self, _id: &ExternalId) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.download_failures) {
            return Err(crate::error::Error::Other("download exited with 1".into()));
        }
        Ok(())
    }

    async fn upload(&self, _id: &ExternalId) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.upload_failures) {
            return Err(crate::error::Error::Other("upload exited with 1".into()));
        }
        Ok(())
    }
}

async fn run_one(queue: &Arc<WorkQueue>, pipeline: Arc<ScriptedPipeline>) -> QueueStatus {
    let worker = QueueWorker::new(queue.clone(), pipeline, policy());
    let entry = queue.next().await;
    worker.process(&entry.id).await
}

#[tokio::test]
async fn list_is_sorted_by_enqueue_time_and_indexed() {
    let queue = WorkQueue::new(250);
    let a = queue.enqueue(id("BVqueue00001")).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    queue.enqueue(id("BVqueue00002")).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    queue.enqueue(id("BVqueue00003")).await;

    let started = queue.next().await;
    assert_eq!(started.id, a.id);
    assert_eq!(started.status, QueueStatus::Downloading);

    let all = queue.list().await;
    let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["BVqueue00001", "BVqueue00002", "BVqueue00003"]);
    assert_eq!(queue.pending_len().await, 2);

    let (entry, index) = queue.get(&id("BVqueue00003")).await.unwrap();
    assert_eq!(index, 2);
    assert_eq!(entry.status, QueueStatus::Pending);
    assert!(queue.get(&id("BVqueue00009")).await.is_none());
}

#[tokio::test]
async fn pending_ids_are_not_queued_twice() {
    let queue = WorkQueue::new(250);
    let first = queue.enqueue(id("BVqueue00001")).await;
    let second = queue.enqueue(id("BVqueue00001")).await;
    assert_eq!(first, second);
    assert_eq!(queue.pending_len().await, 1);
}

#[tokio::test]
async fn only_pending_entries_can_be_removed() {
    let queue = WorkQueue::new(250);
    queue.enqueue(id("BVqueue00001")).await;
    queue.enqueue(id("BVqueue00002")).await;
    queue.enqueue(id("BVqueue00003")).await;
    queue.next().await;

    assert_eq!(queue.remove_pending(&id("BVqueue00001")).await, None);
    assert_eq!(queue.remove_pending(&id("BVqueue00003")).await, Some(1));
    assert_eq!(queue.remove_pending(&id("BVqueue00003")).await, None);
    assert_eq!(queue.list().await.len(), 2);
}

#[tokio::test]
async fn recent_entries_evict_the_oldest() {
    let queue = WorkQueue::new(2);
    for n in 1..=3 {
        queue.enqueue(id(&format!("BVqueue0000{n}"))).await;
        queue.next().await;
    }
    let ids: Vec<String> = queue.list().await.iter().map(|e| e.id.to_string()).collect();
    assert_eq!(ids, vec!["BVqueue00002", "BVqueue00003"]);
}

#[tokio::test]
async fn next_waits_for_an_enqueue() {
    let queue = Arc::new(WorkQueue::new(250));
    let waiter = tokio::spawn({
        let queue = queue.clone();
        async move { queue.next().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    queue.enqueue(id("BVqueue00001")).await;
    let entry = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.id, id("BVqueue00001"));
}

#[tokio::test]
async fn item_runs_both_phases_to_finished() {
    let queue = Arc::new(WorkQueue::new(250));
    queue.enqueue(id("BVqueue00001")).await;
    let pipeline = Arc::new(ScriptedPipeline::default());

    let status = run_one(&queue, pipeline.clone()).await;
    assert_eq!(status, QueueStatus::Finished);
    assert_eq!(pipeline.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.uploads.load(Ordering::SeqCst), 1);
    let (entry, _) = queue.get(&id("BVqueue00001")).await.unwrap();
    assert_eq!(entry.status, QueueStatus::Finished);
    assert!(entry.error.is_none());
}

#[tokio::test]
async fn phases_are_retried_within_their_budget() {
    let queue = Arc::new(WorkQueue::new(250));
    queue.enqueue(id("BVqueue00001")).await;
    let pipeline = Arc::new(ScriptedPipeline::failing(1, 2));

    let status = run_one(&queue, pipeline.clone()).await;
    assert_eq!(status, QueueStatus::Finished);
    assert_eq!(pipeline.downloads.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.uploads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_download_fails_without_upload() {
    let queue = Arc::new(WorkQueue::new(250));
    queue.enqueue(id("BVqueue00001")).await;
    let pipeline = Arc::new(ScriptedPipeline::failing(2, 0));

    let status = run_one(&queue, pipeline.clone()).await;
    assert_eq!(status, QueueStatus::Failed);
    assert_eq!(pipeline.uploads.load(Ordering::SeqCst), 0);
    let (entry, _) = queue.get(&id("BVqueue00001")).await.unwrap();
    assert_eq!(entry.status, QueueStatus::Failed);
    assert!(entry.error.unwrap().contains("download exited"));
}

#[tokio::test]
async fn exhausted_upload_fails_the_entry() {
    let queue = Arc::new(WorkQueue::new(250));
    queue.enqueue(id("BVqueue00001")).await;
    let pipeline = Arc::new(ScriptedPipeline::failing(0, 3));

    assert_eq!(run_one(&queue, pipeline).await, QueueStatus::Failed);
}

#[tokio::test]
async fn worker_drains_the_queue_and_stops_on_shutdown() {
    let queue = Arc::new(WorkQueue::new(250));
    queue.enqueue(id("BVqueue00001")).await;
    queue.enqueue(id("BVqueue00002")).await;
    let pipeline = Arc::new(ScriptedPipeline::default());
    let worker = QueueWorker::new(queue.clone(), pipeline.clone(), policy());
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });
    for _ in 0..100 {
        if pipeline.uploads.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();

    let statuses: Vec<QueueStatus> = queue.list().await.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![QueueStatus::Finished, QueueStatus::Finished]);
}

#[tokio::test]
async fn shutdown_mid_item_requeues_it() {
    struct Stuck;

    #[async_trait]
    impl ItemPipeline for Stuck {
        async fn download(&self, _id: &ExternalId) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn upload(&self, _id: &ExternalId) -> Result<()> {
            Ok(())
        }
    }

    let queue = Arc::new(WorkQueue::new(250));
    queue.enqueue(id("BVqueue00001")).await;
    let worker = QueueWorker::new(queue.clone(), Arc::new(Stuck), policy());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(queue.pending_len().await, 0);
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(queue.pending_len().await, 1);
    let (entry, index) = queue.get(&id("BVqueue00001")).await.unwrap();
    assert_eq!((entry.status, index), (QueueStatus::Pending, 0));
}

#[tokio::test]
async fn pending_entries_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.txt");

    let queue = WorkQueue::new(250);
    queue.enqueue(id("BVqueue00001")).await;
    queue.enqueue(id("BVqueue00002")).await;
    queue.enqueue(id("BVqueue00003")).await;
    queue.next().await;
    assert_eq!(queue.save(&path).await.unwrap(), 2);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "BVqueue00002\tpending\nBVqueue00003\tpending\n"
    );

    let restored = WorkQueue::new(250);
    assert_eq!(restored.load(&path).await.unwrap(), 2);
    let ids: Vec<String> = restored.list().await.iter().map(|e| e.id.to_string()).collect();
    assert_eq!(ids, vec!["BVqueue00002", "BVqueue00003"]);
}

#[tokio::test]
async fn load_skips_bad_lines_and_tolerates_a_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.txt");
    assert_eq!(WorkQueue::new(250).load(&path).await.unwrap(), 0);

    std::fs::write(&path, "BVqueue00001\tfailed\n../etc\tpending\n\nBVqueue00002\n").unwrap();
    let queue = WorkQueue::new(250);
    assert_eq!(queue.load(&path).await.unwrap(), 2);
    assert!(
        queue
            .list()
            .await
            .iter()
            .all(|e| e.status == QueueStatus::Pending)
    );
}

#[tokio::test]
async fn status_changes_are_broadcast() {
    let (tx, mut rx) = tokio::sync::broadcast::channel(16);
    let queue = Arc::new(WorkQueue::new(250).with_events(tx));
    queue.enqueue(id("BVqueue00001")).await;

    run_one(&queue, Arc::new(ScriptedPipeline::default())).await;

    let statuses: Vec<QueueStatus> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::QueueStatusChanged { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            QueueStatus::Pending,
            QueueStatus::Downloading,
            QueueStatus::Uploading,
            QueueStatus::Finished,
        ]
    );
}

#[tokio::test]
async fn archiver_pipeline_downloads_and_uploads() {
    let h = harness();
    let item_id = id("AB12CD34");
    let queue = Arc::new(WorkQueue::new(250).with_events(h.archiver.event_sender()));
    queue.enqueue(item_id.clone()).await;
    let worker = QueueWorker::new(
        queue.clone(),
        Arc::new(h.archiver.clone()),
        PhasePolicy::from_config(&h.archiver.config().queue),
    );

    let entry = queue.next().await;
    assert_eq!(worker.process(&entry.id).await, QueueStatus::Finished);
    assert_eq!(h.remote.submissions().len(), 1);
    // queue uploads remove the local copy by default
    assert!(!h.archiver.store().item(&item_id).dir().exists());
}
