use super::*;
use crate::archiver::BatchOptions;
use crate::error::Error;
use crate::store::{Mark, has_mark};
use crate::types::SkipReason;

fn ids(count: usize) -> Vec<ExternalId> {
    (0..count).map(|i| id(&format!("BVbatch{i:05}"))).collect()
}

#[tokio::test]
async fn admission_never_exceeds_capacity() {
    let h = harness();
    h.source
        .set_media("hev-80", MediaBehavior::Slow(Duration::from_millis(30)));
    let capacity = h.archiver.config().download.video_concurrency;
    let items = ids(capacity * 5);
    let mut rx = h.archiver.subscribe();

    let report = h
        .archiver
        .download_batch(&items, &BatchOptions::default())
        .await
        .unwrap();
    assert_eq!(report.completed.len(), items.len());
    assert!(report.failed.is_empty());

    let mut open = 0usize;
    let mut max_open = 0usize;
    for event in drain(&mut rx) {
        match event {
            Event::DownloadStarted { .. } => {
                open += 1;
                max_open = max_open.max(open);
            }
            Event::ItemDownloaded { .. } | Event::DownloadFailed { .. } => open -= 1,
            _ => {}
        }
    }
    assert_eq!(open, 0);
    assert!(max_open <= capacity, "{max_open} items open at once");
    assert!(max_open > 1, "items never overlapped");
}

#[tokio::test]
async fn items_existing_remotely_are_skipped_and_cached() {
    let h = harness();
    let existing = id("BVremote00001");
    let fresh = id("BVremote00002");
    let remote_part1 = h.archiver.store().item(&existing).part(1);
    h.remote
        .insert(remote_part1.remote_identifier(), RemoteItem::default());

    let report = h
        .archiver
        .download_batch(&[existing.clone(), fresh.clone()], &BatchOptions::default())
        .await
        .unwrap();
    assert_eq!(report.skipped, vec![(existing.clone(), SkipReason::ExistsRemotely)]);
    assert_eq!(report.completed, vec![fresh.clone()]);
    assert!(
        !h.source
            .calls_with("list:")
            .iter()
            .any(|c| c.contains(existing.as_str()))
    );

    let before = h.remote.exists_calls.load(Ordering::SeqCst);
    h.archiver
        .download_batch(&[existing.clone()], &BatchOptions::default())
        .await
        .unwrap();
    assert_eq!(h.remote.exists_calls.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn remote_check_can_be_skipped() {
    let h = harness();
    let item_id = id("BVremote00001");
    let part1 = h.archiver.store().item(&item_id).part(1);
    h.remote.insert(part1.remote_identifier(), RemoteItem::default());

    let options = BatchOptions {
        skip_remote_check: true,
        ..Default::default()
    };
    let report = h.archiver.download_batch(&[item_id.clone()], &options).await.unwrap();
    assert_eq!(report.completed, vec![item_id]);
    assert_eq!(h.remote.exists_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn skip_to_drops_the_head_of_the_list() {
    let h = harness();
    let items = ids(3);
    let options = BatchOptions {
        skip_to: 2,
        ..Default::default()
    };

    let report = h.archiver.download_batch(&items, &options).await.unwrap();
    assert_eq!(report.completed, vec![items[2].clone()]);
    assert_eq!(h.source.calls_with("list:").len(), 1);
}

#[tokio::test]
async fn one_failing_item_does_not_stop_the_others() {
    let h = harness();
    let items = ids(3);
    let bad_url = h.item_url(&items[1]);
    h.source.set_parts(&bad_url, vec![format!("{bad_url}?p=2")]);

    let report = h
        .archiver
        .download_batch(&items, &BatchOptions::default())
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, items[1]);
    assert_eq!(report.completed.len(), 2);
    assert!(report.has_failures());
}

#[tokio::test]
async fn completed_items_are_skipped_before_admission() {
    let h = harness();
    let items = ids(2);
    h.archiver.download_batch(&items, &BatchOptions::default()).await.unwrap();
    h.source.clear_calls();

    let report = h
        .archiver
        .download_batch(&items, &BatchOptions::default())
        .await
        .unwrap();
    assert_eq!(report.skipped.len(), 2);
    assert!(
        report
            .skipped
            .iter()
            .all(|(_, r)| *r == SkipReason::AlreadyDownloaded)
    );
    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn insufficient_space_stops_admission() {
    let h = harness();
    let options = BatchOptions {
        min_free_space: Some(u64::MAX),
        ..Default::default()
    };

    let err = h.archiver.download_batch(&ids(3), &options).await.unwrap_err();
    match err {
        Error::InsufficientSpace {
            required, drained, ..
        } => {
            assert_eq!(required, u64::MAX);
            assert_eq!(drained, 0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.source.calls_with("list:").is_empty());
}

#[tokio::test]
async fn failed_space_check_lets_in_flight_items_finish() {
    let h = harness_with(|config| {
        config.storage.storage_home_dir = config.storage.storage_home_dir.join("store");
        config.download.video_concurrency = 2;
    });
    let items = ids(3);
    let root = h.archiver.store().root().to_path_buf();
    h.source.remove_on_listing(&h.item_url(&items[0]), &root);
    h.source
        .delay_listing(&h.item_url(&items[1]), Duration::from_millis(50));
    let options = BatchOptions {
        skip_remote_check: true,
        min_free_space: Some(1),
        ..Default::default()
    };

    let err = h.archiver.download_batch(&items, &options).await.unwrap_err();
    assert!(matches!(err, Error::DiskSpaceCheckFailed(_)), "unexpected {err:?}");

    let slow = h.archiver.store().item(&items[1]);
    assert!(has_mark(slow.dir(), Mark::AllDownloaded));
    assert!(h.source.calls_with(&format!("list:{}", h.item_url(&items[2]))).is_empty());
}

#[tokio::test]
async fn stopped_archiver_admits_nothing() {
    let h = harness();
    h.archiver.stop_admission();

    let report = h
        .archiver
        .download_batch(&ids(2), &BatchOptions::default())
        .await
        .unwrap();
    assert!(report.completed.is_empty());
    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn upload_batch_collects_per_item_results() {
    let h = harness();
    let items = ids(3);
    h.archiver
        .download_batch(&items[..2], &BatchOptions::default())
        .await
        .unwrap();

    let report = h
        .archiver
        .upload_batch(&items, &crate::archiver::UploadOptions::from_config(h.archiver.config()))
        .await
        .unwrap();
    assert_eq!(report.completed, items[..2].to_vec());
    assert_eq!(report.skipped, vec![(items[2].clone(), SkipReason::Missing)]);
    for item_id in &items[..2] {
        assert!(h.archiver.store().item(item_id).part(1).has(Mark::Uploaded));
    }
    assert!(!has_mark(&h.archiver.store().item(&items[2]).dir(), Mark::AllDownloaded));
}
