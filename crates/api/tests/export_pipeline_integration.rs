//! End-to-end tests of the export pipeline over in-memory backends.

mod common;

use chrono::{Duration, Utc};
use common::{citizen_filter, read_archive, Harness};
use document_export_api::services::{
    ArchiveStore, ExportCleanupService, ExportError, FilterEstimator, FilterLimits,
};
use domain::error::FetchError;
use domain::models::{ExportJob, ExportJobStatus, FilterSpec, NewExportJob};
use domain::services::{DocumentCatalog, JobRepository};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

#[tokio::test]
async fn test_filter_without_matches_is_rejected() {
    let h = Harness::new();
    h.add_documents(Uuid::new_v4(), 3);

    let err = h
        .service
        .submit(Uuid::new_v4(), None, citizen_filter(Uuid::new_v4()))
        .await
        .unwrap_err();

    match err {
        ExportError::InvalidFilter(validation) => {
            assert!(!validation.valid);
            assert!(validation.errors.iter().any(|e| e == "no documents found"));
        }
        other => panic!("expected a validation error, got {:?}", other),
    }
    assert!(h.repo.is_empty());
}

#[tokio::test]
async fn test_failed_fetch_becomes_placeholder() {
    let h = Harness::new();
    let citizen = Uuid::new_v4();
    let documents = h.add_documents(citizen, 10);
    let broken = &documents[4];
    h.store.fail(
        broken.storage_path.clone(),
        FetchError::NotFound(broken.storage_path.clone()),
    );

    let job_id = h
        .service
        .submit(Uuid::new_v4(), None, citizen_filter(citizen))
        .await
        .unwrap();
    let progress = h.wait_until_terminal(job_id).await;

    assert_eq!(progress.status, ExportJobStatus::Completed);
    assert_eq!(progress.total_documents, 10);
    assert_eq!(progress.processed_documents, 9);
    assert_eq!(progress.failed_documents, 1);
    assert_eq!(progress.progress_percent, 100);
    assert_eq!(progress.warnings.len(), 1);
    assert!(progress.warnings[0].contains("not found"));

    let result = h.service.get_result(job_id).await.unwrap();
    let entries = read_archive(Path::new(&result.archive_path));
    assert_eq!(entries.len(), 11);
    assert_eq!(entries[0].0, "INDEX.txt");

    let placeholders: Vec<_> = entries
        .iter()
        .filter(|(name, _)| name.ends_with(".unavailable.txt"))
        .collect();
    assert_eq!(placeholders.len(), 1);
    let reason = String::from_utf8_lossy(&placeholders[0].1);
    assert!(reason.contains(&broken.id.to_string()));

    let index = String::from_utf8_lossy(&entries[0].1);
    assert!(index.contains("Documents: 10"));
    assert!(index.contains(&format!("citizen_{}/general/", citizen)));

    // Recorded checksum and size describe the file on disk
    let bytes = std::fs::read(&result.archive_path).unwrap();
    assert_eq!(bytes.len() as i64, result.size_bytes);
    assert_eq!(
        result.checksum.as_deref(),
        Some(shared::crypto::sha256_hex(&bytes).as_str())
    );
}

#[tokio::test]
async fn test_quota_refuses_extra_job() {
    let h = Harness::with(StdDuration::from_millis(50), |export| {
        export.max_active_jobs_per_user = 2;
    });
    let citizen = Uuid::new_v4();
    h.add_documents(citizen, 20);
    let user = Uuid::new_v4();

    assert_ok!(h.service.submit(user, None, citizen_filter(citizen)).await);
    assert_ok!(h.service.submit(user, None, citizen_filter(citizen)).await);

    let err = h
        .service
        .submit(user, None, citizen_filter(citizen))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::QuotaExceeded { active: 2, limit: 2 }));
    assert!(err.to_string().contains("2 of 2"));
    assert_eq!(h.repo.len(), 2);

    // Quota is per user
    assert_ok!(
        h.service
            .submit(Uuid::new_v4(), None, citizen_filter(citizen))
            .await
    );
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_cancel_mid_stream_discards_archive() {
    let h = Harness::with(StdDuration::from_millis(30), |export| {
        export.fetch_concurrency = 2;
    });
    let citizen = Uuid::new_v4();
    h.add_documents(citizen, 40);

    let job_id = h
        .service
        .submit(Uuid::new_v4(), None, citizen_filter(citizen))
        .await
        .unwrap();
    common::wait_for(&h.service, job_id, |p| p.processed_documents >= 2).await;

    let cancelled = h.service.cancel(job_id).await.unwrap();
    assert_eq!(cancelled.status, ExportJobStatus::Cancelled);
    h.wait_until_idle(job_id).await;

    let job = h.repo.find_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, ExportJobStatus::Cancelled);
    assert!(job.error_detail.is_none());
    assert!(job.archive_path.is_none());
    assert!(!h.job_dir(job_id).exists());
    // Progress froze at cancellation
    assert_eq!(job.progress_percent, cancelled.progress_percent);
    assert_eq!(job.processed_documents, cancelled.processed_documents);
    assert!(h.store.fetch_count() < 40);

    // Later progress reports are refused
    assert!(!h
        .repo
        .update_progress(
            job_id,
            domain::services::ProgressUpdate {
                processed_documents: 40,
                failed_documents: 0,
                progress_percent: 90,
            },
        )
        .await
        .unwrap());
}

#[tokio::test]
async fn test_stale_pending_job_fails_with_timeout() {
    let h = Harness::new();
    let stale = ExportJob::from_new(
        NewExportJob {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            unit_id: None,
            filter: citizen_filter(Uuid::new_v4()),
            total_documents: 3,
            estimated_size_bytes: 300,
            warnings: vec![],
            expires_at: Utc::now() + Duration::hours(23),
        },
        Utc::now() - Duration::minutes(31),
    );
    h.repo.put(stale.clone());

    assert_eq!(h.service.expire_stale().await.unwrap(), 1);
    let progress = h.service.get_progress(stale.id).await.unwrap();
    assert_eq!(progress.status, ExportJobStatus::Failed);
    assert_eq!(progress.error_detail.as_deref(), Some("timeout"));

    // Sweeping again changes nothing
    assert_eq!(h.service.expire_stale().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cleanup_removes_expired_completed_job() {
    let h = Harness::new();
    let citizen = Uuid::new_v4();
    h.add_documents(citizen, 3);

    let job_id = h
        .service
        .submit(Uuid::new_v4(), None, citizen_filter(citizen))
        .await
        .unwrap();
    h.wait_for_status(job_id, ExportJobStatus::Completed).await;
    h.wait_until_idle(job_id).await;
    let size = h.service.get_result(job_id).await.unwrap().size_bytes as u64;

    let cleanup = ExportCleanupService::new(
        h.repo.clone(),
        ArchiveStore::new(h.archive_dir.path()),
    );

    // Nothing is due before expiry
    assert_eq!(cleanup.run_once().await.unwrap().jobs_removed, 0);
    assert!(h.job_dir(job_id).exists());

    let expires_at = h.repo.find_by_id(job_id).await.unwrap().unwrap().expires_at;
    let report = cleanup.run_at(expires_at + Duration::seconds(1)).await.unwrap();
    assert_eq!(report.jobs_removed, 1);
    assert_eq!(report.bytes_freed, size);
    assert!(h.repo.find_by_id(job_id).await.unwrap().is_none());
    assert!(!h.job_dir(job_id).exists());

    let again = cleanup.run_at(expires_at + Duration::seconds(2)).await.unwrap();
    assert_eq!(again.jobs_removed, 0);
    assert_eq!(again.bytes_freed, 0);
}

#[tokio::test]
async fn test_concurrent_submissions_respect_quota() {
    let h = Harness::with(StdDuration::from_millis(40), |export| {
        export.max_active_jobs_per_user = 2;
    });
    let citizen = Uuid::new_v4();
    h.add_documents(citizen, 10);
    let user = Uuid::new_v4();

    let attempts = (0..12).map(|_| {
        let service = Arc::clone(&h.service);
        tokio::spawn(async move { service.submit(user, None, citizen_filter(citizen)).await })
    });
    let results = futures::future::join_all(attempts).await;

    let admitted = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(ExportError::QuotaExceeded { .. }))))
        .count();
    assert_eq!(admitted, 2);
    assert_eq!(refused, 10);
    assert!(h.repo.count_active(user).await.unwrap() <= 2);
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_fetch_concurrency_is_bounded() {
    let h = Harness::with(StdDuration::from_millis(15), |export| {
        export.fetch_concurrency = 3;
    });
    let citizen = Uuid::new_v4();
    h.add_documents(citizen, 24);

    let job_id = h
        .service
        .submit(Uuid::new_v4(), None, citizen_filter(citizen))
        .await
        .unwrap();
    let progress = h.wait_until_terminal(job_id).await;

    assert_eq!(progress.status, ExportJobStatus::Completed);
    assert_eq!(h.store.fetch_count(), 24);
    assert!(h.store.max_in_flight() <= 3);
    assert!(h.store.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_progress_stays_within_bounds() {
    let h = Harness::with(StdDuration::from_millis(10), |export| {
        export.fetch_concurrency = 2;
    });
    let citizen = Uuid::new_v4();
    h.add_documents(citizen, 20);

    let job_id = h
        .service
        .submit(Uuid::new_v4(), None, citizen_filter(citizen))
        .await
        .unwrap();

    let mut last_percent = 0;
    loop {
        let p = h.service.get_progress(job_id).await.unwrap();
        assert!(p.processed_documents >= 0);
        assert!(p.processed_documents + p.failed_documents <= p.total_documents);
        assert!((0..=100).contains(&p.progress_percent));
        assert!(p.progress_percent >= last_percent, "progress went backwards");
        last_percent = p.progress_percent;
        if p.status.is_terminal() {
            assert_eq!(p.status, ExportJobStatus::Completed);
            assert_eq!(p.progress_percent, 100);
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(3)).await;
    }
}

#[tokio::test]
async fn test_terminal_jobs_never_change() {
    let h = Harness::new();
    let citizen = Uuid::new_v4();
    h.add_documents(citizen, 2);

    let job_id = h
        .service
        .submit(Uuid::new_v4(), None, citizen_filter(citizen))
        .await
        .unwrap();
    h.wait_for_status(job_id, ExportJobStatus::Completed).await;
    h.wait_until_idle(job_id).await;
    let before = h.repo.find_by_id(job_id).await.unwrap().unwrap();

    let err = assert_err!(h.service.cancel(job_id).await);
    assert!(matches!(err, ExportError::AlreadyTerminal { .. }));
    assert!(!h.repo.mark_failed(job_id, "late failure").await.unwrap());
    assert!(!h.repo.mark_cancelled(job_id).await.unwrap());
    assert!(!h.repo.mark_processing(job_id).await.unwrap());
    assert!(h
        .repo
        .fail_stale(Utc::now() + Duration::hours(1), "timeout")
        .await
        .unwrap()
        .is_empty());

    assert_eq!(h.repo.find_by_id(job_id).await.unwrap().unwrap(), before);
}

#[tokio::test]
async fn test_selection_order_is_deterministic() {
    let h = Harness::new();
    let citizen = Uuid::new_v4();
    let documents = h.add_documents(citizen, 7);
    // Same timestamp for several documents exercises the id tie-break
    for doc in &documents[..3] {
        let mut twin = doc.clone();
        twin.id = Uuid::new_v4();
        twin.storage_path = format!("{}.copy", doc.storage_path);
        h.catalog.insert(twin);
    }

    let mut limits = FilterLimits::from(&h.config.export);
    limits.page_size = 4;
    let estimator = FilterEstimator::new(h.catalog.clone() as Arc<dyn DocumentCatalog>, limits);

    let filter = citizen_filter(citizen);
    let first = estimator.select(&filter).await.unwrap();
    let second = estimator.select(&filter).await.unwrap();
    assert_eq!(first.len(), 10);
    assert_eq!(first, second);
    assert!(first
        .windows(2)
        .all(|w| (w[0].created_at, w[0].id) > (w[1].created_at, w[1].id)));
}

#[tokio::test]
async fn test_validate_reports_warnings_and_estimate() {
    let h = Harness::new();
    let citizen = Uuid::new_v4();
    let documents = h.add_documents(citizen, 4);
    let total: i64 = documents.iter().map(|d| d.size_bytes).sum();

    let filter = FilterSpec {
        date_from: Some(Utc::now() - Duration::days(365 * 3)),
        date_to: Some(Utc::now()),
        ..citizen_filter(citizen)
    };
    let validation = h.service.validate_filter(&filter).await.unwrap();

    assert!(validation.valid);
    assert!(!validation.warnings.is_empty());
    let estimate = validation.estimate.unwrap();
    assert_eq!(estimate.document_count, 4);
    assert_eq!(estimate.estimated_size_bytes, total);
    // Validation never creates a job
    assert!(h.repo.is_empty());
}

#[tokio::test]
async fn test_limit_breach_rejected_at_submission() {
    let h = Harness::with(StdDuration::ZERO, |export| {
        export.max_documents = 5;
    });
    let citizen = Uuid::new_v4();
    h.add_documents(citizen, 6);

    let err = h
        .service
        .submit(Uuid::new_v4(), None, citizen_filter(citizen))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::InvalidFilter(_)));
    assert!(h.repo.is_empty());
}

#[tokio::test]
async fn test_catalogue_growth_after_submission_fails_job() {
    let h = Harness::with(StdDuration::from_millis(5), |export| {
        export.max_documents = 5;
    });
    let citizen = Uuid::new_v4();
    h.add_documents(citizen, 5);

    // Hold the worker back until more documents appear
    let user = Uuid::new_v4();
    let blocker = h
        .service
        .submit(user, None, citizen_filter(citizen))
        .await
        .unwrap();
    h.add_documents(citizen, 3);

    let progress = h.wait_until_terminal(blocker).await;
    h.wait_until_idle(blocker).await;
    if progress.status == ExportJobStatus::Failed {
        assert!(progress
            .error_detail
            .unwrap()
            .contains("grew past the export limits"));
        assert!(!h.job_dir(blocker).exists());
    } else {
        // The worker checked the limits before the catalogue grew
        assert_eq!(progress.status, ExportJobStatus::Completed);
        assert!(progress.total_documents >= 5);
    }
}
