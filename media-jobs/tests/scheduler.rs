mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use common::{FakeMedia, Harness, ample_sample, emergency_sample};
use media_jobs::error::JobErrorKind;
use media_jobs::job::{JobKind, JobStatus};
use media_jobs::lifecycle::JobLifecycleManager;
use media_jobs::policy::{PolicyConfig, QualityTier};
use media_jobs::scheduler::SchedulerEvent;
use media_jobs::store::FileJobRepository;

fn short_clip() -> serde_json::Value {
    json!({ "source": { "url": "fake://talk" }, "start_time": 0, "end_time": 30 })
}

fn long_clip() -> serde_json::Value {
    json!({ "source": { "url": "fake://talk" }, "start_time": 0, "end_time": 100 })
}

#[tokio::test]
async fn test_submitted_job_is_pending() {
    let h = Harness::fixed().await;
    let id = h.lifecycle.submit(JobKind::Split, short_clip()).await.unwrap();

    let record = h.lifecycle.status(&id).await.unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert_eq!(record.progress, 0);
    assert!(record.outputs.is_empty());
    assert_eq!(h.lifecycle.queue().len(), 1);
}

#[tokio::test]
async fn test_emergency_refuses_then_admits_after_recovery() {
    let h = Harness::builder().sample(emergency_sample()).build().await;
    let mut events = h.scheduler.subscribe();
    let id = h.lifecycle.submit(JobKind::Split, short_clip()).await.unwrap();

    let report = h.scheduler.tick().await.unwrap();
    assert!(report.refused);
    assert!(report.admitted.is_empty());
    assert!(report.deferral.unwrap().contains("256 MiB"));
    assert!(h.scheduler.is_emergency());
    assert_eq!(h.lifecycle.status(&id).await.unwrap().status, JobStatus::Pending);

    assert!(matches!(
        events.try_recv().unwrap(),
        SchedulerEvent::EmergencyEntered { available_mib: 256, .. }
    ));
    assert!(matches!(events.try_recv().unwrap(), SchedulerEvent::Swept { .. }));

    // Still refused; the sweep only runs when the emergency starts.
    assert!(h.scheduler.tick().await.unwrap().refused);
    assert!(events.try_recv().is_err());

    h.probe.set(ample_sample());
    let report = h.scheduler.tick().await.unwrap();
    assert!(!report.refused);
    assert_eq!(report.deferral, None);
    assert_eq!(report.admitted, vec![id.clone()]);
    assert!(!h.scheduler.is_emergency());
    assert!(matches!(
        events.try_recv().unwrap(),
        SchedulerEvent::EmergencyCleared { .. }
    ));

    let record = h.run_to_end(&id).await;
    assert_eq!(record.status, JobStatus::Completed, "{:?}", record.error);
}

#[tokio::test]
async fn test_admission_snapshot_follows_telemetry() {
    let h = Harness::builder()
        .sample(media_jobs::telemetry::TelemetrySample::from_mib(16384, 1024, 8))
        .build()
        .await;
    let id = h.lifecycle.submit(JobKind::Split, short_clip()).await.unwrap();
    h.scheduler.tick().await.unwrap();

    let record = h.lifecycle.status(&id).await.unwrap();
    let snapshot = record.resource_snapshot.unwrap();
    assert_eq!(snapshot.worker_count, 1);
    assert_eq!(snapshot.parallel_chunks, 1);
    assert_eq!(snapshot.chunk_secs, 30);
    assert_eq!(snapshot.quality_tier, QualityTier::Tiny);
    assert!(!snapshot.emergency);

    h.run_to_end(&id).await;
}

#[tokio::test]
async fn test_pending_job_admitted_when_slot_frees() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::builder()
        .policy(PolicyConfig::fixed(1, 30, QualityTier::Tiny))
        .media(FakeMedia::new(100.0).gated(gate.clone()))
        .retry_interval_ms(20)
        .build()
        .await;

    let first = h.lifecycle.submit(JobKind::Split, short_clip()).await.unwrap();
    let second = h.lifecycle.submit(JobKind::Split, short_clip()).await.unwrap();

    let cancel = CancellationToken::new();
    let run = tokio::spawn(h.scheduler.clone().run(cancel.clone()));

    h.wait_for(&first, JobStatus::Processing).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.scheduler.active_workers(), 1);
    assert_eq!(
        h.lifecycle.status(&second).await.unwrap().status,
        JobStatus::Pending
    );

    gate.add_permits(1);
    let second_started = h.wait_for(&second, JobStatus::Processing).await;
    let first_done = h.lifecycle.status(&first).await.unwrap();
    assert_eq!(first_done.status, JobStatus::Completed);
    assert!(second_started.started_at.unwrap() >= first_done.finished_at.unwrap());

    gate.add_permits(1);
    h.wait_for(&second, JobStatus::Completed).await;

    cancel.cancel();
    run.await.unwrap();
    h.scheduler.shutdown(Duration::from_secs(1)).await;
    assert_eq!(h.scheduler.active_workers(), 0);
}

#[tokio::test]
async fn test_store_failure_during_admission_keeps_job_queued() {
    let h = Harness::fixed().await;
    let id = h.lifecycle.submit(JobKind::Split, short_clip()).await.unwrap();
    h.repo.fail_next_updates(1);

    let report = h.scheduler.tick().await.unwrap();
    assert!(report.admitted.is_empty());
    assert_eq!(h.lifecycle.status(&id).await.unwrap().status, JobStatus::Pending);
    assert_eq!(h.lifecycle.queue().peek(), Some(id.clone()));

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.admitted, vec![id.clone()]);
    let record = h.run_to_end(&id).await;
    assert_eq!(record.status, JobStatus::Completed, "{:?}", record.error);
}

#[tokio::test]
async fn test_store_failure_while_cancelling_pending_job_is_retried() {
    let h = Harness::fixed().await;
    let cancelled = h.lifecycle.submit(JobKind::Split, short_clip()).await.unwrap();
    let waiting = h.lifecycle.submit(JobKind::Split, short_clip()).await.unwrap();
    h.lifecycle.cancel(&cancelled).await.unwrap();
    h.repo.fail_next_updates(1);

    let report = h.scheduler.tick().await.unwrap();
    assert!(report.cancelled.is_empty());
    assert!(report.admitted.is_empty());
    assert_eq!(h.lifecycle.queue().len(), 2);
    assert_eq!(h.lifecycle.queue().peek(), Some(cancelled.clone()));

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.cancelled, vec![cancelled.clone()]);
    assert_eq!(report.admitted, vec![waiting.clone()]);
    let record = h.lifecycle.status(&cancelled).await.unwrap();
    assert_eq!(record.error.unwrap().kind, JobErrorKind::Cancelled);

    h.run_to_end(&waiting).await;
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let h = Harness::fixed().await;
    let id = h.lifecycle.submit(JobKind::Split, short_clip()).await.unwrap();
    h.lifecycle.cancel(&id).await.unwrap();

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.cancelled, vec![id.clone()]);
    assert!(report.admitted.is_empty());
    assert!(h.lifecycle.queue().is_empty());

    let record = h.lifecycle.status(&id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.unwrap().is_cancellation());
    assert!(record.started_at.is_some());

    // Terminal jobs cannot be cancelled again.
    assert!(h.lifecycle.cancel(&id).await.is_err());
}

#[tokio::test]
async fn test_cancel_processing_job_stops_at_segment_boundary() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::builder()
        .policy(PolicyConfig::fixed(1, 30, QualityTier::Tiny))
        .media(FakeMedia::new(100.0).gated(gate.clone()))
        .build()
        .await;

    let id = h.lifecycle.submit(JobKind::Split, long_clip()).await.unwrap();
    h.scheduler.tick().await.unwrap();
    h.wait_for(&id, JobStatus::Processing).await;

    h.lifecycle.cancel(&id).await.unwrap();
    gate.add_permits(10);

    let record = h.run_to_end(&id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.unwrap().kind, JobErrorKind::Cancelled);
    assert!(record.outputs.is_empty());
    assert!(h.media.renders.load(std::sync::atomic::Ordering::SeqCst) < 4);
    assert!(!h.lifecycle.output_dir(&id).exists());
}

#[tokio::test]
async fn test_pipeline_timeout_fails_job() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::builder()
        .policy(PolicyConfig::fixed(1, 30, QualityTier::Tiny))
        .media(FakeMedia::new(100.0).gated(gate))
        .pipeline_timeout_secs(1)
        .build()
        .await;

    let id = h.lifecycle.submit(JobKind::Split, short_clip()).await.unwrap();
    h.scheduler.tick().await.unwrap();

    let record = h.wait_for(&id, JobStatus::Failed).await;
    assert_eq!(record.error.unwrap().kind, JobErrorKind::Timeout);
    assert!(!h.lifecycle.workspace(&id).exists());
}

async fn open_manager(root: &Path) -> JobLifecycleManager {
    let repo = FileJobRepository::open(root.join("jobs")).await.unwrap();
    JobLifecycleManager::new(Arc::new(repo), root.join("tmp"), root.join("outputs"))
}

#[tokio::test]
async fn test_recovery_requeues_pending_and_interrupts_processing() {
    let dir = tempfile::tempdir().unwrap();

    let before = open_manager(dir.path()).await;
    let running = before.submit(JobKind::Split, short_clip()).await.unwrap();
    let waiting = before.submit(JobKind::Split, short_clip()).await.unwrap();
    let decision = media_jobs::policy::ResourcePolicy::default().decide(&ample_sample());
    before.admit(&running, decision).await.unwrap();
    drop(before);

    let after = open_manager(dir.path()).await;
    let report = after.recover().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.interrupted, 1);
    assert_eq!(after.queue().pop().as_deref(), Some(waiting.as_str()));

    let record = after.status(&running).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.unwrap().kind, JobErrorKind::Interrupted);
}

#[tokio::test]
async fn test_progress_is_monotonic_with_parallel_segments() {
    let h = Harness::builder().build().await;
    let mut events = h.lifecycle.subscribe();

    let id = h
        .lifecycle
        .submit(
            JobKind::Join,
            json!({
                "sources": [{ "url": "fake://a" }, { "url": "fake://b" }, { "url": "fake://c" }]
            }),
        )
        .await
        .unwrap();
    let record = h.run_to_end(&id).await;
    assert_eq!(record.status, JobStatus::Completed, "{:?}", record.error);

    let seen = common::drain_progress(&mut events, &id);
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last(), Some(&100));
}
