use chrono::Utc;
use harvest_core::error::{AppError, ErrorCode, TransportableError};
use harvest_core::job::{
    Batch, Job, JobKind, JobState, NewJob, StateUpdate, SubmitMode, Transition,
};
use harvest_core::job_queue::JobQueue;
use harvest_db::PgJobQueue;
use uuid::Uuid;

use crate::integration::common::setup_test_db;

fn scrape_job(team: &str, priority: i32) -> Job {
    Job::from_request(
        NewJob::new(
            JobKind::Scrape,
            team,
            serde_json::json!({"url": "https://example.com"}),
        ),
        priority,
        SubmitMode::Admitted,
    )
}

#[tokio::test]
async fn enqueue_and_read_back() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let job = scrape_job("team-a", 10);
    queue.enqueue(&job).await.unwrap();

    let stored = queue.get_job(job.id).await.unwrap().expect("job exists");
    assert_eq!(stored.kind, JobKind::Scrape);
    assert_eq!(stored.state, JobState::Queued);
    assert_eq!(stored.team_id, "team-a");
    assert_eq!(stored.payload["url"], "https://example.com");
    assert!(stored.admitted);
    assert!(stored.worker_id.is_none());
    assert_eq!(queue.peek_state(job.id).await.unwrap(), Some(JobState::Queued));
}

#[tokio::test]
async fn duplicate_id_is_rejected() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let job = scrape_job("team-a", 10);
    queue.enqueue(&job).await.unwrap();
    let err = queue.enqueue(&job).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn claim_orders_by_priority_then_submission() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let late_low = scrape_job("team", 20);
    let first_high = scrape_job("team", 10);
    let second_high = scrape_job("team", 10);
    queue.enqueue(&late_low).await.unwrap();
    queue.enqueue(&first_high).await.unwrap();
    queue.enqueue(&second_high).await.unwrap();

    let a = queue.claim_next("w1").await.unwrap().unwrap();
    let b = queue.claim_next("w1").await.unwrap().unwrap();
    let c = queue.claim_next("w1").await.unwrap().unwrap();
    assert_eq!(
        vec![a.id, b.id, c.id],
        vec![first_high.id, second_high.id, late_low.id]
    );
    assert_eq!(a.state, JobState::Active);
    assert_eq!(a.worker_id.as_deref(), Some("w1"));
    assert!(a.started_at.is_some());

    assert!(queue.claim_next("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_claims_never_share_a_job() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    for _ in 0..10 {
        queue.enqueue(&scrape_job("team", 10)).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..5 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = queue.claim_next(&format!("w{i}")).await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(total, 10);
    assert_eq!(all.len(), 10);
}

#[tokio::test]
async fn complete_stores_result() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let job = scrape_job("team", 10);
    queue.enqueue(&job).await.unwrap();
    queue.claim_next("w1").await.unwrap().unwrap();

    let outcome = queue
        .transition(
            job.id,
            StateUpdate::Complete {
                result: serde_json::json!({"markdown": "# hi"}),
            },
        )
        .await
        .unwrap();

    let Transition::Applied(done) = outcome else {
        panic!("completion should apply");
    };
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.result, Some(serde_json::json!({"markdown": "# hi"})));
    assert!(done.finished_at.is_some());
}

#[tokio::test]
async fn fail_round_trips_classified_error() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let job = scrape_job("team", 10);
    queue.enqueue(&job).await.unwrap();
    queue.claim_next("w1").await.unwrap().unwrap();

    let error = TransportableError::new(ErrorCode::ScrapeActionError, "click failed");
    queue
        .transition(job.id, StateUpdate::Fail { error: error.clone() })
        .await
        .unwrap();

    let stored = queue.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.error, Some(error));
}

#[tokio::test]
async fn transition_from_wrong_state_is_rejected() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let job = scrape_job("team", 10);
    queue.enqueue(&job).await.unwrap();

    // Completing a job nobody claimed.
    let outcome = queue
        .transition(
            job.id,
            StateUpdate::Complete {
                result: serde_json::json!({}),
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Transition::Rejected {
            current: JobState::Queued
        }
    ));

    queue.transition(job.id, StateUpdate::Cancel).await.unwrap();
    let outcome = queue.transition(job.id, StateUpdate::Cancel).await.unwrap();
    assert!(matches!(
        outcome,
        Transition::Rejected {
            current: JobState::Cancelled
        }
    ));
}

#[tokio::test]
async fn racing_complete_and_cancel_has_one_winner() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let job = scrape_job("team", 10);
    queue.enqueue(&job).await.unwrap();
    queue.claim_next("w1").await.unwrap().unwrap();

    let complete = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .transition(
                    job.id,
                    StateUpdate::Complete {
                        result: serde_json::json!({}),
                    },
                )
                .await
                .unwrap()
        })
    };
    let cancel = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.transition(job.id, StateUpdate::Cancel).await.unwrap() })
    };

    let applied = [complete.await.unwrap(), cancel.await.unwrap()]
        .iter()
        .filter(|t| t.is_applied())
        .count();
    assert_eq!(applied, 1);
    assert!(queue.peek_state(job.id).await.unwrap().unwrap().is_terminal());
}

#[tokio::test]
async fn transition_on_missing_job_is_not_found() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let err = queue
        .transition(Uuid::new_v4(), StateUpdate::Cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn remove_deletes_once() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let job = scrape_job("team", 10);
    queue.enqueue(&job).await.unwrap();

    assert!(queue.remove(job.id).await.unwrap());
    assert!(!queue.remove(job.id).await.unwrap());
    assert!(queue.get_job(job.id).await.unwrap().is_none());
    assert!(queue.peek_state(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn batch_round_trip_and_cancel_flag() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let batch = Batch {
        id: Uuid::new_v4(),
        kind: JobKind::BatchScrape,
        team_id: "team".into(),
        zero_data_retention: true,
        job_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        cancelled: false,
        created_at: Utc::now(),
    };
    queue.create_batch(&batch).await.unwrap();

    let stored = queue.get_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.job_ids, batch.job_ids);
    assert!(stored.zero_data_retention);
    assert!(!stored.cancelled);

    queue.mark_batch_cancelled(batch.id).await.unwrap();
    assert!(queue.get_batch(batch.id).await.unwrap().unwrap().cancelled);

    let err = queue.mark_batch_cancelled(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    assert!(queue.remove_batch(batch.id).await.unwrap());
    assert!(queue.get_batch(batch.id).await.unwrap().is_none());
    assert!(!queue.remove_batch(batch.id).await.unwrap());
}

#[tokio::test]
async fn admitted_load_skips_direct_and_terminal_jobs() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let admitted = scrape_job("team-a", 10);
    let finished = scrape_job("team-a", 10);
    let direct = Job::from_request(
        NewJob::new(JobKind::Scrape, "team-a", serde_json::json!({})),
        10,
        SubmitMode::Direct,
    );
    let other_team = scrape_job("team-b", 10);
    for job in [&admitted, &finished, &direct, &other_team] {
        queue.enqueue(job).await.unwrap();
    }
    queue.transition(finished.id, StateUpdate::Cancel).await.unwrap();

    assert_eq!(queue.admitted_load("team-a").await.unwrap(), 1);
    assert_eq!(queue.admitted_load("team-b").await.unwrap(), 1);
    assert_eq!(queue.count_by_state(JobState::Queued).await.unwrap(), 3);
    assert_eq!(queue.count_by_state(JobState::Cancelled).await.unwrap(), 1);
}
