mod common;

use common::{enqueue, setup_queue};
use queuectl::jobs::store::{DLQ_FILE, JOBS_FILE};
use queuectl::jobs::{JobState, JobStore, NewJob, StoreError, ValidationError};

#[tokio::test]
async fn enqueue_sets_store_owned_fields() {
    let q = setup_queue().await;

    let new = NewJob::from_json(
        r#"{"id":"job1","command":"echo hi","state":"completed","attempts":7,"priority":"high"}"#,
    )
    .unwrap();
    let job = q.store.enqueue(new).await.unwrap();

    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.created_at, job.updated_at);
    assert_eq!(job.extra.get("priority").unwrap(), "high");

    let listed = q.store.list(None).await.unwrap();
    assert_eq!(listed, vec![job]);
}

#[tokio::test]
async fn enqueue_rejects_duplicate_ids_live_or_dead() {
    let q = setup_queue().await;
    enqueue(&q.store, "a", "true").await;
    enqueue(&q.store, "b", "true").await;
    assert!(q.store.move_to_dead("b").await.unwrap());

    for id in ["a", "b"] {
        let err = q
            .store
            .enqueue(NewJob::new(id, "echo again").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(ref dup) if dup == id));
    }

    assert_eq!(q.store.list(None).await.unwrap().len(), 1);
    assert_eq!(q.store.list_dead().await.unwrap().len(), 1);
}

#[tokio::test]
async fn submissions_without_id_or_command_are_rejected() {
    assert!(matches!(
        NewJob::from_json(r#"{"command":"true"}"#),
        Err(ValidationError::MissingField("id"))
    ));
    assert!(matches!(
        NewJob::from_json(r#"{"id":"x","command":"  "}"#),
        Err(ValidationError::EmptyField("command"))
    ));
    assert!(matches!(
        NewJob::from_json(r#"["id","command"]"#),
        Err(ValidationError::NotAnObject)
    ));
    assert!(matches!(
        NewJob::from_json("{not json"),
        Err(ValidationError::InvalidJson(_))
    ));
}

#[tokio::test]
async fn list_filters_by_state_in_insertion_order() {
    let q = setup_queue().await;
    for id in ["j1", "j2", "j3"] {
        enqueue(&q.store, id, "true").await;
    }
    assert!(q.store.set_state("j2", JobState::Failed).await.unwrap());

    let pending: Vec<_> = q
        .store
        .list(Some(JobState::Pending))
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(pending, ["j1", "j3"]);

    let failed = q.store.list(Some(JobState::Failed)).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "j2");
}

#[tokio::test]
async fn set_state_on_absent_job_changes_nothing() {
    let q = setup_queue().await;
    enqueue(&q.store, "j1", "true").await;

    assert!(!q.store.set_state("nope", JobState::Completed).await.unwrap());
    assert!(!q.store.set_attempts("nope", 3).await.unwrap());

    let jobs = q.store.list(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Pending);
}

#[tokio::test]
async fn set_state_bumps_updated_at() {
    let q = setup_queue().await;
    let job = enqueue(&q.store, "j1", "true").await;

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert!(q.store.set_state("j1", JobState::Processing).await.unwrap());

    let after = q.store.get("j1").await.unwrap().unwrap();
    assert_eq!(after.state, JobState::Processing);
    assert_eq!(after.created_at, job.created_at);
    assert!(after.updated_at > job.updated_at);
}

#[tokio::test]
async fn completed_jobs_are_terminal() {
    let q = setup_queue().await;
    enqueue(&q.store, "j1", "true").await;
    assert!(q.store.set_state("j1", JobState::Completed).await.unwrap());

    assert!(!q.store.set_state("j1", JobState::Pending).await.unwrap());
    assert!(!q.store.set_attempts("j1", 9).await.unwrap());

    let job = q.store.get("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn setting_dead_directly_is_refused() {
    let q = setup_queue().await;
    enqueue(&q.store, "j1", "true").await;

    let err = q.store.set_state("j1", JobState::Dead).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
    assert_eq!(
        q.store.get("j1").await.unwrap().unwrap().state,
        JobState::Pending
    );
}

#[tokio::test]
async fn summary_counts_live_jobs_by_state() {
    let q = setup_queue().await;
    for id in ["a", "b", "c", "d"] {
        enqueue(&q.store, id, "true").await;
    }
    q.store.set_state("a", JobState::Completed).await.unwrap();
    q.store.set_state("b", JobState::Completed).await.unwrap();
    q.store.move_to_dead("c").await.unwrap();

    let summary = q.store.summary().await.unwrap();
    assert_eq!(summary.get(&JobState::Completed), Some(&2));
    assert_eq!(summary.get(&JobState::Pending), Some(&1));
    assert_eq!(summary.get(&JobState::Failed), None);
    assert_eq!(summary.get(&JobState::Dead), None);
}

#[tokio::test]
async fn move_to_dead_relocates_job_and_keeps_attempts() {
    let q = setup_queue().await;
    enqueue(&q.store, "j1", "false").await;
    q.store.set_attempts("j1", 4).await.unwrap();

    assert!(q.store.move_to_dead("j1").await.unwrap());

    assert!(q.store.get("j1").await.unwrap().is_none());
    let dead = q.store.list_dead().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, "j1");
    assert_eq!(dead[0].state, JobState::Dead);
    assert_eq!(dead[0].attempts, 4);

    // second call finds nothing live and must not duplicate the DLQ entry
    assert!(!q.store.move_to_dead("j1").await.unwrap());
    assert_eq!(q.store.list_dead().await.unwrap().len(), 1);
}

#[tokio::test]
async fn resurrect_returns_job_to_pending_with_attempts_reset() {
    let q = setup_queue().await;
    let original = enqueue(&q.store, "j1", "exit 7").await;
    q.store.set_attempts("j1", 4).await.unwrap();
    q.store.move_to_dead("j1").await.unwrap();

    assert!(q.store.resurrect("j1").await.unwrap());

    assert!(q.store.list_dead().await.unwrap().is_empty());
    let job = q.store.get("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.id, original.id);
    assert_eq!(job.command, "exit 7");
    assert_eq!(job.created_at, original.created_at);
}

#[tokio::test]
async fn resurrect_unknown_id_touches_nothing() {
    let q = setup_queue().await;
    enqueue(&q.store, "live", "true").await;
    enqueue(&q.store, "gone", "true").await;
    q.store.move_to_dead("gone").await.unwrap();

    assert!(!q.store.resurrect("missing").await.unwrap());
    // a live id is not in the DLQ either
    assert!(!q.store.resurrect("live").await.unwrap());

    assert_eq!(q.store.list(None).await.unwrap().len(), 1);
    assert_eq!(q.store.list_dead().await.unwrap().len(), 1);
}

#[tokio::test]
async fn claim_takes_oldest_pending_and_counts_the_attempt() {
    let q = setup_queue().await;
    enqueue(&q.store, "first", "true").await;
    enqueue(&q.store, "second", "true").await;

    let claimed = q.store.claim_next_pending().await.unwrap().unwrap();
    assert_eq!(claimed.id, "first");
    assert_eq!(claimed.state, JobState::Processing);
    assert_eq!(claimed.attempts, 1);

    let next = q.store.claim_next_pending().await.unwrap().unwrap();
    assert_eq!(next.id, "second");

    assert!(q.store.claim_next_pending().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_never_share_a_job() {
    let q = setup_queue().await;
    for i in 0..20 {
        enqueue(&q.store, &format!("job-{i}"), "true").await;
    }

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let store = q.store.clone();
        tasks.spawn(async move {
            let mut mine = Vec::new();
            while let Some(job) = store.claim_next_pending().await.unwrap() {
                mine.push(job.id);
            }
            mine
        });
    }

    let mut all = Vec::new();
    while let Some(res) = tasks.join_next().await {
        all.extend(res.unwrap());
    }
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 20);
}

#[tokio::test]
async fn reclaim_only_takes_failed_jobs() {
    let q = setup_queue().await;
    enqueue(&q.store, "j1", "false").await;
    let claimed = q.store.claim_next_pending().await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 1);

    // still processing, not eligible
    assert!(q.store.reclaim_for_retry("j1").await.unwrap().is_none());

    q.store.set_state("j1", JobState::Failed).await.unwrap();
    let retried = q.store.reclaim_for_retry("j1").await.unwrap().unwrap();
    assert_eq!(retried.state, JobState::Processing);
    assert_eq!(retried.attempts, 2);
}

#[tokio::test]
async fn recover_interrupted_resets_in_flight_jobs() {
    let q = setup_queue().await;
    for id in ["p", "f", "c", "w"] {
        enqueue(&q.store, id, "true").await;
    }
    q.store.set_state("p", JobState::Processing).await.unwrap();
    q.store.set_state("f", JobState::Failed).await.unwrap();
    q.store.set_state("c", JobState::Completed).await.unwrap();

    assert_eq!(q.store.recover_interrupted().await.unwrap(), 2);

    let summary = q.store.summary().await.unwrap();
    assert_eq!(summary.get(&JobState::Pending), Some(&3));
    assert_eq!(summary.get(&JobState::Completed), Some(&1));
}

#[tokio::test]
async fn state_survives_reopening_the_store() {
    let q = setup_queue().await;
    enqueue(&q.store, "keep", "true").await;
    enqueue(&q.store, "dead", "false").await;
    q.store.move_to_dead("dead").await.unwrap();

    let reopened = JobStore::open(q.dir.path()).await.unwrap();
    assert_eq!(reopened.get("keep").await.unwrap().unwrap().id, "keep");
    assert_eq!(reopened.list_dead().await.unwrap()[0].id, "dead");
}

#[tokio::test]
async fn missing_or_blank_files_read_as_empty() {
    let q = setup_queue().await;
    assert!(q.store.list(None).await.unwrap().is_empty());
    assert!(q.store.list_dead().await.unwrap().is_empty());

    std::fs::write(q.dir.path().join(JOBS_FILE), "  \n").unwrap();
    assert!(q.store.list(None).await.unwrap().is_empty());
    assert!(q.store.summary().await.unwrap().is_empty());
}

#[tokio::test]
async fn corrupt_file_is_an_error_and_is_not_overwritten() {
    let q = setup_queue().await;
    let path = q.dir.path().join(JOBS_FILE);
    std::fs::write(&path, "[{\"id\": ").unwrap();

    let err = q.store.list(None).await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));

    let err = q
        .store
        .enqueue(NewJob::new("j1", "true").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[{\"id\": ");
}

#[tokio::test]
async fn reads_legacy_timestamps_and_keeps_unknown_fields() {
    let q = setup_queue().await;
    std::fs::write(
        q.dir.path().join(JOBS_FILE),
        r#"[{
            "id": "old",
            "command": "echo legacy",
            "state": "pending",
            "attempts": 0,
            "created_at": "2024-03-01T10:20:30.123456",
            "updated_at": "2024-03-01T10:20:30.123456",
            "owner": "ops"
        }]"#,
    )
    .unwrap();

    let job = q.store.get("old").await.unwrap().unwrap();
    assert_eq!(job.created_at.to_rfc3339(), "2024-03-01T10:20:30.123456+00:00");
    assert_eq!(job.extra.get("owner").unwrap(), "ops");

    // rewriting the file keeps the extra field
    q.store.set_state("old", JobState::Failed).await.unwrap();
    let raw = std::fs::read_to_string(q.dir.path().join(JOBS_FILE)).unwrap();
    assert!(raw.contains("\"owner\": \"ops\""));
    assert!(raw.contains("\"failed\""));
}

#[tokio::test]
async fn job_in_both_files_keeps_the_newer_copy() {
    let q = setup_queue().await;
    let job = r#"{"id":"twin","command":"false","state":"%STATE%","attempts":2,
        "created_at":"2024-01-01T00:00:00Z","updated_at":"%AT%"}"#;
    let live = job
        .replace("%STATE%", "processing")
        .replace("%AT%", "2024-01-01T00:00:01Z");
    let dead = job
        .replace("%STATE%", "dead")
        .replace("%AT%", "2024-01-01T00:00:05Z");
    std::fs::write(q.dir.path().join(JOBS_FILE), format!("[{live}]")).unwrap();
    std::fs::write(q.dir.path().join(DLQ_FILE), format!("[{dead}]")).unwrap();

    assert!(q.store.get("twin").await.unwrap().is_none());
    assert_eq!(q.store.list_dead().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_handles_on_one_directory_lose_nothing() {
    let q = setup_queue().await;
    for i in 0..50 {
        enqueue(&q.store, &format!("a-{i}"), "true").await;
    }

    // a second process (the CLI) opening the same data directory
    let other = JobStore::open(q.dir.path()).await.unwrap();

    let claimer = {
        let store = q.store.clone();
        tokio::spawn(async move {
            let mut done = 0;
            while done < 100 {
                match store.claim_next_pending().await.unwrap() {
                    Some(job) => {
                        assert!(store.set_state(&job.id, JobState::Completed).await.unwrap());
                        done += 1;
                    }
                    None => tokio::task::yield_now().await,
                }
            }
        })
    };
    let producer = tokio::spawn(async move {
        for i in 0..50 {
            let new = NewJob::new(format!("b-{i}"), "true").unwrap();
            other.enqueue(new).await.unwrap();
        }
    });

    tokio::time::timeout(std::time::Duration::from_secs(60), async {
        producer.await.unwrap();
        claimer.await.unwrap();
    })
    .await
    .expect("handles deadlocked");

    let jobs = q.store.list(None).await.unwrap();
    assert_eq!(jobs.len(), 100);
    assert!(jobs.iter().all(|j| j.state == JobState::Completed && j.attempts == 1));
    for prefix in ["a", "b"] {
        for i in 0..50 {
            let id = format!("{prefix}-{i}");
            assert!(jobs.iter().any(|j| j.id == id), "{id} lost");
        }
    }

    // no temp files left behind next to the collections
    let leftovers: Vec<_> = std::fs::read_dir(q.dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}
