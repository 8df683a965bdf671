//! End-to-end submission tests against the in-memory store and broker.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use job_submit::submission::{
    ConnectionTarget, IdentifierAllocator, JobDescriptor, JobDescriptorBuilder, JobId,
    JobNamespace, JobPayload, MemoryBroker, MemoryStore, OrchestratorConfig, StoreConnector,
    SubmissionOrchestrator, DEFAULT_PRIORITY,
};
use job_submit::Stage;

fn orchestrator(store: &MemoryStore, broker: &MemoryBroker) -> SubmissionOrchestrator {
    SubmissionOrchestrator::new(
        OrchestratorConfig {
            store: ConnectionTarget::new("127.0.0.1", 6379),
            broker: ConnectionTarget::new("127.0.0.1", 11300),
            connect_timeout: None,
        },
        Arc::new(store.clone()),
        Arc::new(broker.clone()),
    )
}

fn priority_job() -> JobDescriptor {
    JobDescriptorBuilder::new("svc1", "work")
        .with_ttr(10)
        .with_validity(20)
        .with_extra_field("priority", "5")
        .build()
        .expect("valid descriptor")
}

#[tokio::test]
async fn test_submission_writes_status_and_message() {
    let store = MemoryStore::new();
    let broker = MemoryBroker::new();

    let report = orchestrator(&store, &broker)
        .submit(&priority_job())
        .await
        .expect("submission should succeed");

    let status_key = format!("svc1:jobs:work:{}", report.job_id);
    assert_eq!(report.status_key, status_key);
    assert_eq!(
        store.field(&status_key, "status").as_deref(),
        Some("{\"status\":\"queued\"}")
    );
    assert_eq!(store.ttl(&status_key), Some(20));

    let messages = broker.messages("work");
    assert_eq!(messages.len(), 1, "exactly one message expected");
    let job = &messages[0].job;
    assert_eq!(job.id, report.job_id.to_string());
    assert_eq!(job.ttr, 10);
    assert_eq!(job.validity, 20);
    assert_eq!(job.delay, 0);
    assert_eq!(job.priority, DEFAULT_PRIORITY);

    let mut expected = BTreeMap::new();
    expected.insert("priority".to_string(), "5".to_string());
    assert_eq!(job.payload, JobPayload::Fields(expected));
    assert_eq!(messages[0].broker_job_id, report.broker_job_id);
}

#[tokio::test]
async fn test_default_validity_sets_7200_second_expiry() {
    let store = MemoryStore::new();
    let broker = MemoryBroker::new();
    let descriptor = JobDescriptorBuilder::new("svc1", "work")
        .build()
        .expect("valid descriptor");

    let report = orchestrator(&store, &broker)
        .submit(&descriptor)
        .await
        .expect("submission should succeed");

    assert_eq!(store.ttl(&report.status_key), Some(7200));
    assert_eq!(broker.messages("work")[0].job.ttr, 3600);
}

#[tokio::test]
async fn test_broker_failure_keeps_status_record() {
    let store = MemoryStore::new();
    let broker = MemoryBroker::new();
    broker.refuse_connections();

    let err = orchestrator(&store, &broker)
        .submit(&priority_job())
        .await
        .expect_err("enqueue should fail");

    assert_eq!(err.stage, Stage::Enqueue);
    assert_eq!(err.job_id, Some(JobId::new(1)));
    assert!(err.source.is_connectivity());

    // The status record stays behind and will expire on its own.
    assert_eq!(store.hash_keys(), vec!["svc1:jobs:work:1".to_string()]);
    assert_eq!(store.ttl("svc1:jobs:work:1"), Some(20));
    assert!(broker.messages("work").is_empty());
}

#[tokio::test]
async fn test_rejected_push_is_protocol_failure() {
    let store = MemoryStore::new();
    let broker = MemoryBroker::new();
    broker.reject_pushes();

    let err = orchestrator(&store, &broker)
        .submit(&priority_job())
        .await
        .expect_err("enqueue should fail");

    assert_eq!(err.stage, Stage::Enqueue);
    assert!(err.source.is_protocol());
    assert_eq!(broker.disconnects(), 1);
}

#[tokio::test]
async fn test_status_failure_does_not_enqueue() {
    let store = MemoryStore::new();
    store.fail_on("HSET");
    let broker = MemoryBroker::new();

    let err = orchestrator(&store, &broker)
        .submit(&priority_job())
        .await
        .expect_err("status should fail");

    assert_eq!(err.stage, Stage::Status);
    assert_eq!(store.counter("svc1:jobs:sequential_id"), Some(1));
    assert!(store.hash_keys().is_empty());
    assert_eq!(broker.connections_opened(), 0);
}

#[tokio::test]
async fn test_repeated_submissions_are_independent() {
    let store = MemoryStore::new();
    let broker = MemoryBroker::new();
    let orchestrator = orchestrator(&store, &broker);
    let descriptor = priority_job();

    let first = orchestrator.submit(&descriptor).await.expect("first submission");
    let second = orchestrator.submit(&descriptor).await.expect("second submission");

    assert_ne!(first.job_id, second.job_id);
    assert!(second.job_id > first.job_id);
    assert_eq!(store.hash_keys().len(), 2);
    assert_eq!(broker.messages("work").len(), 2);
    assert_eq!(store.connections_opened(), 2);
    assert_eq!(store.disconnects(), 2);
}

#[tokio::test]
async fn test_json_payload_is_enqueued() {
    let store = MemoryStore::new();
    let broker = MemoryBroker::new();
    let descriptor = JobDescriptorBuilder::new("svc1", "work")
        .with_payload_json(r#"{"task":"resize","sizes":[1,2]}"#)
        .build()
        .expect("valid descriptor");

    orchestrator(&store, &broker)
        .submit(&descriptor)
        .await
        .expect("submission should succeed");

    let messages = broker.messages("work");
    assert_eq!(
        messages[0].job.payload,
        JobPayload::from_json(r#"{"task":"resize","sizes":[1,2]}"#).unwrap()
    );
}

#[tokio::test]
async fn test_concurrent_allocations_are_distinct() {
    const SUBMISSIONS: i64 = 50;

    let store = MemoryStore::new();
    store.set_raw("svc1:jobs:sequential_id", "100");
    let namespace = JobNamespace::new("svc1", "work").expect("valid namespace");
    let target = ConnectionTarget::new("127.0.0.1", 6379);

    let mut handles = Vec::new();
    for _ in 0..SUBMISSIONS {
        let store = store.clone();
        let namespace = namespace.clone();
        let target = target.clone();
        handles.push(tokio::spawn(async move {
            let mut conn = store.connect(&target).await.expect("connect");
            let id = IdentifierAllocator::new(conn.as_mut())
                .allocate(&namespace)
                .await
                .expect("allocate");
            conn.disconnect().await.expect("disconnect");
            id
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.expect("task should not panic"));
    }

    assert_eq!(ids.len() as i64, SUBMISSIONS);
    let max = ids.iter().max().expect("ids not empty");
    assert_eq!(max.value(), 100 + SUBMISSIONS);
}
