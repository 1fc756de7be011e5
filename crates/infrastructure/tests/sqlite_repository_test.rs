use chrono::{Duration, Utc};

use retry_config::StorageConfig;
use retry_domain::{ExecutionKind, ExecutionRecord, ExecutionRepository, ExecutionStatus};
use retry_errors::RetryError;
use retry_infrastructure::{DatabaseManager, SqliteExecutionRepository};
use retry_testing_utils::{failed_records, ExecutionRecordBuilder, PolicyBuilder};

async fn repository() -> (DatabaseManager, SqliteExecutionRepository) {
    let manager = DatabaseManager::new(&StorageConfig::default()).await.unwrap();
    manager.migrate().await.unwrap();
    let repository = SqliteExecutionRepository::new(manager.pool().clone());
    (manager, repository)
}

#[tokio::test]
async fn test_create_assigns_id_and_round_trips_fields() {
    let (_db, repo) = repository().await;

    let record = ExecutionRecordBuilder::new()
        .with_id(0)
        .with_policy_id(5)
        .with_retry_ids(&["a", "b"])
        .with_retries_attempted(2)
        .with_last_status_code(503)
        .build();
    let created = repo.create(&record).await.unwrap();
    assert!(created.id > 0);

    let loaded = repo.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.policy_id, 5);
    assert_eq!(loaded.kind, ExecutionKind::Egress);
    assert_eq!(loaded.status, ExecutionStatus::Failed);
    assert_eq!(loaded.retry_ids, vec!["a", "b"]);
    assert_eq!(loaded.retries_attempted, 2);
    assert_eq!(loaded.last_status_code, Some(503));
    assert_eq!(
        loaded.created_at.timestamp_millis(),
        record.created_at.timestamp_millis()
    );

    assert!(repo.get_by_id(9_999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_child_record_keeps_parent_link() {
    let (_db, repo) = repository().await;
    let parent = repo
        .create(&ExecutionRecordBuilder::new().with_id(0).build())
        .await
        .unwrap();

    let mut in_memory = parent.clone();
    in_memory.record_attempt();
    let child = repo.create(&in_memory.spawn_retry_child()).await.unwrap();

    let loaded = repo.get_by_id(child.id).await.unwrap().unwrap();
    assert_eq!(loaded.kind, ExecutionKind::EgressChild);
    assert_eq!(loaded.retry_from, Some(parent.id));
    assert_ne!(child.id, parent.id);
}

#[tokio::test]
async fn test_get_by_ids_ignores_missing() {
    let (_db, repo) = repository().await;
    for record in failed_records(1..=5, 1) {
        repo.create(&record).await.unwrap();
    }

    let mut ids: Vec<_> = repo
        .get_by_ids(&[5, 42, 2, 4])
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 4, 5]);
    assert!(repo.get_by_ids(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_by_ids_spans_multiple_statements() {
    let (_db, repo) = repository().await;
    for record in failed_records(1..=1_200, 1) {
        repo.create(&record).await.unwrap();
    }

    let ids: Vec<i64> = (1..=1_200).collect();
    assert_eq!(repo.get_by_ids(&ids).await.unwrap().len(), 1_200);
}

#[tokio::test]
async fn test_update_persists_and_rejects_missing() {
    let (_db, repo) = repository().await;
    let mut record = repo
        .create(&ExecutionRecordBuilder::new().with_id(0).with_retry_ids(&["a", "b"]).build())
        .await
        .unwrap();

    record.retries_attempted = 1;
    record.retry_ids = vec!["b".to_string()];
    record.last_attempt_at = Some(Utc::now());
    repo.update(&record).await.unwrap();

    let loaded = repo.get_by_id(record.id).await.unwrap().unwrap();
    assert_eq!(loaded.retries_attempted, 1);
    assert_eq!(loaded.retry_ids, vec!["b"]);
    assert!(loaded.last_attempt_at.is_some());

    let mut missing = record.clone();
    missing.id = 777;
    assert!(matches!(
        repo.update(&missing).await,
        Err(RetryError::ExecutionNotFound { id: 777 })
    ));
}

#[tokio::test]
async fn test_find_retry_candidates_filters_like_domain_rule() {
    let (_db, repo) = repository().await;
    let now = Utc::now();
    let records: Vec<ExecutionRecord> = vec![
        ExecutionRecordBuilder::new().with_id(1).build(),
        ExecutionRecordBuilder::new().with_id(2).with_retries_attempted(3).build(),
        ExecutionRecordBuilder::new()
            .with_id(3)
            .with_last_attempt_at(now - Duration::minutes(1))
            .build(),
        ExecutionRecordBuilder::new().with_id(4).child_of(1).build(),
        ExecutionRecordBuilder::new()
            .with_id(5)
            .with_status(ExecutionStatus::Completed)
            .build(),
        ExecutionRecordBuilder::new().with_id(6).without_retry_ids().build(),
        ExecutionRecordBuilder::new().with_id(7).with_retry_ids(&["  "]).build(),
        ExecutionRecordBuilder::new().with_id(8).with_policy_id(2).build(),
        ExecutionRecordBuilder::new()
            .with_id(9)
            .with_last_attempt_at(now - Duration::hours(2))
            .build(),
    ];
    for record in &records {
        repo.create(record).await.unwrap();
    }

    let policy = PolicyBuilder::new().with_id(1).build();
    assert_eq!(repo.find_retry_candidates(&policy, now).await.unwrap(), vec![1, 9]);

    // 只读查询，重复执行结果相同
    assert_eq!(repo.find_retry_candidates(&policy, now).await.unwrap(), vec![1, 9]);
}

#[tokio::test]
async fn test_find_retry_candidates_honours_status_codes() {
    let (_db, repo) = repository().await;
    repo.create(&ExecutionRecordBuilder::new().with_id(1).with_last_status_code(429).build())
        .await
        .unwrap();
    repo.create(&ExecutionRecordBuilder::new().with_id(2).with_last_status_code(400).build())
        .await
        .unwrap();

    let policy = PolicyBuilder::new()
        .with_id(1)
        .with_retryable_status_codes(&[429, 503])
        .build();
    assert_eq!(
        repo.find_retry_candidates(&policy, Utc::now()).await.unwrap(),
        vec![1]
    );
}

#[tokio::test]
async fn test_find_retry_candidates_rejects_unrepresentable_interval() {
    let (_db, repo) = repository().await;
    repo.create(&ExecutionRecordBuilder::new().with_id(1).build())
        .await
        .unwrap();

    let policy = PolicyBuilder::new()
        .with_id(1)
        .with_retry_interval_minutes(200_000_000_000)
        .build();
    let err = repo
        .find_retry_candidates(&policy, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, RetryError::Configuration(_)));
}

#[tokio::test]
async fn test_file_database_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("retry.db").display()),
        ..StorageConfig::default()
    };

    {
        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        let repo = SqliteExecutionRepository::new(manager.pool().clone());
        repo.create(&ExecutionRecordBuilder::new().with_id(3).build())
            .await
            .unwrap();
        manager.close().await;
    }

    let manager = DatabaseManager::new(&config).await.unwrap();
    manager.migrate().await.unwrap();
    manager.health_check().await.unwrap();
    let repo = SqliteExecutionRepository::new(manager.pool().clone());
    assert!(repo.get_by_id(3).await.unwrap().is_some());
}
