use std::sync::Arc;

use retry_domain::{
    DispatchMessage, ExecutionId, ExecutionStatus, MessageChunker, MessageOrigin,
};
use retry_testing_utils::{
    failed_records, register_fresh_only, register_scripted, ExecutionRecordBuilder,
    MockExecutionRepository, MockPolicyRepository, PolicyBuilder, RecordingDispatchQueue,
    RecordingScheduler, Script, ScriptedStats,
};
use retry_worker::HandlerRegistry;

use retry_dispatcher::{DispatchBudget, HaltReason, OverflowRepublisher, RetryDispatcher};

struct Harness {
    executions: Arc<MockExecutionRepository>,
    policies: Arc<MockPolicyRepository>,
    queue: Arc<RecordingDispatchQueue>,
    scheduler: Arc<RecordingScheduler>,
    budget: DispatchBudget,
    stats: Arc<ScriptedStats>,
    dispatcher: RetryDispatcher,
}

fn harness(records: Vec<retry_domain::ExecutionRecord>, budget: usize, max_ids: usize) -> Harness {
    harness_with(records, budget, max_ids, Arc::new(RecordingScheduler::new()))
}

fn harness_with(
    records: Vec<retry_domain::ExecutionRecord>,
    budget: usize,
    max_ids: usize,
    scheduler: Arc<RecordingScheduler>,
) -> Harness {
    let executions = Arc::new(MockExecutionRepository::with_records(records));
    let policies = Arc::new(MockPolicyRepository::new(vec![
        PolicyBuilder::new().with_id(1).with_handler("scripted").build(),
        PolicyBuilder::new().with_id(2).with_handler("fresh_only").build(),
        PolicyBuilder::new().with_id(3).with_handler("missing").build(),
        PolicyBuilder::new().with_id(4).with_handler("scripted").disabled().build(),
    ]));

    let mut registry = HandlerRegistry::new();
    let stats = register_scripted(&mut registry, "scripted", Script::Succeed);
    register_fresh_only(&mut registry, "fresh_only");

    let queue = Arc::new(RecordingDispatchQueue::new());
    let budget = DispatchBudget::new(budget);
    let chunker = MessageChunker::new(max_ids, 10_000).unwrap();

    let dispatcher = RetryDispatcher::new(
        executions.clone(),
        policies.clone(),
        Arc::new(registry),
        budget.clone(),
        scheduler.clone(),
        OverflowRepublisher::new(chunker, queue.clone()),
    );

    Harness {
        executions,
        policies,
        queue,
        scheduler,
        budget,
        stats,
        dispatcher,
    }
}

fn message(ids: &[ExecutionId]) -> DispatchMessage {
    DispatchMessage::new(MessageOrigin::Selection, ids)
}

#[tokio::test]
async fn test_fifty_candidates_with_budget_of_ten() {
    let ids: Vec<ExecutionId> = (1..=50).collect();
    let h = harness(failed_records(ids.clone(), 1), 10, 15);

    let report = h.dispatcher.dispatch(&message(&ids)).await.unwrap();

    assert_eq!(report.budget_snapshot, 10);
    assert_eq!(report.scheduled, ids[..10].to_vec());
    assert_eq!(h.scheduler.scheduled_parent_ids(), ids[..10].to_vec());
    assert_eq!(report.halt, HaltReason::BudgetExhausted);
    assert_eq!(report.halted_at, Some(10));
    assert_eq!(report.overflow, ids[10..].to_vec());

    // 40个溢出ID，每条消息最多15个
    assert_eq!(report.republished_messages, 3);
    let published = h.queue.published();
    assert_eq!(published.len(), 3);
    assert!(published.iter().all(|m| m.origin == MessageOrigin::Overflow));
    assert!(published.iter().all(|m| m.parse_ids().ids.len() <= 15));
    assert_eq!(h.queue.published_ids(), ids[10..].to_vec());

    // 所有名额都被已调度的Worker持有
    assert_eq!(h.budget.available(), 0);
    h.scheduler.release_all();
    assert_eq!(h.budget.available(), 10);
}

#[tokio::test]
async fn test_overflow_resumes_after_slots_released() {
    let ids: Vec<ExecutionId> = (1..=25).collect();
    let h = harness(failed_records(ids.clone(), 1), 10, 100);

    h.dispatcher.dispatch(&message(&ids)).await.unwrap();
    h.scheduler.release_all();

    let overflow = h.queue.published();
    assert_eq!(overflow.len(), 1);
    h.queue.clear();

    let second = h.dispatcher.dispatch(&overflow[0]).await.unwrap();
    assert_eq!(second.scheduled, ids[10..20].to_vec());
    assert_eq!(second.overflow, ids[20..].to_vec());
    h.scheduler.release_all();

    let third = h.dispatcher.dispatch(&h.queue.published()[0]).await.unwrap();
    assert_eq!(third.scheduled, ids[20..].to_vec());
    assert_eq!(third.halt, HaltReason::Completed);
    assert!(third.overflow.is_empty());
}

#[tokio::test]
async fn test_malformed_id_dropped_valid_ids_dispatched() {
    let h = harness(failed_records([11, 12], 1), 10, 100);
    let msg = DispatchMessage::from_payload(MessageOrigin::Selection, "11,not-an-id,12");

    let report = h.dispatcher.dispatch(&msg).await.unwrap();

    assert_eq!(report.scheduled, vec![11, 12]);
    assert_eq!(report.malformed, vec!["not-an-id"]);
    assert!(report.abandoned.is_empty());
    assert_eq!(report.halt, HaltReason::Completed);
}

#[tokio::test]
async fn test_incompatible_handler_abandons_single_candidate() {
    let records = vec![
        ExecutionRecordBuilder::new().with_id(1).with_policy_id(1).build(),
        ExecutionRecordBuilder::new().with_id(2).with_policy_id(2).build(),
        ExecutionRecordBuilder::new().with_id(3).with_policy_id(1).build(),
    ];
    let h = harness(records, 10, 100);

    let report = h.dispatcher.dispatch(&message(&[1, 2, 3])).await.unwrap();

    assert_eq!(report.scheduled, vec![1, 3]);
    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.abandoned[0].id, 2);
    assert_eq!(report.abandoned[0].kind, "handler_not_compatible");
    assert!(report.overflow.is_empty());
    assert!(h.queue.published().is_empty());
    // 放弃的候选释放了名额
    assert_eq!(h.budget.available(), 8);
}

#[tokio::test]
async fn test_unknown_handler_and_policy_problems_are_abandoned() {
    let records = vec![
        ExecutionRecordBuilder::new().with_id(1).with_policy_id(3).build(),
        ExecutionRecordBuilder::new().with_id(2).with_policy_id(4).build(),
        ExecutionRecordBuilder::new().with_id(3).with_policy_id(99).build(),
        ExecutionRecordBuilder::new().with_id(4).with_policy_id(1).build(),
    ];
    let h = harness(records, 10, 100);

    let report = h.dispatcher.dispatch(&message(&[1, 2, 3, 4])).await.unwrap();

    let kinds: Vec<&str> = report.abandoned.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec!["handler_not_found", "policy_disabled", "policy_not_found"]);
    assert_eq!(report.scheduled, vec![4]);
    assert_eq!(report.halt, HaltReason::Completed);
    assert!(report.halt_error.is_none());
}

#[tokio::test]
async fn test_abandoned_increment_is_never_persisted() {
    let records = vec![ExecutionRecordBuilder::new().with_id(5).with_policy_id(3).build()];
    let h = harness(records, 10, 100);

    h.dispatcher.dispatch(&message(&[5])).await.unwrap();
    assert_eq!(h.executions.get(5).unwrap().retries_attempted, 0);
}

#[tokio::test]
async fn test_records_without_retry_ids_or_missing_are_skipped() {
    let records = vec![
        ExecutionRecordBuilder::new().with_id(1).without_retry_ids().build(),
        ExecutionRecordBuilder::new().with_id(2).with_retry_ids(&[" ", ""]).build(),
        ExecutionRecordBuilder::new().with_id(3).build(),
    ];
    let h = harness(records, 10, 100);

    let report = h.dispatcher.dispatch(&message(&[1, 2, 3, 404])).await.unwrap();

    assert_eq!(report.scheduled, vec![3]);
    assert_eq!(report.skipped, vec![1, 2, 404]);
    assert!(report.abandoned.is_empty());
}

#[tokio::test]
async fn test_dispatch_hands_worker_incremented_parent_and_linked_child() {
    let records = vec![ExecutionRecordBuilder::new()
        .with_id(7)
        .with_retries_attempted(1)
        .with_retry_ids(&["a", "b", "a"])
        .build()];
    let h = harness(records, 10, 100);

    h.dispatcher.dispatch(&message(&[7])).await.unwrap();

    let parent = &h.scheduler.scheduled_parents()[0];
    assert_eq!(parent.retries_attempted, 2);
    let child = &h.scheduler.scheduled_children()[0];
    assert_eq!(child.retry_from, Some(7));
    assert_eq!(child.policy_id, 1);
    assert_eq!(child.retry_ids, vec!["a", "b"]);
    assert_eq!(h.stats.retry_parents(), vec![7]);
    assert_eq!(h.stats.fresh_inits(), 0);

    // 派发阶段不写仓储
    let stored = h.executions.get(7).unwrap();
    assert_eq!(stored.retries_attempted, 1);
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert_eq!(h.executions.count(), 1);
}

#[tokio::test]
async fn test_budget_snapshot_bounds_scheduling() {
    let ids: Vec<ExecutionId> = (1..=8).collect();
    let h = harness(failed_records(ids.clone(), 1), 5, 100);

    // 其他派发活动已占用两个名额
    let _held_a = h.budget.try_acquire().unwrap();
    let _held_b = h.budget.try_acquire().unwrap();

    let report = h.dispatcher.dispatch(&message(&ids)).await.unwrap();
    assert_eq!(report.budget_snapshot, 3);
    assert_eq!(report.scheduled.len(), 3);
    assert!(report.scheduled.len() <= report.budget_snapshot);
    assert_eq!(report.overflow, ids[3..].to_vec());
}

#[tokio::test]
async fn test_exhausted_budget_overflows_everything() {
    let ids: Vec<ExecutionId> = (1..=4).collect();
    let h = harness(failed_records(ids.clone(), 1), 0, 100);

    let report = h.dispatcher.dispatch(&message(&ids)).await.unwrap();
    assert!(report.scheduled.is_empty());
    assert_eq!(report.halted_at, Some(0));
    assert_eq!(report.overflow, ids);
    assert!(report.fully_overflowed());
}

#[tokio::test]
async fn test_overflow_completeness_for_every_halt_point() {
    let ids: Vec<ExecutionId> = vec![42, 7, 19, 3, 88, 21, 5];
    for budget in 0..=ids.len() {
        let h = harness(failed_records(ids.clone(), 1), budget, 2);
        let report = h.dispatcher.dispatch(&message(&ids)).await.unwrap();

        assert_eq!(report.scheduled, ids[..budget].to_vec());
        assert_eq!(report.overflow, ids[budget..].to_vec());
        assert_eq!(h.queue.published_ids(), ids[budget..].to_vec());
        let expected_messages = (ids.len() - budget).div_ceil(2);
        assert_eq!(h.queue.published().len(), expected_messages);
    }
}

#[tokio::test]
async fn test_batch_unions_ids_across_messages() {
    let h = harness(failed_records(1..=5, 1), 10, 100);
    let batch = vec![message(&[3, 1, 2]), message(&[2, 4]), message(&[1, 5])];

    let report = h.dispatcher.dispatch_batch(&batch).await.unwrap();
    assert_eq!(report.scheduled, vec![3, 1, 2, 4, 5]);
    assert_eq!(h.scheduler.len(), 5);
}

#[tokio::test]
async fn test_scheduling_failure_abandons_and_releases_slot() {
    let h = harness_with(
        failed_records([1, 2], 1),
        2,
        100,
        Arc::new(RecordingScheduler::rejecting()),
    );

    let report = h.dispatcher.dispatch(&message(&[1, 2])).await.unwrap();
    assert!(report.scheduled.is_empty());
    assert_eq!(report.abandoned.len(), 2);
    assert!(report.abandoned.iter().all(|a| a.kind == "scheduling"));
    assert_eq!(h.budget.available(), 2);
    assert!(report.overflow.is_empty());
}

#[tokio::test]
async fn test_republish_failure_is_reported() {
    let h = harness(failed_records(1..=3, 1), 1, 100);
    h.queue.fail_publishes(true);

    let report = h.dispatcher.dispatch(&message(&[1, 2, 3])).await.unwrap();
    assert_eq!(report.scheduled, vec![1]);
    assert_eq!(report.overflow, vec![2, 3]);
    assert_eq!(report.republished_messages, 0);
    assert_eq!(report.republished_ids, 0);
    assert!(report.republish_error.is_some());
}

#[tokio::test]
async fn test_partial_republish_reports_published_prefix() {
    let ids: Vec<ExecutionId> = (1..=7).collect();
    let h = harness(failed_records(ids.clone(), 1), 1, 2);
    h.queue.fail_after(1);

    let report = h.dispatcher.dispatch(&message(&ids)).await.unwrap();
    assert_eq!(report.scheduled, vec![1]);
    assert_eq!(report.overflow, ids[1..].to_vec());

    // 第一条消息已入队，第二条失败后停止
    assert_eq!(report.republished_messages, 1);
    assert_eq!(report.republished_ids, 2);
    assert!(report.republish_error.is_some());
    assert_eq!(h.queue.published_ids(), vec![2, 3]);
}

#[tokio::test]
async fn test_policy_lookup_failure_interrupts_and_requeues_remainder() {
    let h = harness(failed_records(1..=3, 1), 5, 100);
    h.policies.fail_lookups(true);

    let report = h.dispatcher.dispatch(&message(&[1, 2, 3])).await.unwrap();
    assert!(report.scheduled.is_empty());
    assert!(report.abandoned.is_empty());
    assert_eq!(report.halt, HaltReason::Interrupted);
    assert_eq!(report.halted_at, Some(0));
    assert!(report.halt_error.is_some());
    assert_eq!(report.overflow, vec![1, 2, 3]);
    assert_eq!(h.queue.published_ids(), vec![1, 2, 3]);
    assert_eq!(h.budget.available(), 5);
    assert!(h.scheduler.is_empty());
}

#[tokio::test]
async fn test_load_failure_propagates() {
    let h = harness(failed_records(1..=3, 1), 5, 100);
    h.executions.fail_loads(true);

    assert!(h.dispatcher.dispatch(&message(&[1, 2, 3])).await.is_err());
    assert!(h.scheduler.is_empty());
    assert_eq!(h.budget.available(), 5);
}
