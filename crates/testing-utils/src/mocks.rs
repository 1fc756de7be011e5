//! In-memory doubles for the repository, queue, scheduler and post-processing ports

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use retry_domain::{
    DispatchMessage, DispatchQueue, ExecutionId, ExecutionRecord, ExecutionRepository,
    IntegrationPolicy, PolicyRepository,
};
use retry_errors::{RetryError, RetryResult};
use retry_worker::{
    AuditLog, JobInfo, OutcomeRecorder, RecordOutcome, WorkerCompletion, WorkerJob,
    WorkerScheduler,
};

/// Mock implementation of ExecutionRepository for testing
#[derive(Debug, Clone)]
pub struct MockExecutionRepository {
    records: Arc<Mutex<BTreeMap<ExecutionId, ExecutionRecord>>>,
    next_id: Arc<Mutex<ExecutionId>>,
    fail_loads: Arc<AtomicBool>,
}

impl MockExecutionRepository {
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    pub fn with_records(records: Vec<ExecutionRecord>) -> Self {
        let max_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        Self {
            records: Arc::new(Mutex::new(records.into_iter().map(|r| (r.id, r)).collect())),
            next_id: Arc::new(Mutex::new(max_id + 1)),
            fail_loads: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make `get_by_ids` fail with a database error
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, id: ExecutionId) -> Option<ExecutionRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn get_all(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn children_of(&self, parent_id: ExecutionId) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.retry_from == Some(parent_id))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl Default for MockExecutionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionRepository for MockExecutionRepository {
    async fn create(&self, record: &ExecutionRecord) -> RetryResult<ExecutionRecord> {
        let mut records = self.records.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut created = record.clone();
        if created.id == 0 {
            created.id = *next_id;
        }
        *next_id = (*next_id).max(created.id + 1);

        records.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: ExecutionId) -> RetryResult<Option<ExecutionRecord>> {
        Ok(self.get(id))
    }

    async fn get_by_ids(&self, ids: &[ExecutionId]) -> RetryResult<Vec<ExecutionRecord>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(RetryError::database_error("simulated load failure"));
        }
        let records = self.records.lock().unwrap();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn update(&self, record: &ExecutionRecord) -> RetryResult<()> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(RetryError::ExecutionNotFound { id: record.id }),
        }
    }

    async fn find_retry_candidates(
        &self,
        policy: &IntegrationPolicy,
        now: DateTime<Utc>,
    ) -> RetryResult<Vec<ExecutionId>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.is_retry_candidate(policy, now))
            .map(|r| r.id)
            .collect())
    }
}

/// Mock implementation of PolicyRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockPolicyRepository {
    policies: Arc<Mutex<BTreeMap<i64, IntegrationPolicy>>>,
    fail_lookups: Arc<AtomicBool>,
}

impl MockPolicyRepository {
    pub fn new(policies: Vec<IntegrationPolicy>) -> Self {
        Self {
            policies: Arc::new(Mutex::new(policies.into_iter().map(|p| (p.id, p)).collect())),
            fail_lookups: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make `get_by_id` fail with a database error
    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn upsert(&self, policy: IntegrationPolicy) {
        self.policies.lock().unwrap().insert(policy.id, policy);
    }
}

#[async_trait]
impl PolicyRepository for MockPolicyRepository {
    async fn get_by_id(&self, id: i64) -> RetryResult<Option<IntegrationPolicy>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(RetryError::database_error("simulated policy lookup failure"));
        }
        Ok(self.policies.lock().unwrap().get(&id).cloned())
    }

    async fn get_enabled(&self) -> RetryResult<Vec<IntegrationPolicy>> {
        Ok(self
            .policies
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect())
    }
}

/// Dispatch queue that keeps every published message
///
/// Unlike a real queue, `receive_batch` never waits: an empty queue reports `QueueClosed`.
#[derive(Debug, Default)]
pub struct RecordingDispatchQueue {
    queued: Mutex<VecDeque<DispatchMessage>>,
    published: Mutex<Vec<DispatchMessage>>,
    fail_publishes: AtomicBool,
    publish_limit: Mutex<Option<usize>>,
}

impl RecordingDispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Accept `count` more publishes, then fail every later one
    pub fn fail_after(&self, count: usize) {
        let accepted = self.published.lock().unwrap().len();
        *self.publish_limit.lock().unwrap() = Some(accepted + count);
    }

    /// Every message ever published, in publish order
    pub fn published(&self) -> Vec<DispatchMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Concatenation of every published message's ids, in publish order
    pub fn published_ids(&self) -> Vec<ExecutionId> {
        self.published()
            .iter()
            .flat_map(|m| m.parse_ids().ids)
            .collect()
    }

    pub fn clear(&self) {
        self.queued.lock().unwrap().clear();
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl DispatchQueue for RecordingDispatchQueue {
    async fn publish(&self, message: DispatchMessage) -> RetryResult<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(RetryError::transport("simulated publish failure"));
        }
        let mut published = self.published.lock().unwrap();
        if let Some(limit) = *self.publish_limit.lock().unwrap() {
            if published.len() >= limit {
                return Err(RetryError::transport("simulated publish failure"));
            }
        }
        published.push(message.clone());
        drop(published);
        self.queued.lock().unwrap().push_back(message);
        Ok(())
    }

    async fn receive_batch(&self, max: usize) -> RetryResult<Vec<DispatchMessage>> {
        let mut queued = self.queued.lock().unwrap();
        if queued.is_empty() {
            return Err(RetryError::QueueClosed);
        }
        let take = max.max(1).min(queued.len());
        Ok(queued.drain(..take).collect())
    }

    fn pending(&self) -> usize {
        self.queued.lock().unwrap().len()
    }
}

/// Worker scheduler that holds scheduled jobs (and their budget slots) until released
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<WorkerJob>>,
    reject: AtomicBool,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler whose `schedule` always fails
    pub fn rejecting() -> Self {
        let scheduler = Self::default();
        scheduler.reject.store(true, Ordering::SeqCst);
        scheduler
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scheduled_parent_ids(&self) -> Vec<ExecutionId> {
        self.jobs.lock().unwrap().iter().map(|j| j.parent.id).collect()
    }

    /// Parent records exactly as the dispatcher handed them over
    pub fn scheduled_parents(&self) -> Vec<ExecutionRecord> {
        self.jobs.lock().unwrap().iter().map(|j| j.parent.clone()).collect()
    }

    pub fn scheduled_children(&self) -> Vec<ExecutionRecord> {
        self.jobs.lock().unwrap().iter().map(|j| j.child.clone()).collect()
    }

    /// Drop every held job, releasing their budget slots
    pub fn release_all(&self) -> usize {
        let mut jobs = self.jobs.lock().unwrap();
        let count = jobs.len();
        jobs.clear();
        count
    }
}

#[async_trait]
impl WorkerScheduler for RecordingScheduler {
    async fn schedule(&self, job: WorkerJob) -> RetryResult<Uuid> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(RetryError::Scheduling("simulated scheduling failure".to_string()));
        }
        let id = job.id;
        self.jobs.lock().unwrap().push(job);
        Ok(id)
    }
}

/// Outcome recorder that keeps every completion
#[derive(Debug, Default)]
pub struct RecordingOutcomeRecorder {
    completions: Mutex<Vec<WorkerCompletion>>,
}

impl RecordingOutcomeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completions(&self) -> Vec<WorkerCompletion> {
        self.completions.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutcomeRecorder for RecordingOutcomeRecorder {
    async fn record(&self, completion: &WorkerCompletion) -> RetryResult<()> {
        self.completions.lock().unwrap().push(completion.clone());
        Ok(())
    }
}

/// Audit log that keeps every event
#[derive(Debug, Default)]
pub struct RecordingAuditLog {
    outcomes: Mutex<Vec<(JobInfo, RecordOutcome)>>,
    failures: Mutex<Vec<(JobInfo, String)>>,
}

impl RecordingAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<(JobInfo, RecordOutcome)> {
        self.outcomes.lock().unwrap().clone()
    }

    /// Worker-level failures as `(job, error kind)`
    pub fn failures(&self) -> Vec<(JobInfo, String)> {
        self.failures.lock().unwrap().clone()
    }

    pub fn outcome_count_by_parent(&self) -> HashMap<ExecutionId, usize> {
        let mut counts = HashMap::new();
        for (job, _) in self.outcomes.lock().unwrap().iter() {
            *counts.entry(job.parent_id).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl AuditLog for RecordingAuditLog {
    async fn record_outcome(&self, job: &JobInfo, outcome: &RecordOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .push((job.clone(), outcome.clone()));
    }

    async fn worker_failed(&self, job: &JobInfo, error: &RetryError) {
        self.failures
            .lock()
            .unwrap()
            .push((job.clone(), error.kind().to_string()));
    }
}
