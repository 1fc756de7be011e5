//! Test data builders for creating test entities

use chrono::{DateTime, Duration, Utc};
use retry_domain::{
    ExecutionId, ExecutionKind, ExecutionRecord, ExecutionStatus, IntegrationPolicy,
};

/// Builder for failed primary execution records that are eligible for retry by default
pub struct ExecutionRecordBuilder {
    record: ExecutionRecord,
}

impl ExecutionRecordBuilder {
    pub fn new() -> Self {
        let created_at = Utc::now() - Duration::days(1);
        Self {
            record: ExecutionRecord {
                id: 1,
                policy_id: 1,
                kind: ExecutionKind::Egress,
                status: ExecutionStatus::Failed,
                retry_ids: vec!["r1".to_string()],
                retries_attempted: 0,
                retry_from: None,
                last_status_code: None,
                last_attempt_at: None,
                created_at,
                updated_at: created_at,
            },
        }
    }

    pub fn with_id(mut self, id: ExecutionId) -> Self {
        self.record.id = id;
        self
    }

    pub fn with_policy_id(mut self, policy_id: i64) -> Self {
        self.record.policy_id = policy_id;
        self
    }

    pub fn with_kind(mut self, kind: ExecutionKind) -> Self {
        self.record.kind = kind;
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.record.status = status;
        self
    }

    pub fn with_retry_ids(mut self, retry_ids: &[&str]) -> Self {
        self.record.retry_ids = retry_ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn without_retry_ids(mut self) -> Self {
        self.record.retry_ids.clear();
        self
    }

    pub fn with_retries_attempted(mut self, retries: i32) -> Self {
        self.record.retries_attempted = retries;
        self
    }

    pub fn with_last_status_code(mut self, code: u16) -> Self {
        self.record.last_status_code = Some(code);
        self
    }

    pub fn with_last_attempt_at(mut self, at: DateTime<Utc>) -> Self {
        self.record.last_attempt_at = Some(at);
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.record.created_at = at;
        self.record.updated_at = at;
        self
    }

    pub fn child_of(mut self, parent_id: ExecutionId) -> Self {
        self.record.kind = ExecutionKind::EgressChild;
        self.record.retry_from = Some(parent_id);
        self
    }

    pub fn build(self) -> ExecutionRecord {
        self.record
    }
}

impl Default for ExecutionRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for integration policies
pub struct PolicyBuilder {
    policy: IntegrationPolicy,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self {
            policy: IntegrationPolicy {
                id: 1,
                name: "test_integration".to_string(),
                handler: "scripted".to_string(),
                max_retries: 3,
                retry_interval_minutes: 15,
                retryable_status_codes: vec![],
                enabled: true,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.policy.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.policy.name = name.to_string();
        self
    }

    pub fn with_handler(mut self, handler: &str) -> Self {
        self.policy.handler = handler.to_string();
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn with_retry_interval_minutes(mut self, minutes: i64) -> Self {
        self.policy.retry_interval_minutes = minutes;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: &[u16]) -> Self {
        self.policy.retryable_status_codes = codes.to_vec();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.policy.enabled = false;
        self
    }

    pub fn build(self) -> IntegrationPolicy {
        self.policy
    }
}

impl Default for PolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Eligible failed records for the given ids, each with one retry id derived from its id
pub fn failed_records<I>(ids: I, policy_id: i64) -> Vec<ExecutionRecord>
where
    I: IntoIterator<Item = ExecutionId>,
{
    ids.into_iter()
        .map(|id| {
            ExecutionRecordBuilder::new()
                .with_id(id)
                .with_policy_id(policy_id)
                .with_retry_ids(&[format!("rec-{id}").as_str()])
                .build()
        })
        .collect()
}
