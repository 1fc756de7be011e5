use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 执行记录ID
pub type ExecutionId = i64;

/// 集成策略
///
/// 描述一个集成的重试规则。由配置持有，在一个派发周期内只读。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrationPolicy {
    pub id: i64,
    pub name: String,
    /// 运行时按名称解析的重试处理器标识
    pub handler: String,
    pub max_retries: i32,
    pub retry_interval_minutes: i64,
    /// 为空表示不按状态码过滤
    #[serde(default)]
    pub retryable_status_codes: Vec<u16>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl IntegrationPolicy {
    /// 分钟数超出时间类型可表示的范围时返回 `None`
    pub fn retry_interval(&self) -> Option<Duration> {
        Duration::try_minutes(self.retry_interval_minutes)
    }

    pub fn has_retries_left(&self, retries_attempted: i32) -> bool {
        retries_attempted < self.max_retries
    }

    /// 检查上一次失败的状态码是否允许重试
    pub fn allows_status(&self, status_code: Option<u16>) -> bool {
        if self.retryable_status_codes.is_empty() {
            return true;
        }
        status_code.is_some_and(|code| self.retryable_status_codes.contains(&code))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionKind {
    /// 集成自身运行产生的记录
    #[serde(rename = "EGRESS")]
    Egress,
    /// 重试派发时创建的子记录
    #[serde(rename = "EGRESS_CHILD")]
    EgressChild,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionKind::Egress => "EGRESS",
            ExecutionKind::EgressChild => "EGRESS_CHILD",
        }
    }
}

impl FromStr for ExecutionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EGRESS" => Ok(ExecutionKind::Egress),
            "EGRESS_CHILD" => Ok(ExecutionKind::EgressChild),
            _ => Err(format!("Invalid execution kind: {s}")),
        }
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 集成的一次运行记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub policy_id: i64,
    pub kind: ExecutionKind,
    pub status: ExecutionStatus,
    /// 需要重试的失败业务记录ID（有序）
    pub retry_ids: Vec<String>,
    pub retries_attempted: i32,
    /// 子记录指向其父执行记录
    pub retry_from: Option<ExecutionId>,
    pub last_status_code: Option<u16>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// 创建尚未持久化的执行记录（id为0）
    pub fn new(policy_id: i64, retry_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            policy_id,
            kind: ExecutionKind::Egress,
            status: ExecutionStatus::Pending,
            retry_ids,
            retries_attempted: 0,
            retry_from: None,
            last_status_code: None,
            last_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 去重并去除空白后的重试ID集合，保持原有顺序
    pub fn retry_id_set(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.retry_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .filter(|id| seen.insert(id.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// 没有重试ID的记录不可重试
    pub fn is_retryable(&self) -> bool {
        self.retry_ids.iter().any(|id| !id.trim().is_empty())
    }

    /// 仅修改内存中的重试计数，持久化由Worker完成后的后处理负责
    pub fn record_attempt(&mut self) {
        self.retries_attempted += 1;
        self.updated_at = Utc::now();
    }

    /// 为本次重试创建子执行记录，继承父记录的集成策略
    pub fn spawn_retry_child(&self) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            id: 0,
            policy_id: self.policy_id,
            kind: ExecutionKind::EgressChild,
            status: ExecutionStatus::Pending,
            retry_ids: self.retry_id_set(),
            retries_attempted: self.retries_attempted,
            retry_from: Some(self.id),
            last_status_code: None,
            last_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn retry_interval_elapsed(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        let reference = self.last_attempt_at.unwrap_or(self.created_at);
        // 溢出视为尚未到期
        reference
            .checked_add_signed(interval)
            .is_some_and(|due| due <= now)
    }

    /// 候选查询的统一判定规则，SQL以外的仓储实现共用
    pub fn is_retry_candidate(&self, policy: &IntegrationPolicy, now: DateTime<Utc>) -> bool {
        self.policy_id == policy.id
            && self.kind == ExecutionKind::Egress
            && self.status == ExecutionStatus::Failed
            && self.is_retryable()
            && policy.has_retries_left(self.retries_attempted)
            && policy
                .retry_interval()
                .is_some_and(|interval| self.retry_interval_elapsed(interval, now))
            && policy.allows_status(self.last_status_code)
    }

    pub fn entity_description(&self) -> String {
        format!(
            "执行记录 {} (策略: {}, 类型: {}, 已重试: {})",
            self.id, self.policy_id, self.kind, self.retries_attempted
        )
    }
}
