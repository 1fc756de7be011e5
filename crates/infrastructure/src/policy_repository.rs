use std::collections::BTreeMap;

use async_trait::async_trait;

use retry_domain::{IntegrationPolicy, PolicyRepository};
use retry_errors::RetryResult;

/// 由配置文件提供的只读集成策略
#[derive(Debug, Clone, Default)]
pub struct ConfigPolicyRepository {
    policies: BTreeMap<i64, IntegrationPolicy>,
}

impl ConfigPolicyRepository {
    pub fn new(policies: Vec<IntegrationPolicy>) -> Self {
        Self {
            policies: policies.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[async_trait]
impl PolicyRepository for ConfigPolicyRepository {
    async fn get_by_id(&self, id: i64) -> RetryResult<Option<IntegrationPolicy>> {
        Ok(self.policies.get(&id).cloned())
    }

    async fn get_enabled(&self) -> RetryResult<Vec<IntegrationPolicy>> {
        Ok(self.policies.values().filter(|p| p.enabled).cloned().collect())
    }
}
