use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::worker::{FreshInit, RetryInit, RetryableWorker};
use retry_errors::{RetryError, RetryResult};

pub type FreshFactory =
    Arc<dyn Fn(FreshInit) -> RetryResult<Box<dyn RetryableWorker>> + Send + Sync>;
pub type RetryFactory =
    Arc<dyn Fn(RetryInit) -> RetryResult<Box<dyn RetryableWorker>> + Send + Sync>;

/// 一个处理器名称对应的两个构造入口
///
/// 没有重试工厂的处理器只能用于全新运行，按名称解析为重试Worker时返回 `HandlerNotCompatible`。
#[derive(Clone)]
pub struct HandlerRegistration {
    fresh: FreshFactory,
    retry: Option<RetryFactory>,
}

impl HandlerRegistration {
    pub fn supports_retry(&self) -> bool {
        self.retry.is_some()
    }
}

/// 处理器注册表
///
/// 进程启动时注册，之后只读。未知名称一律返回 `HandlerNotFound`。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerRegistration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册同时支持全新运行和重试运行的处理器
    pub fn register<F, R>(&mut self, name: &str, fresh: F, retry: R)
    where
        F: Fn(FreshInit) -> RetryResult<Box<dyn RetryableWorker>> + Send + Sync + 'static,
        R: Fn(RetryInit) -> RetryResult<Box<dyn RetryableWorker>> + Send + Sync + 'static,
    {
        self.insert(
            name,
            HandlerRegistration {
                fresh: Arc::new(fresh),
                retry: Some(Arc::new(retry)),
            },
        );
    }

    /// 注册只支持全新运行的处理器
    pub fn register_fresh_only<F>(&mut self, name: &str, fresh: F)
    where
        F: Fn(FreshInit) -> RetryResult<Box<dyn RetryableWorker>> + Send + Sync + 'static,
    {
        self.insert(
            name,
            HandlerRegistration {
                fresh: Arc::new(fresh),
                retry: None,
            },
        );
    }

    fn insert(&mut self, name: &str, registration: HandlerRegistration) {
        info!(
            handler = name,
            supports_retry = registration.supports_retry(),
            "注册重试处理器"
        );
        self.handlers.insert(name.to_string(), registration);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 按名称创建全新运行的Worker
    pub fn create_fresh(
        &self,
        name: &str,
        init: FreshInit,
    ) -> RetryResult<Box<dyn RetryableWorker>> {
        let registration = self.lookup(name)?;
        (registration.fresh)(init).map_err(|e| wrap_init_error(name, e))
    }

    /// 按名称创建重试运行的Worker
    pub fn create_retry(
        &self,
        name: &str,
        init: RetryInit,
    ) -> RetryResult<Box<dyn RetryableWorker>> {
        let registration = self.lookup(name)?;
        let factory = registration.retry.as_ref().ok_or_else(|| {
            RetryError::handler_not_compatible(name, "处理器不支持重试初始化")
        })?;
        debug!(
            handler = name,
            parent.id = init.parent.id,
            records = init.record_ids.len(),
            "创建重试Worker"
        );
        factory(init).map_err(|e| wrap_init_error(name, e))
    }

    fn lookup(&self, name: &str) -> RetryResult<&HandlerRegistration> {
        self.handlers
            .get(name)
            .ok_or_else(|| RetryError::handler_not_found(name))
    }
}

fn wrap_init_error(name: &str, err: RetryError) -> RetryError {
    match err {
        RetryError::HandlerInitialization { .. } | RetryError::HandlerNotCompatible { .. } => err,
        other => RetryError::handler_init(name, other.to_string()),
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handler_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerReport;
    use async_trait::async_trait;
    use retry_domain::ExecutionRecord;

    struct NoopWorker;

    #[async_trait]
    impl RetryableWorker for NoopWorker {
        fn handler_name(&self) -> &str {
            "noop"
        }

        async fn run(&mut self) -> RetryResult<WorkerReport> {
            Ok(WorkerReport::default())
        }
    }

    fn retry_init() -> RetryInit {
        let mut parent = ExecutionRecord::new(1, vec!["r1".into()]);
        parent.id = 5;
        RetryInit::new(parent.spawn_retry_child(), parent)
    }

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "noop",
            |_| Ok(Box::new(NoopWorker) as Box<dyn RetryableWorker>),
            |_| Ok(Box::new(NoopWorker) as Box<dyn RetryableWorker>),
        );
        registry.register_fresh_only("fresh_only", |_| {
            Ok(Box::new(NoopWorker) as Box<dyn RetryableWorker>)
        });
        registry.register(
            "broken",
            |_| Ok(Box::new(NoopWorker) as Box<dyn RetryableWorker>),
            |_| Err(RetryError::config_error("missing endpoint")),
        );
        registry
    }

    #[test]
    fn test_resolve_known_handler() {
        let registry = registry();
        let worker = registry.create_retry("noop", retry_init()).unwrap();
        assert_eq!(worker.handler_name(), "noop");
        assert_eq!(registry.handler_names(), vec!["broken", "fresh_only", "noop"]);
    }

    #[test]
    fn test_unknown_handler_fails_closed() {
        let err = registry()
            .create_retry("does_not_exist", retry_init())
            .err()
            .unwrap();
        assert!(matches!(err, RetryError::HandlerNotFound { ref name } if name == "does_not_exist"));
        assert!(err.is_candidate_scoped());
    }

    #[test]
    fn test_fresh_only_handler_is_not_compatible_for_retry() {
        let registry = registry();
        let err = registry.create_retry("fresh_only", retry_init()).err().unwrap();
        assert!(matches!(err, RetryError::HandlerNotCompatible { .. }));

        let init = FreshInit {
            execution: ExecutionRecord::new(1, vec!["r1".into()]),
            record_ids: vec!["r1".into()],
        };
        assert!(registry.create_fresh("fresh_only", init).is_ok());
    }

    #[test]
    fn test_factory_errors_become_initialization_errors() {
        let err = registry().create_retry("broken", retry_init()).err().unwrap();
        assert!(
            matches!(err, RetryError::HandlerInitialization { ref name, .. } if name == "broken")
        );
    }
}
