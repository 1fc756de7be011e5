//! Retry handlers with predetermined behaviour

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use retry_domain::ExecutionId;
use retry_errors::{RetryError, RetryResult};
use retry_worker::{
    FreshInit, HandlerRegistry, RecordOutcome, RetryInit, RetryableWorker, WorkerReport,
};

#[derive(Debug, Clone)]
pub enum Script {
    /// Every record succeeds with 200
    Succeed,
    /// Every record fails with the given status
    Fail(u16),
    /// Only the listed records fail with the given status
    FailRecords(Vec<String>, u16),
    /// `run` returns an error
    Error(String),
    /// `run` panics
    Panic,
}

/// What a scripted handler observed, shared across all the workers it created
#[derive(Debug, Default)]
pub struct ScriptedStats {
    fresh_inits: Mutex<usize>,
    retry_parents: Mutex<Vec<ExecutionId>>,
    runs: Mutex<usize>,
}

impl ScriptedStats {
    pub fn fresh_inits(&self) -> usize {
        *self.fresh_inits.lock().unwrap()
    }

    /// Parent ids passed to retry initialisation, in order
    pub fn retry_parents(&self) -> Vec<ExecutionId> {
        self.retry_parents.lock().unwrap().clone()
    }

    pub fn runs(&self) -> usize {
        *self.runs.lock().unwrap()
    }
}

pub struct ScriptedWorker {
    name: String,
    script: Script,
    delay: Duration,
    record_ids: Vec<String>,
    stats: Arc<ScriptedStats>,
}

impl ScriptedWorker {
    pub fn new(name: &str, script: Script, record_ids: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            script,
            delay: Duration::ZERO,
            record_ids,
            stats: Arc::new(ScriptedStats::default()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_stats(mut self, stats: Arc<ScriptedStats>) -> Self {
        self.stats = stats;
        self
    }
}

#[async_trait]
impl RetryableWorker for ScriptedWorker {
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> RetryResult<WorkerReport> {
        *self.stats.runs.lock().unwrap() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcomes = match &self.script {
            Script::Succeed => self
                .record_ids
                .iter()
                .map(|id| RecordOutcome::succeeded(id.as_str(), Some(200)))
                .collect(),
            Script::Fail(status) => self
                .record_ids
                .iter()
                .map(|id| RecordOutcome::failed(id.as_str(), Some(*status), "scripted failure"))
                .collect(),
            Script::FailRecords(failing, status) => self
                .record_ids
                .iter()
                .map(|id| {
                    if failing.contains(id) {
                        RecordOutcome::failed(id.as_str(), Some(*status), "scripted failure")
                    } else {
                        RecordOutcome::succeeded(id.as_str(), Some(200))
                    }
                })
                .collect(),
            Script::Error(message) => return Err(RetryError::worker_execution(message.clone())),
            Script::Panic => panic!("scripted panic in {}", self.name),
        };
        Ok(WorkerReport::new(outcomes))
    }
}

/// Register a scripted handler supporting both initialisation paths
pub fn register_scripted(
    registry: &mut HandlerRegistry,
    name: &str,
    script: Script,
) -> Arc<ScriptedStats> {
    register_scripted_with_delay(registry, name, script, Duration::ZERO)
}

pub fn register_scripted_with_delay(
    registry: &mut HandlerRegistry,
    name: &str,
    script: Script,
    delay: Duration,
) -> Arc<ScriptedStats> {
    let stats = Arc::new(ScriptedStats::default());

    let fresh_name = name.to_string();
    let fresh_script = script.clone();
    let fresh_stats = Arc::clone(&stats);
    let retry_name = name.to_string();
    let retry_stats = Arc::clone(&stats);

    registry.register(
        name,
        move |init: FreshInit| {
            *fresh_stats.fresh_inits.lock().unwrap() += 1;
            Ok(Box::new(
                ScriptedWorker::new(&fresh_name, fresh_script.clone(), init.record_ids)
                    .with_delay(delay)
                    .with_stats(Arc::clone(&fresh_stats)),
            ) as Box<dyn RetryableWorker>)
        },
        move |init: RetryInit| {
            retry_stats.retry_parents.lock().unwrap().push(init.parent.id);
            Ok(Box::new(
                ScriptedWorker::new(&retry_name, script.clone(), init.record_ids)
                    .with_delay(delay)
                    .with_stats(Arc::clone(&retry_stats)),
            ) as Box<dyn RetryableWorker>)
        },
    );
    stats
}

/// Register a handler that only supports fresh runs
pub fn register_fresh_only(registry: &mut HandlerRegistry, name: &str) {
    let worker_name = name.to_string();
    registry.register_fresh_only(name, move |init: FreshInit| {
        Ok(Box::new(ScriptedWorker::new(&worker_name, Script::Succeed, init.record_ids))
            as Box<dyn RetryableWorker>)
    });
}
