use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::selector::CandidateSelector;
use retry_errors::{RetryError, RetryResult};

/// 按CRON表达式周期性触发候选选择
pub struct SelectionTrigger {
    selector: Arc<CandidateSelector>,
    schedule: Schedule,
    run_on_startup: bool,
}

impl SelectionTrigger {
    pub fn new(
        selector: Arc<CandidateSelector>,
        cron_expr: &str,
        run_on_startup: bool,
    ) -> RetryResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| RetryError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            selector,
            schedule,
            run_on_startup,
        })
    }

    /// 获取下一次触发时间
    pub fn next_tick(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&after).take(count).collect()
    }

    pub async fn fire(&self) {
        match self.selector.select_and_publish(Utc::now()).await {
            Ok(report) => debug!(
                candidates = report.candidates,
                messages = report.messages_published,
                "定时候选选择完成"
            ),
            Err(e) => error!("候选选择失败: {}", e),
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("候选选择触发器启动");
        if self.run_on_startup {
            self.fire().await;
        }

        loop {
            let now = Utc::now();
            let Some(next) = self.next_tick(now) else {
                warn!("无法计算下一次触发时间，触发器退出");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(
                next = %next.format("%Y-%m-%d %H:%M:%S UTC"),
                "等待下一次候选选择"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => self.fire().await,
                _ = shutdown_rx.recv() => {
                    info!("候选选择触发器收到关闭信号");
                    break;
                }
            }
        }
    }
}
