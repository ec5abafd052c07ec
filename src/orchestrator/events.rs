//! 运行事件与事件总线
//!
//! 调度器和任务流程只向 `EventBus` 发事件，不关心谁在消费。
//! 消费方（控制台、任务表）的失败或 panic 只记录日志，不会影响调度。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error, warn};

use crate::models::{ResultKind, TaskSummary};

/// 运行过程中的所有事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    RunStarted {
        total_accounts: usize,
        scheduled_tasks: usize,
        max_concurrent: usize,
        input_dir: String,
        output_dir: String,
        browser_window_mode: String,
        retry_mode: bool,
        retry_candidates: usize,
    },
    RunError {
        message: String,
    },
    TaskScheduled {
        task_name: String,
        email: String,
        index: usize,
    },
    TaskStarted {
        task_name: String,
        email: String,
    },
    TaskProgress {
        task_name: String,
        email: String,
        stage: String,
        detail: String,
    },
    TaskBusinessResult {
        task_name: String,
        email: String,
        #[serde(flatten)]
        summary: TaskSummary,
    },
    TaskFinished {
        task_name: String,
        email: String,
        /// `finished` 或 `crashed`
        status: String,
        result_kind: ResultKind,
        business_status: String,
        detail: String,
    },
    StopRequested {
        hard: bool,
        force_closed_browsers: usize,
    },
    RunFinished {
        launched_tasks: usize,
        stopped: bool,
    },
}

impl ControllerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ControllerEvent::RunStarted { .. } => "run_started",
            ControllerEvent::RunError { .. } => "run_error",
            ControllerEvent::TaskScheduled { .. } => "task_scheduled",
            ControllerEvent::TaskStarted { .. } => "task_started",
            ControllerEvent::TaskProgress { .. } => "task_progress",
            ControllerEvent::TaskBusinessResult { .. } => "task_business_result",
            ControllerEvent::TaskFinished { .. } => "task_finished",
            ControllerEvent::StopRequested { .. } => "stop_requested",
            ControllerEvent::RunFinished { .. } => "run_finished",
        }
    }

    /// 事件负载（不含 `type` 字段）
    pub fn payload(&self) -> JsonValue {
        match serde_json::to_value(self) {
            Ok(JsonValue::Object(mut map)) => {
                map.remove("type");
                JsonValue::Object(map)
            }
            _ => JsonValue::Null,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&ControllerEvent) -> anyhow::Result<()> + Send + Sync>;

/// 事件总线
///
/// 没有订阅者时事件只写调试日志
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Vec<EventCallback>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个订阅者
    pub fn subscribe<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ControllerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(callback));
        self
    }

    pub fn emit(&self, event: ControllerEvent) {
        debug!("事件 {}: {}", event.event_type(), event.payload());

        for callback in &self.subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("事件回调处理 {} 失败: {}", event.event_type(), e),
                Err(_) => error!("事件回调处理 {} 时发生 panic，已忽略", event.event_type()),
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_payload_excludes_type_tag() {
        let event = ControllerEvent::RunFinished {
            launched_tasks: 3,
            stopped: false,
        };
        assert_eq!(event.event_type(), "run_finished");
        assert_eq!(
            event.payload(),
            serde_json::json!({"launched_tasks": 3, "stopped": false})
        );
    }

    #[test]
    fn test_business_result_flattens_summary() {
        let summary = TaskSummary::from_status(&crate::models::BusinessStatus::LoginFailed, "登录失败", "", false);
        let event = ControllerEvent::TaskBusinessResult {
            task_name: "Task_AB12".into(),
            email: "a@x.com".into(),
            summary,
        };
        let payload = event.payload();
        assert_eq!(payload["result_kind"], "login_failed");
        assert_eq!(payload["login_success"], false);
        assert_eq!(payload["task_name"], "Task_AB12");
    }

    #[test]
    fn test_failing_subscribers_are_isolated() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let bus = EventBus::new()
            .subscribe(|_| anyhow::bail!("consumer broke"))
            .subscribe(|_| panic!("consumer panicked"))
            .subscribe(move |event| {
                sink.lock().unwrap().push(event.event_type());
                Ok(())
            });

        bus.emit(ControllerEvent::RunError {
            message: "x".into(),
        });
        bus.emit(ControllerEvent::RunFinished {
            launched_tasks: 0,
            stopped: false,
        });

        assert_eq!(*seen.lock().unwrap(), vec!["run_error", "run_finished"]);
    }
}
