//! 任务表 - 事件消费方
//!
//! 把控制器事件汇总成每个任务一行的状态表，
//! 用于运行结束后的统计和"重试失败任务"的账号筛选。

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Local};

use crate::models::ResultKind;
use crate::orchestrator::events::ControllerEvent;

/// 任务线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadStatus {
    #[default]
    Queued,
    Running,
    Finished,
    Crashed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Queued => "queued",
            ThreadStatus::Running => "running",
            ThreadStatus::Finished => "finished",
            ThreadStatus::Crashed => "crashed",
        }
    }

    fn from_finished(status: &str) -> Self {
        if status == "finished" {
            ThreadStatus::Finished
        } else {
            ThreadStatus::Crashed
        }
    }
}

/// 任务表中的一行
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub email: String,
    pub thread_status: ThreadStatus,
    pub stage: String,
    pub business_status: String,
    pub result_kind: ResultKind,
    /// 展示用结果文本，如 `失败 | 支付失败 (...)`
    pub result: String,
    pub detail: String,
    pub link: String,
    pub updated_at: DateTime<Local>,
}

impl TaskRecord {
    fn new(task_id: &str, email: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            email: email.to_string(),
            thread_status: ThreadStatus::Queued,
            stage: String::new(),
            business_status: String::new(),
            result_kind: ResultKind::Unknown,
            result: String::new(),
            detail: String::new(),
            link: String::new(),
            updated_at: Local::now(),
        }
    }
}

/// 汇总统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSummary {
    pub queued: usize,
    pub running: usize,
    pub finished: usize,
    pub crashed: usize,
    pub success: usize,
    pub failed: usize,
    pub needs_verify: usize,
    pub other: usize,
    pub planned: usize,
    pub launched: usize,
    pub stopped: bool,
}

impl fmt::Display for TableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queued={}  running={}  finished={}  crashed={}  success={}  failed={}  need_verify={}  planned={}  launched={}",
            self.queued,
            self.running,
            self.finished,
            self.crashed,
            self.success,
            self.failed,
            self.needs_verify,
            self.planned,
            self.launched
        )?;
        if self.stopped {
            write!(f, "  unlaunched={}", self.planned.saturating_sub(self.launched))?;
        }
        Ok(())
    }
}

/// 任务状态表
#[derive(Debug, Default)]
pub struct TaskTable {
    records: Vec<TaskRecord>,
    index: HashMap<String, usize>,
    planned: usize,
    launched: usize,
    stopped: bool,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskRecord> {
        self.index.get(task_id).map(|&i| &self.records[i])
    }

    pub fn apply(&mut self, event: &ControllerEvent) {
        match event {
            ControllerEvent::RunStarted { scheduled_tasks, .. } => {
                self.planned = *scheduled_tasks;
                self.launched = 0;
                self.stopped = false;
            }
            ControllerEvent::TaskScheduled { task_name, email, .. } => {
                self.launched += 1;
                let record = self.upsert(task_name, email);
                record.thread_status = ThreadStatus::Queued;
                record.stage = "待启动".to_string();
            }
            ControllerEvent::TaskStarted { task_name, email } => {
                let record = self.upsert(task_name, email);
                record.thread_status = ThreadStatus::Running;
                record.stage = "线程已启动".to_string();
            }
            ControllerEvent::TaskProgress {
                task_name,
                email,
                stage,
                detail,
            } => {
                let record = self.upsert(task_name, email);
                record.stage = stage.clone();
                record.detail = detail.clone();
            }
            ControllerEvent::TaskBusinessResult {
                task_name,
                email,
                summary,
            } => {
                let record = self.upsert(task_name, email);
                record.result_kind = summary.result_kind;
                record.business_status = summary.business_status.clone();
                record.result = summary.result_kind.display_text(&summary.business_status);
                record.detail = summary.detail.clone();
                record.link = summary.link.clone();
            }
            ControllerEvent::TaskFinished {
                task_name,
                email,
                status,
                result_kind,
                business_status,
                detail,
            } => {
                let thread_status = ThreadStatus::from_finished(status);
                let record = self.upsert(task_name, email);
                record.thread_status = thread_status;
                record.stage = if thread_status == ThreadStatus::Finished {
                    "完成".to_string()
                } else {
                    "线程异常".to_string()
                };
                record.result_kind = *result_kind;
                record.business_status = business_status.clone();
                record.result = result_kind.display_text(business_status);
                record.detail = detail.clone();
            }
            ControllerEvent::StopRequested { .. } => self.stopped = true,
            ControllerEvent::RunFinished {
                launched_tasks,
                stopped,
            } => {
                if *launched_tasks > 0 {
                    self.launched = *launched_tasks;
                }
                self.stopped = *stopped;
            }
            ControllerEvent::RunError { .. } => {}
        }
    }

    /// 可重试的邮箱：同一邮箱只看最后一次任务，结果以"失败"开头才重试
    ///
    /// 需验证和崩溃不会被选中
    pub fn retryable_emails(&self) -> Vec<String> {
        let mut latest: Vec<(String, &str)> = Vec::new();
        for record in &self.records {
            let email = record.email.trim();
            if email.is_empty() {
                continue;
            }
            match latest.iter_mut().find(|(e, _)| e == email) {
                Some(entry) => entry.1 = record.result.as_str(),
                None => latest.push((email.to_string(), record.result.as_str())),
            }
        }
        latest
            .into_iter()
            .filter(|(_, result)| result.trim().starts_with("失败"))
            .map(|(email, _)| email)
            .collect()
    }

    pub fn summary(&self) -> TableSummary {
        let mut summary = TableSummary {
            planned: if self.planned > 0 { self.planned } else { self.records.len() },
            launched: self.launched,
            stopped: self.stopped,
            ..Default::default()
        };
        for record in &self.records {
            match record.thread_status {
                ThreadStatus::Queued => summary.queued += 1,
                ThreadStatus::Running => summary.running += 1,
                ThreadStatus::Finished => summary.finished += 1,
                ThreadStatus::Crashed => summary.crashed += 1,
            }
            let result = record.result.as_str();
            if result.starts_with("成功") {
                summary.success += 1;
            } else if result.starts_with("失败") || result.starts_with("崩溃") {
                summary.failed += 1;
            } else if result.starts_with("需验证") {
                summary.needs_verify += 1;
            } else {
                summary.other += 1;
            }
        }
        summary
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn upsert(&mut self, task_id: &str, email: &str) -> &mut TaskRecord {
        let i = match self.index.get(task_id) {
            Some(&i) => i,
            None => {
                self.records.push(TaskRecord::new(task_id, email));
                let i = self.records.len() - 1;
                self.index.insert(task_id.to_string(), i);
                i
            }
        };
        let record = &mut self.records[i];
        if !email.is_empty() {
            record.email = email.to_string();
        }
        record.updated_at = Local::now();
        record
    }
}

/// 控制台输出的一行（不需要输出的事件返回 `None`）
pub fn console_line(event: &ControllerEvent) -> Option<String> {
    match event {
        ControllerEvent::RunStarted {
            total_accounts,
            scheduled_tasks,
            input_dir,
            output_dir,
            retry_mode,
            retry_candidates,
            ..
        } => {
            let mut line = format!(
                "计划任务数: {} / 账号总数: {} / 输入目录: {} / 输出目录: {}",
                scheduled_tasks, total_accounts, input_dir, output_dir
            );
            if *retry_mode {
                line.push_str(&format!(" / 重试模式: 是 / 重试候选: {}", retry_candidates));
            }
            Some(line)
        }
        ControllerEvent::RunError { message } => Some(format!("❌ {}", message)),
        ControllerEvent::StopRequested {
            hard,
            force_closed_browsers,
        } => Some(if *hard {
            format!("控制器已执行硬停止，强制关闭浏览器窗口: {} 个", force_closed_browsers)
        } else {
            "控制器已收到停止请求".to_string()
        }),
        ControllerEvent::TaskFinished {
            task_name,
            email,
            result_kind,
            business_status,
            ..
        } => Some(format!(
            "[{}] {} -> {}",
            task_name,
            email,
            result_kind.display_text(business_status)
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessStatus, TaskSummary};

    fn schedule(table: &mut TaskTable, task: &str, email: &str) {
        table.apply(&ControllerEvent::TaskScheduled {
            task_name: task.into(),
            email: email.into(),
            index: 0,
        });
    }

    fn finish(table: &mut TaskTable, task: &str, email: &str, status: BusinessStatus) {
        let summary = TaskSummary::from_status(&status, "", "", true);
        table.apply(&ControllerEvent::TaskBusinessResult {
            task_name: task.into(),
            email: email.into(),
            summary: summary.clone(),
        });
        table.apply(&ControllerEvent::TaskFinished {
            task_name: task.into(),
            email: email.into(),
            status: "finished".into(),
            result_kind: summary.result_kind,
            business_status: summary.business_status,
            detail: String::new(),
        });
    }

    #[test]
    fn test_lifecycle_updates_record() {
        let mut table = TaskTable::new();
        schedule(&mut table, "Task_A1", "a@x.com");
        assert_eq!(table.get("Task_A1").unwrap().stage, "待启动");

        table.apply(&ControllerEvent::TaskStarted {
            task_name: "Task_A1".into(),
            email: "a@x.com".into(),
        });
        let record = table.get("Task_A1").unwrap();
        assert_eq!(record.thread_status, ThreadStatus::Running);
        assert_eq!(record.stage, "线程已启动");

        finish(&mut table, "Task_A1", "a@x.com", BusinessStatus::Subscribed);
        let record = table.get("Task_A1").unwrap();
        assert_eq!(record.thread_status, ThreadStatus::Finished);
        assert_eq!(record.stage, "完成");
        assert_eq!(record.result, "成功 | 已订阅");
    }

    #[test]
    fn test_crashed_thread_status() {
        let mut table = TaskTable::new();
        schedule(&mut table, "Task_C1", "c@x.com");
        table.apply(&ControllerEvent::TaskFinished {
            task_name: "Task_C1".into(),
            email: "c@x.com".into(),
            status: "crashed".into(),
            result_kind: ResultKind::Crashed,
            business_status: "线程崩溃".into(),
            detail: "boom".into(),
        });
        let record = table.get("Task_C1").unwrap();
        assert_eq!(record.thread_status, ThreadStatus::Crashed);
        assert_eq!(record.stage, "线程异常");
        assert_eq!(record.result, "崩溃 | 线程异常");
    }

    #[test]
    fn test_retry_selects_only_failed() {
        let mut table = TaskTable::new();
        for (task, email) in [("T1", "a@x.com"), ("T2", "b@x.com"), ("T3", "c@x.com")] {
            schedule(&mut table, task, email);
        }
        finish(&mut table, "T1", "a@x.com", BusinessStatus::PaymentFailed("卡被拒".into()));
        finish(&mut table, "T2", "b@x.com", BusinessStatus::Subscribed);
        finish(&mut table, "T3", "c@x.com", BusinessStatus::NeedsVerification);

        assert_eq!(table.retryable_emails(), vec!["a@x.com".to_string()]);
    }

    #[test]
    fn test_retry_uses_latest_record_per_email() {
        let mut table = TaskTable::new();
        schedule(&mut table, "T1", "a@x.com");
        finish(&mut table, "T1", "a@x.com", BusinessStatus::LoginFailed);
        schedule(&mut table, "T2", "b@x.com");
        finish(&mut table, "T2", "b@x.com", BusinessStatus::Subscribed);
        schedule(&mut table, "T3", "a@x.com");
        finish(&mut table, "T3", "a@x.com", BusinessStatus::Subscribed);
        schedule(&mut table, "T4", "b@x.com");
        finish(&mut table, "T4", "b@x.com", BusinessStatus::CheckFailed("x".into()));

        assert_eq!(table.retryable_emails(), vec!["b@x.com".to_string()]);
    }

    #[test]
    fn test_summary_and_reset() {
        let mut table = TaskTable::new();
        table.apply(&ControllerEvent::RunStarted {
            total_accounts: 5,
            scheduled_tasks: 5,
            max_concurrent: 2,
            input_dir: "input".into(),
            output_dir: "output".into(),
            browser_window_mode: "headless".into(),
            retry_mode: false,
            retry_candidates: 0,
        });
        schedule(&mut table, "T1", "a@x.com");
        schedule(&mut table, "T2", "b@x.com");
        schedule(&mut table, "T3", "c@x.com");
        finish(&mut table, "T1", "a@x.com", BusinessStatus::Subscribed);
        finish(&mut table, "T2", "b@x.com", BusinessStatus::Crashed("x".into()));
        table.apply(&ControllerEvent::StopRequested {
            hard: true,
            force_closed_browsers: 1,
        });
        table.apply(&ControllerEvent::RunFinished {
            launched_tasks: 3,
            stopped: true,
        });

        let summary = table.summary();
        assert_eq!(summary.finished, 2);
        assert_eq!(summary.queued, 1);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.other, 1);
        assert_eq!(summary.launched, 3);
        assert!(summary.to_string().ends_with("unlaunched=2"));

        table.reset();
        assert!(table.records().is_empty());
        assert_eq!(table.summary(), TableSummary::default());
    }

    #[test]
    fn test_console_line() {
        let line = console_line(&ControllerEvent::StopRequested {
            hard: true,
            force_closed_browsers: 2,
        })
        .unwrap();
        assert!(line.contains("2 个"));
        assert!(console_line(&ControllerEvent::TaskStarted {
            task_name: "T".into(),
            email: "e".into(),
        })
        .is_none());
    }
}
