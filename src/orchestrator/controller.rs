//! 批量调度器 - 编排层
//!
//! ## 职责
//!
//! 1. **准备数据**：读取账号、按需筛选重试账号、加载支付数据
//! 2. **并发控制**：同时运行的任务数不超过 `max_concurrency`，相邻启动之间错开
//! 3. **停止**：硬停止后不再创建新任务，并强制关闭所有浏览器
//! 4. **汇报**：所有进度都以 `ControllerEvent` 发出
//!
//! 调度器不做任何业务判断，单个账号的流程全部委托给 `WorkflowExecutor`。

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::{AppError, AppResult, InputError};
use crate::infrastructure::{ResourceFactory, ResourceRegistry};
use crate::models::{Account, ResultKind, TaskSummary, WindowMode};
use crate::orchestrator::events::{ControllerEvent, EventBus};
use crate::services::account_service::{filter_for_retry, normalize_retry_set, parse_accounts};
use crate::services::{InputSource, OutputSink, PaymentDataProvider};
use crate::workflow::{SubscriptionSteps, WorkflowExecutor};

const TASK_NAME_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 单次运行参数
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_concurrency: usize,
    pub launch_delay: Duration,
    pub mode: WindowMode,
    /// 只运行这些邮箱对应的账号；规范化后为空时不筛选
    pub retry_emails: Option<Vec<String>>,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            launch_delay: Duration::from_secs_f64(config.launch_delay_seconds.max(0.0)),
            mode: config.window_mode,
            retry_emails: None,
        }
    }

    pub fn retry(mut self, emails: Vec<String>) -> Self {
        self.retry_emails = Some(emails);
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 运行前准备好的数据
struct Prepared {
    accounts: Vec<Account>,
    total_accounts: usize,
    retry_mode: bool,
    retry_candidates: usize,
    payments: Arc<PaymentDataProvider>,
}

/// 任务线程的返回值：任务名、邮箱、结果（panic 时为错误描述）
type TaskOutput = (String, String, Result<TaskSummary, String>);

/// 批量调度器
pub struct Controller<F: ResourceFactory, St> {
    registry: Arc<ResourceRegistry<F>>,
    steps: Arc<St>,
    input: Arc<dyn InputSource>,
    output_dir: PathBuf,
    events: EventBus,
    running: AtomicBool,
    stop_requested: AtomicBool,
    poll_interval: Duration,
}

impl<F, St> Controller<F, St>
where
    F: ResourceFactory,
    St: SubscriptionSteps<F::Session>,
{
    pub fn new(
        registry: Arc<ResourceRegistry<F>>,
        steps: Arc<St>,
        input: Arc<dyn InputSource>,
        output_dir: impl Into<PathBuf>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            steps,
            input,
            output_dir: output_dir.into(),
            events,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            poll_interval: Duration::from_millis(200),
        }
    }

    /// 调度循环的轮询间隔（同时也是停止请求的最长响应延迟）
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry<F>> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// 运行一轮批量任务，直到全部任务结束
    ///
    /// 已有一轮在运行时直接返回 `false`，不发出任何事件。
    /// 准备阶段失败（账号 / 支付数据）时发出 `run_error` 和 `run_finished`，同样返回 `false`。
    pub async fn run(&self, opts: RunOptions) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("⚠️ 已有任务在运行，忽略本次启动请求");
            return false;
        }
        let _running = RunningGuard {
            running: &self.running,
            stop_requested: &self.stop_requested,
        };

        self.stop_requested.store(false, Ordering::SeqCst);
        self.registry.reopen();

        let prepared = match self.prepare(&opts).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let message = e.brief();
                error!("❌ {}", message);
                self.events.emit(ControllerEvent::RunError { message });
                self.events.emit(ControllerEvent::RunFinished {
                    launched_tasks: 0,
                    stopped: self.is_stop_requested(),
                });
                return false;
            }
        };

        let max_concurrency = opts.max_concurrency.max(1);
        let output = Arc::new(OutputSink::new(&self.output_dir));

        info!(
            "计划任务数: {} / 账号总数: {} / 最大并发: {} / 窗口模式: {}",
            prepared.accounts.len(),
            prepared.total_accounts,
            max_concurrency,
            opts.mode
        );
        self.events.emit(ControllerEvent::RunStarted {
            total_accounts: prepared.total_accounts,
            scheduled_tasks: prepared.accounts.len(),
            max_concurrent: max_concurrency,
            input_dir: self.input.describe(),
            output_dir: self.output_dir.display().to_string(),
            browser_window_mode: opts.mode.to_string(),
            retry_mode: prepared.retry_mode,
            retry_candidates: prepared.retry_candidates,
        });

        let executor = WorkflowExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.steps),
            prepared.payments,
            output,
            self.events.clone(),
        );

        let launched = self
            .schedule(executor, prepared.accounts, max_concurrency, &opts)
            .await;

        info!("=== 所有自动化任务已全部结束 ===");
        self.events.emit(ControllerEvent::RunFinished {
            launched_tasks: launched,
            stopped: self.is_stop_requested(),
        });
        true
    }

    /// 硬停止：不再创建新任务，强制关闭所有存活的浏览器
    ///
    /// 返回本次强制关闭的浏览器数量
    pub async fn stop(&self) -> usize {
        self.stop_requested.store(true, Ordering::SeqCst);
        warn!("🛑 收到停止请求，正在强制关闭所有浏览器窗口...");

        let closed = self.registry.shutdown().await;
        self.events.emit(ControllerEvent::StopRequested {
            hard: true,
            force_closed_browsers: closed,
        });
        closed
    }

    async fn prepare(&self, opts: &RunOptions) -> AppResult<Prepared> {
        let raw = self.input.read_accounts().await?;
        if raw.trim().is_empty() {
            return Err(InputError::EmptyAccounts.into());
        }

        let mut accounts = parse_accounts(&raw);
        if accounts.is_empty() {
            return Err(InputError::NoAccounts.into());
        }
        let total_accounts = accounts.len();

        let retry_set = opts
            .retry_emails
            .as_ref()
            .map(normalize_retry_set)
            .unwrap_or_default();
        let retry_mode = !retry_set.is_empty();
        if retry_mode {
            accounts = filter_for_retry(accounts, &retry_set);
            if accounts.is_empty() {
                return Err(InputError::NoRetryMatches.into());
            }
            info!("🔁 重试模式：{} 个候选邮箱，匹配到 {} 个账号", retry_set.len(), accounts.len());
        }

        let payments = PaymentDataProvider::load(self.input.as_ref())
            .await
            .map_err(AppError::payment_data)?;

        Ok(Prepared {
            accounts,
            total_accounts,
            retry_mode,
            retry_candidates: retry_set.len(),
            payments: Arc::new(payments),
        })
    }

    /// 调度所有账号，返回实际启动的任务数
    async fn schedule(
        &self,
        executor: WorkflowExecutor<F, St>,
        accounts: Vec<Account>,
        max_concurrency: usize,
        opts: &RunOptions,
    ) -> usize {
        let total = accounts.len();
        let mut join_set: JoinSet<TaskOutput> = JoinSet::new();
        let mut used_names = HashSet::new();
        let mut launched = 0;

        for (index, account) in accounts.into_iter().enumerate() {
            while join_set.len() >= max_concurrency && !self.is_stop_requested() {
                self.reap(&mut join_set).await;
            }
            if self.is_stop_requested() {
                warn!(
                    "检测到停止请求，停止继续创建任务（剩余 {} 个账号未启动）",
                    total - index
                );
                break;
            }

            let task_name = unique_task_name(&mut used_names);
            self.events.emit(ControllerEvent::TaskScheduled {
                task_name: task_name.clone(),
                email: account.email.clone(),
                index,
            });

            let span = info_span!("task", name = %task_name, email = %account.email);
            let executor = executor.clone();
            let events = self.events.clone();
            let mode = opts.mode;
            join_set.spawn(
                async move {
                    events.emit(ControllerEvent::TaskStarted {
                        task_name: task_name.clone(),
                        email: account.email.clone(),
                    });
                    let outcome = AssertUnwindSafe(executor.run(&task_name, &account, mode))
                        .catch_unwind()
                        .await
                        .map_err(|panic| panic_message(panic.as_ref()));
                    (task_name, account.email, outcome)
                }
                .instrument(span),
            );
            launched += 1;

            if index + 1 < total {
                self.pause(opts.launch_delay, &mut join_set).await;
            }
        }

        while !join_set.is_empty() {
            self.reap(&mut join_set).await;
        }
        launched
    }

    /// 在错开启动的间隔里继续回收已结束的任务，收到停止请求时提前返回
    async fn pause(&self, delay: Duration, join_set: &mut JoinSet<TaskOutput>) {
        let deadline = Instant::now() + delay;
        while !self.is_stop_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let slice = (deadline - now).min(self.poll_interval);
            if join_set.is_empty() {
                sleep(slice).await;
            } else {
                self.reap_within(slice, join_set).await;
            }
        }
    }

    async fn reap(&self, join_set: &mut JoinSet<TaskOutput>) {
        self.reap_within(self.poll_interval, join_set).await;
    }

    async fn reap_within(&self, wait: Duration, join_set: &mut JoinSet<TaskOutput>) {
        if let Ok(Some(joined)) = timeout(wait, join_set.join_next()).await {
            self.finish_task(joined);
        }
    }

    fn finish_task(&self, joined: Result<TaskOutput, JoinError>) {
        match joined {
            Ok((task_name, email, Ok(summary))) => {
                info!("[{}] 任务结束: {}", task_name, summary.result_kind.display_text(&summary.business_status));
                self.events.emit(ControllerEvent::TaskFinished {
                    task_name,
                    email,
                    status: "finished".to_string(),
                    result_kind: summary.result_kind,
                    business_status: summary.business_status,
                    detail: summary.detail,
                });
            }
            Ok((task_name, email, Err(message))) => {
                error!("[{}] 💥 任务线程崩溃: {}", task_name, message);
                self.events.emit(ControllerEvent::TaskFinished {
                    task_name,
                    email,
                    status: "crashed".to_string(),
                    result_kind: ResultKind::Crashed,
                    business_status: "线程崩溃".to_string(),
                    detail: message,
                });
            }
            Err(e) => error!("任务线程异常退出: {}", e),
        }
    }
}

/// 一轮运行结束时清掉运行标记和停止标记
struct RunningGuard<'a> {
    running: &'a AtomicBool,
    stop_requested: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

/// 生成 `Task_XXXX` 形式的任务名，本轮内不重复
pub fn unique_task_name(used: &mut HashSet<String>) -> String {
    loop {
        let name = random_task_name();
        if used.insert(name.clone()) {
            return name;
        }
    }
}

fn random_task_name() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| TASK_NAME_CHARSET[rng.gen_range(0..TASK_NAME_CHARSET.len())] as char)
        .collect();
    format!("Task_{}", suffix)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
