//! 单账号订阅流程 - 流程层
//!
//! 核心职责：定义"一个账号"从启动浏览器到得出结果的完整状态机
//!
//! ```text
//! Acquiring → LoggingIn ─┬─ 登录失败 ─────────────────────────────→ LoginFailed
//!                        └─ CheckingEntitlement ─┬─ 已订阅 ───────────→ Subscribed
//!                                                ├─ 需验证 ───────────→ NeedsVerification
//!                                                ├─ 链接无效 → 刷新重试（最多 3 次）
//!                                                ├─ 检测异常 ─────────→ CheckFailed
//!                                                └─ 已认证/未订阅 → Paying ─┬─ Subscribed
//!                                                                          └─ PaymentFailed
//! 任意阶段未分类的错误或 panic ───────────────────────────────────────→ Crashed
//! ```
//!
//! 不论从哪个分支结束，浏览器都只关闭一次。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::error::{AppError, DataError};
use crate::infrastructure::{ResourceFactory, ResourceHandle, ResourceRegistry};
use crate::models::{Account, BusinessStatus, SubscriptionResult, TaskSummary, WindowMode};
use crate::orchestrator::events::{ControllerEvent, EventBus};
use crate::services::{OutputSink, PaymentDataProvider};
use crate::workflow::steps::{
    has_empty_verification_id, EntitlementProbe, LoginOutcome, PaymentOutcome, SubscriptionSteps,
};

/// 链接无效时的最大额外重试次数
pub const MAX_CHECK_RETRIES: u32 = 3;

/// 重试耗尽后的失败原因
pub const LINK_RETRY_EXHAUSTED: &str = "获取失败: 链接ID为空且重试无效";

const PAYMENT_DATA_INCOMPLETE: &str = "本地数据不完整";

/// 流程中间状态
#[derive(Debug)]
enum TaskState {
    LoggingIn,
    CheckingEntitlement { attempt: u32 },
    Paying,
    Finished(Terminal),
}

/// 终止状态
#[derive(Debug)]
struct Terminal {
    status: BusinessStatus,
    link: String,
    detail: String,
}

impl Terminal {
    fn new(status: BusinessStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            link: String::new(),
            detail: detail.into(),
        }
    }
}

/// 单个账号的流程执行器
///
/// - 向登记表申请浏览器，结束时归还
/// - 只通过 `SubscriptionSteps` 操作页面
/// - 结果写入 `OutputSink`，进度发往 `EventBus`
pub struct WorkflowExecutor<F: ResourceFactory, St> {
    registry: Arc<ResourceRegistry<F>>,
    steps: Arc<St>,
    payments: Arc<PaymentDataProvider>,
    output: Arc<OutputSink>,
    events: EventBus,
}

impl<F: ResourceFactory, St> Clone for WorkflowExecutor<F, St> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            steps: Arc::clone(&self.steps),
            payments: Arc::clone(&self.payments),
            output: Arc::clone(&self.output),
            events: self.events.clone(),
        }
    }
}

impl<F, St> WorkflowExecutor<F, St>
where
    F: ResourceFactory,
    St: SubscriptionSteps<F::Session>,
{
    pub fn new(
        registry: Arc<ResourceRegistry<F>>,
        steps: Arc<St>,
        payments: Arc<PaymentDataProvider>,
        output: Arc<OutputSink>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            steps,
            payments,
            output,
            events,
        }
    }

    /// 执行一个账号的完整流程，总是返回一个分类结果
    pub async fn run(&self, task_name: &str, account: &Account, mode: WindowMode) -> TaskSummary {
        info!("[{}] 开始处理账号: {}", task_name, account.email);
        self.progress(task_name, account, "启动浏览器", mode.as_str());

        let handle = match self.registry.acquire(task_name, mode).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("[{}] 💥 浏览器启动失败: {}", task_name, e);
                let summary = TaskSummary::from_status(
                    &BusinessStatus::Crashed(short(&e.to_string(), 120)),
                    e.to_string(),
                    "",
                    false,
                );
                self.business_result(task_name, account, &summary);
                return summary;
            }
        };

        let driven = AssertUnwindSafe(self.drive(task_name, account, &handle))
            .catch_unwind()
            .await;
        self.registry.close(&handle).await;

        let (terminal, login_success) = match driven {
            Ok(result) => result,
            Err(_) => {
                error!("[{}] 💥 流程发生 panic", task_name);
                (Terminal::new(BusinessStatus::Crashed("panic".into()), "流程发生 panic"), false)
            }
        };

        let mut detail = terminal.detail;
        if login_success {
            let record = SubscriptionResult::new(&account.email, terminal.status.clone(), &terminal.link);
            if let Err(e) = self.output.save(&record).await {
                error!("[{}] 结果写入失败: {}", task_name, e);
                detail = format!("{}；结果写入失败: {}", detail, e);
            }
        } else {
            info!("[{}] ❌ 登录流程失败或中断，跳过结果写入", task_name);
        }

        let summary = TaskSummary::from_status(&terminal.status, detail, terminal.link, login_success);
        info!(
            "[{}] ✨ 任务结果 -> {} ({})",
            task_name, summary.business_status, summary.result_kind
        );
        self.business_result(task_name, account, &summary);
        summary
    }

    async fn drive(
        &self,
        task_name: &str,
        account: &Account,
        handle: &ResourceHandle<F::Session>,
    ) -> (Terminal, bool) {
        let session = match handle.session().await {
            Ok(session) => session,
            Err(e) => return (Terminal::new(BusinessStatus::Crashed(e.to_string()), e.to_string()), false),
        };

        let mut login_success = false;
        let mut state = TaskState::LoggingIn;

        loop {
            state = match state {
                TaskState::LoggingIn => {
                    self.progress(task_name, account, "登录", "");
                    match self.steps.login(&session, account).await {
                        Ok(LoginOutcome::LoggedIn) => {
                            login_success = true;
                            info!("[{}] ✓ 登录成功", task_name);
                            TaskState::CheckingEntitlement { attempt: 0 }
                        }
                        Ok(LoginOutcome::Rejected(reason)) => {
                            warn!("[{}] ❌ 登录失败: {}", task_name, reason);
                            TaskState::Finished(Terminal::new(BusinessStatus::LoginFailed, reason))
                        }
                        Err(e) => {
                            error!("[{}] 💥 登录过程异常: {}", task_name, e);
                            TaskState::Finished(Terminal::new(
                                BusinessStatus::Crashed(short(&e.to_string(), 120)),
                                e.to_string(),
                            ))
                        }
                    }
                }

                TaskState::CheckingEntitlement { attempt } => {
                    self.progress(
                        task_name,
                        account,
                        "订阅检测",
                        &format!("第 {} 次", attempt + 1),
                    );
                    self.check(task_name, &session, attempt).await
                }

                TaskState::Paying => {
                    self.progress(task_name, account, "支付", "");
                    TaskState::Finished(self.pay(task_name, &session).await)
                }

                TaskState::Finished(terminal) => return (terminal, login_success),
            };
        }
    }

    async fn check(&self, task_name: &str, session: &F::Session, attempt: u32) -> TaskState {
        let probe = match self.steps.check_entitlement(session, attempt).await {
            Ok(probe) => probe,
            Err(e) => {
                warn!("[{}] ⚠️ 订阅检测失败: {}", task_name, e);
                let reason = short(&e.to_string(), 80);
                return TaskState::Finished(Terminal::new(BusinessStatus::CheckFailed(reason), e.to_string()));
            }
        };

        let probe = match probe {
            EntitlementProbe::NeedsVerify { link } if has_empty_verification_id(&link) => {
                EntitlementProbe::InvalidLink
            }
            other => other,
        };

        match probe {
            EntitlementProbe::Subscribed => {
                TaskState::Finished(Terminal::new(BusinessStatus::Subscribed, "账号已订阅"))
            }
            EntitlementProbe::CertifiedUnsubscribed => {
                info!("[{}] 需要进行支付，正在提取本地支付信息...", task_name);
                TaskState::Paying
            }
            EntitlementProbe::NeedsVerify { link } => {
                let mut terminal = Terminal::new(BusinessStatus::NeedsVerification, "需要学生验证");
                terminal.link = link;
                TaskState::Finished(terminal)
            }
            EntitlementProbe::InvalidLink if attempt < MAX_CHECK_RETRIES => {
                warn!("[{}] 提取到无效链接 (ID为空)，准备重试...", task_name);
                TaskState::CheckingEntitlement { attempt: attempt + 1 }
            }
            EntitlementProbe::InvalidLink => TaskState::Finished(Terminal::new(
                BusinessStatus::CheckFailed(LINK_RETRY_EXHAUSTED.to_string()),
                LINK_RETRY_EXHAUSTED,
            )),
            EntitlementProbe::Unknown => {
                TaskState::Finished(Terminal::new(BusinessStatus::Unknown, "页面状态无法识别"))
            }
        }
    }

    async fn pay(&self, task_name: &str, session: &F::Session) -> Terminal {
        let payment = match self.payments.next() {
            Ok(payment) => payment,
            Err(AppError::Data(DataError::Incomplete)) => {
                warn!("[{}] ⚠️ {}", task_name, DataError::Incomplete);
                return Terminal::new(
                    BusinessStatus::PaymentFailed(PAYMENT_DATA_INCOMPLETE.to_string()),
                    DataError::Incomplete.to_string(),
                );
            }
            Err(e) => {
                warn!("[{}] ⚠️ 获取支付信息失败: {}", task_name, e);
                return Terminal::new(BusinessStatus::PaymentFailed(short(&e.to_string(), 100)), e.to_string());
            }
        };
        info!("[{}] 使用信用卡 ****{} 进行支付", task_name, payment.card.last4());

        match self.steps.pay(session, &payment).await {
            Ok(PaymentOutcome::Paid) => Terminal::new(BusinessStatus::Subscribed, "支付成功"),
            Ok(PaymentOutcome::Declined(message)) => {
                warn!("[{}] ⚠️ 支付未成功: {}", task_name, message);
                Terminal::new(BusinessStatus::PaymentFailed(message.clone()), message)
            }
            Err(e) => {
                warn!("[{}] ⚠️ 支付过程异常: {}", task_name, e);
                Terminal::new(BusinessStatus::PaymentFailed(short(&e.to_string(), 100)), e.to_string())
            }
        }
    }

    // ========== 事件辅助函数 ==========

    fn progress(&self, task_name: &str, account: &Account, stage: &str, detail: &str) {
        self.events.emit(ControllerEvent::TaskProgress {
            task_name: task_name.to_string(),
            email: account.email.clone(),
            stage: stage.to_string(),
            detail: detail.to_string(),
        });
    }

    fn business_result(&self, task_name: &str, account: &Account, summary: &TaskSummary) {
        self.events.emit(ControllerEvent::TaskBusinessResult {
            task_name: task_name.to_string(),
            email: account.email.clone(),
            summary: summary.clone(),
        });
    }
}

/// 按字符截断
fn short(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppResult, WorkflowError};
    use crate::infrastructure::{LaunchSpec, Session};
    use crate::models::{PaymentCard, PaymentInfo, ResultKind};
    use crate::services::PaymentPools;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeSession;

    #[async_trait]
    impl Session for FakeSession {
        async fn terminate(&self) -> AppResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        fail: bool,
    }

    #[async_trait]
    impl ResourceFactory for FakeFactory {
        type Session = FakeSession;

        async fn create(&self, _spec: &LaunchSpec) -> AppResult<FakeSession> {
            if self.fail {
                return Err(AppError::Other("chrome not found".into()));
            }
            Ok(FakeSession)
        }
    }

    /// 按脚本返回探测结果
    struct ScriptedSteps {
        login: LoginOutcome,
        probes: Mutex<Vec<EntitlementProbe>>,
        payment: PaymentOutcome,
        check_calls: AtomicU32,
        pay_calls: AtomicU32,
        panic_on_pay: bool,
    }

    impl ScriptedSteps {
        fn new(login: LoginOutcome, probes: Vec<EntitlementProbe>, payment: PaymentOutcome) -> Self {
            Self {
                login,
                probes: Mutex::new(probes),
                payment,
                check_calls: AtomicU32::new(0),
                pay_calls: AtomicU32::new(0),
                panic_on_pay: false,
            }
        }
    }

    #[async_trait]
    impl SubscriptionSteps<FakeSession> for ScriptedSteps {
        async fn login(&self, _session: &FakeSession, _account: &Account) -> AppResult<LoginOutcome> {
            Ok(self.login.clone())
        }

        async fn check_entitlement(&self, _session: &FakeSession, attempt: u32) -> AppResult<EntitlementProbe> {
            assert_eq!(attempt, self.check_calls.fetch_add(1, Ordering::SeqCst));
            let mut probes = self.probes.lock().unwrap();
            if probes.is_empty() {
                return Err(WorkflowError::SubscriptionCheck("页面加载超时".into()).into());
            }
            Ok(probes.remove(0))
        }

        async fn pay(&self, _session: &FakeSession, payment: &PaymentInfo) -> AppResult<PaymentOutcome> {
            self.pay_calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_pay {
                panic!("pay exploded");
            }
            assert_eq!(payment.card.pan, "4111111111111111");
            Ok(self.payment.clone())
        }
    }

    struct Fixture {
        _dir: TempDir,
        registry: Arc<ResourceRegistry<FakeFactory>>,
        output: Arc<OutputSink>,
        executor: WorkflowExecutor<FakeFactory, ScriptedSteps>,
        steps: Arc<ScriptedSteps>,
    }

    fn fixture(factory: FakeFactory, steps: ScriptedSteps, with_cards: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(
            ResourceRegistry::new(factory)
                .profile_root(dir.path())
                .close_grace(std::time::Duration::ZERO),
        );
        let cards = if with_cards {
            vec![PaymentCard {
                pan: "4111111111111111".into(),
                cvv: "123".into(),
                exp_month: "10".into(),
                exp_year: "30".into(),
            }]
        } else {
            vec![]
        };
        let payments = Arc::new(PaymentDataProvider::from_pools(PaymentPools {
            cards,
            names: vec!["Alice".into()],
            zip_codes: vec!["10001".into()],
        }));
        let output = Arc::new(OutputSink::new(dir.path().join("output")));
        let steps = Arc::new(steps);
        let executor = WorkflowExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&steps),
            payments,
            Arc::clone(&output),
            EventBus::new(),
        );
        Fixture {
            _dir: dir,
            registry,
            output,
            executor,
            steps,
        }
    }

    fn account() -> Account {
        Account::new("a@x.com", "pw", "r@x.com", "SECRET")
    }

    async fn output_lines(output: &OutputSink) -> Vec<String> {
        match output.current_file().await {
            Some(path) => std::fs::read_to_string(path)
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect(),
            None => vec![],
        }
    }

    #[tokio::test]
    async fn test_already_subscribed() {
        let fx = fixture(
            FakeFactory::default(),
            ScriptedSteps::new(LoginOutcome::LoggedIn, vec![EntitlementProbe::Subscribed], PaymentOutcome::Paid),
            true,
        );
        let summary = fx.executor.run("Task_T1", &account(), WindowMode::Headless).await;
        assert_eq!(summary.result_kind, ResultKind::Success);
        assert!(summary.login_success);
        assert_eq!(fx.steps.pay_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.registry.active_count(), 0);
        assert_eq!(output_lines(&fx.output).await, vec!["a@x.com----已订阅"]);
    }

    #[tokio::test]
    async fn test_certified_then_paid() {
        let fx = fixture(
            FakeFactory::default(),
            ScriptedSteps::new(
                LoginOutcome::LoggedIn,
                vec![EntitlementProbe::CertifiedUnsubscribed],
                PaymentOutcome::Paid,
            ),
            true,
        );
        let summary = fx.executor.run("Task_T2", &account(), WindowMode::Headless).await;
        assert_eq!(summary.result_kind, ResultKind::Success);
        assert_eq!(fx.steps.pay_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_payment_declined_and_incomplete_data() {
        let fx = fixture(
            FakeFactory::default(),
            ScriptedSteps::new(
                LoginOutcome::LoggedIn,
                vec![EntitlementProbe::CertifiedUnsubscribed],
                PaymentOutcome::Declined("卡被拒绝".into()),
            ),
            true,
        );
        let summary = fx.executor.run("Task_T3", &account(), WindowMode::Headless).await;
        assert_eq!(summary.result_kind, ResultKind::Failed);
        assert_eq!(summary.business_status, "支付失败 (卡被拒绝)");

        let fx = fixture(
            FakeFactory::default(),
            ScriptedSteps::new(
                LoginOutcome::LoggedIn,
                vec![EntitlementProbe::CertifiedUnsubscribed],
                PaymentOutcome::Paid,
            ),
            false,
        );
        let summary = fx.executor.run("Task_T4", &account(), WindowMode::Headless).await;
        assert_eq!(summary.result_kind, ResultKind::Failed);
        assert_eq!(summary.business_status, "支付失败 (本地数据不完整)");
        assert_eq!(fx.steps.pay_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_failure_skips_payment_and_output() {
        let fx = fixture(
            FakeFactory::default(),
            ScriptedSteps::new(
                LoginOutcome::Rejected("密码错误".into()),
                vec![EntitlementProbe::CertifiedUnsubscribed],
                PaymentOutcome::Paid,
            ),
            true,
        );
        let summary = fx.executor.run("Task_T5", &account(), WindowMode::Headless).await;
        assert_eq!(summary.result_kind, ResultKind::LoginFailed);
        assert!(!summary.login_success);
        assert_eq!(fx.steps.check_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.steps.pay_calls.load(Ordering::SeqCst), 0);
        assert!(output_lines(&fx.output).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_link_retries_then_succeeds() {
        let empty = "https://services.sheerid.com/verify/67c8/?verificationId=".to_string();
        let good = "https://services.sheerid.com/verify/67c8/?verificationId=699c".to_string();
        let fx = fixture(
            FakeFactory::default(),
            ScriptedSteps::new(
                LoginOutcome::LoggedIn,
                vec![
                    EntitlementProbe::NeedsVerify { link: empty },
                    EntitlementProbe::InvalidLink,
                    EntitlementProbe::NeedsVerify { link: good.clone() },
                ],
                PaymentOutcome::Paid,
            ),
            true,
        );
        let summary = fx.executor.run("Task_T6", &account(), WindowMode::Headless).await;
        assert_eq!(summary.result_kind, ResultKind::NeedsVerify);
        assert_eq!(summary.link, good);
        assert_eq!(fx.steps.check_calls.load(Ordering::SeqCst), 3);
        assert_eq!(output_lines(&fx.output).await, vec![format!("a@x.com__{}", good)]);
    }

    #[tokio::test]
    async fn test_invalid_link_retry_is_bounded() {
        let fx = fixture(
            FakeFactory::default(),
            ScriptedSteps::new(
                LoginOutcome::LoggedIn,
                vec![EntitlementProbe::InvalidLink; 10],
                PaymentOutcome::Paid,
            ),
            true,
        );
        let summary = fx.executor.run("Task_T7", &account(), WindowMode::Headless).await;
        assert_eq!(fx.steps.check_calls.load(Ordering::SeqCst), MAX_CHECK_RETRIES + 1);
        assert_eq!(summary.result_kind, ResultKind::Failed);
        assert!(summary.business_status.contains(LINK_RETRY_EXHAUSTED));
    }

    #[tokio::test]
    async fn test_check_error_is_failed() {
        let fx = fixture(
            FakeFactory::default(),
            ScriptedSteps::new(LoginOutcome::LoggedIn, vec![], PaymentOutcome::Paid),
            true,
        );
        let summary = fx.executor.run("Task_T8", &account(), WindowMode::Headless).await;
        assert_eq!(summary.result_kind, ResultKind::Failed);
        assert!(summary.business_status.starts_with("订阅检测失败"));
    }

    #[tokio::test]
    async fn test_acquire_failure_is_crashed() {
        let fx = fixture(
            FakeFactory { fail: true },
            ScriptedSteps::new(LoginOutcome::LoggedIn, vec![], PaymentOutcome::Paid),
            true,
        );
        let summary = fx.executor.run("Task_T9", &account(), WindowMode::Headless).await;
        assert_eq!(summary.result_kind, ResultKind::Crashed);
        assert_eq!(fx.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_crashed_and_browser_released() {
        let mut steps = ScriptedSteps::new(
            LoginOutcome::LoggedIn,
            vec![EntitlementProbe::CertifiedUnsubscribed],
            PaymentOutcome::Paid,
        );
        steps.panic_on_pay = true;
        let fx = fixture(FakeFactory::default(), steps, true);

        let summary = fx.executor.run("Task_TA", &account(), WindowMode::Headless).await;
        assert_eq!(summary.result_kind, ResultKind::Crashed);
        assert_eq!(fx.registry.active_count(), 0);
    }
}
