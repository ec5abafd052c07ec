//! 基于 chromiumoxide 的页面操作
//!
//! 页面结构随时会变，这里的选择器和等待时间都是尽力而为。
//! 元素没出现返回业务结果（`Rejected` / `Unknown`），浏览器报错才返回 `Err`。

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Element, Page};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::probe::{self, Locator, Probe};
use crate::browser::ChromeSession;
use crate::config::Config;
use crate::error::{AppError, AppResult, WorkflowError};
use crate::models::{Account, PaymentInfo};
use crate::workflow::steps::{
    has_empty_verification_id, EntitlementProbe, LoginOutcome, PaymentOutcome, SubscriptionSteps,
};

const XPATH_SUBSCRIBED: &str =
    "//*[contains(text(), \"You're already subscribed\")] | //a[@aria-label='Manage plan']";
const XPATH_CERTIFIED: &str = "//*[contains(text(), 'Get student offer')]";
const XPATH_VERIFY: &str = "//a[contains(@href, 'sheerid')] | //a[contains(@aria-label, 'Verify')] | //a[contains(@aria-label, '验证')] | //*[contains(text(), 'Verify')]";
const XPATH_SKIP_PROMO: &str = "//*[text()='Not now' or text()='暂不' or text()='以后再说']";
const XPATH_ADD_CARD: [&str; 3] = [
    "//*[contains(text(), 'Add card')]",
    "//*[contains(text(), 'Add credit or debit card')]",
    "//*[contains(text(), '添加卡')]",
];

const CSS_EMAIL: &str = "#identifierId";
const CSS_EMAIL_NEXT: &str = "#identifierNext";
const CSS_PASSWORD: &str = "input[name='Passwd']";
const CSS_PASSWORD_NEXT: &str = "#passwordNext";
const CSS_TOTP: &str = "input[type='tel'], input[id='totpPin']";

/// 各步骤的等待时间
#[derive(Debug, Clone)]
pub struct StepTimings {
    pub element_wait: Duration,
    pub page_settle: Duration,
    pub short_pause: Duration,
    pub save_redirect: Duration,
    pub subscribe_process: Duration,
}

impl Default for StepTimings {
    fn default() -> Self {
        Self {
            element_wait: Duration::from_secs(15),
            page_settle: Duration::from_secs(8),
            short_pause: Duration::from_millis(500),
            save_redirect: Duration::from_secs(10),
            subscribe_process: Duration::from_secs(15),
        }
    }
}

/// Google 登录 + Google One 订阅检测 + 支付
pub struct ChromeSteps {
    login_url: String,
    entitlement_url: String,
    timings: StepTimings,
}

impl ChromeSteps {
    pub fn new(config: &Config) -> Self {
        Self {
            login_url: config.login_url.clone(),
            entitlement_url: config.entitlement_url.clone(),
            timings: StepTimings::default(),
        }
    }

    pub fn timings(mut self, timings: StepTimings) -> Self {
        self.timings = timings;
        self
    }

    async fn probe_entitlement(&self, page: &Page) -> AppResult<EntitlementProbe> {
        if !probe::find_all(page, Locator::XPath(XPATH_SUBSCRIBED)).await?.is_empty() {
            return Ok(EntitlementProbe::Subscribed);
        }
        if !probe::find_all(page, Locator::XPath(XPATH_CERTIFIED)).await?.is_empty() {
            return Ok(EntitlementProbe::CertifiedUnsubscribed);
        }

        let buttons = probe::find_all(page, Locator::XPath(XPATH_VERIFY)).await?;
        if buttons.is_empty() {
            return Ok(EntitlementProbe::Unknown);
        }

        let link = first_href(&buttons).await?.unwrap_or_default();
        if has_empty_verification_id(&link) {
            return Ok(EntitlementProbe::InvalidLink);
        }
        Ok(EntitlementProbe::NeedsVerify { link })
    }

    /// 向当前焦点元素输入文本
    async fn type_focused(&self, page: &Page, text: &str) -> AppResult<()> {
        focused(page)
            .await?
            .type_str(text)
            .await
            .map_err(|e| AppError::page_failed("输入", e))?;
        sleep(self.timings.short_pause).await;
        Ok(())
    }

    /// 在当前焦点元素上按键若干次
    async fn press(&self, page: &Page, key: &str, times: usize) -> AppResult<()> {
        for _ in 0..times {
            focused(page)
                .await?
                .press_key(key)
                .await
                .map_err(|e| AppError::page_failed(format!("按键 {}", key), e))?;
            sleep(self.timings.short_pause).await;
        }
        Ok(())
    }

    async fn fill_card_form(&self, page: &Page, payment: &PaymentInfo) -> AppResult<()> {
        let card = &payment.card;
        let exp = format!("{:0>2}/{}", card.exp_month, last_two(&card.exp_year));

        self.type_focused(page, &card.pan).await?;
        self.press(page, "Tab", 1).await?;
        self.type_focused(page, &exp).await?;
        self.type_focused(page, &card.cvv).await?;
        self.press(page, "Tab", 1).await?;
        self.type_focused(page, &payment.name).await?;
        self.press(page, "Tab", 2).await?;
        self.type_focused(page, &payment.zip_code).await?;
        Ok(())
    }

    async fn pay_inner(&self, page: &Page, payment: &PaymentInfo) -> AppResult<PaymentOutcome> {
        probe::wait_and_click(page, Locator::XPath(XPATH_CERTIFIED), self.timings.element_wait)
            .await?
            .require("Get student offer")?;
        sleep(self.timings.page_settle).await;

        let mut add_clicked = false;
        for xpath in XPATH_ADD_CARD {
            if probe::wait_and_click(page, Locator::XPath(xpath), Duration::from_secs(2))
                .await?
                .is_found()
            {
                add_clicked = true;
                break;
            }
        }
        if !add_clicked {
            warn!("未找到 Add card (可能已直接显示表单或网络延迟)");
        }
        sleep(self.timings.short_pause * 4).await;

        self.fill_card_form(page, payment).await?;

        info!("-> 保存卡片...");
        self.press(page, "Tab", 3).await?;
        self.press(page, "Enter", 1).await?;
        sleep(self.timings.save_redirect).await;

        info!("-> 点击订阅...");
        self.press(page, "Tab", 5).await?;
        self.press(page, "Enter", 1).await?;
        sleep(self.timings.subscribe_process).await;

        info!("🔄 最终校验...");
        reload(page).await?;
        sleep(self.timings.page_settle).await;
        match self.probe_entitlement(page).await? {
            EntitlementProbe::Subscribed => {
                info!("🎉 支付并订阅成功！");
                Ok(PaymentOutcome::Paid)
            }
            other => Ok(PaymentOutcome::Declined(format!(
                "流程走完但状态为: {}",
                probe_label(&other)
            ))),
        }
    }
}

#[async_trait]
impl SubscriptionSteps<ChromeSession> for ChromeSteps {
    async fn login(&self, session: &ChromeSession, account: &Account) -> AppResult<LoginOutcome> {
        let page = session.page();
        info!("正在执行登录流程: {}", account.email);

        page.goto(self.login_url.as_str())
            .await
            .map_err(|e| AppError::page_failed("打开登录页", e))?;

        let wait = self.timings.element_wait;
        if let Probe::NotFound = probe::wait_and_type(page, Locator::Css(CSS_EMAIL), &account.email, wait).await? {
            return Ok(LoginOutcome::Rejected("未找到账号输入框".into()));
        }
        probe::wait_and_click(page, Locator::Css(CSS_EMAIL_NEXT), wait).await?;
        sleep(self.timings.short_pause * 2).await;

        if let Probe::NotFound =
            probe::wait_and_type(page, Locator::Css(CSS_PASSWORD), &account.password, wait).await?
        {
            return Ok(LoginOutcome::Rejected("未进入密码页（账号不存在或触发人机验证）".into()));
        }
        probe::wait_and_click(page, Locator::Css(CSS_PASSWORD_NEXT), wait).await?;

        debug!("检测 2FA 验证...");
        if probe::wait_for(page, Locator::Css(CSS_TOTP), Duration::from_secs(8))
            .await?
            .is_found()
        {
            return Ok(LoginOutcome::Rejected("需要两步验证码".into()));
        }

        if probe::wait_and_click(page, Locator::XPath(XPATH_SKIP_PROMO), Duration::from_secs(5))
            .await?
            .is_found()
        {
            info!("发现推广弹窗，已跳过");
            sleep(self.timings.short_pause * 8).await;
        }

        sleep(self.timings.short_pause * 8).await;
        let url = session.current_url().await?;
        if login_landed(&url) {
            info!("登录成功");
            Ok(LoginOutcome::LoggedIn)
        } else {
            let shown: String = url.chars().take(50).collect();
            Ok(LoginOutcome::Rejected(format!("登录后停留页面未识别: {}", shown)))
        }
    }

    async fn check_entitlement(&self, session: &ChromeSession, attempt: u32) -> AppResult<EntitlementProbe> {
        let page = session.page();
        info!("正在检测订阅状态 (尝试次数: {})...", attempt + 1);

        if attempt > 0 {
            info!("正在刷新页面重试...");
            reload(page).await?;
        } else {
            page.goto(self.entitlement_url.as_str())
                .await
                .map_err(|e| AppError::page_failed("打开订阅页", e))?;
        }
        sleep(self.timings.page_settle).await;

        self.probe_entitlement(page).await.map_err(|e| {
            AppError::Workflow(WorkflowError::SubscriptionCheck(format!("订阅状态检测失败: {}", e)))
        })
    }

    async fn pay(&self, session: &ChromeSession, payment: &PaymentInfo) -> AppResult<PaymentOutcome> {
        info!("💳 开始处理支付页面...");
        self.pay_inner(session.page(), payment).await.map_err(|e| {
            let message: String = e.to_string().chars().take(100).collect();
            AppError::Workflow(WorkflowError::Payment(format!("填表/订阅异常: {}", message)))
        })
    }
}

// ========== 页面辅助函数 ==========

async fn focused(page: &Page) -> AppResult<Element> {
    page.find_element(":focus")
        .await
        .map_err(|e| AppError::page_failed("获取焦点元素", e))
}

async fn reload(page: &Page) -> AppResult<()> {
    page.reload()
        .await
        .map_err(|e| AppError::page_failed("刷新页面", e))?;
    Ok(())
}

/// 按钮自身或其父节点上的第一个 http 链接
async fn first_href(buttons: &[Element]) -> AppResult<Option<String>> {
    for button in buttons {
        let href = button
            .attribute("href")
            .await
            .map_err(|e| AppError::page_failed("读取 href", e))?;
        if let Some(href) = href.filter(|h| h.contains("http")) {
            return Ok(Some(href));
        }
    }

    if let Some(first) = buttons.first() {
        let parent_href = first
            .call_js_fn("function() { return this.parentElement ? this.parentElement.href : null; }", false)
            .await
            .map_err(|e| AppError::page_failed("读取父节点 href", e))?;
        if let Some(serde_json::Value::String(href)) = parent_href.result.value {
            if href.contains("http") {
                return Ok(Some(href));
            }
        }
    }
    Ok(None)
}

/// 登录后的地址是否已经离开登录/验证页
pub fn login_landed(url: &str) -> bool {
    if url.contains("myaccount.google.com") {
        return true;
    }
    url.contains("google.com") && !url.contains("/signin") && !url.contains("/challenge")
}

fn last_two(year: &str) -> &str {
    let start = year.len().saturating_sub(2);
    year.get(start..).unwrap_or(year)
}

fn probe_label(probe: &EntitlementProbe) -> &'static str {
    match probe {
        EntitlementProbe::Subscribed => "已订阅",
        EntitlementProbe::CertifiedUnsubscribed => "已认证/未订阅",
        EntitlementProbe::NeedsVerify { .. } | EntitlementProbe::InvalidLink => "未订阅 (需验证)",
        EntitlementProbe::Unknown => "未知状态",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_landed() {
        assert!(login_landed("https://myaccount.google.com/?pli=1"));
        assert!(login_landed("https://www.google.com/"));
        assert!(!login_landed("https://accounts.google.com/v3/signin/challenge/pwd"));
        assert!(!login_landed("about:blank"));
    }

    #[test]
    fn test_expiry_formatting_helpers() {
        assert_eq!(last_two("2031"), "31");
        assert_eq!(last_two("30"), "30");
        assert_eq!(format!("{:0>2}/{}", "1", last_two("2031")), "01/31");
    }

    #[tokio::test]
    #[ignore] // 需要本机 Chrome 和真实账号
    async fn test_login_with_real_browser() {
        use crate::browser::ChromeFactory;
        use crate::infrastructure::ResourceRegistry;
        use crate::models::WindowMode;

        let config = Config::default();
        let registry = ResourceRegistry::new(ChromeFactory::new(config.login_url.clone()));
        let handle = registry.acquire("Task_TEST", WindowMode::Visible).await.unwrap();
        let session = handle.session().await.unwrap();

        let steps = ChromeSteps::new(&config);
        let account = Account::new("someone@example.com", "password", "", "");
        let outcome = steps.login(&session, &account).await.unwrap();
        println!("登录结果: {:?}", outcome);

        registry.close(&handle).await;
    }
}
