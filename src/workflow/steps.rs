//! 任务流程依赖的三个页面操作
//!
//! 流程层只通过这个 trait 调用页面能力，元素定位、点击顺序都在实现方内部。

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{Account, PaymentInfo};

/// 登录结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn,
    /// 登录被页面拒绝或中断（密码错误、需要人机验证等）
    Rejected(String),
}

/// 订阅页面探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementProbe {
    /// 已订阅
    Subscribed,
    /// 已通过学生认证但尚未订阅，可以直接支付
    CertifiedUnsubscribed,
    /// 需要学生验证，附带提取到的验证链接（可能为空）
    NeedsVerify { link: String },
    /// 提取到的验证链接缺少 verificationId，刷新后可能恢复
    InvalidLink,
    /// 页面上没有任何可识别的标记
    Unknown,
}

/// 支付结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Declined(String),
}

/// 单个账号流程中的页面操作
#[async_trait]
pub trait SubscriptionSteps<S>: Send + Sync + 'static
where
    S: Send + Sync + 'static,
{
    async fn login(&self, session: &S, account: &Account) -> AppResult<LoginOutcome>;

    /// 检测订阅状态；`attempt > 0` 表示重试，实现方应刷新页面而不是重新导航
    async fn check_entitlement(&self, session: &S, attempt: u32) -> AppResult<EntitlementProbe>;

    async fn pay(&self, session: &S, payment: &PaymentInfo) -> AppResult<PaymentOutcome>;
}

/// 验证链接是否带有空的 verificationId
pub fn has_empty_verification_id(link: &str) -> bool {
    if !link.contains("services.sheerid.com/verify") {
        return false;
    }
    match link.rsplit_once("verificationId=") {
        Some((_, id)) => id.trim().is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_verification_id_detection() {
        assert!(has_empty_verification_id(
            "https://services.sheerid.com/verify/67c8/?verificationId="
        ));
        assert!(!has_empty_verification_id(
            "https://services.sheerid.com/verify/67c8/?verificationId=699c"
        ));
        assert!(!has_empty_verification_id("https://services.sheerid.com/verify/67c8/"));
        assert!(!has_empty_verification_id("https://example.com/?verificationId="));
    }
}
