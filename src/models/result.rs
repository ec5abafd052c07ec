//! 任务结果分类
//!
//! 业务状态（BusinessStatus）描述"页面上看到了什么"，
//! 结果分类（ResultKind）决定统计口径和是否允许重试。

use std::fmt;

use serde::Serialize;

/// 订阅成功时写入结果文件的标记
pub const SUBSCRIBED_MARKER: &str = "已订阅";

/// 任务最终结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Success,
    Failed,
    LoginFailed,
    NeedsVerify,
    Crashed,
    Other,
    #[default]
    Unknown,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Success => "success",
            ResultKind::Failed => "failed",
            ResultKind::LoginFailed => "login_failed",
            ResultKind::NeedsVerify => "needs_verify",
            ResultKind::Crashed => "crashed",
            ResultKind::Other => "other",
            ResultKind::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "success" => ResultKind::Success,
            "failed" => ResultKind::Failed,
            "login_failed" => ResultKind::LoginFailed,
            "needs_verify" => ResultKind::NeedsVerify,
            "crashed" => ResultKind::Crashed,
            "other" => ResultKind::Other,
            _ => ResultKind::Unknown,
        }
    }

    /// 面向展示的结果文本
    ///
    /// 重试筛选只认 `失败` 前缀：需验证的账号重新提交会产生重复的验证请求，崩溃由人工确认。
    pub fn display_text(&self, business_status: &str) -> String {
        let or = |fallback: &str| {
            if business_status.is_empty() {
                fallback.to_string()
            } else {
                business_status.to_string()
            }
        };
        match self {
            ResultKind::Success => format!("成功 | {}", or(SUBSCRIBED_MARKER)),
            ResultKind::Failed => format!("失败 | {}", or("业务失败")),
            ResultKind::LoginFailed => "失败 | 登录失败".to_string(),
            ResultKind::NeedsVerify => format!("需验证 | {}", or("需验证")),
            ResultKind::Crashed => "崩溃 | 线程异常".to_string(),
            ResultKind::Other if business_status.is_empty() => "其他".to_string(),
            ResultKind::Other => format!("其他 | {}", business_status),
            ResultKind::Unknown => business_status.to_string(),
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 业务状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusinessStatus {
    /// 已订阅
    Subscribed,
    /// 已认证但未订阅，需要支付
    CertifiedUnsubscribed,
    /// 未订阅，需要外部验证
    NeedsVerification,
    /// 支付失败
    PaymentFailed(String),
    /// 订阅检测失败
    CheckFailed(String),
    /// 登录失败
    LoginFailed,
    /// 页面状态无法识别
    Unknown,
    /// 未分类的异常
    Crashed(String),
}

impl BusinessStatus {
    pub fn result_kind(&self) -> ResultKind {
        match self {
            BusinessStatus::Subscribed => ResultKind::Success,
            BusinessStatus::NeedsVerification => ResultKind::NeedsVerify,
            BusinessStatus::PaymentFailed(_) | BusinessStatus::CheckFailed(_) => ResultKind::Failed,
            BusinessStatus::LoginFailed => ResultKind::LoginFailed,
            BusinessStatus::Crashed(_) => ResultKind::Crashed,
            BusinessStatus::CertifiedUnsubscribed | BusinessStatus::Unknown => ResultKind::Other,
        }
    }
}

impl fmt::Display for BusinessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusinessStatus::Subscribed => f.write_str(SUBSCRIBED_MARKER),
            BusinessStatus::CertifiedUnsubscribed => f.write_str("已认证/未订阅"),
            BusinessStatus::NeedsVerification => f.write_str("未订阅 (需验证)"),
            BusinessStatus::PaymentFailed(reason) => write!(f, "支付失败 ({})", reason),
            BusinessStatus::CheckFailed(reason) => write!(f, "订阅检测失败 ({})", reason),
            BusinessStatus::LoginFailed => f.write_str("登录失败"),
            BusinessStatus::Unknown => f.write_str("未知状态"),
            BusinessStatus::Crashed(reason) => write!(f, "任务崩溃 ({})", reason),
        }
    }
}

/// 写入结果文件的单条记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResult {
    pub email: String,
    pub status: BusinessStatus,
    pub link: String,
}

impl SubscriptionResult {
    pub fn new(email: impl Into<String>, status: BusinessStatus, link: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            status,
            link: link.into(),
        }
    }

    /// 结果文件中的一行（不含换行符）
    ///
    /// - 已订阅: `email----已订阅`
    /// - 带链接: `email__link`
    /// - 其他:   `email----状态文本`
    pub fn to_line(&self) -> String {
        if self.status == BusinessStatus::Subscribed {
            format!("{}----{}", self.email, SUBSCRIBED_MARKER)
        } else if self.link.contains("http") {
            format!("{}__{}", self.email, self.link)
        } else {
            format!("{}----{}", self.email, self.status)
        }
    }
}

/// 单个任务的结构化结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub result_kind: ResultKind,
    pub business_status: String,
    pub detail: String,
    pub link: String,
    pub login_success: bool,
}

impl TaskSummary {
    pub fn from_status(status: &BusinessStatus, detail: impl Into<String>, link: impl Into<String>, login_success: bool) -> Self {
        Self {
            result_kind: status.result_kind(),
            business_status: status.to_string(),
            detail: detail.into(),
            link: link.into(),
            login_success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_to_kind_mapping() {
        assert_eq!(BusinessStatus::Subscribed.result_kind(), ResultKind::Success);
        assert_eq!(BusinessStatus::PaymentFailed("x".into()).result_kind(), ResultKind::Failed);
        assert_eq!(BusinessStatus::CheckFailed("x".into()).result_kind(), ResultKind::Failed);
        assert_eq!(BusinessStatus::LoginFailed.result_kind(), ResultKind::LoginFailed);
        assert_eq!(BusinessStatus::NeedsVerification.result_kind(), ResultKind::NeedsVerify);
        assert_eq!(BusinessStatus::Crashed("x".into()).result_kind(), ResultKind::Crashed);
        assert_eq!(BusinessStatus::Unknown.result_kind(), ResultKind::Other);
    }

    #[test]
    fn test_result_lines() {
        let subscribed = SubscriptionResult::new("a@x.com", BusinessStatus::Subscribed, "https://ignored");
        assert_eq!(subscribed.to_line(), "a@x.com----已订阅");

        let verify = SubscriptionResult::new(
            "b@x.com",
            BusinessStatus::NeedsVerification,
            "https://services.sheerid.com/verify/abc/?verificationId=1",
        );
        assert_eq!(verify.to_line(), "b@x.com__https://services.sheerid.com/verify/abc/?verificationId=1");

        let failed = SubscriptionResult::new("c@x.com", BusinessStatus::PaymentFailed("卡被拒".into()), "");
        assert_eq!(failed.to_line(), "c@x.com----支付失败 (卡被拒)");
    }

    #[test]
    fn test_display_text_prefixes() {
        assert_eq!(ResultKind::Success.display_text(""), "成功 | 已订阅");
        assert_eq!(ResultKind::LoginFailed.display_text("whatever"), "失败 | 登录失败");
        assert!(ResultKind::Failed.display_text("支付失败 (x)").starts_with("失败"));
        assert!(ResultKind::NeedsVerify.display_text("").starts_with("需验证"));
        assert_eq!(ResultKind::Other.display_text(""), "其他");
        assert_eq!(ResultKind::parse("needs_verify"), ResultKind::NeedsVerify);
    }
}
