//! 账号实体

use std::fmt;

/// 账号实体
///
/// 只承载账号的基础数据，解析后在整个批次中保持不变
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    /// 账号邮箱
    pub email: String,
    /// 登录密码
    pub password: String,
    /// 辅助邮箱
    pub recovery_email: String,
    /// 2FA 密钥
    pub totp_secret: String,
}

impl Account {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        recovery_email: impl Into<String>,
        totp_secret: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            recovery_email: recovery_email.into(),
            totp_secret: totp_secret.into(),
        }
    }

    /// 用于重试筛选的规范化邮箱（去空白、小写）
    pub fn normalized_email(&self) -> String {
        normalize_email(&self.email)
    }
}

/// 规范化邮箱
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// 密码和密钥不进入日志
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("email", &self.email)
            .field("recovery_email", &self.recovery_email)
            .finish_non_exhaustive()
    }
}
