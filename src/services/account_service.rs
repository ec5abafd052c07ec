//! 账号解析

use std::collections::HashSet;

use tracing::warn;

use crate::models::account::normalize_email;
use crate::models::Account;

/// 账号文件字段分隔符
pub const ACCOUNT_SEPARATOR: &str = "----";

/// 将多行账号文本解析为账号列表
///
/// 每行 `邮箱----密码----辅助邮箱----2FA密钥`，字段数不对的行跳过并记录警告
pub fn parse_accounts(raw_text: &str) -> Vec<Account> {
    raw_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(ACCOUNT_SEPARATOR).collect();
            if parts.len() == 4 {
                Some(Account::new(
                    parts[0].trim(),
                    parts[1].trim(),
                    parts[2].trim(),
                    parts[3].trim(),
                ))
            } else {
                warn!("⚠️ 忽略格式错误的账号行: {}", mask_line(line));
                None
            }
        })
        .collect()
}

/// 只保留邮箱在重试集合中的账号（大小写、首尾空白不敏感）
pub fn filter_for_retry(accounts: Vec<Account>, retry_emails: &HashSet<String>) -> Vec<Account> {
    accounts
        .into_iter()
        .filter(|account| retry_emails.contains(&account.normalized_email()))
        .collect()
}

/// 规范化重试邮箱集合，去掉空值
pub fn normalize_retry_set<I, S>(emails: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    emails
        .into_iter()
        .map(|e| normalize_email(e.as_ref()))
        .filter(|e| !e.is_empty())
        .collect()
}

// 只露出第一个字段，避免把密码写进日志
fn mask_line(line: &str) -> String {
    match line.split_once(ACCOUNT_SEPARATOR) {
        Some((first, _)) => format!("{}----***", first),
        None => line.chars().take(40).collect(),
    }
}
