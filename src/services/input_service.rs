//! 输入数据读取 - 业务能力层
//!
//! 只负责"把输入目录里的文件读出来"，不关心调度

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use crate::error::{AppError, AppResult, InputError};
use crate::services::payment_data::{parse_cards, PaymentPools};

pub const ACCOUNT_FILE: &str = "account.txt";
pub const CARD_FILE: &str = "card.txt";
pub const NAME_FILE: &str = "name.txt";
pub const ZIP_FILE: &str = "zip_code.txt";

/// 输入数据来源
#[async_trait]
pub trait InputSource: Send + Sync {
    /// 读取账号原始文本
    async fn read_accounts(&self) -> AppResult<String>;

    /// 读取支付数据池；缺失的文件视为空池，格式错误的卡片记录直接报错
    async fn read_payment_pools(&self) -> AppResult<PaymentPools>;

    /// 来源描述（写入运行事件）
    fn describe(&self) -> String {
        String::from("<custom>")
    }
}

/// 从输入目录读取
#[derive(Debug, Clone)]
pub struct DirInputSource {
    dir: PathBuf,
}

impl DirInputSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 读取可选文件，不存在时返回 `None`
    pub async fn read_optional(&self, file_name: &str) -> AppResult<Option<String>> {
        let path = self.dir.join(file_name);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        Ok(Some(content))
    }
}

#[async_trait]
impl InputSource for DirInputSource {
    async fn read_accounts(&self) -> AppResult<String> {
        let path = self.dir.join(ACCOUNT_FILE);
        match self.read_optional(ACCOUNT_FILE).await? {
            Some(content) => {
                info!("成功读取账号文件: {}", ACCOUNT_FILE);
                Ok(content)
            }
            None => Err(InputError::NotFound {
                path: format!(
                    "{}（请在输入目录下创建 {} 并按格式填入账号）",
                    path.display(),
                    ACCOUNT_FILE
                ),
            }
            .into()),
        }
    }

    async fn read_payment_pools(&self) -> AppResult<PaymentPools> {
        let names = lines_of(self.read_optional(NAME_FILE).await?);
        let zip_codes = lines_of(self.read_optional(ZIP_FILE).await?);
        let cards = match self.read_optional(CARD_FILE).await? {
            Some(text) => parse_cards(&text)?,
            None => Vec::new(),
        };

        Ok(PaymentPools {
            cards,
            names,
            zip_codes,
        })
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// 按行拆分并去掉空行
pub fn lines_of(content: Option<String>) -> Vec<String> {
    content
        .map(|text| {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_account_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let source = DirInputSource::new(dir.path());
        let err = source.read_accounts().await.unwrap_err();
        assert!(matches!(err, AppError::Input(InputError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_missing_payment_files_give_empty_pools() {
        let dir = TempDir::new().unwrap();
        let source = DirInputSource::new(dir.path());
        let pools = source.read_payment_pools().await.unwrap();
        assert!(pools.cards.is_empty());
        assert!(pools.names.is_empty());
        assert!(pools.zip_codes.is_empty());
    }

    #[tokio::test]
    async fn test_reads_all_pools() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(NAME_FILE), "Alice Smith\n\n  Bob Jones \n").unwrap();
        std::fs::write(dir.path().join(ZIP_FILE), "10001\n94105\n").unwrap();
        std::fs::write(
            dir.path().join(CARD_FILE),
            "[pan:4111111111111111, cvv:123, exp_month:10/30]\n",
        )
        .unwrap();

        let pools = DirInputSource::new(dir.path()).read_payment_pools().await.unwrap();
        assert_eq!(pools.names, vec!["Alice Smith", "Bob Jones"]);
        assert_eq!(pools.zip_codes.len(), 2);
        assert_eq!(pools.cards.len(), 1);
        assert_eq!(pools.cards[0].exp_year, "30");
    }

    #[tokio::test]
    async fn test_malformed_card_aborts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CARD_FILE), "pan:4111, cvv:123\n").unwrap();
        let err = DirInputSource::new(dir.path()).read_payment_pools().await.unwrap_err();
        assert!(matches!(err, AppError::Data(_)));
    }
}
