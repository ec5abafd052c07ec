//! 结果输出服务
//!
//! ## 职责
//! - 每个运行批次懒创建一个带时间戳的结果文件，逐行追加结果
//! - 从结果文件中提取 SheerID 验证链接并导出
//! - 解析历史结果文件中的记录行（供 `--retry-from` 使用）

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Local;
use regex::Regex;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{AppError, AppResult, OutputError};
use crate::models::account::normalize_email;
use crate::models::result::SUBSCRIBED_MARKER;
use crate::models::SubscriptionResult;

pub const RESULT_FILE_PREFIX: &str = "subscription_results_";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// 待认证链接的状态文本
pub const PENDING_VERIFY: &str = "待认证";
const UNKNOWN_STATUS: &str = "未知";
const UNKNOWN_EMAIL: &str = "(无法识别账号)";

/// SheerID 验证链接
pub const SHEERID_LINK_PATTERN: &str = r"https://services\.sheerid\.com/verify/[^\s]+";
const URL_PATTERN: &str = r"https?://\S+";
const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

fn find_first(pattern: &str, text: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.find(text).map(|m| m.as_str().to_string())
}

/// 结果写入器
///
/// 第一次 `save` 时才创建文件，之后同一实例的所有结果都追加到这个文件
pub struct OutputSink {
    output_dir: PathBuf,
    file_path: Mutex<Option<PathBuf>>,
}

impl OutputSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_path: Mutex::new(None),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 本次运行的结果文件（尚未写入任何结果时为 `None`）
    pub async fn current_file(&self) -> Option<PathBuf> {
        self.file_path.lock().await.clone()
    }

    /// 追加一条结果
    pub async fn save(&self, result: &SubscriptionResult) -> AppResult<()> {
        let mut guard = self.file_path.lock().await;

        let path = match guard.as_ref() {
            Some(path) => path.clone(),
            None => {
                let path = self.init_file().await?;
                *guard = Some(path.clone());
                path
            }
        };

        let line = result.to_line();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AppError::output_write_failed(path.display().to_string(), e))?;
        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| AppError::output_write_failed(path.display().to_string(), e))?;
        file.flush()
            .await
            .map_err(|e| AppError::output_write_failed(path.display().to_string(), e))?;

        info!("结果已保存: {}", line);
        Ok(())
    }

    async fn init_file(&self) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| AppError::output_write_failed(self.output_dir.display().to_string(), e))?;
        let filename = format!("{}{}.txt", RESULT_FILE_PREFIX, Local::now().format(TIMESTAMP_FORMAT));
        info!("成功创建本次运行的记录文件: {}", filename);
        Ok(self.output_dir.join(filename))
    }

    /// 从结果文件中提取 SheerID 验证链接，每行一个写入导出文件
    ///
    /// - `source` 为空时使用本实例本次运行的结果文件
    /// - `dest` 为空时在输出目录下自动命名 `{源文件名}_sheerid_links_{时间戳}.txt`
    /// - `deduplicate` 为真时按首次出现顺序去重
    ///
    /// 返回 (导出文件路径, 链接数量)
    pub async fn export_links(
        &self,
        source: Option<&Path>,
        dest: Option<&Path>,
        deduplicate: bool,
    ) -> AppResult<(PathBuf, usize)> {
        let source_path = match source {
            Some(path) => path.to_path_buf(),
            None => self.current_file().await.ok_or(OutputError::NoSource)?,
        };

        if !fs::try_exists(&source_path).await.unwrap_or(false) {
            return Err(OutputError::SourceMissing {
                path: source_path.display().to_string(),
            }
            .into());
        }

        let content = fs::read_to_string(&source_path).await.map_err(|e| OutputError::ReadFailed {
            path: source_path.display().to_string(),
            source: Box::new(e),
        })?;

        let links = extract_links(&content, deduplicate);

        let dest_path = match dest {
            Some(path) => path.to_path_buf(),
            None => {
                let stem = source_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "results".to_string());
                self.output_dir.join(format!(
                    "{}_sheerid_links_{}.txt",
                    stem,
                    Local::now().format(TIMESTAMP_FORMAT)
                ))
            }
        };

        if let Some(parent) = dest_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::output_write_failed(parent.display().to_string(), e))?;
        }

        let body = if links.is_empty() {
            String::new()
        } else {
            format!("{}\n", links.join("\n"))
        };
        fs::write(&dest_path, body)
            .await
            .map_err(|e| AppError::output_write_failed(dest_path.display().to_string(), e))?;

        info!("SheerID 链接导出完成: {} 条 -> {}", links.len(), dest_path.display());
        Ok((dest_path, links.len()))
    }
}

/// 提取文本中的所有 SheerID 验证链接
pub fn extract_links(content: &str, deduplicate: bool) -> Vec<String> {
    let Ok(re) = Regex::new(SHEERID_LINK_PATTERN) else {
        return Vec::new();
    };
    let all = re.find_iter(content).map(|m| m.as_str().to_string());
    if deduplicate {
        let mut seen = HashSet::new();
        all.filter(|link| seen.insert(link.clone())).collect()
    } else {
        all.collect()
    }
}

/// 输出目录下最新的结果文件（按文件名中的时间戳）
pub async fn latest_result_file(output_dir: &Path) -> AppResult<Option<PathBuf>> {
    let mut entries = match fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(OutputError::ReadFailed {
                path: output_dir.display().to_string(),
                source: Box::new(e),
            }
            .into())
        }
    };

    let mut latest: Option<(String, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await.map_err(|e| OutputError::ReadFailed {
        path: output_dir.display().to_string(),
        source: Box::new(e),
    })? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(RESULT_FILE_PREFIX) || !name.ends_with(".txt") || name.contains("_sheerid_links_") {
            continue;
        }
        if latest.as_ref().map_or(true, |(best, _)| name > *best) {
            latest = Some((name, entry.path()));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

// ========== 结果文件解析 ==========

/// 结果状态分组
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusGroup {
    Success,
    NeedsVerify,
    Failed,
    Crashed,
    Other,
}

/// 按状态文本归类
pub fn classify_status(status: &str) -> StatusGroup {
    let status = status.trim();
    if status == SUBSCRIBED_MARKER || status.starts_with("成功") {
        StatusGroup::Success
    } else if status == PENDING_VERIFY || status.contains("需验证") {
        StatusGroup::NeedsVerify
    } else if status.contains("崩溃") {
        StatusGroup::Crashed
    } else if status.contains("失败") {
        StatusGroup::Failed
    } else {
        StatusGroup::Other
    }
}

/// 结果文件中的一条记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub email: String,
    pub status: String,
    pub link: String,
}

impl ResultRecord {
    /// 解析结果文件中的一行
    ///
    /// 支持 `email__link`、`email----status`，其余格式尽量识别邮箱
    pub fn parse_line(line: &str) -> Self {
        let line = line.trim();
        let first_url = |text: &str| find_first(URL_PATTERN, text).unwrap_or_default();

        let (email, mut status, link) = if let Some((email, rest)) = line.split_once("__") {
            let rest = rest.trim();
            let link = first_url(rest);
            let status = if link.is_empty() {
                rest.to_string()
            } else {
                PENDING_VERIFY.to_string()
            };
            (email.trim().to_string(), status, link)
        } else if let Some((email, rest)) = line.split_once("----") {
            let status = rest.trim().to_string();
            let link = first_url(&status);
            (email.trim().to_string(), status, link)
        } else {
            let email = find_first(EMAIL_PATTERN, line).unwrap_or_default();
            let status = if email.is_empty() {
                line.to_string()
            } else {
                line.replacen(&email, "", 1)
                    .trim_matches(|c| c == '-' || c == '_' || c == ' ')
                    .to_string()
            };
            (email, status, first_url(line))
        };

        if status.is_empty() {
            status = UNKNOWN_STATUS.to_string();
        }
        let email = if email.is_empty() {
            UNKNOWN_EMAIL.to_string()
        } else {
            email
        };

        Self { email, status, link }
    }

    pub fn group(&self) -> StatusGroup {
        classify_status(&self.status)
    }
}

/// 读取结果文件中的所有记录（忽略空行）
pub async fn read_records(path: &Path) -> AppResult<Vec<ResultRecord>> {
    let content = fs::read_to_string(path).await.map_err(|e| OutputError::ReadFailed {
        path: path.display().to_string(),
        source: Box::new(e),
    })?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(ResultRecord::parse_line)
        .collect())
}

/// 每个邮箱取最后一条记录，返回最终状态为失败的邮箱（规范化后）
///
/// 重试规则与 `TaskTable::retryable_emails` 一致：只重试失败，
/// 需验证和崩溃都不重试
pub fn failed_emails(records: &[ResultRecord]) -> HashSet<String> {
    let mut latest: HashMap<String, &ResultRecord> = HashMap::new();
    for record in records {
        if record.email == UNKNOWN_EMAIL {
            continue;
        }
        latest.insert(normalize_email(&record.email), record);
    }
    latest
        .into_iter()
        .filter(|(_, record)| record.group() == StatusGroup::Failed)
        .map(|(email, _)| email)
        .collect()
}
