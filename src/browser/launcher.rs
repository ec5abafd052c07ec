//! Chrome 会话工厂
//!
//! 每个任务启动一个独立的浏览器进程，使用独立的临时配置目录

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::browser::fingerprint;
use crate::error::{AppError, AppResult, ResourceError};
use crate::infrastructure::{LaunchSpec, ResourceFactory, Session};
use crate::models::WindowMode;

/// 关闭浏览器的最长等待时间，超时后直接杀进程
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// 基于 chromiumoxide 的会话工厂
#[derive(Debug, Clone)]
pub struct ChromeFactory {
    chrome_executable: Option<PathBuf>,
    start_url: String,
}

impl ChromeFactory {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            chrome_executable: None,
            start_url: start_url.into(),
        }
    }

    pub fn chrome_executable(mut self, path: Option<PathBuf>) -> Self {
        self.chrome_executable = path;
        self
    }

    fn build_config(&self, spec: &LaunchSpec) -> AppResult<BrowserConfig> {
        let fp = fingerprint::pick();
        info!(
            "[{}] 选择指纹 -> OS: {}, 分辨率: {}x{}, 语言: {}",
            spec.profile, fp.os, fp.width, fp.height, fp.lang
        );

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&spec.profile_dir)
            .window_size(fp.width, fp.height)
            .arg(format!("--user-agent={}", fp.user_agent))
            .arg(format!("--lang={}", fp.lang))
            .arg("--disable-blink-features=AutomationControlled");

        builder = match spec.mode {
            WindowMode::Headless => {
                warn!("[{}] 浏览器模式=无头", spec.profile);
                builder.new_headless_mode().arg("--disable-gpu")
            }
            WindowMode::Minimized => builder.with_head().arg("--start-minimized"),
            WindowMode::Visible => builder.with_head(),
        };

        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }

        builder
            .build()
            .map_err(|e| AppError::Resource(ResourceError::ConfigurationFailed(e)))
    }
}

#[async_trait]
impl ResourceFactory for ChromeFactory {
    type Session = ChromeSession;

    async fn create(&self, spec: &LaunchSpec) -> AppResult<ChromeSession> {
        info!("[{}] 准备启动浏览器...", spec.profile);
        let config = self.build_config(spec)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::resource_init(&spec.profile, e))?;
        debug!("[{}] 浏览器进程已启动", spec.profile);

        // 在后台处理浏览器事件
        let events = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        // 添加短暂延迟以等待浏览器状态同步
        sleep(Duration::from_millis(300)).await;

        let page = match browser.new_page(self.start_url.as_str()).await {
            Ok(page) => page,
            Err(e) => {
                events.abort();
                return Err(AppError::resource_init(&spec.profile, e));
            }
        };
        info!("[{}] 浏览器启动成功（模式={}），已打开: {}", spec.profile, spec.mode, self.start_url);

        Ok(ChromeSession {
            profile: spec.profile.clone(),
            browser: Mutex::new(browser),
            page,
            events,
        })
    }
}

/// 一个存活的 Chrome 会话
///
/// 页面操作通过 `page()` 进行；`terminate()` 可能在任意时刻被硬停止调用，
/// 之后所有页面操作都会返回错误。
pub struct ChromeSession {
    profile: String,
    browser: Mutex<Browser>,
    page: Page,
    events: JoinHandle<()>,
}

impl ChromeSession {
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 当前页面 URL
    pub async fn current_url(&self) -> AppResult<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| AppError::page_failed("url", e))?;
        Ok(url.unwrap_or_default())
    }
}

#[async_trait]
impl Session for ChromeSession {
    async fn terminate(&self) -> AppResult<()> {
        let mut browser = self.browser.lock().await;

        let closed = match timeout(CLOSE_TIMEOUT, browser.close()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!("[{}] 关闭浏览器失败，改为结束进程: {}", self.profile, e);
                false
            }
            Err(_) => {
                warn!("[{}] 关闭浏览器超时，改为结束进程", self.profile);
                false
            }
        };

        let result = if closed {
            browser.wait().await.map(|_| ())
        } else {
            match browser.kill().await {
                Some(res) => res,
                None => Ok(()),
            }
        };

        self.events.abort();

        result.map_err(|e| {
            AppError::Resource(ResourceError::CloseFailed {
                profile: self.profile.clone(),
                source: Box::new(e),
            })
        })
    }
}
