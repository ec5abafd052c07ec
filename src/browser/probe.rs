//! 页面元素探测
//!
//! "元素是否出现"与"探测本身出错"是两种不同的结果：
//! 没找到返回 `Probe::NotFound`，浏览器已关闭等错误通过 `Err` 向上传递。

use std::time::Duration;

use chromiumoxide::{Element, Page};
use tokio::time::{sleep, Instant};

use crate::error::{AppError, AppResult, WorkflowError};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// 元素探测结果
#[derive(Debug)]
pub enum Probe<T> {
    Found(T),
    NotFound,
}

impl<T> Probe<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Probe::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Probe::Found(v) => Some(v),
            Probe::NotFound => None,
        }
    }

    /// 没找到时转换为超时错误
    pub fn require(self, selector: &str) -> AppResult<T> {
        self.found().ok_or_else(|| {
            AppError::Workflow(WorkflowError::Timeout {
                selector: selector.to_string(),
            })
        })
    }
}

/// 选择器种类
#[derive(Debug, Clone, Copy)]
pub enum Locator<'a> {
    Css(&'a str),
    XPath(&'a str),
}

impl Locator<'_> {
    fn describe(&self) -> &str {
        match self {
            Locator::Css(s) | Locator::XPath(s) => s,
        }
    }
}

/// 立即查找所有匹配元素
pub async fn find_all(page: &Page, locator: Locator<'_>) -> AppResult<Vec<Element>> {
    let result = match locator {
        Locator::Css(css) => page.find_elements(css).await,
        Locator::XPath(xpath) => page.find_xpaths(xpath).await,
    };
    result.map_err(|e| AppError::page_failed(format!("查找 {}", locator.describe()), e))
}

/// 在超时时间内轮询等待元素出现，返回第一个匹配元素
pub async fn wait_for(page: &Page, locator: Locator<'_>, wait: Duration) -> AppResult<Probe<Element>> {
    let deadline = Instant::now() + wait;
    loop {
        let mut elements = find_all(page, locator).await?;
        if !elements.is_empty() {
            return Ok(Probe::Found(elements.swap_remove(0)));
        }
        if Instant::now() >= deadline {
            return Ok(Probe::NotFound);
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// 等待元素出现并点击
pub async fn wait_and_click(page: &Page, locator: Locator<'_>, wait: Duration) -> AppResult<Probe<()>> {
    match wait_for(page, locator, wait).await? {
        Probe::Found(element) => {
            element
                .click()
                .await
                .map_err(|e| AppError::page_failed(format!("点击 {}", locator.describe()), e))?;
            Ok(Probe::Found(()))
        }
        Probe::NotFound => Ok(Probe::NotFound),
    }
}

/// 等待输入框出现并输入文本
pub async fn wait_and_type(
    page: &Page,
    locator: Locator<'_>,
    text: &str,
    wait: Duration,
) -> AppResult<Probe<()>> {
    match wait_for(page, locator, wait).await? {
        Probe::Found(element) => {
            element
                .click()
                .await
                .map_err(|e| AppError::page_failed(format!("聚焦 {}", locator.describe()), e))?;
            element
                .type_str(text)
                .await
                .map_err(|e| AppError::page_failed(format!("输入 {}", locator.describe()), e))?;
            Ok(Probe::Found(()))
        }
        Probe::NotFound => Ok(Probe::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_require() {
        let found: Probe<u8> = Probe::Found(7);
        assert!(found.is_found());
        assert_eq!(found.require("#x").unwrap(), 7);

        let missing: Probe<u8> = Probe::NotFound;
        let err = missing.require("#identifierId").unwrap_err();
        assert!(err.to_string().contains("#identifierId"));
    }
}
