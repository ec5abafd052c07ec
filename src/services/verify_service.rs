//! SheerID 验证提交服务
//!
//! 把 `needs_verify` 结果里的验证链接提交给第三方验证 API 并轮询状态。
//! 只由命令行手动触发，批量任务不会自动调用。

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::{AppResult, VerifyError};

/// 终态
pub const TERMINAL_STATUSES: [&str; 6] = ["success", "failed", "rejected", "stale", "cancelled", "invalid_link"];

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);
const MIN_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// 轮询进度事件
#[derive(Debug, Clone, Serialize)]
pub struct VerifyProgress {
    /// `submitted` 或 `polled`
    pub event_type: &'static str,
    pub job_id: String,
    pub status: String,
    pub progress: Value,
    pub credits_charged: Value,
    pub result: Value,
}

impl VerifyProgress {
    fn from_response(event_type: &'static str, data: &Map<String, Value>) -> Self {
        let progress = match data.get("progress") {
            Some(Value::Object(obj)) => Value::Object(obj.clone()),
            _ => Value::Object(Map::new()),
        };
        Self {
            event_type,
            job_id: string_field(data, "job_id"),
            status: string_field(data, "status"),
            progress,
            credits_charged: data.get("credits_charged").cloned().unwrap_or(Value::Null),
            result: data.get("result").cloned().unwrap_or(Value::Null),
        }
    }
}

/// 验证 API 客户端
pub struct VerifyClient {
    client: Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl VerifyClient {
    pub fn new(api_key: &str, base_url: &str) -> AppResult<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(VerifyError::MissingField("API Key").into());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(600),
        })
    }

    /// 轮询间隔，下限 200ms
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// 轮询总超时，下限 5s
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout.max(MIN_POLL_TIMEOUT);
        self
    }

    /// 提交验证链接，返回包含 `job_id` 的响应
    pub async fn submit(&self, url: &str) -> AppResult<Map<String, Value>> {
        let target = url.trim();
        if target.is_empty() {
            return Err(VerifyError::MissingField("SheerID 链接").into());
        }

        let response = self
            .client
            .post(format!("{}/verify", self.base_url))
            .header("X-API-Key", &self.api_key)
            .json(&json!({ "url": target }))
            .send()
            .await?;
        let data = read_response(response).await?;

        if string_field(&data, "job_id").is_empty() {
            return Err(VerifyError::MissingField("job_id").into());
        }
        Ok(data)
    }

    /// 查询任务状态
    pub async fn status(&self, job_id: &str) -> AppResult<Map<String, Value>> {
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(VerifyError::MissingField("job_id").into());
        }

        let response = self
            .client
            .get(format!("{}/verify/{}", self.base_url, job_id))
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        read_response(response).await
    }

    /// 提交并轮询到终态，返回 (提交响应, 最终状态响应)
    pub async fn submit_and_poll<S, P>(
        &self,
        url: &str,
        should_stop: S,
        mut on_progress: P,
    ) -> AppResult<(Map<String, Value>, Map<String, Value>)>
    where
        S: Fn() -> bool,
        P: FnMut(VerifyProgress),
    {
        let submitted = self.submit(url).await?;
        on_progress(VerifyProgress::from_response("submitted", &submitted));

        let job_id = string_field(&submitted, "job_id");
        info!("验证任务已提交: job_id={}", job_id);
        let start = Instant::now();

        loop {
            if should_stop() {
                return Err(VerifyError::Cancelled.into());
            }

            let status = self.status(&job_id).await?;
            let progress = VerifyProgress::from_response("polled", &status);
            debug!("验证任务 {} 状态: {}", job_id, progress.status);
            on_progress(progress);

            if is_terminal_status(&string_field(&status, "status")) {
                return Ok((submitted, status));
            }
            if start.elapsed() >= self.poll_timeout {
                return Err(VerifyError::PollTimeout.into());
            }
            sleep(self.poll_interval).await;
        }
    }
}

pub fn is_terminal_status(status: &str) -> bool {
    let status = status.trim().to_lowercase();
    TERMINAL_STATUSES.contains(&status.as_str())
}

async fn read_response(response: reqwest::Response) -> AppResult<Map<String, Value>> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    let data = decode_body(status, &body)?;
    check_status(status, &data)?;
    Ok(data)
}

/// 响应体必须是 JSON 对象
fn decode_body(status: u16, body: &str) -> Result<Map<String, Value>, VerifyError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(VerifyError::NotJson { status }),
    }
}

/// 非 2xx 时优先使用 `{error: {code, message}}` 作为错误文本
fn check_status(status: u16, data: &Map<String, Value>) -> Result<(), VerifyError> {
    if (200..300).contains(&status) {
        return Ok(());
    }

    if let Some(Value::Object(error)) = data.get("error") {
        let code = string_field(error, "code");
        let message = string_field(error, "message");
        match (code.is_empty(), message.is_empty()) {
            (false, false) => return Err(VerifyError::Rejected(format!("{}: {}", code, message))),
            (false, true) => return Err(VerifyError::Rejected(code)),
            (true, false) => return Err(VerifyError::Rejected(message)),
            (true, true) => {}
        }
    }

    Err(VerifyError::HttpStatus { status })
}

fn string_field(data: &Map<String, Value>, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(is_terminal_status("success"));
        assert!(is_terminal_status(" Invalid_Link "));
        assert!(!is_terminal_status("processing"));
        assert!(!is_terminal_status(""));
    }

    #[test]
    fn test_decode_body_requires_object() {
        assert!(decode_body(200, r#"{"job_id":"j1"}"#).is_ok());
        assert!(matches!(decode_body(502, "<html>"), Err(VerifyError::NotJson { status: 502 })));
        assert!(matches!(decode_body(200, "[1,2]"), Err(VerifyError::NotJson { .. })));
    }

    #[test]
    fn test_error_body_is_surfaced() {
        let data = object(json!({"error": {"code": "insufficient_credits", "message": "余额不足"}}));
        let err = check_status(402, &data).unwrap_err();
        assert_eq!(err.to_string(), "insufficient_credits: 余额不足");

        let data = object(json!({"error": {"message": "bad link"}}));
        assert_eq!(check_status(400, &data).unwrap_err().to_string(), "bad link");

        let data = object(json!({"detail": "x"}));
        assert!(matches!(check_status(500, &data), Err(VerifyError::HttpStatus { status: 500 })));

        assert!(check_status(201, &data).is_ok());
    }

    #[test]
    fn test_progress_event_defaults() {
        let data = object(json!({"job_id": "j1", "status": "processing", "progress": 3}));
        let progress = VerifyProgress::from_response("polled", &data);
        assert_eq!(progress.job_id, "j1");
        assert_eq!(progress.status, "processing");
        assert_eq!(progress.progress, json!({}));
        assert_eq!(progress.result, Value::Null);
    }

    #[test]
    fn test_client_requires_api_key_and_clamps_intervals() {
        assert!(VerifyClient::new("  ", "https://example.com").is_err());

        let client = VerifyClient::new("key", "https://example.com/api/")
            .unwrap()
            .poll_interval(Duration::from_millis(10))
            .poll_timeout(Duration::from_secs(1));
        assert_eq!(client.base_url, "https://example.com/api");
        assert_eq!(client.poll_interval, MIN_POLL_INTERVAL);
        assert_eq!(client.poll_timeout, MIN_POLL_TIMEOUT);
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_link() {
        let client = VerifyClient::new("key", "https://example.com").unwrap();
        let err = client.submit("   ").await.unwrap_err();
        assert!(err.to_string().contains("SheerID 链接"));
        let err = client.status("").await.unwrap_err();
        assert!(err.to_string().contains("job_id"));
    }
}
