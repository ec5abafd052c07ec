use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AppResult, ConfigError};
use crate::models::WindowMode;

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "gemi_auto.toml";

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 输入目录（account.txt / card.txt / name.txt / zip_code.txt）
    pub input_dir: PathBuf,
    /// 结果输出目录
    pub output_dir: PathBuf,
    /// 同时运行的浏览器数量
    pub max_concurrency: usize,
    /// 相邻两次启动之间的间隔（秒）
    pub launch_delay_seconds: f64,
    /// 浏览器窗口模式
    pub window_mode: WindowMode,
    /// 登录入口
    pub login_url: String,
    /// 订阅检测页面
    pub entitlement_url: String,
    /// 关闭浏览器后删除临时配置目录前的等待时间（毫秒）
    pub close_grace_ms: u64,
    /// 调度循环轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 浏览器可执行文件路径（为空时自动探测）
    pub chrome_executable: Option<PathBuf>,
    /// 日志目录（为空时只输出到控制台）
    pub log_dir: Option<PathBuf>,
    /// 默认日志级别
    pub log_level: String,
    // --- 验证服务配置 ---
    pub verify_api_key: String,
    pub verify_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            max_concurrency: 3,
            launch_delay_seconds: 0.5,
            window_mode: WindowMode::Headless,
            login_url: "https://accounts.google.com/signin".to_string(),
            entitlement_url: "https://one.google.com/ai-student".to_string(),
            close_grace_ms: 2000,
            poll_interval_ms: 200,
            chrome_executable: None,
            log_dir: Some(PathBuf::from("logs")),
            log_level: "info".to_string(),
            verify_api_key: String::new(),
            verify_base_url: "https://sheeridbot.com/api/v2".to_string(),
        }
    }
}

impl Config {
    /// 按 默认值 → 配置文件 → 环境变量 的顺序加载配置
    ///
    /// 配置文件路径取 `GEMI_CONFIG`，未设置时尝试当前目录下的 `gemi_auto.toml`，
    /// 文件不存在时直接使用默认值。
    pub fn load() -> AppResult<Self> {
        let path = std::env::var("GEMI_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let base = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        base.with_env()
    }

    /// 从 TOML 文件加载配置，缺省字段使用默认值
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::AppError::file_read_failed(path.display().to_string(), e))?;
        Self::from_toml_str(&content).map_err(|e| match e {
            crate::error::AppError::Config(ConfigError::FileParseFailed { source, .. }) => {
                ConfigError::FileParseFailed {
                    path: path.display().to_string(),
                    source,
                }
                .into()
            }
            other => other,
        })
    }

    /// 解析 TOML 文本
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config.normalized())
    }

    /// 只使用默认值 + 环境变量
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env()
    }

    fn with_env(self) -> AppResult<Self> {
        let mut config = self;

        if let Some(v) = env_parse::<usize>("GEMI_MAX_CONCURRENCY", "usize")? {
            config.max_concurrency = v;
        }
        if let Some(v) = env_parse::<f64>("GEMI_LAUNCH_DELAY", "f64")? {
            config.launch_delay_seconds = v;
        }
        if let Some(v) = env_parse::<u64>("GEMI_CLOSE_GRACE_MS", "u64")? {
            config.close_grace_ms = v;
        }
        if let Some(v) = env_parse::<u64>("GEMI_POLL_INTERVAL_MS", "u64")? {
            config.poll_interval_ms = v;
        }
        if let Ok(v) = std::env::var("GEMI_WINDOW_MODE") {
            config.window_mode = WindowMode::parse(&v);
        }
        if let Ok(v) = std::env::var("GEMI_INPUT_DIR") {
            config.input_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GEMI_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GEMI_CHROME_EXECUTABLE") {
            config.chrome_executable = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("GEMI_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("GEMI_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("GEMI_VERIFY_API_KEY") {
            config.verify_api_key = v;
        }
        if let Ok(v) = std::env::var("GEMI_VERIFY_BASE_URL") {
            config.verify_base_url = v;
        }

        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        self.max_concurrency = self.max_concurrency.max(1);
        if !self.launch_delay_seconds.is_finite() || self.launch_delay_seconds < 0.0 {
            self.launch_delay_seconds = 0.0;
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(var_name: &str, expected_type: &str) -> AppResult<Option<T>> {
    match std::env::var(var_name) {
        Ok(value) => value.trim().parse::<T>().map(Some).map_err(|_| {
            ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: expected_type.to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}
