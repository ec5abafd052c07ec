use std::fmt;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug)]
pub enum AppError {
    /// 输入文件错误（账号文件 / 支付数据文件）
    Input(InputError),
    /// 浏览器资源错误（创建 / 清理会话）
    Resource(ResourceError),
    /// 流程步骤错误（登录 / 订阅检测 / 支付）
    Workflow(WorkflowError),
    /// 支付数据错误
    Data(DataError),
    /// 结果文件读写错误
    Output(OutputError),
    /// 配置错误
    Config(ConfigError),
    /// 验证服务错误
    Verify(VerifyError),
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Input(e) => write!(f, "输入错误: {}", e),
            AppError::Resource(e) => write!(f, "资源错误: {}", e),
            AppError::Workflow(e) => write!(f, "流程错误: {}", e),
            AppError::Data(e) => write!(f, "数据错误: {}", e),
            AppError::Output(e) => write!(f, "输出错误: {}", e),
            AppError::Config(e) => write!(f, "配置错误: {}", e),
            AppError::Verify(e) => write!(f, "验证服务错误: {}", e),
            AppError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Input(e) => Some(e),
            AppError::Resource(e) => Some(e),
            AppError::Workflow(e) => Some(e),
            AppError::Data(e) => Some(e),
            AppError::Output(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Verify(e) => Some(e),
            AppError::Other(_) => None,
        }
    }
}

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// 输入文件错误
#[derive(Debug, Error)]
pub enum InputError {
    #[error("找不到文件: {path}")]
    NotFound { path: String },

    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: BoxedSource,
    },

    #[error("没有读取到账号内容")]
    EmptyAccounts,

    #[error("没有可用账号")]
    NoAccounts,

    #[error("没有匹配到可重试账号（失败任务可能已清空或账号文件已变更）")]
    NoRetryMatches,

    #[error("初始化支付数据失败: {source}")]
    PaymentData {
        #[source]
        source: BoxedSource,
    },
}

/// 浏览器资源错误
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("[{profile}] 启动浏览器失败: {source}")]
    InitFailed {
        profile: String,
        #[source]
        source: BoxedSource,
    },

    #[error("[{profile}] 关闭浏览器失败: {source}")]
    CloseFailed {
        profile: String,
        #[source]
        source: BoxedSource,
    },

    #[error("浏览器会话已关闭")]
    SessionGone,

    #[error("正在停止，拒绝启动新的浏览器")]
    ShuttingDown,

    #[error("浏览器配置失败: {0}")]
    ConfigurationFailed(String),
}

/// 流程步骤错误
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("登录失败: {0}")]
    Login(String),

    #[error("订阅状态检测失败: {0}")]
    SubscriptionCheck(String),

    #[error("支付流程失败: {0}")]
    Payment(String),

    #[error("页面操作失败 ({action}): {source}")]
    Page {
        action: String,
        #[source]
        source: BoxedSource,
    },

    #[error("等待元素超时: {selector}")]
    Timeout { selector: String },
}

/// 支付数据错误
#[derive(Debug, Error)]
pub enum DataError {
    #[error("支付数据不完整！请检查 card.txt / name.txt / zip_code.txt 是否有数据")]
    Incomplete,

    #[error("card.txt 第 {line} 行{reason}: {content}")]
    CardParse {
        line: usize,
        reason: String,
        content: String,
    },
}

/// 结果文件读写错误
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("写入结果文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: BoxedSource,
    },

    #[error("读取结果文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: BoxedSource,
    },

    #[error("结果文件不存在: {path}")]
    SourceMissing { path: String },

    #[error("未提供源结果文件路径，且当前实例尚未生成结果文件")]
    NoSource,
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    #[error("配置文件解析失败 ({path}): {source}")]
    FileParseFailed {
        path: String,
        #[source]
        source: BoxedSource,
    },
}

/// 验证服务错误
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("{0} 不能为空")]
    MissingField(&'static str),

    #[error("验证服务请求失败: {0}")]
    Request(String),

    #[error("验证服务返回非 JSON 响应 (HTTP {status})")]
    NotJson { status: u16 },

    #[error("{0}")]
    Rejected(String),

    #[error("验证服务请求失败 (HTTP {status})")]
    HttpStatus { status: u16 },

    #[error("验证轮询超时，请稍后重试")]
    PollTimeout,

    #[error("验证轮询已取消")]
    Cancelled,
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Workflow(WorkflowError::Page {
            action: "cdp".to_string(),
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(format!("JSON解析失败: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(ConfigError::FileParseFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Input(InputError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Verify(VerifyError::Request(err.to_string()))
    }
}

impl From<InputError> for AppError {
    fn from(err: InputError) -> Self {
        AppError::Input(err)
    }
}

impl From<ResourceError> for AppError {
    fn from(err: ResourceError) -> Self {
        AppError::Resource(err)
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        AppError::Workflow(err)
    }
}

impl From<DataError> for AppError {
    fn from(err: DataError) -> Self {
        AppError::Data(err)
    }
}

impl From<OutputError> for AppError {
    fn from(err: OutputError) -> Self {
        AppError::Output(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        AppError::Verify(err)
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建浏览器启动错误
    pub fn resource_init(
        profile: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Resource(ResourceError::InitFailed {
            profile: profile.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Input(InputError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建结果写入错误
    pub fn output_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Output(OutputError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建页面操作错误
    pub fn page_failed(
        action: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Workflow(WorkflowError::Page {
            action: action.into(),
            source: Box::new(source),
        })
    }

    /// 包装支付数据加载失败
    pub fn payment_data(source: AppError) -> Self {
        AppError::Input(InputError::PaymentData {
            source: Box::new(source),
        })
    }

    /// 面向用户的简短描述：输入错误不带分类前缀
    pub fn brief(&self) -> String {
        match self {
            AppError::Input(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
