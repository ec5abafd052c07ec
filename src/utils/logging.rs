/// 日志工具模块
///
/// 初始化 tracing 订阅器，并提供运行开始 / 结束时的横幅输出
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::orchestrator::TableSummary;

/// 滚动日志文件名前缀
pub const LOG_FILE_NAME: &str = "gemi_auto.log";

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 未设置 `RUST_LOG` 时的默认级别
    pub level: String,
    /// 日志目录；为空时只输出到控制台
    pub dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            level: config.log_level.clone(),
            dir: config.log_dir.clone(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// 初始化日志
///
/// 控制台 + 按天滚动的文件（`{dir}/gemi_auto.log.YYYY-MM-DD`）。
/// 重复初始化不会报错，第二次调用直接忽略。
///
/// # 返回
/// 文件日志的后台写入句柄，需要一直持有到程序退出
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init();

    Ok(guard)
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量订阅模式");
    info!("📊 最大并发数: {}", config.max_concurrency);
    info!("🪟 窗口模式: {}", config.window_mode);
    info!("📁 输入目录: {}", config.input_dir.display());
    info!("📁 输出目录: {}", config.output_dir.display());
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `summary`: 任务表汇总
/// - `result_file`: 本轮生成的结果文件（没有任何结果写入时为空）
pub fn print_final_stats(summary: &TableSummary, result_file: Option<&Path>) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", summary.success, summary.launched);
    info!("❌ 失败: {}", summary.failed);
    info!("🔗 需验证: {}", summary.needs_verify);
    if summary.stopped {
        info!("🛑 已硬停止，未启动: {}", summary.planned.saturating_sub(summary.launched));
    }
    info!("{}", "=".repeat(60));
    if let Some(path) = result_file {
        info!("\n结果已保存至: {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            level: "debug".to_string(),
            dir: Some(dir.path().to_path_buf()),
        };
        assert!(init(&config).is_ok());
        assert!(init(&config).is_ok());
    }
}
