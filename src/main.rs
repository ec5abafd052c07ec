use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use gemi_auto::browser::ChromeFactory;
use gemi_auto::config::Config;
use gemi_auto::infrastructure::ResourceRegistry;
use gemi_auto::models::WindowMode;
use gemi_auto::orchestrator::monitor::console_line;
use gemi_auto::orchestrator::{Controller, EventBus, RunOptions, TaskTable};
use gemi_auto::services::output_service::{failed_emails, latest_result_file, read_records};
use gemi_auto::services::validation::validate_inputs;
use gemi_auto::services::{DirInputSource, InputSource, OutputSink, VerifyClient};
use gemi_auto::utils::logging::{self, LogConfig};
use gemi_auto::workflow::ChromeSteps;

#[derive(Parser)]
#[command(name = "gemi_auto", version, about = "批量账号订阅自动化")]
struct Cli {
    /// 输入目录（覆盖配置文件）
    #[arg(long, global = true)]
    input_dir: Option<PathBuf>,

    /// 输出目录（覆盖配置文件）
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 批量运行所有账号（Ctrl-C 硬停止）
    Run(RunArgs),
    /// 从结果文件导出 SheerID 验证链接
    ExportLinks(ExportArgs),
    /// 校验输入目录中的数据格式
    Validate,
    /// 提交一个验证链接并轮询结果
    Verify(VerifyArgs),
}

#[derive(Args)]
struct RunArgs {
    /// 最大并发数
    #[arg(long)]
    concurrency: Option<usize>,

    /// 相邻两次启动的间隔（秒）
    #[arg(long)]
    delay: Option<f64>,

    /// 窗口模式：visible / minimized / headless
    #[arg(long)]
    mode: Option<String>,

    /// 只重试这些邮箱（可重复）
    #[arg(long = "retry-email")]
    retry_emails: Vec<String>,

    /// 从结果文件中挑出失败的账号重试
    #[arg(long)]
    retry_from: Option<PathBuf>,
}

#[derive(Args)]
struct ExportArgs {
    /// 源结果文件（默认取输出目录下最新的结果文件）
    #[arg(long)]
    source: Option<PathBuf>,

    /// 导出文件路径
    #[arg(long)]
    dest: Option<PathBuf>,

    /// 保留重复链接
    #[arg(long)]
    keep_duplicates: bool,
}

#[derive(Args)]
struct VerifyArgs {
    /// 验证链接
    #[arg(long)]
    link: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置：默认值 → 配置文件 → 环境变量 → 命令行
    let mut config = Config::load()?;
    if let Some(dir) = cli.input_dir {
        config.input_dir = dir;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    // 初始化日志
    let _log_guard = logging::init(&LogConfig::from_config(&config))?;

    match cli.command {
        Commands::Run(args) => run_batch(config, args).await,
        Commands::ExportLinks(args) => export_links(&config, args).await,
        Commands::Validate => validate(&config).await,
        Commands::Verify(args) => verify(&config, args).await,
    }
}

async fn run_batch(mut config: Config, args: RunArgs) -> Result<()> {
    if let Some(n) = args.concurrency {
        config.max_concurrency = n.max(1);
    }
    if let Some(delay) = args.delay {
        config.launch_delay_seconds = delay.max(0.0);
    }
    if let Some(mode) = &args.mode {
        config.window_mode = WindowMode::parse(mode);
    }

    let mut retry = args.retry_emails.clone();
    if let Some(path) = &args.retry_from {
        let records = read_records(path).await?;
        let failed = failed_emails(&records);
        info!("🔁 从 {} 读取到 {} 个失败账号", path.display(), failed.len());
        retry.extend(failed);
    }
    let retry_requested = !args.retry_emails.is_empty() || args.retry_from.is_some();
    if retry_requested && retry.iter().all(|e| e.trim().is_empty()) {
        bail!("没有可重试的失败账号");
    }

    logging::log_startup(&config);

    let table = Arc::new(Mutex::new(TaskTable::new()));
    let sink = Arc::clone(&table);
    let events = EventBus::new().subscribe(move |event| {
        if let Some(line) = console_line(event) {
            println!("{}", line);
        }
        sink.lock()
            .map_err(|_| anyhow::anyhow!("任务表锁已损坏"))?
            .apply(event);
        Ok(())
    });

    let factory = ChromeFactory::new(config.login_url.as_str())
        .chrome_executable(config.chrome_executable.clone());
    let registry = Arc::new(
        ResourceRegistry::new(factory).close_grace(Duration::from_millis(config.close_grace_ms)),
    );
    let input: Arc<dyn InputSource> = Arc::new(DirInputSource::new(&config.input_dir));
    let controller = Arc::new(
        Controller::new(
            registry,
            Arc::new(ChromeSteps::new(&config)),
            input,
            &config.output_dir,
            events,
        )
        .poll_interval(Duration::from_millis(config.poll_interval_ms)),
    );

    let mut opts = RunOptions::from_config(&config);
    if retry_requested {
        opts = opts.retry(retry);
    }

    let stopper = Arc::clone(&controller);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到 Ctrl-C");
            stopper.stop().await;
        }
    });

    let started = controller.run(opts).await;
    ctrl_c.abort();
    if !started {
        bail!("本轮运行未能启动，请检查输入数据");
    }

    let (summary, retryable) = {
        let table = table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        (table.summary(), table.retryable_emails())
    };
    println!("{}", summary);
    let result_file = latest_result_file(&config.output_dir).await?;
    logging::print_final_stats(&summary, result_file.as_deref());
    if !retryable.is_empty() {
        info!(
            "💡 {} 个账号失败，可使用 --retry-from 重试: {}",
            retryable.len(),
            retryable.join(", ")
        );
    }
    Ok(())
}

async fn export_links(config: &Config, args: ExportArgs) -> Result<()> {
    let source = match args.source {
        Some(path) => Some(path),
        None => latest_result_file(&config.output_dir).await?,
    };
    let sink = OutputSink::new(&config.output_dir);
    let (path, count) = sink
        .export_links(source.as_deref(), args.dest.as_deref(), !args.keep_duplicates)
        .await?;
    println!("导出 {} 条链接 -> {}", count, path.display());
    Ok(())
}

async fn validate(config: &Config) -> Result<()> {
    let source = DirInputSource::new(&config.input_dir);
    let issues = validate_inputs(&source).await?;
    if issues.is_empty() {
        println!("✅ 输入数据校验通过: {}", source.describe());
        return Ok(());
    }
    for issue in &issues {
        println!("❌ {}", issue);
    }
    bail!("发现 {} 个问题", issues.len())
}

async fn verify(config: &Config, args: VerifyArgs) -> Result<()> {
    let client = VerifyClient::new(&config.verify_api_key, &config.verify_base_url)?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let result = client
        .submit_and_poll(
            &args.link,
            || cancelled.load(Ordering::SeqCst),
            |progress| match serde_json::to_string(&progress) {
                Ok(line) => println!("{}", line),
                Err(_) => println!("{} {}", progress.job_id, progress.status),
            },
        )
        .await;
    ctrl_c.abort();

    let (_, status) = result?;
    println!("{}", serde_json::Value::Object(status));
    Ok(())
}
