use anyhow::Context;
use clap::Parser;
use batch_uploader::{
    config::LogConfig,
    logging,
    uploader::InputCollector,
    AppConfig, BatchEvent, BatchOptions, ItemEvent, ResultCollector, RunSummary, UploadScheduler,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 有界并发的批量上传工具
///
/// 目录会被展开为其中的文件；成功后在标准输出打印运行记录（JSON）
#[derive(Debug, Parser)]
#[command(name = "batch-uploader", version)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, value_name = "文件", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// 同时上传的文件数（默认取配置 upload.concurrency_limit）
    #[arg(short = 'j', long, value_name = "K")]
    concurrency: Option<usize>,

    /// 远程目录名（默认使用当前时间）
    #[arg(long, value_name = "名称", value_parser = parse_folder_name)]
    folder: Option<String>,

    /// 逐行输出批次事件（JSON）
    #[arg(long)]
    events: bool,

    /// 要上传的文件或目录
    #[arg(value_name = "路径", required = true)]
    inputs: Vec<PathBuf>,
}

/// 远程目录名只能是单个路径段
fn parse_folder_name(value: &str) -> Result<String, String> {
    if value.is_empty() || value.contains(['/', '\\']) {
        return Err(format!("无效的目录名: {:?}", value));
    }
    Ok(value.to_string())
}

/// 加载日志配置
///
/// 日志系统要在完整配置之前初始化，这里只读取 [log] 表，失败时使用默认配置
async fn load_log_config(config_path: &Path) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(config_path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }
    LogConfig::default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // 🔥 初始化日志系统（必须保持 _log_guard 存活）
    let log_config = load_log_config(&args.config).await;
    let _log_guard = logging::init_logging(&log_config);

    info!("Batch Uploader v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(&args.config).await;
    let concurrency = config.upload.resolve_concurrency(args.concurrency)?;

    let inputs = InputCollector::new(config.upload.input_options()).collect(&args.inputs)?;
    if inputs.is_empty() {
        anyhow::bail!("没有找到可上传的文件");
    }

    let store = config.store.build()?;
    let scheduler = UploadScheduler::new(store);

    let mut options = BatchOptions::from(&config.upload);
    options.concurrency_limit = concurrency;
    if let Some(folder) = args.folder {
        options = options.with_folder_name(folder);
    }

    let stream = scheduler.upload(inputs, options)?;
    let total = stream.total();
    info!("上传到目录 {}: {} 个文件, 并发数 {}", stream.folder_name(), total, concurrency);

    // 🔥 Ctrl+C 取消整个批次
    let cancel_handle = scheduler.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到 Ctrl+C，正在取消上传...");
            cancel_handle.cancel_all();
        }
    });

    let print_events = args.events;
    let collector = ResultCollector::new(total)
        .collect(stream, |event, collector| {
            if print_events {
                match serde_json::to_string(event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("事件序列化失败: {}", e),
                }
            }
            if let BatchEvent::Item {
                event: ItemEvent::Succeeded { snapshot },
                ..
            } = event
            {
                info!(
                    "[{}/{}] ✓ {} (整体进度 {:.0}%)",
                    collector.uploaded_count(),
                    total,
                    snapshot.remote_path,
                    collector.overall_progress() * 100.0
                );
            }
        })
        .await;
    ctrl_c.abort();

    let (summary, snapshots) = collector.into_result().context("批次上传失败")?;
    let run = RunSummary::from_batch(&summary, &snapshots).context("运行记录无效")?;
    info!(
        "✓ 上传完成: {} 个文件, 耗时 {}",
        run.uploaded_count(),
        run.elapsed_display
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&run).context("Failed to serialize run summary")?
    );
    Ok(())
}
