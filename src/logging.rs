//! 日志系统配置
//!
//! 控制台输出 + 可选的文件持久化。文件按单次运行的启动时间命名，超过大小上限时
//! 滚动到 `_N` 后缀的新文件；启动时清理超过保留天数的旧文件

use crate::config::LogConfig;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// 日志文件名前缀
pub const LOG_FILE_PREFIX: &str = "batch-uploader";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

struct RotatingFile {
    dir: PathBuf,
    /// 本次运行的启动时间（YYYY-MM-DD-HHMMSS）
    run_stamp: String,
    max_size: u64,
    /// 0 为基础文件，之后依次为滚动文件
    index: u32,
    file: File,
    written: u64,
}

impl RotatingFile {
    fn open(dir: PathBuf, run_stamp: String, max_size: u64) -> io::Result<Self> {
        let file = open_append(&log_file_path(&dir, &run_stamp, 0))?;
        Ok(Self {
            dir,
            run_stamp,
            max_size,
            index: 0,
            file,
            written: 0,
        })
    }

    fn write_record(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 空文件不滚动，单条超大记录也要写得进去
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.file.flush()?;
            self.index += 1;
            self.file = open_append(&log_file_path(&self.dir, &self.run_stamp, self.index))?;
            self.written = 0;
        }

        let written = self.file.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn log_file_path(dir: &Path, run_stamp: &str, index: u32) -> PathBuf {
    let name = if index == 0 {
        format!("{}.{}.log", LOG_FILE_PREFIX, run_stamp)
    } else {
        format!("{}.{}_{}.log", LOG_FILE_PREFIX, run_stamp, index)
    };
    dir.join(name)
}

/// 按大小滚动的日志写入器
///
/// 可克隆，所有副本写入同一组文件
#[derive(Clone)]
pub struct RotatingLogWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingLogWriter {
    pub fn new(dir: impl Into<PathBuf>, max_size: u64) -> io::Result<Self> {
        let run_stamp = Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        Self::with_run_stamp(dir, run_stamp, max_size)
    }

    fn with_run_stamp(dir: impl Into<PathBuf>, run_stamp: String, max_size: u64) -> io::Result<Self> {
        let file = RotatingFile::open(dir.into(), run_stamp, max_size.max(1))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    /// 当前写入的文件
    pub fn current_path(&self) -> PathBuf {
        let inner = self.inner.lock();
        log_file_path(&inner.dir, &inner.run_stamp, inner.index)
    }
}

impl Write for RotatingLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write_record(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 初始化日志系统
///
/// `RUST_LOG` 优先于配置中的级别。文件输出初始化失败时回退到仅控制台
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<BoxedLayer> = vec![fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_writer(io::stderr)
        .boxed()];

    let mut file_guard = None;
    let mut file_error = None;
    if config.enabled {
        match open_file_writer(config) {
            Ok(writer) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(writer);
                layers.push(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                        .with_ansi(false)
                        .with_writer(non_blocking)
                        .boxed(),
                );
                file_guard = Some(guard);
            }
            Err(e) => file_error = Some(e),
        }
    }

    if tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .is_err()
    {
        // 全局订阅器已存在（例如测试中重复初始化）
        return LogGuard { _file_guard: None };
    }

    match (&file_guard, file_error) {
        (Some(_), _) => {
            info!(
                "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
                config.log_dir,
                config.retention_days,
                config.level,
                config.max_file_size as f64 / 1024.0 / 1024.0
            );
            let removed = cleanup_old_logs(&config.log_dir, config.retention_days, Local::now().date_naive());
            if removed > 0 {
                info!("已清理 {} 个过期日志文件", removed);
            }
        }
        (None, Some(e)) => {
            tracing::warn!("日志文件初始化失败，仅输出到控制台: {}", e);
        }
        (None, None) => info!("日志系统初始化完成（仅控制台输出）"),
    }

    LogGuard {
        _file_guard: file_guard,
    }
}

fn open_file_writer(config: &LogConfig) -> io::Result<RotatingLogWriter> {
    fs::create_dir_all(&config.log_dir)?;
    RotatingLogWriter::new(config.log_dir.clone(), config.max_file_size)
}

/// 清理过期日志文件，返回删除的数量
///
/// 日期优先取自文件名，取不到时按修改时间判断
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u32, today: NaiveDate) -> usize {
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.starts_with(LOG_FILE_PREFIX) || !name.ends_with(".log") {
            continue;
        }

        let expired = match date_from_file_name(name) {
            Some(date) => today.signed_duration_since(date) > retention,
            None => modified_before(&entry, retention),
        };
        if !expired {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                tracing::debug!("已删除过期日志文件: {:?}", path);
            }
            Err(e) => tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
        }
    }
    removed
}

/// `batch-uploader.YYYY-MM-DD-HHMMSS[_N].log` -> YYYY-MM-DD
fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_prefix('.')?
        .strip_suffix(".log")?;
    let date = stem.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn modified_before(entry: &fs::DirEntry, retention: chrono::Duration) -> bool {
    let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
        return false;
    };
    let modified: chrono::DateTime<chrono::Utc> = modified.into();
    chrono::Utc::now().signed_duration_since(modified) > retention
}
