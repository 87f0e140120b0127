// 配置管理模块

use crate::store::{local::DEFAULT_CHUNK_SIZE, HttpStore, LocalFsStore, RemoteObjectStore};
use crate::uploader::{
    InputOptions, ProgressPolicy, DEFAULT_BYTES_EXTENSION, DEFAULT_DRAIN_TIMEOUT,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 对象存储配置
    #[serde(default)]
    pub store: StoreConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 默认并发数（同时在传的条目数）
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// 允许设置的最大并发数
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 字节源对象名的扩展名
    #[serde(default = "default_bytes_extension")]
    pub bytes_extension: String,
    /// 进度处理策略：pass_through / running_max
    #[serde(default)]
    pub progress_policy: ProgressPolicy,
    /// 展开文件夹时是否跳过隐藏文件（以.开头的文件/文件夹）
    #[serde(default = "default_skip_hidden_files")]
    pub skip_hidden_files: bool,
    /// 展开文件夹时是否进入子目录
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// 展开文件夹时是否跟随符号链接
    #[serde(default)]
    pub follow_symlinks: bool,
    /// 展开文件夹时只收集这些扩展名，不配置表示全部
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    /// 单次最多收集的文件数量
    #[serde(default)]
    pub max_files: Option<usize>,
    /// 批次中止后等待在传任务退出的最长时间（秒）
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_concurrency_limit() -> usize {
    1
}

fn default_max_concurrency() -> usize {
    10
}

fn default_bytes_extension() -> String {
    DEFAULT_BYTES_EXTENSION.to_string()
}

fn default_skip_hidden_files() -> bool {
    true
}

fn default_recursive() -> bool {
    true
}

fn default_drain_timeout_secs() -> u64 {
    DEFAULT_DRAIN_TIMEOUT.as_secs()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            max_concurrency: default_max_concurrency(),
            bytes_extension: default_bytes_extension(),
            progress_policy: ProgressPolicy::default(),
            skip_hidden_files: default_skip_hidden_files(),
            recursive: default_recursive(),
            follow_symlinks: false,
            extensions: None,
            max_files: None,
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl UploadConfig {
    /// 校验并发数，返回可用的值
    pub fn resolve_concurrency(&self, requested: Option<usize>) -> Result<usize> {
        let limit = requested.unwrap_or(self.concurrency_limit);
        if limit == 0 {
            anyhow::bail!("并发数必须大于 0");
        }
        if limit > self.max_concurrency {
            anyhow::bail!(
                "并发数 {} 超过上限 {}（可在配置 upload.max_concurrency 中调整）",
                limit,
                self.max_concurrency
            );
        }
        Ok(limit)
    }

    /// 输入收集配置
    pub fn input_options(&self) -> InputOptions {
        InputOptions {
            recursive: self.recursive,
            follow_symlinks: self.follow_symlinks,
            skip_hidden: self.skip_hidden_files,
            extensions: self.extensions.clone(),
            max_files: self.max_files,
        }
    }
}

/// 存储后端
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// 本地目录
    #[default]
    Local,
    /// HTTP PUT
    Http,
}

/// 对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// 本地后端的根目录
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    /// 本地后端单次写入大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// HTTP 后端的基础地址，例如 https://storage.example.com/bucket
    #[serde(default)]
    pub base_url: Option<String>,
    /// HTTP 后端的 Bearer Token
    #[serde(default)]
    pub auth_token: Option<String>,
    /// 单个请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_local_root() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            local_root: default_local_root(),
            chunk_size: default_chunk_size(),
            base_url: None,
            auth_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl StoreConfig {
    /// 按配置创建存储
    pub fn build(&self) -> Result<Arc<dyn RemoteObjectStore>> {
        match self.backend {
            StoreBackend::Local => {
                tracing::info!("使用本地存储: {:?}", self.local_root);
                Ok(Arc::new(LocalFsStore::with_chunk_size(
                    self.local_root.clone(),
                    self.chunk_size,
                )))
            }
            StoreBackend::Http => {
                let store = HttpStore::from_config(self).context("创建 HTTP 存储失败")?;
                Ok(Arc::new(store))
            }
        }
    }
}

impl AppConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.upload.max_concurrency == 0 {
            anyhow::bail!("upload.max_concurrency 必须大于 0");
        }
        self.upload
            .resolve_concurrency(None)
            .context("upload.concurrency_limit 配置无效")?;

        if self.upload.max_files == Some(0) {
            anyhow::bail!("upload.max_files 必须大于 0");
        }

        if self.upload.drain_timeout_secs == 0 {
            anyhow::bail!("upload.drain_timeout_secs 必须大于 0");
        }

        if self.store.chunk_size == 0 {
            anyhow::bail!("store.chunk_size 必须大于 0");
        }
        if self.store.timeout_secs == 0 {
            anyhow::bail!("store.timeout_secs 必须大于 0");
        }
        if self.store.backend == StoreBackend::Http && self.store.base_url.is_none() {
            anyhow::bail!("使用 http 后端时必须配置 store.base_url");
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path.display());
        Ok(())
    }

    /// 加载配置；文件不存在时写出默认配置，解析失败时回退到默认配置
    pub async fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            let default_config = Self::default();
            if let Err(e) = default_config.save_to_file(path).await {
                tracing::error!("保存默认配置失败: {:#}", e);
            }
            return default_config;
        }

        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}
