// Batch Uploader Library
// 有界并发批次上传核心库

// 配置管理模块
pub mod config;

// 🔥 日志系统
pub mod logging;

// 对象存储模块
pub mod store;

// 批次上传模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, StoreBackend, StoreConfig, UploadConfig};
pub use store::{
    HttpStore, LocalFsStore, ProgressReporter, RemoteObjectStore, RemotePath, TransferError,
    TransferProgress, UploadSnapshot,
};
pub use uploader::{
    collect_batch, BatchEvent, BatchOptions, BatchStream, BatchSummary, ItemEvent,
    ResultCollector, RunSummary, SchedulerError, UploadError, UploadScheduler, UploadSource,
};
