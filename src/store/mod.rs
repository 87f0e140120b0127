// 对象存储模块
//
// 调度器只依赖 RemoteObjectStore 这一能力：
// - 本地目录（LocalFsStore）
// - HTTP 对象存储（HttpStore，PUT 上传）
// - 测试桩（仅测试构建）
//
// 一次 upload 调用即一次传输：进度通过 ProgressReporter 推送，
// 返回值即完成/失败事件，取消通过 CancellationToken 协作完成

pub mod http;
pub mod local;
#[cfg(test)]
pub(crate) mod mock;

use crate::uploader::UploadSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use http::HttpStore;
pub use local::LocalFsStore;

/// 远程对象路径
///
/// 按段保存，显示时以 `/` 连接。批次目录 + 对象名 两段是最常见的形态
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    segments: Vec<String>,
}

impl RemotePath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// 追加一段，返回新路径
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// 最后一段（对象名）
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// 倒数第二段（所在目录名）
    pub fn parent_name(&self) -> Option<&str> {
        let len = self.segments.len();
        if len < 2 {
            return None;
        }
        self.segments.get(len - 2).map(String::as_str)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// 传输进度（字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub completed_bytes: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    /// 完成比例，总大小未知（0）时为 0
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.completed_bytes as f64 / self.total_bytes as f64
    }
}

/// 进度上报器
///
/// 存储实现每传完一段数据调用一次 `report`，调度器负责把它转换成批次事件
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(TransferProgress) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(TransferProgress) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// 丢弃所有进度的上报器
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, completed_bytes: u64, total_bytes: u64) {
        (self.sink)(TransferProgress {
            completed_bytes,
            total_bytes,
        });
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

/// 上传完成后存储返回的描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSnapshot {
    /// 远程路径（目录/对象名）
    pub remote_path: String,
    /// 已写入字节数
    pub size: u64,
    /// 存储侧定位信息（URL 或本地绝对路径）
    pub location: String,
    /// 完成时间 (Unix timestamp)
    pub completed_at: i64,
}

/// 传输错误
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// 存储确认取消
    #[error("传输已取消")]
    Cancelled,
    #[error("非法的远程路径: {0}")]
    InvalidPath(String),
    #[error("读写失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("服务端拒绝上传 (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("{0}")]
    Other(String),
}

/// 远程对象存储能力
///
/// 实现方必须：
/// - 在 `cancel` 触发后尽快返回 `Err(TransferError::Cancelled)`
/// - 对同一次调用按时间顺序上报进度，返回后不再上报
#[async_trait]
pub trait RemoteObjectStore: Send + Sync + 'static {
    async fn upload(
        &self,
        source: UploadSource,
        destination: &RemotePath,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<UploadSnapshot, TransferError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_remote_path_display() {
        let folder = RemotePath::new(["2024-05-01-101500.123"]);
        let object = folder.child("cat.png");

        assert_eq!(object.to_string(), "2024-05-01-101500.123/cat.png");
        assert_eq!(object.file_name(), Some("cat.png"));
        assert_eq!(object.parent_name(), Some("2024-05-01-101500.123"));
        assert_eq!(folder.parent_name(), None);
    }

    #[test]
    fn test_progress_fraction() {
        let p = TransferProgress {
            completed_bytes: 256,
            total_bytes: 1024,
        };
        assert_eq!(p.fraction(), 0.25);

        let empty = TransferProgress {
            completed_bytes: 0,
            total_bytes: 0,
        };
        assert_eq!(empty.fraction(), 0.0);
    }

    #[test]
    fn test_reporter_forwards_to_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(move |p| sink.lock().push(p.completed_bytes));

        reporter.report(10, 30);
        reporter.clone().report(30, 30);

        assert_eq!(*seen.lock(), vec![10, 30]);
    }
}
