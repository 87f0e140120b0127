//! 本地目录存储
//!
//! 把对象写到 `root/<目录>/<对象名>`，按固定块大小拷贝，每块上报一次进度并检查取消。
//! 写入先落到 `.part` 临时文件，完成后再重命名，失败或取消时删除临时文件

use super::{ProgressReporter, RemoteObjectStore, RemotePath, TransferError, UploadSnapshot};
use crate::uploader::UploadSource;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 默认拷贝块大小（256KB）
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// 本地目录存储
#[derive(Debug, Clone)]
pub struct LocalFsStore {
    root: PathBuf,
    chunk_size: usize,
}

impl LocalFsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_chunk_size(root, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            root: root.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 把远程路径映射到根目录下，拒绝会逃出根目录的段
    fn resolve(&self, destination: &RemotePath) -> Result<PathBuf, TransferError> {
        if destination.segments().is_empty() {
            return Err(TransferError::InvalidPath("路径为空".to_string()));
        }

        let mut target = self.root.clone();
        for segment in destination.segments() {
            let invalid = segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains('/')
                || segment.contains('\\');
            if invalid {
                return Err(TransferError::InvalidPath(destination.to_string()));
            }
            target.push(segment);
        }
        Ok(target)
    }

    async fn copy_chunks<R>(
        &self,
        mut reader: R,
        part_path: &Path,
        total: u64,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = fs::File::create(part_path).await?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut written = 0u64;

        progress.report(0, total);
        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n]).await?;
            written += n as u64;
            progress.report(written, total.max(written));
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl RemoteObjectStore for LocalFsStore {
    async fn upload(
        &self,
        source: UploadSource,
        destination: &RemotePath,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<UploadSnapshot, TransferError> {
        let target = self.resolve(destination)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut part_name = target.as_os_str().to_owned();
        part_name.push(".part");
        let part_path = PathBuf::from(part_name);

        debug!("本地写入: {} -> {:?}", destination, target);

        let result = match &source {
            UploadSource::Bytes(data) => {
                self.copy_chunks(&data[..], &part_path, data.len() as u64, &progress, &cancel)
                    .await
            }
            UploadSource::File(path) => {
                let file = fs::File::open(path).await?;
                let total = file.metadata().await?.len();
                self.copy_chunks(file, &part_path, total, &progress, &cancel)
                    .await
            }
        };

        let written = match result {
            Ok(written) => written,
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&part_path).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!("清理临时文件失败: {:?}, 错误: {}", part_path, remove_err);
                    }
                }
                return Err(e);
            }
        };

        fs::rename(&part_path, &target).await?;

        Ok(UploadSnapshot {
            remote_path: destination.to_string(),
            size: written,
            location: target.display().to_string(),
            completed_at: chrono::Utc::now().timestamp(),
        })
    }
}
