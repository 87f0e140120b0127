// 上传数据源
//
// 调度器接收任何实现了 IntoUploadSource 的条目，
// 转换在任务获得并发位之后、传输开始之前执行（阻塞线程池），
// 转换失败即为该任务的失败，与传输失败同样会中止整个批次

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// 上传数据源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadSource {
    /// 内存中的字节
    Bytes(Vec<u8>),
    /// 本地文件
    File(PathBuf),
}

impl UploadSource {
    /// 已知的数据大小（文件源需要读取元数据，这里不做 IO）
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            UploadSource::Bytes(data) => Some(data.len() as u64),
            UploadSource::File(_) => None,
        }
    }

    /// 文件源的文件名
    pub fn file_name(&self) -> Option<&str> {
        match self {
            UploadSource::Bytes(_) => None,
            UploadSource::File(path) => path.file_name().and_then(|n| n.to_str()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UploadSource::Bytes(_) => "bytes",
            UploadSource::File(_) => "file",
        }
    }
}

/// 数据源转换错误
#[derive(Debug, thiserror::Error)]
pub enum SourceConversionError {
    #[error("源文件不存在: {0}")]
    Missing(PathBuf),
    #[error("源路径不是普通文件: {0}")]
    NotAFile(PathBuf),
    #[error("读取源文件失败: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("数据编码失败: {0}")]
    Encode(String),
}

/// 可转换为上传数据源的条目
pub trait IntoUploadSource: Send + 'static {
    fn into_upload_source(self) -> Result<UploadSource, SourceConversionError>;
}

impl IntoUploadSource for UploadSource {
    fn into_upload_source(self) -> Result<UploadSource, SourceConversionError> {
        Ok(self)
    }
}

impl IntoUploadSource for Vec<u8> {
    fn into_upload_source(self) -> Result<UploadSource, SourceConversionError> {
        Ok(UploadSource::Bytes(self))
    }
}

impl IntoUploadSource for PathBuf {
    fn into_upload_source(self) -> Result<UploadSource, SourceConversionError> {
        check_regular_file(&self)?;
        Ok(UploadSource::File(self))
    }
}

fn check_regular_file(path: &Path) -> Result<(), SourceConversionError> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Ok(()),
        Ok(_) => Err(SourceConversionError::NotAFile(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(SourceConversionError::Missing(path.to_path_buf()))
        }
        Err(e) => Err(SourceConversionError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// 延迟转换：在任务准入后才执行闭包（例如把图片编码为 PNG）
pub struct Deferred<F>(pub F);

impl<F> Deferred<F>
where
    F: FnOnce() -> Result<UploadSource, SourceConversionError> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> fmt::Debug for Deferred<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Deferred(..)")
    }
}

impl<F> IntoUploadSource for Deferred<F>
where
    F: FnOnce() -> Result<UploadSource, SourceConversionError> + Send + 'static,
{
    fn into_upload_source(self) -> Result<UploadSource, SourceConversionError> {
        (self.0)()
    }
}
