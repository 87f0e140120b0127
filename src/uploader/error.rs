// 批次级错误

use serde::{Deserialize, Serialize};

/// 批次失败原因（首个失败即中止批次）
///
/// 底层错误不可克隆，这里只保留消息文本，以便同时放进条目事件和批次事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadError {
    /// 传输开始前的数据准备失败
    #[error("第 {index} 项数据准备失败: {message}")]
    SourceConversion { index: usize, message: String },
    /// 存储报告的传输失败
    #[error("第 {index} 项上传失败: {message}")]
    Transfer { index: usize, message: String },
    /// 批次被调用方取消（只由结果收集器产生，不会出现在事件流里）
    #[error("上传已取消")]
    Cancelled,
}

impl UploadError {
    /// 触发失败的条目序号
    pub fn index(&self) -> Option<usize> {
        match self {
            UploadError::SourceConversion { index, .. } | UploadError::Transfer { index, .. } => {
                Some(*index)
            }
            UploadError::Cancelled => None,
        }
    }
}

/// 提交批次时的错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("已有批次正在上传，请等待其结束或取消后再提交")]
    BatchInProgress,
    #[error("并发数必须大于 0")]
    InvalidConcurrency,
}
