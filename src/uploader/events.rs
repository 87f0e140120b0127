//! 批次事件类型
//!
//! 调度器对外只有一条事件流：条目事件 + 至多一个批次终止信号。
//! 取消不会产生终止信号，事件流直接结束

use super::{BatchSummary, UploadError};
use crate::store::UploadSnapshot;
use serde::{Deserialize, Serialize};

/// 单个条目的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ItemEvent {
    /// 获得并发位，传输开始
    Started,
    /// 进度更新 (0.0 - 1.0)
    Progress { fraction: f64 },
    /// 上传完成
    Succeeded { snapshot: UploadSnapshot },
    /// 上传失败
    Failed { error: UploadError },
    /// 已取消
    Cancelled,
}

impl ItemEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemEvent::Succeeded { .. } | ItemEvent::Failed { .. } | ItemEvent::Cancelled
        )
    }
}

/// 批次事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// 某个条目的事件
    Item { index: usize, event: ItemEvent },
    /// 全部条目上传成功
    Finished { summary: BatchSummary },
    /// 首个失败，批次中止
    Failed { error: UploadError },
}

impl BatchEvent {
    /// 是否为批次终止信号
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchEvent::Finished { .. } | BatchEvent::Failed { .. })
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            BatchEvent::Item { index, .. } => Some(*index),
            _ => None,
        }
    }
}
