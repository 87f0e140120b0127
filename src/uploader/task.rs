// 上传任务定义
//
// 每个批次条目对应一个 UploadTask，只由批次协调器修改。
// 状态机：Queued -> InFlight -> {Succeeded, Failed, Cancelled}
//        Queued -> {Failed, Cancelled}
// 终态之后的任何变更都会被拒绝

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// 上传任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadTaskStatus {
    /// 等待并发位
    Queued,
    /// 传输中
    InFlight,
    /// 已完成
    Succeeded,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl UploadTaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadTaskStatus::Succeeded | UploadTaskStatus::Failed | UploadTaskStatus::Cancelled
        )
    }
}

/// 进度处理策略
///
/// 存储不保证进度单调，默认按收到的值转发（只限定在 [0, 1]）
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPolicy {
    #[default]
    PassThrough,
    /// 只保留运行最大值，回退的进度按最大值上报
    RunningMax,
}

/// 上传任务
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// 在批次中的位置，生命周期内不变
    pub index: usize,
    pub status: UploadTaskStatus,
    /// 最近一次进度 (0.0 - 1.0)
    pub progress: Option<f64>,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始传输时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 进入终态的时间 (Unix timestamp)
    pub finished_at: Option<i64>,
    pub error: Option<String>,
    cancel_token: CancellationToken,
}

impl UploadTask {
    /// 创建排队中的任务，取消令牌挂在批次令牌之下
    pub fn new(index: usize, batch_token: &CancellationToken) -> Self {
        Self {
            index,
            status: UploadTaskStatus::Queued,
            progress: None,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            finished_at: None,
            error: None,
            cancel_token: batch_token.child_token(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 通知底层传输停止（状态要等存储确认后才变为 Cancelled）
    pub fn request_cancel(&self) {
        self.cancel_token.cancel();
    }

    /// 标记为传输中
    pub fn mark_in_flight(&mut self) -> bool {
        if self.status != UploadTaskStatus::Queued {
            return false;
        }
        self.status = UploadTaskStatus::InFlight;
        self.started_at = Some(chrono::Utc::now().timestamp());
        true
    }

    /// 记录进度，返回应当对外发布的值
    ///
    /// 非传输中、或值不是有限数时返回 None
    pub fn update_progress(&mut self, fraction: f64, policy: ProgressPolicy) -> Option<f64> {
        if self.status != UploadTaskStatus::InFlight || !fraction.is_finite() {
            return None;
        }

        let mut value = fraction.clamp(0.0, 1.0);
        if policy == ProgressPolicy::RunningMax {
            if let Some(previous) = self.progress {
                value = value.max(previous);
            }
        }
        self.progress = Some(value);
        Some(value)
    }

    /// 标记为已完成
    pub fn mark_succeeded(&mut self) -> bool {
        if self.status != UploadTaskStatus::InFlight {
            return false;
        }
        self.status = UploadTaskStatus::Succeeded;
        self.progress = Some(1.0);
        self.finished_at = Some(chrono::Utc::now().timestamp());
        true
    }

    /// 标记为失败（排队中的转换失败也走这里）
    pub fn mark_failed(&mut self, error: String) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = UploadTaskStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(chrono::Utc::now().timestamp());
        true
    }

    /// 标记为已取消
    pub fn mark_cancelled(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = UploadTaskStatus::Cancelled;
        self.finished_at = Some(chrono::Utc::now().timestamp());
        true
    }
}
