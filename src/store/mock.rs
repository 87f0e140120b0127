// 测试用对象存储桩
//
// 按对象键（字节源的内容 / 文件源的文件名）查找脚本，记录启动顺序和并发峰值

use super::{ProgressReporter, RemoteObjectStore, RemotePath, TransferError, UploadSnapshot};
use crate::uploader::UploadSource;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub(crate) enum MockOutcome {
    Succeed,
    Fail(String),
    /// 一直挂起，直到被取消
    WaitForCancel,
    /// 忽略取消，等待给定时长后成功
    IgnoreCancel(Duration),
}

#[derive(Debug, Clone)]
pub(crate) struct MockPlan {
    pub steps: u64,
    pub step_delay: Duration,
    pub outcome: MockOutcome,
    /// 按顺序上报的已完成量（总量为 steps），None 时依次上报 1..=steps
    pub script: Option<Vec<u64>>,
}

impl MockPlan {
    pub fn succeed(steps: u64, step_delay: Duration) -> Self {
        Self {
            steps,
            step_delay,
            outcome: MockOutcome::Succeed,
            script: None,
        }
    }

    /// 按给定顺序上报进度后成功，可用来模拟回退的进度
    pub fn scripted(reports: &[u64], steps: u64, step_delay: Duration) -> Self {
        Self {
            steps,
            step_delay,
            outcome: MockOutcome::Succeed,
            script: Some(reports.to_vec()),
        }
    }

    pub fn fail_immediately(message: &str) -> Self {
        Self {
            steps: 0,
            step_delay: Duration::ZERO,
            outcome: MockOutcome::Fail(message.to_string()),
            script: None,
        }
    }

    pub fn fail_after(steps: u64, step_delay: Duration, message: &str) -> Self {
        Self {
            steps,
            step_delay,
            outcome: MockOutcome::Fail(message.to_string()),
            script: None,
        }
    }

    pub fn ignore_cancel(duration: Duration) -> Self {
        Self {
            steps: 0,
            step_delay: Duration::ZERO,
            outcome: MockOutcome::IgnoreCancel(duration),
            script: None,
        }
    }

    pub fn hang() -> Self {
        Self {
            steps: 1,
            step_delay: Duration::ZERO,
            outcome: MockOutcome::WaitForCancel,
            script: None,
        }
    }
}

pub(crate) struct MockStore {
    plans: HashMap<String, MockPlan>,
    default_plan: MockPlan,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            plans: HashMap::new(),
            default_plan: MockPlan::succeed(2, Duration::from_millis(1)),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn with_plan(mut self, key: &str, plan: MockPlan) -> Self {
        self.plans.insert(key.to_string(), plan);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    fn key_of(source: &UploadSource) -> String {
        match source {
            UploadSource::Bytes(data) => String::from_utf8_lossy(data).into_owned(),
            UploadSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    async fn run_plan(
        key: &str,
        plan: &MockPlan,
        destination: &RemotePath,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadSnapshot, TransferError> {
        let reports = match &plan.script {
            Some(script) => script.clone(),
            None => (1..=plan.steps).collect(),
        };
        for completed in reports {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(plan.step_delay) => {}
            }
            progress.report(completed, plan.steps);
        }

        match &plan.outcome {
            MockOutcome::Succeed => Ok(UploadSnapshot {
                remote_path: destination.to_string(),
                size: plan.steps,
                location: key.to_string(),
                completed_at: 0,
            }),
            MockOutcome::Fail(message) => Err(TransferError::Other(message.clone())),
            MockOutcome::WaitForCancel => {
                cancel.cancelled().await;
                Err(TransferError::Cancelled)
            }
            MockOutcome::IgnoreCancel(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(UploadSnapshot {
                    remote_path: destination.to_string(),
                    size: 0,
                    location: key.to_string(),
                    completed_at: 0,
                })
            }
        }
    }
}

#[async_trait]
impl RemoteObjectStore for MockStore {
    async fn upload(
        &self,
        source: UploadSource,
        destination: &RemotePath,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<UploadSnapshot, TransferError> {
        let key = Self::key_of(&source);
        let plan = self
            .plans
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.default_plan.clone());

        self.started.lock().push(key.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = Self::run_plan(&key, &plan, destination, &progress, &cancel).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if matches!(result, Err(TransferError::Cancelled)) {
            self.cancelled.lock().push(key);
        }
        result
    }
}
