// 批次上传调度器
//
//  实现：有界并发的批次上传
//
// 功能：
// - 滑动窗口准入：按序号升序准入，同时最多 K 个任务持有并发位（Semaphore 许可）
// - 单协调器：批次状态只在一个 tokio 任务里修改，传输任务通过 mpsc 汇报
// - 首个失败即中止：停止准入、取消在传任务、只上报一次批次失败
// - 协作式取消：批次令牌 + 每任务子令牌，存储确认后任务才进入 Cancelled
// - 同一调度器同时只允许一个批次

use crate::config::UploadConfig;
use crate::store::{
    ProgressReporter, RemoteObjectStore, RemotePath, TransferError, TransferProgress,
    UploadSnapshot,
};
use crate::uploader::summary::format_elapsed;
use crate::uploader::{
    BatchEvent, BatchSummary, IntoUploadSource, ItemEvent, ProgressPolicy, SchedulerError,
    SourceConversionError, UploadError, UploadSource, UploadTask,
};
use futures::Stream;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 字节源默认扩展名
pub const DEFAULT_BYTES_EXTENSION: &str = "png";

/// 批次中止后等待在传任务确认取消的默认时长
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

// =====================================================
// 批次参数
// =====================================================

/// 批次参数
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// 并发上限 K（必须 >= 1）
    pub concurrency_limit: usize,
    /// 远程目录名，None 时使用提交时刻的本地时间
    pub folder_name: Option<String>,
    /// 字节源对象名的扩展名
    pub bytes_extension: String,
    pub progress_policy: ProgressPolicy,
    /// 失败或取消后等待在传任务退出的最长时间，超时后强制中止
    pub drain_timeout: Duration,
}

impl BatchOptions {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit,
            folder_name: None,
            bytes_extension: DEFAULT_BYTES_EXTENSION.to_string(),
            progress_policy: ProgressPolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_folder_name(mut self, folder_name: impl Into<String>) -> Self {
        self.folder_name = Some(folder_name.into());
        self
    }

    pub fn with_bytes_extension(mut self, extension: impl Into<String>) -> Self {
        self.bytes_extension = extension.into();
        self
    }

    pub fn with_progress_policy(mut self, policy: ProgressPolicy) -> Self {
        self.progress_policy = policy;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::new(1)
    }
}

impl From<&UploadConfig> for BatchOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit,
            folder_name: None,
            bytes_extension: config.bytes_extension.clone(),
            progress_policy: config.progress_policy,
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
        }
    }
}

fn default_folder_name() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H%M%S%.3f").to_string()
}

/// 对象名：文件源沿用文件名，字节源使用随机 UUID
fn object_name(source: &UploadSource, bytes_extension: &str) -> String {
    if let Some(name) = source.file_name() {
        return name.to_string();
    }
    let extension = bytes_extension.trim_start_matches('.');
    if extension.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        format!("{}.{}", Uuid::new_v4(), extension)
    }
}

/// 批次内对象名登记，同名文件追加条目序号
#[derive(Debug, Default)]
struct NameRegistry {
    claimed: Mutex<HashSet<String>>,
}

impl NameRegistry {
    fn claim(&self, preferred: String, index: usize) -> String {
        let mut claimed = self.claimed.lock();
        if claimed.insert(preferred.clone()) {
            return preferred;
        }

        let (stem, extension) = match preferred.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
            _ => (preferred.clone(), None),
        };

        let mut attempt = 0usize;
        loop {
            let suffix = if attempt == 0 {
                index.to_string()
            } else {
                format!("{}_{}", index, attempt)
            };
            let candidate = match &extension {
                Some(ext) => format!("{}_{}.{}", stem, suffix, ext),
                None => format!("{}_{}", stem, suffix),
            };
            if claimed.insert(candidate.clone()) {
                return candidate;
            }
            attempt += 1;
        }
    }
}

// =====================================================
// 事件流
// =====================================================

/// 批次事件流
///
/// 以终止信号（完成/失败）或取消后的流结束收尾。
/// 丢弃事件流等同于取消该批次
#[derive(Debug)]
pub struct BatchStream {
    events: mpsc::UnboundedReceiver<BatchEvent>,
    cancel_token: CancellationToken,
    total: usize,
    folder_name: String,
}

impl BatchStream {
    /// 下一个事件，流结束时返回 None
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// 取消本批次（批次已结束时无效果）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }
}

impl Stream for BatchStream {
    type Item = BatchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

// =====================================================
// 调度器
// =====================================================

/// 进行中的批次
#[derive(Debug)]
struct ActiveBatch {
    id: u64,
    cancel_token: CancellationToken,
}

/// 批次上传调度器
///
/// 存储通过构造函数注入；`upload` 必须在 tokio 运行时内调用
#[derive(Clone)]
pub struct UploadScheduler {
    store: Arc<dyn RemoteObjectStore>,
    active: Arc<Mutex<Option<ActiveBatch>>>,
    next_batch_id: Arc<AtomicU64>,
}

impl UploadScheduler {
    pub fn new(store: Arc<dyn RemoteObjectStore>) -> Self {
        Self {
            store,
            active: Arc::new(Mutex::new(None)),
            next_batch_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 是否有批次在运行
    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    /// 以默认参数和指定并发数提交批次
    pub fn upload_with_limit<I>(
        &self,
        sources: Vec<I>,
        concurrency_limit: usize,
    ) -> Result<BatchStream, SchedulerError>
    where
        I: IntoUploadSource,
    {
        self.upload(sources, BatchOptions::new(concurrency_limit))
    }

    /// 提交批次
    ///
    /// 上一个批次的事件流结束（或被取消）之前再次提交会返回 `BatchInProgress`。
    /// 首个失败时 `BatchEvent::Failed` 会立即发出，但事件流要等在传任务退出后才结束，
    /// 最长为 `BatchOptions::drain_timeout`；这段时间内调度器仍视为忙碌，
    /// 可以用 `is_busy` 判断，或读完事件流后再提交
    pub fn upload<I>(
        &self,
        sources: Vec<I>,
        options: BatchOptions,
    ) -> Result<BatchStream, SchedulerError>
    where
        I: IntoUploadSource,
    {
        if options.concurrency_limit == 0 {
            return Err(SchedulerError::InvalidConcurrency);
        }

        let batch_id = self.next_batch_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel_token = CancellationToken::new();
        {
            let mut active = self.active.lock();
            if let Some(batch) = active.as_ref() {
                warn!("批次 #{} 仍在进行，拒绝新的上传批次", batch.id);
                return Err(SchedulerError::BatchInProgress);
            }
            *active = Some(ActiveBatch {
                id: batch_id,
                cancel_token: cancel_token.clone(),
            });
        }

        let total = sources.len();
        let folder_name = options
            .folder_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(default_folder_name);

        info!(
            "🚀 提交上传批次 #{}: {} 项, 并发数={}, 目录={}",
            batch_id, total, options.concurrency_limit, folder_name
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        let coordinator = BatchCoordinator {
            batch_id,
            store: self.store.clone(),
            folder: RemotePath::new([folder_name.clone()]),
            folder_name: folder_name.clone(),
            names: Arc::new(NameRegistry::default()),
            tasks: (0..total).map(|i| UploadTask::new(i, &cancel_token)).collect(),
            queue: sources.into_iter().enumerate().collect(),
            semaphore: Arc::new(Semaphore::new(
                options.concurrency_limit.min(Semaphore::MAX_PERMITS),
            )),
            permits: HashMap::new(),
            workers: JoinSet::new(),
            worker_tx,
            worker_rx,
            events: event_tx,
            cancel_token: cancel_token.clone(),
            slot: self.active.clone(),
            started_at: Instant::now(),
            succeeded: 0,
            cancelling: false,
            halted: false,
            options,
        };
        tokio::spawn(coordinator.run());

        Ok(BatchStream {
            events: event_rx,
            cancel_token,
            total,
            folder_name,
        })
    }

    /// 取消当前批次：停止准入、取消所有在传任务
    ///
    /// 没有进行中的批次时不做任何事
    pub fn cancel_all(&self) {
        match self.active.lock().as_ref() {
            Some(batch) => {
                info!("取消上传批次 #{}", batch.id);
                batch.cancel_token.cancel();
            }
            None => debug!("没有进行中的上传批次，忽略取消请求"),
        }
    }
}

// =====================================================
// 传输任务 -> 协调器
// =====================================================

enum WorkerMessage {
    Started {
        index: usize,
    },
    Progress {
        index: usize,
        progress: TransferProgress,
    },
    Finished {
        index: usize,
        outcome: WorkerOutcome,
    },
}

enum WorkerOutcome {
    Uploaded(UploadSnapshot),
    ConversionFailed(SourceConversionError),
    TransferFailed(TransferError),
}

/// 保证每个传输任务恰好汇报一次结束（任务 panic 时由 Drop 补发）
struct CompletionGuard {
    index: usize,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    finished: bool,
}

impl CompletionGuard {
    fn new(index: usize, tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self {
            index,
            tx,
            finished: false,
        }
    }

    fn finish(mut self, outcome: WorkerOutcome) {
        self.finished = true;
        let _ = self.tx.send(WorkerMessage::Finished {
            index: self.index,
            outcome,
        });
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.tx.send(WorkerMessage::Finished {
                index: self.index,
                outcome: WorkerOutcome::TransferFailed(TransferError::Other(
                    "上传任务异常退出".to_string(),
                )),
            });
        }
    }
}

struct TransferWorker {
    index: usize,
    store: Arc<dyn RemoteObjectStore>,
    folder: RemotePath,
    names: Arc<NameRegistry>,
    bytes_extension: String,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl TransferWorker {
    async fn run<I: IntoUploadSource>(self, item: I) {
        let guard = CompletionGuard::new(self.index, self.tx.clone());

        let source = match tokio::task::spawn_blocking(move || item.into_upload_source()).await {
            Ok(Ok(source)) => source,
            Ok(Err(e)) => return guard.finish(WorkerOutcome::ConversionFailed(e)),
            Err(e) => {
                return guard.finish(WorkerOutcome::ConversionFailed(
                    SourceConversionError::Encode(format!("转换任务异常: {}", e)),
                ))
            }
        };

        if self.cancel.is_cancelled() {
            return guard.finish(WorkerOutcome::TransferFailed(TransferError::Cancelled));
        }

        let name = self
            .names
            .claim(object_name(&source, &self.bytes_extension), self.index);
        let destination = self.folder.child(name);

        let _ = self.tx.send(WorkerMessage::Started { index: self.index });
        debug!(
            "[第 {} 项] 开始传输: {} ({})",
            self.index,
            destination,
            source.kind()
        );

        let index = self.index;
        let progress_tx = self.tx.clone();
        let reporter = ProgressReporter::new(move |progress| {
            let _ = progress_tx.send(WorkerMessage::Progress { index, progress });
        });

        let outcome = match self
            .store
            .upload(source, &destination, reporter, self.cancel.clone())
            .await
        {
            Ok(snapshot) => WorkerOutcome::Uploaded(snapshot),
            Err(e) => WorkerOutcome::TransferFailed(e),
        };
        guard.finish(outcome);
    }
}

// =====================================================
// 批次协调器
// =====================================================

enum RunEnd {
    Finished,
    Failed(UploadError),
    Cancelled,
}

enum Step {
    CancelRequested,
    Message(Option<WorkerMessage>),
}

/// 批次协调器：批次状态的唯一写入方
struct BatchCoordinator<I> {
    batch_id: u64,
    store: Arc<dyn RemoteObjectStore>,
    options: BatchOptions,
    folder: RemotePath,
    folder_name: String,
    names: Arc<NameRegistry>,
    /// 尚未准入的条目
    queue: VecDeque<(usize, I)>,
    tasks: Vec<UploadTask>,
    semaphore: Arc<Semaphore>,
    /// 持有并发位的任务（index -> 许可），任务进入终态时释放
    permits: HashMap<usize, OwnedSemaphorePermit>,
    workers: JoinSet<()>,
    worker_tx: mpsc::UnboundedSender<WorkerMessage>,
    worker_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    events: mpsc::UnboundedSender<BatchEvent>,
    cancel_token: CancellationToken,
    slot: Arc<Mutex<Option<ActiveBatch>>>,
    started_at: Instant,
    succeeded: usize,
    /// 调用方请求了取消
    cancelling: bool,
    /// 停止准入（失败或取消）
    halted: bool,
}

impl<I: IntoUploadSource> BatchCoordinator<I> {
    async fn run(mut self) {
        match self.drive().await {
            RunEnd::Finished => {
                let summary = BatchSummary {
                    folder_name: self.folder_name.clone(),
                    total: self.tasks.len(),
                    concurrency_limit: self.options.concurrency_limit,
                    elapsed: self.started_at.elapsed(),
                };
                info!(
                    "✓ 批次 #{} 全部上传完成: {} 项, 耗时 {}",
                    self.batch_id,
                    summary.total,
                    format_elapsed(summary.elapsed.as_secs_f64())
                );
                self.release_slot();
                self.emit(BatchEvent::Finished { summary });
            }
            RunEnd::Failed(error) => {
                error!("批次 #{} 中止: {}", self.batch_id, error);
                self.emit(BatchEvent::Failed { error });
                self.drain_workers().await;
                self.release_slot();
            }
            RunEnd::Cancelled => {
                info!(
                    "批次 #{} 已取消 (已完成 {}/{})",
                    self.batch_id,
                    self.succeeded,
                    self.tasks.len()
                );
                self.drain_workers().await;
                self.release_slot();
            }
        }
        // self 在此释放，事件发送端关闭，事件流结束
    }

    async fn drive(&mut self) -> RunEnd {
        loop {
            self.admit_ready();
            if let Some(end) = self.settled() {
                return end;
            }

            let cancel_token = self.cancel_token.clone();
            let listen_cancel = !self.cancelling;
            let step = tokio::select! {
                biased;
                _ = cancel_token.cancelled(), if listen_cancel => Step::CancelRequested,
                message = self.worker_rx.recv() => Step::Message(message),
            };

            match step {
                Step::CancelRequested => self.begin_cancel(),
                Step::Message(Some(message)) => {
                    if let Some(error) = self.handle_message(message) {
                        self.halt();
                        return RunEnd::Failed(error);
                    }
                }
                // 协调器自己持有发送端，不会走到这里
                Step::Message(None) => return RunEnd::Cancelled,
            }

            while self.workers.try_join_next().is_some() {}
        }
    }

    fn settled(&self) -> Option<RunEnd> {
        if self.succeeded == self.tasks.len() {
            return Some(RunEnd::Finished);
        }
        if self.queue.is_empty() && self.permits.is_empty() {
            return Some(RunEnd::Cancelled);
        }
        None
    }

    /// 按序号升序准入，直到并发位用完
    fn admit_ready(&mut self) {
        while !self.halted && !self.queue.is_empty() {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                break;
            };
            let Some((index, item)) = self.queue.pop_front() else {
                break;
            };
            self.permits.insert(index, permit);

            debug!(
                "准入第 {} 项 (占用并发位 {}/{})",
                index,
                self.permits.len(),
                self.options.concurrency_limit
            );

            let worker = TransferWorker {
                index,
                store: self.store.clone(),
                folder: self.folder.clone(),
                names: self.names.clone(),
                bytes_extension: self.options.bytes_extension.clone(),
                cancel: self.tasks[index].cancel_token().clone(),
                tx: self.worker_tx.clone(),
            };
            self.workers.spawn(worker.run(item));
        }
    }

    /// 处理一条传输汇报，返回首个失败
    fn handle_message(&mut self, message: WorkerMessage) -> Option<UploadError> {
        match message {
            WorkerMessage::Started { index } => {
                if self.tasks.get_mut(index).is_some_and(|t| t.mark_in_flight()) {
                    self.emit_item(index, ItemEvent::Started);
                }
                None
            }
            WorkerMessage::Progress { index, progress } => {
                let policy = self.options.progress_policy;
                let published = self
                    .tasks
                    .get_mut(index)
                    .and_then(|t| t.update_progress(progress.fraction(), policy));
                if let Some(fraction) = published {
                    self.emit_item(index, ItemEvent::Progress { fraction });
                }
                None
            }
            WorkerMessage::Finished { index, outcome } => self.handle_finished(index, outcome),
        }
    }

    fn handle_finished(&mut self, index: usize, outcome: WorkerOutcome) -> Option<UploadError> {
        // 归还并发位
        self.permits.remove(&index);
        if index >= self.tasks.len() {
            return None;
        }

        match outcome {
            WorkerOutcome::Uploaded(snapshot) => {
                if self.tasks[index].mark_succeeded() {
                    self.succeeded += 1;
                    debug!(
                        "[第 {} 项] 上传完成: {} ({}/{})",
                        index,
                        snapshot.remote_path,
                        self.succeeded,
                        self.tasks.len()
                    );
                    self.emit_item(index, ItemEvent::Succeeded { snapshot });
                }
                None
            }
            // 取消期间的任何失败都视为取消确认
            _ if self.cancelling => {
                if self.tasks[index].mark_cancelled() {
                    self.emit_item(index, ItemEvent::Cancelled);
                }
                None
            }
            WorkerOutcome::ConversionFailed(e) => self.fail_task(
                index,
                UploadError::SourceConversion {
                    index,
                    message: e.to_string(),
                },
            ),
            WorkerOutcome::TransferFailed(e) => self.fail_task(
                index,
                UploadError::Transfer {
                    index,
                    message: e.to_string(),
                },
            ),
        }
    }

    fn fail_task(&mut self, index: usize, error: UploadError) -> Option<UploadError> {
        if !self.tasks[index].mark_failed(error.to_string()) {
            return None;
        }
        warn!("[第 {} 项] {}", index, error);
        self.emit_item(
            index,
            ItemEvent::Failed {
                error: error.clone(),
            },
        );
        Some(error)
    }

    /// 首个失败后：停止准入，取消在传任务，之后的汇报一律丢弃
    fn halt(&mut self) {
        self.halted = true;
        for (index, _) in self.queue.drain(..) {
            self.tasks[index].mark_cancelled();
        }
        for index in self.permits.keys() {
            self.tasks[*index].request_cancel();
        }
        info!(
            "批次 #{} 停止准入，取消 {} 个在传任务",
            self.batch_id,
            self.permits.len()
        );
    }

    /// 调用方取消：排队任务立即取消，在传任务等待存储确认
    fn begin_cancel(&mut self) {
        self.cancelling = true;
        self.halted = true;
        info!(
            "批次 #{} 收到取消请求: 在传 {} 项, 排队 {} 项",
            self.batch_id,
            self.permits.len(),
            self.queue.len()
        );

        let queued: Vec<usize> = self.queue.drain(..).map(|(index, _)| index).collect();
        for index in queued {
            if self.tasks[index].mark_cancelled() {
                self.emit_item(index, ItemEvent::Cancelled);
            }
        }
        for index in self.permits.keys() {
            self.tasks[*index].request_cancel();
        }
    }

    async fn drain_workers(&mut self) {
        let drained = tokio::time::timeout(self.options.drain_timeout, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "批次 #{} 有 {} 个传输任务未响应取消，强制中止",
                self.batch_id,
                self.workers.len()
            );
            self.workers.abort_all();
        }
        self.permits.clear();
    }

    fn release_slot(&self) {
        let mut active = self.slot.lock();
        if active.as_ref().map(|b| b.id) == Some(self.batch_id) {
            *active = None;
        }
    }

    fn emit_item(&self, index: usize, event: ItemEvent) {
        self.emit(BatchEvent::Item { index, event });
    }

    fn emit(&self, event: BatchEvent) {
        // 订阅方已断开时，Drop 已经触发了取消
        let _ = self.events.send(event);
    }
}
