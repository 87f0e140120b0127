// 批次上传模块
//
// 组成：
// - 上传源：字节 / 本地文件，以及延迟转换
// - 上传任务：单条目状态机
// - 调度器：有界并发、首个失败中止、协作式取消
// - 结果收集：把事件流折叠成有序结果
// - 输入收集：命令行路径展开

pub mod collector;
pub mod error;
pub mod events;
pub mod folder;
pub mod scheduler;
pub mod source;
pub mod summary;
pub mod task;

pub use collector::{collect_batch, BatchOutcome, ItemState, ResultCollector};
pub use error::{SchedulerError, UploadError};
pub use events::{BatchEvent, ItemEvent};
pub use folder::{InputCollector, InputOptions};
pub use scheduler::{
    BatchOptions, BatchStream, UploadScheduler, DEFAULT_BYTES_EXTENSION, DEFAULT_DRAIN_TIMEOUT,
};
pub use source::{Deferred, IntoUploadSource, SourceConversionError, UploadSource};
pub use summary::{format_elapsed, BatchSummary, RunSummary};
pub use task::{ProgressPolicy, UploadTask, UploadTaskStatus};
