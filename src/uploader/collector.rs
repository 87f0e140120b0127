//! 批次结果收集器
//!
//! 把事件流折叠成两份视图：
//! - 按提交顺序排列的条目状态（供界面逐项展示）
//! - 批次的单一结果：全部成功时得到有序的快照列表，否则得到首个失败
//!
//! 收集器只是事件的消费方，不持有任何调度状态

use crate::store::UploadSnapshot;
use crate::uploader::{BatchEvent, BatchStream, BatchSummary, ItemEvent, UploadError};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// 单个条目在展示层的状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemState {
    /// 尚未开始
    Pending,
    /// 上传中，progress 为最近一次进度
    Uploading { progress: Option<f64> },
    Succeeded { snapshot: UploadSnapshot },
    Failed { message: String },
    Cancelled,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Succeeded { .. } | ItemState::Failed { .. } | ItemState::Cancelled
        )
    }

    /// 用于汇总进度的完成比例
    fn fraction(&self) -> f64 {
        match self {
            ItemState::Pending | ItemState::Cancelled => 0.0,
            ItemState::Uploading { progress } => progress.unwrap_or(0.0),
            ItemState::Succeeded { .. } | ItemState::Failed { .. } => 1.0,
        }
    }
}

/// 批次结果
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// 事件流尚未结束
    Running,
    Finished(BatchSummary),
    Failed(UploadError),
    /// 事件流在没有终止信号的情况下结束
    Cancelled,
}

/// 批次结果收集器
#[derive(Debug, Clone)]
pub struct ResultCollector {
    entries: Vec<ItemState>,
    outcome: BatchOutcome,
}

impl ResultCollector {
    pub fn new(total: usize) -> Self {
        Self {
            entries: vec![ItemState::Pending; total],
            outcome: BatchOutcome::Running,
        }
    }

    /// 应用一个事件
    ///
    /// 终止信号之后的事件、越界序号、终态条目的后续事件都会被忽略
    pub fn apply(&mut self, event: &BatchEvent) {
        if self.outcome != BatchOutcome::Running {
            return;
        }

        match event {
            BatchEvent::Item { index, event } => {
                let Some(entry) = self.entries.get_mut(*index) else {
                    return;
                };
                if entry.is_terminal() {
                    return;
                }
                *entry = match event {
                    ItemEvent::Started => ItemState::Uploading { progress: None },
                    ItemEvent::Progress { fraction } => ItemState::Uploading {
                        progress: Some(*fraction),
                    },
                    ItemEvent::Succeeded { snapshot } => ItemState::Succeeded {
                        snapshot: snapshot.clone(),
                    },
                    ItemEvent::Failed { error } => ItemState::Failed {
                        message: error.to_string(),
                    },
                    ItemEvent::Cancelled => ItemState::Cancelled,
                };
            }
            BatchEvent::Finished { summary } => {
                self.outcome = BatchOutcome::Finished(summary.clone());
            }
            BatchEvent::Failed { error } => {
                self.outcome = BatchOutcome::Failed(error.clone());
            }
        }
    }

    /// 事件流已结束；没有收到终止信号即视为取消
    pub fn finish_stream(&mut self) {
        if self.outcome == BatchOutcome::Running {
            self.outcome = BatchOutcome::Cancelled;
        }
    }

    pub fn entries(&self) -> &[ItemState] {
        &self.entries
    }

    pub fn outcome(&self) -> &BatchOutcome {
        &self.outcome
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    /// 批次失败或取消时的错误
    pub fn error(&self) -> Option<&UploadError> {
        match &self.outcome {
            BatchOutcome::Failed(error) => Some(error),
            BatchOutcome::Cancelled => Some(&UploadError::Cancelled),
            _ => None,
        }
    }

    /// 全部成功后按提交顺序返回快照，其余情况返回 None
    pub fn snapshots(&self) -> Option<Vec<UploadSnapshot>> {
        if !matches!(self.outcome, BatchOutcome::Finished(_)) {
            return None;
        }
        self.entries
            .iter()
            .map(|entry| match entry {
                ItemState::Succeeded { snapshot } => Some(snapshot.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn uploaded_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, ItemState::Succeeded { .. }))
            .count()
    }

    /// 批次整体进度 (0.0 - 1.0)，失败条目按已结束计算
    pub fn overall_progress(&self) -> f64 {
        if self.entries.is_empty() {
            return match self.outcome {
                BatchOutcome::Finished(_) => 1.0,
                _ => 0.0,
            };
        }
        let sum: f64 = self.entries.iter().map(ItemState::fraction).sum();
        sum / self.entries.len() as f64
    }

    /// 转换为单一结果
    ///
    /// 事件流尚未结束时按取消处理
    pub fn into_result(mut self) -> Result<(BatchSummary, Vec<UploadSnapshot>), UploadError> {
        self.finish_stream();
        let snapshots = self.snapshots();
        match (self.outcome, snapshots) {
            (BatchOutcome::Finished(summary), Some(snapshots)) => Ok((summary, snapshots)),
            (BatchOutcome::Failed(error), _) => Err(error),
            _ => Err(UploadError::Cancelled),
        }
    }

    /// 消费整个事件流，每个事件先折叠再交给回调
    pub async fn collect<S, F>(mut self, mut events: S, mut on_event: F) -> Self
    where
        S: Stream<Item = BatchEvent> + Unpin,
        F: FnMut(&BatchEvent, &ResultCollector),
    {
        while let Some(event) = events.next().await {
            self.apply(&event);
            on_event(&event, &self);
        }
        self.finish_stream();
        self
    }
}

/// 等待批次结束并返回单一结果
pub async fn collect_batch(
    stream: BatchStream,
) -> Result<(BatchSummary, Vec<UploadSnapshot>), UploadError> {
    let collector = ResultCollector::new(stream.total());
    collector
        .collect(stream, |_, _| {})
        .await
        .into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalFsStore;
    use crate::uploader::{BatchOptions, UploadScheduler, UploadSource};
    use std::sync::Arc;
    use std::time::Duration;

    fn snapshot(name: &str) -> UploadSnapshot {
        UploadSnapshot {
            remote_path: format!("batch/{}", name),
            size: 1,
            location: name.to_string(),
            completed_at: 0,
        }
    }

    fn summary(total: usize) -> BatchSummary {
        BatchSummary {
            folder_name: "batch".to_string(),
            total,
            concurrency_limit: 2,
            elapsed: Duration::from_millis(10),
        }
    }

    fn item(index: usize, event: ItemEvent) -> BatchEvent {
        BatchEvent::Item { index, event }
    }

    #[test]
    fn test_snapshots_follow_submission_order() {
        let mut collector = ResultCollector::new(3);
        // 完成顺序与提交顺序不同
        for index in [2, 0, 1] {
            collector.apply(&item(index, ItemEvent::Started));
        }
        collector.apply(&item(
            2,
            ItemEvent::Succeeded {
                snapshot: snapshot("c"),
            },
        ));
        collector.apply(&item(
            0,
            ItemEvent::Succeeded {
                snapshot: snapshot("a"),
            },
        ));
        assert_eq!(collector.snapshots(), None);

        collector.apply(&item(
            1,
            ItemEvent::Succeeded {
                snapshot: snapshot("b"),
            },
        ));
        collector.apply(&BatchEvent::Finished {
            summary: summary(3),
        });

        let locations: Vec<String> = collector
            .snapshots()
            .unwrap()
            .into_iter()
            .map(|s| s.location)
            .collect();
        assert_eq!(locations, vec!["a", "b", "c"]);
        assert_eq!(collector.uploaded_count(), 3);
        assert_eq!(collector.overall_progress(), 1.0);
    }

    #[test]
    fn test_failure_wins_and_later_events_ignored() {
        let mut collector = ResultCollector::new(2);
        let error = UploadError::Transfer {
            index: 1,
            message: "timeout".to_string(),
        };
        collector.apply(&item(0, ItemEvent::Started));
        collector.apply(&item(1, ItemEvent::Started));
        collector.apply(&item(
            1,
            ItemEvent::Failed {
                error: error.clone(),
            },
        ));
        collector.apply(&BatchEvent::Failed {
            error: error.clone(),
        });
        collector.apply(&item(
            0,
            ItemEvent::Succeeded {
                snapshot: snapshot("a"),
            },
        ));

        assert_eq!(collector.error(), Some(&error));
        assert_eq!(collector.entries()[0], ItemState::Uploading { progress: None });
        assert_eq!(
            collector.entries()[1],
            ItemState::Failed {
                message: error.to_string()
            }
        );
        assert_eq!(collector.clone().into_result(), Err(error));
    }

    #[test]
    fn test_terminal_entry_is_final() {
        let mut collector = ResultCollector::new(1);
        collector.apply(&item(0, ItemEvent::Started));
        collector.apply(&item(0, ItemEvent::Cancelled));
        collector.apply(&item(0, ItemEvent::Progress { fraction: 0.5 }));
        collector.apply(&item(7, ItemEvent::Started));

        assert_eq!(collector.entries(), &[ItemState::Cancelled]);
    }

    #[test]
    fn test_stream_end_without_signal_is_cancelled() {
        let mut collector = ResultCollector::new(2);
        collector.apply(&item(0, ItemEvent::Started));
        collector.apply(&item(0, ItemEvent::Progress { fraction: 0.5 }));
        assert_eq!(collector.outcome(), &BatchOutcome::Running);
        assert_eq!(collector.overall_progress(), 0.25);

        collector.finish_stream();
        assert_eq!(collector.outcome(), &BatchOutcome::Cancelled);
        assert_eq!(collector.into_result(), Err(UploadError::Cancelled));
    }

    #[test]
    fn test_empty_batch() {
        let mut collector = ResultCollector::new(0);
        assert_eq!(collector.overall_progress(), 0.0);
        collector.apply(&BatchEvent::Finished {
            summary: summary(0),
        });
        assert_eq!(collector.overall_progress(), 1.0);

        let (summary, snapshots) = collector.into_result().unwrap();
        assert_eq!(summary.total, 0);
        assert!(snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_collect_from_stream() {
        let events = vec![
            item(0, ItemEvent::Started),
            item(0, ItemEvent::Progress { fraction: 0.5 }),
            item(
                0,
                ItemEvent::Succeeded {
                    snapshot: snapshot("a"),
                },
            ),
            BatchEvent::Finished {
                summary: summary(1),
            },
        ];

        let mut seen = 0;
        let collector = ResultCollector::new(1)
            .collect(futures::stream::iter(events), |_, _| seen += 1)
            .await;

        assert_eq!(seen, 4);
        assert_eq!(collector.uploaded_count(), 1);
        assert!(matches!(collector.outcome(), BatchOutcome::Finished(_)));
    }

    #[tokio::test]
    async fn test_end_to_end_with_local_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let photo = dir.path().join("photo.jpg");
        std::fs::write(&photo, vec![7u8; 5000]).unwrap();

        let root = dir.path().join("remote");
        let store = Arc::new(LocalFsStore::with_chunk_size(root.clone(), 1024));
        let scheduler = UploadScheduler::new(store);

        let sources = vec![
            UploadSource::Bytes(b"first".to_vec()),
            UploadSource::File(photo),
            UploadSource::Bytes(b"third".to_vec()),
        ];
        let options = BatchOptions::new(2).with_folder_name("album");
        let stream = scheduler.upload(sources, options).unwrap();

        let (summary, snapshots) = tokio::time::timeout(Duration::from_secs(5), collect_batch(stream))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.folder_name, "album");
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[1].remote_path, "album/photo.jpg");
        assert_eq!(snapshots[1].size, 5000);
        assert!(snapshots[0].remote_path.ends_with(".png"));

        assert_eq!(std::fs::read(root.join("album").join("photo.jpg")).unwrap().len(), 5000);
        for snapshot in [&snapshots[0], &snapshots[2]] {
            let written = std::fs::read(&snapshot.location).unwrap();
            assert!(written == b"first" || written == b"third");
        }
    }
}
