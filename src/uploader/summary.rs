//! 批次统计与运行记录
//!
//! `BatchSummary` 随完成信号一起发布；`RunSummary` 是给持久化/展示层的校验后记录
//! （目录名、并发数、耗时、各对象位置）

use crate::store::UploadSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 批次完成信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// 本批次上传到的远程目录名
    pub folder_name: String,
    /// 条目总数
    pub total: usize,
    /// 并发上限
    pub concurrency_limit: usize,
    /// 从提交到全部完成的耗时
    pub elapsed: Duration,
}

/// 运行记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub folder_name: String,
    pub concurrency_limit: usize,
    /// 耗时（秒）
    pub elapsed_secs: f64,
    /// 格式化后的耗时
    pub elapsed_display: String,
    /// 按提交顺序排列的对象位置
    pub locations: Vec<String>,
}

impl RunSummary {
    /// 创建运行记录，输入不合法时返回 None
    pub fn new(
        folder_name: String,
        concurrency_limit: usize,
        elapsed_secs: f64,
        locations: Vec<String>,
    ) -> Option<Self> {
        let valid = concurrency_limit > 0
            && elapsed_secs >= 0.0
            && !folder_name.is_empty()
            && !locations.is_empty()
            && locations.iter().all(|l| !l.is_empty());
        if !valid {
            return None;
        }

        Some(Self {
            folder_name,
            concurrency_limit,
            elapsed_display: format_elapsed(elapsed_secs),
            elapsed_secs,
            locations,
        })
    }

    /// 由完成信号和有序快照生成
    pub fn from_batch(summary: &BatchSummary, snapshots: &[UploadSnapshot]) -> Option<Self> {
        Self::new(
            summary.folder_name.clone(),
            summary.concurrency_limit,
            summary.elapsed.as_secs_f64(),
            snapshots.iter().map(|s| s.location.clone()).collect(),
        )
    }

    pub fn uploaded_count(&self) -> usize {
        self.locations.len()
    }
}

/// 格式化耗时：`[Ny ][DDd ][Hh ]MM:SS.mmm`，年/天/小时只在大于 0 时出现
pub fn format_elapsed(secs: f64) -> String {
    const MS_PER_SECOND: u64 = 1000;
    const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
    const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
    const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;
    const MS_PER_YEAR: u64 = 365 * MS_PER_DAY;

    let total_ms = if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    };

    let years = total_ms / MS_PER_YEAR;
    let days = total_ms % MS_PER_YEAR / MS_PER_DAY;
    let hours = total_ms % MS_PER_DAY / MS_PER_HOUR;
    let minutes = total_ms % MS_PER_HOUR / MS_PER_MINUTE;
    let seconds = total_ms % MS_PER_MINUTE / MS_PER_SECOND;
    let millis = total_ms % MS_PER_SECOND;

    let mut out = String::new();
    if years > 0 {
        out.push_str(&format!("{}y ", years));
    }
    if days > 0 {
        out.push_str(&format!("{:02}d ", days));
    }
    if hours > 0 {
        out.push_str(&format!("{}h ", hours));
    }
    out.push_str(&format!("{:02}:{:02}.{:03}", minutes, seconds, millis));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0.0), "00:00.000");
        assert_eq!(format_elapsed(65.123), "01:05.123");
        assert_eq!(format_elapsed(3723.5), "1h 02:03.500");
        assert_eq!(format_elapsed(90061.001), "01d 1h 01:01.001");
        assert_eq!(format_elapsed(-3.0), "00:00.000");
        assert_eq!(format_elapsed(f64::NAN), "00:00.000");
    }

    #[test]
    fn test_run_summary_validation() {
        let ok = RunSummary::new(
            "2024-05-01-101500.123".to_string(),
            3,
            1.25,
            vec!["a".to_string(), "b".to_string()],
        )
        .unwrap();
        assert_eq!(ok.uploaded_count(), 2);
        assert_eq!(ok.elapsed_display, "00:01.250");

        assert!(RunSummary::new("f".to_string(), 0, 1.0, vec!["a".to_string()]).is_none());
        assert!(RunSummary::new("f".to_string(), 1, -1.0, vec!["a".to_string()]).is_none());
        assert!(RunSummary::new(String::new(), 1, 1.0, vec!["a".to_string()]).is_none());
        assert!(RunSummary::new("f".to_string(), 1, 1.0, vec![]).is_none());
        assert!(RunSummary::new("f".to_string(), 1, 1.0, vec![String::new()]).is_none());
    }

    #[test]
    fn test_run_summary_from_batch() {
        let summary = BatchSummary {
            folder_name: "batch".to_string(),
            total: 1,
            concurrency_limit: 2,
            elapsed: Duration::from_millis(1500),
        };
        let snapshots = vec![UploadSnapshot {
            remote_path: "batch/a.png".to_string(),
            size: 4,
            location: "/tmp/batch/a.png".to_string(),
            completed_at: 0,
        }];

        let run = RunSummary::from_batch(&summary, &snapshots).unwrap();
        assert_eq!(run.concurrency_limit, 2);
        assert_eq!(run.elapsed_secs, 1.5);
        assert_eq!(run.locations, vec!["/tmp/batch/a.png".to_string()]);
    }
}
