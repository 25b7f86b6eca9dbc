//! 批次与发票包的状态模型
//!
//! 包状态机：
//!
//! ```text
//! pending ──► processing ──► done
//!    │            │  ▲
//!    │            ▼  │ (retry)
//!    │          error
//!    └──────┬─────┘
//!           ▼
//!       cancelled
//! ```
//!
//! 批次状态不单独存储，每次查询时由包状态和最近一次客户端操作推导。

use serde::{Deserialize, Serialize};

/// 发票包状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    Pending,
    Processing,
    Done,
    Error,
    Cancelled,
}

impl PackageStatus {
    /// done 与 cancelled 为终态
    pub fn is_terminal(self) -> bool {
        matches!(self, PackageStatus::Done | PackageStatus::Cancelled)
    }

    /// 是否仍在等待或执行中
    pub fn is_active(self) -> bool {
        matches!(self, PackageStatus::Pending | PackageStatus::Processing)
    }

    /// 状态迁移是否合法
    pub fn can_transition_to(self, next: PackageStatus) -> bool {
        use PackageStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Done)
                | (Processing, Error)
                | (Error, Processing)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }
}

impl std::fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PackageStatus::Pending => "pending",
            PackageStatus::Processing => "processing",
            PackageStatus::Done => "done",
            PackageStatus::Error => "error",
            PackageStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 批次状态（推导值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// 已上传，尚未开始
    Ready,
    Processing,
    Partial,
    Error,
    Done,
    Cancelled,
}

impl BatchStatus {
    /// 客户端可以停止轮询的状态
    pub fn is_settled(self) -> bool {
        !matches!(self, BatchStatus::Ready | BatchStatus::Processing)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::Ready => "ready",
            BatchStatus::Processing => "processing",
            BatchStatus::Partial => "partial",
            BatchStatus::Error => "error",
            BatchStatus::Done => "done",
            BatchStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 客户端最近一次显式操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchAction {
    /// 已上传，未开始
    #[default]
    Created,
    Started,
    Cancelled,
    RetriedErrors,
}

/// 由包状态推导批次状态
pub fn derive_batch_status(statuses: &[PackageStatus], last_action: BatchAction) -> BatchStatus {
    let any = |s: PackageStatus| statuses.contains(&s);

    if any(PackageStatus::Cancelled) {
        return BatchStatus::Cancelled;
    }
    if last_action == BatchAction::Created {
        return BatchStatus::Ready;
    }
    if any(PackageStatus::Pending) || any(PackageStatus::Processing) {
        return BatchStatus::Processing;
    }
    if statuses.is_empty() {
        return BatchStatus::Ready;
    }

    match (any(PackageStatus::Error), any(PackageStatus::Done)) {
        (true, true) => BatchStatus::Partial,
        (true, false) => BatchStatus::Error,
        (false, true) => BatchStatus::Done,
        (false, false) => BatchStatus::Ready,
    }
}

/// 单个包的状态报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageReport {
    pub name: String,
    pub status: PackageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<super::PackageError>,
}

/// 批次状态报告（轮询接口返回值）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: String,
    pub status: BatchStatus,
    pub packages: Vec<PackageReport>,
}

impl BatchReport {
    /// 统计某一状态的包数量
    pub fn count(&self, status: PackageStatus) -> usize {
        self.packages.iter().filter(|p| p.status == status).count()
    }
}

/// 两步上传时分配给客户端的上传位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSlot {
    pub batch_id: String,
    pub upload_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use PackageStatus::*;

    #[test]
    fn test_aggregation() {
        let started = BatchAction::Started;
        assert_eq!(derive_batch_status(&[Done, Error, Done], started), BatchStatus::Partial);
        assert_eq!(derive_batch_status(&[Error, Error], started), BatchStatus::Error);
        assert_eq!(derive_batch_status(&[Done, Done], started), BatchStatus::Done);
        assert_eq!(derive_batch_status(&[Done, Processing], started), BatchStatus::Processing);
        assert_eq!(derive_batch_status(&[Pending, Done], started), BatchStatus::Processing);
    }

    #[test]
    fn test_cancelled_wins() {
        assert_eq!(
            derive_batch_status(&[Done, Cancelled, Processing], BatchAction::Cancelled),
            BatchStatus::Cancelled
        );
    }

    #[test]
    fn test_not_started_and_empty_batches_are_ready() {
        assert_eq!(derive_batch_status(&[Pending, Pending], BatchAction::Created), BatchStatus::Ready);
        assert_eq!(derive_batch_status(&[], BatchAction::Created), BatchStatus::Ready);
        assert_eq!(derive_batch_status(&[], BatchAction::Started), BatchStatus::Ready);
    }

    #[test]
    fn test_transitions() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Error.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Done.can_transition_to(Processing));
        assert!(!Done.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Processing));
        assert!(!Error.can_transition_to(Done));
    }
}
