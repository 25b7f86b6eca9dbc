//! 批次编排器 - 编排层
//!
//! ## 职责
//!
//! 把一个批次压缩包拆成若干发票包，在全局工作池中并发处理，
//! 并维护每个包的状态机。
//!
//! ## 核心功能
//!
//! 1. **创建批次**：枚举发票包，超过上限直接拒绝（不留下任何记录）
//! 2. **并发控制**：所有批次共享一个 Semaphore，限制同时处理的包数量
//! 3. **状态机**：pending → processing → done / error，可取消、可重试
//! 4. **状态查询**：纯读操作，批次状态由包状态推导
//! 5. **产物下载**：单个包的压缩包，或整批的汇总压缩包
//!
//! ## 设计特点
//!
//! - **互不影响**：一个包失败不会影响同批次的其他包
//! - **协作式取消**：每个批次一个 CancellationToken，处理中的包在安全点停止
//! - **向下委托**：委托 package_pipeline 处理单个包

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use futures::future::join_all;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppResult, CapacityError, LookupError};
use crate::infrastructure::{BlobStore, TextExtractor};
use crate::models::{
    derive_batch_status, enumerate_packages, BatchAction, BatchReport, BatchStatus,
    PackageDescriptor, PackageError, PackageReport, PackageStatus, UploadSlot,
};
use crate::orchestrator::package_pipeline::{self, PackageOutcome, PipelineDeps};
use crate::services::{ArchiveAssembler, ConsolidatedEntry};
use crate::workflow::JobFlow;

/// 包的可变状态
#[derive(Debug)]
struct PackageState {
    status: PackageStatus,
    download_name: Option<String>,
    output_key: Option<String>,
    error: Option<PackageError>,
    /// 已有任务在等待或执行该包
    scheduled: bool,
}

impl Default for PackageState {
    fn default() -> Self {
        Self {
            status: PackageStatus::Pending,
            download_name: None,
            output_key: None,
            error: None,
            scheduled: false,
        }
    }
}

impl PackageState {
    fn status(&self) -> PackageStatus {
        self.status
    }

    /// 按状态机迁移；非法迁移返回 false 且不做修改
    fn transition(&mut self, next: PackageStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// 批次中的一个包
struct PackageCell {
    descriptor: PackageDescriptor,
    state: RwLock<PackageState>,
}

impl PackageCell {
    fn new(descriptor: PackageDescriptor) -> Self {
        Self {
            descriptor,
            state: RwLock::new(PackageState::default()),
        }
    }

    async fn report(&self) -> PackageReport {
        let state = self.state.read().await;
        PackageReport {
            name: self.descriptor.name.clone(),
            status: state.status(),
            download_name: state.download_name.clone(),
            error: state.error.clone(),
        }
    }
}

/// 批次记录
struct BatchRecord {
    id: String,
    source_key: String,
    cancel: CancellationToken,
    last_action: RwLock<BatchAction>,
    packages: Vec<Arc<PackageCell>>,
    created_at: DateTime<Local>,
}

impl BatchRecord {
    fn package(&self, name: &str) -> AppResult<&Arc<PackageCell>> {
        self.packages
            .iter()
            .find(|p| p.descriptor.name == name)
            .ok_or_else(|| {
                LookupError::PackageNotFound {
                    batch_id: self.id.clone(),
                    package: name.to_string(),
                }
                .into()
            })
    }
}

/// 批次编排器
///
/// 持有全局工作池与所有批次记录；可被多个调用方共享（内部全部为 `Arc`）。
#[derive(Clone)]
pub struct BatchOrchestrator {
    config: Config,
    deps: Arc<PipelineDeps>,
    workers: Arc<Semaphore>,
    batches: Arc<RwLock<HashMap<String, Arc<BatchRecord>>>>,
    upload_slots: Arc<RwLock<HashSet<String>>>,
    assembler: ArchiveAssembler,
}

fn source_key(batch_id: &str) -> String {
    format!("batches/{}/source.zip", batch_id)
}

fn batch_prefix(batch_id: &str) -> String {
    format!("batches/{}/", batch_id)
}

impl BatchOrchestrator {
    pub fn new(config: Config, store: Arc<dyn BlobStore>, extractor: Arc<dyn TextExtractor>) -> Self {
        let flow = Arc::new(JobFlow::new(&config, extractor));
        Self {
            workers: Arc::new(Semaphore::new(config.max_concurrent_packages.max(1))),
            deps: Arc::new(PipelineDeps { flow, store }),
            batches: Arc::new(RwLock::new(HashMap::new())),
            upload_slots: Arc::new(RwLock::new(HashSet::new())),
            assembler: ArchiveAssembler::new(),
            config,
        }
    }

    async fn batch(&self, batch_id: &str) -> AppResult<Arc<BatchRecord>> {
        self.batches
            .read()
            .await
            .get(batch_id)
            .cloned()
            .ok_or_else(|| LookupError::BatchNotFound(batch_id.to_string()).into())
    }

    // ========== 创建 ==========

    /// 直接上传批次压缩包
    pub async fn create_batch(&self, zip_bytes: Vec<u8>) -> AppResult<BatchReport> {
        let batch_id = Uuid::new_v4().simple().to_string();
        let packages = self.enumerate_within_cap(&zip_bytes)?;
        self.deps.store.put(&source_key(&batch_id), zip_bytes).await?;
        self.register(batch_id, packages).await
    }

    /// 两步上传第一步：分配批次 ID 和上传位置
    pub async fn request_upload_slot(&self) -> UploadSlot {
        let batch_id = Uuid::new_v4().simple().to_string();
        self.upload_slots.write().await.insert(batch_id.clone());
        debug!("分配上传位置: {}", batch_id);
        UploadSlot {
            upload_key: source_key(&batch_id),
            batch_id,
        }
    }

    /// 两步上传第二步：客户端已把压缩包写入上传位置
    ///
    /// 超过上限时删除已上传的文件，不创建批次。
    pub async fn notify_uploaded(&self, batch_id: &str) -> AppResult<BatchReport> {
        if !self.upload_slots.write().await.remove(batch_id) {
            return Err(LookupError::BatchNotFound(batch_id.to_string()).into());
        }

        let zip_bytes = self.deps.store.get(&source_key(batch_id)).await?;
        let packages = match self.enumerate_within_cap(&zip_bytes) {
            Ok(packages) => packages,
            Err(e) => {
                self.deps.store.delete_prefix(&batch_prefix(batch_id)).await.ok();
                return Err(e);
            }
        };
        self.register(batch_id.to_string(), packages).await
    }

    fn enumerate_within_cap(&self, zip_bytes: &[u8]) -> AppResult<Vec<PackageDescriptor>> {
        let packages = enumerate_packages(zip_bytes)?;
        let cap = self.config.batch_package_cap;
        if packages.len() > cap {
            warn!("⚠️ 批次包含 {} 个发票包，超过上限 {}", packages.len(), cap);
            return Err(CapacityError {
                found: packages.len(),
                cap,
            }
            .into());
        }
        Ok(packages)
    }

    async fn register(&self, batch_id: String, packages: Vec<PackageDescriptor>) -> AppResult<BatchReport> {
        let record = Arc::new(BatchRecord {
            source_key: source_key(&batch_id),
            id: batch_id.clone(),
            cancel: CancellationToken::new(),
            last_action: RwLock::new(BatchAction::Created),
            packages: packages
                .into_iter()
                .map(|d| Arc::new(PackageCell::new(d)))
                .collect(),
            created_at: Local::now(),
        });
        info!(
            "✓ 批次已创建: {} ({} 个发票包)",
            batch_id,
            record.packages.len()
        );
        self.batches.write().await.insert(batch_id.clone(), record);
        self.status(&batch_id).await
    }

    // ========== 控制 ==========

    /// 开始处理：调度所有尚未调度的 pending 包（重复调用无副作用）
    pub async fn start(&self, batch_id: &str) -> AppResult<BatchReport> {
        let record = self.batch(batch_id).await?;
        if record.cancel.is_cancelled() {
            warn!("⚠️ 批次 {} 已取消，忽略 start", batch_id);
            return self.status(batch_id).await;
        }
        *record.last_action.write().await = BatchAction::Started;

        let mut scheduled = 0;
        for cell in &record.packages {
            let mut state = cell.state.write().await;
            if state.status() == PackageStatus::Pending && !state.scheduled {
                state.scheduled = true;
                drop(state);
                self.spawn_package(Arc::clone(&record), Arc::clone(cell));
                scheduled += 1;
            }
        }
        info!("▶️ 批次 {} 开始处理，调度 {} 个发票包", batch_id, scheduled);
        self.status(batch_id).await
    }

    /// 取消：pending 立即取消；processing 在下一个安全点取消；error 保持不变
    pub async fn cancel(&self, batch_id: &str) -> AppResult<BatchReport> {
        let record = self.batch(batch_id).await?;
        record.cancel.cancel();
        *record.last_action.write().await = BatchAction::Cancelled;

        for cell in &record.packages {
            let mut state = cell.state.write().await;
            if state.status() == PackageStatus::Pending {
                state.transition(PackageStatus::Cancelled);
            }
        }
        info!("⏹️ 批次 {} 已取消", batch_id);
        self.status(batch_id).await
    }

    /// 重试所有失败的包：error → processing，并重新调度
    pub async fn retry_errors(&self, batch_id: &str) -> AppResult<BatchReport> {
        let record = self.batch(batch_id).await?;
        if record.cancel.is_cancelled() {
            warn!("⚠️ 批次 {} 已取消，忽略重试", batch_id);
            return self.status(batch_id).await;
        }
        let mut retried = 0;
        for cell in &record.packages {
            let mut state = cell.state.write().await;
            if state.status() == PackageStatus::Error && state.transition(PackageStatus::Processing) {
                state.error = None;
                state.scheduled = true;
                drop(state);
                self.spawn_package(Arc::clone(&record), Arc::clone(cell));
                retried += 1;
            }
        }
        if retried == 0 {
            debug!("批次 {} 没有失败的发票包，忽略重试", batch_id);
            return self.status(batch_id).await;
        }
        *record.last_action.write().await = BatchAction::RetriedErrors;
        info!("🔁 批次 {} 重试 {} 个失败的发票包", batch_id, retried);
        self.status(batch_id).await
    }

    fn spawn_package(&self, record: Arc<BatchRecord>, cell: Arc<PackageCell>) {
        let workers = Arc::clone(&self.workers);
        let deps = Arc::clone(&self.deps);

        tokio::spawn(async move {
            let permit = tokio::select! {
                _ = record.cancel.cancelled() => None,
                permit = workers.acquire_owned() => permit.ok(),
            };

            let Some(_permit) = permit else {
                let mut state = cell.state.write().await;
                state.transition(PackageStatus::Cancelled);
                state.scheduled = false;
                return;
            };

            // 出队前再检查一次取消
            {
                let mut state = cell.state.write().await;
                if record.cancel.is_cancelled() {
                    state.transition(PackageStatus::Cancelled);
                    state.scheduled = false;
                    return;
                }
                if state.status() == PackageStatus::Pending {
                    state.transition(PackageStatus::Processing);
                }
                if state.status() != PackageStatus::Processing {
                    state.scheduled = false;
                    return;
                }
            }

            let outcome = package_pipeline::process_package(
                &deps,
                &record.id,
                &record.source_key,
                &cell.descriptor,
                &record.cancel,
            )
            .await;

            let mut state = cell.state.write().await;
            state.scheduled = false;
            let applied = match outcome {
                PackageOutcome::Done {
                    download_name,
                    output_key,
                } => {
                    let ok = state.transition(PackageStatus::Done);
                    if ok {
                        state.download_name = Some(download_name);
                        state.output_key = Some(output_key);
                    }
                    ok
                }
                PackageOutcome::Failed(err) => {
                    let ok = state.transition(PackageStatus::Error);
                    if ok {
                        state.error = Some(err);
                    }
                    ok
                }
                PackageOutcome::Cancelled => state.transition(PackageStatus::Cancelled),
            };
            if !applied {
                error!(
                    "[批次 {} 包 {}] 非法的状态迁移，当前状态: {}",
                    record.id,
                    cell.descriptor.name,
                    state.status()
                );
            }
        });
    }

    // ========== 查询 ==========

    /// 批次状态（纯读操作）
    pub async fn status(&self, batch_id: &str) -> AppResult<BatchReport> {
        let record = self.batch(batch_id).await?;
        let packages = join_all(record.packages.iter().map(|cell| cell.report())).await;
        let statuses: Vec<PackageStatus> = packages.iter().map(|p| p.status).collect();
        let last_action = *record.last_action.read().await;

        Ok(BatchReport {
            batch_id: record.id.clone(),
            status: derive_batch_status(&statuses, last_action),
            packages,
        })
    }

    /// 轮询直到没有包在处理中（未开始的批次立即返回）
    pub async fn wait_until_settled(&self, batch_id: &str, poll_interval: Duration) -> AppResult<BatchReport> {
        loop {
            let report = self.status(batch_id).await?;
            if report.count(PackageStatus::Processing) == 0 && report.status != BatchStatus::Processing {
                return Ok(report);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// 当前批次 ID 列表（按创建时间排序）
    pub async fn batch_ids(&self) -> Vec<String> {
        let batches = self.batches.read().await;
        let mut records: Vec<&Arc<BatchRecord>> = batches.values().collect();
        records.sort_by_key(|r| r.created_at);
        records.iter().map(|r| r.id.clone()).collect()
    }

    // ========== 下载 ==========

    /// 单个包的压缩包：(下载名, 内容)
    pub async fn package_archive(&self, batch_id: &str, package: &str) -> AppResult<(String, Vec<u8>)> {
        let record = self.batch(batch_id).await?;
        let cell = record.package(package)?;
        let (download_name, output_key) = {
            let state = cell.state.read().await;
            match (state.status(), &state.download_name, &state.output_key) {
                (PackageStatus::Done, Some(name), Some(key)) => (name.clone(), key.clone()),
                (status, _, _) => {
                    return Err(LookupError::NotReady(format!("包 {} 当前状态为 {}", package, status)).into())
                }
            }
        };
        let bytes = self.deps.store.get(&output_key).await?;
        Ok((download_name, bytes))
    }

    /// 批次汇总压缩包 `LOTE_{batchId}.zip`，包含所有 done 包的产物
    pub async fn consolidated_archive(&self, batch_id: &str) -> AppResult<(String, Vec<u8>)> {
        let report = self.status(batch_id).await?;
        if matches!(report.status, BatchStatus::Ready | BatchStatus::Processing) {
            return Err(LookupError::NotReady(format!("批次 {} 当前状态为 {}", batch_id, report.status)).into());
        }

        let mut entries = Vec::new();
        for package in report.packages.iter().filter(|p| p.status == PackageStatus::Done) {
            let (download_name, bytes) = self.package_archive(batch_id, &package.name).await?;
            entries.push(ConsolidatedEntry {
                package_name: package.name.clone(),
                download_name,
                bytes,
            });
        }

        let name = format!("LOTE_{}.zip", batch_id);
        let bytes = self.assembler.build_consolidated(&entries)?;
        info!("📦 汇总压缩包已生成: {} ({} 个发票包)", name, entries.len());
        Ok((name, bytes))
    }

    // ========== 清理 ==========

    /// 丢弃批次记录及其全部存储；仍在处理的包会先被取消
    pub async fn discard_batch(&self, batch_id: &str) -> AppResult<()> {
        let record = self
            .batches
            .write()
            .await
            .remove(batch_id)
            .ok_or_else(|| LookupError::BatchNotFound(batch_id.to_string()))?;
        record.cancel.cancel();
        let deleted = self.deps.store.delete_prefix(&batch_prefix(batch_id)).await?;
        info!("🗑️ 批次 {} 已删除 ({} 个对象)", batch_id, deleted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_state_transitions() {
        let mut state = PackageState::default();
        assert_eq!(state.status(), PackageStatus::Pending);
        assert!(!state.transition(PackageStatus::Done));
        assert!(state.transition(PackageStatus::Processing));
        assert!(state.transition(PackageStatus::Error));
        assert!(!state.transition(PackageStatus::Cancelled));
        assert!(state.transition(PackageStatus::Processing));
        assert!(state.transition(PackageStatus::Done));
        assert!(!state.transition(PackageStatus::Processing));
    }
}
