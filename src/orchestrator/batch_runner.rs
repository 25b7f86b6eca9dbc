//! 命令行批量运行器 - 编排层
//!
//! ## 职责
//!
//! 本模块是命令行程序的入口，负责扫描输入目录并逐个处理批次压缩包。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：日志文件、本地存储、文本提取器、BatchOrchestrator
//! 2. **批量加载**：扫描 `input_folder` 中所有 `.zip`
//! 3. **逐批处理**：创建批次 → start → 等待结束 → 写出汇总压缩包
//! 4. **全局统计**：汇总所有发票包的处理结果

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::{BlobStore, LocalBlobStore, PdfTextExtractor, TextExtractor};
use crate::models::{BatchReport, PackageStatus};
use crate::orchestrator::BatchOrchestrator;
use crate::utils::logging;

/// 应用主结构
pub struct App {
    config: Config,
    orchestrator: BatchOrchestrator,
}

/// 处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStats {
    pub success: usize,
    pub failed: usize,
    pub total: usize,
}

impl App {
    /// 初始化应用（本地磁盘存储 + PDF 原生文本层）
    pub async fn initialize(config: Config) -> Result<Self> {
        logging::init_log_file(&config.output_log_file)?;
        logging::log_startup(config.max_concurrent_packages, config.batch_package_cap);

        let store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.job_root));
        let extractor: Arc<dyn TextExtractor> = Arc::new(PdfTextExtractor::new());
        Ok(Self::with_backends(config, store, extractor))
    }

    /// 使用指定的存储和提取器
    pub fn with_backends(config: Config, store: Arc<dyn BlobStore>, extractor: Arc<dyn TextExtractor>) -> Self {
        let orchestrator = BatchOrchestrator::new(config.clone(), store, extractor);
        Self { config, orchestrator }
    }

    pub fn orchestrator(&self) -> &BatchOrchestrator {
        &self.orchestrator
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<ProcessingStats> {
        let batch_files = self.scan_batches().await?;

        if batch_files.is_empty() {
            warn!("⚠️ 没有找到待处理的批次压缩包，程序结束");
            return Ok(ProcessingStats::default());
        }
        logging::log_batches_found(batch_files.len(), &self.config.input_folder);

        tokio::fs::create_dir_all(&self.config.output_folder)
            .await
            .with_context(|| format!("无法创建输出目录: {}", self.config.output_folder))?;

        let mut stats = ProcessingStats::default();
        let total_batches = batch_files.len();

        for (i, path) in batch_files.iter().enumerate() {
            match self.process_batch_file(path, i + 1, total_batches).await {
                Ok(report) => {
                    stats.total += report.packages.len();
                    stats.success += report.count(PackageStatus::Done);
                    stats.failed += report.packages.len() - report.count(PackageStatus::Done);
                }
                Err(e) => {
                    error!("❌ 批次 {} 处理失败: {:#}", path.display(), e);
                }
            }
        }

        logging::print_final_stats(stats.success, stats.failed, stats.total, &self.config.output_log_file);
        Ok(stats)
    }

    /// 扫描输入目录中的批次压缩包（按文件名排序）
    async fn scan_batches(&self) -> Result<Vec<PathBuf>> {
        info!("\n📁 正在扫描待处理的批次...");
        let folder = Path::new(&self.config.input_folder);
        if !folder.exists() {
            warn!("⚠️ 输入目录不存在: {}", folder.display());
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(folder)
            .await
            .with_context(|| format!("无法读取输入目录: {}", folder.display()))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_zip = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
            if is_zip && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// 处理一个批次文件
    async fn process_batch_file(&self, path: &Path, batch_num: usize, total_batches: usize) -> Result<BatchReport> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("无法读取批次文件: {}", path.display()))?;

        let created = match self.orchestrator.create_batch(bytes).await {
            Ok(report) => report,
            Err(AppError::Capacity(e)) => {
                error!("❌ {} 被拒绝: {}", path.display(), e);
                return Err(AppError::Capacity(e).into());
            }
            Err(e) => return Err(e.into()),
        };
        let batch_id = created.batch_id.clone();
        logging::log_batch_start(batch_num, total_batches, &batch_id, created.packages.len());

        if created.packages.is_empty() {
            warn!("⚠️ 批次 {} 中没有发票包", path.display());
            self.orchestrator.discard_batch(&batch_id).await?;
            return Ok(created);
        }

        self.orchestrator.start(&batch_id).await?;
        let poll = Duration::from_millis(self.config.status_poll_interval_ms.max(10));
        let report = self.orchestrator.wait_until_settled(&batch_id, poll).await?;

        for package in &report.packages {
            match (&package.status, &package.error) {
                (PackageStatus::Done, _) => info!(
                    "  ✅ {} → {}",
                    package.name,
                    package.download_name.as_deref().unwrap_or("-")
                ),
                (status, Some(err)) => warn!("  ❌ {} [{}] {}", package.name, status, err.message),
                (status, None) => warn!("  ⚠️ {} [{}]", package.name, status),
            }
        }

        if report.count(PackageStatus::Done) > 0 {
            let (name, archive) = self.orchestrator.consolidated_archive(&batch_id).await?;
            let out_path = Path::new(&self.config.output_folder).join(&name);
            tokio::fs::write(&out_path, archive)
                .await
                .with_context(|| format!("无法写出汇总压缩包: {}", out_path.display()))?;
            info!("💾 已写出 {}", out_path.display());
        }

        logging::log_batch_complete(
            &batch_id,
            &report.status.to_string(),
            report.count(PackageStatus::Done),
            report.packages.len(),
        );
        self.orchestrator.discard_batch(&batch_id).await?;
        Ok(report)
    }
}
