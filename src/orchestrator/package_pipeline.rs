//! 单个发票包处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责把批次压缩包中的一个发票包变成一个 Job 并走完整个流程。
//!
//! ## 核心功能
//!
//! 1. **加载文件**：从批次压缩包中取出该包的全部 PDF
//! 2. **构建 Job**：源文件写入 `batches/{batchId}/work/{包名}/`
//! 3. **流程调度**：委托 `JobFlow` 分类与处理，页面之间检查取消
//! 4. **保存产物**：压缩包写入 `batches/{batchId}/out/{包名}/`
//! 5. **清理文件**：无论结果如何都删除工作目录

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult, ValidationError};
use crate::infrastructure::{pdf, BlobStore};
use crate::models::{load_package_pdfs, Job, PackageDescriptor, PackageError, SourceDocument};
use crate::workflow::{JobCtx, JobFlow, ProcessOutcome};

/// 包处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
    /// 成功，产物已写入存储
    Done {
        download_name: String,
        output_key: String,
    },
    /// 失败（可重试）
    Failed(PackageError),
    /// 在安全点观察到取消
    Cancelled,
}

/// 处理一个包所需的共享依赖
pub(crate) struct PipelineDeps {
    pub flow: Arc<JobFlow>,
    pub store: Arc<dyn BlobStore>,
}

fn work_prefix(batch_id: &str, package: &str) -> String {
    format!("batches/{}/work/{}/", batch_id, package)
}

pub(crate) fn output_prefix(batch_id: &str, package: &str) -> String {
    format!("batches/{}/out/{}/", batch_id, package)
}

/// 处理单个发票包
///
/// 所有预期失败都折叠为 `PackageOutcome::Failed`，不会向上传播。
pub(crate) async fn process_package(
    deps: &PipelineDeps,
    batch_id: &str,
    source_key: &str,
    descriptor: &PackageDescriptor,
    cancel: &CancellationToken,
) -> PackageOutcome {
    let ctx = JobCtx::for_package(uuid::Uuid::new_v4().simple().to_string(), batch_id, &descriptor.name);
    info!("{} ▶️ 开始处理", ctx);

    let outcome = match run(deps, batch_id, source_key, descriptor, cancel, &ctx).await {
        Ok(outcome) => outcome,
        Err(AppError::Cancelled) => PackageOutcome::Cancelled,
        Err(e) => {
            error!("{} ❌ 处理失败: {}", ctx, e);
            PackageOutcome::Failed(PackageError::from(&e))
        }
    };

    if let Err(e) = deps
        .store
        .delete_prefix(&work_prefix(batch_id, &descriptor.name))
        .await
    {
        warn!("{} ⚠️ 清理工作目录失败: {}", ctx, e);
    }

    match &outcome {
        PackageOutcome::Done { download_name, .. } => info!("{} ✅ 完成: {}", ctx, download_name),
        PackageOutcome::Failed(err) => warn!("{} ❌ {:?}: {}", ctx, err.kind, err.message),
        PackageOutcome::Cancelled => info!("{} ⏹️ 已取消", ctx),
    }
    outcome
}

async fn run(
    deps: &PipelineDeps,
    batch_id: &str,
    source_key: &str,
    descriptor: &PackageDescriptor,
    cancel: &CancellationToken,
    ctx: &JobCtx,
) -> AppResult<PackageOutcome> {
    checkpoint(cancel)?;

    let batch_zip = deps.store.get(source_key).await?;
    let files = load_package_pdfs(&batch_zip, &descriptor.source)?;
    drop(batch_zip);

    if files.is_empty() {
        return Err(ValidationError::NoPdfFiles.into());
    }
    info!("{} 📄 找到 {} 个 PDF", ctx, files.len());

    let prefix = work_prefix(batch_id, &descriptor.name);
    let mut sources = Vec::with_capacity(files.len());
    let mut documents = Vec::with_capacity(files.len());

    for (i, file) in files.into_iter().enumerate() {
        let page_count = pdf::page_count(&file.bytes).map_err(|e| {
            warn!("{} 无法解析 PDF {}: {}", ctx, file.name, e);
            ValidationError::NotPdf {
                name: file.name.clone(),
            }
        })?;
        let blob_key = format!("{}src_{}.pdf", prefix, i);
        deps.store.put(&blob_key, file.bytes.clone()).await?;
        documents.push(SourceDocument {
            name: file.name,
            blob_key,
            page_count,
        });
        sources.push(Arc::new(file.bytes));
    }

    let mut job = Job::new(ctx.job_id.clone(), documents);
    checkpoint(cancel)?;

    deps.flow
        .auto_classify(&mut job, &sources, ctx, Some(cancel))
        .await?;
    checkpoint(cancel)?;

    let archive = match deps.flow.process(&mut job, &sources, ctx).await? {
        ProcessOutcome::Archive(archive) => archive,
        ProcessOutcome::NeedsOverride(failure) => {
            return Ok(PackageOutcome::Failed(PackageError::from(&failure)))
        }
        ProcessOutcome::Invalid(invalid) => {
            return Ok(PackageOutcome::Failed(PackageError::from(&invalid)))
        }
    };
    checkpoint(cancel)?;

    let output_key = format!("{}{}", output_prefix(batch_id, &descriptor.name), archive.name);
    deps.store.put(&output_key, archive.bytes).await?;

    // 写入期间批次被取消或丢弃时，产物不再有人回收
    if cancel.is_cancelled() {
        if let Err(e) = deps
            .store
            .delete_prefix(&output_prefix(batch_id, &descriptor.name))
            .await
        {
            warn!("{} ⚠️ 清理已取消的产物失败: {}", ctx, e);
        }
        return Err(AppError::Cancelled);
    }

    Ok(PackageOutcome::Done {
        download_name: archive.name,
        output_key,
    })
}

/// 安全点：批次已取消则中止
fn checkpoint(cancel: &CancellationToken) -> AppResult<()> {
    if cancel.is_cancelled() {
        Err(AppError::Cancelled)
    } else {
        Ok(())
    }
}
