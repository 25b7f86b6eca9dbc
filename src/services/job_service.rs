//! 单张发票的 Job 服务 - 业务能力层
//!
//! 交互式流程：上传 PDF → 自动分类 → 操作员修正 → process 下载压缩包。
//! Job 存在内存中，源文件存放在 BlobStore 的 `jobs/{jobId}/` 下。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppResult, LookupError, ValidationError};
use crate::infrastructure::{pdf, BlobStore, TextExtractor};
use crate::models::{Category, IdentifierOverride, Job, SourceDocument, UploadedFile};
use crate::workflow::{JobCtx, JobFlow, ProcessOutcome};

/// `create_job` 的返回值
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreated {
    pub job_id: String,
    pub total_pages: usize,
    pub files: usize,
}

/// `process` 请求
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    /// 页码（字符串形式）→ 分类；无法解析或超出范围的键被忽略
    #[serde(default)]
    pub classifications: Option<BTreeMap<String, Option<Category>>>,
    #[serde(flatten)]
    pub overrides: IdentifierOverride,
    /// 调试用：成功后保留 Job
    #[serde(default)]
    pub keep_job: bool,
}

/// Job 服务
///
/// 职责：
/// - 管理 Job 的创建、查询与销毁
/// - 把源文件读写委托给 BlobStore
/// - 把分类与处理委托给 JobFlow
pub struct JobService {
    flow: JobFlow,
    store: Arc<dyn BlobStore>,
    jobs: RwLock<HashMap<String, Arc<Mutex<Job>>>>,
}

impl JobService {
    pub fn new(config: &Config, store: Arc<dyn BlobStore>, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            flow: JobFlow::new(config, extractor),
            store,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    fn job_prefix(job_id: &str) -> String {
        format!("jobs/{}/", job_id)
    }

    /// 创建 Job：校验全部文件后再写入存储，任何一个文件不合法都不会留下 Job
    pub async fn create_job(&self, files: Vec<UploadedFile>) -> AppResult<JobCreated> {
        if files.is_empty() {
            return Err(ValidationError::NoPdfFiles.into());
        }

        let mut page_counts = Vec::with_capacity(files.len());
        for file in &files {
            if !file.is_pdf_name() {
                return Err(ValidationError::NotPdf {
                    name: file.name.clone(),
                }
                .into());
            }
            let count = pdf::page_count(&file.bytes).map_err(|e| {
                warn!("无法解析 PDF {}: {}", file.name, e);
                ValidationError::NotPdf {
                    name: file.name.clone(),
                }
            })?;
            page_counts.push(count);
        }

        let job_id = Uuid::new_v4().simple().to_string();
        let file_count = files.len();
        let mut sources = Vec::with_capacity(file_count);

        for (i, (file, page_count)) in files.into_iter().zip(page_counts).enumerate() {
            let blob_key = format!("{}pdfs/src_{}.pdf", Self::job_prefix(&job_id), i);
            if let Err(e) = self.store.put(&blob_key, file.bytes).await {
                self.store.delete_prefix(&Self::job_prefix(&job_id)).await.ok();
                return Err(e);
            }
            sources.push(SourceDocument {
                name: file.name,
                blob_key,
                page_count,
            });
        }

        let job = Job::new(job_id.clone(), sources);
        let total_pages = job.total_pages();
        self.jobs
            .write()
            .await
            .insert(job_id.clone(), Arc::new(Mutex::new(job)));

        info!("✓ Job 已创建: {} ({} 个文件, {} 页)", job_id, file_count, total_pages);
        Ok(JobCreated {
            job_id,
            total_pages,
            files: file_count,
        })
    }

    async fn job(&self, job_id: &str) -> AppResult<Arc<Mutex<Job>>> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| LookupError::JobNotFound(job_id.to_string()).into())
    }

    async fn load_sources(&self, job: &Job) -> AppResult<Vec<Arc<Vec<u8>>>> {
        let mut sources = Vec::with_capacity(job.sources.len());
        for source in &job.sources {
            sources.push(Arc::new(self.store.get(&source.blob_key).await?));
        }
        Ok(sources)
    }

    /// 自动分类全部页面
    pub async fn auto_classify(&self, job_id: &str) -> AppResult<BTreeMap<usize, Option<Category>>> {
        let entry = self.job(job_id).await?;
        let mut job = entry.lock().await;
        let sources = self.load_sources(&job).await?;
        self.flow
            .auto_classify(&mut job, &sources, &JobCtx::new(job_id), None)
            .await
    }

    /// 单页文本（诊断用）
    pub async fn page_text(&self, job_id: &str, page_index: usize, refresh: bool) -> AppResult<String> {
        let entry = self.job(job_id).await?;
        let mut job = entry.lock().await;
        let total = job.total_pages();
        if page_index >= total {
            return Err(ValidationError::PageOutOfRange {
                index: page_index,
                total,
            }
            .into());
        }
        let sources = self.load_sources(&job).await?;
        self.flow.page_text(&mut job, &sources, page_index, refresh).await
    }

    /// 处理 Job
    ///
    /// 成功时（除非 `keep_job`）删除 Job 及其存储；其他分支 Job 保持可用，可修正后重试。
    pub async fn process(&self, job_id: &str, request: ProcessRequest) -> AppResult<ProcessOutcome> {
        let entry = self.job(job_id).await?;
        let mut job = entry.lock().await;

        if let Some(raw) = &request.classifications {
            let manual: BTreeMap<usize, Option<Category>> = raw
                .iter()
                .filter_map(|(k, v)| k.trim().parse::<usize>().ok().map(|idx| (idx, *v)))
                .collect();
            job.apply_manual_classifications(&manual);
        }
        job.overrides = (!request.overrides.is_empty()).then(|| request.overrides.clone());

        let sources = self.load_sources(&job).await?;
        let outcome = self.flow.process(&mut job, &sources, &JobCtx::new(job_id)).await?;

        if matches!(outcome, ProcessOutcome::Archive(_)) && !request.keep_job {
            drop(job);
            self.discard_job(job_id).await?;
        }
        Ok(outcome)
    }

    /// 丢弃 Job 及其全部存储
    pub async fn discard_job(&self, job_id: &str) -> AppResult<()> {
        let removed = self.jobs.write().await.remove(job_id);
        if removed.is_none() {
            return Err(LookupError::JobNotFound(job_id.to_string()).into());
        }
        let deleted = self.store.delete_prefix(&Self::job_prefix(job_id)).await?;
        info!("🗑️ Job {} 已删除 ({} 个对象)", job_id, deleted);
        Ok(())
    }

    /// 当前存活的 Job 数
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// 当前分类结果
    pub async fn classifications(&self, job_id: &str) -> AppResult<BTreeMap<usize, Option<Category>>> {
        let entry = self.job(job_id).await?;
        let job = entry.lock().await;
        Ok(job.classification_map())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::infrastructure::pdf::test_support::pdf_with_pages;
    use crate::infrastructure::{MemoryBlobStore, PdfTextExtractor};

    fn service() -> (JobService, Arc<MemoryBlobStore>) {
        let store = Arc::new(MemoryBlobStore::new());
        let service = JobService::new(&Config::default(), store.clone(), Arc::new(PdfTextExtractor::new()));
        (service, store)
    }

    #[tokio::test]
    async fn test_create_job_rejects_non_pdf_without_leftovers() {
        let (service, store) = service();
        let err = service
            .create_job(vec![
                UploadedFile::new("a.pdf", pdf_with_pages(&["uno"])),
                UploadedFile::new("notas.txt", b"hola".to_vec()),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(ValidationError::NotPdf { .. })));
        assert_eq!(store.len().await, 0);
        assert_eq!(service.job_count().await, 0);

        let err = service.create_job(Vec::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::NoPdfFiles)));
    }

    #[tokio::test]
    async fn test_full_interactive_flow() {
        let (service, store) = service();
        let created = service
            .create_job(vec![
                UploadedFile::new("factura.pdf", pdf_with_pages(&["FACTURA ELECTRONICA DE VENTA OCFE 5871 NIT 900204617-5"])),
                UploadedFile::new("soportes.PDF", pdf_with_pages(&["HISTORIA CLINICA", "ORDEN MEDICA"])),
            ])
            .await
            .unwrap();
        assert_eq!(created.total_pages, 3);
        assert_eq!(created.files, 2);
        assert_eq!(store.len().await, 2);

        let map = service.auto_classify(&created.job_id).await.unwrap();
        assert_eq!(map[&0], Some(Category::Fev));
        assert_eq!(map[&2], Some(Category::Opf));

        let text = service.page_text(&created.job_id, 1, false).await.unwrap();
        assert!(text.contains("HISTORIA"));

        let outcome = service
            .process(&created.job_id, ProcessRequest::default())
            .await
            .unwrap();
        match outcome {
            ProcessOutcome::Archive(archive) => {
                assert_eq!(archive.name, "TIPIFICADO_900204617_OCFE5871.zip")
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // 成功后 Job 与存储都被清理
        assert_eq!(store.len().await, 0);
        assert!(service.auto_classify(&created.job_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_manual_classification_and_missing_fev() {
        let (service, _store) = service();
        let created = service
            .create_job(vec![UploadedFile::new("a.pdf", pdf_with_pages(&["uno", "dos"]))])
            .await
            .unwrap();

        let request: ProcessRequest = serde_json::from_str(
            r#"{"classifications":{"0":"HEV","x":"FEV","9":"FEV"},"keepJob":false}"#,
        )
        .unwrap();
        let outcome = service.process(&created.job_id, request).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Invalid(_)));

        // Job 保持可用
        let map = service.classifications(&created.job_id).await.unwrap();
        assert_eq!(map[&0], Some(Category::Hev));
        assert_eq!(map[&1], None);
    }

    #[tokio::test]
    async fn test_page_text_out_of_range() {
        let (service, _store) = service();
        let created = service
            .create_job(vec![UploadedFile::new("a.pdf", pdf_with_pages(&["uno"]))])
            .await
            .unwrap();
        let err = service.page_text(&created.job_id, 4, false).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::PageOutOfRange { index: 4, total: 1 })
        ));
    }
}
