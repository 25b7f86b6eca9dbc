//! Job 处理流程 - 流程层
//!
//! 核心职责：定义"一张发票"的完整处理流程
//!
//! 流程顺序：
//! 1. 逐页提取文本 → 分类（整体替换分类结果）
//! 2. 检查 FEV → 解析 NIT / 发票号（手动输入优先）
//! 3. 按分类组装 PDF → 打包 ZIP

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lopdf::Document;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, DetectionFailure, ValidationError};
use crate::infrastructure::{extract_with_timeout, PageSource, TextExtractor};
use crate::models::{Category, Job};
use crate::services::{
    ArchiveAssembler, Classification, IdentifierResolver, JobArchive, PageClassifier, ResolvedIdentifiers,
};
use crate::utils::truncate_text;
use crate::workflow::job_ctx::JobCtx;

/// `process` 的预期分支（都不是错误）
#[derive(Debug)]
pub enum ProcessOutcome {
    /// 成功生成压缩包
    Archive(JobArchive),
    /// 无法识别标识符，需要操作员手动输入
    NeedsOverride(DetectionFailure),
    /// 前置条件不满足（如缺少 FEV）
    Invalid(ValidationError),
}

/// Job 处理流程
///
/// - 编排分类、识别、组装三个步骤
/// - 不持有 Job，只借用调用方传入的 Job 和源文档字节
/// - 只依赖业务能力（services）和提取能力（infrastructure）
pub struct JobFlow {
    classifier: PageClassifier,
    resolver: IdentifierResolver,
    assembler: ArchiveAssembler,
    extractor: Arc<dyn TextExtractor>,
    extraction_timeout: Duration,
    verbose_logging: bool,
}

impl JobFlow {
    pub fn new(config: &Config, extractor: Arc<dyn TextExtractor>) -> Self {
        let resolver = IdentifierResolver::with_prefixes(&config.extra_invoice_prefixes);
        Self {
            classifier: PageClassifier::new(resolver.clone()),
            resolver,
            assembler: ArchiveAssembler::new(),
            extractor,
            extraction_timeout: Duration::from_secs(config.page_extraction_timeout_secs),
            verbose_logging: config.verbose_logging,
        }
    }

    /// 提取单页文本（优先使用缓存）
    ///
    /// `refresh` 为 true 时忽略缓存重新提取；成功后写回 `text_hint`
    pub async fn page_text(
        &self,
        job: &mut Job,
        sources: &[Arc<Vec<u8>>],
        index: usize,
        refresh: bool,
    ) -> AppResult<String> {
        let total = job.total_pages();
        let page = job
            .pages
            .get(index)
            .ok_or(ValidationError::PageOutOfRange { index, total })?;

        if !refresh {
            if let Some(text) = &page.text_hint {
                return Ok(text.clone());
            }
        }

        let text = self.extract(page.index, page.source_index, page.page_number, sources).await?;
        job.pages[index].text_hint = Some(text.clone());
        Ok(text)
    }

    async fn extract(
        &self,
        page_index: usize,
        source_index: usize,
        page_number: u32,
        sources: &[Arc<Vec<u8>>],
    ) -> AppResult<String> {
        let pdf = sources
            .get(source_index)
            .cloned()
            .ok_or_else(|| AppError::malformed(format!("缺少源文档 {}", source_index)))?;
        let source = PageSource {
            page_index,
            page_number,
            pdf,
        };
        extract_with_timeout(self.extractor.as_ref(), &source, self.extraction_timeout).await
    }

    /// 自动分类：逐页提取文本并分类，全部完成后整体替换 Job 的分类结果
    ///
    /// 单页提取失败只会让该页保持未分类；取消时不修改 Job。
    pub async fn auto_classify(
        &self,
        job: &mut Job,
        sources: &[Arc<Vec<u8>>],
        ctx: &JobCtx,
        cancel: Option<&CancellationToken>,
    ) -> AppResult<BTreeMap<usize, Option<Category>>> {
        info!("{} 🔍 开始自动分类，共 {} 页", ctx, job.total_pages());

        let mut texts = Vec::with_capacity(job.total_pages());
        let mut categories = Vec::with_capacity(job.total_pages());

        for page in &job.pages {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                info!("{} 分类在第 {} 页前中止（已取消）", ctx, page.index);
                return Err(AppError::Cancelled);
            }

            let text = match &page.text_hint {
                Some(cached) => Some(cached.clone()),
                None => match self
                    .extract(page.index, page.source_index, page.page_number, sources)
                    .await
                {
                    Ok(text) => Some(text),
                    Err(e) => {
                        warn!("{} ⚠️ 第 {} 页文本提取失败，保持未分类: {}", ctx, page.index, e);
                        None
                    }
                },
            };

            let (classification, rule) = text
                .as_deref()
                .map(|t| self.classifier.classify_with_rule(t))
                .unwrap_or((Classification::Unclassified, None));

            if self.verbose_logging {
                debug!(
                    "{} 第 {} 页 → {:?} (规则: {}) | {}",
                    ctx,
                    page.index,
                    classification.category(),
                    rule.unwrap_or("-"),
                    truncate_text(text.as_deref().unwrap_or(""), 80)
                );
            }

            texts.push(text);
            categories.push(classification.category());
        }

        for (page, text) in job.pages.iter_mut().zip(texts) {
            if text.is_some() {
                page.text_hint = text;
            }
        }
        job.replace_classifications(categories);

        let classified = job.pages.iter().filter(|p| p.category.is_some()).count();
        info!(
            "{} ✓ 自动分类完成: {}/{} 页已分类",
            ctx,
            classified,
            job.total_pages()
        );
        Ok(job.classification_map())
    }

    /// 处理 Job：校验 → 识别 → 组装
    ///
    /// 缺少 FEV 与识别失败都是预期分支，通过 `ProcessOutcome` 返回，Job 保持不变。
    pub async fn process(
        &self,
        job: &mut Job,
        sources: &[Arc<Vec<u8>>],
        ctx: &JobCtx,
    ) -> AppResult<ProcessOutcome> {
        if !job.has_category(Category::Fev) {
            warn!("{} ⚠️ 没有 FEV 页面，无法处理", ctx);
            return Ok(ProcessOutcome::Invalid(ValidationError::MissingCategory {
                category: Category::Fev,
            }));
        }

        let identifiers = match self.resolve_identifiers(job, sources, ctx).await {
            Ok(ids) => ids,
            Err(failure) => {
                warn!("{} ⚠️ {}", ctx, failure);
                return Ok(ProcessOutcome::NeedsOverride(failure));
            }
        };
        info!(
            "{} ✓ NIT={} 发票号={}",
            ctx, identifiers.tax_id, identifiers.invoice_number
        );

        // HEV 排序依赖页面文本
        self.fill_texts(job, sources, Category::Hev, ctx).await;

        let archive = self.assemble(job, sources, identifiers).await?;
        Ok(ProcessOutcome::Archive(archive))
    }

    async fn resolve_identifiers(
        &self,
        job: &mut Job,
        sources: &[Arc<Vec<u8>>],
        ctx: &JobCtx,
    ) -> Result<ResolvedIdentifiers, DetectionFailure> {
        if let Some(overrides) = job.overrides.as_ref().filter(|o| !o.is_empty()) {
            info!("{} 使用手动输入的标识符", ctx);
            return self.resolver.resolve_override(overrides);
        }

        // FEV 文本提取失败的页面按空文本处理，最终表现为识别失败
        self.fill_texts(job, sources, Category::Fev, ctx).await;
        let fev_texts: Vec<&str> = job
            .pages_in(Category::Fev)
            .into_iter()
            .map(|p| p.text_hint.as_deref().unwrap_or(""))
            .collect();
        self.resolver.resolve(&fev_texts)
    }

    async fn fill_texts(&self, job: &mut Job, sources: &[Arc<Vec<u8>>], category: Category, ctx: &JobCtx) {
        let missing: Vec<usize> = job
            .pages_in(category)
            .iter()
            .filter(|p| p.text_hint.is_none())
            .map(|p| p.index)
            .collect();

        for index in missing {
            if let Err(e) = self.page_text(job, sources, index, false).await {
                warn!("{} ⚠️ 第 {} 页文本提取失败: {}", ctx, index, e);
            }
        }
    }

    async fn assemble(
        &self,
        job: &Job,
        sources: &[Arc<Vec<u8>>],
        identifiers: ResolvedIdentifiers,
    ) -> AppResult<JobArchive> {
        let sources: Vec<Arc<Vec<u8>>> = sources.to_vec();
        let pages = job.pages.clone();
        let assembler = self.assembler.clone();

        // lopdf 解析与写出是 CPU 密集操作
        tokio::task::spawn_blocking(move || {
            let documents = sources
                .iter()
                .map(|bytes| Document::load_mem(bytes))
                .collect::<Result<Vec<_>, _>>()?;
            assembler.build_job_archive(&documents, &pages, &identifiers)
        })
        .await
        .map_err(|e| AppError::malformed(format!("归档任务异常: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::pdf::test_support::pdf_with_pages;
    use crate::infrastructure::PdfTextExtractor;
    use crate::models::{IdentifierOverride, SourceDocument};

    fn flow() -> JobFlow {
        JobFlow::new(&Config::default(), Arc::new(PdfTextExtractor::new()))
    }

    fn job_from(texts: &[&str]) -> (Job, Vec<Arc<Vec<u8>>>) {
        let bytes = pdf_with_pages(texts);
        let job = Job::new(
            "t",
            vec![SourceDocument {
                name: "a.pdf".into(),
                blob_key: "jobs/t/pdfs/src_0.pdf".into(),
                page_count: texts.len() as u32,
            }],
        );
        (job, vec![Arc::new(bytes)])
    }

    #[tokio::test]
    async fn test_auto_classify_replaces_classifications() {
        let (mut job, sources) = job_from(&[
            "FACTURA ELECTRONICA DE VENTA OCFE 5871 NIT 900204617",
            "HISTORIA CLINICA",
            "pagina en blanco",
        ]);
        let map = flow()
            .auto_classify(&mut job, &sources, &JobCtx::new("t"), None)
            .await
            .unwrap();

        assert_eq!(map[&0], Some(Category::Fev));
        assert_eq!(map[&1], Some(Category::Hev));
        assert_eq!(map[&2], None);
        assert!(job.pages.iter().all(|p| p.text_hint.is_some()));
    }

    #[tokio::test]
    async fn test_cancelled_classification_leaves_job_untouched() {
        let (mut job, sources) = job_from(&["FACTURA ELECTRONICA DE VENTA"]);
        let token = CancellationToken::new();
        token.cancel();

        let err = flow()
            .auto_classify(&mut job, &sources, &JobCtx::new("t"), Some(&token))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert!(job.pages[0].category.is_none());
    }

    #[tokio::test]
    async fn test_process_without_fev_is_invalid() {
        let (mut job, sources) = job_from(&["HISTORIA CLINICA"]);
        job.replace_classifications(vec![Some(Category::Hev)]);

        let outcome = flow().process(&mut job, &sources, &JobCtx::new("t")).await.unwrap();
        assert!(matches!(
            outcome,
            ProcessOutcome::Invalid(ValidationError::MissingCategory { category: Category::Fev })
        ));
    }

    #[tokio::test]
    async fn test_process_needs_override_then_succeeds() {
        let (mut job, sources) = job_from(&["FACTURA sin datos", "HISTORIA CLINICA"]);
        job.replace_classifications(vec![Some(Category::Fev), Some(Category::Hev)]);
        let flow = flow();

        let outcome = flow.process(&mut job, &sources, &JobCtx::new("t")).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::NeedsOverride(_)));

        job.overrides = Some(IdentifierOverride::new("900204617-5", "OCFE5871"));
        match flow.process(&mut job, &sources, &JobCtx::new("t")).await.unwrap() {
            ProcessOutcome::Archive(archive) => {
                assert_eq!(archive.name, "TIPIFICADO_900204617_OCFE5871.zip");
                assert_eq!(archive.files.len(), 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
