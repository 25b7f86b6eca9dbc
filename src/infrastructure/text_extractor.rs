//! 页面文本提取（外部协作者）
//!
//! 核心只把它当作"页面 → 文本"的纯函数；具体是原生文本层还是 OCR 由实现决定。
//! 实现必须可以在多个包之间并发调用。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, AppResult, ExtractionError};
use crate::infrastructure::pdf;

/// 待提取的页面
#[derive(Debug, Clone)]
pub struct PageSource {
    /// Job 内的全局页序号
    pub page_index: usize,
    /// 源文档中的页码（从 1 开始）
    pub page_number: u32,
    /// 源文档原始字节
    pub pdf: Arc<Vec<u8>>,
}

/// 文本提取能力
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, page: &PageSource) -> AppResult<String>;
}

/// 读取 PDF 原生文本层
#[derive(Debug, Default, Clone)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, page: &PageSource) -> AppResult<String> {
        let pdf = Arc::clone(&page.pdf);
        let page_number = page.page_number;
        let page_index = page.page_index;

        // lopdf 解析是 CPU 密集操作，放到阻塞线程池
        tokio::task::spawn_blocking(move || pdf::extract_page_text(&pdf, page_number))
            .await
            .map_err(|e| AppError::extraction_failed(page_index, e))?
    }
}

/// 带超时的提取；超时视为该页提取失败
pub async fn extract_with_timeout(
    extractor: &dyn TextExtractor,
    page: &PageSource,
    timeout: Duration,
) -> AppResult<String> {
    match tokio::time::timeout(timeout, extractor.extract(page)).await {
        Ok(result) => result,
        Err(_) => Err(ExtractionError::Timeout {
            page_index: page.page_index,
            timeout_secs: timeout.as_secs(),
        }
        .into()),
    }
}
