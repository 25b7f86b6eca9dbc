//! 基础设施层：持有外部资源（存储、PDF 解析、文本提取），只暴露能力

pub mod blob_store;
pub mod pdf;
pub mod text_extractor;

pub use blob_store::{BlobStore, LocalBlobStore, MemoryBlobStore};
pub use pdf::PageRef;
pub use text_extractor::{extract_with_timeout, PageSource, PdfTextExtractor, TextExtractor};
