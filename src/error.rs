use serde::Serialize;
use thiserror::Error;

use crate::models::Category;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 客户端可修正的前置条件错误
    #[error("校验错误: {0}")]
    Validation(#[from] ValidationError),
    /// 标识符（NIT / 发票号）识别失败
    #[error("识别失败: {0}")]
    Detection(#[from] DetectionFailure),
    /// 文本提取错误
    #[error("文本提取错误: {0}")]
    Extraction(#[from] ExtractionError),
    /// 批次容量超限
    #[error("容量错误: {0}")]
    Capacity(#[from] CapacityError),
    /// 压缩包 / PDF 处理错误
    #[error("归档错误: {0}")]
    Archive(#[from] ArchiveError),
    /// 存储错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),
    /// 查找错误（Job / 批次 / 包不存在或未就绪）
    #[error("查找错误: {0}")]
    Lookup(#[from] LookupError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 批次已取消，处理在安全点中止
    #[error("处理已取消")]
    Cancelled,
}

/// 校验错误
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValidationError {
    /// 缺少必需的分类
    #[error("{category} 是必需的: 至少需要一页被分类为 {category}")]
    MissingCategory { category: Category },
    /// 页码超出范围
    #[error("页码 {index} 超出范围 [0, {total})")]
    PageOutOfRange { index: usize, total: usize },
    /// 没有上传任何 PDF
    #[error("至少需要上传 1 个 PDF")]
    NoPdfFiles,
    /// 文件不是 PDF
    #[error("文件不是 PDF: {name}")]
    NotPdf { name: String },
}

/// 标识符识别失败，携带已部分识别出的值
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct DetectionFailure {
    pub message: String,
    pub tax_id_detected: Option<String>,
    pub invoice_number_detected: Option<String>,
}

impl DetectionFailure {
    pub fn new(
        message: impl Into<String>,
        tax_id_detected: Option<String>,
        invoice_number_detected: Option<String>,
    ) -> Self {
        Self {
            message: message.into(),
            tax_id_detected,
            invoice_number_detected,
        }
    }
}

/// 文本提取错误
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// 单页提取超时
    #[error("第 {page_index} 页文本提取超时 ({timeout_secs} 秒)")]
    Timeout { page_index: usize, timeout_secs: u64 },
    /// 提取后端失败
    #[error("第 {page_index} 页文本提取失败: {source}")]
    Backend {
        page_index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// 批次包数量超过上限
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("批次包含 {found} 个发票包，超过上限 {cap}")]
pub struct CapacityError {
    pub found: usize,
    pub cap: usize,
}

/// 压缩包 / PDF 错误
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// ZIP 读写失败
    #[error("ZIP 处理失败: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// PDF 解析或写出失败
    #[error("PDF 处理失败: {0}")]
    Pdf(#[from] lopdf::Error),
    /// 源 PDF 中不存在该页
    #[error("源文档 {source_index} 中不存在第 {page_number} 页")]
    MissingPage { source_index: usize, page_number: u32 },
    /// 压缩包内容不合法
    #[error("压缩包内容不合法: {0}")]
    Malformed(String),
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 键不存在
    #[error("对象不存在: {key}")]
    NotFound { key: String },
    /// 非法的键
    #[error("非法的存储键: {key}")]
    InvalidKey { key: String },
    /// IO 失败
    #[error("IO 失败 ({key}): {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// 查找错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("Job 不存在或已过期: {0}")]
    JobNotFound(String),
    #[error("批次不存在: {0}")]
    BatchNotFound(String),
    #[error("批次 {batch_id} 中不存在包: {package}")]
    PackageNotFound { batch_id: String, package: String },
    /// 产物尚未就绪
    #[error("尚未就绪: {0}")]
    NotReady(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件读取失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML 解析失败: {0}")]
    TomlParseFailed(#[from] toml::de::Error),
    /// 配置值不合法
    #[error("配置项 {name} 不合法: {reason}")]
    InvalidValue { name: String, reason: String },
}

// ========== 从常见错误类型转换 ==========

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        AppError::Archive(ArchiveError::Zip(err))
    }
}

impl From<lopdf::Error> for AppError {
    fn from(err: lopdf::Error) -> Self {
        AppError::Archive(ArchiveError::Pdf(err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(ConfigError::TomlParseFailed(err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Archive(ArchiveError::Malformed(err.to_string()))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(StorageError::Io {
            key: String::new(),
            source: err,
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建 IO 错误（带存储键）
    pub fn storage_io(key: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Storage(StorageError::Io {
            key: key.into(),
            source,
        })
    }

    /// 创建提取后端错误
    pub fn extraction_failed(
        page_index: usize,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Extraction(ExtractionError::Backend {
            page_index,
            source: Box::new(source),
        })
    }

    /// 创建压缩包内容错误
    pub fn malformed(msg: impl Into<String>) -> Self {
        AppError::Archive(ArchiveError::Malformed(msg.into()))
    }

    /// 是否为"对象不存在"类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::Storage(StorageError::NotFound { .. })
                | AppError::Lookup(
                    LookupError::JobNotFound(_)
                        | LookupError::BatchNotFound(_)
                        | LookupError::PackageNotFound { .. }
                )
        )
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
