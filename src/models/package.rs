use serde::{Deserialize, Serialize};

use crate::error::{AppError, DetectionFailure, ValidationError};

/// 包在批次压缩包中的来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "path", rename_all = "camelCase")]
pub enum PackageSource {
    /// 顶层文件夹（路径以 `/` 结尾）
    Folder(String),
    /// 顶层嵌套压缩包
    NestedZip(String),
}

impl PackageSource {
    pub fn path(&self) -> &str {
        match self {
            PackageSource::Folder(p) | PackageSource::NestedZip(p) => p,
        }
    }
}

/// 批次中发现的发票包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    /// 由来源路径推导的名称
    pub name: String,
    pub source: PackageSource,
}

/// 包级失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PackageErrorKind {
    /// 缺少必需分类等可修正问题
    Validation,
    /// 无法识别 NIT / 发票号
    Detection,
    /// 文本提取失败
    Extraction,
    /// 压缩包 / PDF 处理失败
    Archive,
    /// 存储失败
    Storage,
    /// 其他内部错误
    Internal,
}

/// 结构化的包失败信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageError {
    pub kind: PackageErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id_detected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number_detected: Option<String>,
}

impl PackageError {
    pub fn new(kind: PackageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tax_id_detected: None,
            invoice_number_detected: None,
        }
    }
}

impl From<&ValidationError> for PackageError {
    fn from(err: &ValidationError) -> Self {
        PackageError::new(PackageErrorKind::Validation, err.to_string())
    }
}

impl From<&DetectionFailure> for PackageError {
    fn from(failure: &DetectionFailure) -> Self {
        Self {
            kind: PackageErrorKind::Detection,
            message: failure.message.clone(),
            tax_id_detected: failure.tax_id_detected.clone(),
            invoice_number_detected: failure.invoice_number_detected.clone(),
        }
    }
}

impl From<&AppError> for PackageError {
    fn from(err: &AppError) -> Self {
        match err {
            AppError::Validation(e) => e.into(),
            AppError::Detection(e) => e.into(),
            AppError::Extraction(_) => PackageError::new(PackageErrorKind::Extraction, err.to_string()),
            AppError::Archive(_) | AppError::Capacity(_) => {
                PackageError::new(PackageErrorKind::Archive, err.to_string())
            }
            AppError::Storage(_) => PackageError::new(PackageErrorKind::Storage, err.to_string()),
            AppError::Lookup(_) | AppError::Config(_) | AppError::Cancelled => {
                PackageError::new(PackageErrorKind::Internal, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    #[test]
    fn test_detection_failure_keeps_partial_values() {
        let failure = DetectionFailure::new("sin OCFE", Some("900204617".into()), None);
        let err = PackageError::from(&AppError::Detection(failure));

        assert_eq!(err.kind, PackageErrorKind::Detection);
        assert_eq!(err.tax_id_detected.as_deref(), Some("900204617"));
        assert_eq!(err.invoice_number_detected, None);
    }

    #[test]
    fn test_validation_maps_to_validation_kind() {
        let err = PackageError::from(&ValidationError::MissingCategory {
            category: Category::Fev,
        });
        assert_eq!(err.kind, PackageErrorKind::Validation);
        assert!(err.message.contains("FEV"));
    }
}
