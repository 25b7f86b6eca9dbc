//! 标识符解析服务 - 业务能力层
//!
//! 只从 FEV 页面文本中提取 NIT（税号）与发票号，不关心页面来自哪里。

use std::sync::LazyLock;

use phf::phf_set;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::DetectionFailure;
use crate::models::{Category, IdentifierOverride};
use crate::utils::normalize_text;

/// 已知的发票号前缀；新增前缀直接加在这里，或通过配置追加
static KNOWN_INVOICE_PREFIXES: phf::Set<&'static str> = phf_set! {
    "OCFE",
    "CUFE",
    "BUFE",
};

/// 发票号前缀的字母个数范围
pub const INVOICE_PREFIX_MIN_LEN: usize = 2;
pub const INVOICE_PREFIX_MAX_LEN: usize = 8;

/// 前缀 + 数字（允许中间有空格或连字符）
static INVOICE_CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b([A-Z]{{{},{}}})\s*-?\s*(\d{{3,}})\b",
        INVOICE_PREFIX_MIN_LEN, INVOICE_PREFIX_MAX_LEN
    ))
    .expect("invalid invoice regex")
});

/// 前缀能否被识别：只含 A-Z，长度在范围内
pub fn is_valid_invoice_prefix(prefix: &str) -> bool {
    let prefix = prefix.trim();
    (INVOICE_PREFIX_MIN_LEN..=INVOICE_PREFIX_MAX_LEN).contains(&prefix.len())
        && prefix.bytes().all(|b| b.is_ascii_alphabetic())
}

/// NIT 必须紧跟在 "NIT" 之后，可带校验位后缀（如 900.204.617-5）
static TAX_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bNIT\b\s*[:.\-]?\s*([0-9.,\s]{6,15}(?:\s*-\s*\d)?)").expect("invalid NIT regex")
});

/// 手动输入的发票号：字母前缀 + 数字
static OVERRIDE_INVOICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]+\d+$").expect("invalid override regex"));

/// NIT 基础号码最少位数
const MIN_TAX_ID_DIGITS: usize = 6;

/// 解析出的命名标识符
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentifiers {
    pub tax_id: String,
    pub invoice_number: String,
}

impl ResolvedIdentifiers {
    /// 分类 PDF 的文件名：`{分类}_{NIT}_{发票号}.pdf`
    pub fn pdf_name(&self, category: Category) -> String {
        format!("{}_{}_{}.pdf", category.code(), self.tax_id, self.invoice_number)
    }

    /// Job 压缩包名称
    pub fn archive_name(&self) -> String {
        format!("TIPIFICADO_{}_{}.zip", self.tax_id, self.invoice_number)
    }
}

/// 标识符解析服务
///
/// 职责：
/// - 从 FEV 文本中识别 NIT 与发票号
/// - 规范化操作员手动输入的值
/// - 识别失败时返回携带部分结果的 `DetectionFailure`
#[derive(Debug, Clone, Default)]
pub struct IdentifierResolver {
    extra_prefixes: Vec<String>,
}

impl IdentifierResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加额外的发票号前缀
    pub fn with_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extra_prefixes: prefixes
                .into_iter()
                .map(|p| p.as_ref().trim().to_ascii_uppercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    fn is_known_prefix(&self, prefix: &str) -> bool {
        KNOWN_INVOICE_PREFIXES.contains(prefix) || self.extra_prefixes.iter().any(|p| p == prefix)
    }

    /// 从 FEV 页面文本中解析标识符
    pub fn resolve<S: AsRef<str>>(&self, fev_texts: &[S]) -> Result<ResolvedIdentifiers, DetectionFailure> {
        let mut tax_id = None;
        let mut invoice_number = None;

        for text in fev_texts {
            let normalized = normalize_text(text.as_ref());
            if tax_id.is_none() {
                tax_id = self.find_tax_id(&normalized);
            }
            if invoice_number.is_none() {
                invoice_number = self.find_invoice_number(&normalized);
            }
            if tax_id.is_some() && invoice_number.is_some() {
                break;
            }
        }

        debug!("FEV 识别结果: NIT={:?}, 发票号={:?}", tax_id, invoice_number);

        match (tax_id, invoice_number) {
            (Some(tax_id), Some(invoice_number)) => Ok(ResolvedIdentifiers {
                tax_id,
                invoice_number,
            }),
            (tax_id, invoice_number) => Err(DetectionFailure::new(
                "无法从 FEV 中识别 NIT 和/或发票号，请手动输入后继续",
                tax_id,
                invoice_number,
            )),
        }
    }

    /// 使用操作员输入的值（完全替代自动识别，不与之合并）
    pub fn resolve_override(&self, overrides: &IdentifierOverride) -> Result<ResolvedIdentifiers, DetectionFailure> {
        let tax_id = overrides
            .tax_id
            .as_deref()
            .map(normalize_tax_id)
            .filter(|nit| nit.len() >= MIN_TAX_ID_DIGITS);
        let invoice_number = overrides
            .invoice_number
            .as_deref()
            .map(normalize_invoice_number)
            .filter(|n| OVERRIDE_INVOICE.is_match(n));

        match (tax_id, invoice_number) {
            (Some(tax_id), Some(invoice_number)) => Ok(ResolvedIdentifiers {
                tax_id,
                invoice_number,
            }),
            (tax_id, invoice_number) => Err(DetectionFailure::new(
                "手动输入的 NIT 和/或发票号无效",
                tax_id,
                invoice_number,
            )),
        }
    }

    /// 文本中是否出现已知前缀的发票号（供分类规则使用）
    pub fn contains_invoice_number(&self, normalized: &str) -> bool {
        self.find_invoice_number(normalized).is_some()
    }

    fn find_invoice_number(&self, normalized: &str) -> Option<String> {
        INVOICE_CANDIDATE.captures_iter(normalized).find_map(|caps| {
            let prefix = caps.get(1)?.as_str();
            let digits = caps.get(2)?.as_str();
            self.is_known_prefix(prefix)
                .then(|| format!("{}{}", prefix, digits))
        })
    }

    fn find_tax_id(&self, normalized: &str) -> Option<String> {
        TAX_ID.captures_iter(normalized).find_map(|caps| {
            let nit = normalize_tax_id(caps.get(1)?.as_str());
            (nit.len() >= MIN_TAX_ID_DIGITS).then_some(nit)
        })
    }
}

/// 规范化 NIT：去掉点、逗号、空格和校验位，只保留基础号码
///
/// `900.204.617 - 5` → `900204617`
pub fn normalize_tax_id(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '.' | ',') && !c.is_whitespace())
        .collect();
    let base = cleaned.split('-').next().unwrap_or_default();
    base.chars().filter(char::is_ascii_digit).collect()
}

/// 规范化发票号：大写并去除空白
pub fn normalize_invoice_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tax_id() {
        assert_eq!(normalize_tax_id("900204617-5"), "900204617");
        assert_eq!(normalize_tax_id("900.204.617 - 5"), "900204617");
        assert_eq!(normalize_tax_id("900204617"), "900204617");
        assert_eq!(normalize_tax_id(""), "");
    }

    #[test]
    fn test_resolve_from_fev_text() {
        let resolver = IdentifierResolver::new();
        let result = resolver
            .resolve(&["FACTURA ELECTRONICA DE VENTA No. OCFE 5871\nNIT: 900.204.617-5"])
            .unwrap();
        assert_eq!(result.tax_id, "900204617");
        assert_eq!(result.invoice_number, "OCFE5871");
        assert_eq!(result.pdf_name(Category::Fev), "FEV_900204617_OCFE5871.pdf");
        assert_eq!(result.archive_name(), "TIPIFICADO_900204617_OCFE5871.zip");
    }

    #[test]
    fn test_values_may_come_from_different_pages() {
        let resolver = IdentifierResolver::new();
        let result = resolver
            .resolve(&["Detalle de cargos nit 800123456", "Factura cufe-12345"])
            .unwrap();
        assert_eq!(result.tax_id, "800123456");
        assert_eq!(result.invoice_number, "CUFE12345");
    }

    #[test]
    fn test_partial_detection_is_reported() {
        let resolver = IdentifierResolver::new();
        let failure = resolver.resolve(&["NIT 900204617-5 sin numero"]).unwrap_err();
        assert_eq!(failure.tax_id_detected.as_deref(), Some("900204617"));
        assert_eq!(failure.invoice_number_detected, None);

        let failure = resolver.resolve(&["BUFE 778899"]).unwrap_err();
        assert_eq!(failure.tax_id_detected, None);
        assert_eq!(failure.invoice_number_detected.as_deref(), Some("BUFE778899"));
    }

    #[test]
    fn test_unknown_prefix_is_ignored_unless_configured() {
        let text = ["NIT 900204617 FVE 123456"];
        assert!(IdentifierResolver::new().resolve(&text).is_err());

        let resolver = IdentifierResolver::with_prefixes(["fve"]);
        assert_eq!(resolver.resolve(&text).unwrap().invoice_number, "FVE123456");
    }

    #[test]
    fn test_longest_accepted_prefix_is_detected() {
        assert!(is_valid_invoice_prefix("FACTURAS"));
        assert!(!is_valid_invoice_prefix("FACTURACION"));

        let resolver = IdentifierResolver::with_prefixes(["facturas"]);
        let ids = resolver.resolve(&["NIT 900204617 FACTURAS 123456"]).unwrap();
        assert_eq!(ids.invoice_number, "FACTURAS123456");
    }

    #[test]
    fn test_override_replaces_detection() {
        let resolver = IdentifierResolver::new();
        let result = resolver
            .resolve_override(&IdentifierOverride::new("900.204.617-5", " ocfe 5871 "))
            .unwrap();
        assert_eq!(result.pdf_name(Category::Fev), "FEV_900204617_OCFE5871.pdf");

        let failure = resolver
            .resolve_override(&IdentifierOverride::new("900204617", "5871"))
            .unwrap_err();
        assert_eq!(failure.tax_id_detected.as_deref(), Some("900204617"));
        assert_eq!(failure.invoice_number_detected, None);
    }
}
