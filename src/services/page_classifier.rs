//! 页面分类服务 - 业务能力层
//!
//! 按固定优先级顺序匹配规则，第一条命中的规则决定分类。
//! 同时含有临床与社工标记的页面归为 HEV；贷项通知单归为 FEV。

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use tracing::trace;

use crate::models::Category;
use crate::services::IdentifierResolver;
use crate::utils::normalize_text;

/// 分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Classified(Category),
    Unclassified,
}

impl Classification {
    pub fn category(self) -> Option<Category> {
        match self {
            Classification::Classified(c) => Some(c),
            Classification::Unclassified => None,
        }
    }
}

/// 规则匹配方式
enum Matcher {
    /// 在规范化文本上匹配的正则
    Pattern(Regex),
    /// 文本中出现已知前缀的发票号
    InvoiceNumber,
}

/// 一条分类规则
struct Rule {
    name: &'static str,
    category: Category,
    matcher: Matcher,
}

fn rule(name: &'static str, category: Category, pattern: &str) -> Rule {
    Rule {
        name,
        category,
        matcher: Matcher::Pattern(Regex::new(pattern).expect("invalid classification rule")),
    }
}

/// 规则表（顺序即优先级）
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // FEV：发票、贷项通知单、费用明细
        rule("fev-nota-credito", Category::Fev, r"\bNOTA\s+(DE\s+)?CREDITO\b"),
        rule(
            "fev-factura",
            Category::Fev,
            r"\bFACTURA\s+(ELECTRONICA(\s+DE\s+VENTA)?|DE\s+VENTA)\b",
        ),
        rule("fev-detalle-cargos", Category::Fev, r"\bDETALLE\s+DE\s+(LOS\s+)?CARGOS\b"),
        Rule {
            name: "fev-numero-factura",
            category: Category::Fev,
            matcher: Matcher::InvoiceNumber,
        },
        // PDE：服务授权
        rule(
            "pde-autorizacion",
            Category::Pde,
            r"\b(AUTORIZACION\s+DE\s+SERVICIOS?|NUMERO\s+DE\s+AUTORIZACION|AUTORIZACION\s+(NO\.?|N°|#)\s*\d)",
        ),
        // CRC：居家护理记录
        rule(
            "crc-atencion-domiciliaria",
            Category::Crc,
            r"\b(REGISTRO\s+DE\s+)?(ATENCION|CUIDADO|VISITA)\s+DOMICILIARI[AO]\b",
        ),
        // HEV：病历、社工、护理活动记录
        rule(
            "hev-historia-clinica",
            Category::Hev,
            r"\b(HISTORIA\s+CLINICA|EPICRISIS|NOTAS?\s+DE\s+EVOLUCION|EVOLUCION\s+MEDICA)\b",
        ),
        rule("hev-trabajo-social", Category::Hev, r"\b(TRABAJO\s+SOCIAL|VALORACION\s+SOCIAL)\b"),
        rule(
            "hev-registro-actividades",
            Category::Hev,
            r"\bREGISTRO\s+DE\s+(LAS\s+)?ACTIVIDADES\b",
        ),
        // OPF：医嘱 / 医疗决定
        rule(
            "opf-orden-medica",
            Category::Opf,
            r"\b(ORDEN(ES)?\s+MEDICAS?|FORMULA\s+MEDICA|DECISION\s+MEDICA|JUNTA\s+MEDICA)\b",
        ),
        // CRC 的表格续页
        rule(
            "crc-continuacion",
            Category::Crc,
            r"\bCONTINUACION\b.*\bFECHA\b.*\bHORA\b",
        ),
    ]
});

/// HEV 创建日期字段
static CREATION_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bFECHA\s+(DE\s+)?(CREACION|ELABORACION|REGISTRO)\s*:?\s*(\d{4}-\d{2}-\d{2}|\d{1,2}[/-]\d{1,2}[/-]\d{4})(\s+(\d{1,2}:\d{2}))?",
    )
    .expect("invalid creation date regex")
});

/// 页面分类服务
///
/// 职责：
/// - 文本 → 分类（确定性、无副作用、不会失败）
/// - 负责消歧，调用方永远只得到一个分类或未分类
pub struct PageClassifier {
    resolver: IdentifierResolver,
}

impl PageClassifier {
    pub fn new(resolver: IdentifierResolver) -> Self {
        Self { resolver }
    }

    pub fn classify(&self, text: &str) -> Classification {
        self.classify_with_rule(text).0
    }

    /// 分类并返回命中的规则名称（用于诊断日志）
    pub fn classify_with_rule(&self, text: &str) -> (Classification, Option<&'static str>) {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return (Classification::Unclassified, None);
        }

        for rule in RULES.iter() {
            let hit = match &rule.matcher {
                Matcher::Pattern(re) => re.is_match(&normalized),
                Matcher::InvoiceNumber => self.resolver.contains_invoice_number(&normalized),
            };
            if hit {
                trace!("命中规则 {} → {}", rule.name, rule.category);
                return (Classification::Classified(rule.category), Some(rule.name));
            }
        }

        (Classification::Unclassified, None)
    }
}

impl Default for PageClassifier {
    fn default() -> Self {
        Self::new(IdentifierResolver::new())
    }
}

/// 读取 HEV 页面的创建日期
pub fn creation_date(text: &str) -> Option<NaiveDateTime> {
    let normalized = normalize_text(text);
    let caps = CREATION_DATE.captures(&normalized)?;
    let date = parse_date(caps.get(3)?.as_str())?;
    let time = caps
        .get(5)
        .and_then(|m| NaiveTime::parse_from_str(m.as_str(), "%H:%M").ok())
        .unwrap_or(NaiveTime::MIN);
    Some(date.and_time(time))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Option<Category> {
        PageClassifier::default().classify(text).category()
    }

    #[test]
    fn test_basic_categories() {
        assert_eq!(classify("FACTURA ELECTRÓNICA DE VENTA No. OCFE5871"), Some(Category::Fev));
        assert_eq!(classify("Detalle de cargos del paciente"), Some(Category::Fev));
        assert_eq!(classify("Autorización de servicios No. 1234"), Some(Category::Pde));
        assert_eq!(classify("Registro de atención domiciliaria"), Some(Category::Crc));
        assert_eq!(classify("Historia clínica - evolución"), Some(Category::Hev));
        assert_eq!(classify("Orden médica: terapia física"), Some(Category::Opf));
    }

    #[test]
    fn test_credit_note_is_fev() {
        assert_eq!(classify("NOTA CRÉDITO asociada a la factura"), Some(Category::Fev));
        assert_eq!(classify("nota de credito"), Some(Category::Fev));
    }

    #[test]
    fn test_clinical_and_social_work_resolve_to_hev() {
        assert_eq!(
            classify("HISTORIA CLINICA\nValoración por TRABAJO SOCIAL\nOrden médica"),
            Some(Category::Hev)
        );
        assert_eq!(classify("Informe de trabajo social"), Some(Category::Hev));
    }

    #[test]
    fn test_tabular_continuation_is_crc() {
        assert_eq!(
            classify("Continuación\nFecha | Hora | Actividad | Firma"),
            Some(Category::Crc)
        );
    }

    #[test]
    fn test_unclassified() {
        let classifier = PageClassifier::default();
        assert_eq!(classifier.classify(""), Classification::Unclassified);
        assert_eq!(classifier.classify("página en blanco"), Classification::Unclassified);
        assert_eq!(classifier.classify_with_rule("  ").1, None);
    }

    #[test]
    fn test_invoice_number_marks_fev() {
        let (classification, rule) =
            PageClassifier::default().classify_with_rule("Soporte de pago CUFE 998877");
        assert_eq!(classification, Classification::Classified(Category::Fev));
        assert_eq!(rule, Some("fev-numero-factura"));
    }

    #[test]
    fn test_creation_date() {
        let parsed = creation_date("Fecha de creación: 2024-01-03").unwrap();
        assert_eq!(parsed.date(), NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());

        let parsed = creation_date("FECHA ELABORACION 02/01/2024 14:30").unwrap();
        assert_eq!(parsed.date(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(parsed.time(), NaiveTime::from_hms_opt(14, 30, 0).unwrap());

        assert!(creation_date("Historia clínica sin fecha").is_none());
    }
}
