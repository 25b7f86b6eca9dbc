//! Job 模型
//!
//! 一个 Job 对应一张发票的全部支持文件：按上传顺序拼接的页面序列。
//! Job 独占其页面，页面只通过稳定的序号访问，不存在反向引用。

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::Category;

/// 上传的源 PDF
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// 原始文件名
    pub name: String,
    /// 在 BlobStore 中的键
    pub blob_key: String,
    /// 页数
    pub page_count: u32,
}

/// 单个页面
#[derive(Debug, Clone)]
pub struct Page {
    /// 全局序号（从 0 开始，在 Job 内稳定）
    pub index: usize,
    /// 所属源文档序号
    pub source_index: usize,
    /// 在源文档中的页码（从 1 开始）
    pub page_number: u32,
    /// 已提取的文本（惰性填充并缓存）
    pub text_hint: Option<String>,
    /// 分类结果
    pub category: Option<Category>,
}

/// 操作员手动提供的标识符
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifierOverride {
    #[serde(default, alias = "nitOverride")]
    pub tax_id: Option<String>,
    #[serde(default, alias = "ocfeOverride")]
    pub invoice_number: Option<String>,
}

impl IdentifierOverride {
    pub fn new(tax_id: impl Into<String>, invoice_number: impl Into<String>) -> Self {
        Self {
            tax_id: Some(tax_id.into()),
            invoice_number: Some(invoice_number.into()),
        }
    }

    /// 两个字段都为空（或只有空白）时视为未提供
    pub fn is_empty(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.tax_id) && blank(&self.invoice_number)
    }
}

/// 单张发票的处理单元
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub sources: Vec<SourceDocument>,
    pub pages: Vec<Page>,
    pub overrides: Option<IdentifierOverride>,
    pub created_at: DateTime<Local>,
}

impl Job {
    /// 根据源文档构建 Job，按源文档顺序展开全部页面
    pub fn new(id: impl Into<String>, sources: Vec<SourceDocument>) -> Self {
        let mut pages = Vec::new();
        for (source_index, source) in sources.iter().enumerate() {
            for page_number in 1..=source.page_count {
                pages.push(Page {
                    index: pages.len(),
                    source_index,
                    page_number,
                    text_hint: None,
                    category: None,
                });
            }
        }

        Self {
            id: id.into(),
            sources,
            pages,
            overrides: None,
            created_at: Local::now(),
        }
    }

    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    /// 整体替换分类结果（长度必须与页数一致，否则不做任何修改）
    pub fn replace_classifications(&mut self, categories: Vec<Option<Category>>) -> bool {
        if categories.len() != self.pages.len() {
            return false;
        }
        for (page, category) in self.pages.iter_mut().zip(categories) {
            page.category = category;
        }
        true
    }

    /// 应用手动分类；超出范围的序号被忽略
    pub fn apply_manual_classifications(&mut self, classifications: &BTreeMap<usize, Option<Category>>) {
        for (&index, &category) in classifications {
            if let Some(page) = self.pages.get_mut(index) {
                page.category = category;
            }
        }
    }

    /// 页码 → 分类 映射
    pub fn classification_map(&self) -> BTreeMap<usize, Option<Category>> {
        self.pages.iter().map(|p| (p.index, p.category)).collect()
    }

    /// 某一分类的页面（保持原始顺序）
    pub fn pages_in(&self, category: Category) -> Vec<&Page> {
        self.pages
            .iter()
            .filter(|p| p.category == Some(category))
            .collect()
    }

    pub fn has_category(&self, category: Category) -> bool {
        self.pages.iter().any(|p| p.category == Some(category))
    }
}
