//! 归档组装服务 - 业务能力层
//!
//! 负责两种产物：
//! - 单张发票的压缩包：每个分类一个 PDF
//! - 批次汇总压缩包：所有 done 包的产物，按包名分目录

use std::io::{Cursor, Write};

use lopdf::Document;
use serde::Serialize;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::AppResult;
use crate::infrastructure::pdf::{self, PageRef};
use crate::models::{Category, Page};
use crate::services::identifier_resolver::ResolvedIdentifiers;
use crate::services::page_classifier::creation_date;

/// 生成的压缩包
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobArchive {
    /// 下载文件名
    pub name: String,
    /// 压缩包内的文件名（按分类顺序）
    pub files: Vec<String>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// 汇总压缩包中的一个包产物
#[derive(Debug, Clone)]
pub struct ConsolidatedEntry {
    pub package_name: String,
    pub download_name: String,
    pub bytes: Vec<u8>,
}

/// 归档组装服务
#[derive(Debug, Default, Clone)]
pub struct ArchiveAssembler;

impl ArchiveAssembler {
    pub fn new() -> Self {
        Self
    }

    /// 组装单张发票的压缩包
    ///
    /// 每个分类只包含该分类的页面，按原始顺序排列；
    /// HEV 页面在多于一页带有创建日期时按日期升序排列。未分类页面不输出。
    pub fn build_job_archive(
        &self,
        sources: &[Document],
        pages: &[Page],
        identifiers: &ResolvedIdentifiers,
    ) -> AppResult<JobArchive> {
        let mut files = Vec::new();

        for category in Category::ALL {
            let selected: Vec<&Page> = pages
                .iter()
                .filter(|p| p.category == Some(category))
                .collect();
            if selected.is_empty() {
                continue;
            }

            let ordered = if category == Category::Hev {
                order_hev_pages(selected)
            } else {
                selected
            };

            let refs: Vec<PageRef> = ordered
                .iter()
                .map(|p| PageRef {
                    source_index: p.source_index,
                    page_number: p.page_number,
                })
                .collect();

            let pdf_bytes = pdf::assemble_pages(sources, &refs)?;
            let filename = identifiers.pdf_name(category);
            debug!("生成 {} ({} 页)", filename, refs.len());
            files.push((filename, pdf_bytes));
        }

        let name = identifiers.archive_name();
        let bytes = zip_files(&files)?;
        info!("✓ 压缩包已生成: {} ({} 个文件)", name, files.len());

        Ok(JobArchive {
            name,
            files: files.into_iter().map(|(n, _)| n).collect(),
            bytes,
        })
    }

    /// 组装批次汇总压缩包，条目为 `{包名}/{下载名}`
    pub fn build_consolidated(&self, entries: &[ConsolidatedEntry]) -> AppResult<Vec<u8>> {
        let files: Vec<(String, Vec<u8>)> = entries
            .iter()
            .map(|e| (format!("{}/{}", e.package_name, e.download_name), e.bytes.clone()))
            .collect();
        zip_files(&files)
    }
}

/// HEV 页面排序：多于一页带创建日期时，带日期的页面按日期升序在前，
/// 其余页面保持原始顺序排在后面
pub fn order_hev_pages(pages: Vec<&Page>) -> Vec<&Page> {
    let mut keyed: Vec<(Option<chrono::NaiveDateTime>, &Page)> = pages
        .into_iter()
        .map(|p| (p.text_hint.as_deref().and_then(creation_date), p))
        .collect();

    let dated = keyed.iter().filter(|(d, _)| d.is_some()).count();
    if dated > 1 {
        // 稳定排序：None 排在 Some 之后
        keyed.sort_by_key(|(date, _)| (date.is_none(), *date));
    }

    keyed.into_iter().map(|(_, p)| p).collect()
}

fn zip_files(files: &[(String, Vec<u8>)]) -> AppResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in files {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(data)?;
        }
        zip.finish()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::pdf::test_support::pdf_with_pages;
    use std::io::Read;
    use zip::ZipArchive;

    fn page(index: usize, page_number: u32, category: Option<Category>, text: &str) -> Page {
        Page {
            index,
            source_index: 0,
            page_number,
            text_hint: Some(text.to_string()),
            category,
        }
    }

    fn ids() -> ResolvedIdentifiers {
        ResolvedIdentifiers {
            tax_id: "900204617".into(),
            invoice_number: "OCFE5871".into(),
        }
    }

    fn zip_names(bytes: &[u8]) -> Vec<String> {
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        archive.file_names().map(str::to_string).collect()
    }

    #[test]
    fn test_hev_pages_sorted_by_creation_date() {
        let pages = vec![
            page(0, 1, Some(Category::Hev), "Fecha de creación: 2024-01-03"),
            page(1, 2, Some(Category::Hev), "Fecha de creación: 2024-01-01"),
            page(2, 3, Some(Category::Hev), "Fecha de creación: 2024-01-02"),
        ];
        let ordered: Vec<usize> = order_hev_pages(pages.iter().collect())
            .iter()
            .map(|p| p.index)
            .collect();
        assert_eq!(ordered, vec![1, 2, 0]);
    }

    #[test]
    fn test_hev_order_kept_with_single_date() {
        let pages = vec![
            page(0, 1, Some(Category::Hev), "sin fecha"),
            page(1, 2, Some(Category::Hev), "Fecha de creación: 2024-01-01"),
        ];
        let ordered: Vec<usize> = order_hev_pages(pages.iter().collect())
            .iter()
            .map(|p| p.index)
            .collect();
        assert_eq!(ordered, vec![0, 1]);
    }

    #[test]
    fn test_undated_hev_pages_follow_dated_ones() {
        let pages = vec![
            page(0, 1, Some(Category::Hev), "anexo"),
            page(1, 2, Some(Category::Hev), "Fecha de creación: 2024-02-01"),
            page(2, 3, Some(Category::Hev), "Fecha de creación: 2024-01-01"),
        ];
        let ordered: Vec<usize> = order_hev_pages(pages.iter().collect())
            .iter()
            .map(|p| p.index)
            .collect();
        assert_eq!(ordered, vec![2, 1, 0]);
    }

    #[test]
    fn test_job_archive_has_one_pdf_per_category() {
        let source = Document::load_mem(&pdf_with_pages(&["f", "h", "x", "o"])).unwrap();
        let pages = vec![
            page(0, 1, Some(Category::Fev), "f"),
            page(1, 2, Some(Category::Hev), "h"),
            page(2, 3, None, "x"),
            page(3, 4, Some(Category::Opf), "o"),
        ];

        let archive = ArchiveAssembler::new()
            .build_job_archive(&[source], &pages, &ids())
            .unwrap();

        assert_eq!(archive.name, "TIPIFICADO_900204617_OCFE5871.zip");
        assert_eq!(
            archive.files,
            vec![
                "FEV_900204617_OCFE5871.pdf",
                "HEV_900204617_OCFE5871.pdf",
                "OPF_900204617_OCFE5871.pdf"
            ]
        );
        let mut names = zip_names(&archive.bytes);
        names.sort();
        assert_eq!(names, archive.files);
    }

    #[test]
    fn test_consolidated_archive_layout() {
        let entries = vec![
            ConsolidatedEntry {
                package_name: "FAC_1".into(),
                download_name: "TIPIFICADO_1_OCFE1.zip".into(),
                bytes: b"uno".to_vec(),
            },
            ConsolidatedEntry {
                package_name: "FAC_2".into(),
                download_name: "TIPIFICADO_2_OCFE2.zip".into(),
                bytes: b"dos".to_vec(),
            },
        ];
        let bytes = ArchiveAssembler::new().build_consolidated(&entries).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let mut content = String::new();
        archive
            .by_name("FAC_2/TIPIFICADO_2_OCFE2.zip")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "dos");
        assert_eq!(archive.len(), 2);
    }
}
