//! PDF 读取与按页重组（基于 lopdf）

use std::collections::HashMap;

use lopdf::{dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::error::{ArchiveError, AppResult};

/// 页面继承属性：若页面自身缺失，需要从父节点复制下来
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// 解析 PDF 并返回页数
pub fn page_count(pdf_bytes: &[u8]) -> AppResult<u32> {
    let doc = Document::load_mem(pdf_bytes)?;
    Ok(doc.get_pages().len() as u32)
}

/// 提取单页的原生文本层
pub fn extract_page_text(pdf_bytes: &[u8], page_number: u32) -> AppResult<String> {
    let doc = Document::load_mem(pdf_bytes)?;
    if !doc.get_pages().contains_key(&page_number) {
        return Err(ArchiveError::MissingPage {
            source_index: 0,
            page_number,
        }
        .into());
    }
    Ok(doc.extract_text(&[page_number])?)
}

/// 对页面的引用：源文档序号 + 页码（从 1 开始）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRef {
    pub source_index: usize,
    pub page_number: u32,
}

/// 按给定顺序从多个源文档中抽取页面，组装为新的 PDF
pub fn assemble_pages(sources: &[Document], pages: &[PageRef]) -> AppResult<Vec<u8>> {
    let mut output = Document::with_version("1.5");
    // 每个源文档只复制一次对象
    let mut imported: HashMap<usize, std::collections::BTreeMap<u32, ObjectId>> = HashMap::new();
    let mut kids: Vec<ObjectId> = Vec::with_capacity(pages.len());

    for page in pages {
        if !imported.contains_key(&page.source_index) {
            let source = sources.get(page.source_index).ok_or(ArchiveError::MissingPage {
                source_index: page.source_index,
                page_number: page.page_number,
            })?;
            let page_map = import_document(&mut output, source)?;
            imported.insert(page.source_index, page_map);
        }

        let page_id = imported
            .get(&page.source_index)
            .and_then(|m| m.get(&page.page_number))
            .copied()
            .ok_or(ArchiveError::MissingPage {
                source_index: page.source_index,
                page_number: page.page_number,
            })?;
        kids.push(page_id);
    }

    let pages_id = output.new_object_id();
    for &page_id in &kids {
        let dict = output.get_object_mut(page_id)?.as_dict_mut()?;
        dict.set("Parent", pages_id);
    }

    output.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.iter().map(|&id| Object::Reference(id)).collect::<Vec<Object>>(),
            "Count" => kids.len() as i64,
        }),
    );
    let catalog_id = output.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    output.trailer.set("Root", catalog_id);

    // 源文档的 Catalog、Pages 以及未选中的页面都不再可达，一并删除
    let pruned = output.prune_objects();
    debug!(
        "组装 PDF: {} 页, {} 个源文档, 移除 {} 个对象",
        kids.len(),
        imported.len(),
        pruned.len()
    );

    let mut buffer = Vec::new();
    output.save_to(&mut buffer)?;
    Ok(buffer)
}

/// 将源文档的全部对象重新编号后并入输出文档，返回 页码 → 新对象 ID
fn import_document(
    output: &mut Document,
    source: &Document,
) -> AppResult<std::collections::BTreeMap<u32, ObjectId>> {
    let mut doc = source.clone();
    doc.renumber_objects_with(output.max_id + 1);

    let pages = doc.get_pages();
    for &page_id in pages.values() {
        let inherited = collect_inherited(&doc, page_id);
        let dict = doc.get_object_mut(page_id)?.as_dict_mut()?;
        for (key, value) in inherited {
            dict.set(key, value);
        }
    }

    output.max_id = output.max_id.max(doc.max_id);
    output.objects.extend(doc.objects);
    Ok(pages)
}

/// 沿 Parent 链收集页面缺失的继承属性
fn collect_inherited(doc: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for key in INHERITABLE_KEYS {
        if page.has(key) {
            continue;
        }
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        // Parent 链深度有限，防止循环引用
        let mut depth = 0;
        while let Some(parent_id) = parent {
            if depth > 32 {
                break;
            }
            let Ok(node) = doc.get_dictionary(parent_id) else {
                break;
            };
            if let Ok(value) = node.get(key) {
                found.push((key.to_vec(), value.clone()));
                break;
            }
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
            depth += 1;
        }
    }
    found
}
