//! 批次压缩包加载
//!
//! 批次 ZIP 的每个顶层文件夹（或顶层嵌套 `.zip`）是一个发票包。

use std::io::{Cursor, Read};

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{AppError, AppResult};
use crate::models::{PackageDescriptor, PackageSource};

/// 上传的单个文件
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn is_pdf_name(&self) -> bool {
        is_pdf_path(&self.name)
    }
}

/// 列出批次压缩包中的发票包（按首次出现顺序）
pub fn enumerate_packages(zip_bytes: &[u8]) -> AppResult<Vec<PackageDescriptor>> {
    let entries = list_entries(zip_bytes)?;
    let root = common_wrapper_root(&entries);
    if let Some(root) = &root {
        debug!("批次压缩包被包裹在单一根目录中: {}", root);
    }

    let mut packages: Vec<PackageDescriptor> = Vec::new();
    for entry in &entries {
        if entry.is_dir {
            continue;
        }
        let relative = match &root {
            Some(root) => match entry.path.strip_prefix(root.as_str()) {
                Some(rest) => rest,
                None => continue,
            },
            None => entry.path.as_str(),
        };

        let descriptor = match relative.split_once('/') {
            Some((folder, _)) => PackageDescriptor {
                name: folder.to_string(),
                source: PackageSource::Folder(format!(
                    "{}{}/",
                    root.as_deref().unwrap_or(""),
                    folder
                )),
            },
            None if is_zip_path(relative) => PackageDescriptor {
                name: strip_extension(relative).to_string(),
                source: PackageSource::NestedZip(entry.path.clone()),
            },
            None => {
                warn!("忽略批次根目录下的文件: {}", entry.path);
                continue;
            }
        };

        if !packages.iter().any(|p| p.name == descriptor.name) {
            packages.push(descriptor);
        }
    }

    Ok(packages)
}

/// 读取某个发票包内的全部 PDF（保持压缩包内顺序）
pub fn load_package_pdfs(zip_bytes: &[u8], source: &PackageSource) -> AppResult<Vec<UploadedFile>> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))?;

    match source {
        PackageSource::Folder(prefix) => {
            let mut files = Vec::new();
            for i in 0..archive.len() {
                let mut file = archive.by_index(i)?;
                let path = normalize_path(file.name());
                if file.is_dir() || !path.starts_with(prefix.as_str()) || is_ignored(&path) {
                    continue;
                }
                if !is_pdf_path(&path) {
                    debug!("跳过非 PDF 文件: {}", path);
                    continue;
                }
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                files.push(UploadedFile::new(file_name(&path), bytes));
            }
            Ok(files)
        }
        PackageSource::NestedZip(path) => {
            let index = list_entries(zip_bytes)?
                .into_iter()
                .find(|e| &e.path == path)
                .map(|e| e.index)
                .ok_or_else(|| AppError::malformed(format!("压缩包中不存在 {}", path)))?;
            let mut inner_bytes = Vec::new();
            {
                let mut inner = archive.by_index(index)?;
                inner.read_to_end(&mut inner_bytes)?;
            }
            let entries = list_entries(&inner_bytes)?;
            let mut inner_archive = ZipArchive::new(Cursor::new(inner_bytes.as_slice()))?;
            let mut files = Vec::new();
            for entry in entries.iter().filter(|e| !e.is_dir && is_pdf_path(&e.path)) {
                let mut file = inner_archive.by_index(entry.index)?;
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                files.push(UploadedFile::new(file_name(&entry.path), bytes));
            }
            Ok(files)
        }
    }
}

/// 压缩包条目
struct Entry {
    index: usize,
    path: String,
    is_dir: bool,
}

fn list_entries(zip_bytes: &[u8]) -> AppResult<Vec<Entry>> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        let path = normalize_path(file.name());
        if path.is_empty() || is_ignored(&path) {
            continue;
        }
        entries.push(Entry {
            index,
            is_dir: file.is_dir() || path.ends_with('/'),
            path,
        });
    }
    Ok(entries)
}

/// 若所有文件都是同一个根目录下的嵌套 `.zip`，返回该根目录（形如 `lote/`）
///
/// 根目录下只要有子文件夹或其他文件，它本身就是一个发票包，不做解包。
fn common_wrapper_root(entries: &[Entry]) -> Option<String> {
    let mut files = entries.iter().filter(|e| !e.is_dir);
    let first = files.next()?;
    let (root, _) = first.path.split_once('/')?;
    let prefix = format!("{}/", root);

    let all_nested_zips = entries.iter().filter(|e| !e.is_dir).all(|entry| {
        entry
            .path
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| !rest.contains('/') && is_zip_path(rest))
    });
    all_nested_zips.then_some(prefix)
}

fn normalize_path(raw: &str) -> String {
    raw.replace('\\', "/").trim_start_matches('/').to_string()
}

fn is_ignored(path: &str) -> bool {
    path.starts_with("__MACOSX/")
        || path
            .split('/')
            .any(|segment| segment.starts_with('.') && !segment.is_empty())
}

fn is_pdf_path(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".pdf")
}

fn is_zip_path(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".zip")
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn strip_extension(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();
            for (name, data) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_enumerate_folders_in_discovery_order() {
        let bytes = build_zip(&[
            ("FAC_002/a.pdf", b"%PDF"),
            ("FAC_001/b.pdf", b"%PDF"),
            ("FAC_002/c.pdf", b"%PDF"),
            ("__MACOSX/FAC_001/._b.pdf", b"x"),
            ("leeme.txt", b"hola"),
        ]);

        let packages = enumerate_packages(&bytes).unwrap();
        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["FAC_002", "FAC_001"]);
        assert_eq!(packages[0].source, PackageSource::Folder("FAC_002/".into()));
    }

    #[test]
    fn test_nested_zip_packages() {
        let inner = build_zip(&[("factura.pdf", b"%PDF-inner"), ("notas.txt", b"x")]);
        let outer = build_zip(&[("FAC_010.zip", &inner)]);

        let packages = enumerate_packages(&outer).unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "FAC_010");

        let pdfs = load_package_pdfs(&outer, &packages[0].source).unwrap();
        assert_eq!(pdfs.len(), 1);
        assert_eq!(pdfs[0].name, "factura.pdf");
        assert_eq!(pdfs[0].bytes, b"%PDF-inner");
    }

    #[test]
    fn test_wrapper_root_of_nested_zips_is_unwrapped() {
        let inner = build_zip(&[("f.pdf", b"%PDF")]);
        let bytes = build_zip(&[("lote/FAC_1.zip", &inner), ("lote/FAC_2.zip", &inner)]);

        let packages = enumerate_packages(&bytes).unwrap();
        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["FAC_1", "FAC_2"]);

        let pdfs = load_package_pdfs(&bytes, &packages[1].source).unwrap();
        assert_eq!(pdfs.len(), 1);
    }

    #[test]
    fn test_single_folder_with_subfolders_is_one_package() {
        let bytes = build_zip(&[
            ("FAC_1/factura/f.pdf", b"%PDF-f"),
            ("FAC_1/soportes/h.PDF", b"%PDF-h"),
        ]);

        let packages = enumerate_packages(&bytes).unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "FAC_1");
        assert_eq!(packages[0].source, PackageSource::Folder("FAC_1/".into()));

        let pdfs = load_package_pdfs(&bytes, &packages[0].source).unwrap();
        let names: Vec<&str> = pdfs.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["f.pdf", "h.PDF"]);
    }

    #[test]
    fn test_folder_pdfs_skip_other_files() {
        let bytes = build_zip(&[
            ("FAC_1/a.pdf", b"%PDF-a"),
            ("FAC_1/foto.png", b"png"),
            ("FAC_10/b.pdf", b"%PDF-b"),
        ]);

        let pdfs = load_package_pdfs(&bytes, &PackageSource::Folder("FAC_1/".into())).unwrap();
        let names: Vec<&str> = pdfs.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf"]);
    }
}
