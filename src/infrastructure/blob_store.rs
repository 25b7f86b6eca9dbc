//! 产物存储（源文件上传与生成的压缩包）
//!
//! 键按 Job / 批次划分作用域，不同 Job 之间不复用。

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, AppResult, StorageError};

/// Blob 存储抽象
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> AppResult<()>;

    async fn get(&self, key: &str) -> AppResult<Vec<u8>>;

    /// 删除某个前缀下的全部对象，返回删除数量
    async fn delete_prefix(&self, prefix: &str) -> AppResult<usize>;
}

/// 内存存储（测试和单机场景）
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> AppResult<()> {
        validate_key(key)?;
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound { key: key.to_string() }.into())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<usize> {
        let mut objects = self.objects.write().await;
        let before = objects.len();
        objects.retain(|k, _| !k.starts_with(prefix));
        Ok(before - objects.len())
    }
}

/// 本地磁盘存储，键映射为 `root` 下的相对路径
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> AppResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> AppResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::storage_io(key, e))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::storage_io(key, e))?;
        debug!("已写入: {}", path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound { key: key.to_string() }.into())
            }
            Err(e) => Err(AppError::storage_io(key, e)),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<usize> {
        let trimmed = prefix.trim_end_matches('/');
        let path = self.path_for(trimmed)?;
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::storage_io(prefix, e)),
        };

        if metadata.is_dir() {
            let count = count_files(&path).await?;
            fs::remove_dir_all(&path)
                .await
                .map_err(|e| AppError::storage_io(prefix, e))?;
            Ok(count)
        } else {
            fs::remove_file(&path)
                .await
                .map_err(|e| AppError::storage_io(prefix, e))?;
            Ok(1)
        }
    }
}

async fn count_files(dir: &Path) -> AppResult<usize> {
    let mut count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                pending.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}

/// 键只能是不含 `..` 的相对路径
fn validate_key(key: &str) -> AppResult<()> {
    let valid = !key.is_empty()
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey { key: key.to_string() }.into())
    }
}
