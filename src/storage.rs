//! The blob store: a put/open/remove interface keyed by opaque name.
//!
//! This is named as an external collaborator in the system overview --
//! a real deployment could swap in an object store -- but a filesystem
//! and an in-memory implementation are provided so the crate runs
//! standalone. [`FilesystemBlobStore`] shards by the first two hex
//! characters of the blob name, the same layout the teacher's
//! `FilesystemStorage` uses, to keep any one directory from growing
//! without bound.

use crate::content_hash::{ContentHash, ContentHasher};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::RwLock;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `name`, verifying it matches `declared_hash`
    /// (a `sha384:<hex>` or bare-hex primary hash). On mismatch, no blob
    /// is left behind and the call returns `StoreError::BadRequest`; the
    /// ingest pipeline maps this to its own hash-mismatch error.
    async fn store(&self, name: &str, data: Vec<u8>, declared_hash: &str) -> Result<ContentHash>;

    async fn get(&self, name: &str) -> Result<Vec<u8>>;

    async fn get_range(&self, name: &str, start: u64, end_inclusive: u64) -> Result<Vec<u8>>;

    async fn size(&self, name: &str) -> Result<u64>;

    async fn exists(&self, name: &str) -> Result<bool>;

    async fn delete(&self, name: &str) -> Result<()>;
}

pub fn new_blob_name() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn verify_hash(data: &[u8], declared_hash: &str) -> Result<ContentHash> {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    let computed = hasher.finalize();
    if !computed.verify_declared(declared_hash) {
        return Err(StoreError::BadRequest(format!(
            "hash mismatch: declared {declared_hash}, computed {}",
            computed.primary_hex()
        )));
    }
    Ok(computed)
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(&self, name: &str, data: Vec<u8>, declared_hash: &str) -> Result<ContentHash> {
        let hash = verify_hash(&data, declared_hash)?;
        self.blobs.write().await.insert(name.to_string(), data);
        Ok(hash)
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("blob {name} not found")))
    }

    async fn get_range(&self, name: &str, start: u64, end_inclusive: u64) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().await;
        let blob = blobs
            .get(name)
            .ok_or_else(|| StoreError::not_found(format!("blob {name} not found")))?;
        let start = start as usize;
        let end = (end_inclusive as usize + 1).min(blob.len());
        if start >= blob.len() || start > end {
            return Err(StoreError::bad_request("range out of bounds"));
        }
        Ok(blob[start..end].to_vec())
    }

    async fn size(&self, name: &str) -> Result<u64> {
        self.blobs
            .read()
            .await
            .get(name)
            .map(|b| b.len() as u64)
            .ok_or_else(|| StoreError::not_found(format!("blob {name} not found")))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.blobs.write().await.remove(name);
        Ok(())
    }
}

pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let shard = if name.len() >= 2 { &name[..2] } else { "00" };
        self.root.join(shard).join(name)
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn store(&self, name: &str, data: Vec<u8>, declared_hash: &str) -> Result<ContentHash> {
        let hash = verify_hash(&data, declared_hash)?;
        let dest = self.path_for(name);
        Self::ensure_parent(&dest).await?;
        let tmp = dest.with_extension("tmp");
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &dest).await?;
        Ok(hash)
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.path_for(name))
            .await
            .map_err(|_| StoreError::not_found(format!("blob {name} not found")))
    }

    async fn get_range(&self, name: &str, start: u64, end_inclusive: u64) -> Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(self.path_for(name))
            .await
            .map_err(|_| StoreError::not_found(format!("blob {name} not found")))?;
        let len = file.metadata().await?.len();
        if start >= len || start > end_inclusive {
            return Err(StoreError::bad_request("range out of bounds"));
        }
        let end = (end_inclusive + 1).min(len);
        let mut buf = vec![0u8; (end - start) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn size(&self, name: &str) -> Result<u64> {
        let meta = tokio::fs::metadata(self.path_for(name))
            .await
            .map_err(|_| StoreError::not_found(format!("blob {name} not found")))?;
        Ok(meta.len())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(self.path_for(name)).await.is_ok())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let _ = tokio::fs::remove_file(self.path_for(name)).await;
        Ok(())
    }
}

pub type SharedBlobStore = Arc<dyn BlobStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_hash::ContentHash;

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryBlobStore::new();
        let data = b"archive bytes".to_vec();
        let hash = ContentHash::from_bytes(&data);
        let name = new_blob_name();
        let stored = store
            .store(&name, data.clone(), &hash.primary_hex())
            .await
            .unwrap();
        assert_eq!(stored.primary_hex(), hash.primary_hex());
        let fetched = store.get(&name).await.unwrap();
        assert_eq!(fetched, data);
    }

    #[tokio::test]
    async fn in_memory_store_rejects_hash_mismatch_and_leaves_no_blob() {
        let store = InMemoryBlobStore::new();
        let data = b"archive bytes".to_vec();
        let name = new_blob_name();
        let result = store.store(&name, data, "sha384:deadbeef").await;
        assert!(result.is_err());
        assert!(!store.exists(&name).await.unwrap());
    }

    #[tokio::test]
    async fn range_read_returns_inclusive_slice() {
        let store = InMemoryBlobStore::new();
        let data = b"0123456789".to_vec();
        let hash = ContentHash::from_bytes(&data);
        let name = new_blob_name();
        store
            .store(&name, data, &hash.primary_hex())
            .await
            .unwrap();
        let slice = store.get_range(&name, 2, 5).await.unwrap();
        assert_eq!(slice, b"2345");
    }

    #[tokio::test]
    async fn filesystem_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        let data = b"filesystem archive".to_vec();
        let hash = ContentHash::from_bytes(&data);
        let name = new_blob_name();
        store
            .store(&name, data.clone(), &hash.primary_hex())
            .await
            .unwrap();
        assert!(store.exists(&name).await.unwrap());
        let fetched = store.get(&name).await.unwrap();
        assert_eq!(fetched, data);
        store.delete(&name).await.unwrap();
        assert!(!store.exists(&name).await.unwrap());
    }
}
