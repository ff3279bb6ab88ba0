//! 插件持久化协作者
//!
//! 源码按插件 id 存为独立 blob，描述存为按 id 索引的表；两者只经 PluginRegistry 访问。
//! FsPluginStore 布局：`<dir>/<id>.ts` 源码文件 + `<dir>/plugins.json` 描述索引。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::descriptor::PluginDescriptor;
use crate::core::StoreError;

/// 持久化接口：描述 CRUD + 源码 blob
#[async_trait]
pub trait PluginStore: Send + Sync {
    async fn load_descriptor(&self, id: &str) -> Result<Option<PluginDescriptor>, StoreError>;

    async fn save_descriptor(&self, descriptor: &PluginDescriptor) -> Result<(), StoreError>;

    async fn delete_descriptor(&self, id: &str) -> Result<(), StoreError>;

    async fn list_descriptors(&self) -> Result<Vec<PluginDescriptor>, StoreError>;

    async fn load_source(&self, id: &str) -> Result<Option<String>, StoreError>;

    async fn save_source(&self, id: &str, source: &str) -> Result<(), StoreError>;

    async fn delete_source(&self, id: &str) -> Result<(), StoreError>;
}

/// 内存存储
#[derive(Default)]
pub struct MemoryPluginStore {
    descriptors: RwLock<BTreeMap<String, PluginDescriptor>>,
    sources: RwLock<HashMap<String, String>>,
}

impl MemoryPluginStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PluginStore for MemoryPluginStore {
    async fn load_descriptor(&self, id: &str) -> Result<Option<PluginDescriptor>, StoreError> {
        Ok(self.descriptors.read().await.get(id).cloned())
    }

    async fn save_descriptor(&self, descriptor: &PluginDescriptor) -> Result<(), StoreError> {
        self.descriptors
            .write()
            .await
            .insert(descriptor.id.clone(), descriptor.clone());
        Ok(())
    }

    async fn delete_descriptor(&self, id: &str) -> Result<(), StoreError> {
        self.descriptors.write().await.remove(id);
        Ok(())
    }

    async fn list_descriptors(&self) -> Result<Vec<PluginDescriptor>, StoreError> {
        Ok(self.descriptors.read().await.values().cloned().collect())
    }

    async fn load_source(&self, id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.sources.read().await.get(id).cloned())
    }

    async fn save_source(&self, id: &str, source: &str) -> Result<(), StoreError> {
        self.sources
            .write()
            .await
            .insert(id.to_string(), source.to_string());
        Ok(())
    }

    async fn delete_source(&self, id: &str) -> Result<(), StoreError> {
        self.sources.write().await.remove(id);
        Ok(())
    }
}

const INDEX_FILE: &str = "plugins.json";

/// 文件系统存储；索引写入由内部锁串行化
pub struct FsPluginStore {
    dir: PathBuf,
    index_lock: RwLock<()>,
}

impl FsPluginStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            index_lock: RwLock::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn source_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::Backend(format!("invalid plugin id: {:?}", id)));
        }
        Ok(self.dir.join(format!("{}.ts", id)))
    }

    async fn read_index(&self) -> Result<BTreeMap<String, PluginDescriptor>, StoreError> {
        match tokio::fs::read_to_string(self.dir.join(INDEX_FILE)).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(&self, index: &BTreeMap<String, PluginDescriptor>) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let text = serde_json::to_string_pretty(index)?;
        tokio::fs::write(self.dir.join(INDEX_FILE), text).await?;
        Ok(())
    }
}

#[async_trait]
impl PluginStore for FsPluginStore {
    async fn load_descriptor(&self, id: &str) -> Result<Option<PluginDescriptor>, StoreError> {
        let _guard = self.index_lock.read().await;
        Ok(self.read_index().await?.remove(id))
    }

    async fn save_descriptor(&self, descriptor: &PluginDescriptor) -> Result<(), StoreError> {
        let _guard = self.index_lock.write().await;
        let mut index = self.read_index().await?;
        index.insert(descriptor.id.clone(), descriptor.clone());
        self.write_index(&index).await
    }

    async fn delete_descriptor(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.index_lock.write().await;
        let mut index = self.read_index().await?;
        if index.remove(id).is_some() {
            self.write_index(&index).await?;
        }
        Ok(())
    }

    async fn list_descriptors(&self) -> Result<Vec<PluginDescriptor>, StoreError> {
        let _guard = self.index_lock.read().await;
        Ok(self.read_index().await?.into_values().collect())
    }

    async fn load_source(&self, id: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.source_path(id)?).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_source(&self, id: &str, source: &str) -> Result<(), StoreError> {
        let path = self.source_path(id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(path, source).await?;
        Ok(())
    }

    async fn delete_source(&self, id: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.source_path(id)?).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn PluginStore) {
        assert!(store.load_descriptor("p1").await.unwrap().is_none());
        assert!(store.load_source("p1").await.unwrap().is_none());

        let mut desc = PluginDescriptor::new("p1");
        desc.name = "Demo".into();
        store.save_descriptor(&desc).await.unwrap();
        store.save_source("p1", "export function f() {}").await.unwrap();

        assert_eq!(store.load_descriptor("p1").await.unwrap(), Some(desc));
        assert_eq!(
            store.load_source("p1").await.unwrap().as_deref(),
            Some("export function f() {}")
        );
        assert_eq!(store.list_descriptors().await.unwrap().len(), 1);

        store.delete_descriptor("p1").await.unwrap();
        store.delete_source("p1").await.unwrap();
        assert!(store.load_descriptor("p1").await.unwrap().is_none());
        assert!(store.load_source("p1").await.unwrap().is_none());
        // 重复删除不报错
        store.delete_source("p1").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryPluginStore::new()).await;
    }

    #[tokio::test]
    async fn test_fs_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPluginStore::new(dir.path().join("plugins"));
        exercise(&store).await;
        assert!(dir.path().join("plugins").join(INDEX_FILE).exists());
    }

    #[tokio::test]
    async fn test_fs_store_rejects_path_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPluginStore::new(dir.path());
        assert!(matches!(
            store.save_source("../escape", "x").await,
            Err(StoreError::Backend(_))
        ));
    }
}
