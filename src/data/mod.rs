//! 数据协作者：数据表与图片
//!
//! 宏替换只读取这两类存储；「不存在」返回 None，只有后端本身出错才返回 Err。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::StoreError;

/// 数据表列定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// 数据表：行为 JSON 对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Value>,
}

impl DataTable {
    pub fn new(id: impl Into<String>, rows: Vec<Value>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            columns: Vec::new(),
            rows,
        }
    }
}

/// 图片：内容类型 + base64 数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub content_type: String,
    pub base64: String,
}

impl Image {
    /// `data:<contentType>;base64,<data>`
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.base64)
    }
}

/// 数据表存储（只读接口）
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn get_table(&self, id: &str) -> Result<Option<DataTable>, StoreError>;
}

/// 图片存储（只读接口）
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn get_image(&self, id: &str) -> Result<Option<Image>, StoreError>;
}

/// 内存数据表存储
#[derive(Default)]
pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, DataTable>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, table: DataTable) {
        self.tables.write().await.insert(table.id.clone(), table);
    }

    pub async fn remove(&self, id: &str) -> Option<DataTable> {
        self.tables.write().await.remove(id)
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn get_table(&self, id: &str) -> Result<Option<DataTable>, StoreError> {
        Ok(self.tables.read().await.get(id).cloned())
    }
}

/// 内存图片存储
#[derive(Default)]
pub struct MemoryImageStore {
    images: RwLock<HashMap<String, Image>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, image: Image) {
        self.images.write().await.insert(image.id.clone(), image);
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn get_image(&self, id: &str) -> Result<Option<Image>, StoreError> {
        Ok(self.images.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_table_store_roundtrip() {
        let store = MemoryTableStore::new();
        assert!(store.get_table("t").await.unwrap().is_none());
        store.insert(DataTable::new("t", vec![json!({"x": 1})])).await;
        let table = store.get_table("t").await.unwrap().unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.name, "t");
    }

    #[tokio::test]
    async fn test_image_data_url() {
        let store = MemoryImageStore::new();
        store
            .insert(Image {
                id: "logo".into(),
                content_type: "image/png".into(),
                base64: "AAAA".into(),
            })
            .await;
        let image = store.get_image("logo").await.unwrap().unwrap();
        assert_eq!(image.data_url(), "data:image/png;base64,AAAA");
    }
}
