//! 插件注册表
//!
//! 每个插件 id 对应一份描述 + 一份源码；注册表是唯一调用
//! 宏替换 → 解析 → 转译 → 沙箱 这条管线的组件。
//! 保存时只解析不做宏替换，执行时每次重新读取源码、替换宏、转译，不缓存转译结果。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::descriptor::{PluginDescriptor, ToolDescriptor};
use super::macros::MacroResolver;
use super::parser::{parse_plugin, DEFAULT_PLUGIN_NAME};
use super::sandbox::SandboxExecutor;
use super::store::PluginStore;
use super::transpiler::transpile;
use crate::core::RuntimeError;
use crate::data::{ImageStore, TableStore};

/// 新建插件时写入的占位源码
pub const PLACEHOLDER_SOURCE: &str = "/**\n * @name write the plugin name here\n * @description write the plugin description here\n */\n";

/// 创建插件时的部分描述；id 缺省时自动分配
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

/// 绑定到某个插件 id 的句柄，携带取得时的描述快照
#[derive(Debug, Clone, PartialEq)]
pub struct PluginHandle {
    descriptor: PluginDescriptor,
}

impl PluginHandle {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }
}

/// 模型提示中列出的工具条目
#[derive(Debug, Clone, Serialize)]
struct ToolSchemaEntry<'a> {
    plugin: &'a str,
    name: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a super::descriptor::ParameterSchema>,
}

/// 插件注册表：可在多个会话间通过 Arc 共享
pub struct PluginRegistry {
    store: Arc<dyn PluginStore>,
    resolver: MacroResolver,
    sandbox: Arc<dyn SandboxExecutor>,
    selected: RwLock<Option<String>>,
}

impl PluginRegistry {
    pub fn new(
        store: Arc<dyn PluginStore>,
        tables: Arc<dyn TableStore>,
        images: Arc<dyn ImageStore>,
        sandbox: Arc<dyn SandboxExecutor>,
    ) -> Self {
        Self {
            store,
            resolver: MacroResolver::new(tables, images, sandbox.clone()),
            sandbox,
            selected: RwLock::new(None),
        }
    }

    /// 创建插件：分配 id（缺省时），已有源码则保留并解析，否则写入占位源码。
    /// id 已存在描述时不覆盖，直接返回已存储的插件（草稿中的其余字段被忽略）。
    pub async fn create(&self, draft: PluginDraft) -> Result<PluginHandle, RuntimeError> {
        let id = draft
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Some(descriptor) = self.store.load_descriptor(&id).await? {
            tracing::info!(plugin = %id, "plugin already exists, keeping stored descriptor");
            return Ok(PluginHandle { descriptor });
        }

        let mut descriptor = PluginDescriptor::new(&id);
        descriptor.name = draft.name.unwrap_or_else(|| DEFAULT_PLUGIN_NAME.to_string());
        descriptor.description = draft.description.unwrap_or_default();
        if let Some(version) = draft.version {
            descriptor.version = version;
        }
        descriptor.author = draft.author;

        match self.store.load_source(&id).await? {
            Some(existing) => match parse_plugin(&existing) {
                Ok(parsed) => descriptor.apply(parsed),
                Err(e) => tracing::warn!(plugin = %id, error = %e, "existing source does not parse"),
            },
            None => self.store.save_source(&id, PLACEHOLDER_SOURCE).await?,
        }

        self.store.save_descriptor(&descriptor).await?;
        tracing::info!(plugin = %id, name = %descriptor.name, "plugin created");
        Ok(PluginHandle { descriptor })
    }

    pub async fn get(&self, id: &str) -> Result<PluginHandle, RuntimeError> {
        self.store
            .load_descriptor(id)
            .await?
            .map(|descriptor| PluginHandle { descriptor })
            .ok_or_else(|| RuntimeError::NotFound(format!("plugin {}", id)))
    }

    /// 原样保存新源码，再解析并整体覆盖描述；解析失败时源码仍已保存，描述保持不变
    pub async fn update_content(
        &self,
        handle: &PluginHandle,
        source: &str,
    ) -> Result<PluginHandle, RuntimeError> {
        let mut descriptor = self.get(handle.id()).await?.descriptor;
        self.store.save_source(&descriptor.id, source).await?;

        let parsed = match parse_plugin(source) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(plugin = %descriptor.id, error = %e, "plugin source saved but not parsed");
                return Err(e.into());
            }
        };
        descriptor.apply(parsed);
        self.store.save_descriptor(&descriptor).await?;
        tracing::info!(
            plugin = %descriptor.id,
            name = %descriptor.name,
            tools = descriptor.tools.len(),
            "plugin content updated"
        );
        Ok(PluginHandle { descriptor })
    }

    /// 源码 → 宏替换 → 转译 → 沙箱
    pub async fn execute(
        &self,
        handle: &PluginHandle,
        tool: &str,
        args: Value,
    ) -> Result<Value, RuntimeError> {
        let id = handle.id();
        let descriptor = self.get(id).await?.descriptor;
        if descriptor.tool(tool).is_none() {
            return Err(RuntimeError::NotFound(format!("tool {} in plugin {}", tool, id)));
        }
        let source = self
            .store
            .load_source(id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("source of plugin {}", id)))?;

        let resolved = self.resolver.resolve(&source).await?;
        tracing::debug!(plugin = %id, "macros resolved");
        let script = transpile(&resolved)?;
        tracing::debug!(plugin = %id, bytes = script.len(), "plugin transpiled");
        Ok(self.sandbox.execute(&script, tool, args).await?)
    }

    /// 删除描述与源码；若为当前选中插件则清除选中
    pub async fn delete(&self, id: &str) -> Result<(), RuntimeError> {
        self.get(id).await?;
        self.store.delete_descriptor(id).await?;
        self.store.delete_source(id).await?;

        let mut selected = self.selected.write().await;
        if selected.as_deref() == Some(id) {
            *selected = None;
        }
        tracing::info!(plugin = %id, "plugin deleted");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<PluginDescriptor>, RuntimeError> {
        Ok(self.store.list_descriptors().await?)
    }

    /// 按工具名查找 (插件 id, 工具描述)；重名时取插件列表中的第一个
    pub async fn resolve_tool(&self, name: &str) -> Result<(String, ToolDescriptor), RuntimeError> {
        self.list()
            .await?
            .into_iter()
            .find_map(|p| p.tool(name).cloned().map(|t| (p.id.clone(), t)))
            .ok_or_else(|| RuntimeError::NotFound(format!("tool {}", name)))
    }

    /// 按工具名执行（Agent 循环入口）
    pub async fn execute_tool(&self, name: &str, args: Value) -> Result<Value, RuntimeError> {
        let (plugin_id, _) = self.resolve_tool(name).await?;
        let handle = self.get(&plugin_id).await?;
        self.execute(&handle, name, args).await
    }

    /// 全部工具的 JSON 描述，用于模型提示
    pub async fn tool_schemas_json(&self) -> Result<String, RuntimeError> {
        let plugins = self.list().await?;
        let entries: Vec<ToolSchemaEntry<'_>> = plugins
            .iter()
            .flat_map(|p| {
                p.tools.iter().map(move |t| ToolSchemaEntry {
                    plugin: &p.name,
                    name: &t.name,
                    description: &t.description,
                    parameters: t.parameters.as_ref(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&entries)
            .map_err(|e| RuntimeError::Store(e.into()))
    }

    pub async fn select(&self, id: &str) -> Result<(), RuntimeError> {
        self.get(id).await?;
        *self.selected.write().await = Some(id.to_string());
        Ok(())
    }

    pub async fn selected(&self) -> Option<String> {
        self.selected.read().await.clone()
    }
}
