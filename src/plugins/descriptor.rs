//! 插件描述与工具参数 schema
//!
//! PluginDescriptor 由 PluginRegistry 独占；tools 完全由当前源码推导，序列化后即为给模型看的 JSON-schema 形状。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 插件默认版本号（源码未声明 @version 时）
pub const DEFAULT_VERSION: &str = "0.0.1";

/// 插件描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// 插件唯一标识（创建时分配，之后不可变）
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            description: String::new(),
            version: DEFAULT_VERSION.to_string(),
            author: None,
            tools: Vec::new(),
        }
    }

    /// 用解析结果整体覆盖 name / description / version / author / tools（不做部分合并）
    pub fn apply(&mut self, parsed: ParsedPlugin) {
        self.name = parsed.name;
        self.description = parsed.description;
        self.version = parsed.version;
        self.author = parsed.author;
        self.tools = parsed.tools;
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// 描述解析器输出的片段（不含 id）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedPlugin {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: Option<String>,
    pub tools: Vec<ToolDescriptor>,
}

/// 工具描述：一个导出函数对应一个工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ParameterSchema>,
}

/// JSON-schema 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
}

/// 递归参数 schema：object 带 properties / required，array 带 items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub kind: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, ParameterSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
}

impl ParameterSchema {
    pub fn of(kind: SchemaType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn object(properties: BTreeMap<String, ParameterSchema>, required: Vec<String>) -> Self {
        Self {
            kind: SchemaType::Object,
            properties: Some(properties),
            required,
            ..Self::default()
        }
    }

    pub fn array(items: Option<ParameterSchema>) -> Self {
        Self {
            kind: SchemaType::Array,
            items: items.map(Box::new),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 嵌套深度：标量为 1，object / array 为子节点最大深度 + 1
    pub fn depth(&self) -> usize {
        let props = self
            .properties
            .as_ref()
            .map(|p| p.values().map(|s| s.depth()).max().unwrap_or(0))
            .unwrap_or(0);
        let items = self.items.as_ref().map(|s| s.depth()).unwrap_or(0);
        1 + props.max(items)
    }
}
