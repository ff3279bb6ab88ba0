//! 插件运行时
//!
//! 用户编写的带注解 TypeScript 插件：
//! - **parser**: 从源码提取插件元数据与工具表（参数 JSON-schema）
//! - **macros**: 执行前替换 `__DB__` / `__IMAGE__` 宏
//! - **transpiler**: 去掉类型与模块语法，生成沙箱可执行的脚本
//! - **sandbox**: 外部沙箱执行器边界（Deno 子进程 / 审计包装 / 测试用 Mock）
//! - **store**: 描述与源码持久化
//! - **registry**: 插件 CRUD 与执行管线

pub mod descriptor;
pub mod lexer;
pub mod macros;
pub mod parser;
pub mod registry;
pub mod sandbox;
pub mod store;
pub mod transpiler;
pub mod types;

pub use descriptor::{ParameterSchema, ParsedPlugin, PluginDescriptor, SchemaType, ToolDescriptor};
pub use macros::MacroResolver;
pub use parser::parse_plugin;
pub use registry::{PluginDraft, PluginHandle, PluginRegistry, PLACEHOLDER_SOURCE};
pub use sandbox::{AuditedSandbox, DenoSandbox, MockSandbox, SandboxExecutor};
pub use store::{FsPluginStore, MemoryPluginStore, PluginStore};
pub use transpiler::transpile;
