//! Ghostie - 插件运行时与 Agent 记忆核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **data**: 表格 / 图片数据协作者（宏替换的数据来源）
//! - **llm**: 消息结构、LLM 客户端抽象与 Mock
//! - **observability**: tracing 初始化
//! - **plugins**: 插件解析、宏替换、转译、沙箱执行、注册表
//! - **react**: Agent 记忆、计划校验、模型输出解析、Agent 主循环

pub mod config;
pub mod core;
pub mod data;
pub mod llm;
pub mod observability;
pub mod plugins;
pub mod react;
