//! 运行时错误类型
//!
//! 插件管线每个阶段各有一个错误枚举（解析 / 宏替换 / 转译 / 执行 / 存储），
//! RuntimeError 汇总它们供 PluginRegistry 与 Agent 循环统一传播；Agent 循环把它转成失败的 ActionResult。

use thiserror::Error;

/// 插件描述解析失败：可恢复，Registry 保留上一次成功的描述
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginParseError {
    #[error("Plugin metadata block not found")]
    MissingMetadata,

    #[error("Malformed parameter for tool `{tool}`: {reason}")]
    MalformedParameter { tool: String, reason: String },

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("Unterminated {what} starting at line {line}")]
    Unterminated { what: &'static str, line: usize },
}

/// 宏替换失败：仅当数据/图片协作者本身抛错时产生，「不存在」不算错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacroResolutionError {
    #[error("Failed to read table `{table_id}`: {reason}")]
    Table { table_id: String, reason: String },

    #[error("Failed to read image `{image_id}`: {reason}")]
    Image { image_id: String, reason: String },
}

/// 转译失败：源码中含有目标方言不支持的语法
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Unsupported construct `{construct}` at line {line}")]
    Unsupported { construct: String, line: usize },

    #[error("Syntax error at line {line}: {reason}")]
    Syntax { reason: String, line: usize },
}

/// 沙箱执行失败（脚本抛错、超时、进程无法启动、输出无法解析）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Plugin execution failed: {0}")]
    Failed(String),

    #[error("Plugin execution timed out after {0}s")]
    Timeout(u64),

    #[error("Sandbox spawn failed: {0}")]
    Spawn(String),

    #[error("Invalid sandbox output: {0}")]
    InvalidOutput(String),
}

/// 持久化协作者错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// 插件运行时统一错误
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Parse(#[from] PluginParseError),

    #[error(transparent)]
    Macro(#[from] MacroResolutionError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Agent 循环错误：模型调用或输出解析失败；工具执行失败不在此列（转成失败的 ActionResult）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_is_transparent() {
        let err: RuntimeError = ExecutionError::Timeout(30).into();
        assert_eq!(err.to_string(), "Plugin execution timed out after 30s");

        let err: RuntimeError = PluginParseError::DuplicateTool("search".into()).into();
        assert_eq!(err.to_string(), "Duplicate tool name: search");
    }

    #[test]
    fn test_not_found_message() {
        let err = RuntimeError::NotFound("plugin abc".into());
        assert_eq!(err.to_string(), "Not found: plugin abc");
    }

    #[test]
    fn test_agent_error_wraps_runtime() {
        let err: AgentError = RuntimeError::NotFound("tool x".into()).into();
        assert_eq!(err.to_string(), "Not found: tool x");
    }
}
