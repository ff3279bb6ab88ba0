//! LLM 客户端抽象
//!
//! Agent 循环只需要非流式完成：传入消息列表，返回模型回复文本。

use async_trait::async_trait;

use super::Message;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；错误以文本返回，由调用方包装为 AgentError::LlmError
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
