//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置回复；回复耗尽后返回错误。记录每次调用收到的消息，便于断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LlmClient, Message};

/// Mock 客户端：脚本化回复
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的请求（每次 complete 的消息列表）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        self.responses
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front()
            .ok_or_else(|| "mock llm: no scripted response left".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let llm = MockLlmClient::new(["one", "two"]);
        assert_eq!(llm.complete(&[Message::user("a")]).await.unwrap(), "one");
        assert_eq!(llm.complete(&[Message::user("b")]).await.unwrap(), "two");
        assert!(llm.complete(&[]).await.is_err());
        let requests = llm.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1][0].content, "b");
    }
}
