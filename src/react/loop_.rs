//! Agent 主循环
//!
//! 取消检查 -> 拼 prompt（目标 + 记忆摘要 + 工具表）-> 模型 -> 解析 -> 执行工具 -> 写回记忆 -> 推进步骤。
//! 工具失败不会中断循环：错误文本成为失败的 ActionResult，交给下一轮模型处理。

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::plugins::PluginRegistry;
use crate::react::{
    parse_model_output, tool_call_schema_json, Action, ActionResult, AgentMemory, ModelTurn,
    PlanStatus,
};

/// 默认最大迭代次数
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

const SYSTEM_PROMPT: &str = "You are an agent that completes the user's goal by calling plugin tools. \
Reply with exactly one JSON object matching the schema below. Use `action` to call a tool, \
or `final_answer` once the goal is reached.";

/// 循环结束原因
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// 模型给出最终回答
    FinalAnswer,
    /// 计划进入 completed / failed
    PlanFinished(PlanStatus),
    /// 收到取消信号，计划置为 blocked
    Cancelled,
    MaxIterations,
}

/// 循环执行结果
#[derive(Debug, Clone)]
pub struct ReactResult {
    pub response: Option<String>,
    pub iterations: usize,
    pub stop_reason: StopReason,
}

/// Agent 会话配置
pub struct ReactSession {
    pub llm: Arc<dyn LlmClient>,
    pub registry: Arc<PluginRegistry>,
    pub cancel_token: CancellationToken,
    pub max_iterations: usize,
}

impl ReactSession {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<PluginRegistry>) -> Self {
        Self {
            llm,
            registry,
            cancel_token: CancellationToken::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// 设置取消令牌
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 设置最大迭代次数
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// 执行一轮模型输出中的工具调用并写回记忆；没有 action 时返回 None。
/// 只更新步骤状态，不推进步骤指针。
pub async fn run_cycle(
    memory: &mut AgentMemory,
    registry: &PluginRegistry,
    turn: &ModelTurn,
) -> Option<ActionResult> {
    let call = turn.action.as_ref()?;

    let started = Instant::now();
    let outcome = registry.execute_tool(&call.tool, call.args.clone()).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(output) => {
            let observation = serde_json::to_string(&output).unwrap_or_default();
            ActionResult::success(output, observation)
        }
        Err(e) => {
            tracing::warn!(tool = %call.tool, error = %e, "tool call failed");
            ActionResult::failure(e.to_string())
        }
    }
    .with_duration(duration_ms);

    memory.record_chain(
        turn.thought.clone(),
        Action {
            tool: call.tool.clone(),
            args: call.args.clone(),
            result: result.clone(),
        },
        result.observation.clone(),
    );

    let step_id = turn
        .step_id
        .clone()
        .or_else(|| memory.current_step().map(|s| s.id.clone()));
    if let Some(step_id) = step_id {
        memory.update_task_status(&result, &step_id);
    }

    Some(result)
}

fn build_prompt(goal: &str, memory: &AgentMemory, tools: &str) -> String {
    let mut prompt = format!("## Goal\n{}", goal);
    let context = memory.generate_context_info();
    if !context.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&context);
    }
    prompt.push_str("\n\n## Available Tools\n");
    prompt.push_str(tools);
    prompt
}

/// 执行 Agent 循环，直到最终回答、计划结束、取消或达到最大迭代次数
pub async fn react_loop(
    session: &ReactSession,
    memory: &mut AgentMemory,
    goal: &str,
) -> Result<ReactResult, AgentError> {
    let system = format!(
        "{}\n\n## Reply Format\n{}",
        SYSTEM_PROMPT,
        tool_call_schema_json()
    );
    let tools = session.registry.tool_schemas_json().await?;

    loop {
        let iterations = memory.current_iteration();

        if session.cancel_token.is_cancelled() {
            tracing::info!(iterations, "agent loop cancelled");
            memory.block_plan();
            return Ok(ReactResult {
                response: None,
                iterations,
                stop_reason: StopReason::Cancelled,
            });
        }

        if iterations >= session.max_iterations {
            tracing::warn!(max = session.max_iterations, "agent loop hit max iterations");
            return Ok(ReactResult {
                response: None,
                iterations,
                stop_reason: StopReason::MaxIterations,
            });
        }

        let messages = vec![
            Message::system(system.clone()),
            Message::user(build_prompt(goal, memory, &tools)),
        ];
        let output = session
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::LlmError)?;
        let turn = parse_model_output(&output)?;
        tracing::debug!(iteration = iterations, thought = %turn.thought, "model turn parsed");

        let current_id = memory.current_step().map(|s| s.id.clone());
        if let Some(result) = run_cycle(memory, &session.registry, &turn).await {
            let acted_on_current = match (&turn.step_id, &current_id) {
                (Some(named), Some(current)) => named == current,
                (None, Some(_)) => true,
                _ => false,
            };
            if result.success && acted_on_current {
                memory.move_to_next_step();
            }
        }
        memory.increment_iteration();

        if turn.action.is_none() && turn.final_answer.is_some() {
            return Ok(ReactResult {
                response: turn.final_answer,
                iterations: memory.current_iteration(),
                stop_reason: StopReason::FinalAnswer,
            });
        }

        if let Some(status) = memory.current_plan().map(|p| p.status) {
            if matches!(status, PlanStatus::Completed | PlanStatus::Failed) {
                return Ok(ReactResult {
                    response: turn.final_answer,
                    iterations: memory.current_iteration(),
                    stop_reason: StopReason::PlanFinished(status),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MemoryImageStore, MemoryTableStore};
    use crate::llm::MockLlmClient;
    use crate::plugins::{MemoryPluginStore, MockSandbox, PluginDraft};
    use crate::react::{TaskPlan, TaskStep, ToolCall};
    use serde_json::json;

    const SOURCE: &str = "/**\n * @name demo\n */\n// Echo back\nexport function echo(text: string) { return text; }\n";

    async fn registry(sandbox: MockSandbox) -> Arc<PluginRegistry> {
        let registry = PluginRegistry::new(
            Arc::new(MemoryPluginStore::default()),
            Arc::new(MemoryTableStore::default()),
            Arc::new(MemoryImageStore::default()),
            Arc::new(sandbox),
        );
        let handle = registry.create(PluginDraft::default()).await.unwrap();
        registry.update_content(&handle, SOURCE).await.unwrap();
        Arc::new(registry)
    }

    fn echo_turn() -> ModelTurn {
        ModelTurn {
            thought: "say hi".into(),
            action: Some(ToolCall {
                tool: "echo".into(),
                args: json!({"text": "hi"}),
            }),
            ..Default::default()
        }
    }

    fn two_step_plan() -> TaskPlan {
        TaskPlan::new(
            "greet",
            vec![TaskStep::new("s1", "say hi"), TaskStep::new("s2", "say bye")],
        )
    }

    #[tokio::test]
    async fn test_run_cycle_records_and_updates_current_step() {
        let registry = registry(MockSandbox::returning(json!("hi"))).await;
        let mut memory = AgentMemory::new();
        memory.set_plan(two_step_plan());

        let result = run_cycle(&mut memory, &registry, &echo_turn()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.observation, "\"hi\"");
        assert_eq!(memory.thought_chains().len(), 1);
        assert!(memory.current_plan().unwrap().steps[0].completed);
        assert_eq!(memory.current_step_index(), 0);
    }

    #[tokio::test]
    async fn test_run_cycle_unknown_tool_is_failed_result() {
        let registry = registry(MockSandbox::returning(json!(null))).await;
        let mut memory = AgentMemory::new();
        memory.set_plan(two_step_plan());
        let mut turn = echo_turn();
        turn.action = Some(ToolCall {
            tool: "nope".into(),
            args: json!({}),
        });

        let result = run_cycle(&mut memory, &registry, &turn).await.unwrap();
        assert!(!result.success);
        assert!(result.observation.contains("nope"));
        assert_eq!(memory.current_plan().unwrap().status, PlanStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_cycle_without_action() {
        let registry = registry(MockSandbox::returning(json!(null))).await;
        let mut memory = AgentMemory::new();
        let turn = ModelTurn {
            final_answer: Some("done".into()),
            ..Default::default()
        };
        assert!(run_cycle(&mut memory, &registry, &turn).await.is_none());
        assert!(memory.thought_chains().is_empty());
    }

    #[tokio::test]
    async fn test_loop_completes_plan() {
        let registry = registry(MockSandbox::returning(json!("ok"))).await;
        let call = r#"{"thought": "go", "action": {"tool": "echo", "args": {"text": "x"}}}"#;
        let llm = Arc::new(MockLlmClient::new([call, call]));
        let session = ReactSession::new(llm.clone(), registry);
        let mut memory = AgentMemory::new();
        memory.set_plan(two_step_plan());

        let result = react_loop(&session, &mut memory, "greet twice").await.unwrap();
        assert_eq!(result.stop_reason, StopReason::PlanFinished(PlanStatus::Completed));
        assert_eq!(result.iterations, 2);
        assert_eq!(memory.current_step_index(), 1);

        let second_prompt = &llm.requests()[1][1].content;
        assert!(second_prompt.contains("## Goal\ngreet twice"));
        assert!(second_prompt.contains("1. ✓ done - say hi"));
        assert!(second_prompt.contains("\"echo\""));
    }

    #[tokio::test]
    async fn test_loop_stops_on_final_answer() {
        let registry = registry(MockSandbox::returning(json!(null))).await;
        let llm = Arc::new(MockLlmClient::new(["Nothing to do."]));
        let session = ReactSession::new(llm, registry);
        let mut memory = AgentMemory::new();

        let result = react_loop(&session, &mut memory, "idle").await.unwrap();
        assert_eq!(result.stop_reason, StopReason::FinalAnswer);
        assert_eq!(result.response.as_deref(), Some("Nothing to do."));
    }

    #[tokio::test]
    async fn test_loop_cancelled_blocks_plan() {
        let registry = registry(MockSandbox::returning(json!(null))).await;
        let token = CancellationToken::new();
        token.cancel();
        let session = ReactSession::new(Arc::new(MockLlmClient::default()), registry)
            .with_cancel_token(token);
        let mut memory = AgentMemory::new();
        memory.set_plan(two_step_plan());

        let result = react_loop(&session, &mut memory, "x").await.unwrap();
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(memory.current_plan().unwrap().status, PlanStatus::Blocked);
    }

    #[tokio::test]
    async fn test_loop_max_iterations() {
        let registry = registry(MockSandbox::returning(json!(null))).await;
        let call = r#"{"thought": "again", "tool": "echo", "args": {"text": "x"}}"#;
        let llm = Arc::new(MockLlmClient::new([call, call, call]));
        let session = ReactSession::new(llm, registry).with_max_iterations(2);
        let mut memory = AgentMemory::new();

        let result = react_loop(&session, &mut memory, "loop").await.unwrap();
        assert_eq!(result.stop_reason, StopReason::MaxIterations);
        assert_eq!(memory.thought_chains().len(), 2);
    }

    #[tokio::test]
    async fn test_loop_llm_error_propagates() {
        let registry = registry(MockSandbox::returning(json!(null))).await;
        let session = ReactSession::new(Arc::new(MockLlmClient::default()), registry);
        let mut memory = AgentMemory::new();
        let err = react_loop(&session, &mut memory, "x").await.unwrap_err();
        assert!(matches!(err, AgentError::LlmError(_)));
    }
}
