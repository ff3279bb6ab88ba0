//! Agent 记忆：思维链、当前计划、步骤指针、执行上下文与计划校验
//!
//! 每个 Agent 会话独占一个实例；所有操作同步执行，不需要加锁。
//! 步骤指针只由 move_to_next_step 推进，完成某一步不会自动前进。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::plan::{PlanStatus, PlanValidation, TaskPlan, TaskStep};

/// 上下文摘要中保留的最近思维链条数
const RECENT_CHAINS: usize = 2;

/// 一次工具调用的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub observation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub need_replan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replan_reason: Option<String>,
}

impl ActionResult {
    pub fn success(output: Value, observation: impl Into<String>) -> Self {
        Self {
            success: true,
            output,
            error: None,
            observation: observation.into(),
            duration_ms: None,
            need_replan: false,
            replan_reason: None,
        }
    }

    /// 失败结果：observation 即错误文本
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: Value::Null,
            observation: error.clone(),
            error: Some(error),
            duration_ms: None,
            need_replan: false,
            replan_reason: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// 思维链中的行动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    pub result: ActionResult,
}

/// 思维链条目：创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtChain {
    pub id: String,
    pub timestamp: String,
    pub thought: String,
    pub action: Action,
    pub observation: String,
}

/// Agent 记忆
#[derive(Debug, Default)]
pub struct AgentMemory {
    chains: Vec<ThoughtChain>,
    plan: Option<TaskPlan>,
    current_iteration: usize,
    current_step_index: usize,
    validation: Option<PlanValidation>,
    context: HashMap<String, Value>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条思维链；不改变计划状态
    pub fn record_chain(
        &mut self,
        thought: impl Into<String>,
        action: Action,
        observation: impl Into<String>,
    ) -> &ThoughtChain {
        let chain = ThoughtChain {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            thought: thought.into(),
            action,
            observation: observation.into(),
        };
        self.chains.push(chain);
        &self.chains[self.chains.len() - 1]
    }

    /// 安装新计划：步骤指针归零，清除校验结果
    pub fn set_plan(&mut self, plan: TaskPlan) {
        tracing::debug!(plan = %plan.id, steps = plan.steps.len(), "plan installed");
        self.plan = Some(plan);
        self.current_step_index = 0;
        self.validation = None;
    }

    /// 写入步骤结果并重新推导计划状态；无计划或 id 未知时不做任何事并返回 false
    pub fn update_task_status(&mut self, result: &ActionResult, step_id: &str) -> bool {
        let Some(plan) = self.plan.as_mut() else {
            tracing::warn!(step_id, "no active plan, step update ignored");
            return false;
        };
        let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) else {
            tracing::warn!(step_id, "unknown step id, update ignored");
            return false;
        };
        step.completed = result.success;
        step.attempted = true;
        step.result = Some(result.output.clone());
        plan.status = plan.derive_status();
        tracing::debug!(step_id, success = result.success, status = %plan.status, "step updated");
        true
    }

    /// 前进一步；已在最后一步（或无计划）时返回 false 且不改变状态
    pub fn move_to_next_step(&mut self) -> bool {
        match &self.plan {
            Some(plan) if self.current_step_index + 1 < plan.steps.len() => {
                self.current_step_index += 1;
                true
            }
            _ => false,
        }
    }

    pub fn set_plan_validation(&mut self, validation: PlanValidation) {
        self.validation = Some(validation);
    }

    pub fn plan_validation(&self) -> Option<&PlanValidation> {
        self.validation.as_ref()
    }

    pub fn current_step(&self) -> Option<&TaskStep> {
        self.plan
            .as_ref()
            .and_then(|p| p.steps.get(self.current_step_index))
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    pub fn is_plan_completed(&self) -> bool {
        self.plan
            .as_ref()
            .is_some_and(|p| p.status == PlanStatus::Completed)
    }

    /// 暂停 / 取消：计划置为 blocked
    pub fn block_plan(&mut self) {
        if let Some(plan) = self.plan.as_mut() {
            plan.status = PlanStatus::Blocked;
        }
    }

    pub fn set_execution_context(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    pub fn execution_context(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn thought_chains(&self) -> &[ThoughtChain] {
        &self.chains
    }

    pub fn current_plan(&self) -> Option<&TaskPlan> {
        self.plan.as_ref()
    }

    pub fn current_iteration(&self) -> usize {
        self.current_iteration
    }

    pub fn increment_iteration(&mut self) {
        self.current_iteration += 1;
    }

    /// 会话边界：清空全部状态
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 生成给下一次模型调用的上下文摘要：计划概览、校验结果、最近两条思维链
    pub fn generate_context_info(&self) -> String {
        let mut sections = Vec::new();

        if let Some(plan) = &self.plan {
            let mut s = format!(
                "## Plan\n- Description: {}\n- Status: {}\n- Current step: {}/{}\n\n## Steps",
                plan.description,
                plan.status,
                self.current_step_index + 1,
                plan.steps.len()
            );
            for (idx, step) in plan.steps.iter().enumerate() {
                let marker = if step.completed {
                    "✓ done"
                } else if idx == self.current_step_index {
                    "⚡ executing"
                } else {
                    "⚪ pending"
                };
                s.push_str(&format!("\n{}. {} - {}", idx + 1, marker, step.description));
            }
            sections.push(s);
        }

        if let Some(v) = &self.validation {
            let mut s = String::from("## Plan Validation\n");
            s.push_str(if v.is_valid { "✓ passed" } else { "⚠ issues found" });
            if !v.issues.is_empty() {
                s.push_str("\nIssues:");
                for issue in &v.issues {
                    s.push_str(&format!("\n- {}", issue));
                }
            }
            if !v.suggestions.is_empty() {
                s.push_str("\nSuggestions:");
                for suggestion in &v.suggestions {
                    s.push_str(&format!("\n- {}", suggestion));
                }
            }
            sections.push(s);
        }

        let recent = &self.chains[self.chains.len().saturating_sub(RECENT_CHAINS)..];
        if !recent.is_empty() {
            let entries: Vec<String> = recent
                .iter()
                .map(|c| {
                    let action = serde_json::json!({ "tool": c.action.tool, "args": c.action.args });
                    format!(
                        "Time: {}\nThought: {}\nAction: {}\nResult: {}\nObservation: {}",
                        c.timestamp,
                        c.thought,
                        pretty(&action),
                        pretty(&c.action.result.output),
                        c.observation
                    )
                })
                .collect();
            sections.push(format!("## Recent Actions\n{}", entries.join("\n\n")));
        }

        sections.join("\n\n")
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_step_plan() -> TaskPlan {
        TaskPlan::new(
            "demo",
            vec![TaskStep::new("a", "first"), TaskStep::new("b", "second")],
        )
    }

    fn action(tool: &str) -> Action {
        Action {
            tool: tool.into(),
            args: json!({}),
            result: ActionResult::success(json!(null), "ok"),
        }
    }

    #[test]
    fn test_status_transitions() {
        let mut mem = AgentMemory::new();
        mem.set_plan(two_step_plan());

        assert!(mem.update_task_status(&ActionResult::success(json!("x"), "ok"), "a"));
        assert_eq!(mem.current_plan().unwrap().status, PlanStatus::InProgress);

        assert!(mem.update_task_status(&ActionResult::success(json!("y"), "ok"), "b"));
        assert_eq!(mem.current_plan().unwrap().status, PlanStatus::Completed);
        assert!(mem.is_plan_completed());
        assert_eq!(mem.current_plan().unwrap().steps[1].result, Some(json!("y")));
    }

    #[test]
    fn test_failed_step_fails_plan() {
        let mut mem = AgentMemory::new();
        mem.set_plan(two_step_plan());
        mem.update_task_status(&ActionResult::failure("boom"), "a");
        assert_eq!(mem.current_plan().unwrap().status, PlanStatus::Failed);
    }

    #[test]
    fn test_update_is_noop_without_plan_or_unknown_id() {
        let mut mem = AgentMemory::new();
        assert!(!mem.update_task_status(&ActionResult::failure("x"), "a"));

        mem.set_plan(two_step_plan());
        assert!(!mem.update_task_status(&ActionResult::failure("x"), "zzz"));
        assert_eq!(mem.current_plan().unwrap().status, PlanStatus::NotStarted);
    }

    #[test]
    fn test_move_to_next_step() {
        let mut mem = AgentMemory::new();
        assert!(!mem.move_to_next_step());

        mem.set_plan(TaskPlan::new("one", vec![TaskStep::new("a", "only")]));
        assert!(!mem.move_to_next_step());
        assert_eq!(mem.current_step_index(), 0);

        mem.set_plan(two_step_plan());
        assert!(mem.move_to_next_step());
        assert_eq!(mem.current_step().unwrap().id, "b");
        assert!(!mem.move_to_next_step());
        assert_eq!(mem.current_step_index(), 1);
    }

    #[test]
    fn test_set_plan_resets_pointer_and_validation() {
        let mut mem = AgentMemory::new();
        mem.set_plan(two_step_plan());
        mem.move_to_next_step();
        mem.set_plan_validation(PlanValidation {
            is_valid: true,
            ..Default::default()
        });
        mem.set_plan(two_step_plan());
        assert_eq!(mem.current_step_index(), 0);
        assert!(mem.plan_validation().is_none());
    }

    #[test]
    fn test_current_step_none_without_steps() {
        let mut mem = AgentMemory::new();
        assert!(mem.current_step().is_none());
        mem.set_plan(TaskPlan::new("empty", vec![]));
        assert!(mem.current_step().is_none());
    }

    #[test]
    fn test_context_info_keeps_last_two_chains() {
        let mut mem = AgentMemory::new();
        for i in 0..5 {
            mem.record_chain(format!("thought {}", i), action("t"), format!("obs {}", i));
        }
        let info = mem.generate_context_info();
        assert!(!info.contains("thought 2"));
        let p3 = info.find("thought 3").unwrap();
        let p4 = info.find("thought 4").unwrap();
        assert!(p3 < p4);
        assert!(info.contains("Observation: obs 4"));
    }

    #[test]
    fn test_context_info_plan_and_validation() {
        let mut mem = AgentMemory::new();
        mem.set_plan(two_step_plan());
        mem.set_plan_validation(PlanValidation {
            is_valid: false,
            issues: vec!["too vague".into()],
            suggestions: vec![],
        });
        mem.update_task_status(&ActionResult::success(json!(1), "ok"), "a");
        mem.move_to_next_step();

        let info = mem.generate_context_info();
        assert!(info.contains("- Status: in_progress"));
        assert!(info.contains("- Current step: 2/2"));
        assert!(info.contains("1. ✓ done - first"));
        assert!(info.contains("2. ⚡ executing - second"));
        assert!(info.contains("⚠ issues found\nIssues:\n- too vague"));
        assert!(!info.contains("Suggestions:"));
        assert_eq!(info, mem.generate_context_info());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut mem = AgentMemory::new();
        mem.set_plan(two_step_plan());
        mem.record_chain("t", action("x"), "o");
        mem.set_execution_context("k", json!(1));
        mem.increment_iteration();
        mem.move_to_next_step();

        mem.reset();
        assert!(mem.current_plan().is_none());
        assert!(mem.thought_chains().is_empty());
        assert!(mem.execution_context("k").is_none());
        assert_eq!(mem.current_iteration(), 0);
        assert_eq!(mem.current_step_index(), 0);
        assert_eq!(mem.generate_context_info(), "");
    }

    #[test]
    fn test_block_plan() {
        let mut mem = AgentMemory::new();
        mem.set_plan(two_step_plan());
        mem.block_plan();
        assert_eq!(mem.current_plan().unwrap().status, PlanStatus::Blocked);
    }
}
