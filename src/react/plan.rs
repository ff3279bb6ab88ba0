//! 任务计划与计划校验
//!
//! 计划状态完全由步骤推导：全部完成为 completed，有步骤执行过但未成功为 failed，否则 in_progress。
//! 步骤的 attempted 标记区分「尚未执行」与「执行失败」。

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 步骤数超过此值时建议拆分计划
const MAX_RECOMMENDED_STEPS: usize = 10;

/// 计划状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::NotStarted => "not_started",
            PlanStatus::InProgress => "in_progress",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Blocked => "blocked",
        }
    }

    /// completed / failed / blocked 之后 Agent 循环不再继续
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Blocked
        )
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计划步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// 是否已有执行结果写入
    #[serde(default)]
    pub attempted: bool,
}

impl TaskStep {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            completed: false,
            result: None,
            attempted: false,
        }
    }
}

/// 任务计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub id: String,
    pub description: String,
    pub steps: Vec<TaskStep>,
    #[serde(default)]
    pub status: PlanStatus,
}

impl TaskPlan {
    pub fn new(description: impl Into<String>, steps: Vec<TaskStep>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            steps,
            status: PlanStatus::NotStarted,
        }
    }

    pub fn step(&self, id: &str) -> Option<&TaskStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// 由步骤推导状态
    pub fn derive_status(&self) -> PlanStatus {
        if self.steps.iter().all(|s| s.completed) {
            PlanStatus::Completed
        } else if self.steps.iter().any(|s| s.attempted && !s.completed) {
            PlanStatus::Failed
        } else {
            PlanStatus::InProgress
        }
    }
}

/// 计划校验结果，整体替换
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlanValidation {
    pub is_valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// 校验计划：issues 使计划无效，suggestions 仅为建议
pub fn validate_plan(plan: &TaskPlan) -> PlanValidation {
    let mut issues = Vec::new();
    let mut suggestions = Vec::new();

    if plan.description.trim().is_empty() {
        issues.push("Plan description is empty".to_string());
    }
    if plan.steps.is_empty() {
        issues.push("Plan has no steps".to_string());
    }

    let mut ids = HashSet::new();
    let mut descriptions = HashSet::new();
    for (idx, step) in plan.steps.iter().enumerate() {
        if step.description.trim().is_empty() {
            issues.push(format!("Step {} has an empty description", idx + 1));
        }
        if !ids.insert(step.id.as_str()) {
            issues.push(format!("Duplicate step id: {}", step.id));
        }
        let normalized = step.description.trim().to_lowercase();
        if !normalized.is_empty() && !descriptions.insert(normalized) {
            suggestions.push(format!(
                "Step {} repeats an earlier step: {}",
                idx + 1,
                step.description.trim()
            ));
        }
    }

    if plan.steps.len() > MAX_RECOMMENDED_STEPS {
        suggestions.push(format!(
            "Plan has {} steps; consider splitting it into smaller plans",
            plan.steps.len()
        ));
    }

    PlanValidation {
        is_valid: issues.is_empty(),
        issues,
        suggestions,
    }
}
