//! 认知层：Agent 记忆、任务计划与校验、模型输出解析、Agent 主循环

pub mod loop_;
pub mod memory;
pub mod plan;
pub mod planner;
pub mod schema;

pub use loop_::{react_loop, run_cycle, ReactResult, ReactSession, StopReason};
pub use memory::{Action, ActionResult, AgentMemory, ThoughtChain};
pub use plan::{validate_plan, PlanStatus, PlanValidation, TaskPlan, TaskStep};
pub use planner::{parse_model_output, ModelTurn, ToolCall};
pub use schema::tool_call_schema_json;
