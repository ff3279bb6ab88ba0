//! 模型输出 JSON Schema 生成（schemars）
//!
//! 将合法回复的 JSON 结构注入 prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 工具调用（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionFormat {
    /// 工具名，取自可用工具列表
    pub tool: String,
    /// 工具参数，结构见对应工具的 parameters
    pub args: Value,
}

/// 一轮回复的格式：要么给出 action，要么给出 final_answer
#[allow(dead_code)]
#[derive(JsonSchema)]
struct TurnFormat {
    /// 本轮思考
    pub thought: String,
    /// 要执行的工具调用
    pub action: Option<ActionFormat>,
    /// 本次行动对应的计划步骤 id，缺省为当前步骤
    pub step_id: Option<String>,
    /// 任务完成时的最终回答
    pub final_answer: Option<String>,
}

/// 返回回复格式的 JSON Schema 字符串，可拼入 prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(TurnFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_fields() {
        let s = tool_call_schema_json();
        assert!(s.contains("\"thought\""));
        assert!(s.contains("\"final_answer\""));
        assert!(s.contains("\"tool\""));
    }
}
