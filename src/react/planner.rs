//! Planner：解析模型回复
//!
//! parse_model_output 从文本中提取 JSON（```json 代码块，或第一个 `{` 到最后一个 `}`），
//! 得到 thought / action / step_id / final_answer；没有 JSON 的纯文本视为最终回答。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;

/// 模型请求的工具调用：{"tool": "search", "args": {...}}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

/// 一轮模型输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub thought: String,
    pub action: Option<ToolCall>,
    /// 本次行动对应的计划步骤；缺省为当前步骤
    pub step_id: Option<String>,
    pub final_answer: Option<String>,
}

/// 同时接受嵌套 action 与扁平的 tool/args 两种写法
#[derive(Debug, Deserialize)]
struct RawTurn {
    #[serde(default)]
    thought: Option<String>,
    #[serde(default)]
    action: Option<ToolCall>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Option<Value>,
    #[serde(default)]
    step_id: Option<String>,
    #[serde(default)]
    final_answer: Option<String>,
}

/// 解析模型输出
pub fn parse_model_output(output: &str) -> Result<ModelTurn, AgentError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            return Ok(answer(trimmed));
        }
    } else {
        return Ok(answer(trimmed));
    };

    let raw: RawTurn = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    let action = raw
        .action
        .or_else(|| {
            raw.tool.map(|tool| ToolCall {
                tool,
                args: raw.args.unwrap_or_else(empty_args),
            })
        })
        .filter(|call| !call.tool.trim().is_empty());

    let final_answer = match (&action, raw.final_answer) {
        (_, Some(a)) => Some(a),
        (None, None) => Some(raw.thought.clone().unwrap_or_else(|| trimmed.to_string())),
        (Some(_), None) => None,
    };

    Ok(ModelTurn {
        thought: raw.thought.unwrap_or_default(),
        action,
        step_id: raw.step_id.filter(|s| !s.is_empty()),
        final_answer,
    })
}

fn answer(text: &str) -> ModelTurn {
    ModelTurn {
        thought: String::new(),
        action: None,
        step_id: None,
        final_answer: Some(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_nested_action() {
        let text = "Let me look.\n```json\n{\"thought\": \"need data\", \"action\": {\"tool\": \"search\", \"args\": {\"q\": \"rust\"}}, \"step_id\": \"s1\"}\n```";
        let turn = parse_model_output(text).unwrap();
        assert_eq!(turn.thought, "need data");
        assert_eq!(
            turn.action,
            Some(ToolCall {
                tool: "search".into(),
                args: json!({"q": "rust"})
            })
        );
        assert_eq!(turn.step_id.as_deref(), Some("s1"));
        assert!(turn.final_answer.is_none());
    }

    #[test]
    fn test_flat_tool_call() {
        let turn = parse_model_output(r#"ok {"tool": "echo", "args": {"text": "hi"}} done"#).unwrap();
        assert_eq!(turn.action.unwrap().tool, "echo");
    }

    #[test]
    fn test_plain_text_is_final_answer() {
        let turn = parse_model_output("  All done.  ").unwrap();
        assert!(turn.action.is_none());
        assert_eq!(turn.final_answer.as_deref(), Some("All done."));
    }

    #[test]
    fn test_explicit_final_answer() {
        let turn = parse_model_output(r#"{"thought": "finished", "final_answer": "42"}"#).unwrap();
        assert!(turn.action.is_none());
        assert_eq!(turn.final_answer.as_deref(), Some("42"));
    }

    #[test]
    fn test_empty_tool_is_not_an_action() {
        let turn = parse_model_output(r#"{"thought": "nothing to do", "tool": ""}"#).unwrap();
        assert!(turn.action.is_none());
        assert_eq!(turn.final_answer.as_deref(), Some("nothing to do"));
    }

    #[test]
    fn test_invalid_json_errors() {
        let err = parse_model_output("{ not json }").unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }
}
