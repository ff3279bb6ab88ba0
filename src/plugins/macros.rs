//! 宏替换
//!
//! 在转译前把源码中的 `__IMAGE__("id")` 与 `__DB__("table", predicate)` 替换为字面值：
//! 图片替换为 data URL 字符串字面量，数据表替换为过滤后行的 JSON 数组。
//! 调用边界在词法分析后的 Token 序列上计数括号深度确定（字符串、注释、正则中的括号不计数），不用正则表达式。
//! 过滤谓词不在进程内求值，而是包装成小模块交给沙箱执行。

use std::sync::Arc;

use serde_json::{json, Value};

use super::lexer::{tokenize, Token, TokenKind};
use super::sandbox::SandboxExecutor;
use super::transpiler::transpile;
use crate::core::MacroResolutionError;
use crate::data::{ImageStore, TableStore};

pub const DB_MACRO: &str = "__DB__";
pub const IMAGE_MACRO: &str = "__IMAGE__";

/// 过滤模块导出的函数名
const FILTER_TOOL: &str = "__filter__";

/// 宏调用在源码中的位置与参数
#[derive(Debug, Clone, PartialEq, Eq)]
struct MacroCall {
    /// 宏名起始偏移
    start: usize,
    /// 右括号之后的偏移
    end: usize,
    id: String,
    /// 第一个参数之后的剩余参数文本（已去掉逗号与首尾空白）
    rest: String,
}

/// 从 `(` Token 开始计数括号深度，返回配对 `)` 的 Token 下标。
/// 字符串、模板、正则与注释已由词法分析排除，其中的括号不计数。
fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, tok) in tokens.iter().enumerate().skip(open) {
        if tok.is_punct("(") {
            depth += 1;
        } else if tok.is_punct(")") {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// 宏 id 参数：单引号 / 双引号字符串或不含插值的模板字符串，返回引号内原文
fn string_literal(tok: &Token) -> Option<String> {
    let quoted = matches!(tok.kind, TokenKind::Str)
        || (tok.kind == TokenKind::Template && tok.text.starts_with('`'));
    if !quoted || tok.text.len() < 2 {
        return None;
    }
    Some(tok.text[1..tok.text.len() - 1].to_string())
}

/// 按出现顺序找出名为 `name` 的全部宏调用；参数不合法或未闭合的调用保持原样。
/// 源码无法分词时不做任何替换，由后续转译报告语法错误。
fn find_calls(src: &str, name: &str) -> Vec<MacroCall> {
    if !src.contains(name) {
        return Vec::new();
    }
    let tokens = match tokenize(src) {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(what = e.what, line = e.line, name, "source does not tokenize, macros left untouched");
            return Vec::new();
        }
    };

    let mut calls = Vec::new();
    let mut idx = 0;
    while idx < tokens.len() {
        let tok = &tokens[idx];
        let is_call = tok.is_ident()
            && tok.text == name
            && tokens.get(idx + 1).is_some_and(|t| t.is_punct("("));
        if !is_call {
            idx += 1;
            continue;
        }
        let open = idx + 1;
        let Some(close) = matching_paren(&tokens, open) else {
            tracing::warn!(offset = tok.start, name, "unterminated macro call left untouched");
            idx = open + 1;
            continue;
        };
        let Some(id) = tokens.get(open + 1).filter(|_| open + 1 < close).and_then(string_literal) else {
            tracing::warn!(offset = tok.start, name, "macro without quoted id left untouched");
            idx = open + 1;
            continue;
        };
        // id 之后只能是 `,` 或 `)`；右括号前的尾随注释不计入谓词
        let rest = if open + 2 == close {
            String::new()
        } else if tokens[open + 2].is_punct(",") && open + 3 < close {
            src[tokens[open + 3].start..tokens[close - 1].end].trim().to_string()
        } else if tokens[open + 2].is_punct(",") {
            String::new()
        } else {
            tracing::warn!(offset = tok.start, name, "macro id is not a plain string, left untouched");
            idx = open + 1;
            continue;
        };
        calls.push(MacroCall {
            start: tok.start,
            end: tokens[close].end,
            id,
            rest,
        });
        idx = close + 1;
    }
    calls
}

/// 宏解析器：只读数据表 / 图片存储，过滤谓词经沙箱执行
pub struct MacroResolver {
    tables: Arc<dyn TableStore>,
    images: Arc<dyn ImageStore>,
    sandbox: Arc<dyn SandboxExecutor>,
}

impl MacroResolver {
    pub fn new(
        tables: Arc<dyn TableStore>,
        images: Arc<dyn ImageStore>,
        sandbox: Arc<dyn SandboxExecutor>,
    ) -> Self {
        Self {
            tables,
            images,
            sandbox,
        }
    }

    /// 替换全部宏；无宏的源码原样返回
    pub async fn resolve(&self, source: &str) -> Result<String, MacroResolutionError> {
        let with_images = self.resolve_images(source).await?;
        self.resolve_tables(&with_images).await
    }

    async fn resolve_images(&self, source: &str) -> Result<String, MacroResolutionError> {
        let calls = find_calls(source, IMAGE_MACRO);
        if calls.is_empty() {
            return Ok(source.to_string());
        }
        let mut values = Vec::with_capacity(calls.len());
        for call in &calls {
            let image = self
                .images
                .get_image(&call.id)
                .await
                .map_err(|e| MacroResolutionError::Image {
                    image_id: call.id.clone(),
                    reason: e.to_string(),
                })?;
            if image.is_none() {
                tracing::debug!(image_id = %call.id, "image not found, substituting empty string");
            }
            let url = image.map(|i| i.data_url()).unwrap_or_default();
            values.push(Value::String(url).to_string());
        }
        Ok(splice(source, &calls, &values))
    }

    async fn resolve_tables(&self, source: &str) -> Result<String, MacroResolutionError> {
        let calls = find_calls(source, DB_MACRO);
        if calls.is_empty() {
            return Ok(source.to_string());
        }
        let mut values = Vec::with_capacity(calls.len());
        for call in &calls {
            let rows = self.table_rows(&call.id, &call.rest).await?;
            values.push(Value::Array(rows).to_string());
        }
        Ok(splice(source, &calls, &values))
    }

    async fn table_rows(&self, table_id: &str, filter: &str) -> Result<Vec<Value>, MacroResolutionError> {
        let table = self
            .tables
            .get_table(table_id)
            .await
            .map_err(|e| MacroResolutionError::Table {
                table_id: table_id.to_string(),
                reason: e.to_string(),
            })?;
        let rows = match table {
            Some(t) if !t.rows.is_empty() => t.rows,
            _ => {
                tracing::debug!(table_id, "table missing or empty, substituting []");
                return Ok(Vec::new());
            }
        };
        if filter.is_empty() {
            return Ok(rows);
        }
        Ok(self.filter_rows(table_id, filter, rows).await)
    }

    /// 在沙箱中执行 `rows.filter(<expr>)`；失败或结果不是数组时退回未过滤的行
    async fn filter_rows(&self, table_id: &str, filter: &str, rows: Vec<Value>) -> Vec<Value> {
        let module = format!(
            "export function {}(args) {{ return args.rows.filter({}); }}\n",
            FILTER_TOOL, filter
        );
        let script = match transpile(&module) {
            Ok(script) => script,
            Err(e) => {
                tracing::warn!(table_id, error = %e, "filter does not compile, using unfiltered rows");
                return rows;
            }
        };
        match self
            .sandbox
            .execute(&script, FILTER_TOOL, json!({ "rows": rows.clone() }))
            .await
        {
            Ok(Value::Array(filtered)) => filtered,
            Ok(other) => {
                tracing::warn!(table_id, result = %other, "filter returned non-array, using unfiltered rows");
                rows
            }
            Err(e) => {
                tracing::warn!(table_id, error = %e, "filter failed, using unfiltered rows");
                rows
            }
        }
    }
}

/// 按调用位置拼接替换值，调用之外的文本逐字节保留
fn splice(source: &str, calls: &[MacroCall], values: &[String]) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (call, value) in calls.iter().zip(values) {
        out.push_str(&source[cursor..call.start]);
        out.push_str(value);
        cursor = call.end;
    }
    out.push_str(&source[cursor..]);
    out
}
