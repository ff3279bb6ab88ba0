//! TypeScript → 可执行 JS 方言转译
//!
//! 基于 Token 的删除/替换：类型注解、interface/type/declare 声明整体删除，
//! 静态 import 改写为 `await import(...)`，export 关键字去掉后在末尾追加
//! `globalThis.__PLUGIN_EXPORTS__ = { ... };` 供沙箱按工具名取函数。
//! 不支持的语法（enum、namespace、装饰器、`export *` 等）返回 CompileError，不做静默降级。

use std::collections::HashMap;

use super::lexer::{match_brackets, tokenize, Token, TokenKind};
use super::types::{parse_type, parse_type_arguments};
use crate::core::CompileError;

/// 沙箱读取导出表使用的全局变量名
pub const EXPORTS_GLOBAL: &str = "__PLUGIN_EXPORTS__";

const DEFAULT_BINDING: &str = "__default__";

/// 这些关键字后面的 `(` 不是参数列表
const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "with", "return", "typeof", "await", "new", "super", "import",
    "yield", "void", "in", "of", "delete", "case", "throw", "instanceof", "function",
];

/// 出现在表达式尾部之前但本身不是表达式结尾的关键字
const EXPR_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

const TS_MODIFIERS: &[&str] = &[
    "public", "private", "protected", "readonly", "override", "declare", "abstract",
];

/// 转译插件源码；同一输入总是得到同一输出
pub fn transpile(source: &str) -> Result<String, CompileError> {
    let tokens = tokenize(source).map_err(|e| CompileError::Syntax {
        reason: format!("unterminated {}", e.what),
        line: e.line,
    })?;
    let matching = match_brackets(&tokens).map_err(|e| CompileError::Syntax {
        reason: "unbalanced bracket".into(),
        line: e.line,
    })?;

    let mut t = Transpiler {
        src: source,
        dead: vec![false; tokens.len()],
        tokens: &tokens,
        matching,
        replace: HashMap::new(),
        exports: Vec::new(),
    };
    t.run()?;
    Ok(t.emit())
}

struct Transpiler<'a> {
    src: &'a str,
    tokens: &'a [Token],
    matching: Vec<Option<usize>>,
    dead: Vec<bool>,
    replace: HashMap<usize, String>,
    /// (导出名, 本地绑定名)
    exports: Vec<(String, String)>,
}

impl<'a> Transpiler<'a> {
    // ---------- Token 查询 ----------

    fn word(&self, j: usize, w: &str) -> bool {
        self.tokens
            .get(j)
            .is_some_and(|t| t.kind == TokenKind::Ident && t.text == w)
    }

    fn punct(&self, j: usize, p: &str) -> bool {
        self.tokens.get(j).is_some_and(|t| t.is_punct(p))
    }

    fn ident(&self, j: usize) -> bool {
        self.tokens.get(j).is_some_and(|t| t.is_ident())
    }

    fn line(&self, j: usize) -> usize {
        self.tokens
            .get(j)
            .or(self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn unsupported(&self, construct: &str, j: usize) -> CompileError {
        CompileError::Unsupported {
            construct: construct.to_string(),
            line: self.line(j),
        }
    }

    fn syntax(&self, reason: impl Into<String>, j: usize) -> CompileError {
        CompileError::Syntax {
            reason: reason.into(),
            line: self.line(j),
        }
    }

    fn close_of(&self, j: usize) -> Result<usize, CompileError> {
        self.matching
            .get(j)
            .copied()
            .flatten()
            .ok_or_else(|| self.syntax("unbalanced bracket", j))
    }

    fn prev_live(&self, j: usize) -> Option<usize> {
        (0..j).rev().find(|&k| !self.dead[k])
    }

    fn kill(&mut self, from: usize, to: usize) {
        let to = to.min(self.dead.len());
        for d in &mut self.dead[from.min(to)..to] {
            *d = true;
        }
    }

    /// 跳过一个类型，返回类型之后的下标
    fn type_end(&self, j: usize) -> Result<usize, CompileError> {
        parse_type(self.tokens, j)
            .map(|(_, end)| end)
            .map_err(|e| self.syntax(format!("invalid type annotation: {}", e), j))
    }

    fn is_expr_end(&self, j: usize) -> bool {
        let t = &self.tokens[j];
        match t.kind {
            TokenKind::Ident => !EXPR_KEYWORDS.contains(&t.text.as_str()),
            TokenKind::Str | TokenKind::Number | TokenKind::Template | TokenKind::Regex => true,
            TokenKind::TemplateHead => false,
            TokenKind::Punct => t.is_punct(")") || t.is_punct("]"),
        }
    }

    fn at_statement_start(&self, j: usize) -> bool {
        match self.prev_live(j) {
            None => true,
            Some(p) => {
                let prev = &self.tokens[p];
                if prev.is_punct(".") || prev.is_punct("?.") {
                    return false;
                }
                self.tokens[j].newline_before
                    || prev.is_punct(";")
                    || prev.is_punct("{")
                    || prev.is_punct("}")
            }
        }
    }

    /// 自动分号插入的近似：换行后紧跟新语句
    fn asi_break(&self, j: usize) -> bool {
        j > 0
            && self.tokens[j].newline_before
            && matches!(
                self.tokens[j].kind,
                TokenKind::Ident | TokenKind::Str | TokenKind::Number | TokenKind::Template
            )
            && (self.is_expr_end(j - 1) || self.tokens[j - 1].is_punct("}"))
    }

    /// 初始化表达式的结束位置：同层的 `,` `;` 闭括号或换行语句边界
    fn expression_end(&self, start: usize) -> usize {
        let mut j = start;
        while j < self.tokens.len() {
            let t = &self.tokens[j];
            if t.kind == TokenKind::Punct
                && matches!(t.text.as_str(), "," | ";" | ")" | "]" | "}")
            {
                break;
            }
            if j > start && self.asi_break(j) {
                break;
            }
            j = match self.matching[j] {
                Some(m) if m > j => m + 1,
                _ => j + 1,
            };
        }
        j
    }

    // ---------- 主循环 ----------

    fn run(&mut self) -> Result<(), CompileError> {
        let mut i = 0;
        while i < self.tokens.len() {
            if self.dead[i] {
                i += 1;
                continue;
            }
            let tok = &self.tokens[i];
            match tok.kind {
                TokenKind::Punct => match tok.text.as_str() {
                    "@" => return Err(self.unsupported("decorator", i)),
                    "(" => self.param_list(i)?,
                    "<" => self.angle_prefix(i),
                    "!" => {
                        if let Some(p) = self.prev_live(i) {
                            if !tok.newline_before && self.is_expr_end(p) {
                                self.kill(i, i + 1);
                            }
                        }
                    }
                    _ => {}
                },
                TokenKind::Ident => self.keyword(i)?,
                _ => {}
            }
            i += 1;
        }
        Ok(())
    }

    /// 表达式起点的 `<T>`：旧式类型断言 `<any>x` 或泛型箭头函数 `<T>(x: T) => x`，整段删除
    fn angle_prefix(&mut self, i: usize) {
        let expr_start = match self.prev_live(i) {
            None => true,
            Some(p) => {
                let prev = &self.tokens[p];
                match prev.kind {
                    TokenKind::Punct => !matches!(prev.text.as_str(), ")" | "]" | "}"),
                    TokenKind::Ident => EXPR_KEYWORDS.contains(&prev.text.as_str()),
                    _ => false,
                }
            }
        };
        if !expr_start {
            return;
        }
        if let Ok(end) = parse_type_arguments(self.tokens, i) {
            // 保留 `<` 之前的空白，避免 `return <any>x` 粘连成 `returnx`
            self.kill(i, end);
            self.replace.insert(i, String::new());
        }
    }

    fn keyword(&mut self, i: usize) -> Result<(), CompileError> {
        let text = self.tokens[i].text.as_str();
        let after_dot = self
            .prev_live(i)
            .is_some_and(|p| self.tokens[p].is_punct(".") || self.tokens[p].is_punct("?."));
        if after_dot {
            return Ok(());
        }

        if self.at_statement_start(i) {
            match text {
                "import" if !self.punct(i + 1, "(") && !self.punct(i + 1, ".") => {
                    return self.import(i);
                }
                "export" => return self.export(i),
                _ => {
                    if self.declaration(i)? {
                        return Ok(());
                    }
                }
            }
        }

        match text {
            "class" => self.class(i)?,
            "const" | "let" | "var" => {
                self.declarators(i + 1)?;
            }
            "as" | "satisfies" => {
                let is_cast = !self.tokens[i].newline_before
                    && self.prev_live(i).is_some_and(|p| {
                        self.is_expr_end(p) || self.tokens[p].is_punct("}")
                    });
                if is_cast {
                    if self.word(i + 1, "const") {
                        self.kill(i, i + 2);
                    } else {
                        let end = self.type_end(i + 1)?;
                        self.kill(i, end);
                    }
                }
            }
            _ if self.punct(i + 1, "<") => {
                // 泛型调用 / 声明：f<T>(...)
                if let Ok(end) = parse_type_arguments(self.tokens, i + 1) {
                    if self.punct(end, "(") {
                        self.kill(i + 1, end);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// 只存在于类型层的声明：整体删除或报不支持
    fn declaration(&mut self, i: usize) -> Result<bool, CompileError> {
        let text = self.tokens[i].text.as_str();
        match text {
            "interface" if self.ident(i + 1) => {
                let end = self.interface_end(i + 2)?;
                self.kill(i, end);
            }
            "type" if self.ident(i + 1) && (self.punct(i + 2, "=") || self.punct(i + 2, "<")) => {
                let mut j = i + 2;
                if self.punct(j, "<") {
                    j = parse_type_arguments(self.tokens, j)
                        .map_err(|e| self.syntax(e, j))?;
                }
                if !self.punct(j, "=") {
                    return Err(self.syntax("expected `=` in type alias", j));
                }
                let mut end = self.type_end(j + 1)?;
                if self.punct(end, ";") {
                    end += 1;
                }
                self.kill(i, end);
            }
            "declare" if self.ident(i + 1) => {
                let end = self.declare_end(i + 1)?;
                self.kill(i, end);
            }
            "enum" if self.ident(i + 1) => return Err(self.unsupported("enum", i)),
            "const" if self.word(i + 1, "enum") => return Err(self.unsupported("enum", i)),
            "namespace" | "module"
                if (self.ident(i + 1) || self.tokens.get(i + 1).is_some_and(|t| t.kind == TokenKind::Str))
                    && (self.punct(i + 2, "{") || self.punct(i + 2, ".")) =>
            {
                return Err(self.unsupported(text, i));
            }
            "abstract" if self.word(i + 1, "class") => {
                return Err(self.unsupported("abstract class", i));
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn interface_end(&self, mut j: usize) -> Result<usize, CompileError> {
        if self.punct(j, "<") {
            j = parse_type_arguments(self.tokens, j).map_err(|e| self.syntax(e, j))?;
        }
        if self.word(j, "extends") {
            j += 1;
            loop {
                j = self.type_end(j)?;
                if self.punct(j, ",") {
                    j += 1;
                } else {
                    break;
                }
            }
        }
        if !self.punct(j, "{") {
            return Err(self.syntax("expected interface body", j));
        }
        Ok(self.close_of(j)? + 1)
    }

    fn declare_end(&self, start: usize) -> Result<usize, CompileError> {
        let mut j = start;
        while j < self.tokens.len() {
            let t = &self.tokens[j];
            if t.is_punct("{") {
                return Ok(self.close_of(j)? + 1);
            }
            if t.is_punct(";") {
                return Ok(j + 1);
            }
            if j > start + 1 && t.newline_before && t.is_ident() {
                return Ok(j);
            }
            j = if t.is_punct("(") {
                self.close_of(j)? + 1
            } else if t.is_punct(":") {
                self.type_end(j + 1)?
            } else {
                j + 1
            };
        }
        Ok(j)
    }

    // ---------- 模块语法 ----------

    fn import(&mut self, i: usize) -> Result<(), CompileError> {
        let mut j = i + 1;
        if let Some(t) = self.tokens.get(j).filter(|t| t.kind == TokenKind::Str) {
            self.replace.insert(i, format!("await import({})", t.text));
            self.kill(i, j + 1);
            return Ok(());
        }

        let type_only = self.word(j, "type") && !self.word(j + 1, "from") && !self.punct(j + 1, ",");
        if type_only {
            j += 1;
        }

        let mut fields = Vec::new();
        let mut namespace = None;
        let mut had_specifiers = false;

        if self.ident(j) && !self.word(j, "from") {
            fields.push(format!("default: {}", self.tokens[j].text));
            j += 1;
            if self.punct(j, ",") {
                j += 1;
            }
        }
        if self.punct(j, "*") {
            if !self.word(j + 1, "as") || !self.ident(j + 2) {
                return Err(self.syntax("expected `* as name` in import", j));
            }
            namespace = Some(self.tokens[j + 2].text.clone());
            j += 3;
        } else if self.punct(j, "{") {
            had_specifiers = true;
            let close = self.close_of(j)?;
            let mut k = j + 1;
            while k < close {
                if self.punct(k, ",") {
                    k += 1;
                    continue;
                }
                let inline_type = self.word(k, "type")
                    && !self.punct(k + 1, ",")
                    && !self.punct(k + 1, "}")
                    && !self.word(k + 1, "as");
                if inline_type {
                    k += 2;
                    if self.word(k, "as") {
                        k += 2;
                    }
                    continue;
                }
                let imported = self.tokens[k].text.clone();
                let local = if self.word(k + 1, "as") {
                    k += 3;
                    self.tokens[k - 1].text.clone()
                } else {
                    k += 1;
                    imported.clone()
                };
                fields.push(if imported == local {
                    local
                } else {
                    format!("{}: {}", imported, local)
                });
            }
            j = close + 1;
        }

        if !self.word(j, "from") {
            return Err(self.syntax("expected `from` in import", j));
        }
        let module = self
            .tokens
            .get(j + 1)
            .filter(|t| t.kind == TokenKind::Str)
            .map(|t| t.text.clone())
            .ok_or_else(|| self.syntax("expected module specifier", j + 1))?;
        let end = j + 2;

        let elided = type_only || (had_specifiers && fields.is_empty() && namespace.is_none());
        if elided {
            let end = if self.punct(end, ";") { end + 1 } else { end };
            self.kill(i, end);
            return Ok(());
        }

        self.kill(i, end);
        let loaded = format!("await import({})", module);
        let text = match namespace {
            Some(ns) if fields.is_empty() => format!("const {} = {}", ns, loaded),
            Some(ns) => format!("const {} = {}; const {{ {} }} = {}", ns, loaded, fields.join(", "), ns),
            None => format!("const {{ {} }} = {}", fields.join(", "), loaded),
        };
        self.replace.insert(i, text);
        Ok(())
    }

    fn record_export(&mut self, exported: &str, local: &str) {
        if !self.exports.iter().any(|(e, _)| e == exported) {
            self.exports.push((exported.to_string(), local.to_string()));
        }
    }

    fn export(&mut self, i: usize) -> Result<(), CompileError> {
        let j = i + 1;
        let Some(next) = self.tokens.get(j) else {
            return Err(self.syntax("unexpected end after `export`", i));
        };

        if next.is_punct("*") {
            return Err(self.unsupported("export *", i));
        }
        if next.is_punct("=") {
            return Err(self.unsupported("export =", i));
        }
        if next.is_punct("{") || (self.word(j, "type") && self.punct(j + 1, "{")) {
            let open = if next.is_punct("{") { j } else { j + 1 };
            let close = self.close_of(open)?;
            if self.word(close + 1, "from") {
                return Err(self.unsupported("export ... from", i));
            }
            if open == j {
                let mut k = open + 1;
                while k < close {
                    if self.punct(k, ",") {
                        k += 1;
                        continue;
                    }
                    if self.word(k, "type") && self.ident(k + 1) && !self.word(k + 1, "as") {
                        k += 2;
                        continue;
                    }
                    let local = self.tokens[k].text.clone();
                    let exported = if self.word(k + 1, "as") {
                        k += 3;
                        self.tokens[k - 1].text.clone()
                    } else {
                        k += 1;
                        local.clone()
                    };
                    self.record_export(&exported, &local);
                }
            }
            let end = if self.punct(close + 1, ";") { close + 2 } else { close + 1 };
            self.kill(i, end);
            return Ok(());
        }

        match next.text.as_str() {
            "default" if next.is_ident() => self.export_default(i),
            "async" | "function" if next.is_ident() => {
                let mut k = j;
                if self.word(k, "async") {
                    k += 1;
                }
                k += 1;
                if self.punct(k, "*") {
                    k += 1;
                }
                if !self.ident(k) {
                    return Err(self.syntax("expected function name", k));
                }
                let name = self.tokens[k].text.clone();
                self.kill(i, j);
                self.record_export(&name, &name);
                Ok(())
            }
            "class" if next.is_ident() => {
                if !self.ident(j + 1) {
                    return Err(self.syntax("expected class name", j + 1));
                }
                let name = self.tokens[j + 1].text.clone();
                self.kill(i, j);
                self.record_export(&name, &name);
                Ok(())
            }
            "const" | "let" | "var" if next.is_ident() => {
                self.kill(i, j);
                for name in self.declarators(j + 1)? {
                    match name {
                        Some(name) => self.record_export(&name, &name),
                        None => return Err(self.unsupported("destructuring export", i)),
                    }
                }
                Ok(())
            }
            "import" if next.is_ident() => Err(self.unsupported("export import", i)),
            _ => {
                self.kill(i, j);
                if self.declaration(j)? {
                    Ok(())
                } else {
                    Err(self.syntax(format!("unexpected `{}` after export", next.text), j))
                }
            }
        }
    }

    fn export_default(&mut self, i: usize) -> Result<(), CompileError> {
        let d = i + 1;
        let mut k = d + 1;
        if self.word(k, "async") && self.word(k + 1, "function") {
            k += 1;
        }
        let named = if self.word(k, "function") {
            let mut n = k + 1;
            if self.punct(n, "*") {
                n += 1;
            }
            self.ident(n).then_some(n)
        } else if self.word(k, "class") {
            let n = k + 1;
            (self.ident(n) && !self.word(n, "extends") && !self.word(n, "implements")).then_some(n)
        } else {
            None
        };

        match named {
            Some(n) => {
                let name = self.tokens[n].text.clone();
                self.kill(i, d + 1);
                self.record_export("default", &name);
            }
            None => {
                self.kill(i, d + 1);
                self.replace.insert(i, format!("const {} =", DEFAULT_BINDING));
                self.record_export("default", DEFAULT_BINDING);
            }
        }
        Ok(())
    }

    // ---------- 声明中的注解 ----------

    /// 从 const/let/var 之后开始处理声明列表，返回每个绑定的名字（解构模式为 None）
    fn declarators(&mut self, start: usize) -> Result<Vec<Option<String>>, CompileError> {
        let mut names = Vec::new();
        let mut j = start;
        loop {
            let Some(tok) = self.tokens.get(j) else { break };
            if tok.is_ident() {
                names.push(Some(tok.text.clone()));
                j += 1;
            } else if tok.is_punct("{") || tok.is_punct("[") {
                names.push(None);
                j = self.close_of(j)? + 1;
            } else {
                break;
            }
            if self.punct(j, "!") {
                self.kill(j, j + 1);
                j += 1;
            }
            if self.punct(j, ":") {
                let end = self.type_end(j + 1)?;
                self.kill(j, end);
                j = end;
            }
            if self.punct(j, "=") {
                j = self.expression_end(j + 1);
            }
            if self.punct(j, ",") {
                j += 1;
            } else {
                break;
            }
        }
        Ok(names)
    }

    /// `function` 关键字位置：`function (`、`function name(`、`function* name(`
    fn function_keyword_before(&self, open: usize) -> Option<usize> {
        let mut p = self.prev_live(open)?;
        if self.word(p, "function") {
            return Some(p);
        }
        if self.ident(p) {
            p = self.prev_live(p)?;
        }
        if self.punct(p, "*") {
            p = self.prev_live(p)?;
        }
        self.word(p, "function").then_some(p)
    }

    fn param_list(&mut self, open: usize) -> Result<(), CompileError> {
        let close = self.close_of(open)?;
        let prev = self.prev_live(open);

        if let Some(kw) = self.function_keyword_before(open) {
            self.strip_params(open, close)?;
            let mut body = close + 1;
            if self.punct(body, ":") {
                body = self.type_end(body + 1)?;
                self.kill(close + 1, body);
            }
            if !self.punct(body, "{") {
                // 重载签名：整条声明删除
                let mut start = kw;
                while start > 0 && (self.word(start - 1, "async") || self.word(start - 1, "export") || self.word(start - 1, "default")) {
                    start -= 1;
                }
                let end = if self.punct(body, ";") { body + 1 } else { body };
                self.kill(start, end);
            }
            return Ok(());
        }

        if prev.is_some_and(|p| self.word(p, "catch")) {
            return self.strip_params(open, close);
        }

        // 返回类型后跟 `=>` 或 `{` 才视为参数列表
        let mut after = close + 1;
        let has_return_type = self.punct(after, ":");
        if has_return_type {
            match parse_type(self.tokens, after + 1) {
                Ok((_, end)) => after = end,
                Err(_) => return Ok(()),
            }
        }
        let arrow = self.punct(after, "=>");
        let method = self.punct(after, "{")
            && prev.is_some_and(|p| {
                let t = &self.tokens[p];
                (t.is_ident() && !CONTROL_KEYWORDS.contains(&t.text.as_str())) || t.is_punct("]")
            });
        if !arrow && !method {
            return Ok(());
        }
        self.strip_params(open, close)?;
        if has_return_type {
            self.kill(close + 1, after);
        }
        Ok(())
    }

    fn strip_params(&mut self, open: usize, close: usize) -> Result<(), CompileError> {
        let mut j = open + 1;
        while j < close {
            if self.punct(j, ",") {
                j += 1;
                continue;
            }
            if self.punct(j, "...") {
                j += 1;
            }
            if self.tokens[j].is_ident()
                && TS_MODIFIERS.contains(&self.tokens[j].text.as_str())
                && (self.ident(j + 1) || self.punct(j + 1, "{") || self.punct(j + 1, "["))
            {
                return Err(self.unsupported("parameter property", j));
            }
            if self.word(j, "this") && self.punct(j + 1, ":") {
                let mut end = self.type_end(j + 2)?;
                if self.punct(end, ",") {
                    end += 1;
                }
                self.kill(j, end);
                j = end;
                continue;
            }
            let tok = &self.tokens[j];
            if tok.is_punct("{") || tok.is_punct("[") {
                j = self.close_of(j)? + 1;
            } else if tok.is_ident() {
                j += 1;
            } else {
                return Err(self.syntax(format!("unexpected `{}` in parameter list", tok.text), j));
            }
            if self.punct(j, "?") {
                self.kill(j, j + 1);
                j += 1;
            }
            if self.punct(j, ":") {
                let end = self.type_end(j + 1)?;
                self.kill(j, end);
                j = end;
            }
            if self.punct(j, "=") {
                j = self.expression_end(j + 1);
            }
            if j < close && !self.punct(j, ",") {
                return Err(self.syntax(
                    format!("unexpected `{}` in parameter list", self.tokens[j].text),
                    j,
                ));
            }
        }
        Ok(())
    }

    // ---------- class ----------

    fn class(&mut self, i: usize) -> Result<(), CompileError> {
        let mut j = i + 1;
        if self.ident(j) && !self.word(j, "extends") && !self.word(j, "implements") {
            j += 1;
        }
        if self.punct(j, "<") {
            let end = parse_type_arguments(self.tokens, j).map_err(|e| self.syntax(e, j))?;
            self.kill(j, end);
            j = end;
        }
        if self.word(j, "extends") {
            j += 1;
            while j < self.tokens.len() && !self.punct(j, "{") && !self.word(j, "implements") {
                if self.punct(j, "<") {
                    if let Ok(end) = parse_type_arguments(self.tokens, j) {
                        self.kill(j, end);
                        j = end;
                        continue;
                    }
                }
                j = match self.matching[j] {
                    Some(m) if m > j => m + 1,
                    _ => j + 1,
                };
            }
        }
        if self.word(j, "implements") {
            let start = j;
            j += 1;
            loop {
                j = self.type_end(j)?;
                if self.punct(j, ",") {
                    j += 1;
                } else {
                    break;
                }
            }
            self.kill(start, j);
        }
        if !self.punct(j, "{") {
            return Err(self.syntax("expected class body", j));
        }
        let close = self.close_of(j)?;
        self.class_body(j, close)
    }

    fn class_body(&mut self, open: usize, close: usize) -> Result<(), CompileError> {
        let name_like = |t: Option<&Token>| {
            t.is_some_and(|t| {
                matches!(t.kind, TokenKind::Ident | TokenKind::Str | TokenKind::Number)
                    || t.is_punct("[")
                    || t.is_punct("#")
                    || t.is_punct("*")
            })
        };

        let mut k = open + 1;
        while k < close {
            if self.punct(k, ";") {
                k += 1;
                continue;
            }
            if self.punct(k, "@") {
                return Err(self.unsupported("decorator", k));
            }
            let member_start = k;
            let mut declared = false;

            loop {
                let Some(t) = self.tokens.get(k).filter(|t| t.is_ident()) else { break };
                let next = self.tokens.get(k + 1);
                if TS_MODIFIERS.contains(&t.text.as_str()) && name_like(next) {
                    match t.text.as_str() {
                        "abstract" => return Err(self.unsupported("abstract member", k)),
                        "declare" => declared = true,
                        _ => {}
                    }
                    self.kill(k, k + 1);
                    k += 1;
                } else if t.text == "static" && self.punct(k + 1, "{") {
                    break;
                } else if matches!(t.text.as_str(), "static" | "async" | "get" | "set")
                    && name_like(next)
                {
                    k += 1;
                } else {
                    break;
                }
            }

            if self.word(k, "static") && self.punct(k + 1, "{") {
                k = self.close_of(k + 1)? + 1;
                continue;
            }
            if self.punct(k, "*") {
                k += 1;
            }

            // 名称
            if self.punct(k, "[") {
                let bracket_close = self.close_of(k)?;
                let index_signature = self.ident(k + 1) && self.punct(k + 2, ":");
                if index_signature {
                    let mut end = self.type_end(bracket_close + 2)?;
                    if self.punct(end, ";") {
                        end += 1;
                    }
                    self.kill(member_start, end);
                    k = end;
                    continue;
                }
                k = bracket_close + 1;
            } else if self.punct(k, "#") {
                k += 2;
            } else {
                k += 1;
            }

            if self.punct(k, "?") || self.punct(k, "!") {
                self.kill(k, k + 1);
                k += 1;
            }
            if self.punct(k, "<") {
                let end = parse_type_arguments(self.tokens, k).map_err(|e| self.syntax(e, k))?;
                self.kill(k, end);
                k = end;
            }

            if self.punct(k, "(") {
                let params_close = self.close_of(k)?;
                self.strip_params(k, params_close)?;
                k = params_close + 1;
                if self.punct(k, ":") {
                    let end = self.type_end(k + 1)?;
                    self.kill(k, end);
                    k = end;
                }
                if self.punct(k, "{") {
                    k = self.close_of(k)? + 1;
                } else {
                    // 方法重载签名
                    let end = if self.punct(k, ";") { k + 1 } else { k };
                    self.kill(member_start, end);
                    k = end;
                }
                continue;
            }

            if self.punct(k, ":") {
                let end = self.type_end(k + 1)?;
                self.kill(k, end);
                k = end;
            }
            if self.punct(k, "=") {
                k = self.expression_end(k + 1);
            }
            if self.punct(k, ";") {
                k += 1;
            }
            if declared {
                self.kill(member_start, k);
            }
            if k <= member_start {
                k = member_start + 1;
            }
        }
        Ok(())
    }

    // ---------- 输出 ----------

    fn emit(&self) -> String {
        let mut out = String::with_capacity(self.src.len() + 64);
        let mut cursor = 0;
        for (idx, tok) in self.tokens.iter().enumerate() {
            let gap = &self.src[cursor..tok.start];
            if let Some(text) = self.replace.get(&idx) {
                out.push_str(gap);
                out.push_str(text);
            } else if self.dead[idx] {
                // 被删除的 Token 只保留换行，行号不变
                out.extend(gap.chars().filter(|c| *c == '\n'));
            } else {
                out.push_str(gap);
                out.push_str(&tok.text);
            }
            cursor = tok.end;
        }
        out.push_str(&self.src[cursor..]);

        let entries: Vec<String> = self
            .exports
            .iter()
            .map(|(exported, local)| {
                if exported == local {
                    local.clone()
                } else {
                    format!("{}: {}", exported, local)
                }
            })
            .collect();
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!(
            "globalThis.{} = {{ {} }};\n",
            EXPORTS_GLOBAL,
            entries.join(", ")
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(src: &str) -> String {
        transpile(src).unwrap()
    }

    #[test]
    fn test_strips_parameter_and_return_annotations() {
        let out = ok("export function add(a: number, b?: number): number { return a + (b ?? 0); }");
        assert!(out.contains("function add(a, b) { return a + (b ?? 0); }"), "{}", out);
        assert!(out.ends_with("globalThis.__PLUGIN_EXPORTS__ = { add };\n"));
        assert!(!out.contains("export"));
    }

    #[test]
    fn test_removes_type_only_declarations() {
        let src = "interface Args {\n  a: string;\n}\ntype Mode = 'x' | 'y';\ndeclare const VERSION: string;\nexport const run = (args: Args): string => args.a;\n";
        let out = ok(src);
        assert!(!out.contains("interface"));
        assert!(!out.contains("Mode"));
        assert!(!out.contains("declare"));
        assert!(out.contains("const run = (args) => args.a;"), "{}", out);
        // 行号保持不变
        assert_eq!(out.lines().count(), src.lines().count() + 1);
    }

    #[test]
    fn test_imports_become_dynamic() {
        let out = ok("import fs, { readFile as rf, type Stats } from \"node:fs\";\nimport * as path from 'node:path';\nimport type { X } from './x';\nimport './side';\n");
        assert!(out.contains("const { default: fs, readFile: rf } = await import(\"node:fs\");"), "{}", out);
        assert!(out.contains("const path = await import('node:path');"));
        assert!(!out.contains("./x"));
        assert!(out.contains("await import('./side');"));
    }

    #[test]
    fn test_export_default_and_lists() {
        let out = ok("const a = 1;\nfunction b() {}\nexport { a, b as bee };\nexport default { a };\n");
        assert!(out.contains("const __default__ = { a };"), "{}", out);
        assert!(out.contains("globalThis.__PLUGIN_EXPORTS__ = { a, bee: b, default: __default__ };"));

        let out = ok("export default async function main() {}\n");
        assert!(out.contains("async function main() {}"));
        assert!(out.contains("{ default: main }"));
    }

    #[test]
    fn test_casts_non_null_and_generics() {
        let out = ok("const el = (document as any).body!.firstChild as Node;\nconst m = new Map<string, number>();\nconst list = [1, 2] as const;\nconst n = parse<number>(raw!);\n");
        assert!(out.contains("const el = (document).body.firstChild;"), "{}", out);
        assert!(out.contains("new Map();"));
        assert!(out.contains("const list = [1, 2];"));
        assert!(out.contains("const n = parse(raw);"));
    }

    #[test]
    fn test_class_members() {
        let src = "class Counter<T> implements Base {\n  private count: number = 0;\n  readonly label?: string;\n  declare meta: T;\n  constructor(label: string) { this.label = label; }\n  inc(by: number = 1): number { return this.count += by; }\n}\n";
        let out = ok(src);
        assert!(out.contains("class Counter {"), "{}", out);
        assert!(out.contains("count = 0;"));
        assert!(!out.contains("private"));
        assert!(!out.contains("meta"));
        assert!(out.contains("constructor(label) {"));
        assert!(out.contains("inc(by = 1) {"));
    }

    #[test]
    fn test_overload_signatures_removed() {
        let out = ok("export function f(a: string): string;\nexport function f(a: any): any { return a; }\n");
        assert_eq!(out.matches("function f").count(), 1, "{}", out);
        assert!(out.contains("{ f }"));
    }

    #[test]
    fn test_angle_bracket_cast_and_generic_arrow() {
        let out = ok("function f(raw) { return <any>1; }\nconst n = (<Array<number>>raw).length;\nconst id = <T,>(x: T): T => x;\n");
        assert!(out.contains("return 1;"), "{}", out);
        assert!(out.contains("const n = (raw).length;"), "{}", out);
        assert!(out.contains("const id = (x) => x;"), "{}", out);
        assert!(!out.contains('<'));
    }

    #[test]
    fn test_comparison_is_not_generic() {
        let out = ok("for (let i = 0; i < n.length; i++) { if (a > b) g(i); }\n");
        assert!(out.contains("for (let i = 0; i < n.length; i++) { if (a > b) g(i); }"));
    }

    #[test]
    fn test_ternary_is_not_arrow() {
        let out = ok("const v = ok ? (x) : y;\n");
        assert!(out.contains("const v = ok ? (x) : y;"), "{}", out);
    }

    #[test]
    fn test_unsupported_constructs() {
        let cases = [
            ("enum Color { Red }", "enum"),
            ("namespace NS { }", "namespace"),
            ("@sealed\nclass A {}", "decorator"),
            ("export * from './x';", "export *"),
            ("export { a } from './x';", "export ... from"),
            ("export const { a, b } = obj;", "destructuring export"),
            ("class A { constructor(private x: number) {} }", "parameter property"),
        ];
        for (src, construct) in cases {
            match transpile(src) {
                Err(CompileError::Unsupported { construct: c, .. }) => assert_eq!(c, construct),
                other => panic!("{}: unexpected {:?}", src, other),
            }
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            transpile("const s = 'open;"),
            Err(CompileError::Syntax { .. })
        ));
        assert!(matches!(
            transpile("function f() {"),
            Err(CompileError::Syntax { .. })
        ));
    }

    #[test]
    fn test_deterministic() {
        let src = "export async function go(x: { a: number }): Promise<void> { await x; }";
        assert_eq!(ok(src), ok(src));
    }
}
