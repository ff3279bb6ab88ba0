//! 插件描述解析器
//!
//! 从带注解的 TypeScript 源码中提取插件元数据（开头块注释里的 @name / @description / @version / @author）
//! 与工具表（每个导出函数一个工具，参数形状推导为 JSON-schema）。
//! 显式构建描述表，不依赖运行时反射或全局注册；同一源码重复解析得到结构相同的结果。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::descriptor::{ParameterSchema, ParsedPlugin, SchemaType, ToolDescriptor, DEFAULT_VERSION};
use super::lexer::{match_brackets, tokenize, Comment, LexError, Token};
use super::types::{parse_type, parse_type_arguments, LiteralType, TypeExpr, TypeMember};
use crate::core::PluginParseError;

/// 源码未声明 @name 时使用的插件名
pub const DEFAULT_PLUGIN_NAME: &str = "untitled";

impl From<LexError> for PluginParseError {
    fn from(e: LexError) -> Self {
        PluginParseError::Unterminated {
            what: e.what,
            line: e.line,
        }
    }
}

fn meta_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:/\*+)?\s*\*?\s*@(\w+)\s+(.*?)\s*(?:\*/)?\s*$").expect("valid regex")
    })
}

/// 解析插件源码，得到 {name, description, version, author, tools}
pub fn parse_plugin(source: &str) -> Result<ParsedPlugin, PluginParseError> {
    let (meta, meta_start) = parse_metadata(source)?;
    let tokens = tokenize(source)?;
    let matching = match_brackets(&tokens)?;
    let decls = collect_declarations(&tokens);

    let mut tools = Vec::new();
    let mut seen = HashSet::new();
    let mut depth = 0usize;
    let mut i = 0usize;
    while i < tokens.len() {
        let tok = &tokens[i];
        if tok.is_punct("{") {
            depth += 1;
        } else if tok.is_punct("}") {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && tok.is_ident() && tok.text == "export" {
            if let Some(tool) = parse_exported_function(&tokens, &matching, &decls, i, meta_start)? {
                if !seen.insert(tool.name.clone()) {
                    return Err(PluginParseError::DuplicateTool(tool.name));
                }
                tools.push(tool);
            }
        }
        i += 1;
    }

    tracing::debug!(tools = tools.len(), "plugin source parsed");
    Ok(ParsedPlugin {
        name: meta
            .get("name")
            .cloned()
            .unwrap_or_else(|| DEFAULT_PLUGIN_NAME.to_string()),
        description: meta.get("description").cloned().unwrap_or_default(),
        version: meta
            .get("version")
            .cloned()
            .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        author: meta.get("author").cloned(),
        tools,
    })
}

/// 开头块注释中的 `@key value`；返回 (标签表, 注释起始偏移)
fn parse_metadata(source: &str) -> Result<(HashMap<String, String>, usize), PluginParseError> {
    let start = source.len() - source.trim_start().len();
    let rest = &source[start..];
    if !rest.starts_with("/*") {
        return Err(PluginParseError::MissingMetadata);
    }
    let end = rest[2..]
        .find("*/")
        .map(|p| p + 4)
        .ok_or(PluginParseError::Unterminated {
            what: "comment",
            line: source[..start].matches('\n').count() + 1,
        })?;

    let mut meta = HashMap::new();
    for line in rest[..end].lines() {
        if let Some(caps) = meta_tag_regex().captures(line) {
            meta.insert(caps[1].to_string(), caps[2].to_string());
        }
    }
    Ok((meta, start))
}

type Declarations = HashMap<String, Result<TypeExpr, String>>;

/// 收集源码中的 interface 与 type 别名；解析失败的声明只有在被工具参数引用时才报错
fn collect_declarations(tokens: &[Token]) -> Declarations {
    let mut decls = HashMap::new();
    for i in 0..tokens.len() {
        let tok = &tokens[i];
        if !tok.is_ident() || (i > 0 && (tokens[i - 1].is(".") || tokens[i - 1].is("?."))) {
            continue;
        }
        let Some(name_tok) = tokens.get(i + 1).filter(|t| t.is_ident()) else {
            continue;
        };
        match tok.text.as_str() {
            "interface" => {
                decls.insert(name_tok.text.clone(), parse_interface(tokens, i + 2));
            }
            "type" if tokens
                .get(i + 2)
                .is_some_and(|t| t.is_punct("=") || t.is_punct("<")) =>
            {
                decls.insert(name_tok.text.clone(), parse_alias(tokens, i + 2));
            }
            _ => {}
        }
    }
    decls
}

fn parse_interface(tokens: &[Token], mut j: usize) -> Result<TypeExpr, String> {
    if tokens.get(j).is_some_and(|t| t.is_punct("<")) {
        j = parse_type_arguments(tokens, j)?;
    }
    let mut parts = Vec::new();
    if tokens.get(j).is_some_and(|t| t.is_ident() && t.text == "extends") {
        j += 1;
        loop {
            let (base, next) = parse_type(tokens, j)?;
            parts.push(base);
            j = next;
            if tokens.get(j).is_some_and(|t| t.is_punct(",")) {
                j += 1;
            } else {
                break;
            }
        }
    }
    if !tokens.get(j).is_some_and(|t| t.is_punct("{")) {
        return Err("expected `{` in interface declaration".into());
    }
    let (body, _) = parse_type(tokens, j)?;
    if parts.is_empty() {
        Ok(body)
    } else {
        parts.push(body);
        Ok(TypeExpr::Intersection(parts))
    }
}

fn parse_alias(tokens: &[Token], mut j: usize) -> Result<TypeExpr, String> {
    if tokens.get(j).is_some_and(|t| t.is_punct("<")) {
        j = parse_type_arguments(tokens, j)?;
    }
    if !tokens.get(j).is_some_and(|t| t.is_punct("=")) {
        return Err("expected `=` in type alias".into());
    }
    parse_type(tokens, j + 1).map(|(ty, _)| ty)
}

/// 解析 `export [default] [async] function name(...)`，其他导出返回 None
fn parse_exported_function(
    tokens: &[Token],
    matching: &[Option<usize>],
    decls: &Declarations,
    export_idx: usize,
    meta_start: usize,
) -> Result<Option<ToolDescriptor>, PluginParseError> {
    let word = |j: usize, w: &str| tokens.get(j).is_some_and(|t| t.is_ident() && t.text == w);
    let mut j = export_idx + 1;
    if word(j, "default") {
        j += 1;
    }
    if word(j, "async") {
        j += 1;
    }
    if !word(j, "function") {
        return Ok(None);
    }
    j += 1;
    if tokens.get(j).is_some_and(|t| t.is_punct("*")) {
        j += 1;
    }
    let Some(name) = tokens.get(j).filter(|t| t.is_ident()).map(|t| t.text.clone()) else {
        return Ok(None);
    };
    j += 1;

    let malformed = |reason: String| PluginParseError::MalformedParameter {
        tool: name.clone(),
        reason,
    };

    if tokens.get(j).is_some_and(|t| t.is_punct("<")) {
        j = parse_type_arguments(tokens, j).map_err(malformed)?;
    }
    if !tokens.get(j).is_some_and(|t| t.is_punct("(")) {
        return Err(malformed("expected parameter list".into()));
    }
    let close = matching[j].ok_or_else(|| malformed("unclosed parameter list".into()))?;
    let params = parse_params(tokens, matching, j, close).map_err(malformed)?;

    // 重载签名（无函数体）不单独成为工具
    let mut after = close + 1;
    if tokens.get(after).is_some_and(|t| t.is_punct(":")) {
        after = parse_type(tokens, after + 1).map_err(malformed)?.1;
    }
    if !tokens.get(after).is_some_and(|t| t.is_punct("{")) {
        return Ok(None);
    }

    let comments: Vec<&Comment> = tokens[export_idx]
        .comments
        .iter()
        .filter(|c| c.start != meta_start)
        .collect();
    let doc = DocComment::from_comments(&comments);

    let mut mapper = SchemaMapper {
        decls,
        visiting: Vec::new(),
    };
    let parameters = mapper
        .tool_parameters(&params, &doc.params)
        .map_err(malformed)?;

    Ok(Some(ToolDescriptor {
        name,
        description: doc.description,
        parameters,
    }))
}

#[derive(Debug, Default)]
struct Param {
    name: Option<String>,
    optional: bool,
    ty: Option<TypeExpr>,
}

const PARAM_MODIFIERS: &[&str] = &["public", "private", "protected", "readonly"];

fn parse_params(
    tokens: &[Token],
    matching: &[Option<usize>],
    open: usize,
    close: usize,
) -> Result<Vec<Param>, String> {
    let mut params = Vec::new();
    let mut j = open + 1;
    while j < close {
        if tokens[j].is_punct(",") {
            j += 1;
            continue;
        }
        let mut param = Param::default();
        if tokens[j].is_punct("...") {
            j += 1;
        }
        while tokens[j].is_ident()
            && PARAM_MODIFIERS.contains(&tokens[j].text.as_str())
            && tokens.get(j + 1).is_some_and(|t| t.is_ident())
        {
            j += 1;
        }
        let tok = &tokens[j];
        if tok.is_ident() {
            param.name = Some(tok.text.clone());
            j += 1;
        } else if tok.is_punct("{") || tok.is_punct("[") {
            j = matching[j].ok_or("unclosed binding pattern")? + 1;
        } else {
            return Err(format!("unexpected `{}` in parameter list", tok.text));
        }
        if tokens[j].is_punct("?") {
            param.optional = true;
            j += 1;
        }
        if tokens[j].is_punct(":") {
            let (ty, next) = parse_type(tokens, j + 1)?;
            param.ty = Some(ty);
            j = next;
        }
        if tokens[j].is_punct("=") {
            param.optional = true;
            while j < close && !tokens[j].is_punct(",") {
                j = match matching[j] {
                    Some(m) if m > j => m + 1,
                    _ => j + 1,
                };
            }
        }
        if j < close && !tokens[j].is_punct(",") {
            return Err(format!("unexpected `{}` in parameter list", tokens[j].text));
        }
        if param.name.as_deref() != Some("this") {
            params.push(param);
        }
    }
    Ok(params)
}

/// JSDoc `@param` 标签
#[derive(Debug, Default, Clone)]
struct ParamTag {
    description: String,
    optional: bool,
}

/// 函数前导注释：描述文本与 @param 标签
#[derive(Debug, Default)]
struct DocComment {
    description: String,
    params: HashMap<String, ParamTag>,
}

impl DocComment {
    /// 优先级：JSDoc @description 标签 > JSDoc 正文 > 普通块注释 > 紧邻的连续行注释
    fn from_comments(comments: &[&Comment]) -> Self {
        if let Some(doc) = comments.iter().rev().find(|c| c.is_doc()) {
            return Self::from_jsdoc(&doc.body());
        }
        Self {
            description: plain_comment_text(comments).unwrap_or_default(),
            params: HashMap::new(),
        }
    }

    fn from_jsdoc(body: &str) -> Self {
        let mut text = Vec::new();
        let mut tags: Vec<(String, String)> = Vec::new();
        for line in body.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix('@') {
                let (tag, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                tags.push((tag.to_string(), value.trim().to_string()));
            } else if let Some((_, value)) = tags.last_mut() {
                if !line.is_empty() {
                    value.push(' ');
                    value.push_str(line);
                }
            } else {
                text.push(line);
            }
        }

        let mut doc = Self::default();
        for (tag, value) in &tags {
            match tag.as_str() {
                "description" | "desc" => doc.description = value.clone(),
                "param" => {
                    if let Some((name, tag)) = parse_param_tag(value) {
                        doc.params.insert(name, tag);
                    }
                }
                _ => {}
            }
        }
        if doc.description.is_empty() {
            doc.description = text.join("\n").trim().to_string();
        }
        doc
    }
}

/// `{Type} [name=default] - description` / `name description`
fn parse_param_tag(value: &str) -> Option<(String, ParamTag)> {
    let mut rest = value.trim();
    let mut tag = ParamTag::default();
    if rest.starts_with('{') {
        let mut depth = 0usize;
        let mut end = None;
        for (idx, c) in rest.char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(idx);
                        break;
                    }
                }
                _ => {}
            }
        }
        let end = end?;
        if rest[1..end].trim_end().ends_with('=') {
            tag.optional = true;
        }
        rest = rest[end + 1..].trim_start();
    }
    let name;
    if let Some(inner) = rest.strip_prefix('[') {
        let close = inner.find(']')?;
        name = inner[..close].split('=').next().unwrap_or("").trim().to_string();
        tag.optional = true;
        rest = &inner[close + 1..];
    } else {
        let end = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$' || c == '.'))
            .unwrap_or(rest.len());
        name = rest[..end].to_string();
        rest = &rest[end..];
    }
    if name.is_empty() {
        return None;
    }
    tag.description = rest.trim_start().trim_start_matches('-').trim().to_string();
    Some((name, tag))
}

/// 非 JSDoc 注释文本：最后一个块注释，否则末尾连续的行注释
fn plain_comment_text(comments: &[&Comment]) -> Option<String> {
    let last = comments.last()?;
    if last.block {
        return Some(last.body()).filter(|s| !s.is_empty());
    }
    let mut lines: Vec<String> = comments
        .iter()
        .rev()
        .take_while(|c| !c.block)
        .map(|c| c.body())
        .collect();
    lines.reverse();
    Some(lines.join("\n")).filter(|s| !s.is_empty())
}

/// 属性描述：JSDoc 正文（或 @description）优先，其次普通注释
fn member_description(comments: &[Comment]) -> Option<String> {
    let refs: Vec<&Comment> = comments.iter().collect();
    let doc = DocComment::from_comments(&refs);
    Some(doc.description).filter(|s| !s.is_empty())
}

/// TypeExpr → ParameterSchema 映射，visiting 防止自引用类型无限展开
struct SchemaMapper<'a> {
    decls: &'a Declarations,
    visiting: Vec<String>,
}

impl<'a> SchemaMapper<'a> {
    /// 对象形状的参数展开为工具顶层属性；其余参数以参数名作为单个属性
    fn tool_parameters(
        &mut self,
        params: &[Param],
        tags: &HashMap<String, ParamTag>,
    ) -> Result<Option<ParameterSchema>, String> {
        let mut properties = BTreeMap::new();
        let mut required = Vec::new();

        for param in params {
            let schema = match &param.ty {
                Some(ty) => self.schema(ty)?,
                None => ParameterSchema::of(SchemaType::String)
                    .with_description("no type annotation, defaults to string"),
            };

            if schema.kind == SchemaType::Object {
                if let Some(props) = schema.properties {
                    for name in schema.required {
                        if !required.contains(&name) {
                            required.push(name);
                        }
                    }
                    properties.extend(props);
                    continue;
                }
            }

            let name = match (&param.name, &param.ty) {
                (Some(name), _) => name.clone(),
                (None, Some(TypeExpr::Reference { name, .. })) => name.clone(),
                (None, _) => "args".to_string(),
            };
            let mut schema = schema;
            let mut optional = param.optional;
            if let Some(tag) = tags.get(&name) {
                if !tag.description.is_empty() {
                    schema.description = Some(tag.description.clone());
                }
                optional |= tag.optional;
            }
            if !optional {
                required.push(name.clone());
            }
            properties.insert(name, schema);
        }

        if properties.is_empty() {
            return Ok(None);
        }
        Ok(Some(ParameterSchema::object(properties, required)))
    }

    fn schema(&mut self, ty: &TypeExpr) -> Result<ParameterSchema, String> {
        Ok(match ty {
            TypeExpr::Keyword(k) => match k.as_str() {
                "string" => ParameterSchema::of(SchemaType::String),
                "number" | "bigint" => ParameterSchema::of(SchemaType::Number),
                "boolean" => ParameterSchema::of(SchemaType::Boolean),
                "object" => ParameterSchema::of(SchemaType::Object),
                "any" | "unknown" => ParameterSchema::of(SchemaType::String)
                    .with_description("any/unknown, mapped to string"),
                other => {
                    ParameterSchema::of(SchemaType::String).with_description(format!("type: {}", other))
                }
            },
            TypeExpr::Literal(lit) => literal_schema(lit),
            TypeExpr::Array(inner) => ParameterSchema::array(Some(self.schema(inner)?)),
            TypeExpr::Tuple(elems) => {
                ParameterSchema::array(elems.first().map(|e| self.schema(e)).transpose()?)
            }
            TypeExpr::Object(members) => self.object(members)?,
            TypeExpr::Reference { name, args } => self.reference(name, args)?,
            TypeExpr::Union(parts) => self.union(ty, parts)?,
            TypeExpr::Intersection(parts) => self.intersection(parts)?,
            TypeExpr::Function => {
                ParameterSchema::of(SchemaType::String).with_description("function type")
            }
            TypeExpr::Other(text) => {
                ParameterSchema::of(SchemaType::String).with_description(format!("type: {}", text))
            }
        })
    }

    fn object(&mut self, members: &[TypeMember]) -> Result<ParameterSchema, String> {
        let mut properties = BTreeMap::new();
        let mut required = Vec::new();
        for member in members {
            let mut schema = self.schema(&member.ty)?;
            if let Some(desc) = member_description(&member.comments) {
                schema.description = Some(desc);
            }
            if !member.optional {
                required.push(member.name.clone());
            }
            properties.insert(member.name.clone(), schema);
        }
        Ok(ParameterSchema::object(properties, required))
    }

    fn reference(&mut self, name: &str, args: &[TypeExpr]) -> Result<ParameterSchema, String> {
        if let Some(decl) = self.decls.get(name) {
            if self.visiting.iter().any(|v| v == name) {
                return Ok(ParameterSchema::of(SchemaType::Object)
                    .with_description(format!("type reference: {}", name)));
            }
            let ty = decl
                .as_ref()
                .map_err(|e| format!("invalid declaration `{}`: {}", name, e))?;
            self.visiting.push(name.to_string());
            let schema = self.schema(ty);
            self.visiting.pop();
            return schema;
        }

        let first = args.first();
        Ok(match (name, first) {
            ("Array" | "ReadonlyArray" | "Set", _) => {
                ParameterSchema::array(first.map(|a| self.schema(a)).transpose()?)
            }
            ("Promise" | "Readonly" | "Required", Some(inner)) => self.schema(inner)?,
            ("Partial", Some(inner)) => {
                let mut schema = self.schema(inner)?;
                schema.required.clear();
                schema
            }
            ("Date", _) => ParameterSchema::of(SchemaType::String).with_description("date string"),
            _ => ParameterSchema::of(SchemaType::Object)
                .with_description(format!("type reference: {}", name)),
        })
    }

    /// 联合类型：忽略 null/undefined；纯字面量联合带 enum；否则按 string > number > boolean > array > object 取一
    fn union(&mut self, whole: &TypeExpr, parts: &[TypeExpr]) -> Result<ParameterSchema, String> {
        let members: Vec<&TypeExpr> = parts
            .iter()
            .filter(|p| !matches!(p, TypeExpr::Keyword(k) if k == "null" || k == "undefined"))
            .collect();
        match members.as_slice() {
            [] => {
                return Ok(ParameterSchema::of(SchemaType::String)
                    .with_description(format!("type: {}", whole)))
            }
            [single] => return self.schema(single),
            _ => {}
        }

        let schemas = members
            .iter()
            .map(|m| self.schema(m))
            .collect::<Result<Vec<_>, _>>()?;

        let all_literals = members.iter().all(|m| matches!(m, TypeExpr::Literal(_)));
        if all_literals && schemas.iter().all(|s| s.kind == schemas[0].kind) {
            let mut schema = ParameterSchema::of(schemas[0].kind);
            schema.enum_values = schemas.into_iter().flat_map(|s| s.enum_values).collect();
            return Ok(schema);
        }

        const PRECEDENCE: [SchemaType; 5] = [
            SchemaType::String,
            SchemaType::Number,
            SchemaType::Boolean,
            SchemaType::Array,
            SchemaType::Object,
        ];
        let chosen = PRECEDENCE
            .iter()
            .find_map(|kind| schemas.iter().find(|s| s.kind == *kind))
            .cloned()
            .unwrap_or_default();
        let mut schema = ParameterSchema::of(chosen.kind);
        schema.items = chosen.items;
        schema.properties = chosen.properties;
        schema.required = chosen.required;
        Ok(schema.with_description(format!("union: {}", whole)))
    }

    fn intersection(&mut self, parts: &[TypeExpr]) -> Result<ParameterSchema, String> {
        let schemas = parts
            .iter()
            .map(|p| self.schema(p))
            .collect::<Result<Vec<_>, _>>()?;
        if schemas.iter().all(|s| s.properties.is_some()) {
            let mut properties = BTreeMap::new();
            let mut required = Vec::new();
            for schema in schemas {
                for name in schema.required {
                    if !required.contains(&name) {
                        required.push(name);
                    }
                }
                properties.extend(schema.properties.unwrap_or_default());
            }
            return Ok(ParameterSchema::object(properties, required));
        }
        Ok(schemas
            .into_iter()
            .find(|s| s.kind == SchemaType::Object)
            .unwrap_or_else(|| ParameterSchema::of(SchemaType::Object)))
    }
}

fn literal_schema(lit: &LiteralType) -> ParameterSchema {
    match lit {
        LiteralType::Str(s) => {
            let mut schema = ParameterSchema::of(SchemaType::String);
            schema.enum_values = vec![Value::String(s.clone())];
            schema
        }
        LiteralType::Num(n) => {
            let mut schema = ParameterSchema::of(SchemaType::Number);
            if let Some(num) = n
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
            {
                schema.enum_values = vec![Value::Number(num)];
            }
            schema
        }
        LiteralType::Bool(b) => {
            let mut schema = ParameterSchema::of(SchemaType::Boolean);
            schema.enum_values = vec![Value::Bool(*b)];
            schema
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |parts: &[TypeExpr], sep: &str| {
            parts
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(sep)
        };
        match self {
            TypeExpr::Keyword(k) => write!(f, "{}", k),
            TypeExpr::Literal(LiteralType::Str(s)) => write!(f, "\"{}\"", s),
            TypeExpr::Literal(LiteralType::Num(n)) => write!(f, "{}", n),
            TypeExpr::Literal(LiteralType::Bool(b)) => write!(f, "{}", b),
            TypeExpr::Array(inner) => write!(f, "{}[]", inner),
            TypeExpr::Tuple(elems) => write!(f, "[{}]", join(elems, ", ")),
            TypeExpr::Object(_) => write!(f, "{{ ... }}"),
            TypeExpr::Reference { name, args } if args.is_empty() => write!(f, "{}", name),
            TypeExpr::Reference { name, args } => write!(f, "{}<{}>", name, join(args, ", ")),
            TypeExpr::Union(parts) => write!(f, "{}", join(parts, " | ")),
            TypeExpr::Intersection(parts) => write!(f, "{}", join(parts, " & ")),
            TypeExpr::Function => write!(f, "Function"),
            TypeExpr::Other(text) => write!(f, "{}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"/**
 * @name Demo Plugin
 * @description Plugin used for tests
 * @version 1.2.0
 * @author Ghostie
 */

// Current date and time.
export function getCurrentDateTime(): string {
  return new Date().toISOString();
}

interface GenerateRandomArgs {
  // Either 'number' or 'string'.
  type?: "number" | "string";
  /** Lower bound */
  min?: number;
  max?: number;
  length: number;
}

// Random number or string.
export function generateRandom(args: GenerateRandomArgs): number | string {
  const { type = "number", min = 0, max = 100 } = args ?? {};
  return type === "number" ? Math.floor(Math.random() * (max - min + 1)) + min : "x";
}

/**
 * @description Format text.
 * @param {string} text - the text to format
 * @param {string} [mode] - formatting mode
 */
export async function formatText(text: string, mode?: string): Promise<string> {
  return mode === "upper" ? text.toUpperCase() : text;
}

function helper(x: number) { return x * 2; }
"#;

    #[test]
    fn test_metadata() {
        let parsed = parse_plugin(EXAMPLE).unwrap();
        assert_eq!(parsed.name, "Demo Plugin");
        assert_eq!(parsed.description, "Plugin used for tests");
        assert_eq!(parsed.version, "1.2.0");
        assert_eq!(parsed.author.as_deref(), Some("Ghostie"));
    }

    #[test]
    fn test_only_exported_functions_become_tools() {
        let parsed = parse_plugin(EXAMPLE).unwrap();
        let names: Vec<_> = parsed.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["getCurrentDateTime", "generateRandom", "formatText"]);
    }

    #[test]
    fn test_zero_parameter_tool_has_no_parameters() {
        let parsed = parse_plugin(EXAMPLE).unwrap();
        let tool = &parsed.tools[0];
        assert_eq!(tool.description, "Current date and time.");
        assert!(tool.parameters.is_none());
    }

    #[test]
    fn test_interface_parameter_is_expanded() {
        let parsed = parse_plugin(EXAMPLE).unwrap();
        let tool = &parsed.tools[1];
        assert_eq!(tool.description, "Random number or string.");
        let params = tool.parameters.as_ref().unwrap();
        let props = params.properties.as_ref().unwrap();
        assert_eq!(props.len(), 4);
        assert_eq!(params.required, vec!["length".to_string()]);
        let ty = &props["type"];
        assert_eq!(ty.kind, SchemaType::String);
        assert_eq!(ty.description.as_deref(), Some("Either 'number' or 'string'."));
        assert_eq!(ty.enum_values, vec![Value::from("number"), Value::from("string")]);
        assert_eq!(props["min"].description.as_deref(), Some("Lower bound"));
        assert_eq!(props["max"].kind, SchemaType::Number);
    }

    #[test]
    fn test_primitive_parameters_with_jsdoc() {
        let parsed = parse_plugin(EXAMPLE).unwrap();
        let tool = &parsed.tools[2];
        assert_eq!(tool.description, "Format text.");
        let params = tool.parameters.as_ref().unwrap();
        let props = params.properties.as_ref().unwrap();
        assert_eq!(props["text"].description.as_deref(), Some("the text to format"));
        assert_eq!(params.required, vec!["text".to_string()]);
    }

    #[test]
    fn test_nested_object_and_array_shape() {
        let src = r#"/** @name Nested */
type Tag = { label: string; weight?: number };
export function save(input: {
  title: string;
  meta: { owner: { id: number; name?: string }; tags: Tag[] };
  scores?: Array<number>;
}) {}
"#;
        let parsed = parse_plugin(src).unwrap();
        let params = parsed.tools[0].parameters.as_ref().unwrap();
        assert_eq!(params.required, vec!["title".to_string(), "meta".to_string()]);
        let props = params.properties.as_ref().unwrap();

        let meta = &props["meta"];
        assert_eq!(meta.kind, SchemaType::Object);
        assert_eq!(meta.required, vec!["owner".to_string(), "tags".to_string()]);
        let owner = &meta.properties.as_ref().unwrap()["owner"];
        assert_eq!(owner.required, vec!["id".to_string()]);

        let tags = &meta.properties.as_ref().unwrap()["tags"];
        assert_eq!(tags.kind, SchemaType::Array);
        let tag = tags.items.as_ref().unwrap();
        assert_eq!(tag.kind, SchemaType::Object);
        assert_eq!(tag.required, vec!["label".to_string()]);

        assert_eq!(props["scores"].items.as_ref().unwrap().kind, SchemaType::Number);
        assert_eq!(params.depth(), 4);
    }

    #[test]
    fn test_reparse_is_idempotent() {
        let a = parse_plugin(EXAMPLE).unwrap();
        let b = parse_plugin(EXAMPLE).unwrap();
        assert_eq!(a.tools, b.tools);
    }

    #[test]
    fn test_missing_metadata() {
        let err = parse_plugin("export function f() {}").unwrap_err();
        assert_eq!(err, PluginParseError::MissingMetadata);
    }

    #[test]
    fn test_malformed_parameter() {
        let src = "/** @name Bad */\nexport function f(args: { a: ; }) {}";
        match parse_plugin(src).unwrap_err() {
            PluginParseError::MalformedParameter { tool, .. } => assert_eq!(tool, "f"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_tool() {
        let src = "/** @name Dup */\nexport function f() {}\nexport function f() {}";
        assert_eq!(
            parse_plugin(src).unwrap_err(),
            PluginParseError::DuplicateTool("f".into())
        );
    }

    #[test]
    fn test_overload_signatures_are_not_tools() {
        let src = "/** @name O */\nexport function f(a: string): string;\nexport function f(a: any): any { return a; }";
        let parsed = parse_plugin(src).unwrap();
        assert_eq!(parsed.tools.len(), 1);
    }

    #[test]
    fn test_self_referencing_interface_terminates() {
        let src = "/** @name Tree */\ninterface Node { value: number; children?: Node[] }\nexport function walk(root: Node) {}";
        let parsed = parse_plugin(src).unwrap();
        let props = parsed.tools[0].parameters.as_ref().unwrap().properties.as_ref().unwrap();
        let child = props["children"].items.as_ref().unwrap();
        assert_eq!(child.kind, SchemaType::Object);
        assert!(child.properties.is_none());
    }

    #[test]
    fn test_defaults_when_tags_missing() {
        let parsed = parse_plugin("/* plain header */\nexport function f() {}").unwrap();
        assert_eq!(parsed.name, DEFAULT_PLUGIN_NAME);
        assert_eq!(parsed.version, DEFAULT_VERSION);
    }
}
