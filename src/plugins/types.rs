//! TypeScript 类型表达式解析
//!
//! 从 Token 序列的某个位置解析出一个类型表达式并返回结束位置。
//! 描述解析器用它推导参数 schema；转译器用它确定需要擦除的类型注解范围。

use super::lexer::{Comment, Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralType {
    Str(String),
    Num(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// string / number / boolean / any / unknown / void / null / undefined / never / object ...
    Keyword(String),
    Literal(LiteralType),
    Array(Box<TypeExpr>),
    Tuple(Vec<TypeExpr>),
    Object(Vec<TypeMember>),
    Reference { name: String, args: Vec<TypeExpr> },
    Union(Vec<TypeExpr>),
    Intersection(Vec<TypeExpr>),
    Function,
    /// 无法映射的类型（typeof、索引访问、模板字面量类型等），保留原文
    Other(String),
}

/// 对象类型 / interface 的属性
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMember {
    pub name: String,
    pub optional: bool,
    pub ty: TypeExpr,
    pub comments: Vec<Comment>,
}

const KEYWORD_TYPES: &[&str] = &[
    "string", "number", "boolean", "any", "unknown", "void", "null", "undefined", "never",
    "object", "bigint", "symbol",
];

/// 从 tokens[start] 开始解析一个类型，返回 (类型, 下一个未消费 Token 的下标)
pub fn parse_type(tokens: &[Token], start: usize) -> Result<(TypeExpr, usize), String> {
    let mut p = TypeParser { tokens, pos: start };
    let ty = p.union()?;
    Ok((ty, p.pos))
}

/// 解析 `< ... >` 类型参数列表（泛型调用实参或声明形参），返回 `>` 之后的下标
pub fn parse_type_arguments(tokens: &[Token], start: usize) -> Result<usize, String> {
    let mut p = TypeParser { tokens, pos: start };
    p.expect("<")?;
    loop {
        p.union()?;
        // 泛型形参：<T extends X = Y>
        if p.eat_ident("extends") {
            p.union()?;
        }
        if p.eat("=") {
            p.union()?;
        }
        if p.eat(",") {
            if p.at(">") {
                break;
            }
            continue;
        }
        break;
    }
    p.expect(">")?;
    Ok(p.pos)
}

struct TypeParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TypeParser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn at(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.is_punct(text))
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.at(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_ident() && t.text == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str) -> Result<(), String> {
        if self.eat(text) {
            Ok(())
        } else {
            Err(match self.peek() {
                Some(t) => format!("expected `{}` but found `{}` at line {}", text, t.text, t.line),
                None => format!("expected `{}` but reached end of input", text),
            })
        }
    }

    fn source_text(&self, from: usize, to: usize) -> String {
        self.tokens[from..to]
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// 跳过一对平衡的括号（当前位置必须是 open）
    fn skip_balanced(&mut self, open: &str, close: &str) -> Result<(), String> {
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            if tok.is_punct(open) {
                depth += 1;
            } else if tok.is_punct(close) {
                depth -= 1;
                if depth == 0 {
                    self.pos += 1;
                    return Ok(());
                }
            }
            self.pos += 1;
        }
        Err(format!("unclosed `{}` in type", open))
    }

    fn union(&mut self) -> Result<TypeExpr, String> {
        self.eat("|");
        let mut parts = vec![self.intersection()?];
        while self.eat("|") {
            parts.push(self.intersection()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            TypeExpr::Union(parts)
        })
    }

    fn intersection(&mut self) -> Result<TypeExpr, String> {
        self.eat("&");
        let mut parts = vec![self.postfix()?];
        while self.eat("&") {
            parts.push(self.postfix()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            TypeExpr::Intersection(parts)
        })
    }

    fn postfix(&mut self) -> Result<TypeExpr, String> {
        let start = self.pos;
        let mut ty = self.primary()?;
        loop {
            let Some(tok) = self.peek() else { break };
            if tok.is_punct("[") && !tok.newline_before {
                if self.peek_at(1).is_some_and(|t| t.is_punct("]")) {
                    self.pos += 2;
                    ty = TypeExpr::Array(Box::new(ty));
                } else {
                    self.skip_balanced("[", "]")?;
                    ty = TypeExpr::Other(self.source_text(start, self.pos));
                }
            } else if tok.is_ident() && tok.text == "is" && !tok.newline_before {
                // 类型谓词 `x is T`
                self.pos += 1;
                self.union()?;
                ty = TypeExpr::Keyword("boolean".into());
            } else {
                break;
            }
        }
        Ok(ty)
    }

    fn primary(&mut self) -> Result<TypeExpr, String> {
        let start = self.pos;
        let tok = self
            .peek()
            .ok_or_else(|| "unexpected end of type".to_string())?;
        match tok.kind {
            TokenKind::Punct => match tok.text.as_str() {
                "{" => self.object(),
                "(" => {
                    if self.is_function_type() {
                        self.skip_balanced("(", ")")?;
                        self.expect("=>")?;
                        self.union()?;
                        Ok(TypeExpr::Function)
                    } else {
                        self.pos += 1;
                        let inner = self.union()?;
                        self.expect(")")?;
                        Ok(inner)
                    }
                }
                "<" => {
                    self.skip_balanced("<", ">")?;
                    self.skip_balanced("(", ")")?;
                    self.expect("=>")?;
                    self.union()?;
                    Ok(TypeExpr::Function)
                }
                "[" => self.tuple(),
                "-" if self
                    .peek_at(1)
                    .is_some_and(|t| t.kind == TokenKind::Number) =>
                {
                    let num = format!("-{}", self.tokens[self.pos + 1].text);
                    self.pos += 2;
                    Ok(TypeExpr::Literal(LiteralType::Num(num)))
                }
                other => Err(format!("unexpected `{}` in type at line {}", other, tok.line)),
            },
            TokenKind::Str => {
                self.pos += 1;
                Ok(TypeExpr::Literal(LiteralType::Str(unquote(&tok.text))))
            }
            TokenKind::Number => {
                self.pos += 1;
                Ok(TypeExpr::Literal(LiteralType::Num(tok.text.clone())))
            }
            TokenKind::Template => {
                self.pos += 1;
                Ok(TypeExpr::Other(tok.text.clone()))
            }
            TokenKind::Ident => self.named(start),
            _ => Err(format!("unexpected `{}` in type at line {}", tok.text, tok.line)),
        }
    }

    fn named(&mut self, start: usize) -> Result<TypeExpr, String> {
        let word = self.tokens[self.pos].text.clone();
        match word.as_str() {
            "true" | "false" => {
                self.pos += 1;
                Ok(TypeExpr::Literal(LiteralType::Bool(word == "true")))
            }
            "typeof" => {
                self.pos += 1;
                self.qualified_name()?;
                Ok(TypeExpr::Other(self.source_text(start, self.pos)))
            }
            "keyof" => {
                self.pos += 1;
                self.postfix()?;
                Ok(TypeExpr::Keyword("string".into()))
            }
            "readonly" | "unique" => {
                self.pos += 1;
                self.postfix()
            }
            "infer" => {
                self.pos += 1;
                self.qualified_name()?;
                Ok(TypeExpr::Other(self.source_text(start, self.pos)))
            }
            "new" if self.peek_at(1).is_some_and(|t| t.is_punct("(")) => {
                self.pos += 1;
                self.skip_balanced("(", ")")?;
                self.expect("=>")?;
                self.union()?;
                Ok(TypeExpr::Function)
            }
            w if KEYWORD_TYPES.contains(&w) => {
                self.pos += 1;
                Ok(TypeExpr::Keyword(word))
            }
            _ => {
                let name = self.qualified_name()?;
                let mut args = Vec::new();
                if self.at("<") && !self.tokens[self.pos].newline_before {
                    self.pos += 1;
                    loop {
                        args.push(self.union()?);
                        if !self.eat(",") {
                            break;
                        }
                    }
                    self.expect(">")?;
                }
                Ok(TypeExpr::Reference { name, args })
            }
        }
    }

    fn qualified_name(&mut self) -> Result<String, String> {
        let mut name = String::new();
        loop {
            match self.peek() {
                Some(t) if t.is_ident() => {
                    name.push_str(&t.text);
                    self.pos += 1;
                }
                _ => return Err("expected type name".into()),
            }
            if self.at(".") {
                name.push('.');
                self.pos += 1;
            } else {
                return Ok(name);
            }
        }
    }

    /// `(` 开头时判断是函数类型 `(a: T) => R` 还是括号分组
    fn is_function_type(&self) -> bool {
        let mut depth = 0usize;
        let mut i = self.pos;
        while let Some(tok) = self.tokens.get(i) {
            if tok.is_punct("(") {
                depth += 1;
            } else if tok.is_punct(")") {
                depth -= 1;
                if depth == 0 {
                    return self.tokens.get(i + 1).is_some_and(|t| t.is_punct("=>"));
                }
            }
            i += 1;
        }
        false
    }

    fn tuple(&mut self) -> Result<TypeExpr, String> {
        self.expect("[")?;
        let mut elems = Vec::new();
        while !self.eat("]") {
            self.eat("...");
            // 具名元组成员 `name: T` / `name?: T`
            let named = self.peek().is_some_and(|t| t.is_ident())
                && (self.peek_at(1).is_some_and(|t| t.is_punct(":"))
                    || (self.peek_at(1).is_some_and(|t| t.is_punct("?"))
                        && self.peek_at(2).is_some_and(|t| t.is_punct(":"))));
            if named {
                self.pos += 1;
                self.eat("?");
                self.expect(":")?;
            }
            elems.push(self.union()?);
            self.eat("?");
            if !self.eat(",") {
                self.expect("]")?;
                break;
            }
        }
        Ok(TypeExpr::Tuple(elems))
    }

    fn object(&mut self) -> Result<TypeExpr, String> {
        self.expect("{")?;
        let mut members = Vec::new();
        loop {
            while self.eat(";") || self.eat(",") {}
            if self.eat("}") {
                break;
            }
            let tok = self
                .peek()
                .ok_or_else(|| "unclosed `{` in type".to_string())?;
            let comments = tok.comments.clone();

            if tok.is_ident()
                && tok.text == "readonly"
                && self
                    .peek_at(1)
                    .is_some_and(|t| !t.is_punct(":") && !t.is_punct("?") && !t.is_punct("("))
            {
                self.pos += 1;
            }

            // 索引签名 / 映射类型：[key: string]: T
            if self.at("[") {
                self.skip_balanced("[", "]")?;
                self.eat("?");
                if self.eat(":") {
                    self.union()?;
                }
                continue;
            }
            // 调用签名
            if self.at("(") || self.at("<") {
                self.skip_signature()?;
                continue;
            }

            let tok = self
                .peek()
                .ok_or_else(|| "unclosed `{` in type".to_string())?;
            let name = match tok.kind {
                TokenKind::Ident | TokenKind::Number => tok.text.clone(),
                TokenKind::Str => unquote(&tok.text),
                _ => {
                    return Err(format!(
                        "unexpected `{}` in object type at line {}",
                        tok.text, tok.line
                    ))
                }
            };
            self.pos += 1;
            let optional = self.eat("?");

            // 方法签名不是数据属性，跳过
            if self.at("(") || self.at("<") {
                self.skip_signature()?;
                continue;
            }
            self.expect(":")?;
            let ty = self.union()?;
            members.push(TypeMember {
                name,
                optional,
                ty,
                comments,
            });
        }
        Ok(TypeExpr::Object(members))
    }

    fn skip_signature(&mut self) -> Result<(), String> {
        if self.at("<") {
            self.skip_balanced("<", ">")?;
        }
        self.skip_balanced("(", ")")?;
        if self.eat(":") {
            self.union()?;
        }
        Ok(())
    }
}

/// 去掉字符串字面量两端引号并处理常见转义
pub fn unquote(lit: &str) -> String {
    let inner = if lit.len() >= 2 {
        &lit[1..lit.len() - 1]
    } else {
        lit
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::lexer::tokenize;

    fn parse(src: &str) -> (TypeExpr, usize, usize) {
        let toks = tokenize(src).unwrap();
        let (ty, end) = parse_type(&toks, 0).unwrap();
        (ty, end, toks.len())
    }

    #[test]
    fn test_keywords_and_arrays() {
        assert_eq!(parse("string").0, TypeExpr::Keyword("string".into()));
        assert_eq!(
            parse("number[][]").0,
            TypeExpr::Array(Box::new(TypeExpr::Array(Box::new(TypeExpr::Keyword(
                "number".into()
            )))))
        );
    }

    #[test]
    fn test_literal_union() {
        let (ty, end, len) = parse(r#""day" | "week""#);
        assert_eq!(end, len);
        assert_eq!(
            ty,
            TypeExpr::Union(vec![
                TypeExpr::Literal(LiteralType::Str("day".into())),
                TypeExpr::Literal(LiteralType::Str("week".into())),
            ])
        );
    }

    #[test]
    fn test_object_members_with_comments() {
        let (ty, _, _) = parse("{\n  // the query\n  query: string;\n  limit?: number\n}");
        let TypeExpr::Object(members) = ty else {
            panic!("expected object")
        };
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].name, "query");
        assert_eq!(members[0].comments[0].body(), "the query");
        assert!(members[1].optional);
    }

    #[test]
    fn test_generic_reference() {
        let (ty, end, len) = parse("Array<Record<string, number>>");
        assert_eq!(end, len);
        match ty {
            TypeExpr::Reference { name, args } => {
                assert_eq!(name, "Array");
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_function_type_stops_before_body() {
        let toks = tokenize("(a: number) => void {").unwrap();
        let (ty, end) = parse_type(&toks, 0).unwrap();
        assert_eq!(ty, TypeExpr::Function);
        assert!(toks[end].is_punct("{"));
    }

    #[test]
    fn test_stops_at_assignment() {
        let toks = tokenize("Foo | null = null;").unwrap();
        let (_, end) = parse_type(&toks, 0).unwrap();
        assert!(toks[end].is_punct("="));
    }

    #[test]
    fn test_type_arguments() {
        let toks = tokenize("<T extends object = {}>(x)").unwrap();
        let end = parse_type_arguments(&toks, 0).unwrap();
        assert!(toks[end].is_punct("("));
    }

    #[test]
    fn test_malformed_type() {
        let toks = tokenize("{ a: }").unwrap();
        assert!(parse_type(&toks, 0).is_err());
    }
}
