//! TypeScript 子集词法分析
//!
//! 解析器与转译器共用：产出带字节偏移、行号、前导注释的 Token 序列。
//! 模板字符串按 head / tail 切分，`${ ... }` 中的代码照常分词；`/` 根据前一个 Token 判断是除号还是正则。

/// Token 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Str,
    Number,
    /// 完整模板字符串或模板尾部（以反引号结束）
    Template,
    /// 模板头部或中段（以 `${` 结束，后面跟表达式）
    TemplateHead,
    Regex,
    Punct,
}

/// 注释（`//` 行注释或 `/* */` 块注释），原文保留
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub block: bool,
}

impl Comment {
    /// 是否为 JSDoc 块（`/** ... */`）
    pub fn is_doc(&self) -> bool {
        self.block && self.text.starts_with("/**") && self.text != "/**/"
    }

    /// 去掉注释符号与每行前导 `*` 后的正文
    pub fn body(&self) -> String {
        if !self.block {
            return self.text.trim_start_matches('/').trim().to_string();
        }
        let inner = self
            .text
            .strip_prefix("/*")
            .unwrap_or(&self.text)
            .trim_start_matches('*');
        let inner = inner.strip_suffix("*/").unwrap_or(inner);
        inner
            .lines()
            .map(|l| {
                let l = l.trim();
                let l = l.strip_prefix('*').unwrap_or(l);
                l.trim()
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    /// 与前一个 Token 之间是否有换行（ASI 与语句起点判断用）
    pub newline_before: bool,
    /// 紧挨在该 Token 之前的注释
    pub comments: Vec<Comment>,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        matches!(self.kind, TokenKind::Punct | TokenKind::Ident) && self.text == text
    }

    pub fn is_punct(&self, text: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == text
    }

    pub fn is_ident(&self) -> bool {
        self.kind == TokenKind::Ident
    }
}

/// 词法错误：未闭合的字符串 / 注释 / 模板 / 正则 / 括号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub what: &'static str,
    pub line: usize,
}

/// 出现在表达式起点位置的关键字（其后的 `/` 是正则）
const KEYWORDS_BEFORE_EXPR: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// 多字符运算符，按长度降序匹配
const PUNCTUATORS: &[&str] = &[
    "...", "===", "!==", "**=", "<<=", "&&=", "||=", "??=", "=>", "==", "!=", "<=", ">=", "&&",
    "||", "??", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "**", "<<",
];

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c >= 0x80
}

fn is_ident_continue(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

fn regex_allowed(prev: Option<&Token>) -> bool {
    match prev {
        None => true,
        Some(t) => match t.kind {
            TokenKind::Ident => KEYWORDS_BEFORE_EXPR.contains(&t.text.as_str()),
            TokenKind::TemplateHead => true,
            TokenKind::Punct => !matches!(t.text.as_str(), ")" | "]" | "}"),
            _ => false,
        },
    }
}

fn scan_string(bytes: &[u8], start: usize, quote: u8, line: &mut usize) -> Result<usize, LexError> {
    let begin_line = *line;
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if bytes.get(i + 1) == Some(&b'\n') {
                    *line += 1;
                }
                i += 2;
            }
            b'\n' => break,
            c if c == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(LexError { what: "string", line: begin_line })
}

/// 从模板正文位置扫描到反引号（返回 false）或 `${`（返回 true）
fn scan_template(bytes: &[u8], mut i: usize, line: &mut usize) -> Result<(usize, bool), LexError> {
    let begin_line = *line;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return Ok((i + 1, false)),
            b'$' if bytes.get(i + 1) == Some(&b'{') => return Ok((i + 2, true)),
            b'\n' => {
                *line += 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Err(LexError { what: "template literal", line: begin_line })
}

fn scan_regex(bytes: &[u8], start: usize, line: usize) -> Result<usize, LexError> {
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => break,
            b'[' => {
                in_class = true;
                i += 1;
            }
            b']' => {
                in_class = false;
                i += 1;
            }
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return Ok(i);
            }
            _ => i += 1,
        }
    }
    Err(LexError { what: "regular expression", line })
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' {
            if (c == b'e' || c == b'E') && matches!(bytes.get(i + 1), Some(b'+') | Some(b'-')) {
                i += 2;
                continue;
            }
            i += 1;
        } else {
            break;
        }
    }
    i
}

/// 将源码切分为 Token 序列
pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    let bytes = src.as_bytes();
    let mut tokens: Vec<Token> = Vec::new();
    let mut pending: Vec<Comment> = Vec::new();
    let mut newline = false;
    let mut line = 1usize;
    let mut i = 0usize;
    // 每层未闭合的 `${` 打开时的花括号深度
    let mut template_stack: Vec<usize> = Vec::new();
    let mut brace_depth = 0usize;

    macro_rules! push {
        ($kind:expr, $start:expr, $end:expr, $line:expr) => {{
            tokens.push(Token {
                kind: $kind,
                text: src[$start..$end].to_string(),
                start: $start,
                end: $end,
                line: $line,
                newline_before: newline,
                comments: std::mem::take(&mut pending),
            });
            newline = false;
        }};
    }

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let tok_line = line;
        match c {
            b'\n' => {
                line += 1;
                newline = true;
                i += 1;
            }
            b' ' | b'\t' | b'\r' | 0x0b | 0x0c => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let end = src[i..].find('\n').map(|p| i + p).unwrap_or(bytes.len());
                pending.push(Comment {
                    text: src[i..end].to_string(),
                    start: i,
                    end,
                    block: false,
                });
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = src[i + 2..]
                    .find("*/")
                    .map(|p| i + 2 + p + 2)
                    .ok_or(LexError { what: "comment", line })?;
                line += src[i..end].matches('\n').count();
                if src[i..end].contains('\n') {
                    newline = true;
                }
                pending.push(Comment {
                    text: src[i..end].to_string(),
                    start: i,
                    end,
                    block: true,
                });
                i = end;
            }
            b'"' | b'\'' => {
                i = scan_string(bytes, i, c, &mut line)?;
                push!(TokenKind::Str, start, i, tok_line);
            }
            b'`' => {
                let (end, head) = scan_template(bytes, i + 1, &mut line)?;
                i = end;
                if head {
                    template_stack.push(brace_depth);
                    push!(TokenKind::TemplateHead, start, i, tok_line);
                } else {
                    push!(TokenKind::Template, start, i, tok_line);
                }
            }
            b'}' if template_stack.last() == Some(&brace_depth) => {
                template_stack.pop();
                let (end, head) = scan_template(bytes, i + 1, &mut line)?;
                i = end;
                if head {
                    template_stack.push(brace_depth);
                    push!(TokenKind::TemplateHead, start, i, tok_line);
                } else {
                    push!(TokenKind::Template, start, i, tok_line);
                }
            }
            _ if is_ident_start(c) => {
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                push!(TokenKind::Ident, start, i, tok_line);
            }
            b'0'..=b'9' => {
                i = scan_number(bytes, i);
                push!(TokenKind::Number, start, i, tok_line);
            }
            b'.' if bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) => {
                i = scan_number(bytes, i + 1);
                push!(TokenKind::Number, start, i, tok_line);
            }
            b'/' if regex_allowed(tokens.last()) => {
                i = scan_regex(bytes, i, line)?;
                push!(TokenKind::Regex, start, i, tok_line);
            }
            b'?' if bytes.get(i + 1) == Some(&b'.')
                && !bytes.get(i + 2).is_some_and(|b| b.is_ascii_digit()) =>
            {
                i += 2;
                push!(TokenKind::Punct, start, i, tok_line);
            }
            _ => {
                let rest = &src[i..];
                let len = PUNCTUATORS
                    .iter()
                    .find(|p| rest.starts_with(*p))
                    .map(|p| p.len())
                    .unwrap_or(1);
                match c {
                    b'{' => brace_depth += 1,
                    b'}' => brace_depth = brace_depth.saturating_sub(1),
                    _ => {}
                }
                i += len;
                push!(TokenKind::Punct, start, i, tok_line);
            }
        }
    }

    if !template_stack.is_empty() {
        return Err(LexError { what: "template literal", line });
    }
    Ok(tokens)
}

/// 为每个括号 Token 计算配对位置；括号不平衡时报错
pub fn match_brackets(tokens: &[Token]) -> Result<Vec<Option<usize>>, LexError> {
    let mut matching = vec![None; tokens.len()];
    let mut stack: Vec<(usize, &str)> = Vec::new();
    for (idx, tok) in tokens.iter().enumerate() {
        if tok.kind != TokenKind::Punct {
            continue;
        }
        match tok.text.as_str() {
            "(" | "[" | "{" => stack.push((idx, tok.text.as_str())),
            ")" | "]" | "}" => {
                let expected = match tok.text.as_str() {
                    ")" => "(",
                    "]" => "[",
                    _ => "{",
                };
                match stack.pop() {
                    Some((open, text)) if text == expected => {
                        matching[open] = Some(idx);
                        matching[idx] = Some(open);
                    }
                    _ => return Err(LexError { what: "bracket", line: tok.line }),
                }
            }
            _ => {}
        }
    }
    if let Some((open, _)) = stack.pop() {
        return Err(LexError { what: "bracket", line: tokens[open].line });
    }
    Ok(matching)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<String> {
        tokenize(src).unwrap().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_basic_tokens_and_comments() {
        let tokens = tokenize("// hello\nexport function f(a: number) => {}").unwrap();
        assert_eq!(tokens[0].text, "export");
        assert_eq!(tokens[0].comments.len(), 1);
        assert_eq!(tokens[0].comments[0].body(), "hello");
        assert!(tokens[0].newline_before);
        assert!(tokens.iter().any(|t| t.is_punct("=>")));
    }

    #[test]
    fn test_regex_vs_division() {
        assert_eq!(texts("a / b / c"), vec!["a", "/", "b", "/", "c"]);
        let toks = tokenize("const r = /[a/]+\"/g;").unwrap();
        assert_eq!(toks[3].kind, TokenKind::Regex);
        assert_eq!(toks[3].text, "/[a/]+\"/g");
    }

    #[test]
    fn test_template_with_substitution() {
        let toks = tokenize("`a ${(e as Error).message} b`").unwrap();
        assert_eq!(toks[0].kind, TokenKind::TemplateHead);
        assert!(toks.iter().any(|t| t.text == "as"));
        assert_eq!(toks.last().unwrap().kind, TokenKind::Template);
        assert_eq!(toks.last().unwrap().text, "} b`");
    }

    #[test]
    fn test_nested_braces_inside_template() {
        let toks = tokenize("`${ f({a: 1}) }`").unwrap();
        assert_eq!(toks.last().unwrap().text, "}`");
        assert!(match_brackets(&toks).is_ok());
    }

    #[test]
    fn test_jsdoc_body() {
        let toks = tokenize("/**\n * @name Demo\n * line two\n */\nlet x = 1;").unwrap();
        let c = &toks[0].comments[0];
        assert!(c.is_doc());
        assert_eq!(c.body(), "@name Demo\nline two");
        assert_eq!(toks[0].line, 5);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("let s = \"abc\nlet t = 1;").unwrap_err();
        assert_eq!(err, LexError { what: "string", line: 1 });
    }

    #[test]
    fn test_unbalanced_brackets() {
        let toks = tokenize("function f() { if (x) { }").unwrap();
        assert_eq!(match_brackets(&toks).unwrap_err().what, "bracket");
    }

    #[test]
    fn test_optional_chaining_vs_ternary() {
        assert_eq!(texts("a?.b"), vec!["a", "?.", "b"]);
        assert_eq!(texts("a?.5:1"), vec!["a", "?", ".5", ":", "1"]);
    }
}
