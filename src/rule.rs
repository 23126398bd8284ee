//! Sandboxed bulk-edit rules.
//!
//! Operator-supplied rule bodies are never handed to a general-purpose
//! evaluator. They are tokenized and parsed into a small whitelisted AST
//! (comparisons, boolean logic, field access, a fixed set of builtins) and
//! interpreted against `(node, log, path)`. Anything outside the grammar is
//! rejected at parse time with `MalformedRule`.
//!
//! Select rules are expressions returning a boolean, optionally prefixed with
//! `return`:
//!
//! ```text
//! return $node === 'Leg'
//! contains(lower($node.title), 'intro') && $node.visible
//! ```
//!
//! Edit rules are `;`-separated statements:
//!
//! ```text
//! $node.text = upper($node.text); log($path)
//! delete $node.draft
//! ```

use serde_json::{json, Value};

use crate::error::{EngineError, Result};

/// Accumulated plain-text log a rule run hands back to the operator.
#[derive(Debug, Default)]
pub struct RuleLog {
    lines: Vec<String>,
}

impl RuleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_text(self) -> String {
        self.lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    /// `$node`
    Node,
    /// `$path` — the dotted location of the node under evaluation.
    Path,
    Literal(Value),
    Field(Box<Expr>, String),
    Index(Box<Expr>, usize),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Builtin, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// The only callables rule text may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Contains,
    StartsWith,
    Lower,
    Upper,
    Len,
    Matches,
    Log,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Builtin> {
        match name {
            "contains" => Some(Builtin::Contains),
            "startsWith" | "starts_with" => Some(Builtin::StartsWith),
            "lower" => Some(Builtin::Lower),
            "upper" => Some(Builtin::Upper),
            "len" => Some(Builtin::Len),
            "matches" => Some(Builtin::Matches),
            "log" => Some(Builtin::Log),
            _ => None,
        }
    }
}

/// One step of an assignment/delete target below `$node`.
#[derive(Debug, Clone, PartialEq)]
enum Accessor {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    /// `$node.a.b = expr` (empty target replaces the node itself)
    Assign { target: Vec<Accessor>, value: Expr },
    /// `delete $node.a.b`
    Delete { target: Vec<Accessor> },
    /// A bare expression statement, e.g. `log(...)`.
    Expr(Expr),
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    Null,
    Return,
    Delete,
    Node,
    Path,
    Dot,
    Comma,
    Semi,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Minus,
}

fn malformed(msg: impl Into<String>) -> EngineError {
    EngineError::MalformedRule(msg.into())
}

fn lex(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Semi);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' => {
                // Accept =, ==, === — strict and loose equality are the same
                // operation in this grammar.
                let mut n = 1;
                while i + n < chars.len() && chars[i + n] == '=' && n < 3 {
                    n += 1;
                }
                tokens.push(if n == 1 { Token::Assign } else { Token::Eq });
                i += n;
            }
            '!' => {
                let mut n = 1;
                while i + n < chars.len() && chars[i + n] == '=' && n < 3 {
                    n += 1;
                }
                tokens.push(if n == 1 { Token::Not } else { Token::Ne });
                i += n;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(malformed("single '&' is not an operator"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(malformed("single '|' is not an operator"));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| malformed("unterminated escape in string"))?;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => return Err(malformed("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '$' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                match name.as_str() {
                    "node" => tokens.push(Token::Node),
                    "path" => tokens.push(Token::Path),
                    other => return Err(malformed(format!("unknown variable '${other}'"))),
                }
                i = end;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let num = raw
                    .parse::<f64>()
                    .map_err(|_| malformed(format!("bad number literal '{raw}'")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "return" => Token::Return,
                    "delete" => Token::Delete,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(malformed(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser (recursive descent, precedence: || < && < ==/!= < </<=/>/>= < unary)
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, expected: &Token) -> Result<()> {
        match self.bump() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(malformed(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expr(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            let right = self.and_expr()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.peek() == Some(&Token::And) {
            self.bump();
            let right = self.equality()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::Ne) => BinOp::Ne,
                _ => break,
            };
            self.bump();
            let right = self.comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => break,
            };
            self.bump();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Not) => {
                self.bump();
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Some(Token::Minus) => {
                self.bump();
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            _ => self.postfix(),
        }
    }

    /// Primary expression followed by any chain of `.name` / `[N]`.
    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    match self.bump() {
                        Some(Token::Ident(name)) => {
                            expr = Expr::Field(Box::new(expr), name);
                        }
                        other => {
                            return Err(malformed(format!(
                                "expected field name after '.', found {other:?}"
                            )))
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.bump();
                    let index = match self.bump() {
                        Some(Token::Num(n)) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                        other => {
                            return Err(malformed(format!(
                                "expected array index, found {other:?}"
                            )))
                        }
                    };
                    self.eat(&Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), index);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Node) => Ok(Expr::Node),
            Some(Token::Path) => Ok(Expr::Path),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(json!(n))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.eat(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let builtin = Builtin::lookup(&name)
                    .ok_or_else(|| malformed(format!("'{name}' is not a known helper")))?;
                self.eat(&Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.eat(&Token::RParen)?;
                Ok(Expr::Call(builtin, args))
            }
            other => Err(malformed(format!("unexpected token {other:?}"))),
        }
    }

    /// `$node(.name|[N])*` as an assignment/delete target.
    fn target(&mut self) -> Result<Vec<Accessor>> {
        self.eat(&Token::Node)?;
        let mut accessors = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    match self.bump() {
                        Some(Token::Ident(name)) => accessors.push(Accessor::Field(name)),
                        other => {
                            return Err(malformed(format!(
                                "expected field name in target, found {other:?}"
                            )))
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.bump();
                    let index = match self.bump() {
                        Some(Token::Num(n)) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                        other => {
                            return Err(malformed(format!(
                                "expected array index in target, found {other:?}"
                            )))
                        }
                    };
                    self.eat(&Token::RBracket)?;
                    accessors.push(Accessor::Index(index));
                }
                _ => break,
            }
        }
        Ok(accessors)
    }

    fn statement(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Delete) => {
                self.bump();
                let target = self.target()?;
                if target.is_empty() {
                    return Err(malformed("delete needs a field below $node"));
                }
                Ok(Stmt::Delete { target })
            }
            Some(Token::Node) => {
                // Could be an assignment target or a plain expression; decide
                // by looking for '=' after the access chain.
                let start = self.pos;
                let target = self.target()?;
                if self.peek() == Some(&Token::Assign) {
                    self.bump();
                    let value = self.expr()?;
                    Ok(Stmt::Assign { target, value })
                } else {
                    self.pos = start;
                    Ok(Stmt::Expr(self.expr()?))
                }
            }
            _ => Ok(Stmt::Expr(self.expr()?)),
        }
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn numbers(a: &Value, b: &Value) -> Option<(f64, f64)> {
    Some((a.as_f64()?, b.as_f64()?))
}

fn eval(expr: &Expr, node: &Value, path: &str, log: &mut RuleLog) -> Result<Value> {
    let fail = |msg: String| EngineError::RuleFailed {
        path: path.to_string(),
        message: msg,
    };
    match expr {
        Expr::Node => Ok(node.clone()),
        Expr::Path => Ok(Value::String(path.to_string())),
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Field(base, name) => {
            let base = eval(base, node, path, log)?;
            Ok(base.get(name).cloned().unwrap_or(Value::Null))
        }
        Expr::Index(base, index) => {
            let base = eval(base, node, path, log)?;
            Ok(base.get(index).cloned().unwrap_or(Value::Null))
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, node, path, log)?))),
        Expr::Neg(inner) => {
            let v = eval(inner, node, path, log)?;
            let n = v
                .as_f64()
                .ok_or_else(|| fail(format!("cannot negate {v}")))?;
            Ok(json!(-n))
        }
        Expr::Binary(op, left, right) => {
            match op {
                // Short-circuiting, like the boolean operators rules expect.
                BinOp::And => {
                    let l = eval(left, node, path, log)?;
                    if !truthy(&l) {
                        return Ok(Value::Bool(false));
                    }
                    let r = eval(right, node, path, log)?;
                    return Ok(Value::Bool(truthy(&r)));
                }
                BinOp::Or => {
                    let l = eval(left, node, path, log)?;
                    if truthy(&l) {
                        return Ok(Value::Bool(true));
                    }
                    let r = eval(right, node, path, log)?;
                    return Ok(Value::Bool(truthy(&r)));
                }
                _ => {}
            }
            let l = eval(left, node, path, log)?;
            let r = eval(right, node, path, log)?;
            let result = match op {
                BinOp::Eq => l == r,
                BinOp::Ne => l != r,
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    let ordering = if let (Some(ls), Some(rs)) = (l.as_str(), r.as_str()) {
                        ls.partial_cmp(rs)
                    } else if let Some((ln, rn)) = numbers(&l, &r) {
                        ln.partial_cmp(&rn)
                    } else {
                        return Err(fail(format!("cannot order {l} and {r}")));
                    };
                    let ordering =
                        ordering.ok_or_else(|| fail(format!("cannot order {l} and {r}")))?;
                    match op {
                        BinOp::Lt => ordering.is_lt(),
                        BinOp::Le => ordering.is_le(),
                        BinOp::Gt => ordering.is_gt(),
                        BinOp::Ge => ordering.is_ge(),
                        _ => unreachable!(),
                    }
                }
                BinOp::And | BinOp::Or => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        Expr::Call(builtin, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, node, path, log)?);
            }
            let arity = |n: usize| {
                if values.len() == n {
                    Ok(())
                } else {
                    Err(fail(format!(
                        "{builtin:?} takes {n} argument(s), got {}",
                        values.len()
                    )))
                }
            };
            match builtin {
                Builtin::Contains => {
                    arity(2)?;
                    let found = match &values[0] {
                        Value::String(s) => s.contains(&as_display(&values[1])),
                        Value::Array(items) => items.contains(&values[1]),
                        other => return Err(fail(format!("contains: unsupported value {other}"))),
                    };
                    Ok(Value::Bool(found))
                }
                Builtin::StartsWith => {
                    arity(2)?;
                    let s = values[0]
                        .as_str()
                        .ok_or_else(|| fail("startsWith: first argument must be a string".into()))?;
                    Ok(Value::Bool(s.starts_with(&as_display(&values[1]))))
                }
                Builtin::Lower => {
                    arity(1)?;
                    Ok(Value::String(as_display(&values[0]).to_lowercase()))
                }
                Builtin::Upper => {
                    arity(1)?;
                    Ok(Value::String(as_display(&values[0]).to_uppercase()))
                }
                Builtin::Len => {
                    arity(1)?;
                    let len = match &values[0] {
                        Value::String(s) => s.chars().count(),
                        Value::Array(items) => items.len(),
                        Value::Object(map) => map.len(),
                        other => return Err(fail(format!("len: unsupported value {other}"))),
                    };
                    Ok(json!(len))
                }
                Builtin::Matches => {
                    arity(2)?;
                    let s = values[0]
                        .as_str()
                        .ok_or_else(|| fail("matches: first argument must be a string".into()))?;
                    let pattern = values[1]
                        .as_str()
                        .ok_or_else(|| fail("matches: pattern must be a string".into()))?;
                    let re = regex::Regex::new(pattern)
                        .map_err(|e| fail(format!("matches: bad pattern: {e}")))?;
                    Ok(Value::Bool(re.is_match(s)))
                }
                Builtin::Log => {
                    for v in &values {
                        log.log(format!("[{path}] {}", as_display(v)));
                    }
                    Ok(Value::Null)
                }
            }
        }
    }
}

fn resolve_target<'a>(node: &'a mut Value, target: &[Accessor], path: &str) -> Result<&'a mut Value> {
    let mut current = node;
    for accessor in target {
        current = match accessor {
            Accessor::Field(name) => current.get_mut(name).ok_or_else(|| EngineError::RuleFailed {
                path: path.to_string(),
                message: format!("no field '{name}' on target"),
            })?,
            Accessor::Index(i) => current.get_mut(i).ok_or_else(|| EngineError::RuleFailed {
                path: path.to_string(),
                message: format!("no element [{i}] on target"),
            })?,
        };
    }
    Ok(current)
}

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// A parsed select predicate: `(node, log, path) -> bool`.
#[derive(Debug, Clone)]
pub struct SelectRule {
    expr: Expr,
}

impl SelectRule {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser::new(lex(text)?);
        if parser.peek() == Some(&Token::Return) {
            parser.bump();
        }
        let expr = parser.expr()?;
        if !parser.at_end() {
            return Err(malformed("trailing input after select expression"));
        }
        Ok(Self { expr })
    }

    pub fn eval(&self, node: &Value, path: &str, log: &mut RuleLog) -> Result<bool> {
        let value = eval(&self.expr, node, path, log)?;
        Ok(truthy(&value))
    }
}

/// A parsed edit action: `(node, log, path)` applied for side effect.
#[derive(Debug, Clone)]
pub struct EditRule {
    stmts: Vec<Stmt>,
}

impl EditRule {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser::new(lex(text)?);
        let mut stmts = Vec::new();
        loop {
            while parser.peek() == Some(&Token::Semi) {
                parser.bump();
            }
            if parser.at_end() {
                break;
            }
            stmts.push(parser.statement()?);
            if !parser.at_end() && parser.peek() != Some(&Token::Semi) {
                return Err(malformed("statements must be separated by ';'"));
            }
        }
        if stmts.is_empty() {
            return Err(malformed("edit rule contains no statement"));
        }
        Ok(Self { stmts })
    }

    pub fn apply(&self, node: &mut Value, path: &str, log: &mut RuleLog) -> Result<()> {
        for stmt in &self.stmts {
            match stmt {
                Stmt::Assign { target, value } => {
                    let new_value = eval(value, node, path, log)?;
                    match target.split_last() {
                        // Bare `$node = expr` replaces the node itself.
                        None => *node = new_value,
                        Some((last, parents)) => {
                            // Parents must exist; the last accessor may
                            // create a new object field.
                            let parent = resolve_target(node, parents, path)?;
                            match last {
                                Accessor::Field(name) => match parent {
                                    Value::Object(map) => {
                                        map.insert(name.clone(), new_value);
                                    }
                                    other => {
                                        return Err(EngineError::RuleFailed {
                                            path: path.to_string(),
                                            message: format!(
                                                "cannot set field '{name}' on {other}"
                                            ),
                                        })
                                    }
                                },
                                Accessor::Index(i) => {
                                    let slot = parent.get_mut(i).ok_or_else(|| {
                                        EngineError::RuleFailed {
                                            path: path.to_string(),
                                            message: format!("no element [{i}] on target"),
                                        }
                                    })?;
                                    *slot = new_value;
                                }
                            }
                        }
                    }
                }
                Stmt::Delete { target } => {
                    // The parser rejects a bare `delete $node`.
                    let Some((last, parents)) = target.split_last() else {
                        continue;
                    };
                    let parent = resolve_target(node, parents, path)?;
                    match last {
                        Accessor::Field(name) => {
                            if let Value::Object(map) = parent {
                                map.remove(name);
                            }
                        }
                        Accessor::Index(i) => {
                            if let Value::Array(items) = parent {
                                if *i < items.len() {
                                    items.remove(*i);
                                }
                            }
                        }
                    }
                }
                Stmt::Expr(expr) => {
                    eval(expr, node, path, log)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn select_rule_with_return_and_strict_equality() {
        let rule = SelectRule::parse("return $node === 'Leg'").unwrap();
        let mut log = RuleLog::new();
        assert!(rule.eval(&json!("Leg"), "a.b", &mut log).unwrap());
        assert!(!rule.eval(&json!("Arm"), "a.b", &mut log).unwrap());
    }

    #[test]
    fn select_rule_field_access_and_boolean_logic() {
        let rule =
            SelectRule::parse("contains(lower($node.title), 'intro') && !$node.archived").unwrap();
        let mut log = RuleLog::new();
        let node = json!({ "title": "Introduction", "archived": false });
        assert!(rule.eval(&node, "topic[0]", &mut log).unwrap());
        let node = json!({ "title": "Introduction", "archived": true });
        assert!(!rule.eval(&node, "topic[0]", &mut log).unwrap());
    }

    #[test]
    fn numeric_comparisons_order_numbers() {
        let rule = SelectRule::parse("$node.score >= 10 && $node.score < 20").unwrap();
        let mut log = RuleLog::new();
        assert!(rule.eval(&json!({ "score": 15 }), "x", &mut log).unwrap());
        assert!(!rule.eval(&json!({ "score": 20 }), "x", &mut log).unwrap());
    }

    #[test]
    fn non_whitelisted_constructs_are_rejected() {
        // Free function calls outside the builtin set.
        assert!(SelectRule::parse("eval('1')").is_err());
        // Unknown variables.
        assert!(SelectRule::parse("$process === 1").is_err());
        // Stray characters.
        assert!(SelectRule::parse("return $node === 'Leg' #").is_err());
        // Single & is not an operator.
        assert!(SelectRule::parse("$node & 1").is_err());
    }

    #[test]
    fn edit_rule_assignment_and_log() {
        let rule = EditRule::parse("$node.text = upper($node.text); log($path)").unwrap();
        let mut log = RuleLog::new();
        let mut node = json!({ "text": "leg" });
        rule.apply(&mut node, "topic[2].text", &mut log).unwrap();
        assert_eq!(node, json!({ "text": "LEG" }));
        assert_eq!(log.lines(), ["[topic[2].text] topic[2].text"]);
    }

    #[test]
    fn edit_rule_replaces_whole_node() {
        let rule = EditRule::parse("$node = 'replaced'").unwrap();
        let mut log = RuleLog::new();
        let mut node = json!({ "old": true });
        rule.apply(&mut node, "x", &mut log).unwrap();
        assert_eq!(node, json!("replaced"));
    }

    #[test]
    fn edit_rule_targets_reach_through_nested_accessors() {
        let rule =
            EditRule::parse("$node.meta.count = len($node.items); delete $node.meta.tmp").unwrap();
        let mut log = RuleLog::new();
        let mut node = json!({ "items": ["a", "b"], "meta": { "tmp": 1 } });
        rule.apply(&mut node, "x", &mut log).unwrap();
        assert_eq!(node, json!({ "items": ["a", "b"], "meta": { "count": 2 } }));

        // Indexed last accessor assigns in place.
        let rule = EditRule::parse("$node.items[1] = 'B'").unwrap();
        rule.apply(&mut node, "x", &mut log).unwrap();
        assert_eq!(node["items"], json!(["a", "B"]));
    }

    #[test]
    fn edit_rule_delete_removes_field() {
        let rule = EditRule::parse("delete $node.draft").unwrap();
        let mut log = RuleLog::new();
        let mut node = json!({ "draft": true, "title": "t" });
        rule.apply(&mut node, "x", &mut log).unwrap();
        assert_eq!(node, json!({ "title": "t" }));
    }

    #[test]
    fn missing_fields_resolve_to_null_in_expressions() {
        let rule = SelectRule::parse("$node.missing == null").unwrap();
        let mut log = RuleLog::new();
        assert!(rule.eval(&json!({}), "x", &mut log).unwrap());
    }

    #[test]
    fn rule_failure_carries_the_node_path() {
        let rule = SelectRule::parse("$node < 3").unwrap();
        let mut log = RuleLog::new();
        let err = rule
            .eval(&json!({ "not": "a number" }), "topic[1].x", &mut log)
            .unwrap_err();
        match err {
            crate::error::EngineError::RuleFailed { path, .. } => {
                assert_eq!(path, "topic[1].x")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
