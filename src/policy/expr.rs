//! Restricted boolean expression language for policy conditions.
//!
//! Conditions are parsed once into a typed AST and evaluated against a fixed
//! set of facts. There is no function call, attribute access or arbitrary
//! code path: only comparisons, membership tests and boolean connectives.
//!
//! ```text
//! expr       := or
//! or         := and (("or" | "||") and)*
//! and        := unary (("and" | "&&") unary)*
//! unary      := ("not" | "!") unary | comparison
//! comparison := primary [cmp primary | ["not"] "in" "[" literal ("," literal)* "]"]
//! primary    := "(" expr ")" | literal | fact
//! fact       := ident | "metrics" "." ident | "metrics" "[" string "]"
//! ```

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Compile-time problems with a condition
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("Unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Unknown fact: {0}")]
    UnknownFact(String),

    #[error("Type error: {0}")]
    Type(String),
}

/// Runtime problems evaluating a compiled condition
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Metric '{0}' is not available")]
    MissingMetric(String),
}

// ============================================================================
// Values and facts
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    fn ty(&self) -> Type {
        match self {
            Value::Number(_) => Type::Number,
            Value::Str(_) => Type::Str,
            Value::Bool(_) => Type::Bool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Number,
    Str,
    Bool,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Number => write!(f, "number"),
            Type::Str => write!(f, "string"),
            Type::Bool => write!(f, "bool"),
        }
    }
}

/// A named input a condition may read
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    Label,
    Confidence,
    Metric(String),
    IsNight,
    IsDay,
    PrivacyMode,
    CurrentHour,
}

impl Fact {
    fn from_ident(name: &str) -> Option<Fact> {
        Some(match name {
            "label" | "current_event_label" => Fact::Label,
            "confidence" | "current_confidence" => Fact::Confidence,
            "rms" | "flux" | "dbspl" => Fact::Metric(name.to_string()),
            "is_night" => Fact::IsNight,
            "is_day" => Fact::IsDay,
            "privacy_mode" | "privacy_mode_active" => Fact::PrivacyMode,
            "current_hour" | "hour" => Fact::CurrentHour,
            _ => return None,
        })
    }

    fn ty(&self) -> Type {
        match self {
            Fact::Label => Type::Str,
            Fact::Confidence | Fact::Metric(_) | Fact::CurrentHour => Type::Number,
            Fact::IsNight | Fact::IsDay | Fact::PrivacyMode => Type::Bool,
        }
    }
}

/// Snapshot of everything a condition can see in one cycle
#[derive(Debug, Clone, Copy)]
pub struct Facts<'a> {
    pub label: &'a str,
    pub confidence: f64,
    pub metrics: &'a HashMap<String, f64>,
    pub is_night: bool,
    pub privacy_mode: bool,
    pub current_hour: u32,
}

impl Facts<'_> {
    fn resolve(&self, fact: &Fact) -> Result<Value, EvalError> {
        Ok(match fact {
            Fact::Label => Value::Str(self.label.to_string()),
            Fact::Confidence => Value::Number(self.confidence),
            Fact::Metric(key) => Value::Number(
                self.metrics
                    .get(key)
                    .copied()
                    .ok_or_else(|| EvalError::MissingMetric(key.clone()))?,
            ),
            Fact::IsNight => Value::Bool(self.is_night),
            Fact::IsDay => Value::Bool(!self.is_night),
            Fact::PrivacyMode => Value::Bool(self.privacy_mode),
            Fact::CurrentHour => Value::Number(self.current_hour as f64),
        })
    }
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn is_ordering(self) -> bool {
        !matches!(self, CmpOp::Eq | CmpOp::Ne)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Fact(Fact),
}

impl Operand {
    fn ty(&self) -> Type {
        match self {
            Operand::Literal(v) => v.ty(),
            Operand::Fact(f) => f.ty(),
        }
    }

    fn value(&self, facts: &Facts<'_>) -> Result<Value, EvalError> {
        match self {
            Operand::Literal(v) => Ok(v.clone()),
            Operand::Fact(f) => facts.resolve(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        op: CmpOp,
        left: Operand,
        right: Operand,
    },
    In {
        operand: Operand,
        list: Vec<Value>,
        negated: bool,
    },
    /// A bare boolean fact or literal
    Truth(Operand),
}

impl Expr {
    /// Parse and type-check a condition
    pub fn compile(source: &str) -> Result<Expr, ExprError> {
        let tokens = lex(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(ExprError::Syntax(format!("unexpected trailing {}", tok)));
        }
        expr.check()?;
        Ok(expr)
    }

    fn check(&self) -> Result<(), ExprError> {
        match self {
            Expr::Or(a, b) | Expr::And(a, b) => {
                a.check()?;
                b.check()
            }
            Expr::Not(inner) => inner.check(),
            Expr::Compare { op, left, right } => {
                let (lt, rt) = (left.ty(), right.ty());
                if lt != rt {
                    return Err(ExprError::Type(format!("cannot compare {} with {}", lt, rt)));
                }
                if op.is_ordering() && lt != Type::Number {
                    return Err(ExprError::Type(format!("ordering comparison on {}", lt)));
                }
                Ok(())
            }
            Expr::In { operand, list, .. } => {
                let ty = operand.ty();
                match list.iter().find(|v| v.ty() != ty) {
                    Some(v) => Err(ExprError::Type(format!(
                        "list item of type {} tested against {}",
                        v.ty(),
                        ty
                    ))),
                    None => Ok(()),
                }
            }
            Expr::Truth(operand) => match operand.ty() {
                Type::Bool => Ok(()),
                other => Err(ExprError::Type(format!("expected bool, found {}", other))),
            },
        }
    }

    pub fn eval(&self, facts: &Facts<'_>) -> Result<bool, EvalError> {
        match self {
            Expr::Or(a, b) => Ok(a.eval(facts)? || b.eval(facts)?),
            Expr::And(a, b) => Ok(a.eval(facts)? && b.eval(facts)?),
            Expr::Not(inner) => Ok(!inner.eval(facts)?),
            Expr::Compare { op, left, right } => {
                let (l, r) = (left.value(facts)?, right.value(facts)?);
                Ok(compare(*op, &l, &r))
            }
            Expr::In {
                operand,
                list,
                negated,
            } => {
                let value = operand.value(facts)?;
                Ok(list.contains(&value) != *negated)
            }
            Expr::Truth(operand) => Ok(matches!(operand.value(facts)?, Value::Bool(true))),
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        },
        _ => match op {
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
            // Rejected at compile time
            _ => false,
        },
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    In,
    True,
    False,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Str(s) => write!(f, "string '{}'", s),
            Token::Ident(i) => write!(f, "'{}'", i),
            Token::Cmp(op) => write!(f, "operator {:?}", op),
            other => write!(f, "{:?}", other),
        }
    }
}

fn lex(source: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            c if c.is_whitespace() => i += 1,
            '(' => push(&mut tokens, Token::LParen, &mut i, 1),
            ')' => push(&mut tokens, Token::RParen, &mut i, 1),
            '[' => push(&mut tokens, Token::LBracket, &mut i, 1),
            ']' => push(&mut tokens, Token::RBracket, &mut i, 1),
            ',' => push(&mut tokens, Token::Comma, &mut i, 1),
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                push(&mut tokens, Token::Dot, &mut i, 1)
            }
            '=' if next == Some('=') => push(&mut tokens, Token::Cmp(CmpOp::Eq), &mut i, 2),
            '!' if next == Some('=') => push(&mut tokens, Token::Cmp(CmpOp::Ne), &mut i, 2),
            '!' => push(&mut tokens, Token::Not, &mut i, 1),
            '<' if next == Some('=') => push(&mut tokens, Token::Cmp(CmpOp::Le), &mut i, 2),
            '<' => push(&mut tokens, Token::Cmp(CmpOp::Lt), &mut i, 1),
            '>' if next == Some('=') => push(&mut tokens, Token::Cmp(CmpOp::Ge), &mut i, 2),
            '>' => push(&mut tokens, Token::Cmp(CmpOp::Gt), &mut i, 1),
            '&' if next == Some('&') => push(&mut tokens, Token::And, &mut i, 2),
            '|' if next == Some('|') => push(&mut tokens, Token::Or, &mut i, 2),
            '\'' | '"' => {
                let start = i;
                let quote = c;
                i += 1;
                let mut value = String::new();
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => break,
                        Some(&ch) => value.push(ch),
                        None => return Err(ExprError::UnterminatedString(start)),
                    }
                    i += 1;
                }
                i += 1;
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit()
                || (c == '.' && next.is_some_and(|n| n.is_ascii_digit()))
                || (c == '-' && next.is_some_and(|n| n.is_ascii_digit() || n == '.')) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<f64>().map_err(|_| {
                    ExprError::Syntax(format!("invalid number '{}'", text))
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" | "AND" => Token::And,
                    "or" | "OR" => Token::Or,
                    "not" | "NOT" => Token::Not,
                    "in" | "IN" => Token::In,
                    "true" | "True" | "TRUE" => Token::True,
                    "false" | "False" | "FALSE" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(ExprError::UnexpectedChar { ch: other, pos: i }),
        }
    }

    Ok(tokens)
}

fn push(tokens: &mut Vec<Token>, token: Token, i: &mut usize, width: usize) {
    tokens.push(token);
    *i += width;
}

// ============================================================================
// Parser
// ============================================================================

/// Deepest AST the parser will build. Checking and evaluation recurse over
/// the tree, so this also bounds their stack use.
const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(ExprError::Syntax(format!("expected {}, found {}", expected, tok))),
            None => Err(ExprError::Syntax(format!("expected {}, found end of input", expected))),
        }
    }

    /// One level deeper; chained `and`/`or` count a level per link
    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::Syntax(format!(
                "expression nested too deeply (limit {})",
                MAX_DEPTH
            )));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let base = self.depth;
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            self.descend()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            self.descend()?;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_primary()?;

        match self.peek().cloned() {
            Some(Token::Cmp(op)) => {
                self.next();
                let left = into_operand(left)?;
                let right = into_operand(self.parse_primary()?)?;
                Ok(Expr::Compare { op, left, right })
            }
            Some(Token::In) => {
                self.next();
                let list = self.parse_list()?;
                Ok(Expr::In {
                    operand: into_operand(left)?,
                    list,
                    negated: false,
                })
            }
            Some(Token::Not) if self.peek_at(1) == Some(&Token::In) => {
                self.next();
                self.next();
                let list = self.parse_list()?;
                Ok(Expr::In {
                    operand: into_operand(left)?,
                    list,
                    negated: true,
                })
            }
            _ => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Number(n)) => Ok(Expr::Truth(Operand::Literal(Value::Number(n)))),
            Some(Token::Str(s)) => Ok(Expr::Truth(Operand::Literal(Value::Str(s)))),
            Some(Token::True) => Ok(Expr::Truth(Operand::Literal(Value::Bool(true)))),
            Some(Token::False) => Ok(Expr::Truth(Operand::Literal(Value::Bool(false)))),
            Some(Token::Ident(name)) => Ok(Expr::Truth(Operand::Fact(self.parse_fact(name)?))),
            Some(tok) => Err(ExprError::Syntax(format!("unexpected {}", tok))),
            None => Err(ExprError::Syntax("unexpected end of input".to_string())),
        }
    }

    fn parse_fact(&mut self, name: String) -> Result<Fact, ExprError> {
        if name == "metrics" {
            let key = match self.next() {
                Some(Token::Dot) => match self.next() {
                    Some(Token::Ident(key)) => key,
                    _ => return Err(ExprError::Syntax("expected metric name after '.'".into())),
                },
                Some(Token::LBracket) => {
                    let key = match self.next() {
                        Some(Token::Str(key)) => key,
                        _ => return Err(ExprError::Syntax("expected quoted metric name".into())),
                    };
                    self.expect(Token::RBracket)?;
                    key
                }
                _ => return Err(ExprError::Syntax("expected '.' or '[' after metrics".into())),
            };
            return Ok(Fact::Metric(key));
        }

        Fact::from_ident(&name).ok_or(ExprError::UnknownFact(name))
    }

    fn parse_list(&mut self) -> Result<Vec<Value>, ExprError> {
        self.expect(Token::LBracket)?;
        let mut items = Vec::new();

        if self.peek() == Some(&Token::RBracket) {
            self.next();
            return Ok(items);
        }

        loop {
            let value = match self.next() {
                Some(Token::Number(n)) => Value::Number(n),
                Some(Token::Str(s)) => Value::Str(s),
                Some(Token::True) => Value::Bool(true),
                Some(Token::False) => Value::Bool(false),
                Some(tok) => return Err(ExprError::Syntax(format!("list items must be literals, found {}", tok))),
                None => return Err(ExprError::Syntax("unterminated list".to_string())),
            };
            items.push(value);

            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => break,
                _ => return Err(ExprError::Syntax("expected ',' or ']' in list".to_string())),
            }
        }

        Ok(items)
    }
}

fn into_operand(expr: Expr) -> Result<Operand, ExprError> {
    match expr {
        Expr::Truth(operand) => Ok(operand),
        _ => Err(ExprError::Syntax(
            "comparison operands must be a fact or literal".to_string(),
        )),
    }
}
