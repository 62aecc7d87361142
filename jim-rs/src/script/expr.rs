//! Expression lexer, AST, parser and evaluator.
//!
//! Operator precedence (highest first):
//!
//! | Operators | Notes |
//! |-----------|-------|
//! | `-` `+` `~` `!` | unary |
//! | `**` | right-associative |
//! | `*` `/` `%` | integer `/` and `%` round toward negative infinity |
//! | `+` `-` | |
//! | `<<` `>>` `<<<` `>>>` | shifts and rotations |
//! | `<` `>` `<=` `>=` | numeric, else string comparison |
//! | `==` `!=` `=*` | `=*` is a glob match of left against right |
//! | `eq` `ne` | string comparison |
//! | `in` `ni` | list membership |
//! | `&` `^` `\|` | bitwise |
//! | `&&` `\|\|` | short-circuit |
//! | `?:` | right-associative |
//!
//! Operands are numbers, `true`/`false`-style booleans, `$var`, `[cmd]`,
//! `"quoted $subst"`, `{braced}` strings and `func(arg, …)` calls.
//!
//! The evaluator reaches variables and commands through [`ExprContext`],
//! so it has no dependency on the interpreter.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::glob::glob_match;

use super::error::{EvalResult, Exception};
use super::parse::{self, ParseError, Part, Scanner, SubstFlags};
use super::value::{parse_double, parse_int, Number, Value};

/// Stack headroom kept free before recursing into a subexpression.
const RED_ZONE: usize = 64 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

// ── ExprContext ──────────────────────────────────────────────────────────────

/// Services the evaluator needs from its host.
pub(crate) trait ExprContext {
    /// Value of a variable, dict element, nested expression or command.
    fn substitute(&mut self, part: &Part) -> EvalResult;

    /// Concatenated value of a quoted operand.
    fn substitute_parts(&mut self, parts: &[Part]) -> EvalResult;

    /// Uniform double in `[0, 1)`.
    fn rand(&mut self) -> f64;

    fn srand(&mut self, seed: i64);
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprErrorKind {
    #[error("missing operand")]
    MissingOperand,
    #[error("missing operator")]
    MissingOperator,
    #[error("unexpected close parenthesis")]
    UnexpectedCloseParen,
    #[error("unexpected comma")]
    UnexpectedComma,
    #[error("missing close parenthesis")]
    MissingCloseParen,
    #[error("missing \":\" in ternary expression")]
    MissingColon,
    #[error("function \"{0}\" requires parentheses")]
    FunctionWithoutParens(String),
    #[error("wrong # args for math function \"{0}\"")]
    WrongArgCount(String),
    #[error("unknown math function \"{0}\"")]
    UnknownFunction(String),
    #[error("invalid bareword \"{0}\"")]
    Bareword(String),
    #[error("invalid number \"{0}\"")]
    BadNumber(String),
    #[error("{0}")]
    Parse(ParseError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("syntax error in expression \"{expr}\": {kind}")]
pub struct ExprError {
    pub expr: String,
    pub kind: ExprErrorKind,
}

impl From<ParseError> for ExprErrorKind {
    fn from(e: ParseError) -> Self {
        ExprErrorKind::Parse(e)
    }
}

// ── AST ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Pow,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    RotL,
    RotR,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    Match,
    StrEq,
    StrNe,
    In,
    Ni,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Pow => "**",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::RotL => "<<<",
            BinOp::RotR => ">>>",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Match => "=*",
            BinOp::StrEq => "eq",
            BinOp::StrNe => "ne",
            BinOp::In => "in",
            BinOp::Ni => "ni",
            BinOp::BitAnd => "&",
            BinOp::BitXor => "^",
            BinOp::BitOr => "|",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    /// Binding strength and right-associativity.
    fn precedence(self) -> (u8, bool) {
        match self {
            BinOp::Pow => (13, true),
            BinOp::Mul | BinOp::Div | BinOp::Mod => (12, false),
            BinOp::Add | BinOp::Sub => (11, false),
            BinOp::Shl | BinOp::Shr | BinOp::RotL | BinOp::RotR => (10, false),
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => (9, false),
            BinOp::Eq | BinOp::Ne | BinOp::Match => (8, false),
            BinOp::StrEq | BinOp::StrNe => (7, false),
            BinOp::In | BinOp::Ni => (6, false),
            BinOp::BitAnd => (5, false),
            BinOp::BitXor => (4, false),
            BinOp::BitOr => (3, false),
            BinOp::And => (2, false),
            BinOp::Or => (1, false),
        }
    }

    fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnOp {
    Neg,
    Plus,
    BitNot,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MathFunc {
    Abs,
    Int,
    Wide,
    Double,
    Round,
    Bool,
    Sqrt,
    Exp,
    Log,
    Log10,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Ceil,
    Floor,
    Pow,
    Atan2,
    Fmod,
    Hypot,
    IsNan,
    IsInf,
    Min,
    Max,
    Rand,
    Srand,
}

const MATH_FUNCS: &[(&str, MathFunc)] = &[
    ("abs", MathFunc::Abs),
    ("int", MathFunc::Int),
    ("wide", MathFunc::Wide),
    ("double", MathFunc::Double),
    ("round", MathFunc::Round),
    ("bool", MathFunc::Bool),
    ("sqrt", MathFunc::Sqrt),
    ("exp", MathFunc::Exp),
    ("log", MathFunc::Log),
    ("log10", MathFunc::Log10),
    ("sin", MathFunc::Sin),
    ("cos", MathFunc::Cos),
    ("tan", MathFunc::Tan),
    ("asin", MathFunc::Asin),
    ("acos", MathFunc::Acos),
    ("atan", MathFunc::Atan),
    ("sinh", MathFunc::Sinh),
    ("cosh", MathFunc::Cosh),
    ("tanh", MathFunc::Tanh),
    ("ceil", MathFunc::Ceil),
    ("floor", MathFunc::Floor),
    ("pow", MathFunc::Pow),
    ("atan2", MathFunc::Atan2),
    ("fmod", MathFunc::Fmod),
    ("hypot", MathFunc::Hypot),
    ("isnan", MathFunc::IsNan),
    ("isinf", MathFunc::IsInf),
    ("min", MathFunc::Min),
    ("max", MathFunc::Max),
    ("rand", MathFunc::Rand),
    ("srand", MathFunc::Srand),
];

impl MathFunc {
    fn lookup(name: &str) -> Option<MathFunc> {
        MATH_FUNCS.iter().find(|(n, _)| *n == name).map(|&(_, f)| f)
    }

    /// Accepted argument counts, `None` meaning unbounded.
    fn arity(self) -> (usize, Option<usize>) {
        match self {
            MathFunc::Rand => (0, Some(0)),
            MathFunc::Pow | MathFunc::Atan2 | MathFunc::Fmod | MathFunc::Hypot => (2, Some(2)),
            MathFunc::Min | MathFunc::Max => (1, None),
            _ => (1, Some(1)),
        }
    }

    fn unary_float(self) -> Option<fn(f64) -> f64> {
        let f: fn(f64) -> f64 = match self {
            MathFunc::Sqrt => f64::sqrt,
            MathFunc::Exp => f64::exp,
            MathFunc::Log => f64::ln,
            MathFunc::Log10 => f64::log10,
            MathFunc::Sin => f64::sin,
            MathFunc::Cos => f64::cos,
            MathFunc::Tan => f64::tan,
            MathFunc::Asin => f64::asin,
            MathFunc::Acos => f64::acos,
            MathFunc::Atan => f64::atan,
            MathFunc::Sinh => f64::sinh,
            MathFunc::Cosh => f64::cosh,
            MathFunc::Tanh => f64::tanh,
            MathFunc::Ceil => f64::ceil,
            MathFunc::Floor => f64::floor,
            _ => return None,
        };
        Some(f)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ExprNode {
    Literal(Value),
    Leaf(Part),
    Quoted(Rc<[Part]>),
    Unary(UnOp, Box<ExprNode>),
    Binary(BinOp, Box<ExprNode>, Box<ExprNode>),
    Ternary(Box<ExprNode>, Box<ExprNode>, Box<ExprNode>),
    Call(MathFunc, Vec<ExprNode>),
}

/// A parsed expression, cached on the value it was parsed from.
#[derive(Debug)]
pub(crate) struct ExprTree {
    root: ExprNode,
}

// ── Lexer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Token {
    Operand(ExprNode),
    Func(String),
    Bin(BinOp),
    Not,
    BitNot,
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    Eof,
}

const OPERATORS: &[(&str, BinOp)] = &[
    ("<<<", BinOp::RotL),
    (">>>", BinOp::RotR),
    ("**", BinOp::Pow),
    ("<<", BinOp::Shl),
    (">>", BinOp::Shr),
    ("<=", BinOp::Le),
    (">=", BinOp::Ge),
    ("==", BinOp::Eq),
    ("!=", BinOp::Ne),
    ("=*", BinOp::Match),
    ("&&", BinOp::And),
    ("||", BinOp::Or),
    ("*", BinOp::Mul),
    ("/", BinOp::Div),
    ("%", BinOp::Mod),
    ("+", BinOp::Add),
    ("-", BinOp::Sub),
    ("<", BinOp::Lt),
    (">", BinOp::Gt),
    ("&", BinOp::BitAnd),
    ("^", BinOp::BitXor),
    ("|", BinOp::BitOr),
];

struct Lexer<'a> {
    src: &'a str,
    sc: Scanner<'a>,
    file: Rc<str>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            src,
            sc: Scanner::new(src, 1),
            file: Rc::from(""),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.sc.pos..]
    }

    fn skip_ws(&mut self) {
        while matches!(self.sc.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.sc.bump();
        }
    }

    fn read_number(&mut self) -> Result<Token, ExprErrorKind> {
        let begin = self.sc.pos;
        let rest = self.rest().as_bytes();
        let radix_prefix = rest.len() > 2
            && rest[0] == b'0'
            && matches!(rest[1], b'x' | b'X' | b'o' | b'O' | b'b' | b'B');
        if radix_prefix {
            self.sc.bump();
            self.sc.bump();
            while matches!(self.sc.peek(), Some(c) if c.is_ascii_alphanumeric()) {
                self.sc.bump();
            }
        } else {
            while matches!(self.sc.peek(), Some(c) if c.is_ascii_digit() || c == b'.') {
                self.sc.bump();
            }
            if matches!(self.sc.peek(), Some(b'e' | b'E')) {
                let sign = usize::from(matches!(self.sc.peek_at(1), Some(b'+' | b'-')));
                if matches!(self.sc.peek_at(1 + sign), Some(c) if c.is_ascii_digit()) {
                    for _ in 0..=sign {
                        self.sc.bump();
                    }
                    while matches!(self.sc.peek(), Some(c) if c.is_ascii_digit()) {
                        self.sc.bump();
                    }
                }
            }
        }
        let text = self.sc.slice(begin, self.sc.pos);
        let value = if let Some(n) = parse_int(text) {
            Value::from(n)
        } else if let Some(x) = parse_double(text) {
            Value::from(x)
        } else {
            return Err(ExprErrorKind::BadNumber(text.to_string()));
        };
        if matches!(self.sc.peek(), Some(c) if c.is_ascii_alphabetic() || c == b'_') {
            return Err(ExprErrorKind::BadNumber(format!(
                "{text}{}",
                self.rest().chars().take_while(|c| c.is_alphanumeric()).collect::<String>()
            )));
        }
        Ok(Token::Operand(ExprNode::Literal(value)))
    }

    fn read_word(&mut self) -> Result<Token, ExprErrorKind> {
        let begin = self.sc.pos;
        while matches!(self.sc.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.sc.bump();
        }
        let word = self.sc.slice(begin, self.sc.pos);
        let next = self.rest().trim_start();
        if next.starts_with('(') {
            return Ok(Token::Func(word.to_string()));
        }
        match word {
            "eq" => return Ok(Token::Bin(BinOp::StrEq)),
            "ne" => return Ok(Token::Bin(BinOp::StrNe)),
            "in" => return Ok(Token::Bin(BinOp::In)),
            "ni" => return Ok(Token::Bin(BinOp::Ni)),
            _ => {}
        }
        if let Some(b) = super::value::parse_bool(word) {
            return Ok(Token::Operand(ExprNode::Literal(Value::from(b))));
        }
        if let Some(x) = parse_double(word) {
            return Ok(Token::Operand(ExprNode::Literal(Value::from(x))));
        }
        if MathFunc::lookup(word).is_some() {
            return Err(ExprErrorKind::FunctionWithoutParens(word.to_string()));
        }
        Err(ExprErrorKind::Bareword(word.to_string()))
    }

    fn next_token(&mut self) -> Result<Token, ExprErrorKind> {
        self.skip_ws();
        let Some(c) = self.sc.peek() else {
            return Ok(Token::Eof);
        };
        let line = self.sc.line;
        let tok = match c {
            b'0'..=b'9' => return self.read_number(),
            b'.' if matches!(self.sc.peek_at(1), Some(d) if d.is_ascii_digit()) => {
                return self.read_number()
            }
            b'$' => match self.sc.variable()? {
                Some((kind, text)) => {
                    let part = parse::var_part(kind, text, line, &self.file)?;
                    Token::Operand(ExprNode::Leaf(part))
                }
                None => return Err(ExprErrorKind::Bareword("$".into())),
            },
            b'[' => {
                let script = self.sc.bracketed()?;
                Token::Operand(ExprNode::Leaf(Part::Command(Value::from(script))))
            }
            b'{' => {
                let text = self.sc.braced()?;
                Token::Operand(ExprNode::Literal(Value::from(text)))
            }
            b'"' => {
                let begin = self.sc.pos;
                self.sc.skip_quoted()?;
                let inner = self.sc.slice(begin + 1, self.sc.pos - 1);
                let parts = parse::parse_subst(inner, SubstFlags::ALL, line, &self.file)?;
                match &parts[..] {
                    [Part::Literal(v)] => Token::Operand(ExprNode::Literal(v.clone())),
                    _ => Token::Operand(ExprNode::Quoted(parts.into())),
                }
            }
            b'(' => {
                self.sc.bump();
                Token::LParen
            }
            b')' => {
                self.sc.bump();
                Token::RParen
            }
            b',' => {
                self.sc.bump();
                Token::Comma
            }
            b'?' => {
                self.sc.bump();
                Token::Question
            }
            b':' => {
                self.sc.bump();
                Token::Colon
            }
            b'~' => {
                self.sc.bump();
                Token::BitNot
            }
            b'!' if self.sc.peek_at(1) != Some(b'=') => {
                self.sc.bump();
                Token::Not
            }
            c if c.is_ascii_alphabetic() || c == b'_' => return self.read_word(),
            _ => {
                let rest = self.rest();
                let Some(&(sym, op)) = OPERATORS.iter().find(|(sym, _)| rest.starts_with(sym))
                else {
                    let bad: String = rest.chars().take(1).collect();
                    return Err(ExprErrorKind::Bareword(bad));
                };
                for _ in 0..sym.len() {
                    self.sc.bump();
                }
                Token::Bin(op)
            }
        };
        Ok(tok)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ExprErrorKind> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = matches!(tok, Token::Eof);
            tokens.push(tok);
            if done {
                return Ok(tokens);
            }
        }
    }
}

// ── Parser ───────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn parse_ternary(&mut self) -> Result<ExprNode, ExprErrorKind> {
        let cond = self.parse_binary(1)?;
        if !matches!(self.peek(), Token::Question) {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_ternary()?;
        if !matches!(self.advance(), Token::Colon) {
            return Err(ExprErrorKind::MissingColon);
        }
        let otherwise = self.parse_ternary()?;
        Ok(ExprNode::Ternary(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<ExprNode, ExprErrorKind> {
        let mut lhs = self.parse_unary()?;
        while let Token::Bin(op) = *self.peek() {
            let (prec, right) = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(if right { prec } else { prec + 1 })?;
            lhs = ExprNode::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<ExprNode, ExprErrorKind> {
        let op = match self.peek() {
            Token::Bin(BinOp::Sub) => UnOp::Neg,
            Token::Bin(BinOp::Add) => UnOp::Plus,
            Token::Not => UnOp::Not,
            Token::BitNot => UnOp::BitNot,
            _ => return self.parse_primary(),
        };
        self.advance();
        let operand = stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.parse_unary())?;
        Ok(ExprNode::Unary(op, Box::new(operand)))
    }

    fn parse_primary(&mut self) -> Result<ExprNode, ExprErrorKind> {
        match self.advance() {
            Token::Operand(node) => Ok(node),
            Token::LParen => {
                let inner = stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.parse_ternary())?;
                match self.advance() {
                    Token::RParen => Ok(inner),
                    Token::Comma => Err(ExprErrorKind::UnexpectedComma),
                    _ => Err(ExprErrorKind::MissingCloseParen),
                }
            }
            Token::Func(name) => self.parse_call(name),
            Token::RParen => Err(ExprErrorKind::UnexpectedCloseParen),
            Token::Comma => Err(ExprErrorKind::UnexpectedComma),
            _ => Err(ExprErrorKind::MissingOperand),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<ExprNode, ExprErrorKind> {
        let func = MathFunc::lookup(&name).ok_or_else(|| ExprErrorKind::UnknownFunction(name.clone()))?;
        self.advance(); // (
        let mut args = Vec::new();
        if matches!(self.peek(), Token::RParen) {
            self.advance();
        } else {
            loop {
                args.push(self.parse_ternary()?);
                match self.advance() {
                    Token::Comma => continue,
                    Token::RParen => break,
                    _ => return Err(ExprErrorKind::MissingCloseParen),
                }
            }
        }
        let (min, max) = func.arity();
        if args.len() < min || max.is_some_and(|m| args.len() > m) {
            return Err(ExprErrorKind::WrongArgCount(name));
        }
        Ok(ExprNode::Call(func, args))
    }
}

pub(crate) fn parse_expr(src: &str) -> Result<ExprTree, ExprError> {
    let wrap = |kind| ExprError {
        expr: src.to_string(),
        kind,
    };
    let tokens = Lexer::new(src).tokenize().map_err(wrap)?;
    let mut parser = Parser { tokens, pos: 0 };
    let root = parser.parse_ternary().map_err(wrap)?;
    match parser.peek() {
        Token::Eof => Ok(ExprTree { root }),
        Token::RParen => Err(wrap(ExprErrorKind::UnexpectedCloseParen)),
        Token::Comma => Err(wrap(ExprErrorKind::UnexpectedComma)),
        _ => Err(wrap(ExprErrorKind::MissingOperator)),
    }
}

// ── Evaluator ────────────────────────────────────────────────────────────────

/// Evaluates a parsed expression.
pub(crate) fn eval_expr(tree: &ExprTree, ctx: &mut dyn ExprContext) -> EvalResult {
    if let Some(result) = fast_path(&tree.root, ctx) {
        return result;
    }
    eval_node(&tree.root, ctx)
}

fn is_simple(node: &ExprNode) -> bool {
    matches!(node, ExprNode::Literal(_) | ExprNode::Leaf(Part::Var(_)))
}

fn simple_value(node: &ExprNode, ctx: &mut dyn ExprContext) -> EvalResult {
    match node {
        ExprNode::Literal(v) => Ok(v.clone()),
        ExprNode::Leaf(part) => ctx.substitute(part),
        _ => eval_node(node, ctx),
    }
}

/// Handles a lone variable and a comparison between variables and
/// literals without walking the general evaluator.
fn fast_path(root: &ExprNode, ctx: &mut dyn ExprContext) -> Option<EvalResult> {
    match root {
        ExprNode::Leaf(part @ Part::Var(_)) => Some(ctx.substitute(part)),
        ExprNode::Binary(op, l, r) if op.is_comparison() && is_simple(l) && is_simple(r) => {
            let result = simple_value(l, ctx).and_then(|a| {
                let b = simple_value(r, ctx)?;
                match (a.get_number(), b.get_number()) {
                    (Some(Number::Int(x)), Some(Number::Int(y))) => {
                        Ok(Value::from(ordering_holds(*op, Some(x.cmp(&y)))))
                    }
                    _ => apply_binary(*op, &a, &b),
                }
            });
            Some(result)
        }
        _ => None,
    }
}

fn eval_node(node: &ExprNode, ctx: &mut dyn ExprContext) -> EvalResult {
    match node {
        ExprNode::Literal(v) => Ok(v.clone()),
        ExprNode::Leaf(part) => ctx.substitute(part),
        ExprNode::Quoted(parts) => ctx.substitute_parts(parts),
        ExprNode::Unary(op, operand) => {
            let v = stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || eval_node(operand, ctx))?;
            apply_unary(*op, &v)
        }
        ExprNode::Binary(op @ (BinOp::And | BinOp::Or), l, r) => {
            let left = eval_node(l, ctx)?.get_bool()?;
            let decided = if *op == BinOp::And { !left } else { left };
            if decided {
                return Ok(Value::from(left));
            }
            let right = eval_node(r, ctx)?.get_bool()?;
            Ok(Value::from(right))
        }
        ExprNode::Binary(op, l, r) => {
            let (a, b) = stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || {
                Ok::<_, Exception>((eval_node(l, ctx)?, eval_node(r, ctx)?))
            })?;
            apply_binary(*op, &a, &b)
        }
        ExprNode::Ternary(cond, then, otherwise) => {
            if eval_node(cond, ctx)?.get_bool()? {
                eval_node(then, ctx)
            } else {
                eval_node(otherwise, ctx)
            }
        }
        ExprNode::Call(func, args) => {
            let values = args
                .iter()
                .map(|a| eval_node(a, ctx))
                .collect::<EvalResult<Vec<_>>>()?;
            apply_func(*func, &values, ctx)
        }
    }
}

fn overflow() -> Exception {
    Exception::error("integer overflow")
}

fn operand(v: &Value, op: &str) -> EvalResult<Number> {
    v.get_number().ok_or_else(|| {
        let what = if v.is_empty() {
            "empty string"
        } else {
            "non-numeric string"
        };
        Exception::error(format!("can't use {what} as operand of \"{op}\""))
    })
}

fn int_operand(v: &Value, op: &str) -> EvalResult<i64> {
    match operand(v, op)? {
        Number::Int(n) => Ok(n),
        Number::Double(_) => Err(Exception::error(format!(
            "can't use floating-point value as operand of \"{op}\""
        ))),
    }
}

fn apply_unary(op: UnOp, v: &Value) -> EvalResult {
    match op {
        UnOp::Neg => match operand(v, "-")? {
            Number::Int(n) => n.checked_neg().map(Value::from).ok_or_else(overflow),
            Number::Double(x) => Ok(Value::from(-x)),
        },
        UnOp::Plus => Ok(Value::from(operand(v, "+")?)),
        UnOp::BitNot => Ok(Value::from(!int_operand(v, "~")?)),
        UnOp::Not => Ok(Value::from(!v.get_bool()?)),
    }
}

fn ordering_holds(op: BinOp, ord: Option<Ordering>) -> bool {
    match op {
        BinOp::Lt => ord == Some(Ordering::Less),
        BinOp::Gt => ord == Some(Ordering::Greater),
        BinOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        BinOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        BinOp::Eq => ord == Some(Ordering::Equal),
        _ => ord != Some(Ordering::Equal),
    }
}

/// Numeric comparison when both sides are numbers, string comparison
/// otherwise.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a.get_number(), b.get_number()) {
        (Some(Number::Int(x)), Some(Number::Int(y))) => Some(x.cmp(&y)),
        (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        _ => Some(a.as_str().cmp(&b.as_str())),
    }
}

/// Quotient rounded toward negative infinity.
pub(crate) fn floor_div(x: i64, y: i64) -> EvalResult<i64> {
    if y == 0 {
        return Err(Exception::error("divide by zero"));
    }
    let q = x.checked_div(y).ok_or_else(overflow)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Remainder with the sign of the divisor.
pub(crate) fn floor_mod(x: i64, y: i64) -> EvalResult<i64> {
    if y == 0 {
        return Err(Exception::error("divide by zero"));
    }
    let r = x.checked_rem(y).unwrap_or(0);
    if r != 0 && ((r < 0) != (y < 0)) {
        Ok(r + y)
    } else {
        Ok(r)
    }
}

fn int_pow(base: i64, exp: i64) -> EvalResult<i64> {
    match base {
        0 if exp < 0 => return Err(Exception::error("exponentiation of zero by negative power")),
        0 => return Ok(if exp == 0 { 1 } else { 0 }),
        1 => return Ok(1),
        -1 => return Ok(if exp % 2 == 0 { 1 } else { -1 }),
        _ if exp < 0 => return Ok(0),
        _ => {}
    }
    let exp = u32::try_from(exp).map_err(|_| overflow())?;
    base.checked_pow(exp).ok_or_else(overflow)
}

fn apply_binary(op: BinOp, a: &Value, b: &Value) -> EvalResult {
    let sym = op.symbol();
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow => {
            let (x, y) = (operand(a, sym)?, operand(b, sym)?);
            if let (Number::Int(x), Number::Int(y)) = (x, y) {
                let r = match op {
                    BinOp::Add => x.checked_add(y).ok_or_else(overflow)?,
                    BinOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
                    BinOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
                    BinOp::Div => floor_div(x, y)?,
                    _ => int_pow(x, y)?,
                };
                return Ok(Value::from(r));
            }
            let (x, y) = (x.as_f64(), y.as_f64());
            Ok(Value::from(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                _ => x.powf(y),
            }))
        }
        BinOp::Mod => Ok(Value::from(floor_mod(int_operand(a, sym)?, int_operand(b, sym)?)?)),
        BinOp::Shl | BinOp::Shr | BinOp::RotL | BinOp::RotR => {
            let (x, y) = (int_operand(a, sym)?, int_operand(b, sym)?);
            if y < 0 {
                return Err(Exception::error("negative shift argument"));
            }
            let r = match op {
                BinOp::Shl if y >= 64 => 0,
                BinOp::Shl => x << y,
                BinOp::Shr if y >= 64 => {
                    if x < 0 {
                        -1
                    } else {
                        0
                    }
                }
                BinOp::Shr => x >> y,
                BinOp::RotL => (x as u64).rotate_left((y % 64) as u32) as i64,
                _ => (x as u64).rotate_right((y % 64) as u32) as i64,
            };
            Ok(Value::from(r))
        }
        BinOp::BitAnd | BinOp::BitXor | BinOp::BitOr => {
            let (x, y) = (int_operand(a, sym)?, int_operand(b, sym)?);
            Ok(Value::from(match op {
                BinOp::BitAnd => x & y,
                BinOp::BitXor => x ^ y,
                _ => x | y,
            }))
        }
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
            Ok(Value::from(ordering_holds(op, compare(a, b))))
        }
        BinOp::StrEq => Ok(Value::from(a.as_str() == b.as_str())),
        BinOp::StrNe => Ok(Value::from(a.as_str() != b.as_str())),
        BinOp::Match => Ok(Value::from(glob_match(&b.as_str(), &a.as_str(), false))),
        BinOp::In | BinOp::Ni => {
            let needle = a.as_str();
            let found = b.get_list()?.iter().any(|e| e.as_str() == needle);
            Ok(Value::from(found == (op == BinOp::In)))
        }
        BinOp::And | BinOp::Or => {
            let (x, y) = (a.get_bool()?, b.get_bool()?);
            Ok(Value::from(if op == BinOp::And { x && y } else { x || y }))
        }
    }
}

fn float_to_int(x: f64) -> EvalResult<i64> {
    if !x.is_finite() || x < i64::MIN as f64 || x >= 9_223_372_036_854_775_808.0 {
        return Err(overflow());
    }
    Ok(x as i64)
}

fn apply_func(func: MathFunc, args: &[Value], ctx: &mut dyn ExprContext) -> EvalResult {
    let name = MATH_FUNCS
        .iter()
        .find(|(_, f)| *f == func)
        .map_or("?", |(n, _)| *n);
    if let Some(f) = func.unary_float() {
        return Ok(Value::from(f(args[0].get_double()?)));
    }
    match func {
        MathFunc::Abs => match operand(&args[0], name)? {
            Number::Int(n) => n.checked_abs().map(Value::from).ok_or_else(overflow),
            Number::Double(x) => Ok(Value::from(x.abs())),
        },
        MathFunc::Int | MathFunc::Wide => match operand(&args[0], name)? {
            Number::Int(n) => Ok(Value::from(n)),
            Number::Double(x) => Ok(Value::from(float_to_int(x.trunc())?)),
        },
        MathFunc::Round => match operand(&args[0], name)? {
            Number::Int(n) => Ok(Value::from(n)),
            Number::Double(x) => Ok(Value::from(float_to_int(x.round())?)),
        },
        MathFunc::Double => Ok(Value::from(operand(&args[0], name)?.as_f64())),
        MathFunc::Bool => Ok(Value::from(args[0].get_bool()?)),
        MathFunc::Pow => Ok(Value::from(args[0].get_double()?.powf(args[1].get_double()?))),
        MathFunc::Atan2 => Ok(Value::from(args[0].get_double()?.atan2(args[1].get_double()?))),
        MathFunc::Fmod => Ok(Value::from(args[0].get_double()? % args[1].get_double()?)),
        MathFunc::Hypot => Ok(Value::from(args[0].get_double()?.hypot(args[1].get_double()?))),
        MathFunc::IsNan => Ok(Value::from(args[0].get_double()?.is_nan())),
        MathFunc::IsInf => Ok(Value::from(args[0].get_double()?.is_infinite())),
        MathFunc::Min | MathFunc::Max => {
            let mut best = operand(&args[0], name)?;
            for v in &args[1..] {
                let n = operand(v, name)?;
                let ord = match (best, n) {
                    (Number::Int(x), Number::Int(y)) => Some(y.cmp(&x)),
                    _ => n.as_f64().partial_cmp(&best.as_f64()),
                };
                let wanted = if func == MathFunc::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                if ord == Some(wanted) {
                    best = n;
                }
            }
            Ok(Value::from(best))
        }
        MathFunc::Rand => Ok(Value::from(ctx.rand())),
        MathFunc::Srand => {
            ctx.srand(args[0].get_int()?);
            Ok(Value::from(ctx.rand()))
        }
        _ => Err(Exception::error(format!("unknown math function \"{name}\""))),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // ── Minimal ExprContext for tests ────────────────────────────────────────

    struct TestCtx {
        vars: HashMap<String, Value>,
        seed: i64,
    }

    impl TestCtx {
        fn new() -> Self {
            TestCtx {
                vars: HashMap::new(),
                seed: 0,
            }
        }

        fn with(mut self, k: &str, v: &str) -> Self {
            self.vars.insert(k.into(), Value::from(v));
            self
        }
    }

    impl ExprContext for TestCtx {
        fn substitute(&mut self, part: &Part) -> EvalResult {
            match part {
                Part::Literal(v) => Ok(v.clone()),
                Part::Var(name) => self
                    .vars
                    .get(&*name.as_str())
                    .cloned()
                    .ok_or_else(|| Exception::error(format!("can't read \"{name}\": no such variable"))),
                _ => Err(Exception::error("not supported in test ctx")),
            }
        }

        fn substitute_parts(&mut self, parts: &[Part]) -> EvalResult {
            let mut out = String::new();
            for p in parts {
                out.push_str(&self.substitute(p)?.as_str());
            }
            Ok(Value::from(out))
        }

        fn rand(&mut self) -> f64 {
            0.25
        }

        fn srand(&mut self, seed: i64) {
            self.seed = seed;
        }
    }

    fn eval_ctx(src: &str, ctx: &mut TestCtx) -> EvalResult {
        let tree = parse_expr(src).map_err(Exception::from)?;
        eval_expr(&tree, ctx)
    }

    fn eval(src: &str) -> String {
        eval_ctx(src, &mut TestCtx::new())
            .expect("eval failed")
            .to_string()
    }

    fn eval_err(src: &str) -> String {
        eval_ctx(src, &mut TestCtx::new()).unwrap_err().to_string()
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("2 + 3 * 4"), "14");
        assert_eq!(eval("(2 + 3) * 4"), "20");
        assert_eq!(eval("2 ** 3 ** 2"), "512");
        assert_eq!(eval("-2 ** 2"), "4");
        assert_eq!(eval("7 / 2"), "3");
        assert_eq!(eval("-7 / 2"), "-4");
        assert_eq!(eval("-7 % 2"), "1");
        assert_eq!(eval("7 % -2"), "-1");
        assert_eq!(eval("7 / 2.0"), "3.5");
        assert_eq!(eval("1 << 4 | 1"), "17");
        assert_eq!(eval("0x10 + 0b11 + 0o7"), "26");
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(eval_err("1 / 0"), "divide by zero");
        assert_eq!(eval_err("1 % 0"), "divide by zero");
        assert_eq!(eval("1 / 0.0"), "Inf");
    }

    #[test]
    fn integer_overflow_is_an_error() {
        assert_eq!(eval_err("9223372036854775807 + 1"), "integer overflow");
        assert_eq!(eval_err("2 ** 64"), "integer overflow");
    }

    #[test]
    fn negative_integer_powers() {
        assert_eq!(eval("2 ** -1"), "0");
        assert_eq!(eval("-1 ** -3"), "-1");
        assert_eq!(eval("1 ** -5"), "1");
        assert_eq!(eval_err("0 ** -1"), "exponentiation of zero by negative power");
    }

    #[test]
    fn comparisons_fall_back_to_strings() {
        assert_eq!(eval("10 > 9"), "1");
        assert_eq!(eval("{10} < {9}"), "0");
        assert_eq!(eval("\"abc\" < \"abd\""), "1");
        assert_eq!(eval("\"10\" eq \"10.0\""), "0");
        assert_eq!(eval("10 == 10.0"), "1");
        assert_eq!(eval("\"a\" in {a b c}"), "1");
        assert_eq!(eval("\"z\" ni {a b c}"), "1");
        assert_eq!(eval("\"hello\" =* \"h*o\""), "1");
    }

    #[test]
    fn logic_short_circuits() {
        let mut ctx = TestCtx::new();
        assert_eq!(eval_ctx("0 && $missing", &mut ctx).unwrap().to_string(), "0");
        assert_eq!(eval_ctx("1 || $missing", &mut ctx).unwrap().to_string(), "1");
        assert_eq!(eval_ctx("1 ? 2 : $missing", &mut ctx).unwrap().to_string(), "2");
        assert!(eval_ctx("1 && $missing", &mut ctx).is_err());
        assert_eq!(eval("0 ? 1 : 0 ? 2 : 3"), "3");
    }

    #[test]
    fn non_numeric_arithmetic_fails() {
        assert_eq!(
            eval_err("\"abc\" + 1"),
            "can't use non-numeric string as operand of \"+\""
        );
        assert_eq!(
            eval_err("1.5 % 1"),
            "can't use floating-point value as operand of \"%\""
        );
    }

    #[test]
    fn syntax_errors() {
        let kind = |src: &str| parse_expr(src).unwrap_err().kind;
        assert_eq!(kind("1 +"), ExprErrorKind::MissingOperand);
        assert_eq!(kind("(1 + 2"), ExprErrorKind::MissingCloseParen);
        assert_eq!(kind("1 + 2)"), ExprErrorKind::UnexpectedCloseParen);
        assert_eq!(kind("1, 2"), ExprErrorKind::UnexpectedComma);
        assert_eq!(kind("sqrt + 1"), ExprErrorKind::FunctionWithoutParens("sqrt".into()));
        assert_eq!(kind("pow(1)"), ExprErrorKind::WrongArgCount("pow".into()));
        assert_eq!(kind("nosuch(1)"), ExprErrorKind::UnknownFunction("nosuch".into()));
        assert_eq!(kind("1 2"), ExprErrorKind::MissingOperator);
        assert_eq!(kind("foo"), ExprErrorKind::Bareword("foo".into()));
        assert_eq!(
            parse_expr("1 +").unwrap_err().to_string(),
            "syntax error in expression \"1 +\": missing operand"
        );
    }

    #[test]
    fn math_functions() {
        assert_eq!(eval("sqrt(16)"), "4.0");
        assert_eq!(eval("abs(-3)"), "3");
        assert_eq!(eval("int(3.9)"), "3");
        assert_eq!(eval("int(-3.9)"), "-3");
        assert_eq!(eval("round(2.5)"), "3");
        assert_eq!(eval("double(2)"), "2.0");
        assert_eq!(eval("max(1, 5, 3)"), "5");
        assert_eq!(eval("min(2, 1.5)"), "1.5");
        assert_eq!(eval("pow(2, 10)"), "1024.0");
        assert_eq!(eval("rand()"), "0.25");
        assert_eq!(eval("bool(yes)"), "1");
    }

    #[test]
    fn variables_and_fast_path() {
        let mut ctx = TestCtx::new().with("x", "7").with("s", "abc");
        assert_eq!(eval_ctx("$x", &mut ctx).unwrap().to_string(), "7");
        assert_eq!(eval_ctx("$x < 10", &mut ctx).unwrap().to_string(), "1");
        assert_eq!(eval_ctx("$s == \"abc\"", &mut ctx).unwrap().to_string(), "1");
        assert_eq!(eval_ctx("$x * 6", &mut ctx).unwrap().to_string(), "42");
        assert_eq!(eval_ctx("\"<$s>\"", &mut ctx).unwrap().to_string(), "<abc>");
    }

    #[test]
    fn doubles_keep_their_form() {
        assert_eq!(eval("3.0 + 0.5"), "3.5");
        assert_eq!(eval("1e20 * 1"), "1e+20");
        assert_eq!(eval("2.0 * 2"), "4.0");
    }
}
