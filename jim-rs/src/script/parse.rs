//! Script, list and substitution parsing.
//!
//! A script is split into commands separated by newlines or `;`, and each
//! command into words separated by blanks.  Within a word the tokenizer
//! recognizes:
//!
//! | Syntax | Part |
//! |--------|------|
//! | `{...}` at word start | literal, nested braces balanced, no substitution |
//! | `"..."` at word start | quoted word; blanks and `;` are literal |
//! | `$name`, `${name}` | variable reference |
//! | `$name(key)` | element of the dict stored in `name` |
//! | `$(expr)` | expression result |
//! | `[script]` | command substitution |
//! | `\x` | backslash escape |
//! | `{*}` prefix | the word is expanded as a list into several arguments |
//!
//! `#` starts a comment only where a command could start.  The grouping pass
//! turns the flat token stream into [`Script`] lines of [`Word`]s, each word
//! a sequence of [`Part`]s that the interpreter substitutes and concatenates.
//!
//! The list parser and [`quote_element`] implement the quoting rules that
//! make `parse_list(format_list(xs)) == xs`.

use std::borrow::Cow;
use std::rc::Rc;

use super::value::Value;

// ── Errors ───────────────────────────────────────────────────────────────────

/// The terminator an incomplete construct is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Brace,
    Quote,
    Bracket,
    Paren,
    Backslash,
}

impl Missing {
    /// The character that opened the unfinished construct.
    pub fn as_char(self) -> char {
        match self {
            Missing::Brace => '{',
            Missing::Quote => '"',
            Missing::Bracket => '[',
            Missing::Paren => '(',
            Missing::Backslash => '\\',
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Missing::Brace => "close-brace",
            Missing::Quote => "quote",
            Missing::Bracket => "close-bracket",
            Missing::Paren => "close-paren",
            Missing::Backslash => "continuation line",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("missing {}", .missing.describe())]
    Missing { missing: Missing, line: usize },
    #[error("extra characters after close-brace")]
    ExtraAfterBrace { line: usize },
    #[error("extra characters after close-quote")]
    ExtraAfterQuote { line: usize },
    #[error("unmatched open brace in list")]
    ListBrace,
    #[error("unmatched open quote in list")]
    ListQuote,
    #[error("list element in {kind} followed by \"{found}\" instead of space")]
    ListTrailing { kind: &'static str, found: String },
}

impl ParseError {
    /// Line the error was detected on (0 for list errors).
    pub fn line(&self) -> usize {
        match self {
            ParseError::Missing { line, .. }
            | ParseError::ExtraAfterBrace { line }
            | ParseError::ExtraAfterQuote { line } => *line,
            _ => 0,
        }
    }

    pub fn missing(&self) -> Option<Missing> {
        match self {
            ParseError::Missing { missing, .. } => Some(*missing),
            _ => None,
        }
    }
}

// ── Parsed forms ─────────────────────────────────────────────────────────────

/// One piece of a word.
#[derive(Debug, Clone)]
pub(crate) enum Part {
    Literal(Value),
    Var(Value),
    DictSugar { var: Value, key: Rc<[Part]> },
    Expr(Value),
    Command(Value),
}

#[derive(Debug, Clone)]
pub(crate) struct Word {
    pub(crate) parts: Vec<Part>,
    pub(crate) expand: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ScriptLine {
    pub(crate) words: Vec<Word>,
    pub(crate) line: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Script {
    pub(crate) lines: Vec<ScriptLine>,
    pub(crate) file: Rc<str>,
    pub(crate) first_line: usize,
}

/// Which substitutions `subst` performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SubstFlags {
    pub(crate) backslashes: bool,
    pub(crate) commands: bool,
    pub(crate) variables: bool,
}

impl SubstFlags {
    pub(crate) const ALL: SubstFlags = SubstFlags {
        backslashes: true,
        commands: true,
        variables: true,
    };
}

// ── Scanner ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Str,
    Esc,
    Var,
    DictSugar,
    ExprSugar,
    Cmd,
    Expand,
    Sep,
    Eol,
}

/// Byte cursor with line tracking shared by the script, subst and
/// expression tokenizers.  Every syntax character is ASCII, so slicing at
/// the positions it stops on always lands on char boundaries.
pub(crate) struct Scanner<'a> {
    src: &'a str,
    pub(crate) pos: usize,
    pub(crate) line: usize,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(src: &'a str, line: usize) -> Self {
        Scanner { src, pos: 0, line }
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    pub(crate) fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + ahead).copied()
    }

    pub(crate) fn bump(&mut self) {
        if let Some(c) = self.peek() {
            if c == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
    }

    fn skip_escape(&mut self) {
        self.bump();
        self.bump();
    }

    pub(crate) fn slice(&self, from: usize, to: usize) -> &'a str {
        &self.src[from..to]
    }

    /// Positioned on `{`: returns the text up to the matching `}` and moves
    /// past it.
    pub(crate) fn braced(&mut self) -> Result<&'a str, ParseError> {
        let line = self.line;
        self.bump();
        let begin = self.pos;
        let mut level = 1;
        loop {
            match self.peek() {
                None => {
                    return Err(ParseError::Missing {
                        missing: Missing::Brace,
                        line,
                    })
                }
                Some(b'\\') => self.skip_escape(),
                Some(b'{') => {
                    level += 1;
                    self.bump();
                }
                Some(b'}') => {
                    level -= 1;
                    if level == 0 {
                        let text = &self.src[begin..self.pos];
                        self.bump();
                        return Ok(text);
                    }
                    self.bump();
                }
                Some(_) => self.bump(),
            }
        }
    }

    /// Positioned on `[`: returns the nested script text and moves past the
    /// matching `]`.  Braced and quoted words inside are skipped whole.
    pub(crate) fn bracketed(&mut self) -> Result<&'a str, ParseError> {
        let line = self.line;
        self.bump();
        let begin = self.pos;
        let mut level = 1;
        let mut word_start = true;
        loop {
            let Some(c) = self.peek() else {
                return Err(ParseError::Missing {
                    missing: Missing::Bracket,
                    line,
                });
            };
            match c {
                b'\\' => {
                    self.skip_escape();
                    word_start = false;
                    continue;
                }
                b'{' if word_start => {
                    self.braced()?;
                    word_start = false;
                    continue;
                }
                b'"' if word_start => {
                    self.skip_quoted()?;
                    word_start = false;
                    continue;
                }
                b'[' => level += 1,
                b']' => {
                    level -= 1;
                    if level == 0 {
                        let text = &self.src[begin..self.pos];
                        self.bump();
                        return Ok(text);
                    }
                }
                _ => {}
            }
            word_start = matches!(c, b' ' | b'\t' | b'\n' | b'\r' | b';' | b'[');
            self.bump();
        }
    }

    /// Positioned on `"`: moves past the closing quote.
    pub(crate) fn skip_quoted(&mut self) -> Result<(), ParseError> {
        let line = self.line;
        self.bump();
        loop {
            match self.peek() {
                None => {
                    return Err(ParseError::Missing {
                        missing: Missing::Quote,
                        line,
                    })
                }
                Some(b'\\') => self.skip_escape(),
                Some(b'[') => {
                    self.bracketed()?;
                }
                Some(b'"') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => self.bump(),
            }
        }
    }

    /// Positioned on `$`.  Returns the variable-like token, or `None` when
    /// the `$` is not followed by a name and stands for itself.
    pub(crate) fn variable(&mut self) -> Result<Option<(TokenKind, &'a str)>, ParseError> {
        let start = self.pos;
        self.bump();
        match self.peek() {
            Some(b'{') => {
                let line = self.line;
                self.bump();
                let begin = self.pos;
                while let Some(c) = self.peek() {
                    if c == b'}' {
                        let name = &self.src[begin..self.pos];
                        self.bump();
                        return Ok(Some((TokenKind::Var, name)));
                    }
                    self.bump();
                }
                Err(ParseError::Missing {
                    missing: Missing::Brace,
                    line,
                })
            }
            Some(b'(') => {
                let line = self.line;
                self.bump();
                let begin = self.pos;
                let mut level = 1;
                loop {
                    match self.peek() {
                        None => {
                            return Err(ParseError::Missing {
                                missing: Missing::Paren,
                                line,
                            })
                        }
                        Some(b'\\') => self.skip_escape(),
                        Some(b'[') => {
                            self.bracketed()?;
                        }
                        Some(b'{') => {
                            self.braced()?;
                        }
                        Some(b'"') => self.skip_quoted()?,
                        Some(b'(') => {
                            level += 1;
                            self.bump();
                        }
                        Some(b')') => {
                            level -= 1;
                            if level == 0 {
                                let text = &self.src[begin..self.pos];
                                self.bump();
                                return Ok(Some((TokenKind::ExprSugar, text)));
                            }
                            self.bump();
                        }
                        Some(_) => self.bump(),
                    }
                }
            }
            _ => {
                let begin = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80 {
                        self.bump();
                    } else if c == b':' && self.peek_at(1) == Some(b':') {
                        self.bump();
                        self.bump();
                    } else {
                        break;
                    }
                }
                if self.pos == begin {
                    self.pos = start + 1;
                    return Ok(None);
                }
                if self.peek() == Some(b'(') {
                    if let Some(end) = self.dict_key_end() {
                        let text = &self.src[begin..end];
                        return Ok(Some((TokenKind::DictSugar, text)));
                    }
                }
                Ok(Some((TokenKind::Var, &self.src[begin..self.pos])))
            }
        }
    }

    /// Positioned on the `(` after a variable name.  On success moves past
    /// the matching `)` and returns that position; otherwise stays put.
    fn dict_key_end(&mut self) -> Option<usize> {
        let (pos, line) = (self.pos, self.line);
        self.bump();
        let mut level = 1;
        loop {
            match self.peek() {
                None => break,
                Some(b'\\') => self.skip_escape(),
                Some(b'[') => {
                    if self.bracketed().is_err() {
                        break;
                    }
                }
                Some(b'(') => {
                    level += 1;
                    self.bump();
                }
                Some(b')') => {
                    level -= 1;
                    self.bump();
                    if level == 0 {
                        return Some(self.pos);
                    }
                }
                Some(_) => self.bump(),
            }
        }
        self.pos = pos;
        self.line = line;
        None
    }
}

// ── Script tokenizer ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    line: usize,
    braced: bool,
}

struct Tokenizer<'a> {
    sc: Scanner<'a>,
    tokens: Vec<Token<'a>>,
    in_quote: bool,
    quote_line: usize,
    quote_start: usize,
    word_start: bool,
    cmd_start: bool,
}

fn is_blank(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | 0x0b | 0x0c)
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str, line: usize) -> Self {
        Tokenizer {
            sc: Scanner::new(src, line),
            tokens: Vec::new(),
            in_quote: false,
            quote_line: line,
            quote_start: 0,
            word_start: true,
            cmd_start: true,
        }
    }

    fn push(&mut self, kind: TokenKind, text: &'a str, line: usize, braced: bool) {
        self.tokens.push(Token {
            kind,
            text,
            line,
            braced,
        });
    }

    fn at_word_end(&self) -> bool {
        match self.sc.peek() {
            None => true,
            Some(c) if is_blank(c) || c == b'\n' || c == b';' => true,
            Some(b'\\') => self.sc.peek_at(1) == Some(b'\n'),
            _ => false,
        }
    }

    fn run(mut self) -> Result<Vec<Token<'a>>, ParseError> {
        loop {
            let Some(c) = self.sc.peek() else {
                if self.in_quote {
                    return Err(ParseError::Missing {
                        missing: Missing::Quote,
                        line: self.quote_line,
                    });
                }
                let line = self.sc.line;
                self.push(TokenKind::Eol, "", line, false);
                return Ok(self.tokens);
            };
            let line = self.sc.line;
            if !self.in_quote {
                match c {
                    _ if is_blank(c) || (c == b'\\' && self.sc.peek_at(1) == Some(b'\n')) => {
                        self.separator();
                        continue;
                    }
                    b'\n' | b';' => {
                        self.sc.bump();
                        self.push(TokenKind::Eol, "", line, false);
                        self.word_start = true;
                        self.cmd_start = true;
                        continue;
                    }
                    b'#' if self.cmd_start => {
                        self.comment();
                        continue;
                    }
                    b'{' if self.word_start => {
                        let text = self.sc.braced()?;
                        self.cmd_start = false;
                        if text == "*" && !self.at_word_end() {
                            self.push(TokenKind::Expand, text, line, true);
                            continue;
                        }
                        self.push(TokenKind::Str, text, line, true);
                        self.word_start = false;
                        if !self.at_word_end() {
                            return Err(ParseError::ExtraAfterBrace { line: self.sc.line });
                        }
                        continue;
                    }
                    b'"' if self.word_start => {
                        self.sc.bump();
                        self.in_quote = true;
                        self.quote_line = line;
                        self.quote_start = self.tokens.len();
                        self.word_start = false;
                        self.cmd_start = false;
                        continue;
                    }
                    _ => {}
                }
            } else if c == b'"' {
                self.sc.bump();
                self.in_quote = false;
                if self.tokens.len() == self.quote_start {
                    self.push(TokenKind::Str, "", line, false);
                }
                if !self.at_word_end() {
                    return Err(ParseError::ExtraAfterQuote { line: self.sc.line });
                }
                continue;
            }
            self.word_start = false;
            self.cmd_start = false;
            match c {
                b'[' => {
                    let text = self.sc.bracketed()?;
                    self.push(TokenKind::Cmd, text, line, false);
                }
                b'$' => match self.sc.variable()? {
                    Some((kind, text)) => self.push(kind, text, line, false),
                    None => self.push(TokenKind::Str, "$", line, false),
                },
                _ => self.string_run(),
            }
        }
    }

    fn separator(&mut self) {
        let line = self.sc.line;
        while let Some(c) = self.sc.peek() {
            if is_blank(c) {
                self.sc.bump();
            } else if c == b'\\' && self.sc.peek_at(1) == Some(b'\n') {
                self.sc.skip_escape();
            } else {
                break;
            }
        }
        self.push(TokenKind::Sep, "", line, false);
        self.word_start = true;
    }

    fn comment(&mut self) {
        while let Some(c) = self.sc.peek() {
            match c {
                b'\\' => self.sc.skip_escape(),
                b'\n' => break,
                _ => self.sc.bump(),
            }
        }
    }

    fn string_run(&mut self) {
        let line = self.sc.line;
        let begin = self.sc.pos;
        let mut escaped = false;
        while let Some(c) = self.sc.peek() {
            match c {
                b'$' | b'[' => break,
                b'\\' => {
                    if !self.in_quote && self.sc.peek_at(1) == Some(b'\n') {
                        break;
                    }
                    escaped = true;
                    self.sc.skip_escape();
                }
                b'"' if self.in_quote => break,
                _ if !self.in_quote && (is_blank(c) || c == b'\n' || c == b';') => break,
                _ => self.sc.bump(),
            }
        }
        let text = self.sc.slice(begin, self.sc.pos);
        let kind = if escaped { TokenKind::Esc } else { TokenKind::Str };
        self.push(kind, text, line, false);
    }
}

// ── Grouping ─────────────────────────────────────────────────────────────────

pub(crate) fn var_part(kind: TokenKind, text: &str, line: usize, file: &Rc<str>) -> Result<Part, ParseError> {
    Ok(match kind {
        TokenKind::DictSugar => {
            let open = text.find('(').unwrap_or(text.len());
            let key = text.get(open + 1..text.len() - 1).unwrap_or("");
            Part::DictSugar {
                var: Value::from(&text[..open]),
                key: parse_subst(key, SubstFlags::ALL, line, file)?.into(),
            }
        }
        TokenKind::ExprSugar => Part::Expr(Value::with_source(text, file.clone(), line)),
        _ => Part::Var(Value::from(text)),
    })
}

fn token_part(tok: &Token<'_>, file: &Rc<str>) -> Result<Part, ParseError> {
    Ok(match tok.kind {
        TokenKind::Str if tok.braced => {
            Part::Literal(Value::with_source(tok.text, file.clone(), tok.line))
        }
        TokenKind::Esc => Part::Literal(Value::from(unescape(tok.text))),
        TokenKind::Cmd => Part::Command(Value::with_source(tok.text, file.clone(), tok.line)),
        TokenKind::Var | TokenKind::DictSugar | TokenKind::ExprSugar => {
            var_part(tok.kind, tok.text, tok.line, file)?
        }
        _ => Part::Literal(Value::from(tok.text)),
    })
}

/// Parses a script into lines of words.  `first_line` is the line number of
/// the first character of `src` within `file`.
pub(crate) fn parse_script(src: &str, file: Rc<str>, first_line: usize) -> Result<Script, ParseError> {
    let tokens = Tokenizer::new(src, first_line).run()?;
    let mut lines = Vec::new();
    let mut words: Vec<Word> = Vec::new();
    let mut current: Vec<Token<'_>> = Vec::new();
    let mut line_no = first_line;

    for tok in tokens {
        match tok.kind {
            TokenKind::Sep | TokenKind::Eol => {
                if !current.is_empty() {
                    words.push(build_word(&current, &file)?);
                    current.clear();
                }
                if tok.kind == TokenKind::Eol && !words.is_empty() {
                    lines.push(ScriptLine {
                        words: std::mem::take(&mut words),
                        line: line_no,
                    });
                }
            }
            _ => {
                if words.is_empty() && current.is_empty() {
                    line_no = tok.line;
                }
                current.push(tok);
            }
        }
    }
    Ok(Script {
        lines,
        file,
        first_line,
    })
}

fn build_word(tokens: &[Token<'_>], file: &Rc<str>) -> Result<Word, ParseError> {
    let (expand, tokens) = match tokens.split_first() {
        Some((first, rest)) if first.kind == TokenKind::Expand && !rest.is_empty() => (true, rest),
        _ => (false, tokens),
    };
    let parts = tokens
        .iter()
        .map(|t| token_part(t, file))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Word { parts, expand })
}

/// Checks whether `src` is a complete script, reporting what an
/// unfinished one is waiting for.
pub fn is_complete(src: &str) -> Result<(), Missing> {
    if let Err(e) = Tokenizer::new(src, 1).run() {
        if let Some(missing) = e.missing() {
            return Err(missing);
        }
    }
    let body = src.strip_suffix('\n').unwrap_or(src);
    let trailing = body.bytes().rev().take_while(|&b| b == b'\\').count();
    if trailing % 2 == 1 {
        return Err(Missing::Backslash);
    }
    Ok(())
}

// ── Substitution templates ───────────────────────────────────────────────────

/// Parses text for `subst` (and dict-sugar keys): no word splitting, braces
/// and quotes are ordinary characters.
pub(crate) fn parse_subst(
    text: &str,
    flags: SubstFlags,
    line: usize,
    file: &Rc<str>,
) -> Result<Vec<Part>, ParseError> {
    let mut sc = Scanner::new(text, line);
    let mut parts = Vec::new();
    while let Some(c) = sc.peek() {
        let at = sc.line;
        if c == b'$' && flags.variables {
            match sc.variable()? {
                Some((kind, name)) => parts.push(var_part(kind, name, at, file)?),
                None => parts.push(Part::Literal(Value::from("$"))),
            }
            continue;
        }
        if c == b'[' && flags.commands {
            let script = sc.bracketed()?;
            parts.push(Part::Command(Value::with_source(script, file.clone(), at)));
            continue;
        }
        let begin = sc.pos;
        let mut escaped = false;
        while let Some(c) = sc.peek() {
            if (c == b'$' && flags.variables) || (c == b'[' && flags.commands) {
                break;
            }
            if c == b'\\' && flags.backslashes {
                escaped = true;
                sc.skip_escape();
            } else {
                sc.bump();
            }
        }
        let run = sc.slice(begin, sc.pos);
        parts.push(Part::Literal(if escaped {
            Value::from(unescape(run))
        } else {
            Value::from(run)
        }));
    }
    if parts.is_empty() {
        parts.push(Part::Literal(Value::empty()));
    }
    Ok(parts)
}

// ── Backslash escapes ────────────────────────────────────────────────────────

type CharCursor<'a> = std::iter::Peekable<std::str::Chars<'a>>;

fn take_digits(chars: &mut CharCursor<'_>, radix: u32, max: usize) -> Option<u32> {
    let mut value = None;
    for _ in 0..max {
        let Some(d) = chars.peek().and_then(|c| c.to_digit(radix)) else {
            break;
        };
        chars.next();
        value = Some(value.unwrap_or(0) * radix + d);
    }
    value
}

fn push_code(out: &mut String, code: u32) {
    out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
}

/// Decodes backslash escapes.
pub(crate) fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(e) = chars.next() else {
            out.push('\\');
            break;
        };
        match e {
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            'x' => match take_digits(&mut chars, 16, 2) {
                Some(code) => push_code(&mut out, code),
                None => out.push('x'),
            },
            'u' if chars.peek() == Some(&'{') => {
                let mut look = chars.clone();
                look.next();
                let mut digits = 0;
                let mut code = 0u32;
                while let Some(d) = look.peek().and_then(|c| c.to_digit(16)) {
                    look.next();
                    digits += 1;
                    code = code.saturating_mul(16).saturating_add(d);
                }
                if (1..=6).contains(&digits) && look.peek() == Some(&'}') {
                    look.next();
                    chars = look;
                    push_code(&mut out, code);
                } else {
                    out.push('u');
                }
            }
            'u' => match take_digits(&mut chars, 16, 4) {
                Some(code) => push_code(&mut out, code),
                None => out.push('u'),
            },
            'U' => match take_digits(&mut chars, 16, 8) {
                Some(code) => push_code(&mut out, code),
                None => out.push('U'),
            },
            '0'..='7' => {
                let mut code = e.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    let Some(d) = chars.peek().and_then(|c| c.to_digit(8)) else {
                        break;
                    };
                    chars.next();
                    code = code * 8 + d;
                }
                push_code(&mut out, code & 0xff);
            }
            '\n' => {
                while matches!(chars.peek(), Some(' ' | '\t')) {
                    chars.next();
                }
                out.push(' ');
            }
            other => out.push(other),
        }
    }
    out
}

// ── Lists ────────────────────────────────────────────────────────────────────

fn is_list_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// Splits a string into list elements.
pub fn parse_list(s: &str) -> Result<Vec<String>, ParseError> {
    let bytes = s.as_bytes();
    let mut items = Vec::new();
    let mut i = 0;
    loop {
        while i < bytes.len() && is_list_space(bytes[i]) {
            i += 1;
        }
        if i >= bytes.len() {
            return Ok(items);
        }
        match bytes[i] {
            b'{' => {
                let mut level = 1;
                let begin = i + 1;
                let mut j = begin;
                while j < bytes.len() {
                    match bytes[j] {
                        b'\\' => j += 1,
                        b'{' => level += 1,
                        b'}' => {
                            level -= 1;
                            if level == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(ParseError::ListBrace);
                }
                items.push(s[begin..j].to_string());
                i = trailing_space(s, j + 1, "braces")?;
            }
            b'"' => {
                let begin = i + 1;
                let mut j = begin;
                while j < bytes.len() && bytes[j] != b'"' {
                    if bytes[j] == b'\\' {
                        j += 1;
                    }
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(ParseError::ListQuote);
                }
                items.push(unescape(&s[begin..j]));
                i = trailing_space(s, j + 1, "quotes")?;
            }
            _ => {
                let begin = i;
                let mut escaped = false;
                while i < bytes.len() && !is_list_space(bytes[i]) {
                    if bytes[i] == b'\\' {
                        escaped = true;
                        i += 1;
                    }
                    i += 1;
                }
                let i_end = i.min(bytes.len());
                let raw = &s[begin..i_end];
                items.push(if escaped { unescape(raw) } else { raw.to_string() });
                i = i_end;
            }
        }
    }
}

fn trailing_space(s: &str, at: usize, kind: &'static str) -> Result<usize, ParseError> {
    match s[at..].chars().next() {
        None => Ok(at),
        Some(c) if c.is_ascii() && is_list_space(c as u8) => Ok(at),
        Some(_) => {
            let found: String = s[at..]
                .chars()
                .take_while(|c| !(c.is_ascii() && is_list_space(*c as u8)))
                .collect();
            Err(ParseError::ListTrailing { kind, found })
        }
    }
}

fn needs_quoting(s: &str, first: bool) -> bool {
    (first && s.starts_with('#'))
        || s.bytes().any(|b| {
            matches!(
                b,
                b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c | b'{' | b'}' | b'[' | b']' | b'$'
                    | b'"' | b';' | b'\\'
            )
        })
}

/// True if wrapping `s` in braces reads back as exactly `s`: braces stay
/// balanced without the nesting level reaching zero, and no trailing
/// backslash escapes the closing brace.
fn can_brace(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut level = 1;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if i + 1 >= bytes.len() {
                    return false;
                }
                i += 1;
            }
            b'{' => level += 1,
            b'}' => {
                level -= 1;
                if level == 0 {
                    return false;
                }
            }
            _ => {}
        }
        i += 1;
    }
    level == 1
}

/// Quotes one list element.  `first` marks the head of the list, where a
/// leading `#` must be protected from reading as a comment.
pub(crate) fn quote_element(s: &str, first: bool) -> Cow<'_, str> {
    if s.is_empty() {
        return Cow::Borrowed("{}");
    }
    if !needs_quoting(s, first) {
        return Cow::Borrowed(s);
    }
    if can_brace(s) {
        return Cow::Owned(format!("{{{s}}}"));
    }
    let mut out = String::with_capacity(s.len() + 8);
    for (i, c) in s.chars().enumerate() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\x0b' => out.push_str("\\v"),
            '\x0c' => out.push_str("\\f"),
            ' ' | '{' | '}' | '[' | ']' | '$' | '"' | ';' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 && first => out.push_str("\\#"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Script {
        parse_script(src, Rc::from("test"), 1).expect("parse failed")
    }

    fn literal_words(script: &Script, line: usize) -> Vec<String> {
        script.lines[line]
            .words
            .iter()
            .map(|w| match &w.parts[..] {
                [Part::Literal(v)] => v.to_string(),
                other => panic!("not a literal word: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn splits_commands_and_words() {
        let s = parse("set a 1; set b {x y}\nputs \"hi there\"");
        assert_eq!(s.lines.len(), 3);
        assert_eq!(literal_words(&s, 0), ["set", "a", "1"]);
        assert_eq!(literal_words(&s, 1), ["set", "b", "x y"]);
        assert_eq!(literal_words(&s, 2), ["puts", "hi there"]);
        assert_eq!(s.lines[2].line, 2);
    }

    #[test]
    fn comments_only_at_command_start() {
        let s = parse("# note\nputs a#b ;# trailing\n");
        assert_eq!(s.lines.len(), 1);
        assert_eq!(literal_words(&s, 0), ["puts", "a#b"]);
    }

    #[test]
    fn word_parts() {
        let s = parse("puts a$b[c]$d(e)$(1+2)");
        let parts = &s.lines[0].words[1].parts;
        assert!(matches!(parts[0], Part::Literal(_)));
        assert!(matches!(parts[1], Part::Var(_)));
        assert!(matches!(parts[2], Part::Command(_)));
        assert!(matches!(parts[3], Part::DictSugar { .. }));
        assert!(matches!(parts[4], Part::Expr(_)));
    }

    #[test]
    fn expansion_prefix() {
        let s = parse("list {*}$x {*} {*}{a b}");
        let words = &s.lines[0].words;
        assert!(words[1].expand);
        assert!(!words[2].expand);
        assert!(words[3].expand);
    }

    #[test]
    fn empty_quoted_word() {
        let s = parse("set x \"\"");
        assert_eq!(literal_words(&s, 0), ["set", "x", ""]);
    }

    #[test]
    fn missing_terminators() {
        let err = |src: &str| parse_script(src, Rc::from(""), 1).unwrap_err();
        assert_eq!(err("set x {a").missing(), Some(Missing::Brace));
        assert_eq!(err("set x \"a").missing(), Some(Missing::Quote));
        assert_eq!(err("set x [a").missing(), Some(Missing::Bracket));
        assert_eq!(err("set x {a}b"), ParseError::ExtraAfterBrace { line: 1 });
        assert_eq!(err("set x \"a\"b"), ParseError::ExtraAfterQuote { line: 1 });
    }

    #[test]
    fn completeness() {
        assert_eq!(is_complete("puts {a\n"), Err(Missing::Brace));
        assert_eq!(is_complete("puts [a\n"), Err(Missing::Bracket));
        assert_eq!(is_complete("puts a \\\n"), Err(Missing::Backslash));
        assert_eq!(is_complete("puts {a}\n"), Ok(()));
        assert_eq!(is_complete("puts {a}b"), Ok(()));
    }

    #[test]
    fn bracket_skips_braced_close() {
        let s = parse("puts [list {]}]");
        assert!(matches!(s.lines[0].words[1].parts[0], Part::Command(_)));
    }

    #[test]
    fn backslash_newline_joins_words() {
        let s = parse("puts a \\\n   b");
        assert_eq!(literal_words(&s, 0), ["puts", "a", "b"]);
    }

    #[test]
    fn escapes() {
        assert_eq!(unescape("a\\tb"), "a\tb");
        assert_eq!(unescape("\\x41\\u00e9\\u{1F600}"), "Aé😀");
        assert_eq!(unescape("\\101"), "A");
        assert_eq!(unescape("\\\n   x"), " x");
        assert_eq!(unescape("\\q"), "q");
        assert_eq!(unescape("end\\"), "end\\");
    }

    #[test]
    fn list_parsing() {
        assert_eq!(parse_list(" a {b c}  \"d e\" f\\ g ").unwrap(), ["a", "b c", "d e", "f g"]);
        assert_eq!(parse_list("{a {b}} {}").unwrap(), ["a {b}", ""]);
        assert_eq!(parse_list("{a").unwrap_err(), ParseError::ListBrace);
        assert_eq!(parse_list("\"a").unwrap_err(), ParseError::ListQuote);
        assert!(matches!(
            parse_list("{a}b").unwrap_err(),
            ParseError::ListTrailing { .. }
        ));
    }

    #[test]
    fn element_quoting() {
        assert_eq!(quote_element("", false), "{}");
        assert_eq!(quote_element("abc", false), "abc");
        assert_eq!(quote_element("a b", false), "{a b}");
        assert_eq!(quote_element("#x", true), "{#x}");
        assert_eq!(quote_element("#x", false), "#x");
        assert_eq!(quote_element("a}", false), "a\\}");
        assert_eq!(quote_element("a\\", false), "a\\\\");
        assert_eq!(quote_element("}{", false), "\\}\\{");
    }

    #[test]
    fn quoted_elements_read_back() {
        for s in ["a}", "{", "x\\", "a b", "\"q\"", "$v[x]", "tab\there", "#", "}{"] {
            let q = quote_element(s, true);
            assert_eq!(parse_list(&q).unwrap(), [s], "quoted as {q}");
        }
    }

    #[test]
    fn subst_flags() {
        let file: Rc<str> = Rc::from("");
        let none = SubstFlags {
            backslashes: false,
            commands: false,
            variables: false,
        };
        let parts = parse_subst("$a [b] \\n", none, 1, &file).unwrap();
        assert_eq!(parts.len(), 1);
        let all = parse_subst("x$a[b]\\n", SubstFlags::ALL, 1, &file).unwrap();
        assert_eq!(all.len(), 4);
    }
}
