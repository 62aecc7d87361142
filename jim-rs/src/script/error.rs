//! Completion codes and the non-OK outcomes of evaluation.
//!
//! Every evaluation step returns [`EvalResult`].  `Ok` is the normal
//! completion; every other code travels as an [`Exception`] through `?`
//! until a construct that handles it (a loop for `break`/`continue`, a proc
//! boundary for `return`, `catch`/`try` for anything).

use std::fmt;
use std::rc::Rc;

use super::expr::ExprError;
use super::parse::ParseError;
use super::value::Value;

pub type EvalResult<T = Value> = Result<T, Exception>;

/// Completion code of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    Error,
    Return,
    Break,
    Continue,
    Signal,
    Exit,
}

impl Code {
    pub fn as_i64(self) -> i64 {
        match self {
            Code::Ok => 0,
            Code::Error => 1,
            Code::Return => 2,
            Code::Break => 3,
            Code::Continue => 4,
            Code::Signal => 5,
            Code::Exit => 6,
        }
    }

    pub fn from_i64(n: i64) -> Option<Code> {
        Some(match n {
            0 => Code::Ok,
            1 => Code::Error,
            2 => Code::Return,
            3 => Code::Break,
            4 => Code::Continue,
            5 => Code::Signal,
            6 => Code::Exit,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Error => "error",
            Code::Return => "return",
            Code::Break => "break",
            Code::Continue => "continue",
            Code::Signal => "signal",
            Code::Exit => "exit",
        }
    }

    /// Accepts a code name or its number, as `return -code` and `try on` do.
    pub fn parse(s: &str) -> Option<Code> {
        let by_name = [
            Code::Ok,
            Code::Error,
            Code::Return,
            Code::Break,
            Code::Continue,
            Code::Signal,
            Code::Exit,
        ]
        .into_iter()
        .find(|c| c.name() == s);
        by_name.or_else(|| s.trim().parse().ok().and_then(Code::from_i64))
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Error info ───────────────────────────────────────────────────────────────

/// One level of an error's stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Proc that was running, empty at top level.
    pub proc_name: Rc<str>,
    pub file: Rc<str>,
    pub line: usize,
    /// The command that failed at this level.
    pub command: Rc<str>,
}

#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub message: Value,
    /// Machine-readable classification, `NONE` unless set by `error`/`throw`.
    pub error_code: Value,
    /// Innermost level first.
    pub trace: Vec<TraceFrame>,
    /// Set when the next enclosing command line should add a trace level.
    pub(crate) record_next: bool,
}

impl ErrorInfo {
    pub fn new(message: Value) -> Self {
        ErrorInfo {
            message,
            error_code: Value::from("NONE"),
            trace: Vec::new(),
            record_next: true,
        }
    }

    /// The trace as a list of `{command file line proc}` lists.
    pub fn trace_value(&self) -> Value {
        let frames = self
            .trace
            .iter()
            .map(|f| {
                Value::from_list(vec![
                    Value::from(&f.command),
                    Value::from(&f.file),
                    Value::from(f.line),
                    Value::from(&f.proc_name),
                ])
            })
            .collect();
        Value::from_list(frames)
    }

    /// Rebuilds a trace from the list form produced by [`trace_value`].
    /// Malformed entries are skipped.
    ///
    /// [`trace_value`]: ErrorInfo::trace_value
    pub fn trace_from_value(v: &Value) -> Vec<TraceFrame> {
        let Ok(items) = v.get_list() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let f = item.get_list().ok()?;
                if f.len() != 4 {
                    return None;
                }
                Some(TraceFrame {
                    command: f[0].as_str(),
                    file: f[1].as_str(),
                    line: usize::try_from(f[2].get_int().ok()?).ok()?,
                    proc_name: f[3].as_str(),
                })
            })
            .collect()
    }
}

// ── Exception ────────────────────────────────────────────────────────────────

/// Any completion other than `Ok`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Exception {
    #[error("{}", .0.message)]
    Error(Box<ErrorInfo>),
    /// `break`; the count is how many enclosing loops to leave.
    #[error("invoked \"break\" outside of a loop")]
    Break(u32),
    #[error("invoked \"continue\" outside of a loop")]
    Continue(u32),
    /// `return`; `level` counts the proc boundaries still to cross and
    /// `code` is the completion the last of them produces.
    #[error("{value}")]
    Return {
        code: Code,
        level: u32,
        value: Value,
        error_code: Option<Value>,
    },
    #[error("signal {0} received")]
    Signal(Value),
    #[error("exit {0}")]
    Exit(i32),
    /// Replace the running proc with this command once it unwinds.
    #[error("tailcall outside of a procedure")]
    Tailcall(Vec<Value>),
}

impl Exception {
    pub fn error(message: impl Into<Value>) -> Exception {
        Exception::Error(Box::new(ErrorInfo::new(message.into())))
    }

    pub fn error_with_code(message: impl Into<Value>, code: Value) -> Exception {
        let mut info = ErrorInfo::new(message.into());
        info.error_code = code;
        Exception::Error(Box::new(info))
    }

    pub(crate) fn with_location(mut self, file: Rc<str>, line: usize) -> Exception {
        if let Exception::Error(info) = &mut self {
            info.trace.push(TraceFrame {
                proc_name: Rc::from(""),
                file,
                line,
                command: Rc::from(""),
            });
        }
        self
    }

    pub fn code(&self) -> Code {
        match self {
            Exception::Error(_) => Code::Error,
            Exception::Break(_) => Code::Break,
            Exception::Continue(_) => Code::Continue,
            Exception::Return { .. } => Code::Return,
            Exception::Signal(_) => Code::Signal,
            Exception::Exit(_) => Code::Exit,
            Exception::Tailcall(_) => Code::Return,
        }
    }

    /// The value this outcome leaves as the interpreter result.
    pub fn value(&self) -> Value {
        match self {
            Exception::Error(info) => info.message.clone(),
            Exception::Return { value, .. } => value.clone(),
            Exception::Signal(name) => name.clone(),
            Exception::Exit(code) => Value::from(*code),
            Exception::Tailcall(argv) => Value::from_list(argv.clone()),
            Exception::Break(_) | Exception::Continue(_) => Value::empty(),
        }
    }

    /// Turns a completion code back into an outcome, as `return -code` and
    /// `error`-style rethrows do.
    pub fn from_code(code: Code, value: Value, error_code: Option<Value>) -> EvalResult {
        match code {
            Code::Ok => Ok(value),
            Code::Error => {
                let mut info = ErrorInfo::new(value);
                if let Some(ec) = error_code {
                    info.error_code = ec;
                }
                Err(Exception::Error(Box::new(info)))
            }
            Code::Return => Err(Exception::Return {
                code: Code::Ok,
                level: 1,
                value,
                error_code,
            }),
            Code::Break => Err(Exception::Break(1)),
            Code::Continue => Err(Exception::Continue(1)),
            Code::Signal => Err(Exception::Signal(value)),
            Code::Exit => Err(Exception::Exit(
                value.get_int().ok().and_then(|n| i32::try_from(n).ok()).unwrap_or(0),
            )),
        }
    }
}

impl From<ParseError> for Exception {
    fn from(e: ParseError) -> Exception {
        Exception::error(e.to_string())
    }
}

impl From<ExprError> for Exception {
    fn from(e: ExprError) -> Exception {
        Exception::error(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_parsing() {
        assert_eq!(Code::parse("break"), Some(Code::Break));
        assert_eq!(Code::parse("4"), Some(Code::Continue));
        assert_eq!(Code::parse("7"), None);
        assert_eq!(Code::parse("nope"), None);
    }

    #[test]
    fn from_code_round_trips() {
        let v = Value::from("x");
        assert_eq!(Exception::from_code(Code::Ok, v.clone(), None).unwrap(), v);
        let e = Exception::from_code(Code::Error, v.clone(), Some(Value::from("A B")))
            .unwrap_err();
        match e {
            Exception::Error(info) => {
                assert_eq!(info.message, "x");
                assert_eq!(info.error_code, "A B");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(Exception::from_code(Code::Break, v, None).unwrap_err().code(), Code::Break);
    }

    #[test]
    fn trace_list_round_trip() {
        let mut info = ErrorInfo::new(Value::from("boom"));
        info.trace.push(TraceFrame {
            proc_name: Rc::from("f"),
            file: Rc::from("a.tcl"),
            line: 3,
            command: Rc::from("error boom"),
        });
        let v = info.trace_value();
        assert_eq!(v.to_string(), "{{error boom} a.tcl 3 f}");
        assert_eq!(ErrorInfo::trace_from_value(&v), info.trace);
    }
}
