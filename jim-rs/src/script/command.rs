//! Commands and procedures.
//!
//! A command is either native (a Rust callback, which carries its own
//! client data by capture) or a procedure defined by `proc`.  Commands are
//! shared through `Rc`, so a procedure that deletes or redefines itself keeps
//! running on the definition it started with.

use std::fmt;
use std::rc::Rc;

use crate::hash::HashTable;

use super::error::{EvalResult, Exception};
use super::frame::{Var, VarCell};
use super::interp::Interpreter;
use super::value::Value;

/// A command implemented in Rust.
///
/// Implemented for every `Fn(&mut Interpreter, &[Value]) -> EvalResult`,
/// so closures can be registered directly.  `argv[0]` is the name the
/// command was invoked by.
pub trait NativeCommand {
    fn call(&self, interp: &mut Interpreter, argv: &[Value]) -> EvalResult;
}

impl<F> NativeCommand for F
where
    F: Fn(&mut Interpreter, &[Value]) -> EvalResult,
{
    fn call(&self, interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
        self(interp, argv)
    }
}

pub enum CommandKind {
    Native(Box<dyn NativeCommand>),
    Proc(Procedure),
}

pub struct Command {
    pub(crate) kind: CommandKind,
    /// The definition this one shadows, restored when a `local` command
    /// goes out of scope and reachable through `upcall`.
    pub(crate) prev: Option<Rc<Command>>,
    deleter: Option<Box<dyn FnOnce()>>,
}

impl Command {
    pub fn new(kind: CommandKind, prev: Option<Rc<Command>>) -> Self {
        Command {
            kind,
            prev,
            deleter: None,
        }
    }

    /// Attaches a callback run when the last reference to the command is
    /// dropped (deleted, replaced, or interpreter teardown).
    pub fn with_deleter(mut self, deleter: impl FnOnce() + 'static) -> Self {
        self.deleter = Some(Box::new(deleter));
        self
    }

    pub fn is_proc(&self) -> bool {
        matches!(self.kind, CommandKind::Proc(_))
    }

    pub(crate) fn as_proc(&self) -> Option<&Procedure> {
        match &self.kind {
            CommandKind::Proc(p) => Some(p),
            CommandKind::Native(_) => None,
        }
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        if let Some(deleter) = self.deleter.take() {
            deleter();
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CommandKind::Native(_) => f.write_str("Command::Native"),
            CommandKind::Proc(p) => f.debug_tuple("Command::Proc").field(&p.arg_list).finish(),
        }
    }
}

// ── Procedures ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub(crate) name: Rc<str>,
    pub(crate) default: Option<Value>,
    /// `&name`: bound as a link to the caller's variable of that name.
    pub(crate) by_ref: bool,
}

impl Param {
    fn is_args(&self) -> bool {
        &*self.name == "args" && self.default.is_none() && !self.by_ref
    }
}

pub struct Procedure {
    pub(crate) params: Vec<Param>,
    /// The argument list as written, for `info args`.
    pub(crate) arg_list: Value,
    pub(crate) body: Value,
    /// Persistent variables seeded from the `statics` argument of `proc`.
    pub(crate) statics: HashTable<Rc<str>, VarCell>,
    required: usize,
    optional: usize,
    has_args: bool,
}

impl Procedure {
    /// Builds a procedure from its argument list.  `statics` are already
    /// evaluated `(name, value)` pairs.
    pub(crate) fn new(
        arg_list: Value,
        body: Value,
        statics: Vec<(Rc<str>, Value)>,
        salt: u64,
    ) -> EvalResult<Procedure> {
        let mut params = Vec::new();
        let (mut required, mut optional, mut has_args) = (0, 0, false);
        for spec in arg_list.get_list()?.iter() {
            let parts = spec.get_list()?;
            let (raw, default) = match parts.len() {
                1 => (parts[0].as_str(), None),
                2 => (parts[0].as_str(), Some(parts[1].clone())),
                0 => return Err(Exception::error("argument with no name")),
                _ => {
                    return Err(Exception::error(format!(
                        "too many fields in argument specifier \"{spec}\""
                    )))
                }
            };
            let (name, by_ref) = match raw.strip_prefix('&') {
                Some(n) => (Rc::from(n), true),
                None => (raw, false),
            };
            if by_ref && default.is_some() {
                return Err(Exception::error(format!(
                    "reference argument \"&{name}\" cannot have a default"
                )));
            }
            let param = Param {
                name,
                default,
                by_ref,
            };
            if param.is_args() {
                if has_args {
                    return Err(Exception::error("'args' specified more than once"));
                }
                has_args = true;
            } else if param.default.is_some() {
                optional += 1;
            } else {
                required += 1;
            }
            params.push(param);
        }
        let mut table = HashTable::with_salt(salt);
        for (name, value) in statics {
            table.replace(name, Var::cell(value));
        }
        Ok(Procedure {
            params,
            arg_list,
            body,
            statics: table,
            required,
            optional,
            has_args,
        })
    }

    /// The `wrong # args` message for a call through `name`.
    pub(crate) fn usage(&self, name: &str) -> Exception {
        let mut usage = name.to_string();
        for p in &self.params {
            usage.push(' ');
            if p.is_args() {
                usage.push_str("?arg ...?");
            } else if p.default.is_some() {
                usage.push('?');
                usage.push_str(&p.name);
                usage.push('?');
            } else {
                usage.push_str(&p.name);
            }
        }
        Exception::error(format!("wrong # args: should be \"{usage}\""))
    }

    /// Distributes `args` (the words after the command name) over the
    /// parameters.  Required parameters are filled first wherever they sit,
    /// then optional ones left to right, and `args` takes whatever remains.
    pub(crate) fn bind<'a>(&'a self, name: &str, args: &[Value]) -> EvalResult<Vec<(&'a Param, Value)>> {
        let given = args.len();
        if given < self.required || (!self.has_args && given > self.required + self.optional) {
            return Err(self.usage(name));
        }
        let mut fill_optional = (given - self.required).min(self.optional);
        let rest = given - self.required - fill_optional;
        let mut bound = Vec::with_capacity(self.params.len());
        let mut args = args.iter();
        let mut next = || args.next().cloned().unwrap_or_default();
        for p in &self.params {
            let value = if p.is_args() {
                Value::from_list((0..rest).map(|_| next()).collect())
            } else if let Some(default) = &p.default {
                if fill_optional > 0 {
                    fill_optional -= 1;
                    next()
                } else {
                    default.clone()
                }
            } else {
                next()
            };
            bound.push((p, value));
        }
        Ok(bound)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn proc_with(args: &str) -> Procedure {
        Procedure::new(Value::from(args), Value::empty(), Vec::new(), 0).expect("bad arglist")
    }

    fn bind(p: &Procedure, args: &[&str]) -> EvalResult<Vec<(String, String)>> {
        let argv: Vec<Value> = args.iter().map(|a| Value::from(*a)).collect();
        Ok(p.bind("f", &argv)?
            .into_iter()
            .map(|(p, v)| (p.name.to_string(), v.to_string()))
            .collect())
    }

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
    }

    #[test]
    fn required_optional_and_args() {
        let p = proc_with("a {b 2} args");
        assert_eq!(bind(&p, &["1"]).unwrap(), pairs(&[("a", "1"), ("b", "2"), ("args", "")]));
        assert_eq!(
            bind(&p, &["1", "x", "y", "z"]).unwrap(),
            pairs(&[("a", "1"), ("b", "x"), ("args", "y z")])
        );
    }

    #[test]
    fn trailing_required_parameters() {
        let p = proc_with("{a 1} args b");
        assert_eq!(bind(&p, &["z"]).unwrap(), pairs(&[("a", "1"), ("args", ""), ("b", "z")]));
        assert_eq!(
            bind(&p, &["x", "y", "z"]).unwrap(),
            pairs(&[("a", "x"), ("args", "y"), ("b", "z")])
        );
    }

    #[test]
    fn arity_errors_name_the_signature() {
        let p = proc_with("a {b 2} args");
        let err = bind(&p, &[]).unwrap_err();
        assert_eq!(err.to_string(), "wrong # args: should be \"f a ?b? ?arg ...?\"");
        let fixed = proc_with("x y");
        assert!(bind(&fixed, &["1", "2", "3"]).is_err());
    }

    #[test]
    fn reference_parameters() {
        let p = proc_with("&v");
        assert!(p.params[0].by_ref);
        assert_eq!(&*p.params[0].name, "v");
        assert!(Procedure::new(Value::from("{&v 1}"), Value::empty(), Vec::new(), 0).is_err());
    }

    #[test]
    fn deleter_runs_on_drop() {
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let cmd = Command::new(
            CommandKind::Native(Box::new(|_: &mut Interpreter, _: &[Value]| -> EvalResult {
                Ok(Value::empty())
            })),
            None,
        )
        .with_deleter(move || flag.set(true));
        assert!(!fired.get());
        drop(cmd);
        assert!(fired.get());
    }
}
