//! The evaluator.
//!
//! A script runs line by line: every word of a line is substituted left to
//! right, then the first word is resolved to a command and invoked.  Non-OK
//! outcomes travel back as [`Exception`]s:
//!
//! | Outcome | Stops at |
//! |---------|----------|
//! | `Error` | `catch`/`try`, else the top level (collecting a stack trace) |
//! | `Break(n)`, `Continue(n)` | the `n`th enclosing loop |
//! | `Return { level, .. }` | the `level`th enclosing procedure |
//! | `Signal` | `catch -signal`, else becomes an error at top level |
//! | `Exit` | the host |
//! | `Tailcall` | the procedure boundary, which re-dispatches in a loop |

use std::any::Any;
use std::borrow::Cow;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::Limits;
use crate::hash::HashTable;

use super::builtins;
use super::command::{Command, CommandKind, NativeCommand, Procedure};
use super::error::{Code, ErrorInfo, EvalResult, Exception, TraceFrame};
use super::expr::{self, ExprContext};
use super::frame::{FramePool, Var, VarCell};
use super::parse::{self, Missing, Part, SubstFlags, Word};
use super::value::Value;

const RED_ZONE: usize = 128 * 1024;
const STACK_GROWTH: usize = 2 * 1024 * 1024;

pub const VERSION: &str = "0.80";

// ── SignalHandle ─────────────────────────────────────────────────────────────

/// Thread-safe handle a host uses to interrupt a running interpreter.
///
/// A raised signal is noticed before the next command is dispatched and
/// unwinds as a `signal` outcome.
#[derive(Debug, Clone, Default)]
pub struct SignalHandle(Arc<AtomicU64>);

impl SignalHandle {
    pub fn raise(&self, signum: u32) {
        self.0.fetch_or(1 << (signum % 64), Ordering::SeqCst);
    }

    fn take(&self) -> Option<u32> {
        let pending = self.0.swap(0, Ordering::SeqCst);
        (pending != 0).then(|| pending.trailing_zeros())
    }
}

/// Conventional name of a signal number.
pub fn signal_name(signum: u32) -> String {
    let known = [
        (libc::SIGHUP, "SIGHUP"),
        (libc::SIGINT, "SIGINT"),
        (libc::SIGQUIT, "SIGQUIT"),
        (libc::SIGKILL, "SIGKILL"),
        (libc::SIGUSR1, "SIGUSR1"),
        (libc::SIGUSR2, "SIGUSR2"),
        (libc::SIGPIPE, "SIGPIPE"),
        (libc::SIGALRM, "SIGALRM"),
        (libc::SIGTERM, "SIGTERM"),
    ];
    known
        .iter()
        .find(|(n, _)| u32::try_from(*n).ok() == Some(signum))
        .map_or_else(|| format!("SIG{signum}"), |(_, name)| (*name).to_string())
}

// ── Rng ──────────────────────────────────────────────────────────────────────

/// xorshift64* generator backing `rand` and the `rand()` math function.
#[derive(Debug, Clone)]
pub(crate) struct Rng(u64);

impl Rng {
    pub(crate) fn new(seed: u64) -> Self {
        Rng((seed ^ 0x9E37_79B9_7F4A_7C15) | 1)
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in `[0, 1)`.
    pub(crate) fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn random_seed() -> u64 {
    RandomState::new().build_hasher().finish()
}

// ── Variable slots ───────────────────────────────────────────────────────────

/// Where a variable name ends up after following links.
enum Slot {
    Cell(VarCell),
    Vacant { frame: usize, name: Rc<str> },
}

fn cell_value(cell: &VarCell) -> Option<Value> {
    match &*cell.borrow() {
        Var::Value(v) => Some(v.clone()),
        Var::Link { .. } => None,
    }
}

/// Splits `name(key)` into the dict variable and the key.
pub(crate) fn split_dict_sugar(name: &str) -> Option<(&str, &str)> {
    let open = name.find('(')?;
    (open > 0 && name.len() > open + 1 && name.ends_with(')'))
        .then(|| (&name[..open], &name[open + 1..name.len() - 1]))
}

fn no_such_var(op: &str, name: &str) -> Exception {
    Exception::error(format!("can't {op} \"{name}\": no such variable"))
}

enum ProcExit {
    Done(Value),
    Tailcall(Vec<Value>),
}

// ── Interpreter ──────────────────────────────────────────────────────────────

pub struct Interpreter {
    commands: HashTable<Rc<str>, Rc<Command>>,
    /// Bumped whenever the command table changes; stamps cached lookups.
    proc_epoch: u64,
    pub(crate) frames: FramePool,
    /// The frame variables resolve in (differs from the innermost
    /// activation while `uplevel` runs).
    pub(crate) current: usize,
    call_depth: usize,
    eval_depth: usize,
    unknown_depth: usize,
    /// While non-zero, new commands shadow old ones and are restored when
    /// the current frame exits.
    pub(crate) local_depth: usize,
    limits: Limits,
    salt: u64,
    signal: SignalHandle,
    trace_hook: Option<Value>,
    in_trace_hook: bool,
    /// File and line of the command being dispatched.
    location: (Rc<str>, usize),
    script_file: Rc<str>,
    pub(crate) rng: Rng,
    last_error: Option<ErrorInfo>,
    assoc: HashMap<String, Box<dyn Any>>,
    pub(crate) packages: HashTable<Rc<str>, Value>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// An interpreter with the core command set and default limits.
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        let salt = limits.hash_salt.unwrap_or_else(random_seed);
        let mut interp = Interpreter {
            commands: HashTable::with_salt(salt),
            proc_epoch: 0,
            frames: FramePool::new(salt),
            current: FramePool::GLOBAL,
            call_depth: 0,
            eval_depth: 0,
            unknown_depth: 0,
            local_depth: 0,
            limits,
            salt,
            signal: SignalHandle::default(),
            trace_hook: None,
            in_trace_hook: false,
            location: (Rc::from(""), 0),
            script_file: Rc::from(""),
            rng: Rng::new(random_seed()),
            last_error: None,
            assoc: HashMap::new(),
            packages: HashTable::with_salt(salt),
        };
        builtins::register_all(&mut interp);
        debug!(commands = interp.commands.len(), "interpreter created");
        interp
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn signal_handle(&self) -> SignalHandle {
        self.signal.clone()
    }

    /// Checks whether `src` is a complete script, reporting what an
    /// unfinished one is waiting for.
    pub fn is_complete(src: &str) -> Result<(), Missing> {
        parse::is_complete(src)
    }

    // ── Evaluation entry points ──────────────────────────────────────────────

    /// Evaluates a script in the current frame.  The outcome is returned
    /// raw, so a native command can propagate it with `?`.
    pub fn eval(&mut self, script: &str) -> EvalResult {
        self.eval_value(&Value::from(script))
    }

    /// Evaluates a script as the host's top level: a `return` completes
    /// it, stray `break`/`continue` and uncaught signals become errors,
    /// and an error is remembered for [`Interpreter::stack_trace`].
    pub fn eval_toplevel(&mut self, script: &str) -> EvalResult {
        let result = self.eval(script);
        self.complete(result)
    }

    /// Evaluates the contents of a script file at top level, recording
    /// `file` for stack traces and `info script`.
    pub fn eval_source(&mut self, src: &str, file: &str) -> EvalResult {
        let file: Rc<str> = Rc::from(file);
        let saved = std::mem::replace(&mut self.script_file, file.clone());
        let result = self.eval_value(&Value::with_source(src, file, 1));
        self.script_file = saved;
        self.complete(result)
    }

    /// Evaluates a prebuilt command, one word per element.
    pub fn eval_command(&mut self, argv: &[Value]) -> EvalResult {
        self.invoke(argv)
    }

    /// Evaluates a script value, reusing its cached parse.  A list with no
    /// string form runs as a single command without reparsing.
    pub fn eval_value(&mut self, script: &Value) -> EvalResult {
        if script.is_pure_list() {
            let argv = script.get_list()?;
            return self.invoke(&argv);
        }
        let parsed = script.get_script()?;
        stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.run_script(&parsed))
    }

    /// Evaluates `script` with `frame` as the current frame (`uplevel`).
    pub(crate) fn eval_in_frame(&mut self, frame: usize, script: &Value) -> EvalResult {
        let saved = std::mem::replace(&mut self.current, frame);
        let result = self.eval_value(script);
        self.current = saved;
        result
    }

    /// Evaluates a script in the global frame.
    pub fn eval_global(&mut self, script: &str) -> EvalResult {
        self.eval_in_frame(FramePool::GLOBAL, &Value::from(script))
    }

    /// Maps an outcome that reached the host to what the host sees.
    pub fn complete(&mut self, result: EvalResult) -> EvalResult {
        let result = match result {
            Err(Exception::Return {
                code: Code::Ok | Code::Return,
                value,
                ..
            }) => Ok(value),
            Err(Exception::Return {
                code,
                value,
                error_code,
                ..
            }) => Exception::from_code(code, value, error_code),
            other => other,
        };
        let result = match result {
            Err(
                e @ (Exception::Break(_)
                | Exception::Continue(_)
                | Exception::Signal(_)
                | Exception::Tailcall(_)),
            ) => Err(Exception::error(e.to_string())),
            other => other,
        };
        if let Err(Exception::Error(info)) = &result {
            self.record_error(info);
        }
        result
    }

    fn run_script(&mut self, script: &parse::Script) -> EvalResult {
        let mut result = Value::empty();
        for line in &script.lines {
            self.location = (script.file.clone(), line.line);
            let argv = match self.substitute_words(&line.words) {
                Ok(argv) => argv,
                Err(e) => {
                    let name = Value::from("");
                    return Err(self.annotate(e, &script.file, line.line, &name));
                }
            };
            if argv.is_empty() {
                continue;
            }
            result = match self.invoke(&argv) {
                Ok(v) => v,
                Err(e) => return Err(self.annotate(e, &script.file, line.line, &argv[0])),
            };
        }
        Ok(result)
    }

    /// Adds a stack-trace level to an error that has not yet been placed
    /// at this level.
    fn annotate(&self, e: Exception, file: &Rc<str>, line: usize, command: &Value) -> Exception {
        match e {
            Exception::Error(mut info) if info.record_next => {
                info.trace.push(TraceFrame {
                    proc_name: self.frames.get(self.current).proc_name(),
                    file: file.clone(),
                    line,
                    command: command.as_str(),
                });
                info.record_next = false;
                Exception::Error(info)
            }
            other => other,
        }
    }

    // ── Substitution ─────────────────────────────────────────────────────────

    fn substitute_words(&mut self, words: &[Word]) -> EvalResult<Vec<Value>> {
        let mut argv = Vec::with_capacity(words.len());
        for word in words {
            let value = self.substitute_word(&word.parts)?;
            if word.expand {
                argv.extend(value.get_list()?.iter().cloned());
            } else {
                argv.push(value);
            }
        }
        Ok(argv)
    }

    /// A word's value.  A single-part word keeps the part's value object,
    /// native form included.
    pub(crate) fn substitute_word(&mut self, parts: &[Part]) -> EvalResult {
        if let [only] = parts {
            return self.substitute_part(only);
        }
        let mut out = String::new();
        for part in parts {
            out.push_str(&self.substitute_part(part)?.as_str());
        }
        Ok(Value::from(out))
    }

    pub(crate) fn substitute_part(&mut self, part: &Part) -> EvalResult {
        match part {
            Part::Literal(v) => Ok(v.clone()),
            Part::Var(name) => self.get_var_value(name),
            Part::DictSugar { var, key } => {
                let key = self.substitute_word(key)?;
                self.dict_sugar_get(var, &key.as_str())
            }
            Part::Expr(e) => self.eval_expr(e),
            Part::Command(script) => self.eval_value(script),
        }
    }

    /// `subst`: `break` inside a command substitution ends the result
    /// early and `continue` drops that one substitution.
    pub(crate) fn subst(&mut self, text: &Value, flags: SubstFlags) -> EvalResult {
        let (file, line) = self.location.clone();
        let parts = parse::parse_subst(&text.as_str(), flags, line, &file)?;
        let mut out = String::new();
        for part in &parts {
            match self.substitute_part(part) {
                Ok(v) => out.push_str(&v.as_str()),
                Err(Exception::Break(_)) => break,
                Err(Exception::Continue(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Value::from(out))
    }

    pub(crate) fn eval_expr(&mut self, expr: &Value) -> EvalResult {
        let tree = expr.get_expr()?;
        expr::eval_expr(&tree, self)
    }

    pub(crate) fn eval_condition(&mut self, expr: &Value) -> EvalResult<bool> {
        self.eval_expr(expr)?.get_bool()
    }

    // ── Dispatch ─────────────────────────────────────────────────────────────

    /// Runs one command.  Every dispatch counts against the eval depth, so
    /// native commands that re-enter the interpreter are bounded too.
    pub(crate) fn invoke(&mut self, argv: &[Value]) -> EvalResult {
        if self.eval_depth >= self.limits.max_eval_depth {
            warn!(depth = self.eval_depth, "eval depth limit reached");
            return Err(Exception::error("Infinite eval recursion"));
        }
        self.eval_depth += 1;
        let result = stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.dispatch(argv));
        self.eval_depth -= 1;
        result
    }

    fn dispatch(&mut self, argv: &[Value]) -> EvalResult {
        let mut argv = Cow::Borrowed(argv);
        loop {
            if let Some(signum) = self.signal.take() {
                return Err(Exception::Signal(Value::from(signal_name(signum))));
            }
            let Some(name) = argv.first() else {
                return Ok(Value::empty());
            };
            let Some(cmd) = self.lookup_command(name) else {
                return self.call_unknown(&argv);
            };
            if self.trace_hook.is_some() && !self.in_trace_hook {
                self.call_trace_hook(&argv)?;
            }
            let next = match &cmd.kind {
                CommandKind::Native(f) => return f.call(self, &argv),
                CommandKind::Proc(p) => match self.call_proc(&cmd, p, &argv)? {
                    ProcExit::Done(v) => return Ok(v),
                    ProcExit::Tailcall(next) => next,
                },
            };
            if let Some(first) = next.first() {
                trace!(command = %first, "tailcall");
            }
            argv = Cow::Owned(next);
        }
    }

    fn call_unknown(&mut self, argv: &[Value]) -> EvalResult {
        let invalid = || Exception::error(format!("invalid command name \"{}\"", argv[0]));
        if self.unknown_depth >= self.limits.max_unknown_depth {
            warn!(depth = self.unknown_depth, "unknown handler recursion limit reached");
            return Err(invalid());
        }
        if !self.commands.contains_key("unknown") {
            return Err(invalid());
        }
        let mut call = Vec::with_capacity(argv.len() + 1);
        call.push(Value::from("unknown"));
        call.extend_from_slice(argv);
        self.unknown_depth += 1;
        let result = self.invoke(&call);
        self.unknown_depth -= 1;
        result
    }

    fn call_trace_hook(&mut self, argv: &[Value]) -> EvalResult<()> {
        let Some(hook) = self.trace_hook.clone() else {
            return Ok(());
        };
        let mut call = hook.get_list()?.to_vec();
        let (file, line) = self.location.clone();
        call.extend([
            argv[0].clone(),
            Value::from(file),
            Value::from(line),
            Value::from_list(argv.to_vec()),
        ]);
        self.in_trace_hook = true;
        let result = self.invoke(&call);
        self.in_trace_hook = false;
        result.map(|_| ())
    }

    /// Runs a procedure body in a fresh frame.
    fn call_proc(&mut self, cmd: &Rc<Command>, proc: &Procedure, argv: &[Value]) -> EvalResult<ProcExit> {
        if self.call_depth >= self.limits.max_call_depth {
            warn!(depth = self.call_depth, "call depth limit reached");
            return Err(Exception::error("Too many nested calls. Infinite recursion?"));
        }
        let name = argv[0].as_str();
        let bound = proc.bind(&name, &argv[1..])?;
        let caller = self.current;
        let frame = self.frames.alloc(caller, cmd.clone(), argv.to_vec());
        for (param, value) in bound {
            if param.by_ref {
                if let Err(e) = self.link_var_in(frame, &param.name, caller, &value.as_str()) {
                    self.frames.release(frame);
                    return Err(e);
                }
            } else {
                self.frames
                    .get_mut(frame)
                    .vars
                    .replace(param.name.clone(), Var::cell(value));
            }
        }

        self.current = frame;
        self.call_depth += 1;
        trace!(proc = %name, depth = self.call_depth, "enter");
        let result = self.eval_value(&proc.body);
        let result = self.run_defers(frame, result);
        self.restore_local_commands(frame);
        self.call_depth -= 1;
        self.current = caller;
        self.frames.release(frame);
        trace!(proc = %name, "leave");

        match result {
            Ok(v) => Ok(ProcExit::Done(v)),
            Err(Exception::Return {
                code,
                level,
                value,
                error_code,
            }) => {
                if level > 1 {
                    return Err(Exception::Return {
                        code,
                        level: level - 1,
                        value,
                        error_code,
                    });
                }
                match code {
                    Code::Ok => Ok(ProcExit::Done(value)),
                    code => Exception::from_code(code, value, error_code).map(ProcExit::Done),
                }
            }
            Err(Exception::Tailcall(next)) => Ok(ProcExit::Tailcall(next)),
            Err(Exception::Error(mut info)) => {
                info.record_next = true;
                Err(Exception::Error(info))
            }
            Err(e @ (Exception::Break(_) | Exception::Continue(_))) => {
                Err(Exception::error(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Runs `defer` scripts newest first.  An error from a deferred script
    /// replaces any outcome except an earlier error.
    fn run_defers(&mut self, frame: usize, mut result: EvalResult) -> EvalResult {
        let defers = std::mem::take(&mut self.frames.get_mut(frame).defers);
        for script in defers.into_iter().rev() {
            if let Err(e @ Exception::Error(_)) = self.eval_value(&script) {
                if !matches!(result, Err(Exception::Error(_))) {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Calls a command object directly, bypassing name resolution (`apply`
    /// lambdas and `upcall`).  A tailcall out of it is dispatched here.
    pub(crate) fn call_command(&mut self, cmd: Rc<Command>, argv: &[Value]) -> EvalResult {
        let next = match &cmd.kind {
            CommandKind::Native(f) => return f.call(self, argv),
            CommandKind::Proc(p) => match self.call_proc(&cmd, p, argv)? {
                ProcExit::Done(v) => return Ok(v),
                ProcExit::Tailcall(next) => next,
            },
        };
        self.invoke(&next)
    }

    pub(crate) fn register_defer(&mut self, script: Value) {
        let frame = self.current;
        self.frames.get_mut(frame).defers.push(script);
    }

    // ── Command table ────────────────────────────────────────────────────────

    fn command_key(name: &str) -> &str {
        name.strip_prefix("::").unwrap_or(name)
    }

    pub(crate) fn lookup_command(&mut self, name: &Value) -> Option<Rc<Command>> {
        if let Some(cmd) = name.cached_command(self.proc_epoch) {
            return Some(cmd);
        }
        let text = name.as_str();
        let cmd = self.commands.get(Self::command_key(&text))?.clone();
        name.cache_command(self.proc_epoch, &cmd);
        Some(cmd)
    }

    pub(crate) fn find_command(&self, name: &str) -> Option<Rc<Command>> {
        self.commands.get(Self::command_key(name)).cloned()
    }

    /// Adds a command under `name`, replacing any existing one.  Inside
    /// `local` the old definition is kept as the new one's predecessor and
    /// comes back when the current frame exits.
    pub fn create_command(&mut self, name: &str, mut cmd: Command) {
        let key: Rc<str> = Rc::from(Self::command_key(name));
        if self.local_depth > 0 {
            cmd.prev = self.commands.get(&*key).cloned();
            let frame = self.current;
            self.frames.get_mut(frame).local_cmds.push(key.clone());
        }
        self.commands.replace(key.clone(), Rc::new(cmd));
        self.proc_epoch += 1;
        debug!(command = %key, "command created");
    }

    /// Registers a native command.
    pub fn register_command<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut Interpreter, &[Value]) -> EvalResult + 'static,
    {
        self.create_command(name, Command::new(CommandKind::Native(Box::new(f)), None));
    }

    /// Registers a native command with a callback run when the command is
    /// deleted or the interpreter is dropped.
    pub fn register_command_with_deleter<F, D>(&mut self, name: &str, f: F, deleter: D)
    where
        F: NativeCommand + 'static,
        D: FnOnce() + 'static,
    {
        let cmd = Command::new(CommandKind::Native(Box::new(f)), None).with_deleter(deleter);
        self.create_command(name, cmd);
    }

    pub fn delete_command(&mut self, name: &str) -> EvalResult<()> {
        if self.commands.remove(Self::command_key(name)).is_none() {
            return Err(Exception::error(format!(
                "can't delete \"{name}\": command doesn't exist"
            )));
        }
        self.proc_epoch += 1;
        debug!(command = name, "command deleted");
        Ok(())
    }

    /// Renames a command; an empty `new` deletes it.
    pub fn rename_command(&mut self, old: &str, new: &str) -> EvalResult<()> {
        if new.is_empty() {
            return self.delete_command(old);
        }
        let new_key = Self::command_key(new);
        if self.commands.contains_key(new_key) {
            return Err(Exception::error(format!(
                "can't rename to \"{new}\": command already exists"
            )));
        }
        let Some((_, cmd)) = self.commands.remove_entry(Self::command_key(old)) else {
            return Err(Exception::error(format!(
                "can't rename \"{old}\": command doesn't exist"
            )));
        };
        self.commands.replace(Rc::from(new_key), cmd);
        self.proc_epoch += 1;
        debug!(from = old, to = new, "command renamed");
        Ok(())
    }

    pub fn command_exists(&self, name: &str) -> bool {
        self.commands.contains_key(Self::command_key(name))
    }

    pub(crate) fn command_names(&self) -> impl Iterator<Item = (&Rc<str>, &Rc<Command>)> {
        self.commands.iter()
    }

    fn restore_local_commands(&mut self, frame: usize) {
        let names = std::mem::take(&mut self.frames.get_mut(frame).local_cmds);
        for name in names.into_iter().rev() {
            let Some(cmd) = self.commands.get(&*name).cloned() else {
                continue;
            };
            match cmd.prev.clone() {
                Some(prev) => {
                    self.commands.replace(name.clone(), prev);
                }
                None => {
                    self.commands.remove(&*name);
                }
            }
            self.proc_epoch += 1;
            debug!(command = %name, "local command restored");
        }
    }

    /// Defines a procedure.  Static variables are given as the `statics`
    /// list of `proc`: `name` copies the variable from the current frame,
    /// `{name value}` sets it explicitly.
    pub(crate) fn create_proc(
        &mut self,
        name: &str,
        args: &Value,
        statics: Option<&Value>,
        body: &Value,
    ) -> EvalResult<()> {
        let proc = self.build_procedure(args, statics, body)?;
        self.create_command(name, Command::new(CommandKind::Proc(proc), None));
        Ok(())
    }

    pub(crate) fn build_procedure(
        &mut self,
        args: &Value,
        statics: Option<&Value>,
        body: &Value,
    ) -> EvalResult<Procedure> {
        let mut seeds = Vec::new();
        if let Some(statics) = statics {
            for spec in statics.get_list()?.iter() {
                let parts = spec.get_list()?;
                match parts.len() {
                    1 => {
                        let name = parts[0].as_str();
                        let value = self.get_var(&name).map_err(|_| {
                            Exception::error(format!(
                                "variable for initialization of static \"{name}\" not found in the local context"
                            ))
                        })?;
                        seeds.push((name, value));
                    }
                    2 => seeds.push((parts[0].as_str(), parts[1].clone())),
                    _ => {
                        return Err(Exception::error(format!(
                            "too many fields in static specifier \"{spec}\""
                        )))
                    }
                }
            }
        }
        Procedure::new(args.clone(), body.clone(), seeds, self.salt)
    }

    // ── Frames and levels ────────────────────────────────────────────────────

    pub(crate) fn current_level(&self) -> usize {
        self.frames.get(self.current).level
    }

    /// Parses a level argument: `N` walks `N` callers up from the current
    /// frame, `#N` names an absolute level.
    pub(crate) fn resolve_level(&self, spec: &str) -> Option<usize> {
        if let Some(abs) = spec.strip_prefix('#') {
            let target: usize = abs.parse().ok()?;
            let mut frame = self.current;
            loop {
                let f = self.frames.get(frame);
                if f.level == target {
                    return Some(frame);
                }
                if frame == FramePool::GLOBAL {
                    return None;
                }
                frame = f.parent;
            }
        }
        let up: usize = spec.parse().ok()?;
        let mut frame = self.current;
        for _ in 0..up {
            if frame == FramePool::GLOBAL {
                return None;
            }
            frame = self.frames.get(frame).parent;
        }
        Some(frame)
    }

    /// True if `spec` looks like a level rather than a name.
    pub(crate) fn is_level(spec: &str) -> bool {
        let digits = spec.strip_prefix('#').unwrap_or(spec);
        !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
    }

    // ── Variables ────────────────────────────────────────────────────────────

    fn scope_of<'a>(&self, name: &'a str) -> (usize, &'a str) {
        match name.strip_prefix("::") {
            Some(rest) => (FramePool::GLOBAL, rest),
            None => (self.current, name),
        }
    }

    /// The cell stored under `name` in `frame`, falling back to the
    /// frame's procedure statics.
    fn lookup_cell(&self, frame: usize, name: &str) -> Option<VarCell> {
        let f = self.frames.get(frame);
        if let Some(cell) = f.vars.get(name) {
            return Some(cell.clone());
        }
        f.proc.as_ref()?.as_proc()?.statics.get(name).cloned()
    }

    /// Follows links from a first-hop cell to the variable they name.
    fn follow(&self, frame: usize, name: &str, cell: Option<VarCell>) -> EvalResult<Slot> {
        let Some(mut cell) = cell else {
            return Ok(Slot::Vacant {
                frame,
                name: Rc::from(name),
            });
        };
        loop {
            let link = match &*cell.borrow() {
                Var::Value(_) => None,
                Var::Link { frame, name } => Some((*frame, name.clone())),
            };
            let Some((target_ref, target)) = link else {
                return Ok(Slot::Cell(cell));
            };
            let target_frame = self.frames.resolve(target_ref).ok_or_else(|| {
                Exception::error(format!(
                    "can't access \"{target}\": the linked frame has returned"
                ))
            })?;
            match self.lookup_cell(target_frame, &target) {
                Some(next) => cell = next,
                None => {
                    return Ok(Slot::Vacant {
                        frame: target_frame,
                        name: target,
                    })
                }
            }
        }
    }

    /// Resolves a variable-name value, caching the first-hop cell on it.
    fn resolve_name(&mut self, name: &Value) -> EvalResult<Slot> {
        let text = name.as_str();
        let (frame, bare) = self.scope_of(&text);
        let id = self.frames.get(frame).id;
        let cell = match name.cached_var(id) {
            Some(cell) => Some(cell),
            None => {
                let cell = self.lookup_cell(frame, bare);
                if let Some(c) = &cell {
                    name.cache_var(id, c);
                }
                cell
            }
        };
        self.follow(frame, bare, cell)
    }

    fn insert_var(&mut self, frame: usize, name: Rc<str>, cell: VarCell) {
        let shadows_static = self
            .frames
            .get(frame)
            .proc
            .as_ref()
            .and_then(|p| p.as_proc())
            .is_some_and(|p| p.statics.contains_key(&*name));
        self.frames.get_mut(frame).vars.replace(name, cell);
        if shadows_static {
            self.frames.renew_id(frame);
        }
    }

    pub fn get_var(&mut self, name: &str) -> EvalResult<Value> {
        self.get_var_value(&Value::from(name))
    }

    pub(crate) fn get_var_value(&mut self, name: &Value) -> EvalResult<Value> {
        let text = name.as_str();
        if let Some((var, key)) = split_dict_sugar(&text) {
            return self.dict_sugar_get(&Value::from(var), key);
        }
        match self.resolve_name(name)? {
            Slot::Cell(cell) => cell_value(&cell).ok_or_else(|| no_such_var("read", &text)),
            Slot::Vacant { .. } => Err(no_such_var("read", &text)),
        }
    }

    pub fn set_var(&mut self, name: &str, value: Value) -> EvalResult<Value> {
        self.set_var_value(&Value::from(name), value)
    }

    pub(crate) fn set_var_value(&mut self, name: &Value, value: Value) -> EvalResult<Value> {
        let text = name.as_str();
        if let Some((var, key)) = split_dict_sugar(&text) {
            self.dict_sugar_set(var, key, value.clone())?;
            return Ok(value);
        }
        match self.resolve_name(name)? {
            Slot::Cell(cell) => *cell.borrow_mut() = Var::Value(value.clone()),
            Slot::Vacant { frame, name } => self.insert_var(frame, name, Var::cell(value.clone())),
        }
        Ok(value)
    }

    pub fn get_global_var(&mut self, name: &str) -> EvalResult<Value> {
        let saved = std::mem::replace(&mut self.current, FramePool::GLOBAL);
        let result = self.get_var(name);
        self.current = saved;
        result
    }

    pub fn set_global_var(&mut self, name: &str, value: Value) -> EvalResult<Value> {
        let saved = std::mem::replace(&mut self.current, FramePool::GLOBAL);
        let result = self.set_var(name, value);
        self.current = saved;
        result
    }

    pub fn var_exists(&mut self, name: &str) -> bool {
        self.get_var(name).is_ok()
    }

    /// Changes a variable in place.  The variable's value is detached from
    /// the cell while `f` runs, so an unshared value is mutated without a
    /// copy.  A missing variable is created from `init`, or is an error
    /// when `init` is `None`.
    pub(crate) fn modify_var<R>(
        &mut self,
        name: &Value,
        init: Option<Value>,
        f: impl FnOnce(&mut Value) -> EvalResult<R>,
    ) -> EvalResult<R> {
        let text = name.as_str();
        if let Some((var, key)) = split_dict_sugar(&text) {
            let mut elem = match (self.dict_sugar_get(&Value::from(var), key), init) {
                (Ok(v), _) => v,
                (Err(_), Some(init)) => init,
                (Err(e), None) => return Err(e),
            };
            let result = f(&mut elem)?;
            self.dict_sugar_set(var, key, elem)?;
            return Ok(result);
        }
        let cell = match self.resolve_name(name)? {
            Slot::Cell(cell) => cell,
            Slot::Vacant { frame, name: bare } => match init {
                Some(init) => {
                    let cell = Var::cell(init);
                    self.insert_var(frame, bare, cell.clone());
                    cell
                }
                None => return Err(no_such_var("read", &text)),
            },
        };
        let mut value = match &mut *cell.borrow_mut() {
            Var::Value(v) => std::mem::take(v),
            Var::Link { .. } => return Err(no_such_var("read", &text)),
        };
        let result = f(&mut value);
        if let Var::Value(slot) = &mut *cell.borrow_mut() {
            *slot = value;
        }
        result
    }

    pub fn unset_var(&mut self, name: &str) -> EvalResult<()> {
        if let Some((var, key)) = split_dict_sugar(name) {
            let mut missing = false;
            self.modify_var(&Value::from(var), None, |d| {
                missing = d.dict_mut()?.remove(key).is_none();
                Ok(())
            })?;
            if missing {
                return Err(Exception::error(format!(
                    "can't unset \"{name}\": no such element in array"
                )));
            }
            return Ok(());
        }
        let (mut frame, bare) = self.scope_of(name);
        let mut key: Rc<str> = Rc::from(bare);
        loop {
            let Some(cell) = self.frames.get(frame).vars.get(&*key).cloned() else {
                return Err(no_such_var("unset", name));
            };
            let link = match &*cell.borrow() {
                Var::Value(_) => None,
                Var::Link { frame, name } => Some((*frame, name.clone())),
            };
            match link {
                Some((target_ref, target)) => {
                    frame = self
                        .frames
                        .resolve(target_ref)
                        .ok_or_else(|| no_such_var("unset", name))?;
                    key = target;
                }
                None => break,
            }
        }
        self.frames.get_mut(frame).vars.remove(&*key);
        self.frames.renew_id(frame);
        Ok(())
    }

    /// Makes `my_name` in the current frame an alias of `other` in `frame`.
    pub fn link_var(&mut self, my_name: &str, frame: usize, other: &str) -> EvalResult<()> {
        self.link_var_in(self.current, my_name, frame, other)
    }

    pub(crate) fn link_var_in(
        &mut self,
        from: usize,
        my_name: &str,
        frame: usize,
        other: &str,
    ) -> EvalResult<()> {
        if split_dict_sugar(my_name).is_some() || my_name.contains("::") {
            return Err(Exception::error(format!("bad variable name \"{my_name}\"")));
        }
        let (mut target_frame, bare) = match other.strip_prefix("::") {
            Some(rest) => (FramePool::GLOBAL, rest),
            None => (frame, other),
        };
        let mut target: Rc<str> = Rc::from(bare);
        while let Some(cell) = self.frames.get(target_frame).vars.get(&*target).cloned() {
            let link = match &*cell.borrow() {
                Var::Value(_) => None,
                Var::Link { frame, name } => Some((*frame, name.clone())),
            };
            let Some((r, name)) = link else { break };
            target_frame = self
                .frames
                .resolve(r)
                .ok_or_else(|| no_such_var("upvar", other))?;
            target = name;
        }
        if target_frame == from && &*target == my_name {
            return Err(Exception::error("can't upvar from variable to itself"));
        }
        if let Some(existing) = self.frames.get(from).vars.get(my_name) {
            if matches!(&*existing.borrow(), Var::Value(_)) {
                return Err(Exception::error(format!(
                    "variable \"{my_name}\" already exists"
                )));
            }
        }
        let link = Var::Link {
            frame: self.frames.frame_ref(target_frame),
            name: target,
        };
        self.frames
            .get_mut(from)
            .vars
            .replace(Rc::from(my_name), Rc::new(std::cell::RefCell::new(link)));
        self.frames.renew_id(from);
        Ok(())
    }

    fn dict_sugar_get(&mut self, var: &Value, key: &str) -> EvalResult<Value> {
        let dict = self.get_var_value(var)?.get_dict()?;
        dict.get(key).cloned().ok_or_else(|| {
            Exception::error(format!(
                "can't read \"{var}({key})\": no such element in array"
            ))
        })
    }

    fn dict_sugar_set(&mut self, var: &str, key: &str, value: Value) -> EvalResult<()> {
        self.modify_var(&Value::from(var), Some(Value::empty()), |d| {
            d.dict_mut()?.set(Value::from(key), value);
            Ok(())
        })
    }

    /// Names of the variables visible in `frame` (locals, links and
    /// statics).
    pub(crate) fn var_names(&self, frame: usize, include_links: bool) -> Vec<Rc<str>> {
        let f = self.frames.get(frame);
        let mut names: Vec<Rc<str>> = f
            .vars
            .iter()
            .filter(|(_, cell)| include_links || matches!(&*cell.borrow(), Var::Value(_)))
            .map(|(name, _)| name.clone())
            .collect();
        if let Some(p) = f.proc.as_ref().and_then(|c| c.as_proc()) {
            names.extend(p.statics.keys().filter(|k| !f.vars.contains_key(&***k)).cloned());
        }
        names
    }

    // ── Errors and hooks ─────────────────────────────────────────────────────

    pub(crate) fn record_error(&mut self, info: &ErrorInfo) {
        self.last_error = Some(info.clone());
        let saved = std::mem::replace(&mut self.current, FramePool::GLOBAL);
        if let Err(e) = self.set_var("errorCode", info.error_code.clone()) {
            warn!(error = %e, "could not record errorCode");
        }
        self.current = saved;
    }

    /// The most recent error that reached the top level or was caught.
    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    /// Stack trace of the last error as `{command file line proc}` lists.
    pub fn stack_trace(&self) -> Value {
        self.last_error
            .as_ref()
            .map_or_else(Value::empty, ErrorInfo::trace_value)
    }

    /// Machine-readable code of the last error, `NONE` if unset.
    pub fn error_code(&self) -> Value {
        self.last_error
            .as_ref()
            .map_or_else(|| Value::from("NONE"), |info| info.error_code.clone())
    }

    /// Human-readable report of an uncaught outcome.
    pub fn format_error(&self, e: &Exception) -> String {
        let Exception::Error(info) = e else {
            return e.to_string();
        };
        let mut out = match info.trace.first() {
            Some(f) if !f.file.is_empty() => {
                format!("Runtime Error: {}:{}: {}", f.file, f.line, info.message)
            }
            _ => format!("Runtime Error: {}", info.message),
        };
        for pair in info.trace.windows(2) {
            let (inner, outer) = (&pair[0], &pair[1]);
            if inner.proc_name.is_empty() {
                continue;
            }
            out.push_str(&format!(
                "\nin procedure '{}' called at file \"{}\", line {}",
                inner.proc_name, outer.file, outer.line
            ));
        }
        out
    }

    /// Installs or clears the command trace hook.  The hook is invoked as
    /// `hook cmdname file line argv` before every command, except those
    /// the hook itself runs.
    pub fn set_trace_hook(&mut self, hook: Option<Value>) {
        debug!(installed = hook.is_some(), "trace hook changed");
        self.trace_hook = hook;
    }

    pub fn trace_hook(&self) -> Option<&Value> {
        self.trace_hook.as_ref()
    }

    /// Attaches host data to the interpreter under `key`.
    pub fn set_assoc_data<T: Any>(&mut self, key: &str, data: T) {
        self.assoc.insert(key.to_string(), Box::new(data));
    }

    pub fn assoc_data<T: Any>(&self, key: &str) -> Option<&T> {
        self.assoc.get(key)?.downcast_ref()
    }

    pub fn assoc_data_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.assoc.get_mut(key)?.downcast_mut()
    }

    pub fn delete_assoc_data(&mut self, key: &str) -> bool {
        self.assoc.remove(key).is_some()
    }

    /// Records a package as available.
    pub fn provide_package(&mut self, name: &str, version: &str) {
        debug!(package = name, version, "package provided");
        self.packages.replace(Rc::from(name), Value::from(version));
    }

    pub fn package_version(&self, name: &str) -> Option<Value> {
        self.packages.get(name).cloned()
    }

    pub(crate) fn script_file(&self) -> Rc<str> {
        self.script_file.clone()
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.current = FramePool::GLOBAL;
        let defers = std::mem::take(&mut self.frames.get_mut(FramePool::GLOBAL).defers);
        for script in defers.into_iter().rev() {
            let _ = self.eval_value(&script);
        }
    }
}

impl ExprContext for Interpreter {
    fn substitute(&mut self, part: &Part) -> EvalResult {
        self.substitute_part(part)
    }

    fn substitute_parts(&mut self, parts: &[Part]) -> EvalResult {
        let mut out = String::new();
        for part in parts {
            out.push_str(&self.substitute_part(part)?.as_str());
        }
        Ok(Value::from(out))
    }

    fn rand(&mut self) -> f64 {
        self.rng.next_f64()
    }

    fn srand(&mut self, seed: i64) {
        self.rng = Rng::new(seed as u64);
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn run(interp: &mut Interpreter, src: &str) -> String {
        match interp.eval_toplevel(src) {
            Ok(v) => v.to_string(),
            Err(e) => panic!("script failed: {}", interp.format_error(&e)),
        }
    }

    fn run_err(interp: &mut Interpreter, src: &str) -> String {
        interp
            .eval_toplevel(src)
            .expect_err("script should fail")
            .to_string()
    }

    #[test]
    fn proc_locals_are_private() {
        let mut i = Interpreter::new();
        run(&mut i, "set x outer; proc f {} { set x inner; return $x }");
        assert_eq!(run(&mut i, "f"), "inner");
        assert_eq!(run(&mut i, "set x"), "outer");
    }

    #[test]
    fn upvar_writes_are_visible_immediately() {
        let mut i = Interpreter::new();
        run(
            &mut i,
            "proc g {} { upvar 1 v w; set w 5; return [uplevel 1 {set v}] }",
        );
        assert_eq!(run(&mut i, "proc f {} { set v 1; g }; f"), "5");
    }

    #[test]
    fn upvar_to_self_is_rejected() {
        let mut i = Interpreter::new();
        assert_eq!(
            run_err(&mut i, "proc f {} { upvar 0 a a }; f"),
            "can't upvar from variable to itself"
        );
    }

    #[test]
    fn link_chains_collapse() {
        let mut i = Interpreter::new();
        run(
            &mut i,
            "proc inner {} { upvar 1 b c; set c deep }
             proc outer {} { upvar 1 a b; inner }
             outer",
        );
        assert_eq!(run(&mut i, "set a"), "deep");
    }

    #[test]
    fn unset_invalidates_cached_lookups() {
        let mut i = Interpreter::new();
        let name = Value::from("x");
        i.set_var_value(&name, Value::from(1i64)).unwrap();
        assert_eq!(i.get_var_value(&name).unwrap(), "1");
        i.unset_var("x").unwrap();
        assert!(i.get_var_value(&name).is_err());
        i.set_var("x", Value::from(2i64)).unwrap();
        assert_eq!(i.get_var_value(&name).unwrap(), "2");
    }

    #[test]
    fn cached_command_follows_redefinition() {
        let mut i = Interpreter::new();
        run(&mut i, "proc f {} { return one }");
        let script = Value::from("f");
        assert_eq!(i.eval_value(&script).unwrap(), "one");
        run(&mut i, "proc f {} { return two }");
        assert_eq!(i.eval_value(&script).unwrap(), "two");
    }

    #[test]
    fn tailcall_chain_runs_in_constant_stack() {
        let mut i = Interpreter::new();
        run(
            &mut i,
            "proc count {n acc} {
                 if {$n == 0} { return $acc }
                 tailcall count [expr {$n - 1}] [expr {$acc + 1}]
             }",
        );
        assert_eq!(run(&mut i, "count 100000 0"), "100000");
    }

    #[test]
    fn runaway_recursion_is_an_error() {
        let mut i = Interpreter::new();
        assert_eq!(
            run_err(&mut i, "proc f {} { f }; f"),
            "Too many nested calls. Infinite recursion?"
        );
        assert_eq!(run(&mut i, "set ok 1"), "1");
    }

    #[test]
    fn native_reentry_is_bounded() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "alias a a; catch {a} m"), "1");
        assert_eq!(run(&mut i, "set m"), "Infinite eval recursion");
        i.register_command("again", |interp: &mut Interpreter, argv: &[Value]| {
            interp.eval_command(argv)
        });
        assert_eq!(run_err(&mut i, "again x"), "Infinite eval recursion");
        assert_eq!(run(&mut i, "set ok 1"), "1");
    }

    #[test]
    fn unknown_handler_recursion_is_bounded() {
        let mut i = Interpreter::new();
        run(&mut i, "proc unknown {args} { nosuch2 }");
        assert_eq!(
            run_err(&mut i, "nosuch"),
            "invalid command name \"nosuch2\""
        );
    }

    #[test]
    fn unknown_handler_supplies_missing_commands() {
        let mut i = Interpreter::new();
        run(&mut i, "proc unknown {args} { return \"unknown: $args\" }");
        assert_eq!(run(&mut i, "frob a b"), "unknown: frob a b");
    }

    #[test]
    fn error_trace_names_each_level() {
        let mut i = Interpreter::new();
        let err = i
            .eval_source("proc f {} {\n  error boom\n}\nf\n", "t.tcl")
            .unwrap_err();
        let Exception::Error(info) = &err else {
            panic!("expected error")
        };
        assert_eq!(info.trace.len(), 2);
        assert_eq!(&*info.trace[0].proc_name, "f");
        assert_eq!(info.trace[0].line, 2);
        assert_eq!(info.trace[1].line, 4);
        assert_eq!(
            i.format_error(&err),
            "Runtime Error: t.tcl:2: boom\nin procedure 'f' called at file \"t.tcl\", line 4"
        );
        assert_eq!(i.stack_trace().list_len().unwrap(), 2);
    }

    #[test]
    fn signals_interrupt_dispatch() {
        let mut i = Interpreter::new();
        let handle = i.signal_handle();
        i.register_command("interrupt", move |_: &mut Interpreter, _: &[Value]| -> EvalResult {
            handle.raise(libc::SIGINT as u32);
            Ok(Value::empty())
        });
        assert_eq!(run(&mut i, "catch -signal {interrupt; set x 1}"), "5");
        assert_eq!(run(&mut i, "info exists x"), "0");
        assert_eq!(
            run_err(&mut i, "interrupt; set x 1"),
            "signal SIGINT received"
        );
    }

    #[test]
    fn native_commands_and_deleters() {
        let mut i = Interpreter::new();
        let deleted = Rc::new(Cell::new(false));
        let flag = deleted.clone();
        i.register_command_with_deleter(
            "double",
            |_: &mut Interpreter, argv: &[Value]| -> EvalResult {
                Ok(Value::from(argv[1].get_int()? * 2))
            },
            move || flag.set(true),
        );
        assert_eq!(run(&mut i, "double 21"), "42");
        run(&mut i, "rename double twice");
        assert_eq!(run(&mut i, "twice 4"), "8");
        assert!(!deleted.get());
        i.delete_command("twice").unwrap();
        assert!(deleted.get());
    }

    #[test]
    fn assoc_data_round_trips() {
        let mut i = Interpreter::new();
        i.set_assoc_data("counter", 7u32);
        *i.assoc_data_mut::<u32>("counter").unwrap() += 1;
        assert_eq!(i.assoc_data::<u32>("counter"), Some(&8));
        assert_eq!(i.assoc_data::<String>("counter"), None);
        assert!(i.delete_assoc_data("counter"));
    }

    #[test]
    fn trace_hook_sees_every_command() {
        let mut i = Interpreter::new();
        run(&mut i, "set seen {}; proc hook {cmd file line argv} { lappend ::seen $cmd }");
        i.set_trace_hook(Some(Value::from("hook")));
        run(&mut i, "set a 1; incr a");
        i.set_trace_hook(None);
        assert_eq!(run(&mut i, "set seen"), "set incr");
    }

    #[test]
    fn levels_resolve_relative_and_absolute() {
        let mut i = Interpreter::new();
        run(&mut i, "proc f {} { g }; proc g {} { uplevel #0 {set where global}; uplevel 2 {set rel top} }");
        run(&mut i, "f");
        assert_eq!(run(&mut i, "set where"), "global");
        assert_eq!(run(&mut i, "set rel"), "top");
        assert!(Interpreter::is_level("#1"));
        assert!(!Interpreter::is_level("x1"));
    }
}
