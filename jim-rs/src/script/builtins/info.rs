//! `info`: introspection of commands, variables and the call stack.

use std::rc::Rc;

use crate::glob::glob_match;

use super::super::command::Command;
use super::super::error::{EvalResult, Exception};
use super::super::frame::{FramePool, Var};
use super::super::interp::{Interpreter, VERSION};
use super::super::value::Value;
use super::{subcommand, wrong_args};

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_command("info", cmd_info);
}

const SUBCOMMANDS: &[&str] = &[
    "args",
    "body",
    "commands",
    "complete",
    "exists",
    "globals",
    "level",
    "locals",
    "procs",
    "script",
    "source",
    "stacktrace",
    "statics",
    "vars",
    "version",
];

/// Sorted names matching an optional glob pattern.
fn matching(mut names: Vec<Rc<str>>, pattern: Option<&Value>) -> Value {
    if let Some(p) = pattern {
        let p = p.as_str();
        names.retain(|n| glob_match(&p, n, false));
    }
    names.sort_unstable();
    Value::from_list(names.into_iter().map(Value::from).collect())
}

fn procedure(interp: &Interpreter, name: &Value) -> EvalResult<Rc<Command>> {
    match interp.find_command(&name.as_str()) {
        Some(cmd) if cmd.is_proc() => Ok(cmd),
        _ => Err(Exception::error(format!("command \"{name}\" is not a procedure"))),
    }
}

fn cmd_info(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let sub = subcommand(argv, SUBCOMMANDS)?;
    let args = &argv[2..];
    let usage = |u: &str| wrong_args(&argv[..2], u);
    match sub {
        "commands" | "procs" => {
            if args.len() > 1 {
                return Err(usage("?pattern?"));
            }
            let names = interp
                .command_names()
                .filter(|(_, cmd)| sub == "commands" || cmd.is_proc())
                .map(|(name, _)| name.clone())
                .collect();
            Ok(matching(names, args.first()))
        }
        "vars" | "locals" | "globals" => {
            if args.len() > 1 {
                return Err(usage("?pattern?"));
            }
            let names = match sub {
                "vars" => interp.var_names(interp.current, true),
                "locals" if interp.current == FramePool::GLOBAL => Vec::new(),
                "locals" => interp.var_names(interp.current, false),
                _ => interp.var_names(FramePool::GLOBAL, true),
            };
            Ok(matching(names, args.first()))
        }
        "exists" => match args {
            [name] => Ok(Value::from(interp.var_exists(&name.as_str()))),
            _ => Err(usage("varName")),
        },
        "level" => match args {
            [] => Ok(Value::from(interp.current_level())),
            [n] => info_level(interp, n.get_int()?),
            _ => Err(usage("?levelNum?")),
        },
        "body" | "args" | "statics" => {
            let [name] = args else {
                return Err(usage("procname"));
            };
            let cmd = procedure(interp, name)?;
            let Some(p) = cmd.as_proc() else {
                return Err(Exception::error(format!("command \"{name}\" is not a procedure")));
            };
            Ok(match sub {
                "body" => p.body.clone(),
                "args" => p.arg_list.clone(),
                _ => {
                    let mut statics: Vec<(Rc<str>, Value)> = p
                        .statics
                        .iter()
                        .filter_map(|(k, cell)| match &*cell.borrow() {
                            Var::Value(v) => Some((k.clone(), v.clone())),
                            Var::Link { .. } => None,
                        })
                        .collect();
                    statics.sort_unstable_by(|a, b| a.0.cmp(&b.0));
                    Value::from_list(
                        statics
                            .into_iter()
                            .flat_map(|(k, v)| [Value::from(k), v])
                            .collect(),
                    )
                }
            })
        }
        "complete" => match args {
            [script] | [script, _] => {
                let missing = Interpreter::is_complete(&script.as_str()).err();
                if let Some(var) = args.get(1) {
                    let waiting = missing.map(|m| m.as_char().to_string()).unwrap_or_default();
                    interp.set_var_value(var, Value::from(waiting))?;
                }
                Ok(Value::from(missing.is_none()))
            }
            _ => Err(usage("script ?missing?")),
        },
        "stacktrace" => match args {
            [] => Ok(interp.stack_trace()),
            _ => Err(usage("")),
        },
        "version" => match args {
            [] => Ok(Value::from(VERSION)),
            _ => Err(usage("")),
        },
        "script" => match args {
            [] => Ok(Value::from(interp.script_file())),
            _ => Err(usage("")),
        },
        "source" => match args {
            [script] => Ok(match script.source_info() {
                Some((file, line)) => Value::from_list(vec![Value::from(file), Value::from(line)]),
                None => Value::empty(),
            }),
            [script, file, line] => {
                let line = line.get_int()?.max(0) as usize;
                Ok(Value::with_source(&script.as_str(), file.as_str(), line))
            }
            _ => Err(usage("source ?filename line?")),
        },
        _ => Err(usage("")),
    }
}

/// `info level N`: the command words of a frame.  Positive `N` is an
/// absolute level, zero or negative is relative to the current one.
fn info_level(interp: &Interpreter, n: i64) -> EvalResult {
    let current = interp.current_level() as i64;
    let target = if n > 0 { n } else { current + n };
    let bad = || Exception::error(format!("bad level \"{n}\""));
    if target <= 0 || target > current {
        return Err(bad());
    }
    let spec = format!("#{target}");
    let frame = interp.resolve_level(&spec).ok_or_else(bad)?;
    Ok(Value::from_list(interp.frames.get(frame).argv.clone()))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(interp: &mut Interpreter, src: &str) -> String {
        match interp.eval_toplevel(src) {
            Ok(v) => v.to_string(),
            Err(e) => panic!("{src}: {}", interp.format_error(&e)),
        }
    }

    #[test]
    fn commands_and_procs() {
        let mut i = Interpreter::new();
        run(&mut i, "proc zeta {} {}; proc alpha {} {}");
        assert_eq!(run(&mut i, "info procs"), "alpha zeta");
        assert_eq!(run(&mut i, "info commands lr*"), "lrange lrepeat lreplace lreverse");
        assert_eq!(run(&mut i, "info commands nothing*"), "");
    }

    #[test]
    fn procedure_details() {
        let mut i = Interpreter::new();
        run(&mut i, "set seed 5; proc p {a {b 2} args} {seed {n 0}} { return $a }");
        assert_eq!(run(&mut i, "info args p"), "a {b 2} args");
        assert_eq!(run(&mut i, "info body p"), " return $a ");
        assert_eq!(run(&mut i, "info statics p"), "n 0 seed 5");
        let err = i.eval_toplevel("info body set").unwrap_err();
        assert_eq!(err.to_string(), "command \"set\" is not a procedure");
    }

    #[test]
    fn variables_by_scope() {
        let mut i = Interpreter::new();
        run(&mut i, "set g1 1; set g2 2");
        run(&mut i, "proc p {x} { global g1; set y 1; info locals }");
        assert_eq!(run(&mut i, "p 0"), "x y");
        run(&mut i, "proc q {x} { global g1; info vars }");
        assert_eq!(run(&mut i, "q 0"), "g1 x");
        assert_eq!(run(&mut i, "info globals g*"), "g1 g2");
        assert_eq!(run(&mut i, "info exists g1"), "1");
        assert_eq!(run(&mut i, "info exists nope"), "0");
    }

    #[test]
    fn levels() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "info level"), "0");
        run(&mut i, "proc inner {a} { list [info level] [info level 0] [info level -1] }");
        run(&mut i, "proc outer {} { inner 7 }");
        assert_eq!(run(&mut i, "outer"), "2 {inner 7} outer");
        assert_eq!(run(&mut i, "proc top {} { info level 1 }; top"), "top");
        assert!(i.eval_toplevel("info level 3").is_err());
    }

    #[test]
    fn completeness_and_version() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "info complete {set x 1}"), "1");
        assert_eq!(run(&mut i, "info complete {set x \\{}"), "1");
        assert_eq!(run(&mut i, "info complete \"set x \\{\" m"), "0");
        assert_eq!(run(&mut i, "set m"), "{");
        assert_eq!(run(&mut i, "info version"), VERSION);
    }

    #[test]
    fn source_locations() {
        let mut i = Interpreter::new();
        i.eval_source("set body {\n  puts hi\n}\n", "s.tcl").unwrap();
        assert_eq!(run(&mut i, "info source $body"), "s.tcl 1");
        assert_eq!(run(&mut i, "info source [info source abc f.tcl 9]"), "f.tcl 9");
        assert_eq!(run(&mut i, "info source plain"), "");
    }
}
