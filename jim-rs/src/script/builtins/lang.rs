//! Variables, procedures and evaluation.

use std::rc::Rc;
use std::time::Instant;

use super::super::command::{Command, CommandKind};
use super::super::error::{EvalResult, Exception};
use super::super::frame::FramePool;
use super::super::interp::Interpreter;
use super::super::parse::SubstFlags;
use super::super::value::Value;
use super::{arity, concat_words, wrong_args};

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_command("set", cmd_set);
    interp.register_command("unset", cmd_unset);
    interp.register_command("incr", cmd_incr);
    interp.register_command("append", cmd_append);
    interp.register_command("global", cmd_global);
    interp.register_command("upvar", cmd_upvar);
    interp.register_command("exists", cmd_exists);
    interp.register_command("proc", cmd_proc);
    interp.register_command("apply", cmd_apply);
    interp.register_command("rename", cmd_rename);
    interp.register_command("alias", cmd_alias);
    interp.register_command("local", cmd_local);
    interp.register_command("upcall", cmd_upcall);
    interp.register_command("tailcall", cmd_tailcall);
    interp.register_command("defer", cmd_defer);
    interp.register_command("eval", cmd_eval);
    interp.register_command("uplevel", cmd_uplevel);
    interp.register_command("expr", cmd_expr);
    interp.register_command("subst", cmd_subst);
    interp.register_command("time", cmd_time);
    interp.register_command("xtrace", cmd_xtrace);
    interp.register_command("rand", cmd_rand);
    interp.register_command("package", cmd_package);
}

// ── Variables ────────────────────────────────────────────────────────────────

fn cmd_set(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    match argv {
        [_, name] => interp.get_var_value(name),
        [_, name, value] => interp.set_var_value(name, value.clone()),
        _ => Err(wrong_args(argv, "varName ?newValue?")),
    }
}

fn cmd_unset(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let mut complain = true;
    let mut names = &argv[1..];
    while let Some(opt) = names.first() {
        match &*opt.as_str() {
            "-nocomplain" => complain = false,
            "--" => {
                names = &names[1..];
                break;
            }
            _ => break,
        }
        names = &names[1..];
    }
    for name in names {
        match interp.unset_var(&name.as_str()) {
            Err(e) if complain => return Err(e),
            _ => {}
        }
    }
    Ok(Value::empty())
}

fn cmd_incr(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, Some(3), "varName ?increment?")?;
    let delta = match argv.get(2) {
        Some(d) => d.get_int()?,
        None => 1,
    };
    interp.modify_var(&argv[1], Some(Value::from(0i64)), |v| {
        let n = v
            .get_int()?
            .checked_add(delta)
            .ok_or_else(|| Exception::error("integer overflow"))?;
        *v = Value::from(n);
        Ok(v.clone())
    })
}

fn cmd_append(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "varName ?value ...?")?;
    interp.modify_var(&argv[1], Some(Value::empty()), |v| {
        for piece in &argv[2..] {
            v.append_str(&piece.as_str());
        }
        Ok(v.clone())
    })
}

fn cmd_global(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "varName ?varName ...?")?;
    if interp.current == FramePool::GLOBAL {
        return Ok(Value::empty());
    }
    for name in &argv[1..] {
        let full = name.as_str();
        let local = full.rsplit("::").next().unwrap_or("");
        interp.link_var(local, FramePool::GLOBAL, &full)?;
    }
    Ok(Value::empty())
}

fn cmd_upvar(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let usage = "?level? otherVar localVar ?otherVar localVar ...?";
    let mut pairs = &argv[1..];
    let mut level = Rc::from("1");
    if pairs.len() % 2 == 1 {
        level = pairs[0].as_str();
        pairs = &pairs[1..];
    }
    if pairs.is_empty() {
        return Err(wrong_args(argv, usage));
    }
    let frame = interp
        .resolve_level(&level)
        .ok_or_else(|| Exception::error(format!("bad level \"{level}\"")))?;
    for pair in pairs.chunks(2) {
        interp.link_var(&pair[1].as_str(), frame, &pair[0].as_str())?;
    }
    Ok(Value::empty())
}

fn cmd_exists(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let (kind, name) = match argv {
        [_, name] => ("-var", name),
        [_, opt, name] => match &*opt.as_str() {
            "-var" => ("-var", name),
            "-proc" => ("-proc", name),
            "-command" => ("-command", name),
            other => {
                return Err(Exception::error(format!(
                    "bad option \"{other}\": must be -command, -proc, or -var"
                )))
            }
        },
        _ => return Err(wrong_args(argv, "?option? name")),
    };
    let name = name.as_str();
    let found = match kind {
        "-var" => interp.var_exists(&name),
        "-proc" => interp.find_command(&name).is_some_and(|c| c.is_proc()),
        _ => interp.command_exists(&name),
    };
    Ok(Value::from(found))
}

// ── Procedures and commands ──────────────────────────────────────────────────

fn cmd_proc(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let (name, args, statics, body) = match argv {
        [_, name, args, body] => (name, args, None, body),
        [_, name, args, statics, body] => (name, args, Some(statics), body),
        _ => return Err(wrong_args(argv, "name arglist ?statics? body")),
    };
    interp.create_proc(&name.as_str(), args, statics, body)?;
    Ok(name.clone())
}

fn cmd_apply(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "lambdaExpr ?arg ...?")?;
    let lambda = argv[1].get_list()?;
    let (args, body) = match lambda.as_slice() {
        [args, body] | [args, body, _] => (args, body),
        _ => {
            return Err(Exception::error(format!(
                "can't interpret \"{}\" as a lambda expression",
                argv[1]
            )))
        }
    };
    let proc = interp.build_procedure(args, None, body)?;
    let cmd = Rc::new(Command::new(CommandKind::Proc(proc), None));
    interp.call_command(cmd, &argv[1..])
}

fn cmd_rename(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 3, Some(3), "oldName newName")?;
    interp.rename_command(&argv[1].as_str(), &argv[2].as_str())?;
    Ok(Value::empty())
}

fn cmd_alias(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 3, None, "newname command ?args ...?")?;
    let prefix: Vec<Value> = argv[2..].to_vec();
    interp.register_command(&argv[1].as_str(), move |interp: &mut Interpreter, args: &[Value]| {
        let mut call = prefix.clone();
        call.extend_from_slice(&args[1..]);
        interp.eval_command(&call)
    });
    Ok(argv[1].clone())
}

fn cmd_local(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "cmd ?args ...?")?;
    interp.local_depth += 1;
    let result = interp.eval_command(&argv[1..]);
    interp.local_depth -= 1;
    result
}

fn cmd_upcall(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "cmd ?args ...?")?;
    let name = argv[1].as_str();
    let prev = interp
        .find_command(&name)
        .and_then(|cmd| cmd.prev.clone())
        .ok_or_else(|| Exception::error(format!("no previous command: \"{name}\"")))?;
    interp.call_command(prev, &argv[1..])
}

fn cmd_tailcall(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "cmd ?args ...?")?;
    if interp.current == FramePool::GLOBAL {
        return Err(Exception::error(
            "tailcall can only be called from a proc or lambda",
        ));
    }
    Err(Exception::Tailcall(argv[1..].to_vec()))
}

fn cmd_defer(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, Some(2), "script")?;
    interp.register_defer(argv[1].clone());
    Ok(Value::empty())
}

// ── Evaluation ───────────────────────────────────────────────────────────────

fn cmd_eval(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "arg ?arg ...?")?;
    interp.eval_value(&concat_words(&argv[1..]))
}

fn cmd_uplevel(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "?level? command ?arg ...?")?;
    let mut rest = &argv[1..];
    let mut level = Rc::from("1");
    if rest.len() > 1 && Interpreter::is_level(&rest[0].as_str()) {
        level = rest[0].as_str();
        rest = &rest[1..];
    }
    let frame = interp
        .resolve_level(&level)
        .ok_or_else(|| Exception::error(format!("bad level \"{level}\"")))?;
    interp.eval_in_frame(frame, &concat_words(rest))
}

fn cmd_expr(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "expression ?...?")?;
    interp.eval_expr(&concat_words(&argv[1..]))
}

fn cmd_subst(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let usage = "?-nobackslashes? ?-nocommands? ?-novariables? string";
    let Some((text, opts)) = argv[1..].split_last() else {
        return Err(wrong_args(argv, usage));
    };
    let mut flags = SubstFlags::ALL;
    for opt in opts {
        match &*opt.as_str() {
            "-nobackslashes" => flags.backslashes = false,
            "-nocommands" => flags.commands = false,
            "-novariables" => flags.variables = false,
            other => {
                return Err(Exception::error(format!(
                    "bad option \"{other}\": must be -nobackslashes, -nocommands, or -novariables"
                )))
            }
        }
    }
    interp.subst(text, flags)
}

fn cmd_time(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, Some(3), "script ?count?")?;
    let count = match argv.get(2) {
        Some(c) => c.get_int()?,
        None => 1,
    };
    if count <= 0 {
        return Ok(Value::from("0 microseconds per iteration"));
    }
    let start = Instant::now();
    for _ in 0..count {
        interp.eval_value(&argv[1])?;
    }
    let per = start.elapsed().as_micros() / count as u128;
    Ok(Value::from(format!("{per} microseconds per iteration")))
}

fn cmd_xtrace(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 1, Some(2), "?callback?")?;
    let hook = argv.get(1).filter(|cb| !cb.is_empty()).cloned();
    interp.set_trace_hook(hook);
    Ok(Value::empty())
}

fn cmd_rand(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let (min, max) = match argv {
        [_] => (0, i64::MAX),
        [_, max] => (0, max.get_int()?),
        [_, min, max] => (min.get_int()?, max.get_int()?),
        _ => return Err(wrong_args(argv, "?min? max")),
    };
    if max <= min {
        return Err(Exception::error("Invalid arguments (max < min)"));
    }
    let span = max.abs_diff(min);
    let n = interp.rng.next_u64() % span;
    Ok(Value::from(min.wrapping_add(n as i64)))
}

fn cmd_package(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let sub = super::subcommand(argv, &["provide", "require", "names"])?;
    match (sub, &argv[2..]) {
        ("provide", [name]) => Ok(interp.package_version(&name.as_str()).unwrap_or_default()),
        ("provide", [name, version]) => {
            interp.provide_package(&name.as_str(), &version.as_str());
            Ok(Value::empty())
        }
        ("require", [name, need @ ..]) if need.len() <= 1 => {
            let name = name.as_str();
            let have = interp
                .package_version(&name)
                .ok_or_else(|| Exception::error(format!("can't find package {name}")))?;
            if let Some(need) = need.first() {
                if !version_satisfies(&have.as_str(), &need.as_str()) {
                    return Err(Exception::error(format!(
                        "version conflict for package \"{name}\": have {have}, need {need}"
                    )));
                }
            }
            Ok(have)
        }
        ("names", []) => {
            let mut names: Vec<Value> = interp
                .packages
                .keys()
                .map(|k| Value::from(k.clone()))
                .collect();
            names.sort_by_key(|v| v.as_str());
            Ok(Value::from_list(names))
        }
        ("provide", _) => Err(wrong_args(&argv[..2], "name ?version?")),
        ("require", _) => Err(wrong_args(&argv[..2], "name ?version?")),
        _ => Err(wrong_args(&argv[..2], "")),
    }
}

/// Same major version and at least the requested minor levels.
fn version_satisfies(have: &str, need: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> { v.split('.').map(|p| p.parse().unwrap_or(0)).collect() };
    let (have, need) = (parse(have), parse(need));
    if have.first() != need.first() {
        return false;
    }
    have >= need
}

// ── Tests ────────────────────────────────────────────────────────────────────
