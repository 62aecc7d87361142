//! Conditionals, loops and outcome handling.

use crate::glob::glob_match;

use super::super::dict::Dict;
use super::super::error::{Code, ErrorInfo, EvalResult, Exception};
use super::super::interp::Interpreter;
use super::super::value::Value;
use super::{arity, loop_step, parse_code, wrong_args, LoopStep};

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_command("if", cmd_if);
    interp.register_command("while", cmd_while);
    interp.register_command("for", cmd_for);
    interp.register_command("foreach", cmd_foreach);
    interp.register_command("lmap", cmd_lmap);
    interp.register_command("switch", cmd_switch);
    interp.register_command("break", cmd_break);
    interp.register_command("continue", cmd_continue);
    interp.register_command("return", cmd_return);
    interp.register_command("error", cmd_error);
    interp.register_command("throw", cmd_throw);
    interp.register_command("catch", cmd_catch);
    interp.register_command("try", cmd_try);
    interp.register_command("exit", cmd_exit);
}

// ── Conditionals and loops ───────────────────────────────────────────────────

fn cmd_if(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let usage = "condition ?then? trueBody ?elseif ...? ?else? falseBody";
    let word = |i: usize| argv.get(i).ok_or_else(|| wrong_args(argv, usage));
    let mut i = 1;
    loop {
        let cond = word(i)?;
        i += 1;
        if word(i)?.as_str().as_ref() == "then" {
            i += 1;
        }
        let body = word(i)?;
        i += 1;
        if interp.eval_condition(cond)? {
            return interp.eval_value(body);
        }
        let Some(next) = argv.get(i) else {
            return Ok(Value::empty());
        };
        match next.as_str().as_ref() {
            "elseif" => i += 1,
            "else" => {
                i += 1;
                return match &argv[i..] {
                    [body] => interp.eval_value(body),
                    _ => Err(wrong_args(argv, usage)),
                };
            }
            _ if i == argv.len() - 1 => return interp.eval_value(next),
            _ => return Err(wrong_args(argv, usage)),
        }
    }
}

fn cmd_while(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 3, Some(3), "condition body")?;
    while interp.eval_condition(&argv[1])? {
        if let LoopStep::Exit = loop_step(interp.eval_value(&argv[2]))? {
            break;
        }
    }
    Ok(Value::empty())
}

fn cmd_for(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 5, Some(5), "start test next body")?;
    interp.eval_value(&argv[1])?;
    while interp.eval_condition(&argv[2])? {
        if let LoopStep::Exit = loop_step(interp.eval_value(&argv[4]))? {
            break;
        }
        if let LoopStep::Exit = loop_step(interp.eval_value(&argv[3]))? {
            break;
        }
    }
    Ok(Value::empty())
}

/// Shared body of `foreach` and `lmap`.
fn iterate(interp: &mut Interpreter, argv: &[Value], collect: bool) -> EvalResult {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(wrong_args(argv, "varList list ?varList list ...? script"));
    }
    let body = &argv[argv.len() - 1];
    let mut groups = Vec::new();
    let mut rounds = 0;
    for pair in argv[1..argv.len() - 1].chunks(2) {
        let vars = pair[0].get_list()?;
        if vars.is_empty() {
            return Err(Exception::error(format!(
                "{} varlist is empty",
                argv[0]
            )));
        }
        let values = pair[1].get_list()?;
        rounds = rounds.max(values.len().div_ceil(vars.len()));
        groups.push((vars, values));
    }

    let mut out = Vec::new();
    for round in 0..rounds {
        for (vars, values) in &groups {
            for (k, var) in vars.iter().enumerate() {
                let value = values.get(round * vars.len() + k).cloned().unwrap_or_default();
                interp.set_var_value(var, value)?;
            }
        }
        match interp.eval_value(body) {
            Ok(v) if collect => out.push(v),
            result => {
                if let LoopStep::Exit = loop_step(result)? {
                    break;
                }
            }
        }
    }
    Ok(if collect { Value::from_list(out) } else { Value::empty() })
}

fn cmd_foreach(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    iterate(interp, argv, false)
}

fn cmd_lmap(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    iterate(interp, argv, true)
}

fn cmd_switch(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let usage = "?options? string pattern body ... ?default body?";
    let mut glob = false;
    let mut i = 1;
    while let Some(opt) = argv.get(i) {
        let opt = opt.as_str();
        if !opt.starts_with('-') {
            break;
        }
        i += 1;
        match opt.as_ref() {
            "-exact" => glob = false,
            "-glob" => glob = true,
            "--" => break,
            other => {
                return Err(Exception::error(format!(
                    "bad option \"{other}\": must be -exact, -glob, or --"
                )))
            }
        }
    }
    let subject = argv.get(i).ok_or_else(|| wrong_args(argv, usage))?.as_str();
    let inline = &argv[i + 1..];
    let braced;
    let cases: &[Value] = match inline {
        [single] => {
            braced = single.get_list()?;
            braced.as_slice()
        }
        [] => return Err(wrong_args(argv, usage)),
        many => many,
    };
    if cases.is_empty() {
        return Ok(Value::empty());
    }
    if cases.len() % 2 != 0 {
        return Err(Exception::error("extra switch pattern with no body"));
    }
    let last = cases.len() / 2 - 1;
    for (n, case) in cases.chunks(2).enumerate() {
        let pattern = case[0].as_str();
        let hit = (n == last && &*pattern == "default")
            || if glob {
                glob_match(&pattern, &subject, false)
            } else {
                *pattern == *subject
            };
        if !hit {
            continue;
        }
        // A body of `-` falls through to the next real body.
        let body = cases[n * 2 + 1..]
            .iter()
            .step_by(2)
            .find(|b| b.as_str().as_ref() != "-")
            .ok_or_else(|| {
                Exception::error(format!("no body specified for pattern \"{pattern}\""))
            })?;
        return interp.eval_value(body);
    }
    Ok(Value::empty())
}

fn loop_levels(argv: &[Value]) -> EvalResult<u32> {
    arity(argv, 1, Some(2), "?levels?")?;
    let Some(n) = argv.get(1) else {
        return Ok(1);
    };
    let n = n.get_int()?;
    u32::try_from(n)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| Exception::error(format!("invalid level \"{n}\"")))
}

fn cmd_break(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    Err(Exception::Break(loop_levels(argv)?))
}

fn cmd_continue(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    Err(Exception::Continue(loop_levels(argv)?))
}

// ── Outcomes ─────────────────────────────────────────────────────────────────

fn cmd_return(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let mut code = Code::Ok;
    let mut level = 1u32;
    let mut error_code = None;
    let mut i = 1;
    while i + 1 < argv.len() {
        match argv[i].as_str().as_ref() {
            "-code" => code = parse_code(&argv[i + 1])?,
            "-level" => {
                let n = argv[i + 1].get_int()?;
                level = u32::try_from(n)
                    .map_err(|_| Exception::error(format!("bad level \"{n}\"")))?;
            }
            "-errorcode" => error_code = Some(argv[i + 1].clone()),
            "-errorinfo" => {}
            _ => break,
        }
        i += 2;
    }
    let value = match &argv[i..] {
        [] => Value::empty(),
        [value] => value.clone(),
        _ => return Err(wrong_args(argv, "?-code code? ?-level level? ?-errorcode code? ?result?")),
    };
    if level == 0 {
        return Exception::from_code(code, value, error_code);
    }
    Err(Exception::Return {
        code,
        level,
        value,
        error_code,
    })
}

fn cmd_error(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, Some(4), "message ?stacktrace? ?code?")?;
    let mut info = ErrorInfo::new(argv[1].clone());
    if let Some(trace) = argv.get(2).filter(|t| !t.is_empty()) {
        info.trace = ErrorInfo::trace_from_value(trace);
    }
    if let Some(code) = argv.get(3) {
        info.error_code = code.clone();
    }
    Err(Exception::Error(Box::new(info)))
}

fn cmd_throw(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 3, Some(3), "code message")?;
    Err(Exception::error_with_code(argv[2].clone(), argv[1].clone()))
}

fn cmd_exit(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 1, Some(2), "?exitCode?")?;
    let code = match argv.get(1) {
        Some(c) => {
            let n = c.get_int()?;
            i32::try_from(n)
                .map_err(|_| Exception::error(format!("exit code {n} out of range")))?
        }
        None => 0,
    };
    Err(Exception::Exit(code))
}

/// Numeric code, result value and options dict of an outcome, as `catch`
/// and `try` report it.
fn describe(interp: &mut Interpreter, result: &EvalResult) -> (Code, Value, Value) {
    let mut opts = Dict::new();
    let (code, value) = match result {
        Ok(v) => (Code::Ok, v.clone()),
        Err(e) => (e.code(), e.value()),
    };
    opts.set(Value::from("-code"), Value::from(code.as_i64()));
    let level = match result {
        Err(Exception::Return { level, .. }) => i64::from(*level),
        _ => 0,
    };
    opts.set(Value::from("-level"), Value::from(level));
    if let Err(Exception::Error(info)) = result {
        interp.record_error(info);
        opts.set(Value::from("-errorcode"), info.error_code.clone());
        opts.set(Value::from("-errorinfo"), info.trace_value());
    }
    (code, value, Value::from_dict(opts))
}

fn cmd_catch(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let usage = "?-signal? ?-exit? ?--? script ?resultVarName? ?optionVarName?";
    let (mut signal, mut exit) = (false, false);
    let mut i = 1;
    while let Some(opt) = argv.get(i) {
        match opt.as_str().as_ref() {
            "-signal" => signal = true,
            "-exit" => exit = true,
            "--" => {
                i += 1;
                break;
            }
            _ => break,
        }
        i += 1;
    }
    let (script, result_var, opts_var) = match &argv[i..] {
        [script] => (script, None, None),
        [script, r] => (script, Some(r), None),
        [script, r, o] => (script, Some(r), Some(o)),
        _ => return Err(wrong_args(argv, usage)),
    };

    let result = interp.eval_value(script);
    match &result {
        Err(Exception::Tailcall(_)) => return result,
        Err(Exception::Signal(_)) if !signal => return result,
        Err(Exception::Exit(_)) if !exit => return result,
        _ => {}
    }
    let (code, value, opts) = describe(interp, &result);
    if let Some(var) = result_var {
        interp.set_var_value(var, value)?;
    }
    if let Some(var) = opts_var {
        interp.set_var_value(var, opts)?;
    }
    Ok(Value::from(code.as_i64()))
}

fn cmd_try(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let usage = "?--? script ?on code {resultVar ?optionsVar?} script ...? ?trap pattern {resultVar ?optionsVar?} script ...? ?finally script?";
    let mut i = 1;
    if argv.get(i).is_some_and(|a| a.as_str().as_ref() == "--") {
        i += 1;
    }
    let body = argv.get(i).ok_or_else(|| wrong_args(argv, usage))?;
    i += 1;

    let mut result = interp.eval_value(body);
    if let Err(Exception::Tailcall(_)) = result {
        return result;
    }

    let mut finally = None;
    let mut handled = false;
    while i < argv.len() {
        let kind = argv[i].as_str();
        match kind.as_ref() {
            "finally" if i + 2 == argv.len() => {
                finally = Some(&argv[i + 1]);
                i += 2;
            }
            "on" | "trap" if i + 4 <= argv.len() => {
                let (spec, vars, handler) = (&argv[i + 1], &argv[i + 2], &argv[i + 3]);
                i += 4;
                if handled {
                    continue;
                }
                let matches = if kind.as_ref() == "on" {
                    parse_code(spec)? == code_of(&result)
                } else {
                    trap_matches(&result, spec)?
                };
                if !matches {
                    continue;
                }
                handled = true;
                let (_, value, opts) = describe(interp, &result);
                let names = vars.get_list()?;
                if let Some(name) = names.first() {
                    interp.set_var_value(name, value)?;
                }
                if let Some(name) = names.get(1) {
                    interp.set_var_value(name, opts)?;
                }
                result = interp.eval_value(handler);
            }
            _ => return Err(wrong_args(argv, usage)),
        }
    }

    if let Some(script) = finally {
        interp.eval_value(script)?;
    }
    result
}

fn code_of(result: &EvalResult) -> Code {
    match result {
        Ok(_) => Code::Ok,
        Err(e) => e.code(),
    }
}

/// `trap` matches errors whose error code starts with the pattern's words.
fn trap_matches(result: &EvalResult, pattern: &Value) -> EvalResult<bool> {
    let Err(Exception::Error(info)) = result else {
        return Ok(false);
    };
    let pattern = pattern.get_list()?;
    let code = info.error_code.get_list()?;
    Ok(pattern.len() <= code.len()
        && pattern
            .iter()
            .zip(code.iter())
            .all(|(p, c)| p.as_str() == c.as_str()))
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
    fn if_chains() {
        let mut i = Interpreter::new();
        let script = "proc classify {n} {
            if {$n < 0} then { return neg } elseif {$n == 0} { return zero } else { return pos }
        }";
        run(&mut i, script);
        assert_eq!(run(&mut i, "classify -4"), "neg");
        assert_eq!(run(&mut i, "classify 0"), "zero");
        assert_eq!(run(&mut i, "classify 9"), "pos");
        assert_eq!(run(&mut i, "if 0 {set x 1}"), "");
        assert_eq!(run(&mut i, "if 0 {set x 1} {set x 2}"), "2");
    }

    #[test]
    fn loops_and_multi_level_break() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "set s 0; for {set k 0} {$k < 5} {incr k} { incr s $k }; set s"), "10");
        let script = "set log {}
            foreach a {1 2} {
                foreach b {1 2} {
                    foreach c {1 2} {
                        lappend log $a$b$c
                        if {$c == 1} { break 2 }
                    }
                }
            }
            set log";
        assert_eq!(run(&mut i, script), "111 211");
        assert_eq!(run(&mut i, "set n 0; while 1 { incr n; if {$n > 3} break }; set n"), "4");
    }

    #[test]
    fn multi_level_continue() {
        let mut i = Interpreter::new();
        let script = "set log {}
            foreach a {1 2} {
                foreach b {1 2} { lappend log $a$b; continue 2 }
                lappend log never
            }
            set log";
        assert_eq!(run(&mut i, script), "11 21");
    }

    #[test]
    fn foreach_groups_and_lmap() {
        let mut i = Interpreter::new();
        assert_eq!(
            run(&mut i, "set out {}; foreach {k v} {a 1 b 2 c} { lappend out $k=$v }; set out"),
            "a=1 b=2 c="
        );
        assert_eq!(
            run(&mut i, "set out {}; foreach x {1 2} y {a b c} { lappend out $x$y }; set out"),
            "1a 2b c"
        );
        assert_eq!(
            run(&mut i, "lmap x {1 2 3 4} { if {$x % 2} continue; expr {$x * 10} }"),
            "20 40"
        );
    }

    #[test]
    fn switch_forms() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "switch b { a {set r 1} b {set r 2} default {set r 3} }"), "2");
        assert_eq!(run(&mut i, "switch zz a {set r 1} default {set r 3}"), "3");
        assert_eq!(run(&mut i, "switch -glob foo.c { *.h - *.c {set r src} }"), "src");
        assert_eq!(run(&mut i, "switch -- -x { -x {set r dash} }"), "dash");
        assert_eq!(run(&mut i, "switch q { a {set r 1} }"), "");
    }

    #[test]
    fn switch_without_cases() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "switch x {}"), "");
        assert_eq!(run(&mut i, "switch -glob -- x {}"), "");
    }

    #[test]
    fn catch_codes_and_options() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "catch {error boom} msg"), "1");
        assert_eq!(run(&mut i, "set msg"), "boom");
        assert_eq!(run(&mut i, "catch {break}"), "3");
        assert_eq!(run(&mut i, "catch {return -code error -errorcode {A B} oops} m o"), "2");
        assert_eq!(run(&mut i, "catch {throw {POSIX ENOENT} missing} m o; dict get $o -errorcode"), "POSIX ENOENT");
        assert_eq!(run(&mut i, "set ::errorCode"), "POSIX ENOENT");
        assert_eq!(run(&mut i, "catch {expr {1 +}}"), "1");
        assert!(i.eval_toplevel("catch {exit 3}").is_err());
        assert_eq!(run(&mut i, "catch -exit {exit 3} v; set v"), "3");
    }

    #[test]
    fn exit_code_must_fit() {
        let mut i = Interpreter::new();
        assert_eq!(
            run(&mut i, "catch {exit 99999999999} m; set m"),
            "exit code 99999999999 out of range"
        );
        assert_eq!(run(&mut i, "catch -exit {exit -2} v; set v"), "-2");
    }

    #[test]
    fn return_codes_through_procs() {
        let mut i = Interpreter::new();
        run(&mut i, "proc fail {} { return -code error -errorcode {MY CODE} bad }");
        assert_eq!(run(&mut i, "catch fail m o; list $m [dict get $o -errorcode]"), "bad {MY CODE}");
        run(&mut i, "proc stop {} { return -code break }");
        assert_eq!(run(&mut i, "set n 0; foreach x {1 2 3} { incr n; stop }; set n"), "1");
        run(&mut i, "proc outer {} { inner; return no }; proc inner {} { return -level 2 yes }");
        assert_eq!(run(&mut i, "outer"), "yes");
        assert!(i.eval_toplevel("return -code bogus x").is_err());
    }

    #[test]
    fn try_handlers_and_finally() {
        let mut i = Interpreter::new();
        assert_eq!(
            run(&mut i, "try { error oops } on error {m} { set r caught:$m }"),
            "caught:oops"
        );
        assert_eq!(
            run(&mut i, "try { throw {IO EOF} done } trap {IO} {m o} { dict get $o -errorcode }"),
            "IO EOF"
        );
        assert_eq!(
            run(&mut i, "set log {}; try { set x 1 } finally { lappend log fin }; set log"),
            "fin"
        );
        assert_eq!(
            run(&mut i, "catch { try { error inner } finally { set cleaned 1 } } m; list $m $cleaned"),
            "inner 1"
        );
        assert_eq!(
            run(&mut i, "catch { try { error first } on error {} { error second } } m; set m"),
            "second"
        );
        assert_eq!(run(&mut i, "try { expr 2 } on ok {v} { expr {$v * 3} }"), "6");
    }

    #[test]
    fn error_with_code() {
        let mut i = Interpreter::new();
        assert_eq!(
            run(&mut i, "catch {error msg {} {E 1}} m o; dict get $o -errorcode"),
            "E 1"
        );
    }
}
