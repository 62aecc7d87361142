//! The `dict` ensemble.

use crate::glob::glob_match;

use super::super::dict::Dict;
use super::super::error::{EvalResult, Exception};
use super::super::interp::Interpreter;
use super::super::value::Value;
use super::{loop_step, subcommand, wrong_args, LoopStep};

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_command("dict", cmd_dict);
}

const SUBCOMMANDS: &[&str] = &[
    "append",
    "create",
    "exists",
    "for",
    "get",
    "getdef",
    "getwithdefault",
    "incr",
    "info",
    "keys",
    "lappend",
    "merge",
    "remove",
    "replace",
    "set",
    "size",
    "unset",
    "values",
];

fn not_known(key: &Value) -> Exception {
    Exception::error(format!("key \"{key}\" not known in dictionary"))
}

/// Follows `keys` through nested dicts.  `Ok(None)` when a key is missing.
fn lookup(dict: &Value, keys: &[Value]) -> EvalResult<Option<Value>> {
    let mut current = dict.clone();
    for key in keys {
        let next = current.get_dict()?.get(&key.as_str()).cloned();
        match next {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn set_in(target: &mut Value, keys: &[Value], value: Value) -> EvalResult<()> {
    let Some((key, rest)) = keys.split_first() else {
        *target = value;
        return Ok(());
    };
    let dict = target.dict_mut()?;
    if rest.is_empty() {
        dict.set(key.clone(), value);
        return Ok(());
    }
    match dict.get_mut(&key.as_str()) {
        Some(child) => set_in(child, rest, value),
        None => {
            let mut child = Value::from_dict(Dict::new());
            set_in(&mut child, rest, value)?;
            dict.set(key.clone(), child);
            Ok(())
        }
    }
}

fn unset_in(target: &mut Value, keys: &[Value]) -> EvalResult<()> {
    let Some((key, rest)) = keys.split_first() else {
        return Ok(());
    };
    let dict = target.dict_mut()?;
    if rest.is_empty() {
        dict.remove(&key.as_str());
        return Ok(());
    }
    match dict.get_mut(&key.as_str()) {
        Some(child) => unset_in(child, rest),
        None => Err(not_known(key)),
    }
}

fn filtered<'a>(
    items: impl Iterator<Item = &'a Value>,
    pattern: Option<&Value>,
) -> Value {
    let pattern = pattern.map(Value::as_str);
    Value::from_list(
        items
            .filter(|v| pattern.as_ref().map_or(true, |p| glob_match(p, &v.as_str(), false)))
            .cloned()
            .collect(),
    )
}

fn cmd_dict(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let sub = subcommand(argv, SUBCOMMANDS)?;
    let args = &argv[2..];
    let usage = |u: &str| wrong_args(&argv[..2], u);
    match sub {
        "create" => {
            if args.len() % 2 != 0 {
                return Err(usage("?key value ...?"));
            }
            let dict = Dict::from_pairs(args.iter().cloned())
                .map_err(|_| usage("?key value ...?"))?;
            Ok(Value::from_dict(dict))
        }
        "get" => {
            let Some((dict, keys)) = args.split_first() else {
                return Err(usage("dictionary ?key ...?"));
            };
            if keys.is_empty() {
                dict.get_dict()?;
                return Ok(dict.clone());
            }
            let mut current = dict.clone();
            for key in keys {
                let next = current.get_dict()?.get(&key.as_str()).cloned();
                current = next.ok_or_else(|| not_known(key))?;
            }
            Ok(current)
        }
        "getdef" | "getwithdefault" => {
            if args.len() < 3 {
                return Err(usage("dictionary ?key ...? key default"));
            }
            let (dict, keys, default) = (&args[0], &args[1..args.len() - 1], &args[args.len() - 1]);
            let mut current = dict.clone();
            for key in keys {
                let dict = match current.get_dict() {
                    Ok(d) => d,
                    Err(_) => return Ok(default.clone()),
                };
                match dict.get(&key.as_str()) {
                    Some(v) => current = v.clone(),
                    None => return Ok(default.clone()),
                }
            }
            Ok(current)
        }
        "exists" => {
            if args.len() < 2 {
                return Err(usage("dictionary key ?key ...?"));
            }
            Ok(Value::from(matches!(lookup(&args[0], &args[1..]), Ok(Some(_)))))
        }
        "set" => {
            if args.len() < 3 {
                return Err(usage("varName key ?key ...? value"));
            }
            let keys = &args[1..args.len() - 1];
            let value = args[args.len() - 1].clone();
            interp.modify_var(&args[0], Some(Value::from_dict(Dict::new())), |v| {
                set_in(v, keys, value)?;
                Ok(v.clone())
            })
        }
        "unset" => {
            if args.len() < 2 {
                return Err(usage("varName key ?key ...?"));
            }
            interp.modify_var(&args[0], None, |v| {
                unset_in(v, &args[1..])?;
                Ok(v.clone())
            })
        }
        "keys" | "values" => match args {
            [dict] | [dict, _] => {
                let d = dict.get_dict()?;
                Ok(if sub == "keys" {
                    filtered(d.keys(), args.get(1))
                } else {
                    filtered(d.values(), args.get(1))
                })
            }
            _ => Err(usage("dictionary ?pattern?")),
        },
        "size" => match args {
            [dict] => Ok(Value::from(dict.get_dict()?.len())),
            _ => Err(usage("dictionary")),
        },
        "info" => match args {
            [dict] => Ok(Value::from(dict.get_dict()?.stats())),
            _ => Err(usage("dictionary")),
        },
        "merge" => {
            let mut merged = Dict::new();
            for d in args {
                for (k, v) in d.get_dict()?.iter() {
                    merged.set(k.clone(), v.clone());
                }
            }
            Ok(Value::from_dict(merged))
        }
        "remove" => {
            let Some((dict, keys)) = args.split_first() else {
                return Err(usage("dictionary ?key ...?"));
            };
            let mut out = dict.clone();
            let d = out.dict_mut()?;
            for key in keys {
                d.remove(&key.as_str());
            }
            Ok(out)
        }
        "replace" => {
            if args.is_empty() || args.len() % 2 == 0 {
                return Err(usage("dictionary ?key value ...?"));
            }
            let mut out = args[0].clone();
            let d = out.dict_mut()?;
            for pair in args[1..].chunks(2) {
                d.set(pair[0].clone(), pair[1].clone());
            }
            Ok(out)
        }
        "incr" => {
            let (var, key, by) = match args {
                [var, key] => (var, key, 1),
                [var, key, by] => (var, key, by.get_int()?),
                _ => return Err(usage("varName key ?increment?")),
            };
            interp.modify_var(var, Some(Value::from_dict(Dict::new())), |v| {
                let d = v.dict_mut()?;
                let old = match d.get(&key.as_str()) {
                    Some(old) => old.get_int()?,
                    None => 0,
                };
                let new = old
                    .checked_add(by)
                    .ok_or_else(|| Exception::error("integer overflow"))?;
                d.set(key.clone(), Value::from(new));
                Ok(v.clone())
            })
        }
        "append" | "lappend" => {
            if args.len() < 2 {
                return Err(usage("varName key ?value ...?"));
            }
            let (var, key, rest) = (&args[0], &args[1], &args[2..]);
            interp.modify_var(var, Some(Value::from_dict(Dict::new())), |v| {
                let d = v.dict_mut()?;
                let name = key.as_str();
                if !d.contains(&name) {
                    d.set(key.clone(), Value::empty());
                }
                if let Some(elem) = d.get_mut(&name) {
                    if sub == "append" {
                        for s in rest {
                            elem.append_str(&s.as_str());
                        }
                    } else {
                        elem.list_mut()?.extend_from_slice(rest);
                    }
                }
                Ok(v.clone())
            })
        }
        "for" => dict_for(interp, argv),
        _ => Err(usage("")),
    }
}

fn dict_for(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let [_, _, vars, dict, body] = argv else {
        return Err(wrong_args(&argv[..2], "{keyVar valueVar} dictionary script"));
    };
    let vars = vars.get_list()?;
    let [key_var, value_var] = vars.as_slice() else {
        return Err(Exception::error("must have exactly two variable names"));
    };
    let pairs: Vec<(Value, Value)> = dict
        .get_dict()?
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (k, v) in pairs {
        interp.set_var_value(key_var, k)?;
        interp.set_var_value(value_var, v)?;
        if let LoopStep::Exit = loop_step(interp.eval_value(body))? {
            break;
        }
    }
    Ok(Value::empty())
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
    fn create_and_get() {
        let mut i = Interpreter::new();
        run(&mut i, "set d [dict create a 1 b 2]");
        assert_eq!(run(&mut i, "dict get $d b"), "2");
        assert_eq!(run(&mut i, "dict get $d"), "a 1 b 2");
        assert_eq!(run(&mut i, "dict size $d"), "2");
        assert_eq!(run(&mut i, "dict getdef $d z 9"), "9");
        let err = i.eval_toplevel("dict get $d z").unwrap_err();
        assert_eq!(err.to_string(), "key \"z\" not known in dictionary");
        assert!(i.eval_toplevel("dict create a").is_err());
    }

    #[test]
    fn nested_set_and_unset() {
        let mut i = Interpreter::new();
        run(&mut i, "dict set d a b c 1");
        assert_eq!(run(&mut i, "dict get $d a b c"), "1");
        assert_eq!(run(&mut i, "dict exists $d a b"), "1");
        assert_eq!(run(&mut i, "dict exists $d a x"), "0");
        run(&mut i, "dict unset d a b c");
        assert_eq!(run(&mut i, "dict get $d a b"), "");
        run(&mut i, "dict unset d a nothing");
        assert!(i.eval_toplevel("dict unset d missing x").is_err());
    }

    #[test]
    fn mutation_preserves_order() {
        let mut i = Interpreter::new();
        run(&mut i, "set d {x 1 y 2 z 3}");
        run(&mut i, "dict set d y 20");
        assert_eq!(run(&mut i, "set d"), "x 1 y 20 z 3");
        assert_eq!(run(&mut i, "lindex $d 2"), "y");
        assert_eq!(run(&mut i, "dict remove $d x"), "y 20 z 3");
        assert_eq!(run(&mut i, "dict replace $d w 0"), "x 1 y 20 z 3 w 0");
        assert_eq!(run(&mut i, "dict merge {a 1 b 2} {b 3 c 4}"), "a 1 b 3 c 4");
    }

    #[test]
    fn keys_values_and_for() {
        let mut i = Interpreter::new();
        run(&mut i, "set d {apple 1 banana 2 avocado 3}");
        assert_eq!(run(&mut i, "dict keys $d a*"), "apple avocado");
        assert_eq!(run(&mut i, "dict values $d"), "1 2 3");
        run(
            &mut i,
            "set out {}; dict for {k v} $d { if {$v == 2} continue; lappend out $k$v }",
        );
        assert_eq!(run(&mut i, "set out"), "apple1 avocado3");
        assert!(i.eval_toplevel("dict for {k} $d {}").is_err());
    }

    #[test]
    fn incr_append_lappend() {
        let mut i = Interpreter::new();
        run(&mut i, "dict incr d n");
        run(&mut i, "dict incr d n 5");
        assert_eq!(run(&mut i, "dict get $d n"), "6");
        run(&mut i, "dict append d s ab cd");
        assert_eq!(run(&mut i, "dict get $d s"), "abcd");
        run(&mut i, "dict lappend d l x {y z}");
        assert_eq!(run(&mut i, "dict get $d l"), "x {y z}");
        assert!(run(&mut i, "dict info $d").contains("3 entries"));
    }
}
