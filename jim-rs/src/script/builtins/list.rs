//! List commands.

use std::cmp::Ordering;

use crate::glob::glob_match;

use super::super::error::{EvalResult, Exception};
use super::super::interp::Interpreter;
use super::super::value::Value;
use super::{arity, concat_words, index_in, range_in, wrong_args, Index};

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_command("list", cmd_list);
    interp.register_command("llength", cmd_llength);
    interp.register_command("lindex", cmd_lindex);
    interp.register_command("lappend", cmd_lappend);
    interp.register_command("lset", cmd_lset);
    interp.register_command("linsert", cmd_linsert);
    interp.register_command("lreplace", cmd_lreplace);
    interp.register_command("lrange", cmd_lrange);
    interp.register_command("lsearch", cmd_lsearch);
    interp.register_command("lsort", cmd_lsort);
    interp.register_command("lreverse", cmd_lreverse);
    interp.register_command("lrepeat", cmd_lrepeat);
    interp.register_command("lassign", cmd_lassign);
    interp.register_command("concat", cmd_concat);
    interp.register_command("join", cmd_join);
    interp.register_command("split", cmd_split);
    interp.register_command("range", cmd_range);
}

fn cmd_list(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    Ok(Value::from_list(argv[1..].to_vec()))
}

fn cmd_llength(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, Some(2), "list")?;
    Ok(Value::from(argv[1].list_len()?))
}

/// The index words of `lindex`/`lset`: either several words or one word
/// holding a list of indices.
fn index_path(words: &[Value]) -> EvalResult<Vec<Value>> {
    match words {
        [single] => Ok(single.get_list()?.to_vec()),
        many => Ok(many.to_vec()),
    }
}

fn cmd_lindex(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "list ?index ...?")?;
    let mut current = argv[1].clone();
    for index in index_path(&argv[2..])? {
        let items = current.get_list()?;
        match index_in(&index, items.len())? {
            Some(i) => {
                let next = items[i].clone();
                current = next;
            }
            None => return Ok(Value::empty()),
        }
    }
    Ok(current)
}

fn cmd_lappend(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "varName ?value ...?")?;
    interp.modify_var(&argv[1], Some(Value::empty()), |v| {
        v.list_mut()?.extend_from_slice(&argv[2..]);
        Ok(v.clone())
    })
}

fn set_path(target: &mut Value, path: &[Value], value: Value) -> EvalResult<()> {
    let Some((first, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };
    let items = target.list_mut()?;
    let len = items.len();
    let i = Index::parse(first)?.resolve(len);
    if i == len as i64 && rest.is_empty() {
        items.push(value);
        return Ok(());
    }
    if !(0..len as i64).contains(&i) {
        return Err(Exception::error("list index out of range"));
    }
    set_path(&mut items[i as usize], rest, value)
}

fn cmd_lset(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 3, None, "listVar ?index ...? value")?;
    let path = index_path(&argv[2..argv.len() - 1])?;
    let value = argv[argv.len() - 1].clone();
    interp.modify_var(&argv[1], None, |v| {
        set_path(v, &path, value)?;
        Ok(v.clone())
    })
}

fn cmd_linsert(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 3, None, "list index ?element ...?")?;
    let mut list = argv[1].clone();
    let items = list.list_mut()?;
    let at = Index::parse(&argv[2])?.resolve_insert(items.len());
    items.splice(at..at, argv[3..].iter().cloned());
    Ok(list)
}

fn cmd_lreplace(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 4, None, "list first last ?element ...?")?;
    let mut list = argv[1].clone();
    let items = list.list_mut()?;
    let len = items.len();
    let first = Index::parse(&argv[2])?.resolve(len).clamp(0, len as i64) as usize;
    let last = Index::parse(&argv[3])?.resolve(len).min(len as i64 - 1);
    let end = if last < first as i64 { first } else { last as usize + 1 };
    items.splice(first..end, argv[4..].iter().cloned());
    Ok(list)
}

fn cmd_lrange(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 4, Some(4), "list first last")?;
    let items = argv[1].get_list()?;
    Ok(match range_in(&argv[2], &argv[3], items.len())? {
        Some((first, last)) => Value::from_list(items[first..=last].to_vec()),
        None => Value::empty(),
    })
}

fn cmd_lsearch(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let usage = "?-exact|-glob? ?-all? ?-inline? ?-not? ?-nocase? list value";
    if argv.len() < 3 {
        return Err(wrong_args(argv, usage));
    }
    let (mut glob, mut all, mut inline, mut not, mut nocase) = (true, false, false, false, false);
    for opt in &argv[1..argv.len() - 2] {
        match opt.as_str().as_ref() {
            "-exact" => glob = false,
            "-glob" => glob = true,
            "-all" => all = true,
            "-inline" => inline = true,
            "-not" => not = true,
            "-nocase" => nocase = true,
            other => {
                return Err(Exception::error(format!(
                    "bad option \"{other}\": must be -all, -exact, -glob, -inline, -nocase, or -not"
                )))
            }
        }
    }
    let items = argv[argv.len() - 2].get_list()?;
    let pattern = argv[argv.len() - 1].as_str();
    let matches = |item: &Value| {
        let text = item.as_str();
        let hit = if glob {
            glob_match(&pattern, &text, nocase)
        } else if nocase {
            text.to_lowercase() == pattern.to_lowercase()
        } else {
            *text == *pattern
        };
        hit != not
    };
    let mut found = items.iter().enumerate().filter(|(_, item)| matches(item));
    let report = |(i, item): (usize, &Value)| if inline { item.clone() } else { Value::from(i) };
    if all {
        return Ok(Value::from_list(found.map(report).collect()));
    }
    Ok(match found.next() {
        Some(hit) => report(hit),
        None if inline => Value::empty(),
        None => Value::from(-1i64),
    })
}

#[derive(Clone, Copy)]
enum SortKind {
    Ascii,
    Integer,
    Real,
}

fn cmd_lsort(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let usage = "?options? list";
    if argv.len() < 2 {
        return Err(wrong_args(argv, usage));
    }
    let (mut kind, mut decreasing, mut nocase, mut unique) = (SortKind::Ascii, false, false, false);
    let mut index = None;
    let mut command = None;
    let opts = &argv[1..argv.len() - 1];
    let mut k = 0;
    while k < opts.len() {
        match opts[k].as_str().as_ref() {
            "-ascii" => kind = SortKind::Ascii,
            "-integer" => kind = SortKind::Integer,
            "-real" => kind = SortKind::Real,
            "-increasing" => decreasing = false,
            "-decreasing" => decreasing = true,
            "-nocase" => nocase = true,
            "-unique" => unique = true,
            "-index" => {
                k += 1;
                index = Some(opts.get(k).ok_or_else(|| wrong_args(argv, usage))?.clone());
            }
            "-command" => {
                k += 1;
                command = Some(opts.get(k).ok_or_else(|| wrong_args(argv, usage))?.clone());
            }
            other => {
                return Err(Exception::error(format!(
                    "bad option \"{other}\": must be -ascii, -command, -decreasing, -increasing, -index, -integer, -nocase, -real, or -unique"
                )))
            }
        }
        k += 1;
    }

    let mut items = argv[argv.len() - 1].get_list()?.to_vec();
    let key = |v: &Value| -> EvalResult<Value> {
        match &index {
            Some(i) => {
                let sub = v.get_list()?;
                index_in(i, sub.len())?
                    .map(|n| sub[n].clone())
                    .ok_or_else(|| Exception::error("element index out of range"))
            }
            None => Ok(v.clone()),
        }
    };
    let mut compare = |a: &Value, b: &Value| -> EvalResult<Ordering> {
        let (a, b) = (key(a)?, key(b)?);
        if let Some(cmd) = &command {
            let mut call = cmd.get_list()?.to_vec();
            call.push(a);
            call.push(b);
            let n = interp.eval_command(&call)?.get_int()?;
            return Ok(n.cmp(&0));
        }
        Ok(match kind {
            SortKind::Ascii if nocase => a.as_str().to_lowercase().cmp(&b.as_str().to_lowercase()),
            SortKind::Ascii => a.as_str().cmp(&b.as_str()),
            SortKind::Integer => a.get_int()?.cmp(&b.get_int()?),
            SortKind::Real => a.get_double()?.total_cmp(&b.get_double()?),
        })
    };

    let mut failure = None;
    items.sort_by(|a, b| match compare(a, b) {
        Ok(ord) if decreasing => ord.reverse(),
        Ok(ord) => ord,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    if unique {
        let mut deduped: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            let same = match deduped.last() {
                Some(prev) => compare(prev, &item)? == Ordering::Equal,
                None => false,
            };
            if same {
                if let Some(prev) = deduped.last_mut() {
                    *prev = item;
                }
            } else {
                deduped.push(item);
            }
        }
        items = deduped;
    }
    Ok(Value::from_list(items))
}

fn cmd_lreverse(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, Some(2), "list")?;
    let mut items = argv[1].get_list()?.to_vec();
    items.reverse();
    Ok(Value::from_list(items))
}

fn cmd_lrepeat(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "count ?value ...?")?;
    let count = argv[1].get_int()?;
    if count < 0 {
        return Err(Exception::error(format!(
            "bad count \"{count}\": must be integer >= 0"
        )));
    }
    let elems = &argv[2..];
    let mut out = Vec::new();
    for _ in 0..count {
        out.extend_from_slice(elems);
    }
    Ok(Value::from_list(out))
}

fn cmd_lassign(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, None, "list ?varName ...?")?;
    let items = argv[1].get_list()?;
    let vars = &argv[2..];
    for (k, var) in vars.iter().enumerate() {
        interp.set_var_value(var, items.get(k).cloned().unwrap_or_default())?;
    }
    Ok(Value::from_list(items.iter().skip(vars.len()).cloned().collect()))
}

fn cmd_concat(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    match &argv[1..] {
        [] => Ok(Value::empty()),
        [only] => Ok(Value::from(only.as_str().trim())),
        words => Ok(concat_words(words)),
    }
}

fn cmd_join(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, Some(3), "list ?joinString?")?;
    let sep = argv.get(2).map_or_else(|| " ".into(), |s| s.as_str().to_string());
    let items = argv[1].get_list()?;
    let parts: Vec<String> = items.iter().map(|v| v.as_str().to_string()).collect();
    Ok(Value::from(parts.join(&sep)))
}

fn cmd_split(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    arity(argv, 2, Some(3), "string ?splitChars?")?;
    let text = argv[1].as_str();
    let seps: Vec<char> = match argv.get(2) {
        Some(s) => s.as_str().chars().collect(),
        None => vec![' ', '\t', '\n', '\r'],
    };
    if text.is_empty() {
        return Ok(Value::empty());
    }
    let parts: Vec<Value> = if seps.is_empty() {
        text.chars().map(|c| Value::from(c.to_string())).collect()
    } else {
        text.split(|c| seps.contains(&c)).map(Value::from).collect()
    };
    Ok(Value::from_list(parts))
}

fn cmd_range(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let (start, end, step) = match argv {
        [_, end] => (0, end.get_int()?, 1),
        [_, start, end] => (start.get_int()?, end.get_int()?, 1),
        [_, start, end, step] => (start.get_int()?, end.get_int()?, step.get_int()?),
        _ => return Err(wrong_args(argv, "?start? end ?step?")),
    };
    if step == 0 {
        return Err(Exception::error("Invalid (infinite?) range specified"));
    }
    let mut out = Vec::new();
    let mut n = start;
    while (step > 0 && n < end) || (step < 0 && n > end) {
        out.push(Value::from(n));
        n = match n.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::from_list(out))
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
    fn building_and_indexing() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "list a {b c} {}"), "a {b c} {}");
        assert_eq!(run(&mut i, "llength {a {b c} d}"), "3");
        assert_eq!(run(&mut i, "lindex {a {b c} d} 1 0"), "b");
        assert_eq!(run(&mut i, "lindex {a {b c} d} {1 1}"), "c");
        assert_eq!(run(&mut i, "lindex {a b c} end-1"), "b");
        assert_eq!(run(&mut i, "lindex {a b c} 7"), "");
        assert_eq!(run(&mut i, "lindex {a b c}"), "a b c");
    }

    #[test]
    fn modifying_variables() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "lappend l a; lappend l b {c d}"), "a b {c d}");
        assert_eq!(run(&mut i, "lset l 2 1 X; set l"), "a b {c X}");
        assert_eq!(run(&mut i, "lset l end Z"), "a b Z");
        assert_eq!(run(&mut i, "lset l 3 new"), "a b Z new");
        assert!(i.eval_toplevel("lset l 9 x").is_err());
    }

    #[test]
    fn slicing() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "linsert {a b} 1 x y"), "a x y b");
        assert_eq!(run(&mut i, "linsert {a b} end z"), "a b z");
        assert_eq!(run(&mut i, "lreplace {a b c d} 1 2 X"), "a X d");
        assert_eq!(run(&mut i, "lreplace {a b c} 1 0 ins"), "a ins b c");
        assert_eq!(run(&mut i, "lreplace {a b c} end end"), "a b");
        assert_eq!(run(&mut i, "lrange {a b c d} 1 end"), "b c d");
        assert_eq!(run(&mut i, "lrange {a b c d} 3 1"), "");
    }

    #[test]
    fn searching() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "lsearch {apple banana cherry} b*"), "1");
        assert_eq!(run(&mut i, "lsearch -exact {a* b} a*"), "0");
        assert_eq!(run(&mut i, "lsearch {a b} z"), "-1");
        assert_eq!(run(&mut i, "lsearch -all -inline {x1 y x2} x*"), "x1 x2");
        assert_eq!(run(&mut i, "lsearch -all -not {x1 y x2} x*"), "1");
        assert_eq!(run(&mut i, "lsearch -nocase -exact {A b} a"), "0");
    }

    #[test]
    fn sorting() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "lsort {pear apple fig}"), "apple fig pear");
        assert_eq!(run(&mut i, "lsort -integer {10 9 100}"), "9 10 100");
        assert_eq!(run(&mut i, "lsort -real -decreasing {1.5 2 0.25}"), "2 1.5 0.25");
        assert_eq!(run(&mut i, "lsort -unique {b a b c a}"), "a b c");
        assert_eq!(run(&mut i, "lsort -index 1 {{x 3} {y 1} {z 2}}"), "{y 1} {z 2} {x 3}");
        assert_eq!(run(&mut i, "lsort -nocase {b A c}"), "A b c");
        run(&mut i, "proc bylen {a b} { expr {[string length $a] - [string length $b]} }");
        assert_eq!(run(&mut i, "lsort -command bylen {ccc a bb}"), "a bb ccc");
        assert!(i.eval_toplevel("lsort -integer {1 x}").is_err());
    }

    #[test]
    fn misc_list_commands() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "lreverse {1 2 3}"), "3 2 1");
        assert_eq!(run(&mut i, "lrepeat 2 a b"), "a b a b");
        assert_eq!(run(&mut i, "lassign {1 2 3} x y"), "3");
        assert_eq!(run(&mut i, "list $x $y"), "1 2");
        assert_eq!(run(&mut i, "concat {a b} { c } {}"), "a b c");
        assert_eq!(run(&mut i, "join {a b c} ,"), "a,b,c");
        assert_eq!(run(&mut i, "split a,b,,c ,"), "a b {} c");
        assert_eq!(run(&mut i, "split abc {}"), "a b c");
        assert_eq!(run(&mut i, "range 4"), "0 1 2 3");
        assert_eq!(run(&mut i, "range 2 10 3"), "2 5 8");
        assert_eq!(run(&mut i, "range 5 0 -2"), "5 3 1");
        assert!(i.eval_toplevel("range 1 5 0").is_err());
    }
}
