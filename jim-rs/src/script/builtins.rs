//! The core command set.
//!
//! Every interpreter gets these at construction through [`register_all`].
//! Commands receive the full word list (`argv[0]` is the name they were
//! invoked by) and report misuse with [`wrong_args`].

use std::rc::Rc;

use super::error::{Code, EvalResult, Exception};
use super::interp::Interpreter;
use super::value::Value;

mod control;
mod dict;
mod format;
mod info;
mod lang;
mod list;
mod string;

/// Adds every core command to `interp`.
pub(crate) fn register_all(interp: &mut Interpreter) {
    lang::register(interp);
    control::register(interp);
    list::register(interp);
    string::register(interp);
    dict::register(interp);
    info::register(interp);
}

// ── Argument helpers ─────────────────────────────────────────────────────────

/// The standard arity error, naming the command as it was invoked.
pub(crate) fn wrong_args(argv: &[Value], usage: &str) -> Exception {
    let name = argv.first().map(Value::as_str).unwrap_or_else(|| Rc::from(""));
    if usage.is_empty() {
        Exception::error(format!("wrong # args: should be \"{name}\""))
    } else {
        Exception::error(format!("wrong # args: should be \"{name} {usage}\""))
    }
}

/// Checks that `argv` has between `min` and `max` words, command name
/// included.
pub(crate) fn arity(argv: &[Value], min: usize, max: Option<usize>, usage: &str) -> EvalResult<()> {
    if argv.len() < min || max.is_some_and(|max| argv.len() > max) {
        return Err(wrong_args(argv, usage));
    }
    Ok(())
}

/// Resolves a subcommand name against `options`, for ensemble commands
/// such as `string` and `dict`.  Unique prefixes are accepted.
pub(crate) fn subcommand<'a>(argv: &[Value], options: &[&'a str]) -> EvalResult<&'a str> {
    let Some(given) = argv.get(1) else {
        return Err(wrong_args(argv, "subcommand ?arg ...?"));
    };
    let given = given.as_str();
    if let Some(exact) = options.iter().find(|o| **o == &*given) {
        return Ok(exact);
    }
    let mut matches = options.iter().filter(|o| o.starts_with(&*given));
    match (matches.next(), matches.next()) {
        (Some(only), None) if !given.is_empty() => Ok(only),
        _ => Err(Exception::error(format!(
            "unknown or ambiguous subcommand \"{given}\": must be {}",
            one_of(options)
        ))),
    }
}

/// `a, b, or c`
pub(crate) fn one_of(options: &[&str]) -> String {
    match options {
        [] => String::new(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{}, or {last}", init.join(", ")),
    }
}

/// Concatenates words the way `concat`, `eval` and `expr` do: each is
/// trimmed and empty ones are dropped.
pub(crate) fn concat_words(words: &[Value]) -> Value {
    if let [only] = words {
        return only.clone();
    }
    let mut out = String::new();
    for w in words {
        let s = w.as_str();
        let t = s.trim_matches(|c: char| c.is_ascii_whitespace());
        if t.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(t);
    }
    Value::from(out)
}

pub(crate) fn parse_code(v: &Value) -> EvalResult<Code> {
    let s = v.as_str();
    Code::parse(&s)
        .or_else(|| v.get_int().ok().and_then(Code::from_i64))
        .ok_or_else(|| {
            Exception::error(format!(
                "bad completion code \"{s}\": must be ok, error, return, break, continue, signal, exit, or an integer"
            ))
        })
}

// ── Indices ──────────────────────────────────────────────────────────────────

/// A list or string index: `N`, `end`, `end-N`, `end+N`, `N+M` or `N-M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Index {
    Start(i64),
    /// Offset from the last element.
    End(i64),
}

impl Index {
    pub(crate) fn parse(v: &Value) -> EvalResult<Index> {
        let s = v.as_str();
        let bad = || {
            Exception::error(format!(
                "bad index \"{s}\": must be intexpr or end?[+-]intexpr?"
            ))
        };
        let t = s.trim();
        if let Some(rest) = t.strip_prefix("end") {
            if rest.is_empty() {
                return Ok(Index::End(0));
            }
            let off = offset_expr(rest).ok_or_else(bad)?;
            return Ok(Index::End(off));
        }
        if let Ok(n) = v.get_int() {
            return Ok(Index::Start(n));
        }
        // N+M / N-M, skipping a leading sign on N.
        let split = t
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map(|(i, _)| i)
            .ok_or_else(bad)?;
        let base: i64 = t[..split].trim().parse().map_err(|_| bad())?;
        let off = offset_expr(&t[split..]).ok_or_else(bad)?;
        base.checked_add(off).map(Index::Start).ok_or_else(bad)
    }

    /// Position in a sequence of `len` items; may be out of range.
    pub(crate) fn resolve(self, len: usize) -> i64 {
        match self {
            Index::Start(n) => n,
            Index::End(off) => len as i64 - 1 + off,
        }
    }

    /// Position at which to insert: `end` means after the last item.
    pub(crate) fn resolve_insert(self, len: usize) -> usize {
        let pos = match self {
            Index::Start(n) => n,
            Index::End(off) => len as i64 + off,
        };
        pos.clamp(0, len as i64) as usize
    }
}

/// `+N` or `-N`.
fn offset_expr(s: &str) -> Option<i64> {
    let (neg, digits) = match s.as_bytes().first()? {
        b'+' => (false, &s[1..]),
        b'-' => (true, &s[1..]),
        _ => return None,
    };
    let n: i64 = digits.trim().parse().ok()?;
    Some(if neg { -n } else { n })
}

/// Element `index` of `len` items, if in range.
pub(crate) fn index_in(v: &Value, len: usize) -> EvalResult<Option<usize>> {
    let i = Index::parse(v)?.resolve(len);
    Ok((0..len as i64).contains(&i).then_some(i as usize))
}

/// A `first last` pair clamped to `len` items; `None` when empty.
pub(crate) fn range_in(first: &Value, last: &Value, len: usize) -> EvalResult<Option<(usize, usize)>> {
    let first = Index::parse(first)?.resolve(len).max(0);
    let last = Index::parse(last)?.resolve(len).min(len as i64 - 1);
    Ok((first <= last).then_some((first as usize, last as usize)))
}

// ── Loops ────────────────────────────────────────────────────────────────────

pub(crate) enum LoopStep {
    Next,
    Exit,
}

/// Applies a loop body's outcome: `break`/`continue` with a count above
/// one leave this loop and travel on with the count reduced.
pub(crate) fn loop_step(result: EvalResult) -> EvalResult<LoopStep> {
    match result {
        Ok(_) | Err(Exception::Continue(1)) => Ok(LoopStep::Next),
        Err(Exception::Break(1)) => Ok(LoopStep::Exit),
        Err(Exception::Break(n)) => Err(Exception::Break(n - 1)),
        Err(Exception::Continue(n)) => Err(Exception::Continue(n - 1)),
        Err(e) => Err(e),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(s: &str) -> Index {
        Index::parse(&Value::from(s)).unwrap()
    }

    #[test]
    fn index_forms() {
        assert_eq!(idx("3"), Index::Start(3));
        assert_eq!(idx("end"), Index::End(0));
        assert_eq!(idx("end-2"), Index::End(-2));
        assert_eq!(idx("end+1"), Index::End(1));
        assert_eq!(idx("1+2"), Index::Start(3));
        assert_eq!(idx("-1+2"), Index::Start(1));
        assert_eq!(idx("5-7"), Index::Start(-2));
        assert!(Index::parse(&Value::from("middle")).is_err());
        assert!(Index::parse(&Value::from("end-x")).is_err());
    }

    #[test]
    fn resolving_against_a_length() {
        assert_eq!(idx("end").resolve(4), 3);
        assert_eq!(idx("end-1").resolve(4), 2);
        assert_eq!(idx("end").resolve_insert(4), 4);
        assert_eq!(idx("-3").resolve_insert(4), 0);
        assert_eq!(range_in(&Value::from("1"), &Value::from("end"), 3).unwrap(), Some((1, 2)));
        assert_eq!(range_in(&Value::from("2"), &Value::from("1"), 3).unwrap(), None);
    }

    #[test]
    fn subcommand_prefixes() {
        let argv = [Value::from("string"), Value::from("len")];
        assert_eq!(subcommand(&argv, &["length", "last"]).unwrap(), "length");
        let argv = [Value::from("string"), Value::from("l")];
        let err = subcommand(&argv, &["length", "last"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown or ambiguous subcommand \"l\": must be length, or last"
        );
    }

    #[test]
    fn concat_trims_and_skips_empty_words() {
        let words = [Value::from(" a b "), Value::from(""), Value::from("c")];
        assert_eq!(concat_words(&words), "a b c");
    }
}
