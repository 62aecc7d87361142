//! `string` and `format`.
//!
//! Indices count codepoints, not bytes.

use std::cmp::Ordering;

use crate::glob::glob_match;

use super::super::error::{EvalResult, Exception};
use super::super::interp::Interpreter;
use super::super::value::{parse_bool, parse_double, parse_int, Value};
use super::{format, index_in, range_in, subcommand, wrong_args, Index};

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_command("string", cmd_string);
    interp.register_command("format", format::cmd_format);
}

const SUBCOMMANDS: &[&str] = &[
    "bytelength",
    "cat",
    "compare",
    "equal",
    "first",
    "index",
    "is",
    "last",
    "length",
    "map",
    "match",
    "range",
    "repeat",
    "replace",
    "reverse",
    "tolower",
    "totitle",
    "toupper",
    "trim",
    "trimleft",
    "trimright",
];

const WHITESPACE: &str = " \t\n\r\x0b\x0c";

fn chars(v: &Value) -> Vec<char> {
    v.as_str().chars().collect()
}

fn cmd_string(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let sub = subcommand(argv, SUBCOMMANDS)?;
    let args = &argv[2..];
    let usage = |u: &str| wrong_args(&argv[..2], u);
    match sub {
        "length" => match args {
            [s] => Ok(Value::from(s.as_str().chars().count())),
            _ => Err(usage("string")),
        },
        "bytelength" => match args {
            [s] => Ok(Value::from(s.as_str().len())),
            _ => Err(usage("string")),
        },
        "cat" => {
            let mut out = String::new();
            for a in args {
                out.push_str(&a.as_str());
            }
            Ok(Value::from(out))
        }
        "index" => match args {
            [s, index] => {
                let cs = chars(s);
                Ok(index_in(index, cs.len())?
                    .map(|i| Value::from(cs[i].to_string()))
                    .unwrap_or_default())
            }
            _ => Err(usage("string charIndex")),
        },
        "range" => match args {
            [s, first, last] => {
                let cs = chars(s);
                Ok(match range_in(first, last, cs.len())? {
                    Some((a, b)) => Value::from(cs[a..=b].iter().collect::<String>()),
                    None => Value::empty(),
                })
            }
            _ => Err(usage("string first last")),
        },
        "compare" | "equal" => {
            let (nocase, length, a, b) = compare_args(args).ok_or_else(|| {
                usage("?-nocase? ?-length int? string1 string2")
            })?;
            let length = match length {
                Some(l) => Some(l.get_int()?),
                None => None,
            };
            let ord = compare(&a.as_str(), &b.as_str(), nocase, length);
            Ok(if sub == "equal" {
                Value::from(ord == Ordering::Equal)
            } else {
                Value::from(match ord {
                    Ordering::Less => -1i64,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                })
            })
        }
        "match" => match args {
            [pattern, s] => Ok(Value::from(glob_match(&pattern.as_str(), &s.as_str(), false))),
            [opt, pattern, s] if opt.as_str().as_ref() == "-nocase" => {
                Ok(Value::from(glob_match(&pattern.as_str(), &s.as_str(), true)))
            }
            _ => Err(usage("?-nocase? pattern string")),
        },
        "first" => match args {
            [needle, hay] | [needle, hay, _] => {
                let (needle, hay) = (chars(needle), chars(hay));
                let start = match args.get(2) {
                    Some(i) => Index::parse(i)?.resolve(hay.len()).max(0) as usize,
                    None => 0,
                };
                let found = (start..=hay.len().saturating_sub(needle.len()))
                    .find(|&i| !needle.is_empty() && hay[i..].starts_with(&needle));
                Ok(found.map_or(Value::from(-1i64), Value::from))
            }
            _ => Err(usage("subString string ?index?")),
        },
        "last" => match args {
            [needle, hay] | [needle, hay, _] => {
                let (needle, hay) = (chars(needle), chars(hay));
                let last = match args.get(2) {
                    Some(i) => Index::parse(i)?.resolve(hay.len()),
                    None => hay.len() as i64,
                };
                if needle.is_empty() || last < 0 || needle.len() > hay.len() {
                    return Ok(Value::from(-1i64));
                }
                let top = (last as usize).min(hay.len() - needle.len());
                let found = (0..=top).rev().find(|&i| hay[i..].starts_with(&needle));
                Ok(found.map_or(Value::from(-1i64), Value::from))
            }
            _ => Err(usage("subString string ?index?")),
        },
        "tolower" | "toupper" | "totitle" => match args {
            [s] => {
                let s = s.as_str();
                Ok(Value::from(match sub {
                    "tolower" => s.to_lowercase(),
                    "toupper" => s.to_uppercase(),
                    _ => {
                        let mut cs = s.chars();
                        match cs.next() {
                            Some(first) => {
                                first.to_uppercase().chain(cs.as_str().to_lowercase().chars()).collect()
                            }
                            None => String::new(),
                        }
                    }
                }))
            }
            _ => Err(usage("string")),
        },
        "trim" | "trimleft" | "trimright" => {
            let (s, set) = match args {
                [s] => (s.as_str(), WHITESPACE.chars().collect::<Vec<_>>()),
                [s, set] => (s.as_str(), chars(set)),
                _ => return Err(usage("string ?trimChars?")),
            };
            let strip = |c: char| set.contains(&c);
            Ok(Value::from(match sub {
                "trim" => s.trim_matches(strip),
                "trimleft" => s.trim_start_matches(strip),
                _ => s.trim_end_matches(strip),
            }))
        }
        "repeat" => match args {
            [s, n] => {
                let n = n.get_int()?;
                Ok(Value::from(s.as_str().repeat(n.max(0) as usize)))
            }
            _ => Err(usage("string count")),
        },
        "reverse" => match args {
            [s] => Ok(Value::from(s.as_str().chars().rev().collect::<String>())),
            _ => Err(usage("string")),
        },
        "replace" => match args {
            [s, first, last] | [s, first, last, _] => {
                let cs = chars(s);
                let Some((a, b)) = range_in(first, last, cs.len())? else {
                    return Ok(s.clone());
                };
                let mut out: String = cs[..a].iter().collect();
                if let Some(new) = args.get(3) {
                    out.push_str(&new.as_str());
                }
                out.extend(&cs[b + 1..]);
                Ok(Value::from(out))
            }
            _ => Err(usage("string first last ?newstring?")),
        },
        "map" => match args {
            [mapping, s] => string_map(mapping, s, false),
            [opt, mapping, s] if opt.as_str().as_ref() == "-nocase" => string_map(mapping, s, true),
            _ => Err(usage("?-nocase? mapList string")),
        },
        "is" => string_is(interp, argv, args),
        _ => Err(usage("")),
    }
}

fn compare_args(args: &[Value]) -> Option<(bool, Option<&Value>, &Value, &Value)> {
    let (mut nocase, mut length) = (false, None);
    let mut i = 0;
    while i + 2 < args.len() {
        match args[i].as_str().as_ref() {
            "-nocase" => nocase = true,
            "-length" => {
                i += 1;
                length = Some(args.get(i)?);
            }
            _ => return None,
        }
        i += 1;
    }
    match &args[i..] {
        [a, b] => Some((nocase, length, a, b)),
        _ => None,
    }
}

fn compare(a: &str, b: &str, nocase: bool, length: Option<i64>) -> Ordering {
    let limit = length.filter(|l| *l >= 0).map_or(usize::MAX, |l| l as usize);
    let fold = |s: &str| -> Vec<char> {
        let it = s.chars().take(limit);
        if nocase {
            it.flat_map(char::to_lowercase).collect()
        } else {
            it.collect()
        }
    };
    fold(a).cmp(&fold(b))
}

fn string_map(mapping: &Value, s: &Value, nocase: bool) -> EvalResult {
    let pairs = mapping.get_list()?;
    if pairs.len() % 2 != 0 {
        return Err(Exception::error("list must contain an even number of elements"));
    }
    let pairs: Vec<(Vec<char>, String)> = pairs
        .chunks(2)
        .map(|p| (chars(&p[0]), p[1].as_str().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect();
    let eq = |a: char, b: char| {
        if nocase {
            a.to_lowercase().eq(b.to_lowercase())
        } else {
            a == b
        }
    };
    let text = chars(s);
    let mut out = String::new();
    let mut i = 0;
    'outer: while i < text.len() {
        for (key, replacement) in &pairs {
            let rest = &text[i..];
            if rest.len() >= key.len() && key.iter().zip(rest).all(|(a, b)| eq(*a, *b)) {
                out.push_str(replacement);
                i += key.len();
                continue 'outer;
            }
        }
        out.push(text[i]);
        i += 1;
    }
    Ok(Value::from(out))
}

fn string_is(_: &mut Interpreter, argv: &[Value], args: &[Value]) -> EvalResult {
    let (class, strict, s) = match args {
        [class, s] => (class.as_str(), false, s),
        [class, opt, s] if opt.as_str().as_ref() == "-strict" => (class.as_str(), true, s),
        _ => return Err(wrong_args(&argv[..2], "class ?-strict? str")),
    };
    let text = s.as_str();
    if text.is_empty() {
        return Ok(Value::from(!strict));
    }
    let all = |f: fn(&char) -> bool| text.chars().all(|c| f(&c));
    let result = match class.as_ref() {
        "integer" => parse_int(&text).is_some(),
        "double" => parse_int(&text).is_some() || parse_double(&text).is_some(),
        "boolean" => parse_bool(&text).is_some(),
        "true" => parse_bool(&text) == Some(true),
        "false" => parse_bool(&text) == Some(false),
        "list" => s.get_list().is_ok(),
        "alpha" => all(|c| c.is_alphabetic()),
        "alnum" => all(|c| c.is_alphanumeric()),
        "digit" => all(|c| c.is_ascii_digit()),
        "xdigit" => all(char::is_ascii_hexdigit),
        "space" => all(|c| c.is_whitespace()),
        "upper" => all(|c| c.is_uppercase()),
        "lower" => all(|c| c.is_lowercase()),
        "ascii" => all(char::is_ascii),
        "control" => all(|c| c.is_control()),
        "print" => all(|c| !c.is_control()),
        "graph" => all(|c| !c.is_control() && !c.is_whitespace()),
        "punct" => all(char::is_ascii_punctuation),
        "wordchar" => all(|c| c.is_alphanumeric() || *c == '_'),
        other => {
            return Err(Exception::error(format!(
                "bad class \"{other}\": must be alnum, alpha, ascii, boolean, control, digit, double, false, graph, integer, list, lower, print, punct, space, true, upper, wordchar, or xdigit"
            )))
        }
    };
    Ok(Value::from(result))
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
    fn lengths_and_indices_count_codepoints() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "string length héllo"), "5");
        assert_eq!(run(&mut i, "string bytelength héllo"), "6");
        assert_eq!(run(&mut i, "string index héllo 1"), "é");
        assert_eq!(run(&mut i, "string index abc end"), "c");
        assert_eq!(run(&mut i, "string index abc 9"), "");
        assert_eq!(run(&mut i, "string range abcdef 1 end-1"), "bcde");
    }

    #[test]
    fn comparisons() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "string compare abc abd"), "-1");
        assert_eq!(run(&mut i, "string compare -nocase ABC abc"), "0");
        assert_eq!(run(&mut i, "string compare -length 2 abc abd"), "0");
        assert_eq!(run(&mut i, "string equal a a"), "1");
        assert_eq!(run(&mut i, "string match {*.tcl} foo.tcl"), "1");
        assert_eq!(run(&mut i, "string match -nocase {F*} foo"), "1");
    }

    #[test]
    fn searching() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "string first ll hello"), "2");
        assert_eq!(run(&mut i, "string first l hello 3"), "3");
        assert_eq!(run(&mut i, "string first z hello"), "-1");
        assert_eq!(run(&mut i, "string last l hello"), "3");
        assert_eq!(run(&mut i, "string last l hello 2"), "2");
    }

    #[test]
    fn transforms() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "string toupper abc"), "ABC");
        assert_eq!(run(&mut i, "string totitle hELLO"), "Hello");
        assert_eq!(run(&mut i, "string trim {  x  }"), "x");
        assert_eq!(run(&mut i, "string trimleft xxaxx x"), "axx");
        assert_eq!(run(&mut i, "string trimright xxaxx x"), "xxa");
        assert_eq!(run(&mut i, "string repeat ab 3"), "ababab");
        assert_eq!(run(&mut i, "string reverse abc"), "cba");
        assert_eq!(run(&mut i, "string replace abcdef 1 2 XY"), "aXYdef");
        assert_eq!(run(&mut i, "string replace abc 1 1"), "ac");
        assert_eq!(run(&mut i, "string map {a 1 ab 2} abab"), "1b1b");
        assert_eq!(run(&mut i, "string map -nocase {A x} aA"), "xx");
        assert_eq!(run(&mut i, "string cat a b c"), "abc");
        assert_eq!(run(&mut i, "string len abc"), "3");
    }

    #[test]
    fn classes() {
        let mut i = Interpreter::new();
        assert_eq!(run(&mut i, "string is integer 42"), "1");
        assert_eq!(run(&mut i, "string is integer 4.2"), "0");
        assert_eq!(run(&mut i, "string is double 4.2"), "1");
        assert_eq!(run(&mut i, "string is alpha abc"), "1");
        assert_eq!(run(&mut i, "string is digit {}"), "1");
        assert_eq!(run(&mut i, "string is digit -strict {}"), "0");
        assert_eq!(run(&mut i, "string is boolean yes"), "1");
        assert!(i.eval_toplevel("string is nonsense x").is_err());
    }
}
