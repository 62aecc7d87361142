//! `format`: printf-style conversions over script values.

use super::super::error::{EvalResult, Exception};
use super::super::interp::Interpreter;
use super::super::value::Value;
use super::wrong_args;

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
}

pub(super) fn cmd_format(_: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let Some(template) = argv.get(1) else {
        return Err(wrong_args(argv, "formatString ?arg ...?"));
    };
    format(&template.as_str(), &argv[2..]).map(Value::from)
}

fn not_enough() -> Exception {
    Exception::error("not enough arguments for all format specifiers")
}

/// Expands `template` against `args`.
pub(crate) fn format(template: &str, args: &[Value]) -> EvalResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&f) = chars.peek() {
            match f {
                '-' => spec.left = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '0' => spec.zero = true,
                '#' => spec.alt = true,
                _ => break,
            }
            chars.next();
        }
        if chars.peek() == Some(&'*') {
            chars.next();
            let w = args.next().ok_or_else(not_enough)?.get_int()?;
            if w < 0 {
                spec.left = true;
            }
            spec.width = w.unsigned_abs() as usize;
        } else {
            spec.width = take_number(&mut chars);
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            if chars.peek() == Some(&'*') {
                chars.next();
                let p = args.next().ok_or_else(not_enough)?.get_int()?;
                spec.precision = Some(p.max(0) as usize);
            } else {
                spec.precision = Some(take_number(&mut chars));
            }
        }
        // Size modifiers are accepted and ignored.
        while matches!(chars.peek(), Some('l' | 'h')) {
            chars.next();
        }
        let Some(conv) = chars.next() else {
            return Err(Exception::error("format string ended in middle of field specifier"));
        };
        let arg = args.next().ok_or_else(not_enough)?;
        let body = match conv {
            'd' | 'i' => signed(&spec, arg.get_int()?),
            'u' => unsigned(&spec, arg.get_int()? as u64, 10, ""),
            'x' => unsigned(&spec, arg.get_int()? as u64, 16, "0x"),
            'X' => unsigned(&spec, arg.get_int()? as u64, 16, "0X").to_uppercase(),
            'o' => unsigned(&spec, arg.get_int()? as u64, 8, "0"),
            'b' => unsigned(&spec, arg.get_int()? as u64, 2, "0b"),
            'c' => {
                let n = arg.get_int()?;
                let c = u32::try_from(n).ok().and_then(char::from_u32).unwrap_or('\u{fffd}');
                pad(&spec, c.to_string())
            }
            's' => {
                let s = arg.as_str();
                let s: String = match spec.precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s.to_string(),
                };
                pad(&spec, s)
            }
            'f' | 'e' | 'E' | 'g' | 'G' => float(&spec, arg.get_double()?, conv),
            other => {
                return Err(Exception::error(format!("bad field specifier \"{other}\"")));
            }
        };
        out.push_str(&body);
    }
    Ok(out)
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> usize {
    let mut n = 0usize;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = n.saturating_mul(10).saturating_add(d as usize);
        chars.next();
    }
    n
}

fn sign_of(spec: &Spec, negative: bool) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

fn signed(spec: &Spec, n: i64) -> String {
    let mut digits = n.unsigned_abs().to_string();
    if let Some(p) = spec.precision {
        digits = format!("{digits:0>p$}");
    }
    let sign = sign_of(spec, n < 0);
    pad_number(spec, sign, &digits, spec.precision.is_none())
}

fn unsigned(spec: &Spec, n: u64, radix: u32, prefix: &str) -> String {
    let mut digits = match radix {
        16 => format!("{n:x}"),
        8 => format!("{n:o}"),
        2 => format!("{n:b}"),
        _ => n.to_string(),
    };
    if let Some(p) = spec.precision {
        digits = format!("{digits:0>p$}");
    }
    let prefix = if spec.alt && n != 0 { prefix } else { "" };
    pad_number(spec, prefix, &digits, spec.precision.is_none())
}

fn float(spec: &Spec, x: f64, conv: char) -> String {
    let sign = sign_of(spec, x.is_sign_negative() && !x.is_nan());
    let abs = x.abs();
    if !x.is_finite() {
        let word = if x.is_nan() { "NaN" } else { "Inf" };
        return pad_number(spec, if x.is_nan() { "" } else { sign }, word, false);
    }
    let precision = spec.precision.unwrap_or(6);
    let body = match conv {
        'f' => {
            let s = format!("{abs:.precision$}");
            if spec.alt && precision == 0 {
                s + "."
            } else {
                s
            }
        }
        'e' | 'E' => exponent(abs, precision, spec.alt),
        _ => general(abs, precision, spec.alt),
    };
    let body = if conv.is_ascii_uppercase() {
        body.to_uppercase()
    } else {
        body
    };
    pad_number(spec, sign, &body, true)
}

/// `d.ddde+XX` with at least two exponent digits.
fn exponent(abs: f64, precision: usize, alt: bool) -> String {
    let s = format!("{abs:.precision$e}");
    let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let dot = if alt && precision == 0 { "." } else { "" };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{dot}e{sign}{:02}", exp.unsigned_abs())
}

/// `%g`: shortest of fixed and exponent form, trailing zeros dropped.
fn general(abs: f64, precision: usize, alt: bool) -> String {
    let p = precision.max(1);
    if abs == 0.0 {
        return if alt { format!("{:.*}", p - 1, 0.0) } else { "0".into() };
    }
    let rounded = format!("{abs:.prec$e}", prec = p - 1);
    let exp: i32 = rounded
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let s = if exp < -4 || exp >= p as i32 {
        exponent(abs, p - 1, alt)
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        format!("{abs:.decimals$}")
    };
    if alt {
        return s;
    }
    match s.split_once('e') {
        Some((mantissa, exp)) => format!("{}e{exp}", strip_zeros(mantissa)),
        None => strip_zeros(&s).to_string(),
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Pads a number; zero padding goes between the sign and the digits.
fn pad_number(spec: &Spec, sign: &str, digits: &str, zero_ok: bool) -> String {
    let len = sign.chars().count() + digits.chars().count();
    if spec.zero && !spec.left && zero_ok && len < spec.width {
        let zeros = "0".repeat(spec.width - len);
        return format!("{sign}{zeros}{digits}");
    }
    pad(spec, format!("{sign}{digits}"))
}

fn pad(spec: &Spec, s: String) -> String {
    let len = s.chars().count();
    if len >= spec.width {
        return s;
    }
    let fill = " ".repeat(spec.width - len);
    if spec.left {
        s + &fill
    } else {
        fill + &s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(template: &str, args: &[&str]) -> String {
        let args: Vec<Value> = args.iter().map(|a| Value::from(*a)).collect();
        format(template, &args).unwrap()
    }

    #[test]
    fn integers() {
        assert_eq!(fmt("%d", &["42"]), "42");
        assert_eq!(fmt("%5d|", &["-42"]), "  -42|");
        assert_eq!(fmt("%-5d|", &["42"]), "42   |");
        assert_eq!(fmt("%05d", &["-42"]), "-0042");
        assert_eq!(fmt("%+d", &["7"]), "+7");
        assert_eq!(fmt("%x %X %o %b", &["255", "255", "8", "5"]), "ff FF 10 101");
        assert_eq!(fmt("%#x", &["255"]), "0xff");
        assert_eq!(fmt("%.3d", &["7"]), "007");
        assert_eq!(fmt("%c", &["65"]), "A");
    }

    #[test]
    fn floats() {
        assert_eq!(fmt("%f", &["1.5"]), "1.500000");
        assert_eq!(fmt("%.2f", &["3.14159"]), "3.14");
        assert_eq!(fmt("%8.3f|", &["-2.5"]), "  -2.500|");
        assert_eq!(fmt("%e", &["12345.678"]), "1.234568e+04");
        assert_eq!(fmt("%E", &["0.00012"]), "1.200000E-04");
        assert_eq!(fmt("%g", &["0.0001"]), "0.0001");
        assert_eq!(fmt("%g", &["1e20"]), "1e+20");
        assert_eq!(fmt("%g", &["100000"]), "100000");
        assert_eq!(fmt("%g", &["1000000"]), "1e+06");
        assert_eq!(fmt("%g", &["3.5"]), "3.5");
    }

    #[test]
    fn strings_and_star_widths() {
        assert_eq!(fmt("%s-%s", &["a", "b"]), "a-b");
        assert_eq!(fmt("%-4s|", &["ab"]), "ab  |");
        assert_eq!(fmt("%.2s", &["abcdef"]), "ab");
        assert_eq!(fmt("%*s|", &["4", "x"]), "   x|");
        assert_eq!(fmt("%*s|", &["-4", "x"]), "x   |");
        assert_eq!(fmt("100%%", &[]), "100%");
    }

    #[test]
    fn errors() {
        assert!(format("%d", &[]).is_err());
        assert!(format("%d", &[Value::from("x")]).is_err());
        assert!(format("%q", &[Value::from("1")]).is_err());
        assert!(format("%", &[]).is_err());
    }
}
