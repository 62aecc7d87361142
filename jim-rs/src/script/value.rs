//! Runtime values.
//!
//! Every [`Value`] has a string form and may also cache a native form:
//!
//! | Native form | Produced by |
//! |-------------|-------------|
//! | integer / double | arithmetic, index and count arguments |
//! | list / dict | list and dict commands |
//! | parsed script | `eval`, proc bodies, command substitution |
//! | parsed expression | `expr`, loop conditions |
//! | resolved command | command-name words (stamped with the command epoch) |
//! | resolved variable | variable-name words (stamped with the frame id) |
//! | source location | braced literals, used for line numbers of nested scripts |
//!
//! At least one of the two forms is always present.  A missing string is
//! regenerated from the native form on demand; any change to the native
//! content drops the string.  Converting between native forms never changes
//! the string, so it is allowed through a shared reference.
//!
//! Values are reference counted and cheap to clone.  Content changes go
//! through `&mut Value` accessors ([`Value::list_mut`], [`Value::dict_mut`],
//! [`Value::append_str`]) which copy the cell first if anyone else holds it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::command::Command;
use super::dict::Dict;
use super::error::{EvalResult, Exception};
use super::expr::{self, ExprTree};
use super::frame::{Var, VarCell};
use super::parse::{self, Script};

/// A reference-counted dual-representation value.
#[derive(Clone)]
pub struct Value(Rc<Obj>);

#[derive(Clone)]
struct Obj {
    bytes: RefCell<Option<Rc<str>>>,
    rep: RefCell<Rep>,
}

#[derive(Clone, Default)]
pub(crate) enum Rep {
    #[default]
    None,
    Int(i64),
    Double(f64),
    List(Rc<Vec<Value>>),
    Dict(Rc<Dict>),
    Script(Rc<Script>),
    Expr(Rc<ExprTree>),
    Command { epoch: u64, cmd: Weak<Command> },
    Variable { frame_id: u64, cell: Weak<RefCell<Var>> },
    Source { file: Rc<str>, line: usize },
}

impl Rep {
    fn name(&self) -> &'static str {
        match self {
            Rep::None => "string",
            Rep::Int(_) => "int",
            Rep::Double(_) => "double",
            Rep::List(_) => "list",
            Rep::Dict(_) => "dict",
            Rep::Script(_) => "script",
            Rep::Expr(_) => "expression",
            Rep::Command { .. } => "command",
            Rep::Variable { .. } => "variable",
            Rep::Source { .. } => "source",
        }
    }

    /// True if the string can be rebuilt from this form alone.
    fn regenerates(&self) -> bool {
        matches!(self, Rep::Int(_) | Rep::Double(_) | Rep::List(_) | Rep::Dict(_))
    }
}

/// A parsed number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Double(f64),
}

impl Number {
    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Double(x) => x,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Value {
        match n {
            Number::Int(i) => Value::from(i),
            Number::Double(x) => Value::from(x),
        }
    }
}

impl Value {
    fn with_rep(bytes: Option<Rc<str>>, rep: Rep) -> Value {
        Value(Rc::new(Obj {
            bytes: RefCell::new(bytes),
            rep: RefCell::new(rep),
        }))
    }

    pub fn empty() -> Value {
        Value::from("")
    }

    /// A list value with no string form yet.
    pub fn from_list(items: Vec<Value>) -> Value {
        Value::with_rep(None, Rep::List(Rc::new(items)))
    }

    pub fn from_dict(dict: Dict) -> Value {
        Value::with_rep(None, Rep::Dict(Rc::new(dict)))
    }

    /// A string value that remembers where it was written, so a script
    /// parsed from it reports the right file and line numbers.
    pub fn with_source(text: &str, file: Rc<str>, line: usize) -> Value {
        Value::with_rep(Some(Rc::from(text)), Rep::Source { file, line })
    }

    // ── String form ──────────────────────────────────────────────────────────

    /// The string form, regenerated from the native form if needed.
    pub fn as_str(&self) -> Rc<str> {
        if let Some(s) = self.0.bytes.borrow().as_ref() {
            return s.clone();
        }
        let s: Rc<str> = Rc::from(self.generate_string());
        *self.0.bytes.borrow_mut() = Some(s.clone());
        s
    }

    fn generate_string(&self) -> String {
        let rep = self.0.rep.borrow().clone();
        match rep {
            Rep::Int(n) => n.to_string(),
            Rep::Double(x) => format_double(x),
            Rep::List(items) => format_list(&items),
            Rep::Dict(d) => format_list(&d.to_list()),
            _ => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }

    /// Drops the string form if the native form can rebuild it.
    pub fn invalidate_string(&self) {
        if self.0.rep.borrow().regenerates() {
            *self.0.bytes.borrow_mut() = None;
        }
    }

    pub(crate) fn has_string(&self) -> bool {
        self.0.bytes.borrow().is_some()
    }

    /// Name of the cached native form, e.g. `"int"` or `"list"`.
    pub fn type_name(&self) -> &'static str {
        self.0.rep.borrow().name()
    }

    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn is_shared(&self) -> bool {
        self.ref_count() > 1
    }

    /// Unshared copy carrying both forms.
    pub fn duplicate(&self) -> Value {
        Value(Rc::new((*self.0).clone()))
    }

    /// Replaces the native form.  The string is materialized first so the
    /// value keeps at least one valid form.
    pub(crate) fn set_rep(&self, rep: Rep) {
        if self.0.bytes.borrow().is_none() {
            self.as_str();
        }
        *self.0.rep.borrow_mut() = rep;
    }

    fn rep(&self) -> Rep {
        self.0.rep.borrow().clone()
    }

    // ── Numbers ──────────────────────────────────────────────────────────────

    /// Classifies the value as an integer or double, caching the result.
    pub(crate) fn get_number(&self) -> Option<Number> {
        match *self.0.rep.borrow() {
            Rep::Int(n) => return Some(Number::Int(n)),
            Rep::Double(x) => return Some(Number::Double(x)),
            _ => {}
        }
        let s = self.as_str();
        if let Some(n) = parse_int(&s) {
            self.set_rep(Rep::Int(n));
            Some(Number::Int(n))
        } else if let Some(x) = parse_double(&s) {
            self.set_rep(Rep::Double(x));
            Some(Number::Double(x))
        } else {
            None
        }
    }

    pub fn get_int(&self) -> EvalResult<i64> {
        if let Rep::Int(n) = *self.0.rep.borrow() {
            return Ok(n);
        }
        let s = self.as_str();
        match parse_int(&s) {
            Some(n) => {
                self.set_rep(Rep::Int(n));
                Ok(n)
            }
            None => Err(Exception::error(format!("expected integer but got \"{s}\""))),
        }
    }

    pub fn get_double(&self) -> EvalResult<f64> {
        match self.get_number() {
            Some(n) => Ok(n.as_f64()),
            None => Err(Exception::error(format!(
                "expected floating-point number but got \"{}\"",
                self.as_str()
            ))),
        }
    }

    pub fn get_bool(&self) -> EvalResult<bool> {
        if let Some(n) = self.get_number() {
            return Ok(match n {
                Number::Int(i) => i != 0,
                Number::Double(x) => x != 0.0,
            });
        }
        let s = self.as_str();
        match parse_bool(&s) {
            Some(b) => Ok(b),
            None => Err(Exception::error(format!("expected boolean but got \"{s}\""))),
        }
    }

    // ── Lists and dicts ──────────────────────────────────────────────────────

    /// The list form.  Strings are parsed with list quoting rules.
    pub fn get_list(&self) -> EvalResult<Rc<Vec<Value>>> {
        match self.rep() {
            Rep::List(items) => Ok(items),
            // A dict built from a string with repeated keys has fewer pairs
            // than the string has words, so reparse while the string exists.
            Rep::Dict(d) if !self.has_string() => {
                let items = Rc::new(d.to_list());
                self.set_rep(Rep::List(items.clone()));
                Ok(items)
            }
            _ => {
                let s = self.as_str();
                let items: Vec<Value> = parse::parse_list(&s)?
                    .into_iter()
                    .map(Value::from)
                    .collect();
                let items = Rc::new(items);
                self.set_rep(Rep::List(items.clone()));
                Ok(items)
            }
        }
    }

    pub fn list_len(&self) -> EvalResult<usize> {
        Ok(self.get_list()?.len())
    }

    /// True if the value is a list that has never been given a string form,
    /// so evaluating it as a command needs no reparse.
    pub(crate) fn is_pure_list(&self) -> bool {
        !self.has_string() && matches!(*self.0.rep.borrow(), Rep::List(_))
    }

    /// Mutable access to the list elements.  The string form is dropped.
    pub fn list_mut(&mut self) -> EvalResult<&mut Vec<Value>> {
        self.get_list()?;
        let obj = Rc::make_mut(&mut self.0);
        *obj.bytes.get_mut() = None;
        match obj.rep.get_mut() {
            Rep::List(items) => Ok(Rc::make_mut(items)),
            _ => Err(Exception::error("value lost its list form")),
        }
    }

    pub fn get_dict(&self) -> EvalResult<Rc<Dict>> {
        if let Rep::Dict(d) = self.rep() {
            return Ok(d);
        }
        let items = self.get_list()?;
        let dict = Dict::from_pairs(items.iter().cloned())
            .map_err(|_| Exception::error("missing value to go with key"))?;
        let dict = Rc::new(dict);
        self.set_rep(Rep::Dict(dict.clone()));
        Ok(dict)
    }

    /// Mutable access to the dict.  The string form is dropped.
    pub fn dict_mut(&mut self) -> EvalResult<&mut Dict> {
        self.get_dict()?;
        let obj = Rc::make_mut(&mut self.0);
        *obj.bytes.get_mut() = None;
        match obj.rep.get_mut() {
            Rep::Dict(d) => Ok(Rc::make_mut(d)),
            _ => Err(Exception::error("value lost its dict form")),
        }
    }

    /// Appends to the string form, dropping any native form.
    pub fn append_str(&mut self, tail: &str) {
        let mut s = self.as_str().to_string();
        s.push_str(tail);
        let obj = Rc::make_mut(&mut self.0);
        *obj.bytes.get_mut() = Some(Rc::from(s));
        *obj.rep.get_mut() = Rep::None;
    }

    // ── Scripts and expressions ──────────────────────────────────────────────

    pub(crate) fn source_info(&self) -> Option<(Rc<str>, usize)> {
        match &*self.0.rep.borrow() {
            Rep::Source { file, line } => Some((file.clone(), *line)),
            Rep::Script(s) => Some((s.file.clone(), s.first_line)),
            _ => None,
        }
    }

    pub(crate) fn set_source_info(&self, file: Rc<str>, line: usize) {
        self.set_rep(Rep::Source { file, line });
    }

    pub(crate) fn get_script(&self) -> EvalResult<Rc<Script>> {
        if let Rep::Script(s) = self.rep() {
            return Ok(s);
        }
        let (file, line) = self
            .source_info()
            .unwrap_or_else(|| (Rc::from(""), 1));
        let text = self.as_str();
        let script = parse::parse_script(&text, file.clone(), line).map_err(|e| {
            let at = e.line();
            Exception::from(e).with_location(file, at)
        })?;
        let script = Rc::new(script);
        self.set_rep(Rep::Script(script.clone()));
        Ok(script)
    }

    pub(crate) fn get_expr(&self) -> EvalResult<Rc<ExprTree>> {
        if let Rep::Expr(e) = self.rep() {
            return Ok(e);
        }
        let tree = Rc::new(expr::parse_expr(&self.as_str())?);
        self.set_rep(Rep::Expr(tree.clone()));
        Ok(tree)
    }

    // ── Resolution caches ────────────────────────────────────────────────────

    pub(crate) fn cached_command(&self, epoch: u64) -> Option<Rc<Command>> {
        match &*self.0.rep.borrow() {
            Rep::Command { epoch: e, cmd } if *e == epoch => cmd.upgrade(),
            _ => None,
        }
    }

    pub(crate) fn cache_command(&self, epoch: u64, cmd: &Rc<Command>) {
        self.set_rep(Rep::Command {
            epoch,
            cmd: Rc::downgrade(cmd),
        });
    }

    pub(crate) fn cached_var(&self, frame_id: u64) -> Option<VarCell> {
        match &*self.0.rep.borrow() {
            Rep::Variable { frame_id: id, cell } if *id == frame_id => cell.upgrade(),
            _ => None,
        }
    }

    pub(crate) fn cache_var(&self, frame_id: u64, cell: &VarCell) {
        self.set_rep(Rep::Variable {
            frame_id,
            cell: Rc::downgrade(cell),
        });
    }
}

// ── Conversions ──────────────────────────────────────────────────────────────

impl Default for Value {
    fn default() -> Self {
        Value::empty()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::with_rep(Some(Rc::from(s)), Rep::None)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::with_rep(Some(Rc::from(s)), Rep::None)
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Value {
        Value::with_rep(Some(s), Rep::None)
    }
}

impl From<&Rc<str>> for Value {
    fn from(s: &Rc<str>) -> Value {
        Value::with_rep(Some(s.clone()), Rep::None)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::with_rep(None, Rep::Int(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Value {
        Value::from(i64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Value {
        Value::from(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Value {
        Value::with_rep(None, Rep::Double(x))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::from(i64::from(b))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::from_list(items)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:?})", &*self.as_str())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.as_str() == other.as_str()
    }
}

impl Eq for Value {}

impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        &*self.as_str() == other
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        &*self.as_str() == *other
    }
}

// ── Number parsing and formatting ────────────────────────────────────────────

fn trim_space(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_ascii_whitespace())
}

/// Parses decimal, `0x`, `0o` and `0b` integers with an optional sign.
/// Surrounding whitespace is allowed.
pub(crate) fn parse_int(s: &str) -> Option<i64> {
    let t = trim_space(s);
    let (neg, body) = match t.as_bytes().first()? {
        b'-' => (true, &t[1..]),
        b'+' => (false, &t[1..]),
        _ => (false, t),
    };
    let lower = |p: &str| {
        body.get(..2)
            .filter(|b| b.eq_ignore_ascii_case(p))
            .map(|_| &body[2..])
    };
    let (radix, digits) = if let Some(d) = lower("0x") {
        (16, d)
    } else if let Some(d) = lower("0o") {
        (8, d)
    } else if let Some(d) = lower("0b") {
        (2, d)
    } else {
        (10, body)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let mag = u64::from_str_radix(digits, radix).ok()?;
    if neg {
        if mag > 1 << 63 {
            return None;
        }
        Some(0i64.wrapping_sub(mag as i64))
    } else if radix == 10 {
        i64::try_from(mag).ok()
    } else {
        Some(mag as i64)
    }
}

/// Parses a floating-point number, including `Inf` and `NaN`.
pub(crate) fn parse_double(s: &str) -> Option<f64> {
    let t = trim_space(s);
    if t.is_empty() || t.contains('_') {
        return None;
    }
    t.parse::<f64>().ok()
}

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match trim_space(s).to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Formats a double the way scripts expect to read it back: integral values
/// keep a `.0`, very large or small magnitudes use `1e+20` notation.
pub fn format_double(x: f64) -> String {
    if x.is_nan() {
        return "NaN".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "Inf" } else { "-Inf" }.into();
    }
    let abs = x.abs();
    if abs != 0.0 && !(1e-5..1e16).contains(&abs) {
        let s = format!("{x:e}");
        let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exp.abs());
    }
    let s = format!("{x}");
    if s.contains('.') {
        s
    } else {
        format!("{s}.0")
    }
}

fn format_list(items: &[Value]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&parse::quote_element(&item.as_str(), i == 0));
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ints_generate_their_string() {
        let v = Value::from(42i64);
        assert!(!v.has_string());
        assert_eq!(v.to_string(), "42");
        assert!(v.has_string());
    }

    #[test]
    fn doubles_format_tcl_style() {
        assert_eq!(format_double(3.5), "3.5");
        assert_eq!(format_double(3.0), "3.0");
        assert_eq!(format_double(1e20), "1e+20");
        assert_eq!(format_double(1.5e-7), "1.5e-07");
        assert_eq!(format_double(f64::INFINITY), "Inf");
        assert_eq!(format_double(f64::NAN), "NaN");
    }

    #[test]
    fn parse_int_forms() {
        assert_eq!(parse_int("  12 "), Some(12));
        assert_eq!(parse_int("-0x1f"), Some(-31));
        assert_eq!(parse_int("0b101"), Some(5));
        assert_eq!(parse_int("0o17"), Some(15));
        assert_eq!(parse_int("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_int("9223372036854775808"), None);
        assert_eq!(parse_int("1.5"), None);
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("+"), None);
    }

    #[test]
    fn shimmering_keeps_the_string() {
        let v = Value::from("1 2 3");
        let other = v.clone();
        assert_eq!(v.list_len().unwrap(), 3);
        assert_eq!(v.type_name(), "list");
        assert_eq!(other.to_string(), "1 2 3");
        assert!(v.get_int().is_err());
        assert_eq!(v.type_name(), "list");
    }

    #[test]
    fn int_string_round_trip_through_rep() {
        let v = Value::from("0x10");
        assert_eq!(v.get_int().unwrap(), 16);
        assert_eq!(v.to_string(), "0x10");
    }

    #[test]
    fn list_mut_copies_shared_values() {
        let mut a = Value::from("x y");
        let b = a.clone();
        a.list_mut().unwrap().push(Value::from("z"));
        assert_eq!(a.to_string(), "x y z");
        assert_eq!(b.to_string(), "x y");
    }

    #[test]
    fn list_mut_in_place_when_unshared() {
        let mut a = Value::from_list(vec![Value::from("a b")]);
        let before = Rc::as_ptr(&a.0);
        a.list_mut().unwrap().push(Value::from(""));
        assert_eq!(Rc::as_ptr(&a.0), before);
        assert_eq!(a.to_string(), "{a b} {}");
    }

    #[test]
    fn invalidate_then_regenerate_matches() {
        let v = Value::from_list(vec![Value::from("a"), Value::from(1i64)]);
        let first = v.as_str();
        v.invalidate_string();
        assert!(!v.has_string());
        assert_eq!(v.as_str(), first);
    }

    #[test]
    fn dict_from_list_and_back() {
        let v = Value::from("a 1 b 2 a 3");
        let d = v.get_dict().unwrap();
        assert_eq!(d.len(), 2);
        assert_eq!(d.get("a").unwrap().to_string(), "3");
        assert_eq!(v.to_string(), "a 1 b 2 a 3");
        assert!(Value::from("a").get_dict().is_err());
    }

    #[test]
    fn list_after_dict_keeps_repeated_keys() {
        let v = Value::from("a 1 b 2 a 3");
        assert_eq!(v.get_dict().unwrap().len(), 2);
        assert_eq!(v.list_len().unwrap(), 6);
        assert_eq!(v.to_string(), "a 1 b 2 a 3");

        let mut d = Value::from("a 1 b 2 a 3");
        d.dict_mut().unwrap().set(Value::from("c"), Value::from("4"));
        let words: Vec<String> = d.get_list().unwrap().iter().map(|w| w.to_string()).collect();
        assert_eq!(words, ["a", "3", "b", "2", "c", "4"]);
    }

    #[test]
    fn bools() {
        assert!(Value::from("yes").get_bool().unwrap());
        assert!(!Value::from("Off").get_bool().unwrap());
        assert!(Value::from("2.5").get_bool().unwrap());
        assert!(Value::from("maybe").get_bool().is_err());
    }

    #[test]
    fn append_drops_native_form() {
        let mut v = Value::from(5i64);
        v.append_str("0");
        assert_eq!(v.type_name(), "string");
        assert_eq!(v.get_int().unwrap(), 50);
    }

    #[test]
    fn number_classification() {
        assert_eq!(Value::from("3").get_number(), Some(Number::Int(3)));
        assert_eq!(Value::from("3.0").get_number(), Some(Number::Double(3.0)));
        assert_eq!(Value::from("abc").get_number(), None);
    }
}
