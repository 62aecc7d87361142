//! The scripting language: values, parsing, expressions and evaluation.
//!
//! # Quick start
//!
//! ```rust
//! use jim::script::{Interpreter, Value};
//!
//! let mut interp = Interpreter::new();
//! interp.set_var("name", Value::from("world")).unwrap();
//! let v = interp.eval_toplevel("string toupper \"hello $name\"").unwrap();
//! assert_eq!(v, "HELLO WORLD");
//! ```
//!
//! Host code extends the language with native commands:
//!
//! ```rust
//! use jim::script::{Interpreter, Value};
//!
//! let mut interp = Interpreter::new();
//! interp.register_command("double", |_, argv| {
//!     Ok(Value::from(argv[1].get_int()? * 2))
//! });
//! assert_eq!(interp.eval_toplevel("double 21").unwrap(), "42");
//! ```

mod builtins;
pub mod command;
pub mod dict;
pub mod error;
pub mod expr;
pub(crate) mod frame;
pub mod interp;
pub mod parse;
pub mod value;

// Re-exports for convenience.
pub use command::{Command, CommandKind, NativeCommand};
pub use dict::Dict;
pub use error::{Code, ErrorInfo, EvalResult, Exception, TraceFrame};
pub use expr::ExprError;
pub use interp::{signal_name, Interpreter, SignalHandle, VERSION};
pub use parse::{Missing, ParseError};
pub use value::Value;
