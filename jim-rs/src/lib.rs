//! An embeddable interpreter for a Jim-style Tcl dialect.
//!
//! ```rust
//! use jim::script::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! let v = interp.eval_toplevel("proc sq {x} { expr {$x * $x} }; sq 7").unwrap();
//! assert_eq!(v, "49");
//! ```

pub mod cli;
pub mod config;
pub mod glob;
pub mod hash;
pub mod script;
pub mod shell;
