//! Host side of `jimsh`: the commands a shell adds to a bare interpreter
//! and the drivers for files, `-e` scripts and the interactive prompt.
//!
//! Everything writes through an [`Output`], so tests can capture what a
//! script prints without touching the terminal.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, info};

use crate::script::{EvalResult, Exception, Interpreter, Value};

// ── Output ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

/// Where `puts` and the drivers write.
#[derive(Debug, Clone)]
pub enum Output {
    Stdio,
    Capture(Rc<RefCell<Captured>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Output {
    /// A fresh in-memory sink.
    pub fn capture() -> Output {
        Output::Capture(Rc::default())
    }

    pub fn write(&self, stream: Stream, text: &str) {
        match self {
            Output::Stdio => {
                // A closed pipe is not an error worth reporting from puts.
                let _ = match stream {
                    Stream::Stdout => {
                        let mut out = io::stdout().lock();
                        out.write_all(text.as_bytes()).and_then(|_| out.flush())
                    }
                    Stream::Stderr => io::stderr().lock().write_all(text.as_bytes()),
                };
            }
            Output::Capture(buf) => {
                let mut buf = buf.borrow_mut();
                match stream {
                    Stream::Stdout => buf.stdout.push_str(text),
                    Stream::Stderr => buf.stderr.push_str(text),
                }
            }
        }
    }

    /// Captured stdout so far; empty for [`Output::Stdio`].
    pub fn stdout_text(&self) -> String {
        match self {
            Output::Stdio => String::new(),
            Output::Capture(buf) => buf.borrow().stdout.clone(),
        }
    }

    pub fn stderr_text(&self) -> String {
        match self {
            Output::Stdio => String::new(),
            Output::Capture(buf) => buf.borrow().stderr.clone(),
        }
    }
}

// ── Host commands ─────────────────────────────────────────────────────────────

/// Adds `puts` and `source` to `interp`.
pub fn register_host_commands(interp: &mut Interpreter, out: &Output) {
    let sink = out.clone();
    interp.register_command("puts", move |_, argv| cmd_puts(&sink, argv));
    interp.register_command("source", cmd_source);
}

fn puts_usage() -> Exception {
    Exception::error("wrong # args: should be \"puts ?-nonewline? ?channel? string\"")
}

fn cmd_puts(out: &Output, argv: &[Value]) -> EvalResult {
    let mut words = &argv[1..];
    let mut newline = true;
    if words.len() > 1 && words[0].as_str().as_ref() == "-nonewline" {
        newline = false;
        words = &words[1..];
    }
    let (stream, text) = match words {
        [text] => (Stream::Stdout, text),
        [channel, text] => {
            let stream = match channel.as_str().as_ref() {
                "stdout" => Stream::Stdout,
                "stderr" => Stream::Stderr,
                other => {
                    return Err(Exception::error(format!(
                        "can not find channel named \"{other}\""
                    )))
                }
            };
            (stream, text)
        }
        _ => return Err(puts_usage()),
    };
    let mut line = text.as_str().to_string();
    if newline {
        line.push('\n');
    }
    out.write(stream, &line);
    Ok(Value::empty())
}

fn cmd_source(interp: &mut Interpreter, argv: &[Value]) -> EvalResult {
    let [_, file] = argv else {
        return Err(Exception::error("wrong # args: should be \"source fileName\""));
    };
    source_file(interp, Path::new(&*file.as_str()))
}

/// Reads and evaluates a script file, recording its name for traces.
pub fn source_file(interp: &mut Interpreter, path: &Path) -> EvalResult {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Exception::error(format!("couldn't read file \"{}\": {e}", path.display()))
    })?;
    debug!(file = %path.display(), "sourcing");
    interp.eval_source(&text, &path.display().to_string())
}

// ── Drivers ───────────────────────────────────────────────────────────────────

/// Sets `argv0`, `argv`, `argc` and `tcl_interactive`.
pub fn set_globals(
    interp: &mut Interpreter,
    argv0: &str,
    args: &[String],
    interactive: bool,
) -> EvalResult<()> {
    let list: Vec<Value> = args.iter().map(|a| Value::from(a.as_str())).collect();
    interp.set_global_var("argv0", Value::from(argv0))?;
    interp.set_global_var("argv", Value::from_list(list))?;
    interp.set_global_var("argc", Value::from(args.len()))?;
    interp.set_global_var("tcl_interactive", Value::from(interactive))?;
    Ok(())
}

/// Process exit status for an outcome that reached the top level.
fn exit_status(interp: &Interpreter, out: &Output, result: &EvalResult) -> i32 {
    match result {
        Ok(_) => 0,
        Err(Exception::Exit(code)) => *code,
        Err(e) => {
            out.write(Stream::Stderr, &format!("{}\n", interp.format_error(e)));
            1
        }
    }
}

/// Runs a script file; returns the process exit status.
pub fn run_file(interp: &mut Interpreter, path: &Path, out: &Output) -> i32 {
    let result = source_file(interp, path);
    let result = interp.complete(result);
    exit_status(interp, out, &result)
}

/// Runs a `-e` script, printing a non-empty result.
pub fn run_eval(interp: &mut Interpreter, script: &str, out: &Output) -> i32 {
    let result = interp.eval_toplevel(script);
    if let Ok(v) = &result {
        if !v.is_empty() {
            out.write(Stream::Stdout, &format!("{v}\n"));
        }
    }
    exit_status(interp, out, &result)
}

/// The interactive loop.  Lines accumulate until they form a complete
/// script; prompts are shown only when `prompt` is set.
pub fn repl(interp: &mut Interpreter, input: impl BufRead, out: &Output, prompt: bool) -> i32 {
    let mut pending = String::new();
    let mut lines = input.lines();
    loop {
        if prompt {
            out.write(Stream::Stdout, if pending.is_empty() { ". " } else { "> " });
        }
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                out.write(Stream::Stderr, &format!("{e}\n"));
                return 1;
            }
            None => {
                if prompt {
                    out.write(Stream::Stdout, "\n");
                }
                return 0;
            }
        };
        pending.push_str(&line);
        pending.push('\n');
        if Interpreter::is_complete(&pending).is_err() {
            continue;
        }
        let script = std::mem::take(&mut pending);
        match interp.eval_toplevel(&script) {
            Ok(v) if v.is_empty() => {}
            Ok(v) => out.write(Stream::Stdout, &format!("{v}\n")),
            Err(Exception::Exit(code)) => {
                info!(code, "exit requested");
                return code;
            }
            Err(e) => out.write(Stream::Stdout, &format!("{}\n", interp.format_error(&e))),
        }
    }
}

/// True when both stdin and stdout are terminals.
pub fn is_interactive() -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(libc::STDIN_FILENO) != 0 && libc::isatty(libc::STDOUT_FILENO) != 0 }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> (Interpreter, Output) {
        let mut interp = Interpreter::new();
        let out = Output::capture();
        register_host_commands(&mut interp, &out);
        (interp, out)
    }

    #[test]
    fn puts_channels_and_nonewline() {
        let (mut interp, out) = shell();
        interp.eval_toplevel("puts a; puts -nonewline b; puts stderr c").unwrap();
        assert_eq!(out.stdout_text(), "a\nb");
        assert_eq!(out.stderr_text(), "c\n");
        assert!(interp.eval_toplevel("puts nowhere x").is_err());
        assert!(interp.eval_toplevel("puts").is_err());
    }

    #[test]
    fn repl_joins_incomplete_lines() {
        let (mut interp, out) = shell();
        let input = "proc f {} {\n  return 42\n}\nf\nset x {}\n";
        assert_eq!(repl(&mut interp, input.as_bytes(), &out, false), 0);
        assert_eq!(out.stdout_text(), "f\n42\n");
    }

    #[test]
    fn repl_reports_errors_and_stops_on_exit() {
        let (mut interp, out) = shell();
        let input = "nosuch\nexit 3\nputs unreachable\n";
        assert_eq!(repl(&mut interp, input.as_bytes(), &out, false), 3);
        let text = out.stdout_text();
        assert!(text.contains("invalid command name \"nosuch\""), "{text}");
        assert!(!text.contains("unreachable"));
    }

    #[test]
    fn prompts_when_interactive() {
        let (mut interp, out) = shell();
        repl(&mut interp, "if 1 {\n}\n".as_bytes(), &out, true);
        assert_eq!(out.stdout_text(), ". > . \n");
    }

    #[test]
    fn eval_prints_non_empty_results() {
        let (mut interp, out) = shell();
        assert_eq!(run_eval(&mut interp, "expr {6 * 7}", &out), 0);
        assert_eq!(run_eval(&mut interp, "set e {}", &out), 0);
        assert_eq!(run_eval(&mut interp, "error bad", &out), 1);
        assert_eq!(out.stdout_text(), "42\n");
        assert!(out.stderr_text().contains("bad"));
    }

    #[test]
    fn globals_for_scripts() {
        let mut interp = Interpreter::new();
        set_globals(&mut interp, "t.tcl", &["a".into(), "b c".into()], false).unwrap();
        assert_eq!(interp.eval_toplevel("list $argv0 $argc [lindex $argv 1]").unwrap(), "t.tcl 2 {b c}");
        assert_eq!(interp.get_global_var("tcl_interactive").unwrap(), "0");
    }
}
