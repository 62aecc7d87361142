//! Command-line argument parsing.
//!
//! Usage:
//!   jimsh [-q] [-e <script>] [<file> [<arg> ...]]
//!   jimsh -h | --help
//!   jimsh -v | --version

use std::path::PathBuf;

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// Skip the rc file (`-q`).
    pub quiet: bool,
    /// Script to evaluate instead of a file or the REPL (`-e <script>`).
    pub eval: Option<String>,
    /// Script file to run.
    pub file: Option<PathBuf>,
    /// Arguments after the file (or after `-e <script>`), exposed as `argv`.
    pub args: Vec<String>,
}

/// What the shell should do.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Run(CliArgs),
    Help,
    Version,
}

pub const USAGE: &str = "Usage: jimsh [-q] [-e <script>] [<file> [<arg> ...]]";

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()`.
pub fn parse_args() -> Result<Action, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or(&[]))
}

/// Parse a slice of argument strings, program name excluded.
pub fn parse_argv(argv: &[String]) -> Result<Action, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();
        match arg {
            "-h" | "--help" => return Ok(Action::Help),
            "-v" | "--version" => return Ok(Action::Version),
            "-q" => args.quiet = true,
            "-e" => {
                i += 1;
                let script = argv.get(i).ok_or("-e requires a script argument")?;
                args.eval = Some(script.clone());
                args.args = argv[i + 1..].to_vec();
                return Ok(Action::Run(args));
            }
            "--" => {
                i += 1;
                break;
            }
            _ if arg.starts_with('-') && arg != "-" => {
                return Err(format!("unknown option: {arg}"));
            }
            _ => break,
        }
        i += 1;
    }

    // First positional is the script; the rest belong to it.
    if let Some(file) = argv.get(i) {
        args.file = Some(PathBuf::from(file));
        args.args = argv[i + 1..].to_vec();
    }
    Ok(Action::Run(args))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    fn run(args: &[&str]) -> CliArgs {
        match parse_argv(&argv(args)).unwrap() {
            Action::Run(a) => a,
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn empty_args_start_the_repl() {
        assert_eq!(run(&[]), CliArgs::default());
    }

    #[test]
    fn file_and_its_arguments() {
        let a = run(&["script.tcl", "-x", "y"]);
        assert_eq!(a.file, Some(PathBuf::from("script.tcl")));
        assert_eq!(a.args, vec!["-x", "y"]);
    }

    #[test]
    fn quiet_flag() {
        let a = run(&["-q", "f.tcl"]);
        assert!(a.quiet);
        assert_eq!(a.file, Some(PathBuf::from("f.tcl")));
    }

    #[test]
    fn eval_takes_the_rest_as_arguments() {
        let a = run(&["-e", "puts hi", "a", "b"]);
        assert_eq!(a.eval.as_deref(), Some("puts hi"));
        assert_eq!(a.file, None);
        assert_eq!(a.args, vec!["a", "b"]);
    }

    #[test]
    fn double_dash_ends_options() {
        let a = run(&["--", "-q"]);
        assert!(!a.quiet);
        assert_eq!(a.file, Some(PathBuf::from("-q")));
    }

    #[test]
    fn help_and_version() {
        assert_eq!(parse_argv(&argv(&["--help"])).unwrap(), Action::Help);
        assert_eq!(parse_argv(&argv(&["-v"])).unwrap(), Action::Version);
    }

    #[test]
    fn bad_options() {
        assert!(parse_argv(&argv(&["-z"])).is_err());
        assert!(parse_argv(&argv(&["-e"])).is_err());
    }
}
