//! Script files run through the shell drivers, with `puts` captured.

use std::io::Write;
use std::path::Path;

use jim::script::Interpreter;
use jim::shell::{self, Output};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path
}

fn shell_with(args: &[&str]) -> (Interpreter, Output) {
    let mut interp = Interpreter::new();
    let out = Output::capture();
    shell::register_host_commands(&mut interp, &out);
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    shell::set_globals(&mut interp, "test.tcl", &args, false).unwrap();
    (interp, out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn runs_a_file_and_captures_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(
        dir.path(),
        "hello.tcl",
        "foreach a $argv { puts \"arg: $a\" }\nputs -nonewline [format %03d $argc]\n",
    );
    let (mut interp, out) = shell_with(&["x", "y z"]);
    assert_eq!(shell::run_file(&mut interp, &path, &out), 0);
    assert_eq!(out.stdout_text(), "arg: x\narg: y z\n002");
}

#[test]
fn uncaught_error_exits_one_with_location() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(dir.path(), "fail.tcl", "proc f {} {\n  error kaput\n}\nf\n");
    let (mut interp, out) = shell_with(&[]);
    assert_eq!(shell::run_file(&mut interp, &path, &out), 1);
    let err = out.stderr_text();
    assert!(err.contains("fail.tcl:2: kaput"), "{err}");
    assert!(err.contains("in procedure 'f'"), "{err}");
}

#[test]
fn exit_code_is_returned() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(dir.path(), "exit.tcl", "puts before\nexit 7\nputs after\n");
    let (mut interp, out) = shell_with(&[]);
    assert_eq!(shell::run_file(&mut interp, &path, &out), 7);
    assert_eq!(out.stdout_text(), "before\n");
}

#[test]
fn source_records_the_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let lib = write_script(dir.path(), "lib.tcl", "proc where {} { info script }\nset libfile [info script]\n");
    let main = write_script(
        dir.path(),
        "main.tcl",
        &format!("source {{{}}}\nputs [file tail $libfile]\n", lib.display()),
    );
    let (mut interp, out) = shell_with(&[]);
    // `file` is not a core command; give the script a minimal one.
    interp.register_command("file", |_, argv| {
        let path = argv[2].as_str();
        Ok(Path::new(&*path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
            .into())
    });
    assert_eq!(shell::run_file(&mut interp, &main, &out), 0, "{}", out.stderr_text());
    assert_eq!(out.stdout_text(), "lib.tcl\n");
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (mut interp, out) = shell_with(&[]);
    let status = shell::run_file(&mut interp, &dir.path().join("absent.tcl"), &out);
    assert_eq!(status, 1);
    assert!(out.stderr_text().contains("couldn't read file"));
}

#[test]
fn repl_session() {
    let (mut interp, out) = shell_with(&[]);
    let session = "set total 0\nforeach n {1 2 3} {\n  incr total $n\n}\nputs $total\nset total\n";
    assert_eq!(shell::repl(&mut interp, session.as_bytes(), &out, false), 0);
    assert_eq!(out.stdout_text(), "0\n6\n6\n");
}
