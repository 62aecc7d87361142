use std::io;

use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use jim::cli::{self, Action};
use jim::config::ShellConfig;
use jim::script::{Interpreter, VERSION};
use jim::shell::{self, Output};

fn main() {
    let (config, config_errors) = ShellConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
    for e in &config_errors {
        warn!("{e}");
    }

    let args = match cli::parse_args() {
        Ok(Action::Run(args)) => args,
        Ok(Action::Help) => {
            println!("{}", cli::USAGE);
            return;
        }
        Ok(Action::Version) => {
            println!("{VERSION}");
            return;
        }
        Err(e) => {
            eprintln!("jimsh: {e}");
            eprintln!("{}", cli::USAGE);
            std::process::exit(1);
        }
    };

    let mut interp = Interpreter::with_limits(config.limits.clone());
    let out = Output::Stdio;
    shell::register_host_commands(&mut interp, &out);

    let interactive = args.file.is_none() && args.eval.is_none() && shell::is_interactive();
    let argv0 = match &args.file {
        Some(path) => path.display().to_string(),
        None => std::env::args().next().unwrap_or_else(|| "jimsh".into()),
    };
    if let Err(e) = shell::set_globals(&mut interp, &argv0, &args.args, interactive) {
        eprintln!("jimsh: {}", interp.format_error(&e));
        std::process::exit(1);
    }

    let status = if let Some(script) = &args.eval {
        shell::run_eval(&mut interp, script, &out)
    } else if let Some(path) = &args.file {
        shell::run_file(&mut interp, path, &out)
    } else {
        if !args.quiet {
            if let Some(rc) = config.rc_file.as_ref().filter(|p| p.exists()) {
                debug!(rc = %rc.display(), "loading rc file");
                let result = shell::source_file(&mut interp, rc);
                if let Err(e) = interp.complete(result) {
                    eprintln!("{}", interp.format_error(&e));
                }
            }
        }
        if interactive {
            println!("Welcome to Jim version {VERSION}");
        }
        shell::repl(&mut interp, io::stdin().lock(), &out, interactive)
    };
    drop(interp);
    std::process::exit(status);
}
