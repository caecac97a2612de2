//! Parses a record description and prints every class and def it defines.
//!
//! Usage: `recordkeeper [FILE] [-I DIR]...`
//!
//! Include directories given with `-I` are searched before those configured
//! in `recordkeeper.toml` / `RECORDKEEPER_INCLUDE_DIRS`.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use recordkeeper::session::Session;
use recordkeeper::settings::Settings;

struct Arguments {
    input: Option<PathBuf>,
    include_dirs: Vec<PathBuf>,
}

fn arguments() -> Result<Arguments, String> {
    let mut parsed = Arguments {
        input: None,
        include_dirs: Vec::new(),
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "-I" {
            let dir = args.next().ok_or("-I expects a directory")?;
            parsed.include_dirs.push(PathBuf::from(dir));
        } else if let Some(dir) = arg.strip_prefix("-I") {
            parsed.include_dirs.push(PathBuf::from(dir));
        } else if parsed.input.is_none() {
            parsed.input = Some(PathBuf::from(arg));
        } else {
            return Err(format!("unexpected argument '{}'", arg));
        }
    }
    Ok(parsed)
}

fn main() -> ExitCode {
    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let filter = EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let arguments = match arguments() {
        Ok(arguments) => arguments,
        Err(message) => {
            error!(%message, "invalid command line");
            return ExitCode::FAILURE;
        }
    };
    let Some(input) = arguments.input.or(settings.input) else {
        error!("no input file given");
        return ExitCode::FAILURE;
    };
    let source = match std::fs::read_to_string(&input) {
        Ok(source) => source,
        Err(e) => {
            error!(path = %input.display(), error = %e, "could not read input");
            return ExitCode::FAILURE;
        }
    };
    // the input's own directory is searched last
    let mut include_dirs = arguments.include_dirs;
    include_dirs.extend(settings.include_dirs);
    if let Some(parent) = input.parent() {
        include_dirs.push(parent.to_path_buf());
    }
    info!(path = %input.display(), includes = include_dirs.len(), "parsing");
    match Session::open_named(&input.display().to_string(), &source, include_dirs) {
        Ok(session) => {
            print!("{}", session.record_keeper());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
