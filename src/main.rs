//! Interactive flight labeling session on the terminal.

use std::io;
use std::path::PathBuf;

use flightlabel::active::ActiveLearner;
use flightlabel::config::{self, SessionConfig};
use flightlabel::logging;
use flightlabel::session::Session;
use tracing::info;

struct CliOptions {
    config: Option<PathBuf>,
    write_config: Option<PathBuf>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Some(path) = options.write_config {
        config::save_to_path(&SessionConfig::default(), &path).map_err(|err| err.to_string())?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    let config = match &options.config {
        Some(path) => config::load_from_path(path),
        None => config::load_or_default(),
    }
    .map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;

    let mut learner = ActiveLearner::from_config(&config).map_err(|err| err.to_string())?;
    if let Some(path) = config.validation_path() {
        if learner.load_validation(&path) {
            info!(path = %path.display(), "Validation enabled");
        }
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut session = Session::new(learner, stdin.lock(), stdout.lock());
    session.run().map_err(|err| err.to_string())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut config = None;
    let mut write_config = None;
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                config = Some(PathBuf::from(value));
            }
            "--write-config" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--write-config requires a value".to_string())?;
                write_config = Some(PathBuf::from(value));
            }
            other => return Err(format!("Unknown argument: {other}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(CliOptions {
        config,
        write_config,
    })
}

fn help_text() -> String {
    [
        "flightlabel",
        "",
        "Labels flight recordings interactively, asking about the flights the classifier",
        "is least sure of.",
        "",
        "Usage:",
        "  flightlabel [--config <file>]",
        "  flightlabel --write-config <file>",
        "",
        "Options:",
        "  --config <file>        Session config (default: <config dir>/.flightlabel/config.toml).",
        "  --write-config <file>  Write a default config to <file> and exit.",
    ]
    .join("\n")
}
