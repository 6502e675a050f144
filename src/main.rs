use std::path::PathBuf;

use gm_tui::app::RunOptions;

const USAGE: &str = "GM-TUI: keyboard-driven terminal client for the gmweb bookmark server.

  --version, -V        Show version and exit
  --help,    -h        Show this help message
  --config <FILE>      Read configuration from FILE
  --server <URL>       Server base URL (overrides config)
  --repo <NAME>        Repository to open (overrides config)
  --check              Verify the server connection and exit
  --demo               Run against in-memory sample data";

enum Cli {
    Exit(i32),
    Run { opts: RunOptions, check: bool },
}

fn main() {
    let (opts, check) = match parse_args(std::env::args().skip(1)) {
        Cli::Exit(code) => std::process::exit(code),
        Cli::Run { opts, check } => (opts, check),
    };

    let result = if check {
        gm_tui::app::check(opts)
    } else {
        gm_tui::run(opts)
    };
    if let Err(err) = result {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Cli {
    let mut opts = RunOptions::default();
    let mut check = false;
    let mut args = args;

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        match flag.as_str() {
            "--version" | "-V" => {
                println!("GM-TUI {}", gm_tui::VERSION);
                return Cli::Exit(0);
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Cli::Exit(0);
            }
            "--check" => check = true,
            "--demo" => opts.demo = true,
            "--config" | "--server" | "--repo" => {
                let Some(value) = inline.or_else(|| args.next()) else {
                    eprintln!("error: {flag} needs a value\n\n{USAGE}");
                    return Cli::Exit(2);
                };
                match flag.as_str() {
                    "--config" => opts.config_file = Some(PathBuf::from(value)),
                    "--server" => opts.server = Some(value),
                    _ => opts.repo = Some(value),
                }
            }
            other => {
                eprintln!("error: unknown argument {other}\n\n{USAGE}");
                return Cli::Exit(2);
            }
        }
    }
    Cli::Run { opts, check }
}
