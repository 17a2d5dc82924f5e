//! CLI entrypoint for trio-link.

#[path = "trio-link/cli.rs"]
mod cli;
#[path = "trio-link/completions.rs"]
mod completions;
#[path = "trio-link/ctl.rs"]
mod ctl;
#[path = "trio-link/prompt.rs"]
mod prompt;
#[path = "trio-link/style.rs"]
mod style;
#[path = "trio-link/ws.rs"]
mod ws;

use clap::error::ErrorKind;
use clap::Parser;

use cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    if let Err(err) = run() {
        let message = format_error_with_tip(&err);
        eprintln!("{}", style::error(format!("Error: {message}")));
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let raw_args: Vec<String> = std::env::args().collect();
    let cli = match Cli::try_parse_from(&raw_args) {
        Ok(cli) => cli,
        Err(err) => {
            if err.kind() == ErrorKind::InvalidSubcommand {
                if let Some(input) = raw_args.iter().skip(1).find(|arg| !arg.starts_with('-')) {
                    if let Some(suggestion) = suggest_subcommand(input) {
                        eprintln!("Did you mean: {suggestion}?");
                    }
                }
            }
            err.exit();
        }
    };
    init_logging(cli.verbose, cli.trace);
    match cli.command {
        Command::Completions { shell } => completions::run_completions(shell),
        Command::Ws { wsfile, action } => ws::run_workspace(&cli.target, &wsfile, action),
        command => ctl::run_controller(&cli.target, command),
    }
}

fn init_logging(verbose: bool, trace: bool) {
    let level = if trace {
        "trio_link=trace"
    } else if verbose {
        "trio_link=debug"
    } else {
        "trio_link=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn suggest_subcommand(input: &str) -> Option<&'static str> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let candidates = [
        "cmd",
        "ls",
        "top",
        "status",
        "ethercat",
        "show",
        "halt",
        "restart",
        "ws",
        "completions",
    ];
    let mut best = None;
    let mut best_score = usize::MAX;
    for candidate in candidates {
        let score = levenshtein(input, candidate);
        if score < best_score {
            best_score = score;
            best = Some(candidate);
        }
    }
    if best_score <= 2 {
        best
    } else {
        None
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b_chars.len() + 1];
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            current[j + 1] = (prev[j + 1] + 1).min(current[j] + 1).min(prev[j] + cost);
        }
        prev = current;
    }
    prev[b_chars.len()]
}

fn format_error_with_tip(err: &anyhow::Error) -> String {
    let message = format!("{err:#}");
    let tip = if message.contains("Motion Perfect") || message.contains("MPE") {
        Some("Tip: close Motion Perfect (or any other session on the command port) and retry.")
    } else if message.contains("no controller given") {
        Some("Tip: pass --ip <host>, set TRIO_LINK_IP, or add [controllers.<name>] to trio.toml.")
    } else if message.contains("invalid config") {
        Some("Tip: check trio.toml; durations are in milliseconds under [session].")
    } else if message.contains("no response to") {
        Some("Tip: a program may be printing on the command channel; try `trio-link halt`.")
    } else if message.contains("invalid workspace manifest") {
        Some("Tip: create a manifest with `trio-link ws <file> create`.")
    } else {
        None
    };
    match tip {
        Some(tip) => format!("{message}\n{tip}"),
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_close_subcommands() {
        assert_eq!(suggest_subcommand("restar"), Some("restart"));
        assert_eq!(suggest_subcommand("stauts"), Some("status"));
        assert_eq!(suggest_subcommand("deploy"), None);
    }

    #[test]
    fn tips_follow_error_kind() {
        let err = anyhow::anyhow!("could not connect to 10.0.0.1:23: Motion Perfect probably open");
        assert!(format_error_with_tip(&err).contains("close Motion Perfect"));
        let err = anyhow::anyhow!("something else");
        assert_eq!(format_error_with_tip(&err), "something else");
    }
}
