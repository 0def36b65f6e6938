use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sasat::config::DEFAULT_UD_FILE;
use sasat::control::{CommandClient, Request};
use sasat::telemetry::LogSections;

/// Command tool for a running SASAT translator.
///
/// Several options may be combined; each sends its own request, in the
/// order policy update, log dump, event trace.
#[derive(Parser)]
#[command(name = "sasat")]
#[command(about = "Send commands to a running SASAT translator")]
struct Cli {
    /// Reload the policy file (front translator only)
    #[arg(short = 'p')]
    policy: bool,

    /// Write a log dump; repeatable
    #[arg(short = 'l', value_name = "SECTION", value_parser = ["all", "stat", "mlog", "elog", "cl", "pol", "svr"])]
    log: Vec<String>,

    /// Event trace off (0) or on (1)
    #[arg(short = 't', value_name = "0|1", value_parser = clap::value_parser!(u8).range(0..=1))]
    trace: Option<u8>,

    /// Command socket of the translator
    #[arg(long, default_value = DEFAULT_UD_FILE)]
    socket: PathBuf,
}

fn send(cli: &Cli, req: Request) -> bool {
    let client = match CommandClient::new(&cli.socket) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            return false;
        }
    };
    match client.send(req) {
        Ok(resp) if resp.is_ok() => {
            eprintln!("sasat command complete");
            true
        }
        Ok(resp) => {
            eprintln!(
                "error reported from translator, reason code = {}",
                resp.reason
            );
            false
        }
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            false
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let sections = cli
        .log
        .iter()
        .fold(LogSections::empty(), |acc, name| acc | LogSections::from_cli_name(name));

    if !cli.policy && cli.log.is_empty() && cli.trace.is_none() {
        eprintln!("nothing to do, see sasat --help");
        return ExitCode::FAILURE;
    }

    if cli.policy {
        eprintln!("Update policy command");
        if !send(&cli, Request::reload()) {
            return ExitCode::FAILURE;
        }
    }
    if !sections.is_empty() {
        eprintln!("Log command");
        if !send(&cli, Request::dump(sections.bits())) {
            return ExitCode::FAILURE;
        }
    }
    if let Some(on) = cli.trace {
        eprintln!("Event trace command");
        if !send(&cli, Request::trace(on == 1)) {
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
