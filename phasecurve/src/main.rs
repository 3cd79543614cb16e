//! `phasecurve` - simulate, play and validate phase envelopes

use clap::Parser;

use phasecurve::cli::args::Cli;
use phasecurve::cli::commands;
use phasecurve::error::ExitCode;
use phasecurve::observability::init_logging;

fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format, cli.verbose, cli.color);
    }

    match commands::dispatch(cli) {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
