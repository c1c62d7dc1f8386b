//! Main entry point for the imx-mkimage CLI tool

use clap::Parser;
use colored::Colorize;
use imx_mkimage::cli::{Args, run_cli};

fn main() {
    let args = Args::parse();

    let level = if args.quiet {
        "error"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    if let Err(e) = run_cli(args) {
        eprintln!("{} {:#}", "error:".red(), e);
        std::process::exit(1);
    }
}
