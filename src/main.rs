//! # Application Entry Point
//!
//! Parses the command line, configures the thread pool and logging, and
//! runs the selected conversion. Any diagnosed error prints a single
//! message to stderr and exits with a non-zero status.

use std::time::Instant;

use bref4::config::Config;
use bref4::error::Bref4Error;
use bref4::pipelines::convert;
use bref4::Result;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args[0].eq_ignore_ascii_case("help") {
        println!("{}", Config::usage());
        return;
    }
    if let Err(e) = run(&args) {
        match e {
            Bref4Error::Arguments { message } => {
                eprintln!("Error: {}\n\n{}", message, Config::usage());
            }
            other => eprintln!("Error: {}", other),
        }
        std::process::exit(1);
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: &[String]) -> Result<()> {
    let start = Instant::now();
    let config = Config::from_args(args)?;
    init_logging();

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.nthreads)
        .build_global()
        .ok();

    convert::run(&config)?;
    tracing::info!(elapsed_s = start.elapsed().as_secs_f64(), "finished");
    Ok(())
}
