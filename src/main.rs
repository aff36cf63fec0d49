use std::process;

use anyhow::Result;
use clap::Parser;

use debstrap::frontend::Frontend;
use debstrap::{cli, driver, init_logging, options_from_cli};

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let verbosity = args.verbosity();

    init_logging(verbosity).expect("failed to set global default tracing subscriber");

    // Everything created below the target gets predictable permissions.
    nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o022));

    let frontend = Frontend::new(verbosity);
    let opts = options_from_cli(&args);

    if let Err(e) = driver::run(&opts, &frontend) {
        frontend.error(&format!("{:#}", e));
        process::exit(1);
    }

    Ok(())
}
