use anyhow::Result;
use clap::Parser;

mod completion;
mod dispatch;
mod render;


fn init_tracing(verbose: bool) {
    let default_directives = if verbose {
        "fieldpack=debug"
    } else {
        "fieldpack=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directives));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = dispatch::Cli::parse();
    init_tracing(cli.verbose);
    dispatch::run_cli(cli)
}
