use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use tikv_jemallocator::Jemalloc;

use tilefuse::Opts;
use tilefuse::cli::SubCommandExtend;
use tilefuse::config::SubCommand;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Extract(config) => config.run(&opts).await,
        SubCommand::Thumb(config) => config.run(&opts).await,
        SubCommand::Export(config) => config.run(&opts).await,
    }
}
