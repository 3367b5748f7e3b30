//! Prints an ad repository with its targeting lists replaced by cuckoo
//! filters.

use std::path::PathBuf;

use clap::Parser;
use odp_filter_tools::{init_logging, make_filters, read_repository, DEFAULT_TARGET_FP_RATE};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "make-cuckoo-filter", version, about = "Replace ad targeting lists with cuckoo filters")]
struct Cli {
    /// Input JSON ad repository file
    src: PathBuf,
    /// Target false positive rate
    #[arg(default_value_t = DEFAULT_TARGET_FP_RATE)]
    target_fp_rate: f64,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut repository = read_repository(&cli.src)?;
    let built = make_filters(&mut repository, cli.target_fp_rate)?;
    info!(filters = built, rate = cli.target_fp_rate, "repository filtered");

    println!("{}", serde_json::to_string_pretty(&repository)?);
    Ok(())
}
