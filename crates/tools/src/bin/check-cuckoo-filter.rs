//! Verifies a repository produced by `make-cuckoo-filter` against its source.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use odp_filter_tools::{check_filters, check_rate, init_logging, read_repository, DEFAULT_TARGET_FP_RATE};
use rand::{rngs::StdRng, SeedableRng};

#[derive(Debug, Parser)]
#[command(name = "check-cuckoo-filter", version, about = "Check cuckoo filters against their source lists")]
struct Cli {
    /// Input JSON ad repository file
    src: PathBuf,
    /// Repository output by make-cuckoo-filter
    filtered: PathBuf,
    /// Target false positive rate used when making the filters
    #[arg(default_value_t = DEFAULT_TARGET_FP_RATE)]
    target_fp_rate: f64,
    /// Seed for the false positive probes
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let rate = check_rate(cli.target_fp_rate)?;
    let source = read_repository(&cli.src)?;
    let filtered = read_repository(&cli.filtered)?;
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let reports = check_filters(&source, &filtered, rate, &mut rng)
        .with_context(|| format!("checking {}", cli.filtered.display()))?;
    for report in &reports {
        println!(
            "row {} {}: false negative check OK ({} values). False positive check OK. measured FP rate: {}, target FP rate: {}",
            report.row, report.field, report.values, report.measured_fp_rate, rate
        );
    }
    println!("Correctness check done! Constructed cuckoo filters are correct.");
    Ok(())
}
