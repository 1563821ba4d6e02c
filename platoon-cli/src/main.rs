use clap::Parser;

use platoon_core::prelude::*;

/// Runner for receding-horizon platoon maneuver simulations.
/// After running `cargo build --release`, run with
/// ```bash
/// ./target/release/platoon-cli --scenario scenarios/yield_open_gap.yaml --out-dir output
/// ```.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct PlatoonApi {
    /// Path to scenario file (yaml or json)
    #[clap(long, short, value_parser)]
    scenario: String,
    /// Directory receiving the exported tables
    #[clap(long, short, value_parser, default_value = "output")]
    out_dir: String,
    /// Enable debug-level logging
    #[clap(long, short, action)]
    verbose: bool,
}

fn init_logger(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{:5}] {}", record.level(), message))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

pub fn main() -> anyhow::Result<()> {
    let api = PlatoonApi::parse();
    init_logger(api.verbose)?;

    let scenario = Scenario::from_file(&api.scenario)?;
    let tag = scenario.tag.clone();
    log::info!(
        "simulating scenario {} ({} vehicles, {} events)",
        api.scenario,
        scenario.n_veh,
        scenario.events.len()
    );

    let closed_loop = ClosedLoop::new(scenario)?;
    let results = closed_loop.run()?;

    let total_iterations: usize = results.iterations.iter().sum();
    export_tables(&results, &api.out_dir, &tag)?;
    log::info!(
        "{} steps simulated with {} solver iterations; tables written to {}",
        results.iterations.len(),
        total_iterations,
        api.out_dir
    );
    Ok(())
}
