//! count_sweep - one-shot people count over local cameras
//!
//! 1. Loads the detector once
//! 2. Visits each configured camera, counting people where the interval gate allows
//! 3. Writes all counts to the output file once, at exit

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use people_counter::{
    config::{parse_cameras, CounterConfig},
    sink,
    sweep::{AggregationMap, Sweep, SystemClock},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Count people on local cameras and write the counts to a file")]
struct Args {
    /// Config file (JSON, or TOML by extension). Overrides PEOPLE_COUNTER_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Camera indices, comma separated (e.g. 0,1,2).
    #[arg(long)]
    cameras: Option<String>,
    /// Minimum seconds between counted frames.
    #[arg(long)]
    interval: Option<u64>,
    /// Output JSON path.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Passes over the camera list, one interval apart. Later passes overwrite earlier counts.
    #[arg(long, default_value_t = 1)]
    passes: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => CounterConfig::load_from(Some(path))?,
        None => CounterConfig::load()?,
    };
    if let Some(cameras) = &args.cameras {
        config.sweep.cameras = parse_cameras(cameras)?;
    }
    if let Some(interval) = args.interval {
        config.sweep.interval = Duration::from_secs(interval);
    }
    if let Some(output) = args.output {
        config.sweep.output_path = output;
    }
    config.validate()?;

    let detector = config.detector.build()?;
    let mut source = config.source.build()?;
    let mut sweep = Sweep::new(config.sweep_config(), SystemClock);

    let mut counts = AggregationMap::default();
    let passes = args.passes.max(1);
    for pass in 0..passes {
        if pass > 0 && !config.sweep.interval.is_zero() {
            std::thread::sleep(config.sweep.interval);
        }
        log::debug!("sweep pass {} of {}", pass + 1, passes);
        let report = sweep.run(source.as_mut(), &detector);
        counts = counts.merge(report.counts);
    }

    let written = sink::write_counts(&config.sweep.output_path, &counts, config.sweep.count_format);
    detector.shutdown();
    written?;
    let counted: Vec<String> = counts.cameras().iter().map(|c| c.to_string()).collect();
    log::info!(
        "people counts for cameras [{}] saved to {}",
        counted.join(", "),
        config.sweep.output_path.display()
    );
    Ok(())
}
