//! count_server - people detection HTTP service
//!
//! This daemon:
//! 1. Loads the detector once
//! 2. Serves POST /detect and GET /health
//! 3. Does NOT touch local cameras

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use people_counter::{api::ApiServer, config::CounterConfig, service::DetectionService};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve people detection over HTTP")]
struct Args {
    /// Config file (JSON, or TOML by extension). Overrides PEOPLE_COUNTER_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, e.g. 0.0.0.0:5000.
    #[arg(long)]
    addr: Option<String>,
    /// Connection worker threads.
    #[arg(long)]
    workers: Option<usize>,
    /// ONNX model path.
    #[arg(long)]
    model: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => CounterConfig::load_from(Some(path))?,
        None => CounterConfig::load()?,
    };
    if let Some(addr) = args.addr {
        config.api.addr = addr;
    }
    if let Some(workers) = args.workers {
        config.api.workers = workers;
    }
    if let Some(model) = args.model {
        config.detector.model_path = model;
    }
    config.validate()?;

    let detector = config.detector.build()?;
    let service = DetectionService::new(detector.clone())
        .with_person_class(config.detector.person_class)
        .with_jpeg_quality(config.api.jpeg_quality);
    let api_handle = ApiServer::new(config.api_config(), service).spawn()?;
    log::info!("count_server listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("count_server waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;
    detector.shutdown();

    Ok(())
}
