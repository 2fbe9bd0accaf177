use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use gtfs_compactor::config::CompactConfig;
use gtfs_compactor::diagnostics::Diagnostics;
use gtfs_compactor::pipeline::{self, RunOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// GTFS feed, either a directory or a zip file.
    feed: PathBuf,

    /// Where to write the compact JSON document.
    output: PathBuf,

    /// JSON file overriding tolerances, limits and the route type vocabulary.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Always parse the feed instead of using the binary feed cache.
    #[arg(long)]
    no_cache: bool,

    /// Write indented JSON.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()?;

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => CompactConfig::from_path(path)?,
        None => CompactConfig::default(),
    };
    let options = RunOptions {
        feed_path: args.feed,
        output_path: args.output,
        config,
        use_cache: !args.no_cache,
        pretty: args.pretty,
    };

    let mut diagnostics = Diagnostics::new();
    let stats = pipeline::run(&options, &mut diagnostics)?;
    log::info!(
        "{} routes, {} trips, {} shapes, {} trip groups, {} dates",
        stats.routes,
        stats.trips,
        stats.shapes,
        stats.trip_groups,
        stats.dates
    );
    Ok(())
}
