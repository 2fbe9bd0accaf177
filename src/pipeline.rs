use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::assemble::{self, OutputStats};
use crate::config::CompactConfig;
use crate::diagnostics::Diagnostics;
use crate::feed::FeedTables;
use crate::link::{drop_empty_routes, link_schedule};
use crate::prepare_feed;
use crate::shape;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub feed_path: PathBuf,
    pub output_path: PathBuf,
    pub config: CompactConfig,
    pub use_cache: bool,
    pub pretty: bool,
}

/// Turns parsed feed tables into the compact document.
pub fn compact_feed(
    tables: &FeedTables,
    config: &CompactConfig,
    generated_at: DateTime<Utc>,
    diagnostics: &mut Diagnostics,
) -> Result<(Value, OutputStats)> {
    log::info!("Linking schedule.");
    let mut schedule = link_schedule(tables, config, diagnostics);
    log::info!("Resolving shapes of {} routes.", schedule.routes.len());
    shape::resolve_shapes(&mut schedule, config, diagnostics)?;
    drop_empty_routes(&mut schedule, diagnostics);
    log::info!("Assembling document.");
    assemble::assemble(
        &schedule,
        tables.modification_time,
        generated_at.timestamp(),
        diagnostics,
    )
}

/// Loads the feed, compacts it and writes the document. Nothing is written if any step fails.
pub fn run(options: &RunOptions, diagnostics: &mut Diagnostics) -> Result<OutputStats> {
    let tables = prepare_feed::load_feed(&options.feed_path, options.use_cache, diagnostics)?;
    let (document, stats) = compact_feed(&tables, &options.config, Utc::now(), diagnostics)?;
    write_document(&document, &options.output_path, options.pretty)?;
    log::info!(
        "Wrote {:?} with {} errors and {} warnings in the data.",
        options.output_path,
        diagnostics.count(log::Level::Error),
        diagnostics.count(log::Level::Warn)
    );
    Ok(stats)
}

/// Serializes next to the output first and renames afterwards, so a failed run leaves no partial
/// document behind.
pub fn write_document(document: &Value, output_path: &Path, pretty: bool) -> Result<()> {
    let mut temporary = output_path.as_os_str().to_owned();
    temporary.push(".tmp");
    let temporary = PathBuf::from(temporary);

    let text = if pretty {
        serde_json::to_string_pretty(document)?
    } else {
        serde_json::to_string(document)?
    };
    let mut file = std::fs::File::create(&temporary)
        .with_context(|| format!("creating {:?}", temporary))?;
    file.write_all(text.as_bytes())?;
    file.sync_all()?;
    std::fs::rename(&temporary, output_path)
        .with_context(|| format!("renaming {:?} to {:?}", temporary, output_path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_document() {
        let dir = std::env::temp_dir().join(format!("gtfs-compactor-write-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let output = dir.join("out.json");
        write_document(&json!([1, [2, "x"]]), &output, false).unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), r#"[1,[2,"x"]]"#);
        assert!(!dir.join("out.json.tmp").exists());

        write_document(&json!([1]), &output, true).unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "[\n  1\n]");
    }
}
