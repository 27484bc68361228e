//! `hcwatch load`: bulk-load recorded JSONL files into the SQLite sink.

use std::path::Path;

use tracing::info;

use hcwatch_core::{EventFile, Exporter, SqlExporter, read_event_file, read_events};

use crate::cli::{GlobalOpts, LoadArgs};
use crate::error::CliError;

use super::ActiveProfile;

pub async fn handle(args: LoadArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let database = match args.database {
        Some(url) => url,
        None => ActiveProfile::load(global)?
            .profile
            .database
            .ok_or_else(|| CliError::Validation {
                field: "database".into(),
                reason: "pass --database or set `database` in the profile".into(),
            })?,
    };

    let files = collect(&args.path)?;
    let exporter = SqlExporter::connect(&database).await?;

    if args.clean {
        let removed = exporter.clear().await?;
        info!(removed, "cleared stored events");
    }

    let mut total = 0;
    for file in &files {
        exporter.bulk_export(&file.events).await?;
        info!(path = %file.path.display(), events = file.events.len(), "loaded file");
        total += file.events.len();
    }
    let stored = exporter.count().await?;
    exporter.close().await?;

    println!(
        "Loaded {total} events from {} file(s); {stored} events stored",
        files.len()
    );
    Ok(())
}

/// A single file, or every `*.jsonl` file in a directory.
pub(crate) fn collect(path: &Path) -> Result<Vec<EventFile>, CliError> {
    if path.is_dir() {
        return Ok(read_events(path)?);
    }
    Ok(vec![EventFile {
        path: path.to_path_buf(),
        events: read_event_file(path)?,
    }])
}
