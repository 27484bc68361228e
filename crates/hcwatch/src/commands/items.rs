//! `hcwatch items`: print the item map of every recorded event.

use std::io::Write;

use serde_json::json;

use crate::cli::ItemsArgs;
use crate::error::CliError;

use super::load::collect;

pub fn handle(args: &ItemsArgs) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for path in &args.paths {
        for file in collect(path)? {
            for event in &file.events {
                if args
                    .appliance
                    .as_deref()
                    .is_some_and(|id| event.appliance_id() != Some(id))
                {
                    continue;
                }
                let items = event.items().map_err(|e| CliError::Api {
                    message: format!("{}: {e}", file.path.display()),
                })?;
                let line = json!({
                    "appliance_id": event.appliance_id(),
                    "event": event.kind().to_string(),
                    "timestamp": event.timestamp().to_rfc3339(),
                    "items": items,
                });
                writeln!(out, "{line}")?;
            }
        }
    }
    Ok(())
}
