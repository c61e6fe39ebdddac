use std::io::{self, Write};

use serde::Serialize;

use crate::app::{FetchResult, InfoResult, ListResult, ProgressEvent, ProgressSink};
use crate::toolkit::{ToolkitOutcome, ToolkitVersions};

/// Writes command results to stdout as pretty JSON. Also the silent progress sink.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch(result: &FetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_toolkit_versions(result: &ToolkitVersions) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_toolkit(result: &ToolkitOutcome) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to `tracing` so they show up with `RUST_LOG=info`.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}
