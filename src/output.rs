use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    DashboardResult, FetchResult, HistoryResult, PlotResult, ProgressEvent, ProgressSink,
    RecordResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_fetch(results: &[FetchResult]) -> io::Result<()> {
        Self::print_json(&results)
    }

    pub fn print_history(result: &HistoryResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_record(result: &RecordResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_plot(result: &PlotResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_dashboard(result: &DashboardResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
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

/// Progress lines on stderr for interactive runs of batch commands.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let message = event.message.trim();
        let message = message
            .split_once(';')
            .filter(|(prefix, _)| prefix.starts_with("phase="))
            .map(|(prefix, rest)| format!("[{}] {}", &prefix["phase=".len()..], rest.trim()))
            .unwrap_or_else(|| message.to_string());
        match event.elapsed {
            Some(elapsed) => eprintln!("{message} ({:.1}s)", elapsed.as_secs_f64()),
            None => eprintln!("{message}"),
        }
    }
}
