// Output module - where job output is shown and stored

use std::time::Duration;

use crate::executor::channel::OutputChunk;
use crate::job::{Job, JobState};

pub mod errors;
pub mod json_output;
pub mod sink;
pub mod terminal;

pub use errors::{suggest_fix, PanelError};
pub use json_output::JsonOutput;
pub use sink::{OutputSink, SinkError};
pub use terminal::TerminalOutput;

/// Output format for the operator surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text output with colors
    #[default]
    Text,
    /// Machine-readable JSON output (NDJSON format)
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(()),
        }
    }
}

/// Where the supervisor forwards everything it has to show.
///
/// Calls arrive on the controller thread only.
pub trait OutputSurface {
    fn job_started(&mut self, job: &Job);
    fn chunk(&mut self, chunk: &OutputChunk);
    fn cancel_requested(&mut self);
    fn job_finished(&mut self, job: &Job, state: JobState, elapsed: Duration);
    fn notice(&mut self, error: &PanelError);
}

/// Unified output writer supporting both text and JSON formats
pub enum OutputWriter {
    Text(TerminalOutput),
    Json(JsonOutput),
}

impl OutputWriter {
    pub fn new(format: OutputFormat, verbose: bool, quiet: bool) -> Self {
        match format {
            OutputFormat::Text => OutputWriter::Text(TerminalOutput::new(verbose, quiet)),
            OutputFormat::Json => OutputWriter::Json(JsonOutput::new(verbose, quiet)),
        }
    }
}

impl OutputSurface for OutputWriter {
    fn job_started(&mut self, job: &Job) {
        match self {
            OutputWriter::Text(output) => output.print_job_header(job),
            OutputWriter::Json(output) => output.print_job_header(job),
        }
    }

    fn chunk(&mut self, chunk: &OutputChunk) {
        match self {
            OutputWriter::Text(output) => output.print_chunk(chunk),
            OutputWriter::Json(output) => output.print_chunk(chunk),
        }
    }

    fn cancel_requested(&mut self) {
        match self {
            OutputWriter::Text(output) => output.print_cancel_requested(),
            OutputWriter::Json(output) => output.print_cancel_requested(),
        }
    }

    fn job_finished(&mut self, job: &Job, state: JobState, elapsed: Duration) {
        match self {
            OutputWriter::Text(output) => output.print_job_footer(job, state, elapsed),
            OutputWriter::Json(output) => output.print_job_footer(job, state, elapsed),
        }
    }

    fn notice(&mut self, error: &PanelError) {
        match self {
            OutputWriter::Text(output) => output.print_notice(error),
            OutputWriter::Json(output) => output.print_notice(error),
        }
    }
}
