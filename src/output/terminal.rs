// Coloured terminal rendering of job output

use std::io::IsTerminal;
use std::time::Duration;

use colored::*;

use crate::executor::channel::{ChunkKind, OutputChunk};
use crate::job::{Job, JobState};
use crate::output::errors::{suggest_fix, PanelError};

/// Terminal output manager
pub struct TerminalOutput {
    verbose: bool,
    quiet: bool,
}

impl TerminalOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        // Respect NO_COLOR (https://no-color.org/) and plain pipes
        if std::env::var("NO_COLOR").is_ok() || !std::io::stdout().is_terminal() {
            colored::control::set_override(false);
        }

        TerminalOutput { verbose, quiet }
    }

    /// Print the start marker of a job
    pub fn print_job_header(&self, job: &Job) {
        if self.quiet {
            return;
        }

        println!("{}", format_job_header(job));
        if self.verbose {
            for host in &job.hosts {
                println!("  {} {}", "->".dimmed(), host.cyan());
            }
        }
    }

    pub fn print_chunk(&self, chunk: &OutputChunk) {
        if self.quiet && !matches!(chunk.kind, ChunkKind::HostError | ChunkKind::RunnerFailed) {
            return;
        }
        print!("{}", format_chunk(chunk));

        if self.verbose && chunk.kind == ChunkKind::HostError {
            if let Some(hint) = suggest_fix(&chunk.text) {
                println!("{}: {}", "Hint".yellow().bold(), hint);
            }
        }
    }

    pub fn print_cancel_requested(&self) {
        if self.quiet {
            return;
        }
        println!("{}", "****** Attempting to stop the job ******".yellow());
    }

    /// Print the completion marker naming the terminal state
    pub fn print_job_footer(&self, job: &Job, state: JobState, elapsed: Duration) {
        if self.quiet && state == JobState::Completed {
            return;
        }

        println!("{}", format_job_footer(job, state));
        if self.verbose {
            println!("Total time: {:.2}s", elapsed.as_secs_f64());
        }
    }

    /// Errors and resource notices go to stderr
    pub fn print_notice(&self, error: &PanelError) {
        eprint!("{}", error);
    }
}

fn format_job_header(job: &Job) -> String {
    format!(
        "{} {} ({} hosts)",
        "****** Starting".green().bold(),
        job.kind.label().cyan(),
        job.hosts.len()
    )
}

fn format_job_footer(job: &Job, state: JobState) -> String {
    let status = match state {
        JobState::Completed => "Completed".green().bold(),
        JobState::Cancelled => "Cancelled".yellow().bold(),
        JobState::Failed => "Failed".red().bold(),
        JobState::Idle | JobState::Running => state.to_string().normal(),
    };
    format!("****** {} {} ******", job.kind.label(), status)
}

/// Render one chunk, always ending in a newline
pub(crate) fn format_chunk(chunk: &OutputChunk) -> String {
    let mut out = String::with_capacity(chunk.text.len() + 1);

    match chunk.kind {
        ChunkKind::HostOutput => out.push_str(&chunk.text),
        ChunkKind::HostError => {
            for line in chunk.text.lines() {
                if line.starts_with("ERROR:") {
                    out.push_str(&line.red().to_string());
                } else {
                    out.push_str(line);
                }
                out.push('\n');
            }
        }
        ChunkKind::Cancelled => out.push_str(&chunk.text.yellow().bold().to_string()),
        ChunkKind::RunnerFailed => out.push_str(&chunk.text.red().bold().to_string()),
    }

    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}
