// Human-readable error messages for netpanel

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // Check NO_COLOR environment variable first (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Check if stderr is a TTY (errors are typically written to stderr)
    std::io::stderr().is_terminal()
}

/// All error types surfaced to the operator
#[derive(Debug)]
pub enum PanelError {
    /// Operator input rejected before a job is built
    Validation {
        field: &'static str,
        message: String,
    },

    /// A template, host list or output file could not be opened or written
    Resource {
        message: String,
        path: Option<PathBuf>,
    },

    /// A job is already running; only one may be active
    JobRunning,

    /// Runtime errors not scoped to one host
    Runtime {
        message: String,
        suggestion: Option<String>,
    },
}

impl PanelError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        PanelError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        PanelError::Resource {
            message: message.into(),
            path,
        }
    }
}

impl std::error::Error for PanelError {}

impl fmt::Display for PanelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Set color mode based on TTY detection and NO_COLOR
        if !should_use_colors() {
            colored::control::set_override(false);
        }

        match self {
            PanelError::Validation { field, message } => {
                writeln!(f, "{}: {}", "INVALID INPUT".red().bold(), message)?;
                writeln!(f, "  {} {}", "Field:".dimmed(), field)?;
                Ok(())
            }

            PanelError::Resource { message, path } => {
                writeln!(f, "{}: {}", "I/O ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }

            PanelError::JobRunning => {
                writeln!(
                    f,
                    "{}: a job is already running",
                    "BUSY".yellow().bold()
                )?;
                writeln!(f)?;
                writeln!(
                    f,
                    "{}: wait for it to finish or cancel it first",
                    "Hint".yellow().bold()
                )?;
                Ok(())
            }

            PanelError::Runtime {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "RUNTIME ERROR".red().bold(), message)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }
                Ok(())
            }
        }
    }
}

impl From<crate::template::TemplateError> for PanelError {
    fn from(err: crate::template::TemplateError) -> Self {
        use crate::template::TemplateError;

        match err {
            TemplateError::Io { path, source } => PanelError::resource(
                format!("Couldn't access template file: {}", source),
                Some(path),
            ),
            TemplateError::MultiLine { path, field } => PanelError::resource(
                format!("{} spans several lines and cannot be saved", field),
                Some(path),
            ),
        }
    }
}

impl From<crate::output::sink::SinkError> for PanelError {
    fn from(err: crate::output::sink::SinkError) -> Self {
        let path = err.path().to_path_buf();
        PanelError::resource(err.to_string(), Some(path))
    }
}

/// Suggest common fixes for host-level failures
pub fn suggest_fix(message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    if lower.contains("connection refused") {
        Some("Ensure the management service is listening on the configured port".to_string())
    } else if lower.contains("timed out") || lower.contains("timeout") {
        Some("Check network reachability or raise the connection timeout".to_string())
    } else if lower.contains("authentication") {
        Some("Verify the username and password".to_string())
    } else {
        None
    }
}
