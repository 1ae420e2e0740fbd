// Operation kinds and their argument builders

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::form::JobForm;
use crate::output::errors::PanelError;

/// `hh:mm[:ss]`
static AT_TIME_CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-2]\d)(:[0-5]\d){1,2}$").expect("valid at-time regex"));

/// `yyyy-mm-dd hh:mm[:ss]`
static AT_TIME_DATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-[01]\d-[0-3]\d [0-2]\d:[0-5]\d(:[0-5]\d)?$").expect("valid at-time regex")
});

/// The supported remote operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    RunCommands,
    DeviceInfo,
    HealthCheck,
    InterfaceErrors,
    DiffConfig,
    CommitSet,
    FileTransfer,
    ShellCommand,
    ShowCompare,
}

impl OperationKind {
    /// Stable identifier used on the command line and by external tools
    pub fn slug(&self) -> &'static str {
        match self {
            OperationKind::RunCommands => "run-commands",
            OperationKind::DeviceInfo => "device-info",
            OperationKind::HealthCheck => "health-check",
            OperationKind::InterfaceErrors => "interface-errors",
            OperationKind::DiffConfig => "diff-config",
            OperationKind::CommitSet => "commit-set",
            OperationKind::FileTransfer => "file-transfer",
            OperationKind::ShellCommand => "shell-command",
            OperationKind::ShowCompare => "show-compare",
        }
    }

    /// Menu label, also the value persisted in template files
    pub fn label(&self) -> &'static str {
        operation_spec(*self).label
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        OPERATIONS
            .iter()
            .find(|spec| spec.kind.slug() == s || spec.label.eq_ignore_ascii_case(s))
            .map(|spec| spec.kind)
            .ok_or_else(|| format!("unknown operation '{}'", s))
    }
}

/// Reply format requested for operational commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyFormat {
    #[default]
    Text,
    Xml,
}

impl ReplyFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyFormat::Text => "text",
            ReplyFormat::Xml => "xml",
        }
    }
}

/// How a configuration diff is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffMode {
    #[default]
    Set,
    Stanza,
}

impl DiffMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffMode::Set => "set",
            DiffMode::Stanza => "stanza",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DiffMode::Set => "Set",
            DiffMode::Stanza => "Stanza",
        }
    }
}

impl FromStr for DiffMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "set" => Ok(DiffMode::Set),
            "stanza" => Ok(DiffMode::Stanza),
            other => Err(format!("unknown diff mode '{}'", other)),
        }
    }
}

/// File transfer direction relative to the operator's machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    #[default]
    Push,
    Pull,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Push => "push",
            TransferDirection::Pull => "pull",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransferDirection::Push => "Push",
            TransferDirection::Pull => "Pull",
        }
    }
}

impl FromStr for TransferDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "push" => Ok(TransferDirection::Push),
            "pull" => Ok(TransferDirection::Pull),
            other => Err(format!("unknown transfer direction '{}'", other)),
        }
    }
}

/// Argument bundle handed to the operation, shaped by the operation kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationArgs {
    RunCommands {
        commands: String,
        format: ReplyFormat,
        xpath: bool,
    },
    /// device-info, health-check and interface-errors take nothing
    Empty,
    DiffConfig {
        target: String,
        mode: DiffMode,
    },
    CommitSet {
        commands: String,
        check_only: bool,
        synchronize: bool,
        comment: Option<String>,
        /// Rollback window in seconds
        confirmed: Option<u32>,
        at_time: Option<String>,
        blank: bool,
    },
    FileTransfer {
        source: String,
        destination: String,
        direction: TransferDirection,
        multi: bool,
    },
    ShellCommand {
        command: String,
    },
    ShowCompare {
        commands: String,
    },
}

type ArgBuilder = fn(&JobForm, &[String]) -> Result<OperationArgs, PanelError>;

/// One row of the dispatch table: kind, menu label and argument builder
pub struct OperationSpec {
    pub kind: OperationKind,
    pub label: &'static str,
    /// Whether the first-argument field must be filled in
    pub needs_input: bool,
    pub build: ArgBuilder,
}

/// Every operation, in menu order
pub static OPERATIONS: [OperationSpec; 9] = [
    OperationSpec {
        kind: OperationKind::DiffConfig,
        label: "Diff Config",
        needs_input: true,
        build: build_diff_config,
    },
    OperationSpec {
        kind: OperationKind::RunCommands,
        label: "Operational Command(s)",
        needs_input: true,
        build: build_run_commands,
    },
    OperationSpec {
        kind: OperationKind::FileTransfer,
        label: "SCP Files",
        needs_input: true,
        build: build_file_transfer,
    },
    OperationSpec {
        kind: OperationKind::CommitSet,
        label: "Set Command(s)",
        needs_input: true,
        build: build_commit_set,
    },
    OperationSpec {
        kind: OperationKind::ShellCommand,
        label: "Shell Command(s)",
        needs_input: true,
        build: build_shell_command,
    },
    OperationSpec {
        kind: OperationKind::ShowCompare,
        label: "Show | Compare",
        needs_input: true,
        build: build_show_compare,
    },
    OperationSpec {
        kind: OperationKind::DeviceInfo,
        label: "Device Info",
        needs_input: false,
        build: build_empty,
    },
    OperationSpec {
        kind: OperationKind::HealthCheck,
        label: "Health Check",
        needs_input: false,
        build: build_empty,
    },
    OperationSpec {
        kind: OperationKind::InterfaceErrors,
        label: "Interface Errors",
        needs_input: false,
        build: build_empty,
    },
];

/// Look up the table row for a kind
pub fn operation_spec(kind: OperationKind) -> &'static OperationSpec {
    OPERATIONS
        .iter()
        .find(|spec| spec.kind == kind)
        .unwrap_or_else(|| unreachable!("every kind has a row in OPERATIONS"))
}

fn build_empty(_form: &JobForm, _hosts: &[String]) -> Result<OperationArgs, PanelError> {
    Ok(OperationArgs::Empty)
}

fn build_run_commands(form: &JobForm, _hosts: &[String]) -> Result<OperationArgs, PanelError> {
    Ok(OperationArgs::RunCommands {
        commands: form.first_argument.trim().to_string(),
        format: if form.xml_format {
            ReplyFormat::Xml
        } else {
            ReplyFormat::Text
        },
        xpath: false,
    })
}

fn build_diff_config(form: &JobForm, _hosts: &[String]) -> Result<OperationArgs, PanelError> {
    Ok(OperationArgs::DiffConfig {
        target: form.first_argument.trim().to_string(),
        mode: form.diff_mode,
    })
}

fn build_file_transfer(form: &JobForm, hosts: &[String]) -> Result<OperationArgs, PanelError> {
    let destination = form.transfer_destination.trim();
    if destination.is_empty() {
        return Err(PanelError::validation(
            "SCPDest",
            "A file transfer needs both a source and a destination.",
        ));
    }

    Ok(OperationArgs::FileTransfer {
        source: form.first_argument.trim().to_string(),
        destination: destination.to_string(),
        direction: form.transfer_direction,
        multi: hosts.len() > 1,
    })
}

fn build_shell_command(form: &JobForm, _hosts: &[String]) -> Result<OperationArgs, PanelError> {
    Ok(OperationArgs::ShellCommand {
        command: form.first_argument.trim().to_string(),
    })
}

fn build_show_compare(form: &JobForm, _hosts: &[String]) -> Result<OperationArgs, PanelError> {
    Ok(OperationArgs::ShowCompare {
        commands: form.first_argument.trim().to_string(),
    })
}

fn build_commit_set(form: &JobForm, _hosts: &[String]) -> Result<OperationArgs, PanelError> {
    let flags = &form.commit;

    let at_time = if flags.at {
        let value = form.commit_at_time.trim();
        if !is_valid_at_time(value) {
            return Err(PanelError::validation(
                "CommitAtTime",
                "The time value for commit at was not valid. It must be one of two formats \
                 (seconds are optional): 'hh:mm[:ss]' or 'yyyy-mm-dd hh:mm[:ss]'",
            ));
        }
        Some(value.to_string())
    } else {
        None
    };

    let comment = if flags.comment {
        let value = form.commit_comment.as_str();
        if value.is_empty() || value.contains('"') {
            return Err(PanelError::validation(
                "CommitCommentValue",
                "If commenting on the commit, you must specify a string, and it cannot \
                 contain double-quotes (\").",
            ));
        }
        Some(value.to_string())
    } else {
        None
    };

    let confirmed = if flags.confirmed {
        Some(confirmed_seconds(&form.commit_confirmed_minutes)?)
    } else {
        None
    };

    Ok(OperationArgs::CommitSet {
        commands: form.first_argument.trim().to_string(),
        check_only: flags.check,
        synchronize: flags.synchronize,
        comment,
        confirmed,
        at_time,
        blank: flags.blank,
    })
}

/// Convert the confirmed-minutes field into the rollback window in seconds
fn confirmed_seconds(minutes: &str) -> Result<u32, PanelError> {
    let invalid = || {
        PanelError::validation(
            "CommitConfirmedMin",
            "A Commit Confirmed value must be an integer between 1 and 60 minutes.",
        )
    };

    let minutes: u32 = minutes.trim().parse().map_err(|_| invalid())?;
    if !(1..=60).contains(&minutes) {
        return Err(invalid());
    }
    Ok(minutes * 60)
}

/// Accepts `hh:mm[:ss]` or `yyyy-mm-dd hh:mm[:ss]` naming a real time of day
pub fn is_valid_at_time(value: &str) -> bool {
    if AT_TIME_CLOCK.is_match(value) {
        return NaiveTime::parse_from_str(value, "%H:%M:%S").is_ok()
            || NaiveTime::parse_from_str(value, "%H:%M").is_ok();
    }
    if AT_TIME_DATED.is_match(value) {
        return NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").is_ok()
            || NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").is_ok();
    }
    false
}
