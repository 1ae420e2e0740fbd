// Operator form - raw field values and their validation into a Job

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::hosts::parse_hosts;
use super::kind::{operation_spec, DiffMode, OperationKind, TransferDirection};
use super::{Credentials, Job, NetworkParams, SinkMode};
use crate::output::errors::PanelError;

/// Choice between one output file and one file per host.
///
/// Persisted by key (`s`/`m`), shown by label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteStyle {
    #[default]
    Single,
    Multiple,
}

impl WriteStyle {
    pub fn key(&self) -> &'static str {
        match self {
            WriteStyle::Single => "s",
            WriteStyle::Multiple => "m",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim() {
            "s" => Some(WriteStyle::Single),
            "m" => Some(WriteStyle::Multiple),
            _ => None,
        }
    }
}

impl FromStr for WriteStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WriteStyle::from_key(s)
            .or_else(|| match s.trim().to_lowercase().as_str() {
                "single" | "single file" => Some(WriteStyle::Single),
                "multiple" | "multiple files" | "per-host" => Some(WriteStyle::Multiple),
                _ => None,
            })
            .ok_or_else(|| format!("unknown write style '{}'", s))
    }
}

/// Individual commit options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFlag {
    Check,
    Confirmed,
    Blank,
    At,
    Comment,
    Synchronize,
}

/// Commit options with their mutual-exclusion rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitFlags {
    pub check: bool,
    pub confirmed: bool,
    pub blank: bool,
    pub at: bool,
    pub comment: bool,
    pub synchronize: bool,
}

impl CommitFlags {
    /// Turn one option on or off; turning one on clears the options it excludes
    pub fn set(&mut self, flag: CommitFlag, on: bool) {
        *self.slot(flag) = on;
        if !on {
            return;
        }

        match flag {
            CommitFlag::Blank => {
                self.confirmed = false;
                self.check = false;
            }
            CommitFlag::Check => {
                self.confirmed = false;
                self.blank = false;
                self.at = false;
                self.synchronize = false;
                self.comment = false;
            }
            CommitFlag::Confirmed => {
                self.check = false;
                self.blank = false;
                self.at = false;
            }
            CommitFlag::At => {
                self.confirmed = false;
                self.blank = false;
                self.check = false;
            }
            CommitFlag::Comment | CommitFlag::Synchronize => {
                self.check = false;
            }
        }
    }

    pub fn get(&self, flag: CommitFlag) -> bool {
        match flag {
            CommitFlag::Check => self.check,
            CommitFlag::Confirmed => self.confirmed,
            CommitFlag::Blank => self.blank,
            CommitFlag::At => self.at,
            CommitFlag::Comment => self.comment,
            CommitFlag::Synchronize => self.synchronize,
        }
    }

    fn slot(&mut self, flag: CommitFlag) -> &mut bool {
        match flag {
            CommitFlag::Check => &mut self.check,
            CommitFlag::Confirmed => &mut self.confirmed,
            CommitFlag::Blank => &mut self.blank,
            CommitFlag::At => &mut self.at,
            CommitFlag::Comment => &mut self.comment,
            CommitFlag::Synchronize => &mut self.synchronize,
        }
    }
}

/// Every configurable parameter, as the operator entered it.
///
/// Numeric fields stay text until [`JobForm::validate`] so that a bad value is
/// reported instead of silently replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobForm {
    /// Host list or path to a host list file
    pub hosts: String,
    pub username: String,
    pub secret: String,
    pub port: String,
    pub connect_timeout: String,
    pub session_timeout: String,

    pub write_to_file: bool,
    pub write_location: String,
    pub write_style: WriteStyle,

    pub operation: OperationKind,
    pub first_argument: String,
    pub transfer_destination: String,
    pub transfer_direction: TransferDirection,

    pub commit: CommitFlags,
    pub commit_confirmed_minutes: String,
    pub commit_at_time: String,
    pub commit_comment: String,

    pub xml_format: bool,
    pub diff_mode: DiffMode,
}

impl Default for JobForm {
    fn default() -> Self {
        JobForm {
            hosts: String::new(),
            username: String::new(),
            secret: String::new(),
            port: "22".to_string(),
            connect_timeout: "5".to_string(),
            session_timeout: "300".to_string(),
            write_to_file: false,
            write_location: String::new(),
            write_style: WriteStyle::Single,
            operation: OperationKind::DiffConfig,
            first_argument: String::new(),
            transfer_destination: String::new(),
            transfer_direction: TransferDirection::Push,
            commit: CommitFlags::default(),
            commit_confirmed_minutes: String::new(),
            commit_at_time: String::new(),
            commit_comment: String::new(),
            xml_format: false,
            diff_mode: DiffMode::Set,
        }
    }
}

impl JobForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every field to its default
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Switch operation; commit options only survive while commit-set is selected
    pub fn select_operation(&mut self, kind: OperationKind) {
        if kind != OperationKind::CommitSet {
            self.commit = CommitFlags::default();
        }
        self.operation = kind;
    }

    /// Validate the form and freeze it into a Job
    pub fn validate(&self) -> Result<Job, PanelError> {
        let spec = operation_spec(self.operation);

        if self.hosts.trim().is_empty() {
            return Err(PanelError::validation(
                "IP",
                "Please enter an IP address or IP address list file.",
            ));
        }
        let hosts = parse_hosts(&self.hosts)?;
        if hosts.is_empty() {
            return Err(PanelError::validation(
                "IP",
                "The host list does not contain any hosts.",
            ));
        }

        let username = self.username.trim();
        let secret = self.secret.trim();
        if username.is_empty() || secret.is_empty() {
            return Err(PanelError::validation(
                "Username",
                "Please enter both a username and password.",
            ));
        }

        if self.write_to_file && self.write_location.trim().is_empty() {
            return Err(PanelError::validation(
                "WriteToFileLoc",
                "When writing to a file, a filename must be specified.",
            ));
        }

        if spec.needs_input && self.first_argument.trim().is_empty() && !self.commit.blank {
            return Err(PanelError::validation(
                "FirstArgument",
                format!(
                    "'{}' requires extra input, for example a command string or a file path.",
                    spec.label
                ),
            ));
        }

        let network = NetworkParams {
            port: parse_number("Port", "port", &self.port, 1, u16::MAX as u64)? as u16,
            connect_timeout: Duration::from_secs(parse_number(
                "ConnTimeout",
                "connection timeout",
                &self.connect_timeout,
                1,
                3600,
            )?),
            session_timeout: Duration::from_secs(parse_number(
                "Timeout",
                "session timeout",
                &self.session_timeout,
                1,
                86_400,
            )?),
        };

        let args = (spec.build)(self, &hosts)?;

        let sink = if !self.write_to_file {
            SinkMode::None
        } else {
            let path = PathBuf::from(self.write_location.trim());
            match self.write_style {
                WriteStyle::Single => SinkMode::SingleFile(path),
                WriteStyle::Multiple => SinkMode::PerHostFile(path),
            }
        };

        Ok(Job {
            kind: self.operation,
            hosts,
            credentials: Credentials::new(username, secret),
            network,
            args,
            sink,
        })
    }
}

fn parse_number(
    field: &'static str,
    name: &str,
    value: &str,
    min: u64,
    max: u64,
) -> Result<u64, PanelError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|n| (min..=max).contains(n))
        .ok_or_else(|| {
            PanelError::validation(
                field,
                format!("The {} must be an integer between {} and {}.", name, min, max),
            )
        })
}
