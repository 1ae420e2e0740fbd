// Job descriptor - one immutable execution request

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use zeroize::Zeroizing;

pub mod form;
pub mod hosts;
pub mod kind;

pub use form::{CommitFlag, CommitFlags, JobForm, WriteStyle};
pub use hosts::parse_hosts;
pub use kind::{
    operation_spec, DiffMode, OperationArgs, OperationKind, OperationSpec, ReplyFormat,
    TransferDirection, OPERATIONS,
};

/// Login credentials for every host of a job
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn secret(&self) -> &str {
        self.secret.as_str()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Connection parameters passed down to the operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    pub port: u16,
    pub connect_timeout: Duration,
    pub session_timeout: Duration,
}

impl Default for NetworkParams {
    fn default() -> Self {
        NetworkParams {
            port: 22,
            connect_timeout: Duration::from_secs(5),
            session_timeout: Duration::from_secs(300),
        }
    }
}

/// Where the output of a job is written besides the output surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMode {
    None,
    /// All chunks of all hosts appended to one file, in arrival order
    SingleFile(PathBuf),
    /// One file per host, named from the host and this path's file name
    PerHostFile(PathBuf),
}

/// One configured execution request against one or more hosts.
///
/// A `Job` is frozen once built; the supervisor shares it with the runner
/// behind an `Arc`, so later edits to the form never reach an in-flight run.
#[derive(Debug, Clone)]
pub struct Job {
    pub kind: OperationKind,
    pub hosts: Vec<String>,
    pub credentials: Credentials,
    pub network: NetworkParams,
    pub args: OperationArgs,
    pub sink: SinkMode,
}

impl Job {
    /// Whether host output gets a banner naming the host
    pub fn is_multi_host(&self) -> bool {
        self.hosts.len() > 1
    }
}

/// Lifecycle of a single job.
///
/// `Idle` is initial; `Completed`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            JobState::Idle => 0,
            JobState::Running => 1,
            JobState::Completed => 2,
            JobState::Cancelled => 3,
            JobState::Failed => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => JobState::Running,
            2 => JobState::Completed,
            3 => JobState::Cancelled,
            4 => JobState::Failed,
            _ => JobState::Idle,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}
