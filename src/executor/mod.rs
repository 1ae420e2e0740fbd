// Executor module - job execution off the controller thread

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::job::{OperationArgs, OperationKind};

pub mod channel;
pub mod process;
pub mod runner;
pub mod ssh;
pub mod supervisor;

pub use channel::{output_channel, ChunkKind, ChunkReceiver, ChunkSender, OutputChunk};
pub use process::ProcessOperation;
pub use runner::{CancelToken, JobRunner, RunnerHandle};
pub use ssh::SshOperation;
pub use supervisor::{JobSupervisor, TickOutcome};

/// A host-scoped failure reported by an operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct OperationError {
    pub message: String,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        OperationError {
            message: message.into(),
        }
    }
}

/// Everything an operation receives for one host
#[derive(Clone, Copy)]
pub struct OperationCall<'a> {
    pub kind: OperationKind,
    pub args: &'a OperationArgs,
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub secret: &'a str,
    pub connect_timeout: Duration,
    pub session_timeout: Duration,
}

impl fmt::Debug for OperationCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCall")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// The remote-device operation, consumed as an opaque blocking call.
///
/// `invoke` runs on the worker thread and may block for as long as the
/// device takes. `terminate` is called from the controller thread on cancel;
/// operations that spawn a process kill it there, in-process ones ignore it.
pub trait Operation: Send + Sync {
    fn invoke(&self, call: &OperationCall<'_>) -> Result<String, OperationError>;

    fn terminate(&self) -> Result<(), OperationError> {
        Ok(())
    }
}

impl<F> Operation for F
where
    F: Fn(&OperationCall<'_>) -> Result<String, OperationError> + Send + Sync,
{
    fn invoke(&self, call: &OperationCall<'_>) -> Result<String, OperationError> {
        self(call)
    }
}

/// Wrap a closure as a shareable operation
pub fn from_fn<F>(f: F) -> Arc<dyn Operation>
where
    F: Fn(&OperationCall<'_>) -> Result<String, OperationError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Operation kind to handler table
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<OperationKind, Arc<dyn Operation>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every operation kind to one handler
    pub fn uniform(handler: Arc<dyn Operation>) -> Self {
        let mut table = Self::new();
        for spec in crate::job::OPERATIONS.iter() {
            table.register(spec.kind, handler.clone());
        }
        table
    }

    pub fn register(&mut self, kind: OperationKind, handler: Arc<dyn Operation>) {
        self.handlers.insert(kind, handler);
    }

    pub fn with(mut self, kind: OperationKind, handler: Arc<dyn Operation>) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn get(&self, kind: OperationKind) -> Option<Arc<dyn Operation>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn supports(&self, kind: OperationKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("DispatchTable").field("kinds", &kinds).finish()
    }
}
