// Runtime configuration resolved from the environment and CLI flags

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::executor::supervisor::DEFAULT_POLL_INTERVAL;
use crate::executor::{DispatchTable, ProcessOperation, SshOperation};
use crate::job::JobForm;
use crate::output::PanelError;
use crate::template::{TemplateLoad, TemplateStore};

/// Overrides the defaults template location
pub const DEFAULTS_ENV: &str = "NETPANEL_DEFAULTS";
/// External driver program for the process backend
pub const PROGRAM_ENV: &str = "NETPANEL_PROGRAM";
/// Defaults template looked up next to the executable
pub const DEFAULTS_FILE: &str = "defaults.ini";

/// Which operation backend serves jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Built-in SSH exec channel
    #[default]
    Ssh,
    /// External driver program, one process per host
    Process,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ssh" => Ok(Backend::Ssh),
            "process" => Ok(Backend::Process),
            other => Err(format!("unknown backend '{}' (expected ssh or process)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Template applied to a fresh form, when present
    pub defaults_path: Option<PathBuf>,
    pub poll_interval: Duration,
    pub backend: Backend,
    pub program: Option<PathBuf>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        PanelConfig {
            defaults_path: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            backend: Backend::Ssh,
            program: None,
        }
    }
}

impl PanelConfig {
    /// Resolve from process environment and executable location
    pub fn from_env() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        Self::resolve(|key| std::env::var(key).ok(), exe_dir)
    }

    fn resolve(var: impl Fn(&str) -> Option<String>, exe_dir: Option<PathBuf>) -> Self {
        let defaults_path = var(DEFAULTS_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| exe_dir.map(|dir| dir.join(DEFAULTS_FILE)));

        let program = var(PROGRAM_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let backend = if program.is_some() {
            Backend::Process
        } else {
            Backend::Ssh
        };

        PanelConfig {
            defaults_path,
            poll_interval: DEFAULT_POLL_INTERVAL,
            backend,
            program,
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Setting a program also selects the process backend
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self.backend = Backend::Process;
        self
    }

    /// Handlers for the configured backend
    pub fn dispatch_table(&self) -> Result<DispatchTable, PanelError> {
        match self.backend {
            Backend::Ssh => Ok(SshOperation::dispatch_table()),
            Backend::Process => {
                let program = self.program.as_ref().ok_or_else(|| PanelError::Runtime {
                    message: "the process backend needs a driver program".to_string(),
                    suggestion: Some(format!("Pass --program or set {}", PROGRAM_ENV)),
                })?;
                Ok(DispatchTable::uniform(Arc::new(ProcessOperation::new(
                    program.clone(),
                ))))
            }
        }
    }

    /// Apply the defaults template to a form if the file exists.
    ///
    /// A missing file is normal; an unreadable one is logged and skipped.
    pub fn load_defaults(&self, form: &mut JobForm) -> Option<TemplateLoad> {
        let path = self.defaults_path.as_ref()?;
        if !path.is_file() {
            debug!(path = %path.display(), "no defaults template");
            return None;
        }

        match TemplateStore::load_into(path, form) {
            Ok(loaded) => Some(loaded),
            Err(e) => {
                warn!(error = %e, "failed to load defaults template");
                None
            }
        }
    }
}
