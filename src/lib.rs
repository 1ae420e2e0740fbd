// netpanel - operator front-end for remote network-device operations
//
// Jobs run host by host on a worker thread while the controller polls their
// output channel, renders it and copies it to files.

pub mod config;
pub mod executor;
pub mod job;
pub mod output;
pub mod template;

pub use config::{Backend, PanelConfig};
pub use executor::{
    DispatchTable, JobSupervisor, Operation, OperationCall, OperationError, TickOutcome,
};
pub use job::{Job, JobForm, JobState, OperationKind};
pub use output::{OutputFormat, OutputSurface, OutputWriter, PanelError};
pub use template::{TemplateRecord, TemplateStore};

/// Version of the netpanel tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::executor::{from_fn, DispatchTable, JobSupervisor, OperationError, TickOutcome};
    pub use crate::job::{Job, JobForm, JobState, OperationArgs, OperationKind};
    pub use crate::output::{OutputSurface, OutputWriter, PanelError};
    pub use crate::template::{TemplateRecord, TemplateStore};
}
