// Job runner - executes one job host by host on a worker thread

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::channel::{ChunkSender, OutputChunk};
use super::{DispatchTable, Operation, OperationCall};
use crate::job::{Job, JobState};

/// State shared between the worker and the controller: liveness,
/// the cooperative cancel flag and the outcome
#[derive(Debug)]
struct RunSignal {
    active: AtomicBool,
    cancel: AtomicBool,
    outcome: AtomicU8,
}

impl RunSignal {
    fn new() -> Self {
        RunSignal {
            active: AtomicBool::new(true),
            cancel: AtomicBool::new(false),
            outcome: AtomicU8::new(JobState::Running.as_u8()),
        }
    }

    fn finish(&self, state: JobState) {
        self.outcome.store(state.as_u8(), Ordering::Release);
        self.active.store(false, Ordering::Release);
    }
}

/// Requests a stop at the next host boundary
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: Arc<RunSignal>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.signal.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.cancel.load(Ordering::Acquire)
    }
}

/// Controller-side view of a runner
pub struct RunnerHandle {
    signal: Arc<RunSignal>,
    operation: Option<Arc<dyn Operation>>,
}

impl RunnerHandle {
    /// Whether the runner is still working
    pub fn is_active(&self) -> bool {
        self.signal.active.load(Ordering::Acquire)
    }

    /// `Running` while active, then the terminal state
    pub fn state(&self) -> JobState {
        if self.is_active() {
            JobState::Running
        } else {
            JobState::from_u8(self.signal.outcome.load(Ordering::Acquire))
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            signal: self.signal.clone(),
        }
    }

    /// Ask the runner to stop before its next host.
    ///
    /// The host in flight runs to completion unless its operation owns a
    /// process, which is asked to terminate. Calling this again is harmless.
    pub fn cancel(&self) {
        if !self.is_active() {
            return;
        }

        let already = self.signal.cancel.swap(true, Ordering::AcqRel);
        if already {
            return;
        }

        info!("cancellation requested");
        if let Some(ref operation) = self.operation {
            if let Err(e) = operation.terminate() {
                warn!(error = %e, "failed to terminate running operation");
            }
        }
    }
}

// Marks the runner inactive however `run` exits, including by panic
struct ActiveGuard {
    signal: Arc<RunSignal>,
    finished: bool,
}

impl ActiveGuard {
    fn finish(mut self, state: JobState) {
        self.finished = true;
        self.signal.finish(state);
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!("job runner exited abnormally");
            self.signal.finish(JobState::Failed);
        }
    }
}

/// Owns one execution attempt of a job
pub struct JobRunner {
    job: Arc<Job>,
    operation: Option<Arc<dyn Operation>>,
    tx: ChunkSender,
    signal: Arc<RunSignal>,
}

impl JobRunner {
    /// Prepare a runner and the handle used to observe and cancel it.
    ///
    /// The handle reports the runner as active from this point on, before any
    /// thread is started.
    pub fn new(job: Arc<Job>, dispatch: &DispatchTable, tx: ChunkSender) -> (Self, RunnerHandle) {
        let signal = Arc::new(RunSignal::new());
        let operation = dispatch.get(job.kind);

        let handle = RunnerHandle {
            signal: signal.clone(),
            operation: operation.clone(),
        };
        let runner = JobRunner {
            job,
            operation,
            tx,
            signal,
        };
        (runner, handle)
    }

    /// Run on a detached worker thread
    pub fn spawn(self) -> std::io::Result<()> {
        let signal = self.signal.clone();
        let name = format!("job-{}", self.job.kind);

        match std::thread::Builder::new().name(name).spawn(move || self.run()) {
            Ok(_detached) => Ok(()),
            Err(e) => {
                signal.finish(JobState::Failed);
                Err(e)
            }
        }
    }

    /// Run every host in order on the calling thread
    pub fn run(self) {
        let guard = ActiveGuard {
            signal: self.signal.clone(),
            finished: false,
        };
        let state = self.execute();
        info!(kind = %self.job.kind, state = %state, "job finished");
        guard.finish(state);
    }

    fn execute(&self) -> JobState {
        let job = &self.job;

        let Some(operation) = self.operation.as_ref() else {
            self.tx.push(OutputChunk::runner_failed(format!(
                "No handler is configured for operation '{}'",
                job.kind
            )));
            return JobState::Failed;
        };

        if job.hosts.is_empty() {
            self.tx
                .push(OutputChunk::runner_failed("The job has no target hosts"));
            return JobState::Failed;
        }

        info!(kind = %job.kind, hosts = job.hosts.len(), "job started");
        let multi = job.is_multi_host();

        for (idx, host) in job.hosts.iter().enumerate() {
            if self.signal.cancel.load(Ordering::Acquire) {
                let skipped = job.hosts.len() - idx;
                info!(skipped, "job cancelled at host boundary");
                self.tx.push(OutputChunk::cancelled(format!(
                    "Job cancelled; {} of {} host(s) not attempted",
                    skipped,
                    job.hosts.len()
                )));
                return JobState::Cancelled;
            }

            let call = OperationCall {
                kind: job.kind,
                args: &job.args,
                host,
                port: job.network.port,
                username: &job.credentials.username,
                secret: job.credentials.secret(),
                connect_timeout: job.network.connect_timeout,
                session_timeout: job.network.session_timeout,
            };

            debug!(host = %host, "invoking operation");
            match operation.invoke(&call) {
                Ok(text) => {
                    self.tx
                        .push(OutputChunk::host_output(host, section(host, &text, multi)));
                }
                Err(e) => {
                    warn!(host = %host, error = %e, "operation failed on host");
                    let text = format!("ERROR: {}\n", e.message.trim_end());
                    self.tx
                        .push(OutputChunk::host_error(host, section(host, &text, multi)));
                }
            }
        }

        JobState::Completed
    }
}

/// Prefix host output with a banner when the job spans several hosts
fn section(host: &str, text: &str, multi: bool) -> String {
    if multi {
        format!("{} {} {}\n{}", "=".repeat(20), host, "=".repeat(20), text)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::channel::{output_channel, ChunkKind};
    use crate::executor::{from_fn, OperationError};
    use crate::job::{Credentials, NetworkParams, OperationArgs, OperationKind, SinkMode};
    use once_cell::sync::OnceCell;
    use pretty_assertions::assert_eq;

    fn job(hosts: &[&str]) -> Arc<Job> {
        Arc::new(Job {
            kind: OperationKind::RunCommands,
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            credentials: Credentials::new("ops", "pw"),
            network: NetworkParams::default(),
            args: OperationArgs::RunCommands {
                commands: "show version".to_string(),
                format: Default::default(),
                xpath: false,
            },
            sink: SinkMode::None,
        })
    }

    fn echo_table() -> DispatchTable {
        DispatchTable::uniform(from_fn(|call| match call.args {
            OperationArgs::RunCommands { commands, .. } => {
                Ok(format!("{}: {}\nline two\n", call.host, commands))
            }
            _ => Ok(String::new()),
        }))
    }

    fn section_hosts(chunks: &[OutputChunk]) -> Vec<String> {
        chunks
            .iter()
            .filter(|c| c.is_host_scoped())
            .filter_map(|c| c.host.clone())
            .collect()
    }

    #[test]
    fn test_runs_hosts_in_order() {
        let (tx, mut rx) = output_channel();
        let (runner, handle) = JobRunner::new(job(&["r1", "r2"]), &echo_table(), tx);
        assert!(handle.is_active());

        runner.run();
        let chunks = rx.drain_available();

        assert_eq!(section_hosts(&chunks), vec!["r1", "r2"]);
        assert!(chunks[0].text.contains("r1 ===================="));
        assert!(chunks[0].text.contains("r1: show version\nline two\n"));
        assert!(chunks[1].text.contains("r2: show version"));
        assert!(!handle.is_active());
        assert_eq!(handle.state(), JobState::Completed);
    }

    #[test]
    fn test_single_host_has_no_banner() {
        let (tx, mut rx) = output_channel();
        let (runner, _handle) = JobRunner::new(job(&["r1"]), &echo_table(), tx);
        runner.run();

        let chunks = rx.drain_available();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "r1: show version\nline two\n");
    }

    #[test]
    fn test_host_failure_does_not_abort() {
        let table = DispatchTable::uniform(from_fn(|call| {
            if call.host == "r2" {
                Err(OperationError::new("Connection refused"))
            } else {
                Ok(format!("ok from {}", call.host))
            }
        }));
        let (tx, mut rx) = output_channel();
        let (runner, handle) = JobRunner::new(job(&["r1", "r2", "r3"]), &table, tx);
        runner.run();

        let chunks = rx.drain_available();
        let kinds: Vec<_> = chunks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ChunkKind::HostOutput, ChunkKind::HostError, ChunkKind::HostOutput]
        );
        assert!(chunks[1].text.contains("ERROR: Connection refused"));
        assert_eq!(handle.state(), JobState::Completed);
    }

    #[test]
    fn test_cancel_before_start() {
        let (tx, mut rx) = output_channel();
        let (runner, handle) = JobRunner::new(job(&["r1", "r2"]), &echo_table(), tx);
        handle.cancel();
        runner.run();

        let chunks = rx.drain_available();
        assert!(section_hosts(&chunks).is_empty());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Cancelled);
        assert!(chunks[0].text.contains("2 of 2"));
        assert_eq!(handle.state(), JobState::Cancelled);
    }

    #[test]
    fn test_cancel_after_second_host() {
        let token: Arc<OnceCell<CancelToken>> = Arc::new(OnceCell::new());
        let slot = token.clone();
        let table = DispatchTable::uniform(from_fn(move |call| {
            if call.host == "r2" {
                if let Some(token) = slot.get() {
                    token.cancel();
                }
            }
            Ok(format!("done {}", call.host))
        }));

        let (tx, mut rx) = output_channel();
        let (runner, handle) = JobRunner::new(job(&["r1", "r2", "r3", "r4"]), &table, tx);
        token.set(handle.cancel_token()).unwrap();
        runner.run();

        let chunks = rx.drain_available();
        assert_eq!(section_hosts(&chunks), vec!["r1", "r2"]);
        assert_eq!(chunks.last().unwrap().kind, ChunkKind::Cancelled);
        assert_eq!(
            chunks.iter().filter(|c| c.kind == ChunkKind::Cancelled).count(),
            1
        );
        assert_eq!(handle.state(), JobState::Cancelled);
    }

    // Blocks in invoke until released; refuses to terminate
    struct StubbornOperation {
        entered: parking_lot::Mutex<std::sync::mpsc::Sender<String>>,
        release: parking_lot::Mutex<std::sync::mpsc::Receiver<()>>,
        terminations: std::sync::atomic::AtomicUsize,
    }

    impl Operation for StubbornOperation {
        fn invoke(&self, call: &OperationCall<'_>) -> Result<String, OperationError> {
            let _ = self.entered.lock().send(call.host.to_string());
            let _ = self.release.lock().recv();
            Ok(format!("done {}", call.host))
        }

        fn terminate(&self) -> Result<(), OperationError> {
            self.terminations.fetch_add(1, Ordering::SeqCst);
            Err(OperationError::new("driver ignored the signal"))
        }
    }

    #[test]
    fn test_cancel_terminates_once_and_survives_failure() {
        use std::sync::mpsc;
        use std::time::Duration;

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let op = Arc::new(StubbornOperation {
            entered: parking_lot::Mutex::new(entered_tx),
            release: parking_lot::Mutex::new(release_rx),
            terminations: Default::default(),
        });
        let table = DispatchTable::uniform(op.clone());

        let (tx, mut rx) = output_channel();
        let (runner, handle) = JobRunner::new(job(&["r1", "r2", "r3"]), &table, tx);
        runner.spawn().unwrap();

        let first = entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(first, "r1");

        handle.cancel();
        handle.cancel();
        assert_eq!(op.terminations.load(Ordering::SeqCst), 1);
        assert!(handle.is_active());

        release_tx.send(()).unwrap();
        while handle.is_active() {
            std::thread::sleep(Duration::from_millis(5));
        }

        let chunks = rx.drain_available();
        assert_eq!(section_hosts(&chunks), vec!["r1"]);
        assert_eq!(chunks.last().unwrap().kind, ChunkKind::Cancelled);
        assert_eq!(handle.state(), JobState::Cancelled);
        assert_eq!(op.terminations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_handler_fails_job() {
        let (tx, mut rx) = output_channel();
        let (runner, handle) = JobRunner::new(job(&["r1"]), &DispatchTable::new(), tx);
        runner.run();

        let chunks = rx.drain_available();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::RunnerFailed);
        assert_eq!(handle.state(), JobState::Failed);
    }

    #[test]
    fn test_panicking_operation_marks_failed() {
        let table = DispatchTable::uniform(from_fn(|_call| panic!("driver bug")));
        let (tx, _rx) = output_channel();
        let (runner, handle) = JobRunner::new(job(&["r1"]), &table, tx);

        runner.spawn().unwrap();
        while handle.is_active() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(handle.state(), JobState::Failed);
    }

    #[test]
    fn test_cancel_after_finish_is_noop() {
        let (tx, _rx) = output_channel();
        let (runner, handle) = JobRunner::new(job(&["r1"]), &echo_table(), tx);
        runner.run();

        handle.cancel();
        handle.cancel();
        assert!(!handle.cancel_token().is_cancelled());
        assert_eq!(handle.state(), JobState::Completed);
    }
}
