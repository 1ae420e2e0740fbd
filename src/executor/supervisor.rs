// Job supervisor - owns the active job and drives it to a terminal state

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::channel::{output_channel, ChunkReceiver};
use super::runner::{JobRunner, RunnerHandle};
use super::DispatchTable;
use crate::job::{Job, JobForm, JobState};
use crate::output::{OutputSink, OutputSurface, PanelError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of one supervisor step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing is running
    Idle,
    /// The job is still going; tick again later
    Running,
    /// The job reached this terminal state during this tick
    Finished(JobState),
}

struct ActiveJob {
    job: Arc<Job>,
    handle: RunnerHandle,
    rx: ChunkReceiver,
    sink: OutputSink,
    started: Instant,
    cancel_sent: bool,
}

impl ActiveJob {
    fn forward(&mut self, surface: &mut dyn OutputSurface) -> usize {
        let chunks = self.rx.drain_available();
        for chunk in &chunks {
            surface.chunk(chunk);
            self.sink.record(chunk);
        }
        chunks.len()
    }
}

/// Runs at most one job at a time and relays its output
pub struct JobSupervisor {
    dispatch: DispatchTable,
    active: Option<ActiveJob>,
    last_state: JobState,
    poll_interval: Duration,
}

impl JobSupervisor {
    pub fn new(dispatch: DispatchTable) -> Self {
        JobSupervisor {
            dispatch,
            active: None,
            last_state: JobState::Idle,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// `Running` while a job is held, otherwise the last terminal state
    pub fn state(&self) -> JobState {
        if self.active.is_some() {
            JobState::Running
        } else {
            self.last_state
        }
    }

    /// Validate the form and start the resulting job
    pub fn submit(
        &mut self,
        form: &JobForm,
        surface: &mut dyn OutputSurface,
    ) -> Result<(), PanelError> {
        if self.active.is_some() {
            return Err(PanelError::JobRunning);
        }
        let job = form.validate()?;
        self.start(job, surface)
    }

    /// Start a job on a fresh worker thread
    pub fn start(&mut self, job: Job, surface: &mut dyn OutputSurface) -> Result<(), PanelError> {
        if self.active.is_some() {
            return Err(PanelError::JobRunning);
        }

        let job = Arc::new(job);
        let (tx, rx) = output_channel();
        let (runner, handle) = JobRunner::new(job.clone(), &self.dispatch, tx);

        runner.spawn().map_err(|e| PanelError::Runtime {
            message: format!("cannot start worker thread: {}", e),
            suggestion: None,
        })?;

        info!(kind = %job.kind, hosts = job.hosts.len(), "job submitted");
        surface.job_started(&job);

        self.active = Some(ActiveJob {
            sink: OutputSink::new(job.sink.clone()),
            job,
            handle,
            rx,
            started: Instant::now(),
            cancel_sent: false,
        });
        Ok(())
    }

    /// Request cooperative cancellation of the running job
    pub fn cancel(&mut self, surface: &mut dyn OutputSurface) {
        let Some(active) = self.active.as_mut() else {
            debug!("cancel ignored, no job running");
            return;
        };
        if active.cancel_sent {
            return;
        }

        active.cancel_sent = true;
        surface.cancel_requested();
        active.handle.cancel();
    }

    /// One drain-check-final-drain step
    pub fn tick(&mut self, surface: &mut dyn OutputSurface) -> TickOutcome {
        let finished = match self.active.as_mut() {
            None => return TickOutcome::Idle,
            Some(active) => {
                active.forward(surface);
                !active.handle.is_active()
            }
        };
        if !finished {
            return TickOutcome::Running;
        }

        let Some(mut active) = self.active.take() else {
            return TickOutcome::Idle;
        };

        // The runner is done pushing; collect anything sent after the first drain
        let late = active.forward(surface);
        if late > 0 {
            debug!(chunks = late, "final drain forwarded chunks");
        }

        let state = active.handle.state();
        let elapsed = active.started.elapsed();

        let ActiveJob { job, sink, .. } = active;
        match sink.finalize() {
            Ok(files) if !files.is_empty() => debug!(files = files.len(), "sink finalized"),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "failed to write job output");
                surface.notice(&PanelError::from(e));
            }
        }

        surface.job_finished(&job, state, elapsed);
        self.last_state = state;
        TickOutcome::Finished(state)
    }

    /// Tick on a fixed interval until the job ends
    pub async fn poll_until_complete(&mut self, surface: &mut dyn OutputSurface) -> JobState {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            match self.tick(surface) {
                TickOutcome::Finished(state) => return state,
                TickOutcome::Idle => return self.last_state,
                TickOutcome::Running => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::channel::{ChunkKind, OutputChunk};
    use crate::executor::{from_fn, OperationError};
    use crate::job::{Credentials, NetworkParams, OperationArgs, OperationKind, SinkMode};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        started: usize,
        chunks: Vec<OutputChunk>,
        cancels: usize,
        finished: Vec<JobState>,
        notices: Vec<String>,
    }

    impl OutputSurface for Recorder {
        fn job_started(&mut self, _job: &Job) {
            self.started += 1;
        }

        fn chunk(&mut self, chunk: &OutputChunk) {
            self.chunks.push(chunk.clone());
        }

        fn cancel_requested(&mut self) {
            self.cancels += 1;
        }

        fn job_finished(&mut self, _job: &Job, state: JobState, _elapsed: Duration) {
            self.finished.push(state);
        }

        fn notice(&mut self, error: &PanelError) {
            self.notices.push(error.to_string());
        }
    }

    fn run_commands(hosts: &[&str], sink: SinkMode) -> Job {
        Job {
            kind: OperationKind::RunCommands,
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            credentials: Credentials::new("ops", "pw"),
            network: NetworkParams::default(),
            args: OperationArgs::RunCommands {
                commands: "show version".to_string(),
                format: Default::default(),
                xpath: false,
            },
            sink,
        }
    }

    fn version_table() -> DispatchTable {
        DispatchTable::new().with(
            OperationKind::RunCommands,
            from_fn(|call| Ok(format!("Hostname: {}\nModel: mx960\n", call.host))),
        )
    }

    fn drive(supervisor: &mut JobSupervisor, surface: &mut Recorder) -> JobState {
        loop {
            match supervisor.tick(surface) {
                TickOutcome::Finished(state) => return state,
                TickOutcome::Idle => panic!("supervisor went idle without finishing"),
                TickOutcome::Running => std::thread::sleep(Duration::from_millis(2)),
            }
        }
    }

    #[test]
    fn test_two_host_run_commands() {
        let mut supervisor = JobSupervisor::new(version_table());
        let mut surface = Recorder::default();

        supervisor
            .start(run_commands(&["r1", "r2"], SinkMode::None), &mut surface)
            .unwrap();
        assert_eq!(supervisor.state(), JobState::Running);

        let state = drive(&mut supervisor, &mut surface);
        assert_eq!(state, JobState::Completed);
        assert_eq!(supervisor.state(), JobState::Completed);
        assert!(!supervisor.is_running());

        let hosts: Vec<_> = surface.chunks.iter().filter_map(|c| c.host.clone()).collect();
        assert_eq!(hosts, vec!["r1", "r2"]);
        assert!(surface.chunks[0].text.contains("Hostname: r1\nModel: mx960\n"));
        assert_eq!(surface.started, 1);
        assert_eq!(surface.finished, vec![JobState::Completed]);
    }

    #[test]
    fn test_per_host_sink_writes_two_files() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("version.txt");

        let mut supervisor = JobSupervisor::new(version_table());
        let mut surface = Recorder::default();
        supervisor
            .start(
                run_commands(&["r1", "r2"], SinkMode::PerHostFile(location)),
                &mut surface,
            )
            .unwrap();
        drive(&mut supervisor, &mut surface);

        let r1 = std::fs::read_to_string(dir.path().join("r1_version.txt")).unwrap();
        let r2 = std::fs::read_to_string(dir.path().join("r2_version.txt")).unwrap();
        assert!(r1.contains("Hostname: r1"));
        assert!(!r1.contains("Hostname: r2"));
        assert!(r2.contains("Hostname: r2"));
        assert!(surface.notices.is_empty());
    }

    #[test]
    fn test_sink_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("missing").join("out.txt");

        let mut supervisor = JobSupervisor::new(version_table());
        let mut surface = Recorder::default();
        supervisor
            .start(run_commands(&["r1"], SinkMode::SingleFile(location)), &mut surface)
            .unwrap();

        assert_eq!(drive(&mut supervisor, &mut surface), JobState::Completed);
        assert_eq!(surface.notices.len(), 1);
    }

    #[test]
    fn test_second_start_rejected_while_running() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate = Mutex::new(gate_rx);
        let table = DispatchTable::uniform(from_fn(move |call| {
            let _ = gate.lock().recv();
            Ok(call.host.to_string())
        }));

        let mut supervisor = JobSupervisor::new(table);
        let mut surface = Recorder::default();
        supervisor
            .start(run_commands(&["r1"], SinkMode::None), &mut surface)
            .unwrap();

        let err = supervisor
            .start(run_commands(&["r9"], SinkMode::None), &mut surface)
            .unwrap_err();
        assert!(matches!(err, PanelError::JobRunning));

        gate_tx.send(()).unwrap();
        assert_eq!(drive(&mut supervisor, &mut surface), JobState::Completed);
        assert_eq!(surface.started, 1);

        // A new job gets a fresh state machine
        gate_tx.send(()).unwrap();
        supervisor
            .start(run_commands(&["r3"], SinkMode::None), &mut surface)
            .unwrap();
        assert_eq!(supervisor.state(), JobState::Running);
        assert_eq!(drive(&mut supervisor, &mut surface), JobState::Completed);
    }

    #[test]
    fn test_cancel_during_first_host() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let gate = Mutex::new(gate_rx);
        let entered = Mutex::new(entered_tx);
        let table = DispatchTable::uniform(from_fn(move |call| {
            let _ = entered.lock().send(());
            let _ = gate.lock().recv();
            Ok(format!("done {}", call.host))
        }));

        let mut supervisor = JobSupervisor::new(table);
        let mut surface = Recorder::default();
        supervisor
            .start(run_commands(&["r1", "r2", "r3"], SinkMode::None), &mut surface)
            .unwrap();

        entered_rx.recv().unwrap();
        supervisor.cancel(&mut surface);
        supervisor.cancel(&mut surface);
        gate_tx.send(()).unwrap();

        assert_eq!(drive(&mut supervisor, &mut surface), JobState::Cancelled);
        assert_eq!(surface.cancels, 1);

        let sections: Vec<_> = surface
            .chunks
            .iter()
            .filter(|c| c.is_host_scoped())
            .filter_map(|c| c.host.clone())
            .collect();
        assert_eq!(sections, vec!["r1"]);
        assert_eq!(
            surface
                .chunks
                .iter()
                .filter(|c| c.kind == ChunkKind::Cancelled)
                .count(),
            1
        );
    }

    #[test]
    fn test_cancel_and_tick_when_idle() {
        let mut supervisor = JobSupervisor::new(DispatchTable::new());
        let mut surface = Recorder::default();

        supervisor.cancel(&mut surface);
        assert_eq!(supervisor.tick(&mut surface), TickOutcome::Idle);
        assert_eq!(supervisor.state(), JobState::Idle);
        assert_eq!(surface.cancels, 0);
    }

    #[test]
    fn test_submit_rejects_invalid_form() {
        let mut supervisor = JobSupervisor::new(version_table());
        let mut surface = Recorder::default();

        let err = supervisor.submit(&JobForm::new(), &mut surface).unwrap_err();
        assert!(matches!(err, PanelError::Validation { .. }));
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_unhandled_kind_fails() {
        let mut supervisor = JobSupervisor::new(DispatchTable::new());
        let mut surface = Recorder::default();
        supervisor
            .start(run_commands(&["r1"], SinkMode::None), &mut surface)
            .unwrap();

        assert_eq!(drive(&mut supervisor, &mut surface), JobState::Failed);
        assert_eq!(surface.chunks[0].kind, ChunkKind::RunnerFailed);
    }

    #[tokio::test]
    async fn test_poll_until_complete() {
        let table = DispatchTable::uniform(from_fn(|call| {
            if call.host == "r2" {
                Err(OperationError::new("authentication failed"))
            } else {
                Ok("ok\n".to_string())
            }
        }));
        let mut supervisor = JobSupervisor::new(table).with_poll_interval(Duration::from_millis(5));
        let mut surface = Recorder::default();
        supervisor
            .start(run_commands(&["r1", "r2", "r3"], SinkMode::None), &mut surface)
            .unwrap();

        let state = supervisor.poll_until_complete(&mut surface).await;
        assert_eq!(state, JobState::Completed);

        let kinds: Vec<_> = surface.chunks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ChunkKind::HostOutput, ChunkKind::HostError, ChunkKind::HostOutput]
        );
    }
}
