// JSON output for structured logging

use std::time::Duration;

use serde_json::json;

use crate::executor::channel::OutputChunk;
use crate::job::{Job, JobState};
use crate::output::errors::PanelError;

/// NDJSON event writer for machine consumers
pub struct JsonOutput {
    verbose: bool,
    quiet: bool,
}

impl JsonOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        JsonOutput { verbose, quiet }
    }

    pub fn print_job_header(&self, job: &Job) {
        if self.quiet {
            return;
        }

        self.emit_json(&job_start_event(job, self.verbose));
    }

    pub fn print_chunk(&self, chunk: &OutputChunk) {
        if self.quiet && !chunk.is_host_scoped() {
            return;
        }
        self.emit_json(&chunk_event(chunk));
    }

    pub fn print_cancel_requested(&self) {
        self.emit_json(&json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": "cancel_requested",
        }));
    }

    pub fn print_job_footer(&self, job: &Job, state: JobState, elapsed: Duration) {
        let event = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": "job_complete",
            "operation": job.kind,
            "state": state,
            "duration_ms": elapsed.as_millis() as u64,
        });

        self.emit_json(&event);
    }

    pub fn print_notice(&self, error: &PanelError) {
        let message = console::strip_ansi_codes(&error.to_string()).trim_end().to_string();
        self.emit_json(&json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": "notice",
            "message": message,
        }));
    }

    fn emit_json(&self, value: &serde_json::Value) {
        // NDJSON: one compact object per line
        if let Ok(json_str) = serde_json::to_string(value) {
            println!("{}", json_str);
        }
    }
}

fn job_start_event(job: &Job, verbose: bool) -> serde_json::Value {
    let mut event = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "event": "job_start",
        "operation": job.kind,
        "hosts_count": job.hosts.len(),
    });
    if verbose {
        event["hosts"] = json!(job.hosts);
        event["args"] = json!(job.args);
    }
    event
}

fn chunk_event(chunk: &OutputChunk) -> serde_json::Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "event": "output",
        "chunk": chunk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Credentials, NetworkParams, OperationArgs, OperationKind, SinkMode};

    #[test]
    fn test_chunk_event_shape() {
        let event = chunk_event(&OutputChunk::host_error("r2", "ERROR: refused"));

        assert_eq!(event["event"], "output");
        assert_eq!(event["chunk"]["kind"], "host_error");
        assert_eq!(event["chunk"]["host"], "r2");
        assert_eq!(event["chunk"]["text"], "ERROR: refused");

        let stamp = event["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    fn commit_job() -> Job {
        Job {
            kind: OperationKind::CommitSet,
            hosts: vec!["r1".into(), "r2".into()],
            credentials: Credentials::new("ops", "sw0rdfish"),
            network: NetworkParams::default(),
            args: OperationArgs::CommitSet {
                commands: "set system host-name r1".to_string(),
                check_only: true,
                synchronize: false,
                comment: None,
                confirmed: Some(300),
                at_time: None,
                blank: false,
            },
            sink: SinkMode::None,
        }
    }

    #[test]
    fn test_job_start_event() {
        let event = job_start_event(&commit_job(), false);
        assert_eq!(event["event"], "job_start");
        assert_eq!(event["hosts_count"], 2);
        assert!(event.get("args").is_none());
    }

    #[test]
    fn test_verbose_job_start_carries_args() {
        let event = job_start_event(&commit_job(), true);

        assert_eq!(event["hosts"], json!(["r1", "r2"]));
        assert_eq!(event["args"]["kind"], "commit_set");
        assert_eq!(event["args"]["confirmed"], 300);
        assert_eq!(event["args"]["check_only"], true);
        assert!(!event.to_string().contains("sw0rdfish"));
    }

    #[test]
    fn test_job_wide_chunk_has_null_host() {
        let event = chunk_event(&OutputChunk::cancelled("stopped"));
        assert_eq!(event["chunk"]["kind"], "cancelled");
        assert!(event["chunk"]["host"].is_null());
    }
}
