// Output channel between the job runner and the controller

use serde::Serialize;
use tokio::sync::mpsc;

/// What a chunk carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Output returned by the operation for one host
    HostOutput,
    /// Diagnostic for an operation that failed on one host
    HostError,
    /// The run stopped at a host boundary on request
    Cancelled,
    /// The run could not proceed at all
    RunnerFailed,
}

/// One ordered fragment of job output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputChunk {
    pub kind: ChunkKind,
    /// Host the chunk belongs to; `None` for job-wide notices
    pub host: Option<String>,
    pub text: String,
}

impl OutputChunk {
    pub fn host_output(host: impl Into<String>, text: impl Into<String>) -> Self {
        OutputChunk {
            kind: ChunkKind::HostOutput,
            host: Some(host.into()),
            text: text.into(),
        }
    }

    pub fn host_error(host: impl Into<String>, text: impl Into<String>) -> Self {
        OutputChunk {
            kind: ChunkKind::HostError,
            host: Some(host.into()),
            text: text.into(),
        }
    }

    pub fn cancelled(text: impl Into<String>) -> Self {
        OutputChunk {
            kind: ChunkKind::Cancelled,
            host: None,
            text: text.into(),
        }
    }

    pub fn runner_failed(text: impl Into<String>) -> Self {
        OutputChunk {
            kind: ChunkKind::RunnerFailed,
            host: None,
            text: text.into(),
        }
    }

    /// Whether this chunk opens or makes up a host-scoped section
    pub fn is_host_scoped(&self) -> bool {
        matches!(self.kind, ChunkKind::HostOutput | ChunkKind::HostError)
    }
}

/// Producer side, owned by the running job
#[derive(Debug)]
pub struct ChunkSender {
    tx: mpsc::UnboundedSender<OutputChunk>,
}

impl ChunkSender {
    /// Enqueue a chunk; never blocks. Dropped silently once the consumer is gone.
    pub fn push(&self, chunk: OutputChunk) {
        let _ = self.tx.send(chunk);
    }
}

/// Consumer side, owned by the controller
#[derive(Debug)]
pub struct ChunkReceiver {
    rx: mpsc::UnboundedReceiver<OutputChunk>,
}

impl ChunkReceiver {
    /// Take every chunk enqueued so far, in FIFO order, without blocking
    pub fn drain_available(&mut self) -> Vec<OutputChunk> {
        let mut chunks = Vec::new();
        while let Ok(chunk) = self.rx.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }
}

/// Create a new single-producer, single-consumer output channel
pub fn output_channel() -> (ChunkSender, ChunkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChunkSender { tx }, ChunkReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_drain_empty() {
        let (_tx, mut rx) = output_channel();
        assert!(rx.drain_available().is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let (tx, mut rx) = output_channel();
        tx.push(OutputChunk::host_output("r1", "a"));
        tx.push(OutputChunk::host_error("r2", "b"));
        tx.push(OutputChunk::cancelled("c"));

        let texts: Vec<_> = rx.drain_available().into_iter().map(|c| c.text).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert!(rx.drain_available().is_empty());
    }

    #[test]
    fn test_concurrent_push_and_drain_loses_nothing() {
        let (tx, mut rx) = output_channel();
        let total = 5_000;

        let producer = std::thread::spawn(move || {
            for i in 0..total {
                tx.push(OutputChunk::host_output("r1", i.to_string()));
            }
        });

        let mut seen = Vec::new();
        while !producer.is_finished() {
            seen.extend(rx.drain_available());
        }
        producer.join().unwrap();
        seen.extend(rx.drain_available());

        let expected: Vec<String> = (0..total).map(|i| i.to_string()).collect();
        let got: Vec<String> = seen.into_iter().map(|c| c.text).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let (tx, rx) = output_channel();
        drop(rx);
        tx.push(OutputChunk::host_output("r1", "ignored"));
    }
}
