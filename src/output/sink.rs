// Output sink - copies job output to files alongside the surface

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::executor::channel::OutputChunk;
use crate::job::SinkMode;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output location {path:?} has no file name")]
    NoFileName { path: PathBuf },

    #[error("cannot write job output to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SinkError {
    pub fn path(&self) -> &Path {
        match self {
            SinkError::NoFileName { path } | SinkError::Write { path, .. } => path,
        }
    }
}

/// Collects drained chunks for one job and writes them out when it ends
#[derive(Debug)]
pub struct OutputSink {
    mode: SinkMode,
    recorded: Vec<OutputChunk>,
}

impl OutputSink {
    pub fn new(mode: SinkMode) -> Self {
        OutputSink {
            mode,
            recorded: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, SinkMode::None)
    }

    pub fn record(&mut self, chunk: &OutputChunk) {
        if self.is_enabled() {
            self.recorded.push(chunk.clone());
        }
    }

    /// Write everything recorded and return the files touched.
    ///
    /// Single-file mode appends every chunk in arrival order. Per-host mode
    /// appends each host's chunks to its own file; job-wide notices are not
    /// written there.
    pub fn finalize(self) -> Result<Vec<PathBuf>, SinkError> {
        match self.mode {
            SinkMode::None => Ok(Vec::new()),
            SinkMode::SingleFile(ref path) => {
                let texts: Vec<&str> = self.recorded.iter().map(|c| c.text.as_str()).collect();
                append_all(path, &texts)?;
                info!(path = %path.display(), chunks = texts.len(), "job output written");
                Ok(vec![path.clone()])
            }
            SinkMode::PerHostFile(ref path) => {
                let mut by_host: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
                for chunk in &self.recorded {
                    if let Some(ref host) = chunk.host {
                        by_host.entry(host).or_default().push(&chunk.text);
                    }
                }

                let mut written = Vec::with_capacity(by_host.len());
                for (host, texts) in by_host {
                    let target = per_host_path(path, host)?;
                    append_all(&target, &texts)?;
                    debug!(host, path = %target.display(), "host output written");
                    written.push(target);
                }
                info!(files = written.len(), "per-host job output written");
                Ok(written)
            }
        }
    }
}

/// `<dir>/<host>_<file name>` with unsafe host characters replaced
pub fn per_host_path(location: &Path, host: &str) -> Result<PathBuf, SinkError> {
    let file_name = location
        .file_name()
        .ok_or_else(|| SinkError::NoFileName {
            path: location.to_path_buf(),
        })?
        .to_string_lossy();

    let name = format!("{}_{}", sanitize_host(host), file_name);
    Ok(match location.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    })
}

fn sanitize_host(host: &str) -> String {
    host.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn append_all(path: &Path, texts: &[&str]) -> Result<(), SinkError> {
    let wrap = |source| SinkError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(wrap)?;

    for text in texts {
        file.write_all(text.as_bytes()).map_err(wrap)?;
        if !text.ends_with('\n') {
            file.write_all(b"\n").map_err(wrap)?;
        }
    }
    file.flush().map_err(wrap)
}
