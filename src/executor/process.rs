// External-process backend - one child process per host

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Operation, OperationCall, OperationError};
use crate::job::OperationArgs;

/// Environment variable carrying the secret to the child process
pub const SECRET_ENV: &str = "NETPANEL_SECRET";

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Runs an external driver program for every host.
///
/// The driver is invoked as
/// `<program> [leading args] <kind> --host H --port P --username U
/// --conn-timeout C --timeout T [kind args]` and its stdout becomes the host
/// output. The secret never appears on the command line.
pub struct ProcessOperation {
    program: PathBuf,
    leading_args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl ProcessOperation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProcessOperation {
            program: program.into(),
            leading_args: Vec::new(),
            child: Mutex::new(None),
        }
    }

    /// Arguments placed before the generated ones, e.g. a script path
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a child process is currently running
    pub fn is_running(&self) -> bool {
        self.child.lock().is_some()
    }

    // The slot is locked only per poll, so terminate() can still reach a
    // driver that closed stdout but keeps running
    fn wait_child(&self) -> Result<ExitStatus, OperationError> {
        loop {
            {
                let mut slot = self.child.lock();
                let child = slot
                    .as_mut()
                    .ok_or_else(|| OperationError::new("Driver process was lost"))?;
                let polled = child
                    .try_wait()
                    .map_err(|e| OperationError::new(format!("Failed to wait for driver: {}", e)))?;
                if let Some(status) = polled {
                    slot.take();
                    return Ok(status);
                }
            }
            std::thread::sleep(WAIT_POLL);
        }
    }
}

impl Operation for ProcessOperation {
    fn invoke(&self, call: &OperationCall<'_>) -> Result<String, OperationError> {
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(command_args(call))
            .env(SECRET_ENV, call.secret)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                OperationError::new(format!(
                    "Failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        debug!(host = call.host, pid = child.id(), "driver process started");

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| OperationError::new("Failed to capture stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| OperationError::new("Failed to capture stderr"))?;

        *self.child.lock() = Some(child);

        // Drain stderr separately so a chatty driver cannot fill the pipe
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        });

        let mut out = Vec::new();
        let read = stdout.read_to_end(&mut out);

        let status = self.wait_child();
        let stderr_text = stderr_reader.join().unwrap_or_default();

        let status = status?;
        read.map_err(|e| OperationError::new(format!("Failed to read driver output: {}", e)))?;

        if status.success() {
            return Ok(String::from_utf8_lossy(&out).into_owned());
        }

        let message = match (stderr_text.trim(), status.code()) {
            ("", Some(code)) => format!("Driver exited with status {}", code),
            ("", None) => "Driver was terminated".to_string(),
            (text, _) => text.to_string(),
        };
        Err(OperationError::new(message))
    }

    fn terminate(&self) -> Result<(), OperationError> {
        let mut slot = self.child.lock();
        let Some(child) = slot.as_mut() else {
            return Ok(());
        };

        info!(pid = child.id(), "terminating driver process");
        child
            .kill()
            .map_err(|e| OperationError::new(format!("Failed to terminate driver: {}", e)))
    }
}

fn push_opt(args: &mut Vec<String>, name: &str, value: &str) {
    args.push(format!("--{}", name));
    args.push(value.to_string());
}

/// Command-line arguments for one host, without the program itself
pub fn command_args(call: &OperationCall<'_>) -> Vec<String> {
    let mut args = vec![
        call.kind.slug().to_string(),
        "--host".to_string(),
        call.host.to_string(),
        "--port".to_string(),
        call.port.to_string(),
        "--username".to_string(),
        call.username.to_string(),
        "--conn-timeout".to_string(),
        call.connect_timeout.as_secs().to_string(),
        "--timeout".to_string(),
        call.session_timeout.as_secs().to_string(),
    ];

    match call.args {
        OperationArgs::Empty => {}
        OperationArgs::RunCommands {
            commands,
            format,
            xpath,
        } => {
            push_opt(&mut args, "commands", commands);
            push_opt(&mut args, "format", format.as_str());
            if *xpath {
                args.push("--xpath".to_string());
            }
        }
        OperationArgs::DiffConfig { target, mode } => {
            push_opt(&mut args, "second-host", target);
            push_opt(&mut args, "mode", mode.as_str());
        }
        OperationArgs::CommitSet {
            commands,
            check_only,
            synchronize,
            comment,
            confirmed,
            at_time,
            blank,
        } => {
            push_opt(&mut args, "commands", commands);
            if let Some(comment) = comment {
                push_opt(&mut args, "comment", comment);
            }
            if let Some(seconds) = confirmed {
                push_opt(&mut args, "confirmed", &seconds.to_string());
            }
            if let Some(at) = at_time {
                push_opt(&mut args, "at", at);
            }
            for (on, flag) in [
                (*check_only, "--check"),
                (*synchronize, "--synchronize"),
                (*blank, "--blank"),
            ] {
                if on {
                    args.push(flag.to_string());
                }
            }
        }
        OperationArgs::FileTransfer {
            source,
            destination,
            direction,
            multi,
        } => {
            push_opt(&mut args, "direction", direction.as_str());
            push_opt(&mut args, "source", source);
            push_opt(&mut args, "destination", destination);
            if *multi {
                args.push("--multi".to_string());
            }
        }
        OperationArgs::ShellCommand { command } => push_opt(&mut args, "command", command),
        OperationArgs::ShowCompare { commands } => push_opt(&mut args, "commands", commands),
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{OperationKind, ReplyFormat};
    use pretty_assertions::assert_eq;

    fn call<'a>(kind: OperationKind, args: &'a OperationArgs) -> OperationCall<'a> {
        OperationCall {
            kind,
            args,
            host: "r1",
            port: 830,
            username: "ops",
            secret: "sw0rdfish",
            connect_timeout: Duration::from_secs(5),
            session_timeout: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_command_args_for_run_commands() {
        let args = OperationArgs::RunCommands {
            commands: "show version".to_string(),
            format: ReplyFormat::Xml,
            xpath: true,
        };
        let argv = command_args(&call(OperationKind::RunCommands, &args));

        assert_eq!(
            argv,
            vec![
                "run-commands", "--host", "r1", "--port", "830", "--username", "ops",
                "--conn-timeout", "5", "--timeout", "300", "--commands", "show version",
                "--format", "xml", "--xpath",
            ]
        );
        assert!(!argv.iter().any(|a| a.contains("sw0rdfish")));
    }

    #[test]
    fn test_command_args_for_commit() {
        let args = OperationArgs::CommitSet {
            commands: "set system host-name r1".to_string(),
            check_only: false,
            synchronize: true,
            comment: Some("ticket 42".to_string()),
            confirmed: Some(300),
            at_time: None,
            blank: false,
        };
        let argv = command_args(&call(OperationKind::CommitSet, &args));
        let tail: Vec<_> = argv[11..].to_vec();

        assert_eq!(
            tail,
            vec![
                "--commands", "set system host-name r1", "--comment", "ticket 42",
                "--confirmed", "300", "--synchronize",
            ]
        );
    }

    #[cfg(unix)]
    fn shell(script: &str) -> ProcessOperation {
        // sh -c SCRIPT puts the kind in $0 and the host in $2
        ProcessOperation::new("sh").with_args(["-c", script])
    }

    #[cfg(unix)]
    #[test]
    fn test_invoke_passes_secret_through_env() {
        let op = shell(r#"printf '%s %s %s\n' "$0" "$2" "$NETPANEL_SECRET""#);
        let args = OperationArgs::Empty;

        let out = op.invoke(&call(OperationKind::DeviceInfo, &args)).unwrap();
        assert_eq!(out, "device-info r1 sw0rdfish\n");
        assert!(!op.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_carries_stderr() {
        let op = shell("echo 'connection refused' >&2; exit 3");
        let args = OperationArgs::Empty;

        let err = op.invoke(&call(OperationKind::DeviceInfo, &args)).unwrap_err();
        assert_eq!(err.message, "connection refused");
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_kills_running_child() {
        use std::sync::Arc;
        use std::time::Instant;

        let op = Arc::new(shell("exec sleep 30"));
        let worker = {
            let op = op.clone();
            std::thread::spawn(move || {
                let args = OperationArgs::Empty;
                op.invoke(&call(OperationKind::HealthCheck, &args))
            })
        };

        let deadline = Instant::now() + Duration::from_secs(10);
        while !op.is_running() {
            assert!(Instant::now() < deadline, "driver never started");
            std::thread::sleep(Duration::from_millis(5));
        }

        let started = Instant::now();
        op.terminate().unwrap();
        let result = worker.join().unwrap();

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(op.terminate().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_reaches_driver_after_stdout_closed() {
        use std::sync::Arc;
        use std::time::Instant;

        // Closing both pipes leaves nothing to read while the driver lives on
        let op = Arc::new(shell("exec >&- 2>&-; exec sleep 30"));
        let worker = {
            let op = op.clone();
            std::thread::spawn(move || {
                let args = OperationArgs::Empty;
                op.invoke(&call(OperationKind::HealthCheck, &args))
            })
        };

        let deadline = Instant::now() + Duration::from_secs(10);
        while !op.is_running() {
            assert!(Instant::now() < deadline, "driver never started");
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        op.terminate().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let err = worker.join().unwrap().unwrap_err();
        assert_eq!(err.message, "Driver was terminated");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!op.is_running());
    }

    #[test]
    fn test_missing_program() {
        let op = ProcessOperation::new("/nonexistent/netpanel-driver");
        let args = OperationArgs::Empty;
        let err = op.invoke(&call(OperationKind::DeviceInfo, &args)).unwrap_err();
        assert!(err.message.contains("Failed to start"));
    }
}
