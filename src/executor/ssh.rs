// SSH backend - runs device CLI commands over an exec channel

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use ssh2::Session;
use tracing::debug;

use super::{DispatchTable, Operation, OperationCall, OperationError};
use crate::job::{OperationArgs, OperationKind, ReplyFormat};

const DEVICE_INFO: &[&str] = &["show version", "show chassis hardware"];

const HEALTH_CHECK: &[&str] = &[
    "show chassis routing-engine",
    "show system processes extensive | no-more",
    "show chassis environment",
    "show chassis alarms",
    "show system alarms",
];

const INTERFACE_ERRORS: &[&str] =
    &[r#"show interfaces extensive | match "Physical interface|errors""#];

/// Password-authenticated SSH for the read-only operations
#[derive(Debug, Default)]
pub struct SshOperation;

impl SshOperation {
    /// Operation kinds this backend can run
    pub const KINDS: [OperationKind; 5] = [
        OperationKind::RunCommands,
        OperationKind::ShellCommand,
        OperationKind::DeviceInfo,
        OperationKind::HealthCheck,
        OperationKind::InterfaceErrors,
    ];

    pub fn new() -> Self {
        SshOperation
    }

    /// A table routing the supported kinds to one shared backend
    pub fn dispatch_table() -> DispatchTable {
        let op: Arc<dyn Operation> = Arc::new(SshOperation::new());
        let mut table = DispatchTable::new();
        for kind in Self::KINDS {
            table.register(kind, op.clone());
        }
        table
    }

    fn connect(&self, call: &OperationCall<'_>) -> Result<Session, OperationError> {
        let addrs = (call.host, call.port)
            .to_socket_addrs()
            .map_err(|e| OperationError::new(format!("Invalid address: {}", e)))?;

        let mut last_err = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, call.connect_timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let tcp = match (tcp, last_err) {
            (Some(tcp), _) => tcp,
            (None, Some(e)) => {
                return Err(OperationError::new(format!(
                    "Connection failed: {}{}",
                    e,
                    connection_hint(&e)
                )))
            }
            (None, None) => {
                return Err(OperationError::new(format!(
                    "No address found for {}",
                    call.host
                )))
            }
        };

        let mut session = Session::new()
            .map_err(|e| OperationError::new(format!("Failed to create SSH session: {}", e)))?;

        session.set_tcp_stream(tcp);
        session.set_timeout(millis(call.connect_timeout));
        session
            .handshake()
            .map_err(|e| OperationError::new(format!("SSH handshake failed: {}", e)))?;

        session
            .userauth_password(call.username, call.secret)
            .map_err(|e| OperationError::new(format!("Authentication failed: {}", e)))?;

        session.set_timeout(millis(call.session_timeout));
        Ok(session)
    }

    fn exec(&self, session: &Session, command: &str) -> Result<String, OperationError> {
        let mut channel = session
            .channel_session()
            .map_err(|e| OperationError::new(format!("Failed to open channel: {}", e)))?;

        channel.exec(command).map_err(|e| {
            let timeout = e.to_string().contains("timeout");
            OperationError::new(format!(
                "Failed to execute command{}: {}",
                if timeout { " (timeout)" } else { "" },
                e
            ))
        })?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| OperationError::new(format!("Failed to read output: {}", e)))?;
        channel.stderr().read_to_string(&mut stderr).ok();

        channel.wait_close().ok();
        let exit_code = channel.exit_status().unwrap_or(-1);
        debug!(command, exit_code, "command finished");

        if exit_code != 0 && stdout.trim().is_empty() {
            let detail = if stderr.trim().is_empty() {
                format!("exit status {}", exit_code)
            } else {
                stderr.trim().to_string()
            };
            return Err(OperationError::new(format!("'{}' failed: {}", command, detail)));
        }
        Ok(stdout)
    }
}

impl Operation for SshOperation {
    fn invoke(&self, call: &OperationCall<'_>) -> Result<String, OperationError> {
        let commands = commands_for(call)?;
        let session = self.connect(call)?;
        debug!(host = call.host, commands = commands.len(), "ssh session ready");

        let labelled = commands.len() > 1;
        let mut out = String::new();
        for command in &commands {
            if labelled {
                out.push_str(&format!("> {}\n", command));
            }
            let text = self.exec(&session, command)?;
            out.push_str(&text);
            if !text.ends_with('\n') {
                out.push('\n');
            }
        }

        session.disconnect(None, "netpanel done", None).ok();
        Ok(out)
    }
}

/// The device commands one call expands to
fn commands_for(call: &OperationCall<'_>) -> Result<Vec<String>, OperationError> {
    let fixed = |list: &[&str]| -> Vec<String> { list.iter().map(|c| c.to_string()).collect() };

    match (call.kind, call.args) {
        (OperationKind::DeviceInfo, _) => Ok(fixed(DEVICE_INFO)),
        (OperationKind::HealthCheck, _) => Ok(fixed(HEALTH_CHECK)),
        (OperationKind::InterfaceErrors, _) => Ok(fixed(INTERFACE_ERRORS)),
        (_, OperationArgs::RunCommands { commands, format, .. }) => {
            let suffix = match format {
                ReplyFormat::Xml => " | display xml",
                ReplyFormat::Text => "",
            };
            Ok(split_commands(commands)
                .map(|c| format!("{}{}", c, suffix))
                .collect())
        }
        (_, OperationArgs::ShellCommand { command }) => Ok(split_commands(command)
            .map(|c| format!("start shell command \"{}\"", c.replace('"', "\\\"")))
            .collect()),
        (kind, _) => Err(OperationError::new(format!(
            "'{}' is not available over SSH; use the process backend",
            kind.label()
        ))),
    }
}

/// Split comma or newline separated commands, dropping blanks
fn split_commands(text: &str) -> impl Iterator<Item = &str> {
    text.split([',', '\n'])
        .map(str::trim)
        .filter(|c| !c.is_empty())
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

fn connection_hint(e: &std::io::Error) -> &'static str {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            " (ensure SSH service is running on the target host)"
        }
        std::io::ErrorKind::TimedOut => " (check network connectivity and firewall rules)",
        _ => "",
    }
}
