// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote host transports.
//!
//! A transport can upload a file to a remote host, and run a command there
//! while feeding it standard input. Two transports are available:
//!
//! - [`Ssh2Transport`]: speaks SSH in-process through libssh2. The password
//!   never leaves the process.
//! - [`SshpassTransport`]: drives the system `ssh` and `scp` binaries through
//!   `sshpass -e`. The password is handed to `sshpass` through the `SSHPASS`
//!   environment variable of the child process, never through its arguments.
//!
//! Both accept unknown host keys on first use, and refuse changed ones.

use crate::{
    config::{TransportKind, TransportSettings},
    path::known_hosts_path,
    shell,
    target::TargetConfig,
};

use secrecy::{ExposeSecret, SecretString};
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::{
    fs::{read, OpenOptions},
    io::{ErrorKind, Read, Write},
    net::TcpStream,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread::sleep,
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Layer of indirection for remote host access.
pub trait Transport {
    /// Upload local file to remote path with given permission bits.
    fn upload(&mut self, local: &Path, remote: &str, mode: i32) -> Result<()>;

    /// Run command on remote host, feeding `stdin` to it.
    ///
    /// Remote output is logged line by line as it arrives. Standard output is
    /// also captured and returned.
    fn execute(&mut self, command: &str, stdin: &[u8]) -> Result<RemoteOutput>;
}

/// Open transports to targets.
pub trait Connector {
    /// Open authenticated transport to target.
    fn connect(&self, target: &TargetConfig) -> Result<Box<dyn Transport>>;
}

impl<C> Connector for &C
where
    C: Connector + ?Sized,
{
    fn connect(&self, target: &TargetConfig) -> Result<Box<dyn Transport>> {
        (**self).connect(target)
    }
}

impl Connector for TransportSettings {
    fn connect(&self, target: &TargetConfig) -> Result<Box<dyn Transport>> {
        match self.kind {
            TransportKind::Libssh2 => Ok(Box::new(Ssh2Transport::connect(
                target,
                self.port,
                known_hosts_path()?,
            )?)),
            TransportKind::Sshpass => Ok(Box::new(SshpassTransport::new(target, self.port))),
        }
    }
}

/// Result of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    /// Everything the command wrote to standard output.
    pub stdout: String,

    /// Exit status of the command.
    pub exit_status: i32,
}

/// In-process SSH transport through libssh2.
pub struct Ssh2Transport {
    session: Session,
}

impl Ssh2Transport {
    /// Connect and authenticate to target.
    ///
    /// Host key is checked against the OpenSSH known hosts file at
    /// `known_hosts`. Unknown keys are appended to it.
    ///
    /// # Errors
    ///
    /// - Return [`TransportError::Connect`] if TCP connection fails.
    /// - Return [`TransportError::HostKeyMismatch`] if host key changed.
    /// - Return [`TransportError::Authentication`] if password is refused.
    /// - Return [`TransportError::Ssh`] if libssh2 operations fail.
    #[instrument(skip(target, known_hosts), level = "debug")]
    pub fn connect(target: &TargetConfig, port: u16, known_hosts: PathBuf) -> Result<Self> {
        info!("connect to {}@{}:{port}", target.user, target.host);
        let tcp = TcpStream::connect((target.host.as_str(), port)).map_err(|source| {
            TransportError::Connect {
                source,
                host: target.host.clone(),
                port,
            }
        })?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        verify_host_key(&session, &target.host, port, &known_hosts)?;

        session
            .userauth_password(&target.user, target.password.expose_secret())
            .map_err(|source| TransportError::Authentication {
                source,
                user: target.user.clone(),
                host: target.host.clone(),
            })?;

        Ok(Self { session })
    }
}

impl Transport for Ssh2Transport {
    #[instrument(skip(self, local), level = "debug")]
    fn upload(&mut self, local: &Path, remote: &str, mode: i32) -> Result<()> {
        let bytes = read(local).map_err(|source| TransportError::ReadLocal {
            source,
            path: local.into(),
        })?;

        info!("upload {:?} to {remote}", local.display());
        let mut channel = self
            .session
            .scp_send(Path::new(remote), mode, bytes.len() as u64, None)?;
        channel.write_all(&bytes)?;
        channel.send_eof()?;
        channel.wait_eof()?;
        channel.close()?;
        channel.wait_close()?;

        Ok(())
    }

    #[instrument(skip(self, stdin), level = "debug")]
    fn execute(&mut self, command: &str, stdin: &[u8]) -> Result<RemoteOutput> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;
        channel.write_all(stdin)?;
        channel.send_eof()?;

        // INVARIANT: Poll both streams without blocking, so neither can stall
        // the other by filling its window.
        let mut stdout = LineLog::new(Stream::Stdout);
        self.session.set_blocking(false);
        let pumped = pump(&mut channel, &mut stdout);
        self.session.set_blocking(true);
        pumped?;

        channel.wait_close()?;
        let signal = channel.exit_signal()?.exit_signal;
        let exit_status = remote_exit(channel.exit_status()?, signal)?;
        debug!("remote command exited with {exit_status}");

        Ok(RemoteOutput {
            stdout: stdout.captured,
            exit_status,
        })
    }
}

/// Combine exit status and exit signal reported by the remote host.
///
/// libssh2 reports status 0 when the remote host sent no exit status, which
/// is what happens when the remote process is killed by a signal.
fn remote_exit(status: i32, signal: Option<String>) -> Result<i32> {
    match signal {
        Some(signal) => Err(TransportError::Signaled { signal }),
        None => Ok(status),
    }
}

/// Check host key of session, trusting it on first use.
fn verify_host_key(session: &Session, host: &str, port: u16, path: &Path) -> Result<()> {
    let mut known_hosts = session.known_hosts()?;
    if path.exists() {
        if let Err(error) = known_hosts.read_file(path, KnownHostFileKind::OpenSSH) {
            warn!("cannot fully parse {:?}: {error}", path.display());
        }
    }

    let (key, key_type) = session.host_key().ok_or(TransportError::NoHostKey)?;
    match known_hosts.check_port(host, port, key) {
        CheckResult::Match => {
            debug!("host key of {host} is known");
            Ok(())
        }
        CheckResult::NotFound => {
            let entry = if port == 22 {
                host.to_string()
            } else {
                format!("[{host}]:{port}")
            };

            known_hosts.add(&entry, key, "", key_type.into())?;
            let added = known_hosts
                .iter()?
                .into_iter()
                .rev()
                .find(|known| known.name() == Some(entry.as_str()))
                .ok_or(TransportError::NoHostKey)?;
            let line = known_hosts.write_string(&added, KnownHostFileKind::OpenSSH)?;

            let write_err = |source| TransportError::KnownHosts {
                source,
                path: path.into(),
            };
            if let Some(parent) = path.parent() {
                mkdirp::mkdirp(parent).map_err(write_err)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(write_err)?;
            writeln!(file, "{}", line.trim_end()).map_err(write_err)?;

            warn!("permanently added {entry} to {:?}", path.display());
            Ok(())
        }
        CheckResult::Mismatch => Err(TransportError::HostKeyMismatch { host: host.into() }),
        CheckResult::Failure => Err(TransportError::HostKeyCheck { host: host.into() }),
    }
}

fn pump(channel: &mut ssh2::Channel, stdout: &mut LineLog) -> Result<()> {
    let mut stderr = LineLog::new(Stream::Stderr);
    let mut buffer = [0u8; 8192];

    loop {
        let mut progressed = drain(channel, &mut buffer, stdout)?;
        progressed |= drain(&mut channel.stderr(), &mut buffer, &mut stderr)?;

        if channel.eof() {
            break;
        }

        if !progressed {
            sleep(Duration::from_millis(30));
        }
    }

    // INVARIANT: Pick up anything that arrived together with EOF.
    drain(channel, &mut buffer, stdout)?;
    drain(&mut channel.stderr(), &mut buffer, &mut stderr)?;
    stdout.flush();
    stderr.flush();

    Ok(())
}

fn drain(reader: &mut impl Read, buffer: &mut [u8], log: &mut LineLog) -> Result<bool> {
    let mut progressed = false;
    loop {
        match reader.read(buffer) {
            Ok(0) => return Ok(progressed),
            Ok(n) => {
                progressed = true;
                log.push_bytes(&buffer[..n]);
            }
            Err(error) if error.kind() == ErrorKind::WouldBlock => return Ok(progressed),
            Err(error) => return Err(error.into()),
        }
    }
}

/// Transport driving system `ssh` and `scp` through `sshpass`.
pub struct SshpassTransport {
    destination: String,
    port: u16,
    password: SecretString,
}

impl SshpassTransport {
    /// Construct new sshpass transport. No connection is made until used.
    pub fn new(target: &TargetConfig, port: u16) -> Self {
        Self {
            destination: format!("{}@{}", target.user, target.host),
            port,
            password: SecretString::from(target.password.expose_secret().to_owned()),
        }
    }

    fn command(&self, program: &str, port_flag: &str) -> Command {
        let mut command = Command::new("sshpass");
        command
            .arg("-e")
            .arg(program)
            .arg(port_flag)
            .arg(self.port.to_string())
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .env("SSHPASS", self.password.expose_secret());
        command
    }
}

impl Transport for SshpassTransport {
    #[instrument(skip(self, local), level = "debug")]
    fn upload(&mut self, local: &Path, remote: &str, mode: i32) -> Result<()> {
        info!("upload {:?} to {remote}", local.display());
        let status = self
            .command("scp", "-P")
            .arg(local)
            .arg(format!("{}:{remote}", self.destination))
            .status()
            .map_err(|source| TransportError::Spawn {
                source,
                program: "scp",
            })?;

        if !status.success() {
            return Err(TransportError::CommandFailed {
                program: "scp",
                status: status.code().unwrap_or(255),
            });
        }

        let chmod = format!("chmod {mode:o} {}", shell::quote(remote));
        let output = self.execute(&chmod, &[])?;
        if output.exit_status != 0 {
            return Err(TransportError::CommandFailed {
                program: "chmod",
                status: output.exit_status,
            });
        }

        Ok(())
    }

    #[instrument(skip(self, stdin), level = "debug")]
    fn execute(&mut self, command: &str, stdin: &[u8]) -> Result<RemoteOutput> {
        let spawn_err = |source| TransportError::Spawn {
            source,
            program: "ssh",
        };

        // INVARIANT: Remote stderr goes straight to the terminal, so only
        // stdout needs draining here.
        let mut child = self
            .command("ssh", "-p")
            .arg(&self.destination)
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut input) = child.stdin.take() {
            input.write_all(stdin)?;
        }

        let mut stdout = LineLog::new(Stream::Stdout);
        if let Some(mut output) = child.stdout.take() {
            let mut buffer = [0u8; 8192];
            drain(&mut output, &mut buffer, &mut stdout)?;
        }
        stdout.flush();

        let status = child.wait()?;

        Ok(RemoteOutput {
            stdout: stdout.captured,
            exit_status: status.code().unwrap_or(255),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Split remote output into lines and log them as they complete.
#[derive(Debug)]
struct LineLog {
    stream: Stream,
    pending: Vec<u8>,
    partial: String,
    captured: String,
}

impl LineLog {
    fn new(stream: Stream) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            partial: String::new(),
            captured: String::new(),
        }
    }

    fn push(&mut self, chunk: &str) {
        if self.stream == Stream::Stdout {
            self.captured.push_str(chunk);
        }

        self.partial.push_str(chunk);
        while let Some(pos) = self.partial.find('\n') {
            let line = self.partial[..pos].trim_end().to_string();
            self.partial.drain(..=pos);
            self.emit(&line);
        }
    }

    /// Push raw bytes, holding back a UTF-8 sequence cut off at the end.
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let split = self.pending.len() - incomplete_tail(&self.pending);
        let rest = self.pending.split_off(split);
        let chunk = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        self.push(&chunk);
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.push(&String::from_utf8_lossy(&pending));
        }

        let line = std::mem::take(&mut self.partial);
        self.emit(line.trim_end());
    }

    fn emit(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        match self.stream {
            Stream::Stdout => info!("remote: {line}"),
            Stream::Stderr => warn!("remote: {line}"),
        }
    }
}

/// Length of an unfinished UTF-8 sequence at the end of `bytes`.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }

        let width = match byte {
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }

    0
}

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// TCP connection to remote host failed.
    #[error("failed to connect to {host}:{port}")]
    Connect {
        #[source]
        source: std::io::Error,
        host: String,
        port: u16,
    },

    /// Remote host refused the password.
    #[error("authentication as {user} on {host} failed")]
    Authentication {
        #[source]
        source: ssh2::Error,
        user: String,
        host: String,
    },

    /// Remote host presented no host key.
    #[error("remote host presented no usable host key")]
    NoHostKey,

    /// Host key differs from the recorded one.
    #[error("host key of {host} does not match known hosts entry")]
    HostKeyMismatch { host: String },

    /// Host key could not be checked.
    #[error("failed to check host key of {host}")]
    HostKeyCheck { host: String },

    /// Known hosts file could not be updated.
    #[error("failed to update known hosts file {path:?}")]
    KnownHosts {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Local file to upload could not be read.
    #[error("failed to read {path:?}")]
    ReadLocal {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// External program could not be started.
    #[error("failed to run {program}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: &'static str,
    },

    /// Remote command was killed by a signal.
    #[error("remote command was killed by signal {signal}")]
    Signaled { signal: String },

    /// External program exited with failure.
    #[error("{program} exited with status {status}")]
    CommandFailed { program: &'static str, status: i32 },

    /// Operations from libssh2 fail.
    #[error(transparent)]
    Ssh(#[from] ssh2::Error),

    /// Stream I/O fails.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Known hosts file location cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] crate::path::NoWayHome),
}

/// Friendly result alias :3
pub type Result<T, E = TransportError> = std::result::Result<T, E>;
