// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote provisioning.
//!
//! Provisioning a target means uploading its requirements script to the
//! remote host, then running it there in remote mode. The sudo passphrase
//! reaches the script through the `PROVISOR_SUDO_PASS` environment variable,
//! which is exported by a tiny bootstrap fed to `bash -s` over standard
//! input. That way the passphrase never shows up in an argument list on
//! either end.

pub mod status;
pub mod transport;

use crate::{
    remote::{
        status::ServiceStatus,
        transport::{Connector, TransportError},
    },
    shell,
    target::{
        script::{RUN_REMOTE_MARKER, SUDO_PASS_VAR},
        TargetConfig, TargetName,
    },
};

use secrecy::ExposeSecret;
use std::path::Path;
use tracing::{info, instrument};
use zeroize::Zeroizing;

/// Command that receives the bootstrap on standard input.
pub const REMOTE_SHELL: &str = "bash -s";

/// Run requirements scripts on remote hosts.
#[derive(Debug, Clone)]
pub struct Provisioner<C>
where
    C: Connector,
{
    connector: C,
    remote_dir: String,
}

impl<C> Provisioner<C>
where
    C: Connector,
{
    /// Construct new provisioner uploading scripts into `remote_dir`.
    pub fn new(connector: C, remote_dir: impl Into<String>) -> Self {
        Self {
            connector,
            remote_dir: remote_dir.into(),
        }
    }

    /// Remote path a target's requirements script is uploaded to.
    pub fn remote_script_path(&self, name: &TargetName) -> String {
        format!(
            "{}/{name}-requirements.sh",
            self.remote_dir.trim_end_matches('/')
        )
    }

    /// Upload and run requirements script on target.
    ///
    /// There is no retry. The first failure ends provisioning.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Transport`] if connecting, uploading, or
    ///   running fails.
    /// - Return [`ProvisionError::RemoteExit`] if the script exits non-zero.
    #[instrument(skip(self, config, script), level = "debug")]
    pub fn provision(
        &self,
        name: &TargetName,
        config: &TargetConfig,
        script: &Path,
    ) -> Result<ProvisionReport> {
        let remote_path = self.remote_script_path(name);
        let mut transport = self.connector.connect(config)?;
        transport.upload(script, &remote_path, 0o755)?;

        info!("run {remote_path} on {}", config.host);
        let bootstrap = bootstrap(config, &remote_path);
        let output = transport.execute(REMOTE_SHELL, bootstrap.as_bytes())?;
        if output.exit_status != 0 {
            return Err(ProvisionError::RemoteExit {
                host: config.host.clone(),
                status: output.exit_status,
            });
        }

        let status = ServiceStatus::scan(&output.stdout);
        info!("provisioned {name} on {}", config.host);

        Ok(ProvisionReport {
            stdout: output.stdout,
            status,
        })
    }
}

/// Outcome of a successful provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Captured standard output of the requirements script.
    pub stdout: String,

    /// Service state reported by the script, if it reported one.
    pub status: ServiceStatus,
}

/// Build the standard input fed to the remote shell.
fn bootstrap(config: &TargetConfig, remote_path: &str) -> Zeroizing<String> {
    Zeroizing::new(format!(
        "export {SUDO_PASS_VAR}={}\nexec bash {} {RUN_REMOTE_MARKER}\n",
        shell::quote(config.password.expose_secret()),
        shell::quote(remote_path),
    ))
}

/// Provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Remote host could not be reached or driven.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Requirements script failed on the remote host.
    #[error("requirements script on {host} exited with status {status}")]
    RemoteExit { host: String, status: i32 },
}

/// Friendly result alias :3
type Result<T, E = ProvisionError> = std::result::Result<T, E>;
