// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local preflight checks.
//!
//! Before anything touches the mirror or the network, Provisor makes sure it
//! is not running as superuser, that the mirror repository exists, and that
//! any helper utility the transport needs is installed.

use crate::prompt::Prompter;

use git2::Repository;
use nix::unistd::Uid;
use std::{
    ffi::OsStr,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{debug, info, instrument, warn};

/// Preflight checks of the local machine.
#[derive(Debug, Clone, Copy)]
pub struct Preflight {
    euid: Uid,
}

impl Preflight {
    /// Construct preflight for the current process.
    pub fn current() -> Self {
        Self {
            euid: Uid::effective(),
        }
    }

    /// Construct preflight for a given effective user.
    pub fn with_euid(euid: Uid) -> Self {
        Self { euid }
    }

    /// Refuse to run as superuser.
    ///
    /// # Errors
    ///
    /// - Return [`PreflightError::Superuser`] if effective user is root.
    pub fn ensure_unprivileged(&self) -> Result<()> {
        if self.euid.is_root() {
            return Err(PreflightError::Superuser);
        }

        Ok(())
    }

    /// Make sure mirror repository exists and has a work tree.
    ///
    /// # Errors
    ///
    /// - Return [`PreflightError::MirrorMissing`] if path does not exist.
    /// - Return [`PreflightError::NotARepository`] if path is not a git
    ///   repository.
    /// - Return [`PreflightError::BareMirror`] if repository is bare.
    #[instrument(skip(self, path), level = "debug")]
    pub fn ensure_mirror(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(PreflightError::MirrorMissing(path.into()));
        }

        let repository =
            Repository::open(path).map_err(|source| PreflightError::NotARepository {
                source,
                path: path.into(),
            })?;

        if repository.is_bare() {
            return Err(PreflightError::BareMirror(path.into()));
        }

        debug!("mirror repository {:?} is usable", path.display());
        Ok(())
    }

    /// Make sure helper utility is installed, offering to install it.
    ///
    /// Installation goes through `sudo apt-get install`, and only happens
    /// after the operator agrees to it.
    ///
    /// # Errors
    ///
    /// - Return [`PreflightError::MissingDependency`] if utility is absent,
    ///   and operator declines or installation does not provide it.
    /// - Return [`PreflightError::Install`] if installation fails.
    /// - Return [`PreflightError::Prompt`] if confirmation prompt fails.
    #[instrument(skip(self, prompter), level = "debug")]
    pub fn ensure_utility(&self, utility: &str, prompter: &mut impl Prompter) -> Result<()> {
        if is_installed(utility) {
            debug!("{utility} is installed");
            return Ok(());
        }

        warn!("{utility} is not installed");
        let question = format!("Install {utility} with sudo apt-get?");
        if !prompter.confirm(&question, false)? {
            return Err(PreflightError::MissingDependency(utility.into()));
        }

        info!("install {utility}");
        syscall_interactive("sudo", ["apt-get", "install", "-y", utility])?;

        if !is_installed(utility) {
            return Err(PreflightError::MissingDependency(utility.into()));
        }

        Ok(())
    }
}

/// Check if program can be spawned at all.
fn is_installed(program: &str) -> bool {
    match Command::new(program)
        .arg("-V")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(_) => true,
        Err(error) if error.kind() == ErrorKind::NotFound => false,
        Err(error) => {
            debug!("cannot run {program}: {error}");
            false
        }
    }
}

fn syscall_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<()> {
    let status = Command::new(cmd.as_ref())
        .args(args)
        .spawn()
        .map_err(PreflightError::Install)?
        .wait()
        .map_err(PreflightError::Install)?;
    if !status.success() {
        return Err(PreflightError::Install(std::io::Error::other(format!(
            "command {:?} failed",
            cmd.as_ref()
        ))));
    }

    Ok(())
}

/// Preflight error types.
#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    /// Running as superuser.
    #[error("refusing to run as root, run as a regular user with sudo rights instead")]
    Superuser,

    /// Mirror directory does not exist.
    #[error("mirror repository {0:?} does not exist")]
    MirrorMissing(PathBuf),

    /// Mirror directory is not a git repository.
    #[error("{path:?} is not a git repository")]
    NotARepository {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// Mirror repository has no work tree.
    #[error("mirror repository {0:?} is bare")]
    BareMirror(PathBuf),

    /// Helper utility is missing.
    #[error("required utility {0} is not installed")]
    MissingDependency(String),

    /// Helper utility installation failed.
    #[error("failed to install helper utility")]
    Install(#[source] std::io::Error),

    /// Operator input failed.
    #[error(transparent)]
    Prompt(#[from] crate::prompt::PromptError),
}

/// Friendly result alias :3
type Result<T, E = PreflightError> = std::result::Result<T, E>;
