// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning targets.
//!
//! A __target__ is one remote host playing one role, e.g., "web" or
//! "jenkins". Each target owns a __managed folder__ in the mirror repository
//! named after the target. The managed folder holds three files:
//!
//! - `config.sh`: the target's credential record. Never committed.
//! - `requirements.sh`: script that provisions the remote host.
//! - `.gitignore`: keeps `config.sh` out of the mirror's history.
//!
//! # Credential Record
//!
//! The credential record is a shell-sourceable key-value file holding the
//! remote host, remote user, and password of the target. It is created
//! interactively on first use, and loaded as-is on every run after that. The
//! password doubles as the sudo passphrase on the remote host.

pub mod folder;
pub mod script;

use crate::{prompt::Prompter, shell};

use secrecy::{ExposeSecret, SecretString};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

/// File name of the credential record inside a managed folder.
pub const CONFIG_FILE_NAME: &str = "config.sh";

/// Validated target name.
///
/// Target names double as folder names inside the mirror, so they must be a
/// single normal path component made of ASCII letters, digits, `.`, `_`, and
/// `-`, not starting with `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetName(String);

impl TargetName {
    /// Target name as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for TargetName {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        // INVARIANT: Only `[A-Za-z0-9._-]`, never starting with `.`.
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'));
        if !valid {
            return Err(ConfigError::InvalidTargetName(name.into()));
        }

        Ok(Self(name.into()))
    }
}

impl Display for TargetName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl AsRef<Path> for TargetName {
    fn as_ref(&self) -> &Path {
        Path::new(self.as_str())
    }
}

/// Credential record of a target.
#[derive(Debug)]
pub struct TargetConfig {
    /// Remote host name or address.
    pub host: String,

    /// Remote user to log in as.
    pub user: String,

    /// Login password, also used as the sudo passphrase.
    pub password: SecretString,
}

impl TargetConfig {
    /// Construct new credential record.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::EmptyField`] if any field is empty.
    pub fn try_new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: SecretString,
    ) -> Result<Self> {
        let config = Self {
            host: host.into(),
            user: user.into(),
            password,
        };

        if config.host.is_empty() {
            return Err(ConfigError::EmptyField("HOST"));
        }

        if config.user.is_empty() {
            return Err(ConfigError::EmptyField("USER"));
        }

        if config.password.expose_secret().is_empty() {
            return Err(ConfigError::EmptyField("PASSWORD"));
        }

        Ok(config)
    }

    /// Parse shell-sourceable credential record.
    ///
    /// Blank lines, comments, an optional `export` prefix, blanks around the
    /// `=` sign, and unknown keys are tolerated.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Malformed`] if a line is not a key-value pair.
    /// - Return [`ConfigError::EmptyField`] if a field is missing or empty.
    pub fn parse(data: &str) -> Result<Self> {
        let mut host = String::new();
        let mut user = String::new();
        let mut password = Zeroizing::new(String::new());

        for (number, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line
                .split_once('=')
                .ok_or(ConfigError::Malformed { line: number + 1 })?;
            let value = Zeroizing::new(
                shell::unquote(value.trim_start())
                    .map_err(|_| ConfigError::Malformed { line: number + 1 })?,
            );

            match key.trim() {
                "HOST" => host = value.to_string(),
                "USER" => user = value.to_string(),
                "PASSWORD" => password = value,
                other => debug!("ignore unknown key {other:?}"),
            }
        }

        Self::try_new(host, user, SecretString::from(password.to_string()))
    }

    /// Render credential record in its shell-sourceable form.
    pub fn render(&self) -> Zeroizing<String> {
        Zeroizing::new(format!(
            "HOST={}\nUSER={}\nPASSWORD={}\n",
            shell::quote(&self.host),
            shell::quote(&self.user),
            shell::quote(self.password.expose_secret()),
        ))
    }
}

/// Load or interactively create credential records.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Construct new config store for a managed folder.
    pub fn new(folder: impl AsRef<Path>) -> Self {
        Self {
            path: folder.as_ref().join(CONFIG_FILE_NAME),
        }
    }

    /// Path to the credential record.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Check if credential record exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load existing credential record.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Malformed`] or [`ConfigError::EmptyField`] if
    ///   the record is incomplete.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&self) -> Result<TargetConfig> {
        debug!("load credential record {:?}", self.path.display());
        let data = Zeroizing::new(read_to_string(&self.path).map_err(|source| {
            ConfigError::Read {
                source,
                path: self.path.clone(),
            }
        })?);

        TargetConfig::parse(&data)
    }

    /// Load credential record, or prompt for it and save it if missing.
    ///
    /// An existing record is reused verbatim without asking anything.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Prompt`] if prompting fails.
    /// - Return [`ConfigError::EmptyField`] if an answer is empty.
    /// - Return [`ConfigError::Write`] if new record cannot be saved.
    pub fn load_or_create(&self, prompter: &mut impl Prompter) -> Result<TargetConfig> {
        if self.exists() {
            info!("reuse credential record {:?}", self.path.display());
            return self.load();
        }

        info!("create credential record {:?}", self.path.display());
        let host = prompter.text("Remote host")?;
        let user = prompter.text("Remote user")?;
        let password = prompter.password("Remote password")?;
        let config = TargetConfig::try_new(host.trim(), user.trim(), password)?;
        self.save(&config)?;

        Ok(config)
    }

    fn save(&self, config: &TargetConfig) -> Result<()> {
        let write_err = |source| ConfigError::Write {
            source,
            path: self.path.clone(),
        };

        if let Some(parent) = self.path.parent() {
            mkdirp::mkdirp(parent).map_err(write_err)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);

        // INVARIANT: Credential record is readable by its owner only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path).map_err(write_err)?;
        file.write_all(config.render().as_bytes()).map_err(write_err)?;

        Ok(())
    }
}

/// Credential record error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Target name cannot be used as a folder name.
    #[error("invalid target name {0:?}")]
    InvalidTargetName(String),

    /// Required field is missing or empty.
    #[error("credential record field {0} is empty")]
    EmptyField(&'static str),

    /// Line is not a shell assignment.
    #[error("credential record line {line} is not a KEY=value pair")]
    Malformed { line: usize },

    /// Failed to read credential record.
    #[error("failed to read credential record {path:?}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to write credential record.
    #[error("failed to write credential record {path:?}")]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Operator input failed.
    #[error(transparent)]
    Prompt(#[from] crate::prompt::PromptError),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
