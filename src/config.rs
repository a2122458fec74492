// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Settings layout.
//!
//! Specify the layout of the optional settings file that tells Provisor where
//! the mirror repository lives, how to publish into it, and how to reach
//! remote hosts. Every field has a default, so a missing settings file is the
//! same as an empty one.
//!
//! # General Layout
//!
//! ```toml
//! mirror = "~/vm-mirror"
//! remote = "origin"
//! primary_branch = "main"
//! fallback_branch = "master"
//!
//! [transport]
//! kind = "libssh2"
//! port = 22
//! remote_dir = "/tmp"
//!
//! [target.web]
//! packages = ["nginx"]
//! stage_all = false
//! ```

use crate::path::{default_mirror_dir, NoWayHome};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Provisor settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Path to mirror repository. Defaults to `$HOME/vm-mirror`.
    pub mirror: Option<PathBuf>,

    /// Name of remote to publish to.
    pub remote: String,

    /// Branch to push to first.
    pub primary_branch: String,

    /// Branch to push to if pushing to the primary branch fails.
    pub fallback_branch: String,

    /// How to reach remote hosts.
    pub transport: TransportSettings,

    /// Per-target settings keyed by target name.
    #[serde(rename = "target")]
    pub targets: BTreeMap<String, TargetSettings>,
}

impl Settings {
    /// Load settings from file at target path.
    ///
    /// A missing file yields the default settings.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Read`] if settings file exists but cannot
    ///   be read.
    /// - Return [`SettingsError::Deserialize`] if settings file is malformed.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no settings at {:?}, using defaults", path.display());
            return Ok(Self::default());
        }

        debug!("load settings from {:?}", path.display());
        read_to_string(path)
            .map_err(|source| SettingsError::Read {
                source,
                path: path.into(),
            })?
            .parse()
    }

    /// Absolute path to mirror repository.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::NoWayHome`] if default path is needed but
    ///   the home directory cannot be determined.
    pub fn mirror_dir(&self) -> Result<PathBuf> {
        match &self.mirror {
            Some(path) => Ok(path.clone()),
            None => Ok(default_mirror_dir()?),
        }
    }

    /// Settings of a given target, or the defaults if it has no entry.
    pub fn target(&self, name: &str) -> TargetSettings {
        self.targets.get(name).cloned().unwrap_or_default()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mirror: None,
            remote: "origin".into(),
            primary_branch: "main".into(),
            fallback_branch: "master".into(),
            transport: TransportSettings::default(),
            targets: BTreeMap::new(),
        }
    }
}

impl FromStr for Settings {
    type Err = SettingsError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(SettingsError::Deserialize)?;

        // INVARIANT: Perform shell expansion on mirror path.
        if let Some(mirror) = settings.mirror.take() {
            let expanded = shellexpand::full(mirror.to_string_lossy().as_ref())
                .map_err(SettingsError::ShellExpansion)?
                .into_owned();
            settings.mirror = Some(PathBuf::from(expanded));
        }

        Ok(settings)
    }
}

/// Remote host transport settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportSettings {
    /// Transport implementation.
    pub kind: TransportKind,

    /// SSH port of remote hosts.
    pub port: u16,

    /// Remote directory to upload requirements scripts into.
    pub remote_dir: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            port: 22,
            remote_dir: "/tmp".into(),
        }
    }
}

/// Available transport implementations.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process SSH through libssh2.
    #[default]
    Libssh2,

    /// External `ssh` and `scp` driven through `sshpass`.
    Sshpass,
}

impl TransportKind {
    /// Name of external helper utility this transport needs, if any.
    pub fn helper_utility(&self) -> Option<&'static str> {
        match self {
            Self::Libssh2 => None,
            Self::Sshpass => Some("sshpass"),
        }
    }
}

/// Per-target settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetSettings {
    /// Extra apt packages to install on the target.
    pub packages: Vec<String>,

    /// Stage the entire mirror instead of just the target's folder.
    pub stage_all: bool,
}

/// Settings error types.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Failed to read settings file.
    #[error("failed to read settings file {path:?}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize settings.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to perform shell expansion on settings.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Default path needed but home directory is unknown.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

/// Friendly result alias :3
type Result<T, E = SettingsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("BLAH", "/home/blah")])]
    fn deserialize_settings() -> anyhow::Result<()> {
        let result: Settings = r#"
            mirror = "$BLAH/mirror"
            remote = "upstream"
            primary_branch = "trunk"
            fallback_branch = "main"

            [transport]
            kind = "sshpass"
            port = 2222
            remote_dir = "/var/tmp"

            [target.web]
            packages = ["nginx", "curl"]
            stage_all = true
        "#
        .parse()?;

        let expect = Settings {
            mirror: Some(PathBuf::from("/home/blah/mirror")),
            remote: "upstream".into(),
            primary_branch: "trunk".into(),
            fallback_branch: "main".into(),
            transport: TransportSettings {
                kind: TransportKind::Sshpass,
                port: 2222,
                remote_dir: "/var/tmp".into(),
            },
            targets: BTreeMap::from([(
                "web".to_string(),
                TargetSettings {
                    packages: vec!["nginx".into(), "curl".into()],
                    stage_all: true,
                },
            )]),
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn empty_settings_use_defaults() -> anyhow::Result<()> {
        let result: Settings = "".parse()?;
        assert_eq!(result, Settings::default());
        assert_eq!(result.transport.port, 22);
        assert_eq!(result.transport.kind, TransportKind::Libssh2);
        assert_eq!(result.target("anything"), TargetSettings::default());

        Ok(())
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result = "mirorr = \"/tmp\"".parse::<Settings>();
        assert!(matches!(result, Err(SettingsError::Deserialize(_))));
    }

    #[sealed_test]
    fn missing_settings_file_yields_defaults() -> anyhow::Result<()> {
        let result = Settings::load("does-not-exist.toml")?;
        assert_eq!(result, Settings::default());

        Ok(())
    }
}
