// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Managed folder layout.
//!
//! Every target owns one folder at the top-level of the mirror repository.
//! This module creates that folder, keeps its ignore list honest, and writes
//! the requirements script into it.

use crate::{
    prompt::Prompter,
    target::{ConfigStore, TargetName, CONFIG_FILE_NAME},
};

use std::{
    fs::{read_to_string, write, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// File name of the requirements script inside a managed folder.
pub const SCRIPT_FILE_NAME: &str = "requirements.sh";

/// File name of the ignore list inside a managed folder.
pub const IGNORE_FILE_NAME: &str = ".gitignore";

/// Folder of a target inside the mirror repository.
#[derive(Debug, Clone)]
pub struct ManagedFolder {
    mirror: PathBuf,
    name: TargetName,
}

impl ManagedFolder {
    /// Construct new managed folder handle. Nothing is touched on disk.
    pub fn new(mirror: impl Into<PathBuf>, name: TargetName) -> Self {
        Self {
            mirror: mirror.into(),
            name,
        }
    }

    /// Name of the target owning this folder.
    pub fn name(&self) -> &TargetName {
        &self.name
    }

    /// Absolute path of the folder.
    pub fn path(&self) -> PathBuf {
        self.mirror.join(&self.name)
    }

    /// Path of the folder relative to the mirror's work tree.
    pub fn relative_path(&self) -> &Path {
        self.name.as_ref()
    }

    /// Path to the requirements script.
    pub fn script_path(&self) -> PathBuf {
        self.path().join(SCRIPT_FILE_NAME)
    }

    /// Path to the credential record relative to the mirror's work tree.
    pub fn relative_config_path(&self) -> PathBuf {
        self.relative_path().join(CONFIG_FILE_NAME)
    }

    /// Credential record store of this folder.
    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::new(self.path())
    }

    /// Create folder if it does not exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`FolderError::Io`] if folder cannot be created.
    pub fn create(&self) -> Result<()> {
        let path = self.path();
        if let Some(created) = mkdirp::mkdirp(&path).map_err(|source| FolderError::Io {
            source,
            path: path.clone(),
        })? {
            info!("create managed folder {:?}", created.display());
        }

        Ok(())
    }

    /// Make sure the credential record is listed in the folder's ignore list.
    ///
    /// The file name is appended as its own line when no line matches it
    /// verbatim. Existing lines are left alone. Returns whether the ignore
    /// list was changed.
    ///
    /// # Errors
    ///
    /// - Return [`FolderError::Io`] if ignore list cannot be read or written.
    #[instrument(skip(self), level = "debug")]
    pub fn ensure_ignored(&self) -> Result<bool> {
        let path = self.path().join(IGNORE_FILE_NAME);
        let io_err = |source| FolderError::Io {
            source,
            path: path.clone(),
        };

        let contents = if path.exists() {
            read_to_string(&path).map_err(io_err)?
        } else {
            String::new()
        };

        if contents
            .lines()
            .any(|line| line.trim_end_matches('\r') == CONFIG_FILE_NAME)
        {
            debug!("{CONFIG_FILE_NAME} already ignored in {:?}", path.display());
            return Ok(false);
        }

        let mut entry = String::new();
        if !contents.is_empty() && !contents.ends_with('\n') {
            entry.push('\n');
        }
        entry.push_str(CONFIG_FILE_NAME);
        entry.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        file.write_all(entry.as_bytes()).map_err(io_err)?;
        info!("add {CONFIG_FILE_NAME} to {:?}", path.display());

        Ok(true)
    }

    /// Write requirements script into folder.
    ///
    /// A missing script is written right away. An identical script is left
    /// untouched. A different script is only replaced once the operator
    /// confirms it.
    ///
    /// # Errors
    ///
    /// - Return [`FolderError::Io`] if script cannot be read or written.
    /// - Return [`FolderError::Prompt`] if confirmation prompt fails.
    #[instrument(skip(self, script, prompter), level = "debug")]
    pub fn write_script(
        &self,
        script: impl AsRef<str>,
        prompter: &mut impl Prompter,
    ) -> Result<ScriptUpdate> {
        let path = self.script_path();
        let io_err = |source| FolderError::Io {
            source,
            path: path.clone(),
        };

        let update = if path.exists() {
            let current = read_to_string(&path).map_err(io_err)?;
            if current == script.as_ref() {
                debug!("requirements script {:?} is up to date", path.display());
                return Ok(ScriptUpdate::Unchanged);
            }

            let question = format!("Overwrite existing {}?", path.display());
            if !prompter.confirm(&question, true)? {
                warn!("keep existing requirements script {:?}", path.display());
                return Ok(ScriptUpdate::Kept);
            }

            ScriptUpdate::Overwritten
        } else {
            ScriptUpdate::Created
        };

        write(&path, script.as_ref()).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .map_err(io_err)?;
        }

        info!("write requirements script {:?}", path.display());

        Ok(update)
    }
}

/// What happened to the requirements script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptUpdate {
    /// Script did not exist and was written.
    Created,

    /// Script differed and operator agreed to replace it.
    Overwritten,

    /// Script differed and operator kept the old one.
    Kept,

    /// Script already had the expected contents.
    Unchanged,
}

/// Managed folder error types.
#[derive(Debug, thiserror::Error)]
pub enum FolderError {
    /// File system operation failed.
    #[error("failed to access {path:?}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Operator input failed.
    #[error(transparent)]
    Prompt(#[from] crate::prompt::PromptError),
}

/// Friendly result alias :3
type Result<T, E = FolderError> = std::result::Result<T, E>;
