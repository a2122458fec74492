// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Requirements script templates.
//!
//! Requirements scripts run on the remote host. They only do work when given
//! the `--run-remote` marker argument, and expect the sudo passphrase in the
//! `PROVISOR_SUDO_PASS` environment variable.

use crate::{shell, target::TargetName};

const REQUIREMENTS_TEMPLATE: &str = include_str!("../../assets/requirements.sh");
const JENKINS_TEMPLATE: &str = include_str!("../../assets/jenkins.sh");

/// Marker argument that switches a requirements script into remote mode.
pub const RUN_REMOTE_MARKER: &str = "--run-remote";

/// Environment variable carrying the sudo passphrase on the remote host.
pub const SUDO_PASS_VAR: &str = "PROVISOR_SUDO_PASS";

/// Flavor of requirements script.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Update the system and install the target's packages.
    #[default]
    Requirements,

    /// Everything [`ScriptKind::Requirements`] does, then install Jenkins
    /// and report its service state.
    Jenkins,
}

impl ScriptKind {
    fn template(&self) -> &'static str {
        match self {
            Self::Requirements => REQUIREMENTS_TEMPLATE,
            Self::Jenkins => JENKINS_TEMPLATE,
        }
    }
}

/// Render requirements script for a target.
///
/// Package names are quoted individually, so they cannot break out of the
/// package array. Duplicates are dropped, keeping first occurrence. The
/// target name only appears raw inside comments, everywhere else it is
/// quoted.
pub fn render(
    kind: ScriptKind,
    target: &TargetName,
    packages: impl IntoIterator<Item = impl AsRef<str>>,
) -> String {
    let mut seen = Vec::new();
    for package in packages {
        let package = package.as_ref().trim();
        if !package.is_empty() && !seen.iter().any(|known: &String| known == package) {
            seen.push(package.to_string());
        }
    }

    let packages = seen.iter().map(shell::quote).collect::<Vec<_>>().join(" ");

    kind.template()
        .replace("@TARGET_WORD@", &shell::quote(target.as_str()))
        .replace("@TARGET@", target.as_str())
        .replace("@PACKAGES@", packages.as_str())
}
