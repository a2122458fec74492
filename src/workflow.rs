// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning workflow.
//!
//! One invocation provisions one target, strictly in this order:
//!
//! 1. Preflight: not root, mirror exists, helper utility present.
//! 2. Managed folder: created, ignore list lists the credential record.
//! 3. Config: credential record loaded, or asked for and saved.
//! 4. Script: requirements script rendered into the managed folder.
//! 5. Remote: script uploaded to the target and run there.
//! 6. Publish: managed folder committed and pushed.
//!
//! Jenkins targets only reach the publish step when the remote host reports
//! the Jenkins service as active.

use crate::{
    config::Settings,
    preflight::Preflight,
    prompt::Prompter,
    publish::{Mirror, PublishOutcome, Publisher, StageScope},
    remote::{status::ServiceStatus, transport::Connector, Provisioner},
    target::{
        folder::{ManagedFolder, ScriptUpdate},
        script::{self, ScriptKind},
        TargetName,
    },
};

use tracing::{info, instrument, warn};

/// What to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Target to provision.
    pub target: TargetName,

    /// Flavor of requirements script.
    pub kind: ScriptKind,

    /// Packages to install in addition to the target's configured ones.
    pub packages: Vec<String>,
}

impl Request {
    /// Construct new request without extra packages.
    pub fn new(target: TargetName, kind: ScriptKind) -> Self {
        Self {
            target,
            kind,
            packages: Vec::new(),
        }
    }

    /// Add extra packages to install.
    pub fn with_packages(mut self, packages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.packages.extend(packages.into_iter().map(Into::into));
        self
    }

    /// Render requirements script for this request.
    ///
    /// Configured packages of the target come first, followed by the
    /// request's own packages.
    pub fn render_script(&self, settings: &Settings) -> String {
        let configured = settings.target(self.target.as_str()).packages;
        script::render(
            self.kind,
            &self.target,
            configured.iter().chain(self.packages.iter()),
        )
    }
}

/// Outcome of a workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// What happened to the requirements script.
    pub script: ScriptUpdate,

    /// Service state the remote host reported.
    pub status: ServiceStatus,

    /// What happened in the publish step.
    pub publish: PublishStep,
}

/// Publish step outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStep {
    /// Service was not active, so nothing was published.
    Skipped(ServiceStatus),

    /// Publishing ran.
    Done(PublishOutcome),
}

/// Sequential provisioning workflow.
pub struct Workflow<C>
where
    C: Connector,
{
    preflight: Preflight,
    settings: Settings,
    connector: C,
}

impl<C> Workflow<C>
where
    C: Connector,
{
    /// Construct new workflow.
    pub fn new(preflight: Preflight, settings: Settings, connector: C) -> Self {
        Self {
            preflight,
            settings,
            connector,
        }
    }

    /// Run workflow for a request.
    ///
    /// # Errors
    ///
    /// - Return [`WorkflowError::Preflight`] if a precondition fails.
    /// - Return [`WorkflowError::Config`] if credential record is incomplete.
    /// - Return [`WorkflowError::Provision`] if remote provisioning fails.
    /// - Return [`WorkflowError::Publish`] if publishing fails.
    #[instrument(skip(self, prompter), level = "debug")]
    pub fn run(&self, request: &Request, prompter: &mut impl Prompter) -> Result<RunReport> {
        self.preflight.ensure_unprivileged()?;
        let mirror_dir = self.settings.mirror_dir()?;
        self.preflight.ensure_mirror(&mirror_dir)?;
        if let Some(utility) = self.settings.transport.kind.helper_utility() {
            self.preflight.ensure_utility(utility, prompter)?;
        }

        let mirror = Mirror::open(&mirror_dir)?;
        let folder = ManagedFolder::new(mirror.workdir()?, request.target.clone());
        folder.create()?;
        folder.ensure_ignored()?;

        let config = folder.config_store().load_or_create(prompter)?;
        let script = folder.write_script(request.render_script(&self.settings), prompter)?;

        let provisioner = Provisioner::new(&self.connector, &self.settings.transport.remote_dir);
        let report = provisioner.provision(&request.target, &config, &folder.script_path())?;
        drop(config);

        if request.kind == ScriptKind::Jenkins && !report.status.is_active() {
            warn!(
                "jenkins on {} reported {}, skipping publish",
                request.target, report.status
            );
            return Ok(RunReport {
                script,
                status: report.status.clone(),
                publish: PublishStep::Skipped(report.status),
            });
        }

        let scope = if self.settings.target(request.target.as_str()).stage_all {
            StageScope::Mirror
        } else {
            StageScope::Folder(folder.relative_path().into())
        };

        let publisher = Publisher::new(
            &self.settings.remote,
            &self.settings.primary_branch,
            &self.settings.fallback_branch,
        );
        let outcome = publisher.publish(&mirror, &folder, scope)?;
        info!("finished provisioning {}", request.target);

        Ok(RunReport {
            script,
            status: report.status,
            publish: PublishStep::Done(outcome),
        })
    }
}

/// Workflow error types.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Preflight(#[from] crate::preflight::PreflightError),

    #[error(transparent)]
    Settings(#[from] crate::config::SettingsError),

    #[error(transparent)]
    Config(#[from] crate::target::ConfigError),

    #[error(transparent)]
    Folder(#[from] crate::target::folder::FolderError),

    #[error(transparent)]
    Provision(#[from] crate::remote::ProvisionError),

    #[error(transparent)]
    Publish(#[from] crate::publish::PublishError),
}

/// Friendly result alias :3
pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;
