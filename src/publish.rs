// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Post-provision publishing.
//!
//! Once a target is provisioned, its managed folder is committed into the
//! mirror repository and pushed to the mirror's remote. Pushing goes to the
//! primary branch first. If that fails, it is retried once against the
//! fallback branch, which covers mirrors still using `master` as their
//! default branch.
//!
//! # Secrets Never Get Committed
//!
//! Publishing refuses to stage anything unless git itself considers the
//! target's credential record ignored. This is checked through the mirror's
//! own ignore rules, so a broken ignore list is caught before it can leak a
//! password into history.

use crate::target::folder::ManagedFolder;

use auth_git2::{GitAuthenticator, Prompter};
use git2::{ErrorCode, IndexAddOption, Oid, PushOptions, RemoteCallbacks, Repository, Tree};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Mirror repository holding managed folders.
pub struct Mirror {
    repository: Repository,
}

impl Mirror {
    /// Open mirror repository at target path.
    ///
    /// # Errors
    ///
    /// - Return [`PublishError::Git2`] if repository cannot be opened.
    /// - Return [`PublishError::NoWorkTree`] if repository is bare.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repository = Repository::open(path.as_ref())?;
        if repository.is_bare() {
            return Err(PublishError::NoWorkTree(path.as_ref().into()));
        }

        Ok(Self { repository })
    }

    /// Path to the mirror's work tree.
    pub fn workdir(&self) -> Result<&Path> {
        self.repository
            .workdir()
            .ok_or_else(|| PublishError::NoWorkTree(self.repository.path().into()))
    }

    /// Check if path relative to work tree is ignored by git.
    ///
    /// # Errors
    ///
    /// - Return [`PublishError::Git2`] if ignore rules cannot be evaluated.
    pub fn is_ignored(&self, path: impl AsRef<Path>) -> Result<bool> {
        Ok(self.repository.is_path_ignored(path.as_ref())?)
    }

    /// Stage additions, modifications, and deletions within scope.
    ///
    /// Ignored files are never staged.
    ///
    /// # Errors
    ///
    /// - Return [`PublishError::Git2`] if index cannot be updated.
    #[instrument(skip(self), level = "debug")]
    pub fn stage(&self, scope: &StageScope) -> Result<()> {
        let pathspecs = scope.pathspecs();
        debug!("stage {pathspecs:?}");

        let mut index = self.repository.index()?;
        index.add_all(pathspecs.iter().map(String::as_str), IndexAddOption::DEFAULT, None)?;
        index.update_all(pathspecs.iter().map(String::as_str), None)?;
        index.write()?;

        Ok(())
    }

    /// Check if the index differs from `HEAD`.
    ///
    /// # Errors
    ///
    /// - Return [`PublishError::Git2`] if diff cannot be computed.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let index = self.repository.index()?;
        let head_tree = self.head_tree()?;
        let diff = self
            .repository
            .diff_tree_to_index(head_tree.as_ref(), Some(&index), None)?;

        Ok(diff.deltas().len() > 0)
    }

    /// Commit current index onto `HEAD`.
    ///
    /// # Errors
    ///
    /// - Return [`PublishError::Git2`] if commit cannot be created, e.g.,
    ///   when no committer identity is configured.
    #[instrument(skip(self), level = "debug")]
    pub fn commit(&self, message: &str) -> Result<Oid> {
        let mut index = self.repository.index()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repository.find_tree(tree_oid)?;

        // INVARIANT: Always append to the current tip, if there is one.
        let signature = self.repository.signature()?;
        let parent = match self.repository.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(error) if is_unborn(&error) => None,
            Err(error) => return Err(error.into()),
        };
        let parents = parent.iter().collect::<Vec<_>>();

        let oid = self.repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        info!("commit {oid}: {message}");

        Ok(oid)
    }

    /// Tip of `HEAD` if no remote-tracking branch of the given branches
    /// has it yet.
    ///
    /// Successful pushes move the remote-tracking branch along, so this
    /// finds commits left behind by earlier runs whose pushes failed.
    ///
    /// # Errors
    ///
    /// - Return [`PublishError::Git2`] if references cannot be read.
    pub fn unpublished_head(&self, remote: &str, branches: &[&str]) -> Result<Option<Oid>> {
        let head = match self.repository.head() {
            Ok(head) => head.peel_to_commit()?.id(),
            Err(error) if is_unborn(&error) => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        for branch in branches {
            let name = format!("refs/remotes/{remote}/{branch}");
            match self.repository.refname_to_id(&name) {
                Ok(oid) if oid == head => return Ok(None),
                Ok(_) => continue,
                Err(error) if error.code() == ErrorCode::NotFound => continue,
                Err(error) => return Err(error.into()),
            }
        }

        Ok(Some(head))
    }

    /// Full name of the branch `HEAD` points at.
    ///
    /// # Errors
    ///
    /// - Return [`PublishError::DetachedHead`] if `HEAD` is not on a branch.
    pub fn head_ref(&self) -> Result<String> {
        let head = self.repository.find_reference("HEAD")?;
        head.symbolic_target()
            .map(ToString::to_string)
            .ok_or(PublishError::DetachedHead)
    }

    /// Push current branch to branch of given remote.
    ///
    /// Credentials are asked for through the terminal if the remote needs
    /// them. A reference rejected by the remote counts as failure.
    ///
    /// # Errors
    ///
    /// - Return [`PublishError::Git2`] if push fails.
    /// - Return [`PublishError::Rejected`] if remote rejects the update.
    #[instrument(skip(self), level = "debug")]
    pub fn push(&self, remote_name: &str, branch: &str) -> Result<()> {
        let head = self.head_ref()?;
        let refspec = format!("{head}:refs/heads/{branch}");
        let mut remote = self.repository.find_remote(remote_name)?;

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {elapsed_precise:.green}  {msg}")?,
        );
        bar.set_message(format!("push {head} to {remote_name}/{branch}"));
        bar.enable_steady_tick(Duration::from_millis(100));

        let rejected = RefCell::new(None);
        let prompter = SpinnerPrompter::new(bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter);
        let config = self.repository.config()?;

        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.push_transfer_progress(|current, total, _bytes| {
            bar.set_length(total as u64);
            bar.set_position(current as u64);
        });
        rc.push_update_reference(|refname, status| {
            if let Some(message) = status {
                *rejected.borrow_mut() = Some(format!("{refname}: {message}"));
            }
            Ok(())
        });

        let mut po = PushOptions::new();
        po.remote_callbacks(rc);
        let pushed = remote.push(&[refspec.as_str()], Some(&mut po));
        bar.finish_and_clear();
        pushed?;

        if let Some(reason) = rejected.take() {
            return Err(PublishError::Rejected(reason));
        }

        info!("pushed {head} to {remote_name}/{branch}");
        Ok(())
    }

    fn head_tree(&self) -> Result<Option<Tree<'_>>> {
        match self.repository.head() {
            Ok(head) => Ok(Some(head.peel_to_tree()?)),
            Err(error) if is_unborn(&error) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

fn is_unborn(error: &git2::Error) -> bool {
    matches!(error.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound)
}

/// What to stage for a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageScope {
    /// Only the target's managed folder, relative to the work tree.
    Folder(PathBuf),

    /// Everything in the mirror.
    Mirror,
}

impl StageScope {
    fn pathspecs(&self) -> Vec<String> {
        match self {
            Self::Folder(path) => {
                let path = path.to_string_lossy();
                vec![path.to_string(), format!("{path}/*")]
            }
            Self::Mirror => vec!["*".into()],
        }
    }
}

/// Layer of indirection for pushing to a branch.
pub trait BranchPush {
    /// Push current branch to target branch.
    fn push_branch(&self, branch: &str) -> Result<()>;
}

/// Push through a named remote of a mirror.
pub struct RemotePush<'mirror> {
    mirror: &'mirror Mirror,
    remote: &'mirror str,
}

impl<'mirror> RemotePush<'mirror> {
    /// Construct new pusher for named remote of mirror.
    pub fn new(mirror: &'mirror Mirror, remote: &'mirror str) -> Self {
        Self { mirror, remote }
    }
}

impl BranchPush for RemotePush<'_> {
    fn push_branch(&self, branch: &str) -> Result<()> {
        self.mirror.push(self.remote, branch)
    }
}

/// Push to primary branch, falling back to secondary branch once.
///
/// Returns the branch that was pushed to.
///
/// # Errors
///
/// - Return [`PublishError::PushFailed`] if both pushes fail.
pub fn push_with_fallback(
    pusher: &impl BranchPush,
    primary: &str,
    fallback: &str,
) -> Result<String> {
    match pusher.push_branch(primary) {
        Ok(()) => Ok(primary.into()),
        Err(error) => {
            warn!("push to {primary} failed, trying {fallback}: {error}");
            pusher
                .push_branch(fallback)
                .map(|()| fallback.into())
                .map_err(|source| PublishError::PushFailed {
                    primary: primary.into(),
                    fallback: fallback.into(),
                    source: Box::new(source),
                })
        }
    }
}

/// Publishing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publisher {
    remote: String,
    primary_branch: String,
    fallback_branch: String,
}

impl Publisher {
    /// Construct new publisher.
    pub fn new(
        remote: impl Into<String>,
        primary_branch: impl Into<String>,
        fallback_branch: impl Into<String>,
    ) -> Self {
        Self {
            remote: remote.into(),
            primary_branch: primary_branch.into(),
            fallback_branch: fallback_branch.into(),
        }
    }

    /// Commit message used for a target.
    pub fn commit_message(folder: &ManagedFolder) -> String {
        format!("chore: update provisioning files for {}", folder.name())
    }

    /// Stage, commit, and push managed folder of a target.
    ///
    /// Nothing is committed when staging leaves no changes. Nothing is pushed
    /// either, unless an earlier commit never made it to the remote.
    ///
    /// # Errors
    ///
    /// - Return [`PublishError::SecretNotIgnored`] if credential record is not
    ///   ignored by git.
    /// - Return [`PublishError::Git2`] if staging or committing fails.
    /// - Return [`PublishError::PushFailed`] if both pushes fail.
    #[instrument(skip(self, mirror, folder), level = "debug")]
    pub fn publish(
        &self,
        mirror: &Mirror,
        folder: &ManagedFolder,
        scope: StageScope,
    ) -> Result<PublishOutcome> {
        let config_path = folder.relative_config_path();
        if !mirror.is_ignored(&config_path)? {
            return Err(PublishError::SecretNotIgnored(config_path));
        }

        mirror.stage(&scope)?;
        let commit = if mirror.has_staged_changes()? {
            mirror.commit(&Self::commit_message(folder))?
        } else if let Some(head) = mirror.unpublished_head(
            &self.remote,
            &[self.primary_branch.as_str(), self.fallback_branch.as_str()],
        )? {
            warn!("nothing to commit for {}, but {head} was never pushed", folder.name());
            head
        } else {
            info!("nothing to commit for {}", folder.name());
            return Ok(PublishOutcome::NothingToCommit);
        };

        let branch = push_with_fallback(
            &RemotePush::new(mirror, &self.remote),
            &self.primary_branch,
            &self.fallback_branch,
        )?;

        Ok(PublishOutcome::Pushed { commit, branch })
    }
}

/// Result of publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Staging left nothing to commit.
    NothingToCommit,

    /// Commit was pushed to branch.
    Pushed { commit: Oid, branch: String },
}

/// Git2 authentication prompter for progress spinner.
#[derive(Debug, Clone)]
pub struct SpinnerPrompter {
    bar: ProgressBar,
}

impl SpinnerPrompter {
    /// Construct new spinner authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for SpinnerPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Publishing error types.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Credential record would be committed.
    #[error("refusing to publish: {0:?} is not ignored by git")]
    SecretNotIgnored(PathBuf),

    /// Mirror has no work tree.
    #[error("mirror repository {0:?} has no work tree")]
    NoWorkTree(PathBuf),

    /// `HEAD` is not on a branch.
    #[error("mirror HEAD is detached, check out a branch first")]
    DetachedHead,

    /// Remote rejected reference update.
    #[error("remote rejected update of {0}")]
    Rejected(String),

    /// Pushing to both branches failed.
    #[error(
        "push to {primary} and fallback {fallback} both failed, commit stays in local mirror until next run"
    )]
    PushFailed {
        primary: String,
        fallback: String,
        #[source]
        source: Box<PublishError>,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
type Result<T, E = PublishError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::{create_dir, write};

    struct FakePush {
        failing: Vec<&'static str>,
        attempts: RefCell<Vec<String>>,
    }

    impl FakePush {
        fn failing(branches: impl IntoIterator<Item = &'static str>) -> Self {
            Self {
                failing: branches.into_iter().collect(),
                attempts: RefCell::new(Vec::new()),
            }
        }
    }

    impl BranchPush for FakePush {
        fn push_branch(&self, branch: &str) -> Result<()> {
            self.attempts.borrow_mut().push(branch.into());
            if self.failing.iter().any(|failing| *failing == branch) {
                return Err(PublishError::Rejected(format!("refs/heads/{branch}")));
            }
            Ok(())
        }
    }

    #[test]
    fn primary_push_succeeds() -> anyhow::Result<()> {
        let pusher = FakePush::failing([]);
        assert_eq!(push_with_fallback(&pusher, "main", "master")?, "main");
        assert_eq!(*pusher.attempts.borrow(), vec!["main".to_string()]);

        Ok(())
    }

    #[test]
    fn fallback_push_after_primary_fails() -> anyhow::Result<()> {
        let pusher = FakePush::failing(["main"]);
        assert_eq!(push_with_fallback(&pusher, "main", "master")?, "master");
        assert_eq!(
            *pusher.attempts.borrow(),
            vec!["main".to_string(), "master".to_string()]
        );

        Ok(())
    }

    #[test]
    fn both_pushes_failing_is_an_error() {
        let pusher = FakePush::failing(["main", "master"]);
        let result = push_with_fallback(&pusher, "main", "master");

        assert!(matches!(result, Err(PublishError::PushFailed { .. })));
        assert_eq!(pusher.attempts.borrow().len(), 2);
    }

    #[test]
    fn stage_scope_pathspecs() {
        assert_eq!(
            StageScope::Folder("web".into()).pathspecs(),
            vec!["web".to_string(), "web/*".to_string()]
        );
        assert_eq!(StageScope::Mirror.pathspecs(), vec!["*".to_string()]);
    }

    fn mirror() -> anyhow::Result<Mirror> {
        let repository = Repository::init("mirror")?;
        let mut config = repository.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;
        Ok(Mirror::open("mirror")?)
    }

    #[sealed_test]
    fn stage_skips_ignored_credentials() -> anyhow::Result<()> {
        let mirror = mirror()?;
        create_dir("mirror/web")?;
        write("mirror/web/.gitignore", "config.sh\n")?;
        write("mirror/web/config.sh", "PASSWORD='x'\n")?;
        write("mirror/web/requirements.sh", "echo hi\n")?;
        write("mirror/unrelated.txt", "leave me\n")?;

        assert!(mirror.is_ignored("web/config.sh")?);
        mirror.stage(&StageScope::Folder("web".into()))?;
        assert!(mirror.has_staged_changes()?);

        let index = mirror.repository.index()?;
        let mut staged = index
            .iter()
            .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
            .collect::<Vec<_>>();
        staged.sort();
        assert_eq!(staged, vec!["web/.gitignore", "web/requirements.sh"]);

        Ok(())
    }

    #[sealed_test]
    fn commit_then_nothing_left_to_commit() -> anyhow::Result<()> {
        let mirror = mirror()?;
        create_dir("mirror/web")?;
        write("mirror/web/requirements.sh", "echo hi\n")?;

        mirror.stage(&StageScope::Folder("web".into()))?;
        mirror.commit("first")?;
        mirror.stage(&StageScope::Folder("web".into()))?;
        assert!(!mirror.has_staged_changes()?);

        std::fs::remove_file("mirror/web/requirements.sh")?;
        mirror.stage(&StageScope::Folder("web".into()))?;
        assert!(mirror.has_staged_changes()?);

        Ok(())
    }

    #[sealed_test]
    fn unpublished_head_follows_remote_tracking_branches() -> anyhow::Result<()> {
        let mirror = mirror()?;
        assert_eq!(mirror.unpublished_head("origin", &["main", "master"])?, None);

        create_dir("mirror/web")?;
        write("mirror/web/requirements.sh", "echo hi\n")?;
        mirror.stage(&StageScope::Folder("web".into()))?;
        let commit = mirror.commit("first")?;
        assert_eq!(
            mirror.unpublished_head("origin", &["main", "master"])?,
            Some(commit)
        );

        mirror
            .repository
            .reference("refs/remotes/origin/master", commit, false, "pushed")?;
        assert_eq!(mirror.unpublished_head("origin", &["main", "master"])?, None);

        Ok(())
    }

    #[sealed_test]
    fn publish_refuses_unignored_credentials() -> anyhow::Result<()> {
        let mirror = mirror()?;
        create_dir("mirror/web")?;
        write("mirror/web/config.sh", "PASSWORD='x'\n")?;

        let folder = ManagedFolder::new(mirror.workdir()?, "web".parse()?);
        let publisher = Publisher::new("origin", "main", "master");
        let result = publisher.publish(&mirror, &folder, StageScope::Folder("web".into()));

        assert!(matches!(result, Err(PublishError::SecretNotIgnored(_))));
        assert!(mirror.repository.index()?.is_empty());

        Ok(())
    }
}
