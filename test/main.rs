// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use git2::{IndexEntry, IndexTime, Oid, Repository, RepositoryInitOptions};
use provisor::{
    prompt::{PromptError, Prompter},
    remote::transport::{self, Connector, RemoteOutput, Transport},
    target::TargetConfig,
};
use secrecy::SecretString;
use std::{
    cell::RefCell,
    collections::VecDeque,
    path::{Path, PathBuf},
    rc::Rc,
};

pub(crate) struct RepoFixture {
    repo: Repository,
}

impl RepoFixture {
    pub(crate) fn new(path: impl AsRef<Path>, kind: RepoKind) -> Result<Self> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        opts.bare(kind.is_bare());
        let repo = Repository::init_opts(path.as_ref(), &opts)?;

        // INVARIANT: Always provide valid name and email.
        //   - Git will complain if this is not set in CI/CD environments.
        let mut config = repo.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        Ok(Self { repo })
    }

    pub(crate) fn with_remote(self, name: &str, url: impl AsRef<Path>) -> Result<Self> {
        self.repo
            .remote(name, url.as_ref().to_string_lossy().as_ref())?;
        Ok(self)
    }

    pub(crate) fn stage_and_commit(
        &self,
        filename: impl AsRef<Path>,
        contents: impl AsRef<str>,
    ) -> Result<Oid> {
        let entry = IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            file_size: contents.as_ref().len() as u32,
            id: self.repo.blob(contents.as_ref().as_bytes())?,
            flags: 0,
            flags_extended: 0,
            path: filename
                .as_ref()
                .as_os_str()
                .to_string_lossy()
                .into_owned()
                .into_bytes(),
        };

        // INVARIANT: Keep work tree in sync with committed contents.
        if let Some(workdir) = self.repo.workdir() {
            std::fs::write(workdir.join(filename.as_ref()), contents.as_ref())?;
        }

        // INVARIANT: Always use new tree produced by index after staging new entry.
        let mut index = self.repo.index()?;
        index.add_frombuffer(&entry, contents.as_ref().as_bytes())?;
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        // INVARIANT: Always determine latest parent commits to append to.
        let signature = self.repo.signature()?;
        let mut parents = Vec::new();
        if let Some(parent) = self.repo.head().ok().and_then(|head| head.target()) {
            parents.push(self.repo.find_commit(parent)?);
        }
        let parents = parents.iter().collect::<Vec<_>>();

        // INVARIANT: Commit to HEAD by appending to obtained parent commits.
        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            format!("chore: add {:?}", filename.as_ref()).as_ref(),
            &tree,
            &parents,
        )?;

        Ok(oid)
    }

    pub(crate) fn push(&self, remote: &str, refspec: &str) -> Result<()> {
        self.repo.find_remote(remote)?.push(&[refspec], None)?;
        Ok(())
    }

    pub(crate) fn head(&self) -> Result<Oid> {
        self.repo
            .head()?
            .target()
            .ok_or_else(|| anyhow::anyhow!("HEAD is symbolic"))
    }

    /// Paths of every file tracked by branch, or `None` if branch does not
    /// exist.
    pub(crate) fn branch_files(&self, branch: &str) -> Result<Option<Vec<String>>> {
        let reference = match self.repo.find_reference(&format!("refs/heads/{branch}")) {
            Ok(reference) => reference,
            Err(error) if error.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let tree = reference.peel_to_tree()?;
        let mut files = Vec::new();
        tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                files.push(format!("{root}{}", entry.name().unwrap_or_default()));
            }
            git2::TreeWalkResult::Ok
        })?;
        files.sort();

        Ok(Some(files))
    }

    pub(crate) fn index_paths(&self) -> Result<Vec<String>> {
        let index = self.repo.index()?;
        Ok(index
            .iter()
            .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
            .collect())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) enum RepoKind {
    #[default]
    Bare,

    Normal,
}

impl RepoKind {
    pub(crate) fn is_bare(&self) -> bool {
        match self {
            Self::Bare => true,
            Self::Normal => false,
        }
    }
}

/// Answer prompts from a queue, recording every question asked.
#[derive(Debug, Default)]
pub(crate) struct ScriptedPrompter {
    answers: VecDeque<String>,
    pub(crate) asked: Vec<String>,
}

impl ScriptedPrompter {
    pub(crate) fn new(answers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }

    fn next(&mut self, message: &str) -> provisor::prompt::Result<String> {
        self.asked.push(message.into());
        self.answers
            .pop_front()
            .ok_or_else(|| PromptError::Unexpected(message.into()))
    }
}

impl Prompter for ScriptedPrompter {
    fn text(&mut self, message: &str) -> provisor::prompt::Result<String> {
        self.next(message)
    }

    fn password(&mut self, message: &str) -> provisor::prompt::Result<SecretString> {
        self.next(message).map(SecretString::from)
    }

    fn confirm(&mut self, message: &str, _default: bool) -> provisor::prompt::Result<bool> {
        self.next(message).map(|answer| answer == "y")
    }
}

/// Everything a fake remote host was asked to do.
#[derive(Debug, Default)]
pub(crate) struct RemoteLog {
    pub(crate) connected: Vec<String>,
    pub(crate) uploads: Vec<(PathBuf, String)>,
    pub(crate) commands: Vec<String>,
}

/// Remote host that answers every command with canned output.
#[derive(Debug, Clone)]
pub(crate) struct FakeRemote {
    pub(crate) log: Rc<RefCell<RemoteLog>>,
    output: RemoteOutput,
}

impl FakeRemote {
    pub(crate) fn new(stdout: &str, exit_status: i32) -> Self {
        Self {
            log: Rc::new(RefCell::new(RemoteLog::default())),
            output: RemoteOutput {
                stdout: stdout.into(),
                exit_status,
            },
        }
    }
}

impl Connector for FakeRemote {
    fn connect(&self, target: &TargetConfig) -> transport::Result<Box<dyn Transport>> {
        self.log
            .borrow_mut()
            .connected
            .push(format!("{}@{}", target.user, target.host));
        Ok(Box::new(self.clone()))
    }
}

impl Transport for FakeRemote {
    fn upload(&mut self, local: &Path, remote: &str, _mode: i32) -> transport::Result<()> {
        self.log
            .borrow_mut()
            .uploads
            .push((local.into(), remote.into()));
        Ok(())
    }

    fn execute(&mut self, command: &str, _stdin: &[u8]) -> transport::Result<RemoteOutput> {
        self.log.borrow_mut().commands.push(command.into());
        Ok(self.output.clone())
    }
}
