// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provision lab virtual machines from a mirror repository.
//!
//! Every target virtual machine gets a __managed folder__ inside the mirror
//! repository. The managed folder holds the target's requirements script,
//! and a credential record that git is told to ignore. Provisioning a target
//! uploads its requirements script over SSH, runs it with sudo on the remote
//! host, then commits and pushes the managed folder back to the mirror's
//! remote.
//!
//! See [`workflow::Workflow`] for the order everything happens in.

pub mod config;
pub mod path;
pub mod preflight;
pub mod prompt;
pub mod publish;
pub mod remote;
pub mod shell;
pub mod target;
pub mod workflow;
