// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Interactive operator input.
//!
//! Everything Provisor asks the operator goes through [`Prompter`]. The
//! terminal implementation is [`InquirePrompter`].

use inquire::{Confirm, Password, PasswordDisplayMode, Text};
use secrecy::SecretString;

/// Layer of indirection for operator input.
pub trait Prompter {
    /// Ask for a line of plain text.
    fn text(&mut self, message: &str) -> Result<String>;

    /// Ask for a secret. Input is never echoed.
    fn password(&mut self, message: &str) -> Result<SecretString>;

    /// Ask a yes/no question.
    fn confirm(&mut self, message: &str, default: bool) -> Result<bool>;
}

/// Prompt operator on the terminal through inquire.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn text(&mut self, message: &str) -> Result<String> {
        Ok(Text::new(message).prompt()?)
    }

    fn password(&mut self, message: &str) -> Result<SecretString> {
        let password = Password::new(message)
            .with_display_mode(PasswordDisplayMode::Masked)
            .prompt()?;
        Ok(SecretString::from(password))
    }

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool> {
        Ok(Confirm::new(message).with_default(default).prompt()?)
    }
}

/// Prompting error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Terminal prompt failed or was cancelled by the operator.
    #[error(transparent)]
    Inquire(#[from] inquire::InquireError),

    /// No more scripted answers are left.
    #[error("unexpected prompt: {0:?}")]
    Unexpected(String),
}

/// Friendly result alias :3
pub type Result<T, E = PromptError> = std::result::Result<T, E>;
