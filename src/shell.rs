// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! POSIX shell quoting.
//!
//! Provisor writes files that a shell sources, and feeds commands to a remote
//! shell through standard input. Every value crossing into shell syntax goes
//! through [`quote`], and values read back out of sourced files go through
//! [`unquote`].

/// Quote string as a single shell word.
///
/// Wraps the value in single quotes, and splices each embedded single quote
/// as `'\''`.
pub fn quote(value: impl AsRef<str>) -> String {
    let value = value.as_ref();
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str(r"'\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Undo shell quoting of a single word.
///
/// Understands single-quoted spans, double-quoted spans with backslash
/// escapes, and backslash escapes outside of quotes. Unquoted whitespace ends
/// the word, anything after it is ignored.
///
/// # Errors
///
/// - Return [`UnbalancedQuote`] if a quoted span is never closed.
pub fn unquote(word: impl AsRef<str>) -> Result<String> {
    let mut value = String::new();
    let mut chars = word.as_ref().chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => loop {
                match chars.next() {
                    Some('\'') => break,
                    Some(inner) => value.push(inner),
                    None => return Err(UnbalancedQuote),
                }
            },
            '"' => loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(escaped @ ('"' | '\\' | '$' | '`')) => value.push(escaped),
                        Some(other) => {
                            value.push('\\');
                            value.push(other);
                        }
                        None => return Err(UnbalancedQuote),
                    },
                    Some(inner) => value.push(inner),
                    None => return Err(UnbalancedQuote),
                }
            },
            '\\' => {
                if let Some(escaped) = chars.next() {
                    value.push(escaped);
                }
            }
            ch if ch.is_whitespace() => break,
            ch => value.push(ch),
        }
    }

    Ok(value)
}

/// Quoted span was never closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unbalanced quote in shell word")]
pub struct UnbalancedQuote;

/// Friendly result alias :3
pub type Result<T, E = UnbalancedQuote> = std::result::Result<T, E>;
