// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote service state reporting.
//!
//! Requirements scripts that install a service finish by printing one line
//! of the form `service-status: <state>`, where `<state>` is the output of
//! `systemctl is-active`. [`ServiceStatus::scan`] picks that line back out of
//! the captured output.

use std::{
    convert::Infallible,
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Prefix of the status line printed by requirements scripts.
pub const STATUS_PREFIX: &str = "service-status: ";

/// State of a remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Service reported exactly `active`.
    Active,

    /// Service reported `inactive` or `failed`.
    Inactive,

    /// Anything else, including no report at all.
    Unknown(String),
}

impl ServiceStatus {
    /// Find last status line in captured output.
    ///
    /// Output without a status line is [`ServiceStatus::Unknown`] with an
    /// empty state.
    pub fn scan(output: &str) -> Self {
        output
            .lines()
            .rev()
            .find_map(|line| line.trim_end_matches('\r').strip_prefix(STATUS_PREFIX))
            .map_or_else(|| Self::Unknown(String::new()), Self::from_state)
    }

    /// Classify raw `systemctl is-active` output.
    pub fn from_state(state: &str) -> Self {
        match state {
            "active" => Self::Active,
            "inactive" | "failed" => Self::Inactive,
            other => Self::Unknown(other.into()),
        }
    }

    /// Check if service is up and running.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl FromStr for ServiceStatus {
    type Err = Infallible;

    fn from_str(state: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_state(state))
    }
}

impl Display for ServiceStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Active => fmt.write_str("active"),
            Self::Inactive => fmt.write_str("inactive"),
            Self::Unknown(state) if state.is_empty() => fmt.write_str("<no status reported>"),
            Self::Unknown(state) => write!(fmt, "{state:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("active", ServiceStatus::Active; "active")]
    #[test_case("inactive", ServiceStatus::Inactive; "inactive")]
    #[test_case("failed", ServiceStatus::Inactive; "failed")]
    #[test_case("Active", ServiceStatus::Unknown("Active".into()); "wrong case")]
    #[test_case(" active", ServiceStatus::Unknown(" active".into()); "leading space")]
    #[test_case("activating", ServiceStatus::Unknown("activating".into()); "activating")]
    #[test_case("", ServiceStatus::Unknown("".into()); "empty")]
    #[test]
    fn classify_state(state: &str, expect: ServiceStatus) {
        pretty_assertions::assert_eq!(ServiceStatus::from_state(state), expect);
    }

    #[test]
    fn scan_picks_last_status_line() {
        let output = indoc! {"
            Reading package lists...
            service-status: activating
            Setting up jenkins ...
            service-status: active
            done
        "};

        assert_eq!(ServiceStatus::scan(output), ServiceStatus::Active);
    }

    #[test]
    fn scan_without_status_line_is_unknown() {
        let status = ServiceStatus::scan("nothing to see here\n");
        assert_eq!(status, ServiceStatus::Unknown(String::new()));
        assert!(!status.is_active());
    }

    #[test]
    fn scan_handles_crlf() {
        assert!(ServiceStatus::scan("service-status: active\r\n").is_active());
    }
}
