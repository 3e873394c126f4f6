//! Core type definitions for loadrig

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// HTTP methods a journey step can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[derive(Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    /// Get the string representation of the HTTP method
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Whether requests with this method normally carry a body
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(ParseError::InvalidHttpMethod(s.to_string())),
        }
    }
}

/// Classification of a single HTTP call made by a virtual user.
///
/// Every request sample carries exactly one outcome. `ExpectedNegative`
/// covers 4xx statuses that the step explicitly lists as acceptable, so the
/// report can keep them apart from real failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success { status: u16 },
    ExpectedNegative { status: u16 },
    Unauthorized,
    UnexpectedStatus { status: u16 },
    Timeout,
    ConnectionFailed,
}

impl Outcome {
    /// Classify a received status against a step's acceptable set
    pub fn from_status(status: u16, acceptable: &std::collections::BTreeSet<u16>) -> Self {
        if acceptable.contains(&status) {
            if status >= 400 {
                Outcome::ExpectedNegative { status }
            } else {
                Outcome::Success { status }
            }
        } else if status == 401 {
            Outcome::Unauthorized
        } else {
            Outcome::UnexpectedStatus { status }
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            Outcome::Success { .. } | Outcome::ExpectedNegative { .. }
        )
    }

    /// Transport faults and server errors; these feed the abort policy
    pub fn is_critical(&self) -> bool {
        match self {
            Outcome::Timeout | Outcome::ConnectionFailed => true,
            Outcome::UnexpectedStatus { status } => *status >= 500,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Success { status }
            | Outcome::ExpectedNegative { status }
            | Outcome::UnexpectedStatus { status } => Some(*status),
            Outcome::Unauthorized => Some(401),
            Outcome::Timeout | Outcome::ConnectionFailed => None,
        }
    }

    pub fn class(&self) -> OutcomeClass {
        match self {
            Outcome::Success { .. } => OutcomeClass::Success,
            Outcome::ExpectedNegative { .. } => OutcomeClass::ExpectedNegative,
            Outcome::Unauthorized => OutcomeClass::Unauthorized,
            Outcome::UnexpectedStatus { status } if *status >= 500 => OutcomeClass::ServerError,
            Outcome::UnexpectedStatus { .. } => OutcomeClass::UnexpectedStatus,
            Outcome::Timeout => OutcomeClass::Timeout,
            Outcome::ConnectionFailed => OutcomeClass::ConnectionFailed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success { status } => write!(f, "success ({})", status),
            Outcome::ExpectedNegative { status } => write!(f, "expected negative ({})", status),
            Outcome::Unauthorized => write!(f, "unauthorized (401)"),
            Outcome::UnexpectedStatus { status } => write!(f, "unexpected status ({})", status),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::ConnectionFailed => write!(f, "connection failed"),
        }
    }
}

/// Report bucket for outcomes, ordered from benign to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Success,
    ExpectedNegative,
    Unauthorized,
    UnexpectedStatus,
    ServerError,
    Timeout,
    ConnectionFailed,
}

impl OutcomeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClass::Success => "success",
            OutcomeClass::ExpectedNegative => "expected_negative",
            OutcomeClass::Unauthorized => "unauthorized",
            OutcomeClass::UnexpectedStatus => "unexpected_status",
            OutcomeClass::ServerError => "server_error",
            OutcomeClass::Timeout => "timeout",
            OutcomeClass::ConnectionFailed => "connection_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, OutcomeClass::Success | OutcomeClass::ExpectedNegative)
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur when parsing core types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid HTTP method: '{0}'. Supported methods are: GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS")]
    InvalidHttpMethod(String),
}
