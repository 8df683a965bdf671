//! `HOST:PORT` connection targets and delimiter splitting.

use std::fmt;
use std::str::FromStr;

use crate::error::SubmitError;

/// Default Redis address.
pub const DEFAULT_REDIS_TARGET: &str = "127.0.0.1:6379";

/// Default beanstalkd address.
pub const DEFAULT_BEANSTALKD_TARGET: &str = "127.0.0.1:11300";

/// Network address of an external service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
}

impl ConnectionTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a `HOST:PORT` string. `what` names the value in error messages.
    pub fn parse(what: &str, value: &str) -> Result<Self, SubmitError> {
        let (host, port) = split_pair(what, value, ':')?;
        let port = port.parse::<u16>().map_err(|_| {
            SubmitError::argument(format!(
                "Invalid port '{}' in {} value {}",
                port, what, value
            ))
        })?;
        Ok(Self { host, port })
    }
}

impl FromStr for ConnectionTarget {
    type Err = SubmitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse("HOST:PORT", s)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Splits `value` on `delimiter` into exactly two non-empty-key elements.
///
/// A trailing empty element is discarded before counting, so `"key="` yields
/// one element and is rejected.
pub fn split_pair(
    what: &str,
    value: &str,
    delimiter: char,
) -> Result<(String, String), SubmitError> {
    let mut elements: Vec<&str> = value.split(delimiter).collect();
    if elements.last().is_some_and(|last| last.is_empty()) {
        elements.pop();
    }

    if elements.len() != 2 {
        return Err(SubmitError::argument(format!(
            "Unexpected number of elements while splitting {} value {}, got {}, expected 2",
            what,
            value,
            elements.len()
        )));
    }

    if elements[0].is_empty() {
        return Err(SubmitError::argument(format!(
            "Empty key while splitting {} value {}",
            what, value
        )));
    }

    Ok((elements[0].to_string(), elements[1].to_string()))
}
