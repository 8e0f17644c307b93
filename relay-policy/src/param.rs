use std::str::FromStr;

use crate::PolicyError;

/// A named policy-set parameter, as supplied by the configuration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyParam {
    pub name: String,
    pub value: String,
}

impl PolicyParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

impl<N: Into<String>, V: Into<String>> From<(N, V)> for PolicyParam {
    fn from((name, value): (N, V)) -> Self {
        Self::new(name, value)
    }
}

/// Parses the decimal value of parameter `name`.
pub(crate) fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, PolicyError> {
    value
        .trim()
        .parse()
        .map_err(|_| PolicyError::InvalidValue { name: name.to_string(), value: value.to_string() })
}
