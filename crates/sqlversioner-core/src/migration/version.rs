use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VersionerError};

/// A dotted numeric migration version such as `1.2.10`.
///
/// Components compare numerically, so `1.10` sorts after `1.2` and `1.02`
/// equals `1.2`. Trailing zeros are significant: `1` sorts before `1.0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    components: Vec<u64>,
}

impl Version {
    /// Parse a version string. Both `.` and `_` are accepted as separators.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| VersionerError::Parse {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if input.trim().is_empty() {
            return Err(invalid("version is empty"));
        }

        let mut components = Vec::new();
        for part in input.split(['.', '_']) {
            if part.is_empty() {
                return Err(invalid("empty version component"));
            }
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(&format!("component '{}' is not numeric", part)));
            }
            let value = part
                .parse::<u64>()
                .map_err(|_| invalid(&format!("component '{}' is out of range", part)))?;
            components.push(value);
        }

        Ok(Self { components })
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }
}

impl FromStr for Version {
    type Err = VersionerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}
