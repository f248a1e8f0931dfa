//! Normalized package names, as used for slugs, cache keys and URL path
//! parameters: lowercase, with every run of `.`, `-` and `_` collapsed to a
//! single `-`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// The normalized name of a package.
///
/// Normalization is idempotent: applying it to an already-normalized name is
/// a no-op, so two spellings of the same name always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    /// Normalize a package name, validating it in the process.
    ///
    /// Names may contain ASCII letters, digits and the separators `.`, `-`
    /// and `_`, and must start and end with a letter or digit.
    pub fn new(name: &str) -> Result<Self, InvalidNameError> {
        Ok(Self(normalize(name)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PackageName {
    type Err = InvalidNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::new(name)
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Self::new(&name).map_err(serde::de::Error::custom)
    }
}

/// The normalized name of an extra dependency group, following the same
/// rules as [`PackageName`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ExtraName(String);

impl ExtraName {
    pub fn new(name: &str) -> Result<Self, InvalidNameError> {
        Ok(Self(normalize(name)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ExtraName {
    type Err = InvalidNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::new(name)
    }
}

impl fmt::Display for ExtraName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
#[error("Not a valid package or extra name: {0:?}")]
pub struct InvalidNameError(String);

/// Lowercase the name and collapse any run of `.`, `-` and `_` into a single
/// `-`.
fn normalize(name: &str) -> Result<String, InvalidNameError> {
    let mut normalized = String::with_capacity(name.len());
    let mut last = None;
    for char in name.bytes() {
        match char {
            b'A'..=b'Z' => normalized.push(char.to_ascii_lowercase() as char),
            b'a'..=b'z' | b'0'..=b'9' => normalized.push(char as char),
            b'.' | b'-' | b'_' => match last {
                None => return Err(InvalidNameError(name.to_string())),
                Some(b'.' | b'-' | b'_') => {}
                Some(_) => normalized.push('-'),
            },
            _ => return Err(InvalidNameError(name.to_string())),
        }
        last = Some(char);
    }
    if normalized.is_empty() || matches!(last, Some(b'.' | b'-' | b'_')) {
        return Err(InvalidNameError(name.to_string()));
    }
    Ok(normalized)
}
