//! Domain newtypes shared across the sealpkg crates.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted package name, in bytes.
const MAX_NAME_LEN: usize = 100;

/// Error returned when a package name fails validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    /// The name is empty.
    #[error("package name must not be empty")]
    Empty,
    /// The name is longer than the accepted maximum.
    #[error("package name is {0} bytes long, the limit is {MAX_NAME_LEN}")]
    TooLong(usize),
    /// The name does not start with a lowercase letter.
    #[error("package name must start with a lowercase letter, not {0:?}")]
    BadLeadingChar(char),
    /// The name contains a character outside the accepted set.
    #[error("package name contains {0:?}; only lowercase letters, digits, '-' and '_' are accepted")]
    BadChar(char),
}

/// The name a package is published and addressed under.
///
/// A name is a single lowercase word: a letter followed by letters, digits,
/// hyphens, or underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageName(String);

impl PackageName {
    /// Validate `name` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns the [`NameError`] for the first rule the name violates.
    pub fn new(name: &str) -> Result<Self, NameError> {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return Err(NameError::Empty);
        };
        if name.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong(name.len()));
        }
        if !first.is_ascii_lowercase() {
            return Err(NameError::BadLeadingChar(first));
        }
        if let Some(bad) = chars.find(|c| !is_name_char(*c)) {
            return Err(NameError::BadChar(bad));
        }
        Ok(Self(name.to_owned()))
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
