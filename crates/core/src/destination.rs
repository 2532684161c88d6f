//! Destination identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum destination identifier length (fits a DNS label).
pub const MAX_DESTINATION_LEN: usize = 63;

/// Validated, normalized identifier of the import destination.
///
/// Normalization trims surrounding whitespace and lowercases ASCII letters.
/// The result must match `^[a-zA-Z0-9-_]+$`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DestinationId(String);

impl DestinationId {
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(crate::Error::InvalidDestination(
                "The destination field is required.".to_string(),
            ));
        }
        if normalized.len() > MAX_DESTINATION_LEN {
            return Err(crate::Error::InvalidDestination(format!(
                "The destination may not be greater than {MAX_DESTINATION_LEN} characters."
            )));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(crate::Error::InvalidDestination(
                "The destination may only contain letters, numbers, dashes and underscores."
                    .to_string(),
            ));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DestinationId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<DestinationId> for String {
    fn from(value: DestinationId) -> Self {
        value.0
    }
}

impl fmt::Debug for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DestinationId({})", self.0)
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
