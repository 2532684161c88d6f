//! Randomized names for stored archives.

use rand::Rng;
use rand::distr::Alphanumeric;
use std::fmt;
use std::path::Path;

/// Longest extension carried over from the client-supplied file name.
const MAX_EXTENSION_LEN: usize = 16;

/// A stored file name: a random alphanumeric token plus the original extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredName(String);

impl StoredName {
    /// Generate a name with the default 40-character token.
    pub fn generate(original: &str) -> Self {
        Self::with_token_len(original, crate::STORED_NAME_TOKEN_LEN)
    }

    pub fn with_token_len(original: &str, len: usize) -> Self {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        match extension_of(original) {
            Some(ext) => Self(format!("{token}.{ext}")),
            None => Self(token),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoredName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract a safe, lowercased extension from a client-supplied file name.
///
/// Only the final component is used; anything that is not plain ASCII
/// alphanumeric is dropped.
pub fn extension_of(original: &str) -> Option<String> {
    let file_name = original.rsplit(['/', '\\']).next()?;
    let ext = Path::new(file_name).extension()?.to_str()?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
