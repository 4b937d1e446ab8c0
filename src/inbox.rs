//! Reply subject allocation.
//!
//! One base inbox (`<prefix>.<random>.`) is minted per multiplexer; every
//! request then gets a random token appended to it. Tokens are 22
//! alphanumeric characters (~130 bits), so no counter needs to be shared
//! between callers.

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::constants::TOKEN_LEN;

/// Generate a random alphanumeric string of [`TOKEN_LEN`] characters.
pub fn random_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Create a unique inbox subject under `prefix`.
pub fn create_inbox(prefix: &str) -> String {
    format!("{}.{}", prefix, random_token())
}

/// Mints base inboxes and correlation tokens.
#[derive(Debug, Clone)]
pub struct TokenAllocator {
    prefix: String,
}

impl TokenAllocator {
    /// Allocator rooted at `prefix` (e.g. `_INBOX`).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// New base inbox, with trailing `.` so tokens can be appended directly.
    pub fn base_inbox(&self) -> String {
        format!("{}.", create_inbox(&self.prefix))
    }

    /// New correlation token, optionally prefixed with a readable hint.
    pub fn token(&self, hint: Option<&str>) -> String {
        match hint {
            Some(hint) if !hint.is_empty() => format!("{}{}", sanitize(hint), random_token()),
            _ => random_token(),
        }
    }
}

/// Keep only characters that are safe inside a single subject token.
fn sanitize(hint: &str) -> String {
    hint.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
