use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{IDENTITY_PREFIX, IDENTITY_SUFFIX_LEN};

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Pseudonymous per-profile identity, `anon-` followed by a random base-36
/// suffix. Purely client-asserted; nothing verifies it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap a previously persisted identity string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a new random identity
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..IDENTITY_SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();
        Self(format!("{IDENTITY_PREFIX}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
