//! Run identifiers for ephemeral resources.
//!
//! Identifiers are `prefix-suffix`, where the suffix is 16 base-36
//! characters drawn from the OS random source (~82 bits). The charset and
//! length limit are the lowest common denominator of cloud naming rules
//! (S3 bucket names, DNS labels): lowercase letters, digits and `-`, at most
//! 63 characters, starting and ending with a letter or digit.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HarnessError, HarnessResult};

/// Maximum identifier length.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Length of the random suffix.
pub const SUFFIX_LEN: usize = 16;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A provider-legal, collision-resistant name owned by one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunIdentifier(String);

impl RunIdentifier {
    /// Generate a fresh identifier under `prefix`.
    pub fn generate(prefix: &str) -> HarnessResult<Self> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return Err(HarnessError::Configuration(
                "identifier prefix must not be empty".to_string(),
            ));
        }
        validate_charset(&prefix)?;
        if prefix.len() + 1 + SUFFIX_LEN > MAX_IDENTIFIER_LEN {
            return Err(HarnessError::Configuration(format!(
                "identifier prefix '{}' is too long: at most {} characters",
                prefix,
                MAX_IDENTIFIER_LEN - 1 - SUFFIX_LEN
            )));
        }

        Ok(Self(format!("{}-{}", prefix, random_suffix())))
    }

    /// Accept an existing identifier, e.g. to clean up an earlier run.
    pub fn parse(value: &str) -> HarnessResult<Self> {
        if value.is_empty() || value.len() > MAX_IDENTIFIER_LEN {
            return Err(HarnessError::Configuration(format!(
                "identifier '{}' must be 1..={} characters",
                value, MAX_IDENTIFIER_LEN
            )));
        }
        validate_charset(value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The human-readable part before the random suffix.
    pub fn prefix(&self) -> &str {
        self.0.rsplit_once('-').map(|(prefix, _)| prefix).unwrap_or("")
    }

    /// The random part after the last `-`.
    pub fn suffix(&self) -> &str {
        self.0.rsplit_once('-').map(|(_, suffix)| suffix).unwrap_or(&self.0)
    }
}

impl fmt::Display for RunIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RunIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunIdentifier {
    type Error = HarnessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RunIdentifier> for String {
    fn from(id: RunIdentifier) -> Self {
        id.0
    }
}

fn validate_charset(value: &str) -> HarnessResult<()> {
    let legal = value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    let bounded = value
        .bytes()
        .next()
        .zip(value.bytes().last())
        .map(|(first, last)| first != b'-' && last != b'-')
        .unwrap_or(false);

    if legal && bounded {
        Ok(())
    } else {
        Err(HarnessError::Configuration(format!(
            "'{}' may only contain lowercase letters, digits and inner '-'",
            value
        )))
    }
}

/// 16 base-36 characters from the 122 random bits of a v4 UUID.
fn random_suffix() -> String {
    let raw = Uuid::new_v4().as_u128();
    // Drop the fixed version nibble (bits 76..80) and variant bits (62..64).
    let high = raw >> 80;
    let mid = (raw >> 64) & 0xfff;
    let low = raw & ((1u128 << 62) - 1);
    let mut bits = (high << 74) | (mid << 62) | low;

    let mut suffix = [0u8; SUFFIX_LEN];
    for slot in suffix.iter_mut().rev() {
        *slot = ALPHABET[(bits % 36) as usize];
        bits /= 36;
    }
    suffix.iter().map(|&b| b as char).collect()
}
