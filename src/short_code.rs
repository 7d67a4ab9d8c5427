use std::{fmt, sync::Arc};

use rand::Rng;
use rearch::CapsuleHandle;
use thiserror::Error;

/// Length of every generated [`ShortCode`].
pub const GENERATED_LEN: usize = 10;

const MIN_LEN: usize = 7;
const MAX_LEN: usize = 14;

/// An alphanumeric identifier that stands in for a long URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShortCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortCodeValidationError {
    #[error("short code must be {} to {} characters long, got {actual}", MIN_LEN, MAX_LEN)]
    InvalidLength { actual: usize },
    #[error("short code contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

impl ShortCode {
    /// # Errors
    /// Will return [`Err`] when `code` is not 7 to 14 ASCII alphanumeric characters.
    pub fn new(code: String) -> Result<Self, ShortCodeValidationError> {
        let invalid_chars: String = code.chars().filter(|c| !c.is_ascii_alphanumeric()).collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }
        if !(MIN_LEN..=MAX_LEN).contains(&code.len()) {
            return Err(ShortCodeValidationError::InvalidLength { actual: code.len() });
        }
        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces candidate short codes. Candidates may collide with existing ones;
/// the store's unique constraint is the final arbiter.
#[cfg_attr(test, mockall::automock)]
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> ShortCode;
}

pub fn code_generator_capsule(_: CapsuleHandle) -> Arc<dyn CodeGenerator> {
    Arc::new(RandomCodeGenerator)
}

pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> ShortCode {
        // NOTE: 56 bits always fit in GENERATED_LEN base62 digits
        const BYTES_TO_TAKE: usize = 7;

        let mut base62_buf = [0; 16];
        rand::rng().fill_bytes(&mut base62_buf[..BYTES_TO_TAKE]);
        let encoded = base62::encode(u128::from_le_bytes(base62_buf));

        ShortCode(format!("{encoded:0>width$}", width = GENERATED_LEN))
    }
}
