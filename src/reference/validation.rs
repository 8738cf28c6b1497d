//! Input validation for slugs (wallet, tier and trigger identifiers)
//!
//! Wallet slugs become part of a storage namespace name, so they are held to
//! a strict character set. Fields are private to force validation through
//! the public API.

use std::fmt;

/// Maximum slug length; keeps `wallet_<slug>` inside Postgres' 63-byte identifier limit.
pub const MAX_SLUG_LEN: usize = 48;

// ============================================================================
// Validation Errors
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SlugError {
    #[error("Invalid length for {field}: expected 1-{max}, got {actual}")]
    InvalidLength {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("Invalid format for {field}: '{value}' (expected: {expected})")]
    InvalidFormat {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl From<SlugError> for crate::error::LedgerError {
    fn from(e: SlugError) -> Self {
        let field = match &e {
            SlugError::InvalidLength { field, .. } | SlugError::InvalidFormat { field, .. } => {
                *field
            }
        };
        crate::error::LedgerError::invalid_field(field, e.to_string())
    }
}

// ============================================================================
// Slug - Validated identifier (Private Fields)
// ============================================================================

/// Validated slug: `^[a-z0-9][a-z0-9_-]{0,47}$`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slug(String);

impl Slug {
    /// # Examples
    /// ```
    /// use wallet_ledger::reference::validation::Slug;
    ///
    /// assert!(Slug::new("wallet", "points").is_ok());
    /// assert!(Slug::new("wallet", "Points").is_err()); // uppercase rejected
    /// ```
    pub fn new(field: &'static str, value: &str) -> Result<Self, SlugError> {
        if value.is_empty() || value.len() > MAX_SLUG_LEN {
            return Err(SlugError::InvalidLength {
                field,
                max: MAX_SLUG_LEN,
                actual: value.len(),
            });
        }

        let mut chars = value.chars();
        let first_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        let rest_ok =
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !first_ok || !rest_ok {
            return Err(SlugError::InvalidFormat {
                field,
                value: value.to_string(),
                expected: "lowercase letters, digits, '_' or '-', starting with a letter or digit",
            });
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
