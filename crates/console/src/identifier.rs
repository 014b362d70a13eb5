use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::ValidationError;

static IDENTIFIER_PATTERN: OnceLock<Regex> = OnceLock::new();

fn identifier_pattern() -> &'static Regex {
    IDENTIFIER_PATTERN.get_or_init(|| {
        Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        )
        .expect("identifier pattern should compile")
    })
}

/// A record identifier that passed [`validate`]. Only the canonical hyphenated
/// form is accepted; simple, braced and URN spellings are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidIdentifier(Uuid);

impl fmt::Display for ValidIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ValidIdentifier {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate(value)
    }
}

/// Surrounding whitespace is ignored, so pasted identifiers still validate.
pub fn validate(input: &str) -> Result<ValidIdentifier, ValidationError> {
    let trimmed = input.trim();
    if !identifier_pattern().is_match(trimmed) {
        return Err(ValidationError);
    }
    Uuid::parse_str(trimmed)
        .map(ValidIdentifier)
        .map_err(|_| ValidationError)
}
