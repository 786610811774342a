//! Postal code (CEP) and address query types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of digits in a normalized CEP.
pub const CEP_DIGITS: usize = 8;

/// A Brazilian postal code normalized to exactly eight ASCII digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Cep(String);

impl Cep {
    /// Normalize free-form input by discarding every non-digit character.
    ///
    /// Returns `None` unless exactly [`CEP_DIGITS`] digits remain, so
    /// `"01001-000"` and `" 01.001.000 "` both parse while `"invalid"`
    /// and `"0100100"` do not.
    pub fn parse(input: &str) -> Option<Self> {
        let digits: String = input.chars().filter(char::is_ascii_digit).collect();
        (digits.len() == CEP_DIGITS).then_some(Self(digits))
    }

    /// The normalized digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Cep {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Street-level address query.
///
/// Only non-emptiness of the required fields is checked locally. Whether a
/// query is too broad or malformed is decided by the native library.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressQuery {
    /// City name.
    pub city: String,

    /// Street type, e.g. `Rua` or `Avenida`.
    pub street_type: String,

    /// Street name.
    pub street: String,

    /// Two-letter state code.
    pub state: String,

    /// District (bairro). Empty when not filtering by district.
    #[serde(default)]
    pub district: String,
}

impl AddressQuery {
    /// Create a query without a district filter.
    pub fn new(
        city: impl Into<String>,
        street_type: impl Into<String>,
        street: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self {
            city: city.into(),
            street_type: street_type.into(),
            street: street.into(),
            state: state.into(),
            district: String::new(),
        }
    }

    /// Restrict the query to a district.
    pub fn with_district(mut self, district: impl Into<String>) -> Self {
        self.district = district.into();
        self
    }

    /// Name of the first required field that is blank, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("city", &self.city),
            ("street_type", &self.street_type),
            ("street", &self.street),
            ("state", &self.state),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}
