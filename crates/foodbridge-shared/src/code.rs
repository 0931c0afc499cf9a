//! Delivery verification codes.
//!
//! A code is exactly four decimal digits, drawn uniformly at random when a
//! driver is assigned.  It is shown in person at pickup and at delivery, so
//! it only needs to resist casual guessing, not a cryptographic adversary.
//! Uniqueness across records is not required.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{DELIVERY_CODE_LEN, DELIVERY_CODE_SPACE};
use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeliveryCode(String);

impl DeliveryCode {
    /// Draw a fresh code.  Leading zeros are kept (`"0042"`).
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let n = rng.gen_range(0..DELIVERY_CODE_SPACE);
        Self(format!("{:0width$}", n, width = DELIVERY_CODE_LEN))
    }

    /// Parse a stored code, requiring exactly four ASCII digits.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if s.len() == DELIVERY_CODE_LEN && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(ValidationError::InvalidDeliveryCode(s.to_string()))
        }
    }

    /// Exact string comparison against user input.  Surrounding whitespace is
    /// ignored but nothing else is normalized, so `"99"` never matches
    /// `"0099"`.
    pub fn matches(&self, submitted: &str) -> bool {
        self.0 == submitted.trim()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeliveryCode {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<DeliveryCode> for String {
    fn from(code: DeliveryCode) -> Self {
        code.0
    }
}

impl fmt::Display for DeliveryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
