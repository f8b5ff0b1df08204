use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CryptoError;

/// Parse a base-10 integer, or base-16 when prefixed with `0x`
fn parse_biguint(s: &str) -> Result<BigUint, CryptoError> {
    let trimmed = s.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
        None => BigUint::parse_bytes(trimmed.as_bytes(), 10),
    };
    parsed.ok_or_else(|| CryptoError::InvalidEncoding(format!("{:?}", s)))
}

/// Integer newtypes share the same string encoding for storage and transport
macro_rules! integer_newtype {
    ($name:ident) => {
        impl $name {
            pub fn new(value: BigUint) -> Self {
                Self(value)
            }

            pub fn as_biguint(&self) -> &BigUint {
                &self.0
            }

            /// Lowercase hexadecimal without leading zeros
            pub fn to_hex(&self) -> String {
                self.0.to_str_radix(16)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(BigUint::from(value))
            }
        }

        impl From<BigUint> for $name {
            fn from(value: BigUint) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = CryptoError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_biguint(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

/// Arbitrary-precision non-negative integer used as a private key or an
/// ephemeral per-message secret.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Scalar(BigUint);

integer_newtype!(Scalar);

// Scalars may be private keys; keep them out of logs
impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Scalar(<redacted>)")
    }
}

/// Arbitrary-precision integer representing a group element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Point(BigUint);

integer_newtype!(Point);

/// Key pair for one user identity. `public_key == combine(private_key, G)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: Scalar,
    pub public_key: Point,
}

/// Encrypted message body: ephemeral public point plus masked text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub c1: Point,
    pub c2: String,
}
