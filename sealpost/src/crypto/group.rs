//! Scalar-to-point group operation.
//!
//! Encryption only relies on `combine` being commutative in the scalar:
//! `combine(a, combine(b, G)) == combine(b, combine(a, G))`. Two backends are
//! provided and one is chosen at construction time:
//!
//! - [`LegacyGroup`] multiplies plain integers. It is not a discrete-log-hard
//!   group and offers no secrecy; it exists for compatibility with stored
//!   legacy keys and for testing.
//! - [`RistrettoGroup`] performs scalar multiplication on the Ristretto group
//!   over Curve25519.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::CompressedRistretto;
use curve25519_dalek::scalar::Scalar as CurveScalar;
use num_bigint::BigUint;
use rand::{Rng, RngCore};

use super::types::{Point, Scalar};
use crate::error::CryptoError;

/// Big-endian bytes of the legacy base point
/// `0x8979872349872349872349872349872349872349872349872349872349872349`.
const LEGACY_BASE_POINT: [u8; 32] = [
    0x89, 0x79, 0x87, 0x23, 0x49, 0x87, 0x23, 0x49, 0x87, 0x23, 0x49, 0x87, 0x23, 0x49, 0x87, 0x23,
    0x49, 0x87, 0x23, 0x49, 0x87, 0x23, 0x49, 0x87, 0x23, 0x49, 0x87, 0x23, 0x49, 0x87, 0x23, 0x49,
];

/// Exclusive upper bound of each of the three legacy random draws
const LEGACY_DRAW_BOUND: u64 = 1_000_000_000_000_000_000;

/// The abstract group operation underlying key derivation and shared secrets.
pub trait GroupOperation: Send + Sync + fmt::Debug {
    /// Short backend name for logs and configuration
    fn name(&self) -> &'static str;

    /// The fixed public base point `G`
    fn base_point(&self) -> Point;

    /// Draw a fresh scalar
    fn random_scalar(&self) -> Scalar;

    /// Combine a scalar with a point
    fn combine(&self, scalar: &Scalar, point: &Point) -> Result<Point, CryptoError>;
}

/// Integer multiplication with the original base point.
///
/// Scalars are neither bounded nor checked for zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyGroup;

impl GroupOperation for LegacyGroup {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn base_point(&self) -> Point {
        Point::new(BigUint::from_bytes_be(&LEGACY_BASE_POINT))
    }

    fn random_scalar(&self) -> Scalar {
        let mut rng = rand::thread_rng();
        let product = (0..3).fold(BigUint::from(1u8), |acc, _| {
            acc * BigUint::from(rng.gen_range(0..LEGACY_DRAW_BOUND))
        });
        Scalar::new(product)
    }

    fn combine(&self, scalar: &Scalar, point: &Point) -> Result<Point, CryptoError> {
        Ok(Point::new(scalar.as_biguint() * point.as_biguint()))
    }
}

/// Scalar multiplication on the Ristretto prime-order group.
///
/// Points are the little-endian integer reading of the 32-byte compressed
/// encoding. Scalars of any size are reduced modulo the group order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RistrettoGroup;

impl RistrettoGroup {
    fn to_curve_scalar(scalar: &Scalar) -> CurveScalar {
        // 2^256 mod l, used to fold 32-byte limbs from the most significant end
        let mut wide = [0u8; 64];
        wide[32] = 1;
        let radix = CurveScalar::from_bytes_mod_order_wide(&wide);

        let bytes = scalar.as_biguint().to_bytes_le();
        bytes.chunks(32).rev().fold(CurveScalar::ZERO, |acc, chunk| {
            let mut limb = [0u8; 32];
            limb[..chunk.len()].copy_from_slice(chunk);
            acc * radix + CurveScalar::from_bytes_mod_order(limb)
        })
    }

    fn decode_point(point: &Point) -> Result<curve25519_dalek::RistrettoPoint, CryptoError> {
        let bytes = point.as_biguint().to_bytes_le();
        if bytes.len() > 32 {
            return Err(CryptoError::InvalidPoint(format!(
                "{} bytes exceeds compressed point size",
                bytes.len()
            )));
        }
        let mut encoded = [0u8; 32];
        encoded[..bytes.len()].copy_from_slice(&bytes);
        CompressedRistretto(encoded)
            .decompress()
            .ok_or_else(|| CryptoError::InvalidPoint("not a canonical ristretto encoding".into()))
    }

    fn encode_point(point: &curve25519_dalek::RistrettoPoint) -> Point {
        Point::new(BigUint::from_bytes_le(point.compress().as_bytes()))
    }
}

impl GroupOperation for RistrettoGroup {
    fn name(&self) -> &'static str {
        "ristretto"
    }

    fn base_point(&self) -> Point {
        Self::encode_point(&RISTRETTO_BASEPOINT_POINT)
    }

    fn random_scalar(&self) -> Scalar {
        let mut wide = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut wide);
        let reduced = CurveScalar::from_bytes_mod_order_wide(&wide);
        Scalar::new(BigUint::from_bytes_le(reduced.as_bytes()))
    }

    fn combine(&self, scalar: &Scalar, point: &Point) -> Result<Point, CryptoError> {
        let decoded = Self::decode_point(point)?;
        Ok(Self::encode_point(&(Self::to_curve_scalar(scalar) * decoded)))
    }
}

/// Backend selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupKind {
    #[default]
    Legacy,
    Ristretto,
}

impl GroupKind {
    pub fn build(self) -> Arc<dyn GroupOperation> {
        match self {
            GroupKind::Legacy => Arc::new(LegacyGroup),
            GroupKind::Ristretto => Arc::new(RistrettoGroup),
        }
    }
}

impl FromStr for GroupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(GroupKind::Legacy),
            "ristretto" => Ok(GroupKind::Ristretto),
            other => Err(format!("unknown group backend {:?}", other)),
        }
    }
}
