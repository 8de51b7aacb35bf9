//! Prime-order group used by every primitive in the crate: Ristretto255.
//!
//! Group elements and scalars are wrapped so that they serialize as hex and
//! so that the rest of the crate never touches curve25519-dalek directly.

use crate::*;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::Serializer;
use sha2::{Digest, Sha512};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// An element of the Ristretto255 group
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GroupElement(RistrettoPoint);

/// A scalar modulo the group order
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupScalar(Scalar);

impl GroupElement {
    pub fn generator() -> Self {
        GroupElement(RISTRETTO_BASEPOINT_POINT)
    }

    pub fn identity() -> Self {
        GroupElement(RistrettoPoint::identity())
    }

    /// `g^exponent`, written additively
    pub fn from_exponent(exponent: &GroupScalar) -> Self {
        GroupElement(RISTRETTO_BASEPOINT_POINT * exponent.0)
    }

    pub fn is_identity(&self) -> bool {
        *self == GroupElement::identity()
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidElement);
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(bytes);
        CompressedRistretto(buf)
            .decompress()
            .map(GroupElement)
            .ok_or(CryptoError::InvalidElement)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl GroupScalar {
    pub fn zero() -> Self {
        GroupScalar(Scalar::zero())
    }

    pub fn one() -> Self {
        GroupScalar(Scalar::one())
    }

    pub fn from_u64(n: u64) -> Self {
        GroupScalar(Scalar::from(n))
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        GroupScalar(Scalar::random(rng))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Parse a canonical scalar encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidScalar);
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(bytes);
        Scalar::from_canonical_bytes(buf)
            .map(GroupScalar)
            .ok_or(CryptoError::InvalidScalar)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl Add for GroupElement {
    type Output = GroupElement;
    fn add(self, rhs: GroupElement) -> GroupElement {
        GroupElement(self.0 + rhs.0)
    }
}

impl Sub for GroupElement {
    type Output = GroupElement;
    fn sub(self, rhs: GroupElement) -> GroupElement {
        GroupElement(self.0 - rhs.0)
    }
}

impl Mul<GroupScalar> for GroupElement {
    type Output = GroupElement;
    fn mul(self, rhs: GroupScalar) -> GroupElement {
        GroupElement(self.0 * rhs.0)
    }
}

impl Add for GroupScalar {
    type Output = GroupScalar;
    fn add(self, rhs: GroupScalar) -> GroupScalar {
        GroupScalar(self.0 + rhs.0)
    }
}

impl Sub for GroupScalar {
    type Output = GroupScalar;
    fn sub(self, rhs: GroupScalar) -> GroupScalar {
        GroupScalar(self.0 - rhs.0)
    }
}

impl Mul for GroupScalar {
    type Output = GroupScalar;
    fn mul(self, rhs: GroupScalar) -> GroupScalar {
        GroupScalar(self.0 * rhs.0)
    }
}

impl Neg for GroupScalar {
    type Output = GroupScalar;
    fn neg(self) -> GroupScalar {
        GroupScalar(-self.0)
    }
}

impl fmt::Debug for GroupElement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GroupElement({})", self.to_hex())
    }
}

impl fmt::Debug for GroupScalar {
    // Scalars are frequently secret
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("GroupScalar(..)")
    }
}

impl fmt::Display for GroupElement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl serde::Serialize for GroupElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for GroupElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = decode_hex_32(&s).map_err(D::Error::custom)?;
        GroupElement::from_bytes(&bytes).map_err(D::Error::custom)
    }
}

impl serde::Serialize for GroupScalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for GroupScalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = decode_hex_32(&s).map_err(D::Error::custom)?;
        GroupScalar::from_bytes(&bytes).map_err(D::Error::custom)
    }
}

/// Domain-separated hashing of group values into a scalar.
///
/// Every input is length-prefixed so distinct input sequences never collide.
pub struct HashBuilder(Sha512);

impl HashBuilder {
    pub fn new(domain: &str) -> Self {
        HashBuilder(Sha512::new()).bytes(domain.as_bytes())
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.0.update(&(data.len() as u64).to_be_bytes());
        self.0.update(data);
        self
    }

    pub fn element(self, e: &GroupElement) -> Self {
        self.bytes(&e.to_bytes())
    }

    pub fn scalar(self, s: &GroupScalar) -> Self {
        self.bytes(&s.to_bytes())
    }

    pub fn number(self, n: u64) -> Self {
        self.bytes(&n.to_be_bytes())
    }

    pub fn finish(self) -> GroupScalar {
        GroupScalar(Scalar::from_hash(self.0))
    }
}

/// Find `m` in `0..=max` such that `g^m == element`.
///
/// Tallies are small counts, so a linear walk is sufficient.
pub fn discrete_log(element: &GroupElement, max: u64) -> Option<u64> {
    let g = GroupElement::generator();
    let mut acc = GroupElement::identity();
    for m in 0..=max {
        if acc == *element {
            return Some(m);
        }
        acc = acc + g;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn element_hex_serde() {
        let e = GroupElement::from_exponent(&GroupScalar::random(&mut OsRng));
        let json = serde_json::to_string(&e).unwrap();
        let back: GroupElement = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);

        // Not a valid ristretto encoding
        let bad = format!("\"{}\"", "ff".repeat(32));
        assert!(serde_json::from_str::<GroupElement>(&bad).is_err());
    }

    #[test]
    fn scalar_rejects_non_canonical() {
        assert!(GroupScalar::from_bytes(&[0xff; 32]).is_err());
        assert!(GroupScalar::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn hash_is_domain_separated() {
        let e = GroupElement::generator();
        let a = HashBuilder::new("a").element(&e).finish();
        let b = HashBuilder::new("b").element(&e).finish();
        assert_ne!(a, b);
        assert_eq!(a, HashBuilder::new("a").element(&e).finish());
    }

    #[test]
    fn discrete_log_is_bounded() {
        let seven = GroupElement::from_exponent(&GroupScalar::from_u64(7));
        assert_eq!(discrete_log(&seven, 10), Some(7));
        assert_eq!(discrete_log(&seven, 6), None);
        assert_eq!(discrete_log(&GroupElement::identity(), 0), Some(0));
    }
}
