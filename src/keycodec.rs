//! keycodec — one-way derivation of store identifiers from key material.
//!
//! Identifier = lowercase hex of the X coordinate of a secp256k1 public point,
//! fixed width (64 chars). A private scalar is first lifted to its public point
//! (`G * k`); a public identity is used as is.

use k256::elliptic_curve::group::prime::PrimeCurveAffine;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::PrimeField;
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use std::fmt;

use crate::error::StoreError;

/// Width of an identifier in hex characters.
pub const IDENTIFIER_HEX_LEN: usize = 64;

/// Key material accepted by the store: either a private scalar or a public identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyMaterial {
    Private(Scalar),
    Public(AffinePoint),
}

impl KeyMaterial {
    /// Public point for this material (derives `G * k` for a private scalar).
    pub fn public_point(&self) -> AffinePoint {
        match self {
            KeyMaterial::Private(k) => public_point(k),
            KeyMaterial::Public(p) => *p,
        }
    }
}

impl From<Scalar> for KeyMaterial {
    fn from(k: Scalar) -> Self {
        KeyMaterial::Private(k)
    }
}

impl From<AffinePoint> for KeyMaterial {
    fn from(p: AffinePoint) -> Self {
        KeyMaterial::Public(p)
    }
}

/// Store key. Always 64 lowercase hex characters.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Identifier of a public point (its X coordinate).
    pub fn from_point(p: &AffinePoint) -> Result<Self, StoreError> {
        if bool::from(p.is_identity()) {
            return Err(StoreError::InvalidKeyMaterial(
                "point at infinity has no X coordinate".into(),
            ));
        }
        let enc = p.to_encoded_point(false);
        let x = enc
            .x()
            .ok_or_else(|| StoreError::InvalidKeyMaterial("point has no X coordinate".into()))?;
        Ok(Identifier(hex::encode(x)))
    }

    /// Parse an identifier coming from outside (snapshot keys, CLI).
    /// Shorter hex (unpadded big-number encoding) is left-padded to full width.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() || s.len() > IDENTIFIER_HEX_LEN {
            return Err(StoreError::InvalidKeyMaterial(format!(
                "identifier must be 1..={} hex chars, got {}",
                IDENTIFIER_HEX_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StoreError::InvalidKeyMaterial(format!(
                "identifier is not hex: {s}"
            )));
        }
        Ok(Identifier(format!("{:0>width$}", s, width = IDENTIFIER_HEX_LEN)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the identifier for the supplied material.
///
/// Fails with `InvalidKeyMaterial` when nothing usable is supplied.
pub fn identifier_for(material: Option<&KeyMaterial>) -> Result<Identifier, StoreError> {
    match material {
        Some(KeyMaterial::Private(k)) => {
            if *k == Scalar::ZERO {
                return Err(StoreError::InvalidKeyMaterial("zero private scalar".into()));
            }
            Identifier::from_point(&public_point(k))
        }
        Some(KeyMaterial::Public(p)) => Identifier::from_point(p),
        None => Err(StoreError::InvalidKeyMaterial(
            "neither a private scalar nor a public identity was supplied".into(),
        )),
    }
}

/// `G * k` in affine form.
pub fn public_point(k: &Scalar) -> AffinePoint {
    AffinePoint::from(ProjectivePoint::GENERATOR * k)
}

// ---------------------- hex helpers (scalars / points) ----------------------

/// Fixed-width (64 chars) lowercase hex of a scalar.
pub fn scalar_to_hex(k: &Scalar) -> String {
    hex::encode(k.to_bytes())
}

/// Parse a big-endian hex scalar; short input is left-padded. Must be < n.
pub fn scalar_from_hex(s: &str) -> Option<Scalar> {
    let s = s.trim();
    if s.is_empty() || s.len() > 64 {
        return None;
    }
    let padded = format!("{:0>64}", s);
    let raw = hex::decode(padded).ok()?;
    let bytes = FieldBytes::clone_from_slice(&raw);
    Option::from(Scalar::from_repr(bytes))
}

/// Compressed SEC1 hex of a point.
pub fn point_to_hex(p: &AffinePoint) -> String {
    hex::encode(p.to_encoded_point(true).as_bytes())
}

pub fn point_from_hex(s: &str) -> Option<AffinePoint> {
    let raw = hex::decode(s.trim()).ok()?;
    let enc = EncodedPoint::from_bytes(&raw).ok()?;
    Option::from(AffinePoint::from_encoded_point(&enc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pads_short_hex() {
        let id = Identifier::parse("ABC").unwrap();
        assert_eq!(id.as_str().len(), IDENTIFIER_HEX_LEN);
        assert!(id.as_str().ends_with("abc"));
        assert!(Identifier::parse("xyz").is_err());
        assert!(Identifier::parse("").is_err());
    }

    #[test]
    fn scalar_hex_roundtrip() {
        let k = Scalar::from(0xdead_beefu64);
        let h = scalar_to_hex(&k);
        assert_eq!(h.len(), 64);
        assert_eq!(scalar_from_hex(&h), Some(k));
        assert_eq!(scalar_from_hex("deadbeef"), Some(k));
    }
}
