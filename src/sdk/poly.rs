//! Polynomials over the secp256k1 scalar field: share evaluation, Feldman
//! commitments, Lagrange interpolation.

use k256::elliptic_curve::Field;
use k256::{AffinePoint, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::keycodec::point_to_hex;

/// f(x) = c0 + c1 x + ... ; c0 is the secret.
#[derive(Clone)]
pub struct Polynomial {
    coeffs: Vec<Scalar>,
}

impl Polynomial {
    /// Random polynomial of `threshold - 1` degree with `f(0) = secret`.
    pub fn random(secret: Scalar, threshold: usize) -> Self {
        let mut coeffs = Vec::with_capacity(threshold.max(1));
        coeffs.push(secret);
        for _ in 1..threshold {
            coeffs.push(Scalar::random(&mut OsRng));
        }
        Self { coeffs }
    }

    pub fn secret(&self) -> Scalar {
        self.coeffs[0]
    }

    /// Horner.
    pub fn eval(&self, x: &Scalar) -> Scalar {
        let mut acc = Scalar::ZERO;
        for c in self.coeffs.iter().rev() {
            acc = acc * x + c;
        }
        acc
    }

    /// Public commitments `G * c_j`.
    pub fn commitments(&self) -> Vec<AffinePoint> {
        self.coeffs
            .iter()
            .map(|c| AffinePoint::from(ProjectivePoint::GENERATOR * c))
            .collect()
    }

    /// Recover all coefficients from exactly `threshold` points.
    /// `None` on duplicate x values.
    pub fn interpolate(points: &[(Scalar, Scalar)]) -> Option<Self> {
        let n = points.len();
        if n == 0 {
            return None;
        }
        let mut coeffs = vec![Scalar::ZERO; n];
        for (i, &(xi, yi)) in points.iter().enumerate() {
            // basis_i(x) = prod_{j != i} (x - x_j) / (x_i - x_j)
            let mut basis = vec![Scalar::ONE];
            let mut denom = Scalar::ONE;
            for (j, &(xj, _)) in points.iter().enumerate() {
                if i == j {
                    continue;
                }
                let mut next = vec![Scalar::ZERO; basis.len() + 1];
                for (k, &c) in basis.iter().enumerate() {
                    next[k] -= c * xj;
                    next[k + 1] += c;
                }
                basis = next;
                denom *= xi - xj;
            }
            let inv: Option<Scalar> = denom.invert().into();
            let scale = yi * inv?;
            for (k, &c) in basis.iter().enumerate() {
                coeffs[k] += c * scale;
            }
        }
        Some(Self { coeffs })
    }
}

/// `G * y == sum_j C_j * x^j`
pub fn verify_share(commitments: &[AffinePoint], x: &Scalar, y: &Scalar) -> bool {
    let mut acc = ProjectivePoint::IDENTITY;
    let mut xpow = Scalar::ONE;
    for c in commitments {
        acc += ProjectivePoint::from(*c) * xpow;
        xpow *= x;
    }
    ProjectivePoint::GENERATOR * y == acc
}

/// Stable id of a polynomial: first 16 bytes of SHA-256 over its commitments.
pub fn polynomial_id(commitments: &[AffinePoint]) -> String {
    let mut h = Sha256::new();
    for c in commitments {
        h.update(point_to_hex(c).as_bytes());
    }
    hex::encode(&h.finalize()[..16])
}
