//! Service provider: the default key identity of a store.
//!
//! Когда вызывающий не передал ключ, store и lock-таблица используют публичную
//! точку провайдера. Секрет (postbox key) обнуляется в Drop.

use k256::{AffinePoint, Scalar};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::keycodec::{public_point, scalar_from_hex, scalar_to_hex, KeyMaterial};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProvider {
    /// Hex scalar.
    postbox_key: String,
}

impl ServiceProvider {
    pub fn new(postbox_key: &Scalar) -> Self {
        Self {
            postbox_key: scalar_to_hex(postbox_key),
        }
    }

    /// Build from a hex private key; `None` if it is not a valid non-zero scalar.
    pub fn from_hex(hex_key: &str) -> Option<Self> {
        let k = scalar_from_hex(hex_key)?;
        if k == Scalar::ZERO {
            return None;
        }
        Some(Self::new(&k))
    }

    pub fn postbox_key(&self) -> Scalar {
        // Validated on construction; deserialized garbage degrades to zero and
        // is rejected by identifier derivation.
        scalar_from_hex(&self.postbox_key).unwrap_or(Scalar::ZERO)
    }

    pub fn retrieve_pub_key_point(&self) -> AffinePoint {
        public_point(&self.postbox_key())
    }

    /// Public identity used as the store fallback key.
    pub fn key_material(&self) -> KeyMaterial {
        KeyMaterial::Public(self.retrieve_pub_key_point())
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServiceProvider(..)")
    }
}

impl Drop for ServiceProvider {
    fn drop(&mut self) {
        self.postbox_key.zeroize();
    }
}
