//! Module helpers of the reference SDK: security-questions share derivation,
//! seed-phrase sealing and account derivation, catch-up masks.
//!
//! Sealing (AES-256-GCM):
//!   key   = HMAC-SHA256(secret, "tkey-store")
//!   nonce = 12 случайных байт (OsRng)
//!   blob  = nonce || ciphertext || tag, hex-encoded

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use k256::elliptic_curve::ops::Reduce;
use k256::{Scalar, U256};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{SdkError, SdkResult};

type HmacSha256 = Hmac<Sha256>;

pub const MODULE_SECURITY_QUESTIONS: &str = "securityQuestions";
pub const MODULE_SEED_PHRASE: &str = "seedPhrase";

const STORE_KEY_LABEL: &[u8] = b"tkey-store";
const ACCOUNT_LABEL: &[u8] = b"seed-phrase-account";
const GCM_NONCE_LEN: usize = 12;

/// Security-questions module state kept in key metadata.
/// `nonce = share(index) - H(answer, question)` on polynomial `polynomial_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityQuestionStore {
    pub question: String,
    pub share_index: String,
    pub polynomial_id: String,
    pub nonce: String,
}

/// One sealed seed phrase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSeedPhrase {
    #[serde(rename = "type")]
    pub kind: String,
    pub sealed: String,
}

/// Opened seed phrase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPhraseEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub seed_phrase: String,
}

pub fn hmac_bytes(key: &[u8], msg: &[u8]) -> SdkResult<[u8; 32]> {
    // KeyInit тоже в scope: вызываем через Mac явно.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| SdkError::Encoding(format!("hmac key: {e}")))?;
    mac.update(msg);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

pub fn hmac_scalar(key: &[u8], msg: &[u8]) -> SdkResult<Scalar> {
    let digest = hmac_bytes(key, msg)?;
    Ok(<Scalar as Reduce<U256>>::reduce(U256::from_be_slice(&digest)))
}

/// Additive mask of a scalar under `key` for `label`.
pub fn mask(key: &Scalar, label: &str) -> SdkResult<Scalar> {
    hmac_scalar(&key.to_bytes(), label.as_bytes())
}

/// H(answer, question) of the security-questions module.
pub fn answer_hash(answer: &str, question: &str) -> SdkResult<Scalar> {
    hmac_scalar(answer.as_bytes(), question.as_bytes())
}

/// Deterministic account key of a seed phrase (whitespace-normalized).
pub fn account_key(phrase: &str) -> SdkResult<Scalar> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    hmac_scalar(ACCOUNT_LABEL, normalized.as_bytes())
}

fn store_cipher(secret: &Scalar) -> SdkResult<Aes256Gcm> {
    let mut key = hmac_bytes(&secret.to_bytes(), STORE_KEY_LABEL)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    key.zeroize();
    Ok(cipher)
}

pub fn seal(secret: &Scalar, plaintext: &[u8]) -> SdkResult<String> {
    let cipher = store_cipher(secret)?;
    let mut nonce = [0u8; GCM_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| SdkError::Seal(e.to_string()))?;
    let mut out = Vec::with_capacity(GCM_NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(hex::encode(out))
}

pub fn unseal(secret: &Scalar, sealed_hex: &str) -> SdkResult<Vec<u8>> {
    let raw = hex::decode(sealed_hex.trim()).map_err(|e| SdkError::Encoding(e.to_string()))?;
    if raw.len() < GCM_NONCE_LEN + 16 {
        return Err(SdkError::Seal("sealed blob too short".into()));
    }
    let cipher = store_cipher(secret)?;
    cipher
        .decrypt(Nonce::from_slice(&raw[..GCM_NONCE_LEN]), &raw[GCM_NONCE_LEN..])
        .map_err(|e| SdkError::Seal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_roundtrip_and_wrong_key() {
        let k = Scalar::from(77u64);
        let blob = seal(&k, b"seed sock milk").unwrap();
        assert_eq!(unseal(&k, &blob).unwrap(), b"seed sock milk");
        assert!(unseal(&Scalar::from(78u64), &blob).is_err());
    }

    #[test]
    fn hmac_matches_rfc4231_case_2() {
        let out = hmac_bytes(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(out),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn account_key_ignores_spacing() {
        assert_eq!(
            account_key("a  b c").unwrap(),
            account_key(" a b\tc ").unwrap()
        );
    }
}
