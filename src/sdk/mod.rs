//! sdk — the threshold-key collaborator as seen by the scenarios.
//!
//! Scenarios only talk to `ThresholdSdk` handles produced by an `SdkFactory`;
//! the store reaches the SDK through `StorageLayer`. `reference` holds the
//! in-tree implementation (2-of-n over secp256k1) used for capture and replay.

use k256::Scalar;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{SdkError, SdkResult};
use crate::keycodec::{scalar_from_hex, scalar_to_hex};
use crate::provider::ServiceProvider;
use crate::store::StorageLayer;

pub mod mnemonic;
pub mod modules;
pub mod poly;
pub mod reference;

pub use modules::SeedPhraseEntry;
pub use reference::{ReferenceSdk, ThresholdKey};

/// Share index of the service-provider share.
pub const SERVICE_PROVIDER_INDEX: u64 = 1;

/// One evaluation point of the key polynomial.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub share: String,
    pub share_index: String,
}

/// A share plus the polynomial it was issued on. This is what devices keep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareStore {
    pub share: Share,
    #[serde(rename = "polynomialID")]
    pub polynomial_id: String,
}

impl ShareStore {
    pub fn new(value: &Scalar, index: &Scalar, polynomial_id: &str) -> Self {
        ShareStore {
            share: Share {
                share: index_to_hex(value),
                share_index: index_to_hex(index),
            },
            polynomial_id: polynomial_id.to_string(),
        }
    }

    pub fn value(&self) -> SdkResult<Scalar> {
        parse_scalar(&self.share.share)
    }

    pub fn index(&self) -> SdkResult<Scalar> {
        parse_scalar(&self.share.share_index)
    }

    /// Parse a share store out of a local-store entry.
    pub fn from_value(v: &Value) -> SdkResult<Self> {
        Ok(serde_json::from_value(v.clone())?)
    }
}

/// Serialization formats accepted by `input_share`/`output_share`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareFormat {
    Hex,
    Mnemonic,
}

impl FromStr for ShareFormat {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(ShareFormat::Hex),
            "mnemonic" => Ok(ShareFormat::Mnemonic),
            other => Err(SdkError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InitializedKey {
    pub pub_key: String,
    pub threshold: usize,
    pub total_shares: usize,
    /// Present only when this call created the key.
    pub priv_key: Option<Scalar>,
    pub device_share: Option<ShareStore>,
}

#[derive(Clone, Debug)]
pub struct ReconstructedKey {
    pub priv_key: Scalar,
    pub seed_phrase_keys: Vec<Scalar>,
    /// `priv_key` followed by module keys.
    pub all_keys: Vec<Scalar>,
}

#[derive(Clone, Debug)]
pub struct GenerateShareResult {
    pub new_share_index: String,
    pub new_share_stores: BTreeMap<String, ShareStore>,
}

#[derive(Clone, Debug)]
pub struct DeleteShareResult {
    pub new_share_stores: BTreeMap<String, ShareStore>,
}

/// Operations the compatibility scenarios drive.
pub trait ThresholdSdk: Send {
    /// Load key metadata; create a fresh key when none exists unless
    /// `never_initialize_new_key` is set (then `NotInitialized`).
    fn initialize(&mut self, never_initialize_new_key: bool) -> SdkResult<InitializedKey>;
    /// Re-read key metadata from storage.
    fn sync_latest_metadata(&mut self) -> SdkResult<()>;

    fn input_share_store(&mut self, store: ShareStore) -> SdkResult<()>;
    fn input_share(&mut self, share: &str, format: ShareFormat) -> SdkResult<()>;
    fn output_share_store(&self, index: &str) -> SdkResult<ShareStore>;
    fn output_share(&self, index: &str, format: ShareFormat) -> SdkResult<String>;
    fn share_indexes(&self) -> SdkResult<Vec<String>>;

    fn reconstruct_key(&mut self) -> SdkResult<ReconstructedKey>;
    fn generate_new_share(&mut self) -> SdkResult<GenerateShareResult>;
    fn delete_share(&mut self, index: &str) -> SdkResult<DeleteShareResult>;

    /// Adds a share protected by `answer`; returns its index.
    fn generate_security_question_share(&mut self, answer: &str, question: &str)
        -> SdkResult<String>;
    fn input_share_from_security_questions(&mut self, answer: &str) -> SdkResult<()>;
    fn change_security_question_and_answer(&mut self, answer: &str, question: &str)
        -> SdkResult<()>;

    fn set_seed_phrase(&mut self, kind: &str, phrase: &str) -> SdkResult<()>;
    fn get_seed_phrases(&self) -> SdkResult<Vec<SeedPhraseEntry>>;
    fn derive_seed_phrase_accounts(&self) -> SdkResult<Vec<Scalar>>;

    fn to_json(&self) -> SdkResult<Value>;
}

/// Builds SDK handles over a storage layer. One factory per SDK build.
pub trait SdkFactory: Send + Sync {
    fn version(&self) -> &str;
    fn open(&self, storage: Arc<dyn StorageLayer>, sp: ServiceProvider) -> Box<dyn ThresholdSdk>;
    fn from_json(
        &self,
        state: &Value,
        storage: Arc<dyn StorageLayer>,
        sp: ServiceProvider,
    ) -> SdkResult<Box<dyn ThresholdSdk>>;
}

/// Minimal hex (no leading zeros) used for share indexes and values.
pub fn index_to_hex(k: &Scalar) -> String {
    let full = scalar_to_hex(k);
    let trimmed = full.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn parse_scalar(s: &str) -> SdkResult<Scalar> {
    scalar_from_hex(s).ok_or_else(|| SdkError::Encoding(format!("bad scalar hex '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_hex_is_minimal() {
        assert_eq!(index_to_hex(&Scalar::ONE), "1");
        assert_eq!(index_to_hex(&Scalar::from(0x1fu64)), "1f");
        assert_eq!(parse_scalar("1f").unwrap(), Scalar::from(0x1fu64));
    }

    #[test]
    fn share_store_json_shape() {
        let s = ShareStore::new(&Scalar::from(5u64), &Scalar::from(2u64), "ab");
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["share"]["shareIndex"], "2");
        assert_eq!(v["polynomialID"], "ab");
        assert_eq!(ShareStore::from_value(&v).unwrap(), s);
        assert!("qr".parse::<ShareFormat>().is_err());
    }
}
