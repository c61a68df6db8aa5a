//! Reference threshold key: 2-of-n Shamir over the secp256k1 scalar field.
//!
//! Store layout:
//!   service provider id  -> KeyMetadata (commitments, share indexes, masked
//!                           service-provider share, write nonce, modules)
//!   id(share value)      -> ShareRecord (index, polynomial, optional catch-up
//!                           pointer to the refreshed share of the same index)
//!
//! Every write is one `set_metadata_bulk` batch under the service-provider
//! write lock, after checking that the stored nonce is the one this handle
//! last saw. Key metadata goes last in the batch with no material, so it lands
//! on the service-provider key.
//!
//! Refresh (new share, delete share, new security question) issues a new
//! polynomial with the same secret. Holders of an old share follow the
//! catch-up chain: next.share - mask(old share) = refreshed share.

use k256::elliptic_curve::Field;
use k256::{AffinePoint, Scalar};
use log::{debug, info};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::mnemonic;
use super::modules::{
    account_key, answer_hash, mask, seal, unseal, SealedSeedPhrase, SecurityQuestionStore,
    SeedPhraseEntry, MODULE_SECURITY_QUESTIONS, MODULE_SEED_PHRASE,
};
use super::poly::{polynomial_id, verify_share, Polynomial};
use super::{
    index_to_hex, parse_scalar, DeleteShareResult, GenerateShareResult, InitializedKey,
    ReconstructedKey, SdkFactory, Share, ShareFormat, ShareStore, ThresholdSdk,
    SERVICE_PROVIDER_INDEX,
};
use crate::error::{SdkError, SdkResult, StoreError};
use crate::keycodec::{point_from_hex, point_to_hex, public_point, scalar_from_hex, KeyMaterial};
use crate::provider::ServiceProvider;
use crate::store::{LockGrant, MetadataResponse, ReleaseStatus, StorageLayer};

pub const THRESHOLD: usize = 2;

const SP_SHARE_LABEL: &str = "service-provider-share";
const CATCH_UP_LABEL: &str = "catch-up";
const MAX_CATCH_UP: usize = 64;

/// Key-level metadata, stored under the service-provider identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub pub_key: String,
    #[serde(rename = "polynomialID")]
    pub polynomial_id: String,
    pub commitments: Vec<String>,
    pub share_indexes: Vec<String>,
    /// Share at index 1 plus mask(postbox key).
    pub sp_share: String,
    pub nonce: u64,
    #[serde(default)]
    pub modules: BTreeMap<String, Value>,
}

impl KeyMetadata {
    pub fn threshold(&self) -> usize {
        self.commitments.len()
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.share_indexes.iter().any(|i| i == index)
    }

    fn commitment_points(&self) -> SdkResult<Vec<AffinePoint>> {
        self.commitments
            .iter()
            .map(|c| {
                point_from_hex(c).ok_or_else(|| SdkError::Encoding(format!("bad commitment '{c}'")))
            })
            .collect()
    }

    fn parsed_indexes(&self) -> SdkResult<Vec<Scalar>> {
        self.share_indexes.iter().map(|i| parse_scalar(i)).collect()
    }

    fn security_questions(&self) -> SdkResult<Option<SecurityQuestionStore>> {
        match self.modules.get(MODULE_SECURITY_QUESTIONS) {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
        }
    }

    fn sealed_seed_phrases(&self) -> SdkResult<Vec<SealedSeedPhrase>> {
        match self.modules.get(MODULE_SEED_PHRASE) {
            None => Ok(Vec::new()),
            Some(v) => Ok(serde_json::from_value(v.clone())?),
        }
    }
}

/// Stored under the identifier of a share value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    pub share_index: String,
    #[serde(rename = "polynomialID")]
    pub polynomial_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<CatchUp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchUp {
    #[serde(rename = "polynomialID")]
    pub polynomial_id: String,
    /// Refreshed share + mask(previous share).
    pub share: String,
}

/// Serialized SDK handle. The service provider is passed back in on load.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThresholdKeyJson {
    #[serde(default)]
    metadata: Option<KeyMetadata>,
    #[serde(default)]
    shares: BTreeMap<String, ShareStore>,
}

#[derive(Default)]
struct Batch {
    materials: Vec<Option<KeyMaterial>>,
    inputs: Vec<Value>,
}

impl Batch {
    fn push<T: Serialize>(&mut self, material: Option<KeyMaterial>, payload: &T) -> SdkResult<()> {
        self.materials.push(material);
        self.inputs.push(serde_json::to_value(payload)?);
        Ok(())
    }
}

pub struct ThresholdKey {
    storage: Arc<dyn StorageLayer>,
    service_provider: ServiceProvider,
    metadata: Option<KeyMetadata>,
    /// share index (hex) -> latest share store this handle holds
    shares: BTreeMap<String, ShareStore>,
    poly: Option<Polynomial>,
}

impl fmt::Debug for ThresholdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThresholdKey")
            .field("pub_key", &self.metadata.as_ref().map(|m| m.pub_key.as_str()))
            .field("nonce", &self.metadata.as_ref().map(|m| m.nonce))
            .field("shares", &self.shares.keys().collect::<Vec<_>>())
            .field("reconstructed", &self.poly.is_some())
            .finish()
    }
}

impl ThresholdKey {
    pub fn new(storage: Arc<dyn StorageLayer>, service_provider: ServiceProvider) -> Self {
        Self {
            storage,
            service_provider,
            metadata: None,
            shares: BTreeMap::new(),
            poly: None,
        }
    }

    pub fn from_json(
        state: &Value,
        storage: Arc<dyn StorageLayer>,
        service_provider: ServiceProvider,
    ) -> SdkResult<Self> {
        let s: ThresholdKeyJson = serde_json::from_value(state.clone())?;
        let mut tk = Self::new(storage, service_provider);
        tk.metadata = s.metadata;
        tk.shares = s.shares;
        Ok(tk)
    }

    /// Cached key metadata (as of the last read or write of this handle).
    pub fn metadata(&self) -> Option<&KeyMetadata> {
        self.metadata.as_ref()
    }

    fn require_metadata(&self) -> SdkResult<&KeyMetadata> {
        self.metadata.as_ref().ok_or(SdkError::NotInitialized)
    }

    fn require_poly(&self) -> SdkResult<&Polynomial> {
        self.poly.as_ref().ok_or(SdkError::NotReconstructed)
    }

    fn fetch_metadata(&self) -> SdkResult<Option<KeyMetadata>> {
        match self.storage.get_metadata(None)? {
            MetadataResponse::KeyNotFound => Ok(None),
            MetadataResponse::Found(v) => Ok(Some(serde_json::from_value(v)?)),
        }
    }

    fn sp_share(&self, meta: &KeyMetadata) -> SdkResult<ShareStore> {
        let masked = parse_scalar(&meta.sp_share)?;
        let value = masked - mask(&self.service_provider.postbox_key(), SP_SHARE_LABEL)?;
        Ok(ShareStore::new(
            &value,
            &Scalar::from(SERVICE_PROVIDER_INDEX),
            &meta.polynomial_id,
        ))
    }

    fn adopt_metadata(&mut self, meta: KeyMetadata) -> SdkResult<()> {
        let sp = self.sp_share(&meta)?;
        self.shares.insert(sp.share.share_index.clone(), sp);
        if let Some(poly) = &self.poly {
            if polynomial_id(&poly.commitments()) != meta.polynomial_id {
                debug!("polynomial moved on, key must be reconstructed again");
                self.poly = None;
            }
        }
        self.metadata = Some(meta);
        Ok(())
    }

    fn initialize_new_key(&mut self) -> SdkResult<InitializedKey> {
        let secret = Scalar::random(&mut OsRng);
        let sp_index = Scalar::from(SERVICE_PROVIDER_INDEX);
        let device_index = fresh_index(&[sp_index]);
        let poly = Polynomial::random(secret, THRESHOLD);
        let stores = self.issue(poly, &[sp_index, device_index], None, |_, _, _| Ok(()))?;

        let meta = self.require_metadata()?;
        info!("initialized new key {}", meta.pub_key);
        Ok(InitializedKey {
            pub_key: meta.pub_key.clone(),
            threshold: meta.threshold(),
            total_shares: meta.share_indexes.len(),
            priv_key: Some(secret),
            device_share: stores.get(&index_to_hex(&device_index)).cloned(),
        })
    }

    /// Issue `poly` on `indexes`, write metadata plus share records (and
    /// catch-up pointers from `previous`) in one locked batch.
    fn issue<F>(
        &mut self,
        poly: Polynomial,
        indexes: &[Scalar],
        previous: Option<(KeyMetadata, Polynomial)>,
        hook: F,
    ) -> SdkResult<BTreeMap<String, ShareStore>>
    where
        F: FnOnce(&Polynomial, &str, &mut BTreeMap<String, Value>) -> SdkResult<()>,
    {
        let commitments = poly.commitments();
        let pid = polynomial_id(&commitments);
        let sp_index = Scalar::from(SERVICE_PROVIDER_INDEX);

        let mut modules = previous
            .as_ref()
            .map(|(m, _)| m.modules.clone())
            .unwrap_or_default();
        if let Some((_, old_poly)) = &previous {
            shift_security_questions(&mut modules, old_poly, &poly, indexes, &pid)?;
        }
        hook(&poly, &pid, &mut modules)?;

        let sp_mask = mask(&self.service_provider.postbox_key(), SP_SHARE_LABEL)?;
        let meta = KeyMetadata {
            pub_key: point_to_hex(&public_point(&poly.secret())),
            polynomial_id: pid.clone(),
            commitments: commitments.iter().map(point_to_hex).collect(),
            share_indexes: indexes.iter().map(index_to_hex).collect(),
            sp_share: index_to_hex(&(poly.eval(&sp_index) + sp_mask)),
            nonce: previous.as_ref().map(|(m, _)| m.nonce + 1).unwrap_or(0),
            modules,
        };

        let mut batch = Batch::default();
        let mut stores = BTreeMap::new();
        for idx in indexes {
            let key = index_to_hex(idx);
            let value = poly.eval(idx);
            stores.insert(key.clone(), ShareStore::new(&value, idx, &pid));
            if *idx == sp_index {
                continue;
            }
            if let Some((old_meta, old_poly)) = &previous {
                if old_meta.has_index(&key) {
                    let old_value = old_poly.eval(idx);
                    let next = CatchUp {
                        polynomial_id: pid.clone(),
                        share: index_to_hex(&(value + mask(&old_value, CATCH_UP_LABEL)?)),
                    };
                    let rec = ShareRecord {
                        share_index: key.clone(),
                        polynomial_id: old_meta.polynomial_id.clone(),
                        next: Some(next),
                    };
                    batch.push(Some(KeyMaterial::Private(old_value)), &rec)?;
                }
            }
            let rec = ShareRecord {
                share_index: key,
                polynomial_id: pid.clone(),
                next: None,
            };
            batch.push(Some(KeyMaterial::Private(value)), &rec)?;
        }
        batch.push(None, &meta)?;

        let expected = previous.as_ref().map(|(m, _)| m.nonce);
        self.commit(expected, batch)?;
        debug!(
            "issued polynomial {} on {} shares (nonce {})",
            pid,
            indexes.len(),
            meta.nonce
        );

        self.poly = Some(poly);
        self.metadata = Some(meta);
        self.shares = stores.clone();
        Ok(stores)
    }

    /// Metadata-only update (modules), nonce bumped.
    fn write_metadata(&mut self, mut meta: KeyMetadata) -> SdkResult<()> {
        let expected = meta.nonce;
        meta.nonce += 1;
        let mut batch = Batch::default();
        batch.push(None, &meta)?;
        self.commit(Some(expected), batch)?;
        self.metadata = Some(meta);
        Ok(())
    }

    fn commit(&self, expected_nonce: Option<u64>, batch: Batch) -> SdkResult<()> {
        let token = match self.storage.acquire_write_lock(None)? {
            LockGrant::Granted(t) => t,
            LockGrant::Contended => {
                debug!("metadata write lock is held by another handle");
                return Err(SdkError::ConcurrentUpdate);
            }
        };
        let written = self.write_if_current(expected_nonce, batch);
        let released = self.storage.release_write_lock(None, &token)?;
        written?;
        match released {
            ReleaseStatus::Released => Ok(()),
            other => {
                debug!("release_write_lock: {:?}", other);
                Err(SdkError::LockOwnership)
            }
        }
    }

    fn write_if_current(&self, expected: Option<u64>, batch: Batch) -> SdkResult<()> {
        let stored = self.fetch_metadata()?.map(|m| m.nonce);
        if stored != expected {
            return Err(SdkError::StaleMetadata {
                have: expected,
                stored,
            });
        }
        let ack = self
            .storage
            .set_metadata_bulk(&batch.materials, &batch.inputs)?;
        if let Some((i, reason)) = ack.failed.first() {
            return Err(SdkError::Store(StoreError::InvalidKeyMaterial(format!(
                "batch item {i}: {reason}"
            ))));
        }
        Ok(())
    }

    /// Follow catch-up pointers until `store` sits on the polynomial of `meta`.
    fn catch_up(&self, store: ShareStore, meta: &KeyMetadata) -> SdkResult<ShareStore> {
        let mut current = store;
        for _ in 0..MAX_CATCH_UP {
            if current.polynomial_id == meta.polynomial_id {
                return Ok(current);
            }
            let value = current.value()?;
            let record: ShareRecord =
                match self.storage.get_metadata(Some(&KeyMaterial::Private(value)))? {
                    MetadataResponse::KeyNotFound => return Err(SdkError::StaleShare),
                    MetadataResponse::Found(v) => serde_json::from_value(v)?,
                };
            let next = record.next.ok_or(SdkError::StaleShare)?;
            let refreshed = parse_scalar(&next.share)? - mask(&value, CATCH_UP_LABEL)?;
            debug!(
                "share {} caught up {} -> {}",
                current.share.share_index, current.polynomial_id, next.polynomial_id
            );
            current = ShareStore {
                share: Share {
                    share: index_to_hex(&refreshed),
                    share_index: current.share.share_index,
                },
                polynomial_id: next.polynomial_id,
            };
        }
        Err(SdkError::StaleShare)
    }

    fn open_seed_phrases(&self, meta: &KeyMetadata, secret: &Scalar) -> SdkResult<Vec<SeedPhraseEntry>> {
        meta.sealed_seed_phrases()?
            .into_iter()
            .map(|s| {
                let raw = unseal(secret, &s.sealed)?;
                let seed_phrase =
                    String::from_utf8(raw).map_err(|e| SdkError::Encoding(e.to_string()))?;
                Ok(SeedPhraseEntry {
                    kind: s.kind,
                    seed_phrase,
                })
            })
            .collect()
    }
}

impl ThresholdSdk for ThresholdKey {
    fn initialize(&mut self, never_initialize_new_key: bool) -> SdkResult<InitializedKey> {
        match self.fetch_metadata()? {
            Some(meta) => {
                let out = InitializedKey {
                    pub_key: meta.pub_key.clone(),
                    threshold: meta.threshold(),
                    total_shares: meta.share_indexes.len(),
                    priv_key: None,
                    device_share: None,
                };
                self.adopt_metadata(meta)?;
                Ok(out)
            }
            None if never_initialize_new_key => Err(SdkError::NotInitialized),
            None => self.initialize_new_key(),
        }
    }

    fn sync_latest_metadata(&mut self) -> SdkResult<()> {
        let meta = self.fetch_metadata()?.ok_or(SdkError::NotInitialized)?;
        self.adopt_metadata(meta)
    }

    fn input_share_store(&mut self, store: ShareStore) -> SdkResult<()> {
        let key = index_to_hex(&store.index()?);
        self.shares.insert(key, store);
        Ok(())
    }

    fn input_share(&mut self, share: &str, format: ShareFormat) -> SdkResult<()> {
        let value = match format {
            ShareFormat::Hex => parse_scalar(share)?,
            ShareFormat::Mnemonic => {
                let bytes = mnemonic::decode(share)?;
                scalar_from_hex(&hex::encode(bytes))
                    .ok_or_else(|| SdkError::Encoding("mnemonic share out of range".into()))?
            }
        };
        let meta = self.require_metadata()?.clone();
        let record: ShareRecord =
            match self.storage.get_metadata(Some(&KeyMaterial::Private(value)))? {
                MetadataResponse::KeyNotFound => return Err(SdkError::StaleShare),
                MetadataResponse::Found(v) => serde_json::from_value(v)?,
            };
        let store = ShareStore {
            share: Share {
                share: index_to_hex(&value),
                share_index: record.share_index,
            },
            polynomial_id: record.polynomial_id,
        };
        let store = self.catch_up(store, &meta)?;
        if !meta.has_index(&store.share.share_index) {
            return Err(SdkError::StaleShare);
        }
        self.shares.insert(store.share.share_index.clone(), store);
        Ok(())
    }

    fn output_share_store(&self, index: &str) -> SdkResult<ShareStore> {
        let idx = parse_scalar(index)?;
        let key = index_to_hex(&idx);
        if let (Some(poly), Some(meta)) = (&self.poly, &self.metadata) {
            if meta.has_index(&key) {
                return Ok(ShareStore::new(&poly.eval(&idx), &idx, &meta.polynomial_id));
            }
        }
        self.shares
            .get(&key)
            .cloned()
            .ok_or(SdkError::UnknownShareIndex(key))
    }

    fn output_share(&self, index: &str, format: ShareFormat) -> SdkResult<String> {
        let store = self.output_share_store(index)?;
        match format {
            ShareFormat::Hex => Ok(store.share.share),
            ShareFormat::Mnemonic => {
                let mut bytes = [0u8; mnemonic::SHARE_BYTES];
                bytes.copy_from_slice(&store.value()?.to_bytes());
                Ok(mnemonic::encode(&bytes))
            }
        }
    }

    fn share_indexes(&self) -> SdkResult<Vec<String>> {
        Ok(self.require_metadata()?.share_indexes.clone())
    }

    fn reconstruct_key(&mut self) -> SdkResult<ReconstructedKey> {
        let meta = self.require_metadata()?.clone();
        let commitments = meta.commitment_points()?;

        let mut held: Vec<ShareStore> = self.shares.values().cloned().collect();
        let sp = self.sp_share(&meta)?;
        held.retain(|s| s.share.share_index != sp.share.share_index);
        held.insert(0, sp);

        let mut current = BTreeMap::new();
        let mut points = Vec::new();
        for store in held {
            let index = store.share.share_index.clone();
            if !meta.has_index(&index) {
                debug!("share {} is not in the current share set, skipped", index);
                continue;
            }
            let store = match self.catch_up(store, &meta) {
                Ok(s) => s,
                Err(SdkError::StaleShare) => {
                    debug!("share {} cannot be caught up, skipped", index);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let (x, y) = (store.index()?, store.value()?);
            if !verify_share(&commitments, &x, &y) {
                return Err(SdkError::InvalidShare { index });
            }
            points.push((x, y));
            current.insert(index, store);
        }

        let need = meta.threshold();
        if points.len() < need {
            return Err(SdkError::NotEnoughShares {
                have: points.len(),
                need,
            });
        }
        let poly = Polynomial::interpolate(&points[..need])
            .ok_or_else(|| SdkError::Encoding("duplicate share index".into()))?;
        let priv_key = poly.secret();
        if point_to_hex(&public_point(&priv_key)) != meta.pub_key {
            return Err(SdkError::KeyMismatch);
        }

        let seed_phrase_keys = self
            .open_seed_phrases(&meta, &priv_key)?
            .iter()
            .map(|e| account_key(&e.seed_phrase))
            .collect::<SdkResult<Vec<_>>>()?;
        let mut all_keys = vec![priv_key];
        all_keys.extend(seed_phrase_keys.iter().copied());

        self.poly = Some(poly);
        self.shares = current;
        Ok(ReconstructedKey {
            priv_key,
            seed_phrase_keys,
            all_keys,
        })
    }

    fn generate_new_share(&mut self) -> SdkResult<GenerateShareResult> {
        let meta = self.require_metadata()?.clone();
        let old_poly = self.require_poly()?.clone();
        let mut indexes = meta.parsed_indexes()?;
        let idx = fresh_index(&indexes);
        indexes.push(idx);

        let poly = Polynomial::random(old_poly.secret(), meta.threshold());
        let stores = self.issue(poly, &indexes, Some((meta, old_poly)), |_, _, _| Ok(()))?;
        let new_share_index = index_to_hex(&idx);
        info!("generated share {}", new_share_index);
        Ok(GenerateShareResult {
            new_share_index,
            new_share_stores: stores,
        })
    }

    fn delete_share(&mut self, index: &str) -> SdkResult<DeleteShareResult> {
        let key = index_to_hex(&parse_scalar(index)?);
        let meta = self.require_metadata()?.clone();
        let old_poly = self.require_poly()?.clone();
        if key == index_to_hex(&Scalar::from(SERVICE_PROVIDER_INDEX)) {
            return Err(SdkError::ThresholdViolation(key));
        }
        if !meta.has_index(&key) {
            return Err(SdkError::UnknownShareIndex(key));
        }
        let indexes: Vec<Scalar> = meta
            .parsed_indexes()?
            .into_iter()
            .filter(|i| index_to_hex(i) != key)
            .collect();
        if indexes.len() < meta.threshold() {
            return Err(SdkError::ThresholdViolation(key));
        }

        let poly = Polynomial::random(old_poly.secret(), meta.threshold());
        let stores = self.issue(poly, &indexes, Some((meta, old_poly)), |_, _, _| Ok(()))?;
        info!("deleted share {}", key);
        Ok(DeleteShareResult {
            new_share_stores: stores,
        })
    }

    fn generate_security_question_share(
        &mut self,
        answer: &str,
        question: &str,
    ) -> SdkResult<String> {
        let meta = self.require_metadata()?.clone();
        let old_poly = self.require_poly()?.clone();
        if meta.security_questions()?.is_some() {
            return Err(SdkError::SecurityQuestionsExist);
        }
        let mut indexes = meta.parsed_indexes()?;
        let idx = fresh_index(&indexes);
        indexes.push(idx);
        let h = answer_hash(answer, question)?;
        let question = question.to_string();

        let poly = Polynomial::random(old_poly.secret(), meta.threshold());
        self.issue(poly, &indexes, Some((meta, old_poly)), |poly, pid, modules| {
            let sq = SecurityQuestionStore {
                question,
                share_index: index_to_hex(&idx),
                polynomial_id: pid.to_string(),
                nonce: index_to_hex(&(poly.eval(&idx) - h)),
            };
            modules.insert(
                MODULE_SECURITY_QUESTIONS.to_string(),
                serde_json::to_value(&sq)?,
            );
            Ok(())
        })?;
        Ok(index_to_hex(&idx))
    }

    fn input_share_from_security_questions(&mut self, answer: &str) -> SdkResult<()> {
        let meta = self.require_metadata()?;
        let sq = meta
            .security_questions()?
            .ok_or(SdkError::SecurityQuestionsMissing)?;
        let idx = parse_scalar(&sq.share_index)?;
        let value = parse_scalar(&sq.nonce)? + answer_hash(answer, &sq.question)?;
        if sq.polynomial_id == meta.polynomial_id
            && !verify_share(&meta.commitment_points()?, &idx, &value)
        {
            return Err(SdkError::WrongAnswer);
        }
        let store = ShareStore::new(&value, &idx, &sq.polynomial_id);
        self.shares.insert(sq.share_index, store);
        Ok(())
    }

    fn change_security_question_and_answer(
        &mut self,
        answer: &str,
        question: &str,
    ) -> SdkResult<()> {
        let poly = self.require_poly()?;
        let mut meta = self.require_metadata()?.clone();
        let mut sq = meta
            .security_questions()?
            .ok_or(SdkError::SecurityQuestionsMissing)?;
        let idx = parse_scalar(&sq.share_index)?;
        sq.nonce = index_to_hex(&(poly.eval(&idx) - answer_hash(answer, question)?));
        sq.question = question.to_string();
        meta.modules.insert(
            MODULE_SECURITY_QUESTIONS.to_string(),
            serde_json::to_value(&sq)?,
        );
        self.write_metadata(meta)
    }

    fn set_seed_phrase(&mut self, kind: &str, phrase: &str) -> SdkResult<()> {
        let secret = self.require_poly()?.secret();
        let mut meta = self.require_metadata()?.clone();
        let mut sealed = meta.sealed_seed_phrases()?;
        sealed.retain(|s| s.kind != kind);
        sealed.push(SealedSeedPhrase {
            kind: kind.to_string(),
            sealed: seal(&secret, phrase.as_bytes())?,
        });
        meta.modules
            .insert(MODULE_SEED_PHRASE.to_string(), serde_json::to_value(&sealed)?);
        self.write_metadata(meta)
    }

    fn get_seed_phrases(&self) -> SdkResult<Vec<SeedPhraseEntry>> {
        let secret = self.require_poly()?.secret();
        self.open_seed_phrases(self.require_metadata()?, &secret)
    }

    fn derive_seed_phrase_accounts(&self) -> SdkResult<Vec<Scalar>> {
        self.get_seed_phrases()?
            .iter()
            .map(|e| account_key(&e.seed_phrase))
            .collect()
    }

    fn to_json(&self) -> SdkResult<Value> {
        let mut shares = self.shares.clone();
        if let Some(meta) = &self.metadata {
            for index in &meta.share_indexes {
                if let Ok(store) = self.output_share_store(index) {
                    shares.insert(index.clone(), store);
                }
            }
        }
        Ok(serde_json::to_value(ThresholdKeyJson {
            metadata: self.metadata.clone(),
            shares,
        })?)
    }
}

/// Keep the security-questions share answerable across a refresh:
/// nonce' = nonce + (f'(i) - f(i)). Dropped if its index left the share set.
fn shift_security_questions(
    modules: &mut BTreeMap<String, Value>,
    old_poly: &Polynomial,
    poly: &Polynomial,
    indexes: &[Scalar],
    pid: &str,
) -> SdkResult<()> {
    let mut sq: SecurityQuestionStore = match modules.get(MODULE_SECURITY_QUESTIONS) {
        None => return Ok(()),
        Some(v) => serde_json::from_value(v.clone())?,
    };
    let idx = parse_scalar(&sq.share_index)?;
    if !indexes.contains(&idx) {
        modules.remove(MODULE_SECURITY_QUESTIONS);
        return Ok(());
    }
    let shift = poly.eval(&idx) - old_poly.eval(&idx);
    sq.nonce = index_to_hex(&(parse_scalar(&sq.nonce)? + shift));
    sq.polynomial_id = pid.to_string();
    modules.insert(
        MODULE_SECURITY_QUESTIONS.to_string(),
        serde_json::to_value(&sq)?,
    );
    Ok(())
}

fn fresh_index(taken: &[Scalar]) -> Scalar {
    loop {
        let k = Scalar::random(&mut OsRng);
        if k != Scalar::ZERO && !taken.contains(&k) {
            return k;
        }
    }
}

/// Factory for the in-tree SDK build.
#[derive(Clone, Debug)]
pub struct ReferenceSdk {
    version: String,
}

impl ReferenceSdk {
    pub fn new() -> Self {
        Self::with_version(env!("CARGO_PKG_VERSION"))
    }

    /// Same build reporting another version tag (capture under a named release).
    pub fn with_version<S: Into<String>>(version: S) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl Default for ReferenceSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl SdkFactory for ReferenceSdk {
    fn version(&self) -> &str {
        &self.version
    }

    fn open(&self, storage: Arc<dyn StorageLayer>, sp: ServiceProvider) -> Box<dyn ThresholdSdk> {
        Box::new(ThresholdKey::new(storage, sp))
    }

    fn from_json(
        &self,
        state: &Value,
        storage: Arc<dyn StorageLayer>,
        sp: ServiceProvider,
    ) -> SdkResult<Box<dyn ThresholdSdk>> {
        Ok(Box::new(ThresholdKey::from_json(state, storage, sp)?))
    }
}
