//! store — in-memory metadata store keyed by derived identifiers.
//!
//! Состав:
//! - MetadataStore: identifier -> canonical JSON record, get/set/bulk-set.
//! - lock: advisory per-identifier write locks (LockManager).
//! - StorageLayer: the seam the SDK talks through (network backends plug in here).
//!
//! Records are opaque to the store. `set` canonicalizes the payload so that
//! logically equal payloads always produce byte-identical records; last write
//! wins; there is no record until the first `set`.
//!
//! Clones of a MetadataStore share the same maps: several SDK handles pointed
//! at one store model several devices of the same key holder.

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::canonical::{canonical_string, canonicalize};
use crate::error::StoreError;
use crate::keycodec::{identifier_for, Identifier, KeyMaterial};
use crate::provider::ServiceProvider;

pub mod lock;
pub use lock::{LockGrant, LockManager, LockToken, ReleaseStatus};

/// Marker carried by a lookup that found nothing.
pub const KEY_NOT_FOUND: &str = "KEY_NOT_FOUND";

/// Acknowledgement message of successful writes.
pub const SUCCESS: &str = "success";

/// Separator of the internal `<tkeyHash>|<tkeyVersion>` prefix.
pub const PREFIX_SEPARATOR: char = '|';

/// Stored value: canonical JSON text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataRecord(String);

impl MetadataRecord {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Outcome of a metadata lookup. `KeyNotFound` is the normal "initialize fresh" case.
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataResponse {
    Found(Value),
    KeyNotFound,
}

impl MetadataResponse {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataResponse::KeyNotFound)
    }

    /// `KEY_NOT_FOUND` for a miss, `None` for a hit.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            MetadataResponse::KeyNotFound => Some(KEY_NOT_FOUND),
            MetadataResponse::Found(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            MetadataResponse::Found(v) => Some(v),
            MetadataResponse::KeyNotFound => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    fn success() -> Self {
        Ack {
            message: SUCCESS.to_string(),
        }
    }
}

/// Per-item report of a best-effort bulk write.
#[derive(Clone, Debug, Default)]
pub struct BulkAck {
    /// Identifier each written item landed on, in input order.
    pub written: Vec<(usize, Identifier)>,
    /// Items whose material was absent and went to the service provider key.
    pub fallbacks: Vec<usize>,
    /// Items that could not be resolved at all (no material, no provider).
    pub failed: Vec<(usize, String)>,
}

impl BulkAck {
    pub fn all_written(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Construction parameters.
#[derive(Clone, Debug, Default)]
pub struct StoreArgs {
    pub data_map: Option<BTreeMap<String, String>>,
    pub lock_map: Option<BTreeMap<String, String>>,
    pub service_provider: Option<ServiceProvider>,
    /// Fingerprint of the owning key-management instance. Required.
    pub tkey_hash: Option<String>,
    pub tkey_version: Option<String>,
}

/// Serialized form of a store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreJson {
    pub data_map: BTreeMap<String, String>,
    #[serde(default)]
    pub service_provider: Option<ServiceProvider>,
    pub tkey_hash: String,
    #[serde(default)]
    pub tkey_version: String,
    #[serde(default, skip_serializing)]
    pub lock_map: Option<BTreeMap<String, String>>,
}

/// Interface the SDK uses to reach metadata. Thread-safe.
pub trait StorageLayer: Send + Sync {
    /// Metadata for `material` (service provider key if `None`).
    fn get_metadata(&self, material: Option<&KeyMaterial>) -> Result<MetadataResponse, StoreError>;
    fn set_metadata(&self, material: Option<&KeyMaterial>, input: &Value) -> Result<Ack, StoreError>;
    /// Pairwise best-effort write: a missing material at index i goes to the
    /// service provider key instead of aborting the batch.
    fn set_metadata_bulk(
        &self,
        materials: &[Option<KeyMaterial>],
        inputs: &[Value],
    ) -> Result<BulkAck, StoreError>;
    fn acquire_write_lock(&self, material: Option<&KeyMaterial>) -> Result<LockGrant, StoreError>;
    fn release_write_lock(
        &self,
        material: Option<&KeyMaterial>,
        token: &LockToken,
    ) -> Result<ReleaseStatus, StoreError>;
}

#[derive(Clone)]
pub struct MetadataStore {
    data: Arc<Mutex<BTreeMap<String, String>>>,
    locks: LockManager,
    service_provider: Option<ServiceProvider>,
    /// "<tkeyHash>|<tkeyVersion>"
    file_prefix: String,
}

impl MetadataStore {
    /// Fails with `MissingFingerprint` if `tkey_hash` is absent or empty.
    pub fn new(args: StoreArgs) -> Result<Self, StoreError> {
        let hash = match args.tkey_hash {
            Some(h) if !h.is_empty() => h,
            _ => return Err(StoreError::MissingFingerprint),
        };
        let version = args.tkey_version.unwrap_or_default();
        Ok(Self {
            data: Arc::new(Mutex::new(args.data_map.unwrap_or_default())),
            locks: LockManager::from_map(args.lock_map.unwrap_or_default()),
            service_provider: args.service_provider,
            file_prefix: format!("{hash}{PREFIX_SEPARATOR}{version}"),
        })
    }

    /// Empty store for a service provider.
    pub fn with_provider(
        sp: ServiceProvider,
        tkey_hash: &str,
        tkey_version: &str,
    ) -> Result<Self, StoreError> {
        Self::new(StoreArgs {
            service_provider: Some(sp),
            tkey_hash: Some(tkey_hash.to_string()),
            tkey_version: Some(tkey_version.to_string()),
            ..StoreArgs::default()
        })
    }

    pub fn tkey_hash(&self) -> &str {
        self.file_prefix
            .split(PREFIX_SEPARATOR)
            .next()
            .unwrap_or_default()
    }

    pub fn tkey_version(&self) -> &str {
        self.file_prefix
            .split(PREFIX_SEPARATOR)
            .nth(1)
            .unwrap_or_default()
    }

    pub fn service_provider(&self) -> Option<&ServiceProvider> {
        self.service_provider.as_ref()
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Identifier for `material`, falling back to the service provider key.
    pub fn resolve(&self, material: Option<&KeyMaterial>) -> Result<Identifier, StoreError> {
        match material {
            Some(m) => identifier_for(Some(m)),
            None => {
                let sp = self.service_provider.as_ref().map(|sp| sp.key_material());
                identifier_for(sp.as_ref())
            }
        }
    }

    // ---------------- identifier-level API ----------------

    pub fn get(&self, id: &Identifier) -> Option<MetadataRecord> {
        let g = self.data.lock().unwrap_or_else(|e| e.into_inner());
        g.get(id.as_str()).cloned().map(MetadataRecord)
    }

    /// Canonicalize and store. Last write wins.
    pub fn set<T: Serialize + ?Sized>(&self, id: &Identifier, payload: &T) -> Result<Ack, StoreError> {
        let rec = canonicalize(payload)?;
        self.put_raw(id, rec);
        Ok(Ack::success())
    }

    /// Pairwise set; `None` identifiers fall back to the service provider key.
    pub fn set_bulk<T: Serialize>(&self, ids: &[Option<Identifier>], payloads: &[T]) -> BulkAck {
        let mut ack = BulkAck::default();
        for (i, p) in payloads.iter().enumerate() {
            let target = match ids.get(i).cloned().flatten() {
                Some(id) => Ok(id),
                None => {
                    ack.fallbacks.push(i);
                    self.resolve(None)
                }
            };
            let res = target.and_then(|id| self.set(&id, p).map(|_| id));
            match res {
                Ok(id) => ack.written.push((i, id)),
                Err(e) => {
                    debug!("set_bulk: item {} skipped: {}", i, e);
                    ack.failed.push((i, e.to_string()));
                }
            }
        }
        ack
    }

    fn put_raw(&self, id: &Identifier, rec: String) {
        let mut g = self.data.lock().unwrap_or_else(|e| e.into_inner());
        g.insert(id.as_str().to_string(), rec);
    }

    /// Copy of the whole data map (identifier -> canonical record).
    pub fn data_map(&self) -> BTreeMap<String, String> {
        let g = self.data.lock().unwrap_or_else(|e| e.into_inner());
        g.clone()
    }

    pub fn len(&self) -> usize {
        let g = self.data.lock().unwrap_or_else(|e| e.into_inner());
        g.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---------------- serialized form ----------------

    pub fn to_json(&self) -> StoreJson {
        StoreJson {
            data_map: self.data_map(),
            service_provider: self.service_provider.clone(),
            tkey_hash: self.tkey_hash().to_string(),
            tkey_version: self.tkey_version().to_string(),
            lock_map: None,
        }
    }

    pub fn from_json(v: StoreJson) -> Result<Self, StoreError> {
        Self::new(StoreArgs {
            data_map: Some(v.data_map),
            lock_map: v.lock_map,
            service_provider: v.service_provider,
            tkey_hash: Some(v.tkey_hash),
            tkey_version: Some(v.tkey_version),
        })
    }
}

impl StorageLayer for MetadataStore {
    fn get_metadata(&self, material: Option<&KeyMaterial>) -> Result<MetadataResponse, StoreError> {
        let id = self.resolve(material)?;
        match self.get(&id) {
            None => Ok(MetadataResponse::KeyNotFound),
            Some(rec) => rec
                .to_value()
                .map(MetadataResponse::Found)
                .map_err(|e| StoreError::CorruptRecord {
                    id: id.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    fn set_metadata(&self, material: Option<&KeyMaterial>, input: &Value) -> Result<Ack, StoreError> {
        let id = self.resolve(material)?;
        self.put_raw(&id, canonical_string(input));
        Ok(Ack::success())
    }

    fn set_metadata_bulk(
        &self,
        materials: &[Option<KeyMaterial>],
        inputs: &[Value],
    ) -> Result<BulkAck, StoreError> {
        // Материал для элемента, который не резолвится (нулевой скаляр и т.п.),
        // тоже уходит на ключ провайдера: пакет best-effort, не атомарный.
        let ids: Vec<Option<Identifier>> = materials
            .iter()
            .map(|m| m.as_ref().and_then(|m| identifier_for(Some(m)).ok()))
            .collect();
        Ok(self.set_bulk(&ids, inputs))
    }

    fn acquire_write_lock(&self, material: Option<&KeyMaterial>) -> Result<LockGrant, StoreError> {
        let id = self.resolve(material)?;
        Ok(self.locks.acquire(&id))
    }

    fn release_write_lock(
        &self,
        material: Option<&KeyMaterial>,
        token: &LockToken,
    ) -> Result<ReleaseStatus, StoreError> {
        let id = self.resolve(material)?;
        Ok(self.locks.release(&id, token))
    }
}
