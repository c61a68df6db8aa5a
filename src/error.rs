//! Typed errors for the store, snapshot and SDK layers.
//!
//! Ожидаемые исходы (нет метаданных, занятый lock, чужой токен) сюда не входят:
//! это значения (`MetadataResponse`, `LockGrant`, `ReleaseStatus`), а не ошибки.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the metadata store and the key codec.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Neither a private scalar nor a public identity was supplied
    /// (and no service provider to fall back to).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Store constructed without the owning instance fingerprint (`tkeyHash`).
    #[error("need tkeyHash")]
    MissingFingerprint,

    #[error("serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A stored record is not valid JSON (written around the canonical path).
    #[error("record for {id} is not valid JSON: {reason}")]
    CorruptRecord { id: String, reason: String },
}

/// Fixture/environment faults of the snapshot codec. Fatal for a harness run.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt snapshot {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Snapshots are immutable once written.
    #[error("snapshot already exists: {0}")]
    AlreadyExists(PathBuf),
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SnapshotError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures of the threshold-key collaborator.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("metadata not found, initialize a new key first")]
    NotInitialized,

    #[error("key is not reconstructed yet")]
    NotReconstructed,

    #[error("not enough shares for reconstruction: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },

    #[error("share {index} does not match the polynomial commitments")]
    InvalidShare { index: String },

    #[error("share is unknown or no longer part of the latest polynomial")]
    StaleShare,

    #[error("reconstructed key does not match the stored public key")]
    KeyMismatch,

    #[error("share index {0} not found")]
    UnknownShareIndex(String),

    #[error("cannot delete share index {0}: threshold would be violated")]
    ThresholdViolation(String),

    /// Another handle holds the write lock on the key metadata.
    #[error("concurrent update in progress, retry later")]
    ConcurrentUpdate,

    /// Stored metadata moved on since this handle last read it.
    #[error("metadata changed since last sync (have nonce {have:?}, stored {stored:?})")]
    StaleMetadata {
        have: Option<u64>,
        stored: Option<u64>,
    },

    /// Write lock release reported a foreign token.
    #[error("write lock released by a foreign token")]
    LockOwnership,

    #[error("security questions module is not set up")]
    SecurityQuestionsMissing,

    #[error("security questions share already exists")]
    SecurityQuestionsExist,

    #[error("incorrect security answer")]
    WrongAnswer,

    #[error("unsupported share format '{0}'")]
    UnsupportedFormat(String),

    #[error("invalid encoding: {0}")]
    Encoding(String),

    #[error("seal/unseal module data: {0}")]
    Seal(String),

    #[error("serialize: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SdkResult<T> = std::result::Result<T, SdkError>;
