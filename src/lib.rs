// Ядро: идентификаторы, канонический JSON, store + locks, снапшоты
pub mod keycodec;
pub mod canonical;
pub mod store;    // src/store/{mod,lock}.rs
pub mod snapshot;
pub mod error;
pub mod config;

// SDK-коллаборатор и service provider
pub mod provider;
pub mod sdk;      // src/sdk/{mod,reference,poly,modules,mnemonic}.rs

// Харнесс совместимости
pub mod scenario; // src/scenario/{mod,suites}.rs
pub mod matrix;

pub mod cli;

// Удобные реэкспорты
pub use config::{HarnessBuilder, HarnessConfig};
pub use error::{SdkError, SnapshotError, StoreError};
pub use keycodec::{identifier_for, Identifier, KeyMaterial};
pub use matrix::{CompatibilityMatrix, MatrixReport, Plan};
pub use provider::ServiceProvider;
pub use scenario::{Outcome, ScenarioContext, ScenarioResult, ScenarioRunner};
pub use sdk::{ReferenceSdk, SdkFactory, ThresholdSdk};
pub use snapshot::{LocalStore, Snapshot, SnapshotCodec};
pub use store::{
    LockGrant, LockManager, LockToken, MetadataResponse, MetadataStore, ReleaseStatus,
    StorageLayer, StoreArgs, KEY_NOT_FOUND,
};
