//! scenario — named compatibility scenarios, run in capture or replay mode.
//!
//! Capture: fresh empty store -> scenario body -> snapshot
//! `<mocks>/<version>/<version>|<name>.json`.
//! Replay: every replay case gets its own fresh store loaded from the
//! snapshot and its own local store copy; cases never share state.
//!
//! State lives in an explicit `ScenarioContext`; there are no process-wide
//! stores or service providers.

use anyhow::{Context, Result};
use k256::Scalar;
use log::{debug, info, warn};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::SnapshotError;
use crate::keycodec::{point_to_hex, scalar_from_hex, scalar_to_hex, Identifier};
use crate::provider::ServiceProvider;
use crate::sdk::{SdkFactory, ShareStore, ThresholdSdk};
use crate::snapshot::{
    LocalStore, Snapshot, SnapshotCodec, LOCAL_DEVICE_SHARE, LOCAL_PRIV_KEY,
    LOCAL_SERIALIZED_SHARE,
};
use crate::store::{MetadataStore, StoreArgs};

pub mod suites;

/// Body of a capture or replay case.
pub type CaseFn = fn(&mut ScenarioContext) -> Result<()>;

#[derive(Clone, Copy)]
pub struct ReplayCase {
    pub name: &'static str,
    pub run: CaseFn,
}

/// A scenario: one capture body plus the cases replayed against its snapshots.
#[derive(Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub capture: CaseFn,
    pub replay: Vec<ReplayCase>,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field(
                "replay",
                &self.replay.iter().map(|c| c.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// Which invariant failed, with the error chain.
    Failed { invariant: String },
    /// Not run (snapshot for this version already on disk).
    Skipped { reason: String },
}

impl Outcome {
    /// True unless the case failed; a skipped case does not fail a run.
    pub fn passed(&self) -> bool {
        !matches!(self, Outcome::Failed { .. })
    }

    pub fn skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }
}

#[derive(Clone, Debug)]
pub struct ScenarioResult {
    pub scenario: String,
    pub case: String,
    /// Snapshot written (capture) or replayed (replay).
    pub file: Option<PathBuf>,
    pub outcome: Outcome,
}

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self
            .file
            .as_ref()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .unwrap_or("-");
        match &self.outcome {
            Outcome::Passed => write!(f, "ok   {} :: {} [{}]", self.scenario, self.case, file),
            Outcome::Failed { invariant } => write!(
                f,
                "FAIL {} :: {} [{}]: {}",
                self.scenario, self.case, file, invariant
            ),
            Outcome::Skipped { reason } => write!(
                f,
                "skip {} :: {} [{}]: {}",
                self.scenario, self.case, file, reason
            ),
        }
    }
}

/// Fingerprint used as `tkeyHash` of harness stores.
pub fn store_fingerprint(sp: &ServiceProvider) -> String {
    let digest = Sha256::digest(point_to_hex(&sp.retrieve_pub_key_point()).as_bytes());
    hex::encode(&digest[..16])
}

/// Everything one scenario invocation touches.
pub struct ScenarioContext {
    store: MetadataStore,
    service_provider: ServiceProvider,
    local: LocalStore,
    factory: Arc<dyn SdkFactory>,
}

impl ScenarioContext {
    /// Empty store (capture mode).
    pub fn fresh(factory: Arc<dyn SdkFactory>, sp: ServiceProvider) -> Result<Self> {
        let store = MetadataStore::with_provider(sp.clone(), &store_fingerprint(&sp), factory.version())?;
        Ok(Self {
            store,
            service_provider: sp,
            local: LocalStore::new(),
            factory,
        })
    }

    /// Store and local store loaded from a snapshot (replay mode).
    pub fn from_snapshot(
        factory: Arc<dyn SdkFactory>,
        sp: ServiceProvider,
        snap: Snapshot,
    ) -> Result<Self> {
        let store = MetadataStore::new(StoreArgs {
            data_map: Some(normalize_data_map(snap.data_map)),
            service_provider: Some(sp.clone()),
            tkey_hash: Some(store_fingerprint(&sp)),
            tkey_version: Some(factory.version().to_string()),
            ..StoreArgs::default()
        })?;
        Ok(Self {
            store,
            service_provider: sp,
            local: snap.local_store,
            factory,
        })
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// New SDK handle over the shared store (another "device").
    pub fn sdk(&self) -> Box<dyn ThresholdSdk> {
        self.factory
            .open(Arc::new(self.store.clone()), self.service_provider.clone())
    }

    /// Rebuild a handle from its serialized state.
    pub fn sdk_from_json(&self, state: &Value) -> Result<Box<dyn ThresholdSdk>> {
        self.factory
            .from_json(
                state,
                Arc::new(self.store.clone()),
                self.service_provider.clone(),
            )
            .context("restore SDK handle from JSON")
    }

    pub fn record_device_share(&mut self, share: &ShareStore) -> Result<()> {
        self.local
            .insert(LOCAL_DEVICE_SHARE.to_string(), serde_json::to_value(share)?);
        Ok(())
    }

    pub fn record_serialized_share(&mut self, share: &str) {
        self.local.insert(
            LOCAL_SERIALIZED_SHARE.to_string(),
            Value::String(share.to_string()),
        );
    }

    pub fn record_secret(&mut self, secret: &Scalar) {
        self.local.insert(
            LOCAL_PRIV_KEY.to_string(),
            Value::String(scalar_to_hex(secret)),
        );
    }

    pub fn device_share(&self) -> Result<ShareStore> {
        let v = self
            .local
            .get(LOCAL_DEVICE_SHARE)
            .context("local store has no deviceShare")?;
        ShareStore::from_value(v).context("parse deviceShare")
    }

    pub fn serialized_share(&self) -> Result<String> {
        self.local
            .get(LOCAL_SERIALIZED_SHARE)
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("local store has no serializedShare")
    }

    /// Secret recorded at capture time, if the snapshot carries one.
    pub fn expected_secret(&self) -> Result<Option<Scalar>> {
        match self.local.get(LOCAL_PRIV_KEY) {
            None => Ok(None),
            Some(v) => {
                let s = v.as_str().context("privKey is not a string")?;
                let k = scalar_from_hex(s).with_context(|| format!("privKey is not a scalar: {s}"))?;
                Ok(Some(k))
            }
        }
    }

    /// Cross-version check: reconstructed secret == captured `privKey`.
    pub fn expect_secret(&self, got: &Scalar) -> Result<()> {
        match self.expected_secret()? {
            Some(want) => anyhow::ensure!(
                *got == want,
                "reconstructed secret differs from the captured privKey"
            ),
            None => debug!("snapshot carries no privKey, secret equality not checked"),
        }
        Ok(())
    }
}

/// Older fixtures may carry unpadded identifiers.
fn normalize_data_map(map: BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.into_iter()
        .map(|(k, v)| match Identifier::parse(&k) {
            Ok(id) => (id.to_string(), v),
            Err(_) => {
                debug!("data map key {} is not an identifier, kept as is", k);
                (k, v)
            }
        })
        .collect()
}

fn run_case(scenario: &str, case: &str, body: CaseFn, ctx: &mut ScenarioContext) -> Outcome {
    match body(ctx) {
        Ok(()) => Outcome::Passed,
        Err(e) => {
            warn!("{} :: {} failed: {:#}", scenario, case, e);
            Outcome::Failed {
                invariant: format!("{:#}", e),
            }
        }
    }
}

pub const CAPTURE_CASE: &str = "capture";

fn already_captured(scenario: &str, path: PathBuf) -> ScenarioResult {
    info!("{} already captured at {}, skipped", scenario, path.display());
    ScenarioResult {
        scenario: scenario.to_string(),
        case: CAPTURE_CASE.to_string(),
        file: Some(path),
        outcome: Outcome::Skipped {
            reason: "snapshot already exists".to_string(),
        },
    }
}

/// Runs registered scenarios against one SDK build.
pub struct ScenarioRunner {
    factory: Arc<dyn SdkFactory>,
    service_provider: ServiceProvider,
    scenarios: Vec<Scenario>,
}

impl ScenarioRunner {
    /// Runner with the built-in suites.
    pub fn new(factory: Arc<dyn SdkFactory>, service_provider: ServiceProvider) -> Self {
        Self::with_scenarios(factory, service_provider, suites::registry())
    }

    pub fn with_scenarios(
        factory: Arc<dyn SdkFactory>,
        service_provider: ServiceProvider,
        scenarios: Vec<Scenario>,
    ) -> Self {
        Self {
            factory,
            service_provider,
            scenarios,
        }
    }

    pub fn version(&self) -> &str {
        self.factory.version()
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.scenarios.iter().map(|s| s.name).collect()
    }

    pub fn find(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// Capture one scenario. The snapshot is written only if the body passed.
    /// A scenario already captured for this version is skipped without
    /// running its body; other snapshot errors are returned as errors.
    pub fn capture(&self, scenario: &Scenario, codec: &SnapshotCodec) -> Result<ScenarioResult> {
        let existing = codec.path_for(self.version(), scenario.name);
        if existing.exists() {
            return Ok(already_captured(scenario.name, existing));
        }

        let mut ctx = ScenarioContext::fresh(self.factory.clone(), self.service_provider.clone())?;
        let outcome = run_case(scenario.name, CAPTURE_CASE, scenario.capture, &mut ctx);
        if !outcome.passed() {
            return Ok(ScenarioResult {
                scenario: scenario.name.to_string(),
                case: CAPTURE_CASE.to_string(),
                file: None,
                outcome,
            });
        }
        match codec.save(ctx.store(), ctx.local(), self.version(), scenario.name) {
            Ok(path) => Ok(ScenarioResult {
                scenario: scenario.name.to_string(),
                case: CAPTURE_CASE.to_string(),
                file: Some(path),
                outcome,
            }),
            // появился между проверкой и записью
            Err(SnapshotError::AlreadyExists(path)) => Ok(already_captured(scenario.name, path)),
            Err(e) => Err(e).with_context(|| format!("save snapshot for {}", scenario.name)),
        }
    }

    pub fn capture_all(&self, codec: &SnapshotCodec) -> Result<Vec<ScenarioResult>> {
        let mut out = Vec::with_capacity(self.scenarios.len());
        for s in &self.scenarios {
            out.push(self.capture(s, codec)?);
        }
        info!(
            "captured {} scenario(s) for version {}, {} already present",
            out.iter()
                .filter(|r| r.outcome == Outcome::Passed)
                .count(),
            self.version(),
            out.iter().filter(|r| r.outcome.skipped()).count()
        );
        Ok(out)
    }

    /// Replay every case of `scenario` against the snapshot at `path`.
    pub fn replay_file(&self, scenario: &Scenario, path: &Path) -> Result<Vec<ScenarioResult>> {
        let snap = SnapshotCodec::load(path)?;
        let mut out = Vec::with_capacity(scenario.replay.len());
        for case in &scenario.replay {
            let mut ctx = ScenarioContext::from_snapshot(
                self.factory.clone(),
                self.service_provider.clone(),
                snap.clone(),
            )?;
            let outcome = run_case(scenario.name, case.name, case.run, &mut ctx);
            out.push(ScenarioResult {
                scenario: scenario.name.to_string(),
                case: case.name.to_string(),
                file: Some(path.to_path_buf()),
                outcome,
            });
        }
        info!(
            "replayed {} on {}: {}/{} passed",
            scenario.name,
            path.display(),
            out.iter().filter(|r| r.outcome.passed()).count(),
            out.len()
        );
        Ok(out)
    }
}
