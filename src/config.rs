//! Centralized configuration of the compatibility harness.
//!
//! HarnessConfig::from_env() reads:
//! - MOCKED        (default true)  — in-memory store; false selects the network store
//! - METADATA      (default http://localhost:5051) — network store URL
//! - BUILD_MOCKS   (default false) — capture mode instead of replay
//! - TKEY_VERSION  (default: crate version) — version tag of captured snapshots
//! - MOCKS_DIR     (default ./mocks)
//! - VERSIONS_FILE (default ./versionsToTest.txt)
//! - POSTBOX_KEY   (default: fixed harness key) — service-provider private key, hex
//!
//! Booleans accept "1|true|yes|on" (case-insensitive); anything else is false.

use anyhow::{bail, Result};
use std::fmt;
use std::path::PathBuf;

use crate::provider::ServiceProvider;

pub const DEFAULT_METADATA_URL: &str = "http://localhost:5051";
pub const DEFAULT_MOCKS_DIR: &str = "./mocks";
pub const DEFAULT_VERSIONS_FILE: &str = "./versionsToTest.txt";

/// Service-provider key every fixture in the corpus was captured with.
pub const DEFAULT_POSTBOX_KEY: &str =
    "e70fb5f5970b363879bc36f54d4fc0ad77863bfd059881159251f50f48863acf";

#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Env: MOCKED
    pub mocked: bool,
    /// Env: METADATA
    pub metadata_url: String,
    /// Env: BUILD_MOCKS
    pub build_mocks: bool,
    /// Version tag for capture. None: version of the SDK build.
    /// Env: TKEY_VERSION
    pub sdk_version: Option<String>,
    /// Env: MOCKS_DIR
    pub mocks_dir: PathBuf,
    /// Env: VERSIONS_FILE
    pub versions_file: PathBuf,
    /// Env: POSTBOX_KEY
    pub postbox_key: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            mocked: true,
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            build_mocks: false,
            sdk_version: None,
            mocks_dir: PathBuf::from(DEFAULT_MOCKS_DIR),
            versions_file: PathBuf::from(DEFAULT_VERSIONS_FILE),
            postbox_key: DEFAULT_POSTBOX_KEY.to_string(),
        }
    }
}

fn parse_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

fn non_empty(v: String) -> Option<String> {
    let s = v.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

impl HarnessConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("MOCKED") {
            cfg.mocked = parse_flag(&v);
        }
        if let Some(v) = std::env::var("METADATA").ok().and_then(non_empty) {
            cfg.metadata_url = v;
        }
        if let Ok(v) = std::env::var("BUILD_MOCKS") {
            cfg.build_mocks = parse_flag(&v);
        }
        if let Some(v) = std::env::var("TKEY_VERSION").ok().and_then(non_empty) {
            cfg.sdk_version = Some(v);
        }
        if let Some(v) = std::env::var("MOCKS_DIR").ok().and_then(non_empty) {
            cfg.mocks_dir = PathBuf::from(v);
        }
        if let Some(v) = std::env::var("VERSIONS_FILE").ok().and_then(non_empty) {
            cfg.versions_file = PathBuf::from(v);
        }
        if let Some(v) = std::env::var("POSTBOX_KEY").ok().and_then(non_empty) {
            cfg.postbox_key = v;
        }

        cfg
    }

    pub fn with_mocked(mut self, on: bool) -> Self {
        self.mocked = on;
        self
    }

    pub fn with_metadata_url<S: Into<String>>(mut self, url: S) -> Self {
        self.metadata_url = url.into();
        self
    }

    pub fn with_build_mocks(mut self, on: bool) -> Self {
        self.build_mocks = on;
        self
    }

    pub fn with_sdk_version<S: Into<String>>(mut self, version: Option<S>) -> Self {
        self.sdk_version = version.map(Into::into);
        self
    }

    pub fn with_mocks_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.mocks_dir = dir.into();
        self
    }

    pub fn with_versions_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.versions_file = path.into();
        self
    }

    pub fn with_postbox_key<S: Into<String>>(mut self, key: S) -> Self {
        self.postbox_key = key.into();
        self
    }

    /// Fails when the configuration asks for something this build cannot do.
    pub fn validate(&self) -> Result<()> {
        if !self.mocked {
            bail!(
                "network-backed metadata store ({}) is not supported by this build; set MOCKED=true",
                self.metadata_url
            );
        }
        if ServiceProvider::from_hex(&self.postbox_key).is_none() {
            bail!("POSTBOX_KEY is not a valid non-zero secp256k1 scalar");
        }
        Ok(())
    }

    pub fn service_provider(&self) -> Result<ServiceProvider> {
        ServiceProvider::from_hex(&self.postbox_key)
            .ok_or_else(|| anyhow::anyhow!("POSTBOX_KEY is not a valid non-zero secp256k1 scalar"))
    }
}

impl fmt::Display for HarnessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HarnessConfig {{ \
             mocked: {}, \
             metadata_url: {}, \
             build_mocks: {}, \
             sdk_version: {}, \
             mocks_dir: {}, \
             versions_file: {} \
             }}",
            self.mocked,
            self.metadata_url,
            self.build_mocks,
            self.sdk_version
                .as_deref()
                .unwrap_or("default(sdk build)"),
            self.mocks_dir.display(),
            self.versions_file.display(),
        )
    }
}

/// Builder that starts from the environment and allows overrides.
#[derive(Clone, Debug)]
pub struct HarnessBuilder {
    cfg: HarnessConfig,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            cfg: HarnessConfig::from_env(),
        }
    }
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: HarnessConfig::default(),
        }
    }

    pub fn mocked(mut self, on: bool) -> Self {
        self.cfg.mocked = on;
        self
    }

    pub fn build_mocks(mut self, on: bool) -> Self {
        self.cfg.build_mocks = on;
        self
    }

    pub fn sdk_version<S: Into<String>>(mut self, version: Option<S>) -> Self {
        self.cfg.sdk_version = version.map(Into::into);
        self
    }

    pub fn mocks_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cfg.mocks_dir = dir.into();
        self
    }

    pub fn versions_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cfg.versions_file = path.into();
        self
    }

    pub fn build(self) -> HarnessConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        for v in ["1", "true", "YES", " on "] {
            assert!(parse_flag(v), "{v}");
        }
        for v in ["0", "false", "", "nope"] {
            assert!(!parse_flag(v), "{v}");
        }
    }

    #[test]
    fn network_store_is_rejected() {
        let cfg = HarnessConfig::default().with_mocked(false);
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains(DEFAULT_METADATA_URL));
        assert!(HarnessConfig::default().validate().is_ok());
    }
}
