//! snapshot — persisted `{dataMap, localStore}` fixtures.
//!
//! Layout: `<root>/<version>/<version>|<title>.json`, one JSON document per file.
//! Files are immutable once written: `save` writes a tmp file and hard-links
//! it into place, so an existing target is never replaced.
//!
//! `localStore` carries whatever the scenario produced besides metadata
//! (device share, serialized share, expected secret).

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SnapshotError;
use crate::store::MetadataStore;

/// Separator between version and title in snapshot file names.
pub const NAME_SEPARATOR: char = '|';
pub const SNAPSHOT_EXT: &str = "json";

/// Free-form auxiliary map saved next to the metadata.
pub type LocalStore = BTreeMap<String, Value>;

/// Well-known local store entries.
pub const LOCAL_DEVICE_SHARE: &str = "deviceShare";
pub const LOCAL_SERIALIZED_SHARE: &str = "serializedShare";
pub const LOCAL_PRIV_KEY: &str = "privKey";

static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub data_map: BTreeMap<String, String>,
    pub local_store: LocalStore,
}

/// File name for a (version, title) pair.
pub fn snapshot_file_name(version: &str, title: &str) -> String {
    format!("{version}{NAME_SEPARATOR}{title}.{SNAPSHOT_EXT}")
}

/// Split a snapshot basename back into (version, title).
pub fn parse_file_name(name: &str) -> Option<(&str, &str)> {
    let stem = name.strip_suffix(".json")?;
    stem.split_once(NAME_SEPARATOR)
}

/// Reads and writes snapshots under a root directory (`./mocks` by default).
#[derive(Clone, Debug)]
pub struct SnapshotCodec {
    root: PathBuf,
}

impl SnapshotCodec {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join(version)
    }

    pub fn path_for(&self, version: &str, title: &str) -> PathBuf {
        self.version_dir(version)
            .join(snapshot_file_name(version, title))
    }

    /// Serialize `{dataMap, localStore}` of `store` and write it. Returns the path.
    pub fn save(
        &self,
        store: &MetadataStore,
        local: &LocalStore,
        version: &str,
        title: &str,
    ) -> Result<PathBuf, SnapshotError> {
        let snap = Snapshot {
            data_map: store.data_map(),
            local_store: local.clone(),
        };
        self.save_snapshot(&snap, version, title)
    }

    pub fn save_snapshot(
        &self,
        snap: &Snapshot,
        version: &str,
        title: &str,
    ) -> Result<PathBuf, SnapshotError> {
        let dir = self.version_dir(version);
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| SnapshotError::io(&dir, e))?;
        }
        let path = self.path_for(version, title);
        if path.exists() {
            return Err(SnapshotError::AlreadyExists(path));
        }

        let json = serde_json::to_string(snap).map_err(|e| SnapshotError::Corrupt {
            path: path.clone(),
            reason: format!("serialize: {e}"),
        })?;
        let tmp = path.with_extension(format!(
            "{}-{}.tmp",
            std::process::id(),
            NEXT_TMP.fetch_add(1, Ordering::Relaxed)
        ));
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(|e| SnapshotError::io(&tmp, e))?;
            f.write_all(json.as_bytes())
                .map_err(|e| SnapshotError::io(&tmp, e))?;
            f.flush().map_err(|e| SnapshotError::io(&tmp, e))?;
        }
        // hard_link не заменяет существующий файл, в отличие от rename.
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SnapshotError::AlreadyExists(path));
            }
            Err(e) => return Err(SnapshotError::io(&path, e)),
        }
        info!(
            "saved {}",
            path.file_name().and_then(|s| s.to_str()).unwrap_or("?")
        );
        Ok(path)
    }

    /// Parse a snapshot file. Missing `dataMap`/`localStore` is `Corrupt`.
    pub fn load(path: &Path) -> Result<Snapshot, SnapshotError> {
        let raw = fs::read_to_string(path).map_err(|e| SnapshotError::io(path, e))?;
        serde_json::from_str(&raw).map_err(|e| SnapshotError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_roundtrip() {
        let n = snapshot_file_name("3.4.0", "tkey-core");
        assert_eq!(n, "3.4.0|tkey-core.json");
        assert_eq!(parse_file_name(&n), Some(("3.4.0", "tkey-core")));
        assert_eq!(parse_file_name("notes.txt"), None);
    }
}
