use anyhow::Result;
use k256::Scalar;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use tkeystore::keycodec::KeyMaterial;
use tkeystore::snapshot::{parse_file_name, LOCAL_DEVICE_SHARE, LOCAL_PRIV_KEY};
use tkeystore::{
    LocalStore, MetadataStore, ServiceProvider, Snapshot, SnapshotCodec, SnapshotError,
    StorageLayer,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tkeystore-snap-{prefix}-{pid}-{t}-{id}"))
}

fn filled_store() -> Result<MetadataStore> {
    let sp = ServiceProvider::new(&Scalar::from(4242u64));
    let s = MetadataStore::with_provider(sp, "snap", "9.9.9")?;
    s.set_metadata(None, &json!({"b": 2, "a": 1}))?;
    s.set_metadata(
        Some(&KeyMaterial::Private(Scalar::from(17u64))),
        &json!(["x", {"k": "v"}]),
    )?;
    Ok(s)
}

#[test]
fn save_then_load_gives_same_maps() -> Result<()> {
    let root = unique_root("roundtrip");
    let codec = SnapshotCodec::new(&root);
    let store = filled_store()?;

    let mut local = LocalStore::new();
    local.insert(LOCAL_DEVICE_SHARE.into(), json!({"share": {"share": "0a"}}));
    local.insert(LOCAL_PRIV_KEY.into(), json!("deadbeef"));

    let path = codec.save(&store, &local, "1.0.0", "tkey-core")?;
    assert_eq!(path, root.join("1.0.0").join("1.0.0|tkey-core.json"));
    assert_eq!(
        parse_file_name(path.file_name().and_then(|s| s.to_str()).unwrap_or_default()),
        Some(("1.0.0", "tkey-core"))
    );

    let snap = SnapshotCodec::load(&path)?;
    assert_eq!(snap.data_map, store.data_map());
    assert_eq!(snap.local_store, local);

    // на диске только финальный файл, без tmp
    let names: Vec<String> = fs::read_dir(root.join("1.0.0"))?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["1.0.0|tkey-core.json".to_string()]);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn existing_snapshot_is_never_overwritten() -> Result<()> {
    let root = unique_root("immutable");
    let codec = SnapshotCodec::new(&root);
    let first = Snapshot {
        data_map: [("aa".to_string(), "{}".to_string())].into_iter().collect(),
        local_store: LocalStore::new(),
    };
    let path = codec.save_snapshot(&first, "2.0.0", "seedphrase")?;

    let second = Snapshot::default();
    let err = codec
        .save_snapshot(&second, "2.0.0", "seedphrase")
        .unwrap_err();
    assert!(matches!(err, SnapshotError::AlreadyExists(ref p) if p == &path));

    assert_eq!(SnapshotCodec::load(&path)?, first);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn concurrent_saves_of_one_title_keep_the_first() -> Result<()> {
    const WRITERS: usize = 6;
    let root = unique_root("race");
    let codec = SnapshotCodec::new(&root);
    fs::create_dir_all(codec.version_dir("3.0.0"))?;
    let barrier = Arc::new(Barrier::new(WRITERS));

    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let codec = codec.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            let snap = Snapshot {
                data_map: [(format!("{i:02}"), format!("{{\"writer\":{i}}}"))]
                    .into_iter()
                    .collect(),
                local_store: LocalStore::new(),
            };
            barrier.wait();
            (codec.save_snapshot(&snap, "3.0.0", "tkey-core"), snap)
        }));
    }

    let mut winners = Vec::new();
    for h in handles {
        let (res, snap) = h.join().expect("writer thread");
        match res {
            Ok(_) => winners.push(snap),
            Err(SnapshotError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    assert_eq!(winners.len(), 1);

    let path = codec.path_for("3.0.0", "tkey-core");
    assert_eq!(SnapshotCodec::load(&path)?, winners[0]);

    // временные файлы проигравших убраны
    let names: Vec<String> = fs::read_dir(codec.version_dir("3.0.0"))?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["3.0.0|tkey-core.json".to_string()]);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn malformed_files_are_corrupt() -> Result<()> {
    let root = unique_root("corrupt");
    fs::create_dir_all(&root)?;

    let bad_json = root.join("1.0.0|broken.json");
    fs::write(&bad_json, b"{\"dataMap\": {")?;
    assert!(matches!(
        SnapshotCodec::load(&bad_json),
        Err(SnapshotError::Corrupt { .. })
    ));

    // обязательные поля отсутствуют
    let missing = root.join("1.0.0|missing.json");
    fs::write(&missing, br#"{"dataMap": {}}"#)?;
    assert!(matches!(
        SnapshotCodec::load(&missing),
        Err(SnapshotError::Corrupt { .. })
    ));

    let absent = root.join("nope.json");
    assert!(matches!(
        SnapshotCodec::load(&absent),
        Err(SnapshotError::Io { .. })
    ));

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn snapshot_document_uses_camel_case_fields() -> Result<()> {
    let root = unique_root("fields");
    let codec = SnapshotCodec::new(&root);
    let path = codec.save(&filled_store()?, &LocalStore::new(), "0.1.0", "t")?;

    let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let obj = v.as_object().expect("object");
    assert!(obj.contains_key("dataMap"));
    assert!(obj.contains_key("localStore"));
    assert_eq!(obj["dataMap"].as_object().map(|m| m.len()), Some(2));

    let _ = fs::remove_dir_all(&root);
    Ok(())
}
