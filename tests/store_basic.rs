use anyhow::Result;
use k256::Scalar;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use tkeystore::keycodec::{identifier_for, KeyMaterial};
use tkeystore::store::{StoreJson, SUCCESS};
use tkeystore::{
    LockGrant, LockToken, MetadataResponse, MetadataStore, ReleaseStatus, ServiceProvider,
    StorageLayer, StoreArgs, StoreError, KEY_NOT_FOUND,
};

fn sp() -> ServiceProvider {
    ServiceProvider::new(&Scalar::from(0xfeed_u64))
}

fn store() -> Result<MetadataStore> {
    Ok(MetadataStore::with_provider(sp(), "hash-1", "1.2.3")?)
}

fn private(n: u64) -> KeyMaterial {
    KeyMaterial::Private(Scalar::from(n))
}

/// Object text with keys in a seeded random order.
fn shuffled_object_text(rng: &mut oorandom::Rand32, pairs: &[(&str, Value)]) -> String {
    let mut idx: Vec<usize> = (0..pairs.len()).collect();
    for i in (1..idx.len()).rev() {
        let j = rng.rand_range(0..(i as u32 + 1)) as usize;
        idx.swap(i, j);
    }
    let body: Vec<String> = idx
        .iter()
        .map(|&i| format!("{}:{}", Value::String(pairs[i].0.to_string()), pairs[i].1))
        .collect();
    format!("{{{}}}", body.join(","))
}

#[test]
fn unwritten_identifier_is_not_found() -> Result<()> {
    let s = store()?;
    for n in 1..20u64 {
        let resp = s.get_metadata(Some(&private(n)))?;
        assert!(resp.is_not_found());
        assert_eq!(resp.message(), Some(KEY_NOT_FOUND));
        let id = identifier_for(Some(&private(n)))?;
        assert!(s.get(&id).is_none());
    }
    // service-provider fallback reads the same way
    assert_eq!(s.get_metadata(None)?, MetadataResponse::KeyNotFound);
    assert!(s.is_empty());
    Ok(())
}

#[test]
fn canonical_record_ignores_key_order() -> Result<()> {
    let s = store()?;
    let m = private(42);
    let pairs = [
        ("shareIndex", json!("1f")),
        ("polynomialID", json!("ab01")),
        ("nested", json!({"z": 1, "a": [3, 2, 1], "m": {"y": null, "b": true}})),
        ("nonce", json!(7)),
        ("alpha", json!("x")),
    ];

    let mut rng = oorandom::Rand32::new(0x5eed);
    let mut first: Option<String> = None;
    for _ in 0..32 {
        let text = shuffled_object_text(&mut rng, &pairs);
        let v: Value = serde_json::from_str(&text)?;
        let ack = s.set_metadata(Some(&m), &v)?;
        assert_eq!(ack.message, SUCCESS);

        let id = identifier_for(Some(&m))?;
        let rec = s.get(&id).expect("record written").into_string();
        match &first {
            None => first = Some(rec),
            Some(f) => assert_eq!(f, &rec, "record bytes depend on key order"),
        }
        let back = s.get_metadata(Some(&m))?.into_value().expect("found");
        assert_eq!(back, v);
    }

    let rec = first.expect("at least one write");
    assert!(rec.starts_with("{\"alpha\":\"x\",\"nested\":{\"a\":[3,2,1]"));
    assert!(!rec.contains(' '));
    Ok(())
}

#[test]
fn typed_payload_is_canonicalized() -> Result<()> {
    #[derive(Serialize)]
    struct Out {
        zeta: u32,
        alpha: &'static str,
        mid: Vec<u8>,
    }

    let s = store()?;
    let id = identifier_for(Some(&private(9)))?;
    s.set(
        &id,
        &Out {
            zeta: 1,
            alpha: "a",
            mid: vec![2, 1],
        },
    )?;
    let rec = s.get(&id).expect("record");
    assert_eq!(rec.as_str(), r#"{"alpha":"a","mid":[2,1],"zeta":1}"#);

    // last write wins
    s.set(&id, &json!({"v": 2}))?;
    assert_eq!(s.get(&id).expect("record").as_str(), r#"{"v":2}"#);
    assert_eq!(s.len(), 1);
    Ok(())
}

#[test]
fn bulk_set_falls_back_to_service_provider() -> Result<()> {
    let s = store()?;
    let materials = vec![Some(private(11)), None, Some(private(12))];
    let inputs = vec![json!({"i": 0}), json!({"i": 1}), json!({"i": 2})];
    let ack = s.set_metadata_bulk(&materials, &inputs)?;

    assert!(ack.all_written());
    assert_eq!(ack.written.len(), 3);
    assert_eq!(ack.fallbacks, vec![1]);

    let sp_id = identifier_for(Some(&sp().key_material()))?;
    assert_eq!(ack.written[1].1, sp_id);
    assert_eq!(
        s.get_metadata(None)?.into_value(),
        Some(json!({"i": 1}))
    );
    assert_eq!(
        s.get_metadata(Some(&private(12)))?.into_value(),
        Some(json!({"i": 2}))
    );

    // zero scalar cannot be resolved: degrades to the fallback as well
    let ack = s.set_metadata_bulk(&[Some(private(0))], &[json!({"i": 3})])?;
    assert_eq!(ack.fallbacks, vec![0]);
    assert_eq!(s.get_metadata(None)?.into_value(), Some(json!({"i": 3})));
    Ok(())
}

#[test]
fn bulk_without_provider_reports_failed_items() -> Result<()> {
    let s = MetadataStore::new(StoreArgs {
        tkey_hash: Some("h".into()),
        ..StoreArgs::default()
    })?;
    let ack = s.set_metadata_bulk(
        &[None, Some(private(5))],
        &[json!(1), json!(2)],
    )?;
    assert!(!ack.all_written());
    assert_eq!(ack.failed.len(), 1);
    assert_eq!(ack.failed[0].0, 0);
    assert_eq!(ack.written.len(), 1);

    let err = s.get_metadata(None).unwrap_err();
    assert!(matches!(err, StoreError::InvalidKeyMaterial(_)));
    Ok(())
}

#[test]
fn missing_fingerprint_is_rejected() {
    let err = MetadataStore::new(StoreArgs::default()).err().expect("must fail");
    assert!(matches!(err, StoreError::MissingFingerprint));
    assert_eq!(err.to_string(), "need tkeyHash");

    let err = MetadataStore::new(StoreArgs {
        tkey_hash: Some(String::new()),
        tkey_version: Some("1.0.0".into()),
        ..StoreArgs::default()
    })
    .err()
    .expect("must fail");
    assert!(matches!(err, StoreError::MissingFingerprint));
}

#[test]
fn serialized_form_roundtrip() -> Result<()> {
    let s = store()?;
    s.set_metadata(Some(&private(3)), &json!({"a": 1}))?;
    s.set_metadata(None, &json!({"sp": true}))?;

    let v = serde_json::to_value(s.to_json())?;
    let obj = v.as_object().expect("object");
    assert!(obj.contains_key("dataMap"));
    assert!(obj.contains_key("serviceProvider"));
    assert_eq!(obj["tkeyHash"], "hash-1");
    assert_eq!(obj["tkeyVersion"], "1.2.3");
    assert!(!obj.contains_key("lockMap"));

    let back = MetadataStore::from_json(serde_json::from_value::<StoreJson>(v)?)?;
    assert_eq!(back.data_map(), s.data_map());
    assert_eq!(back.tkey_hash(), "hash-1");
    assert_eq!(back.tkey_version(), "1.2.3");
    assert_eq!(
        back.get_metadata(None)?.into_value(),
        Some(json!({"sp": true}))
    );
    Ok(())
}

#[test]
fn serialized_lock_map_is_restored() -> Result<()> {
    let id = identifier_for(Some(&private(77)))?;
    let mut locks = BTreeMap::new();
    locks.insert(id.to_string(), "abc123def".to_string());
    let raw = json!({
        "dataMap": {},
        "tkeyHash": "h",
        "tkeyVersion": "",
        "lockMap": locks,
    });
    let s = MetadataStore::from_json(serde_json::from_value(raw)?)?;

    assert_eq!(s.acquire_write_lock(Some(&private(77)))?, LockGrant::Contended);
    assert_eq!(
        s.release_write_lock(Some(&private(77)), &LockToken::new("abc123def"))?,
        ReleaseStatus::Released
    );
    assert!(s.acquire_write_lock(Some(&private(77)))?.is_granted());
    Ok(())
}

#[test]
fn clones_share_contents() -> Result<()> {
    let a = store()?;
    let b = a.clone();
    b.set_metadata(Some(&private(8)), &json!("shared"))?;
    assert_eq!(
        a.get_metadata(Some(&private(8)))?.into_value(),
        Some(json!("shared"))
    );
    Ok(())
}
