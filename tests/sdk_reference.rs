use anyhow::Result;
use k256::Scalar;
use std::sync::Arc;

use tkeystore::sdk::modules::account_key;
use tkeystore::sdk::{ShareFormat, ShareStore, SERVICE_PROVIDER_INDEX};
use tkeystore::{
    MetadataStore, ReferenceSdk, SdkError, SdkFactory, ServiceProvider, StorageLayer,
    ThresholdSdk,
};

const ANSWER: &str = "blublu";
const NEW_ANSWER: &str = "dodo";
const QUESTION: &str = "who is your cat?";
const KIND: &str = "HD Key Tree";
const PHRASE: &str = "seed sock milk update focus rotate barely fade car face mechanic mercy";

struct Env {
    store: MetadataStore,
    sp: ServiceProvider,
    factory: ReferenceSdk,
}

impl Env {
    fn new() -> Result<Self> {
        let sp = ServiceProvider::new(&Scalar::from(0x5151_u64));
        let store = MetadataStore::with_provider(sp.clone(), "sdk-test", "0.0.0")?;
        Ok(Self {
            store,
            sp,
            factory: ReferenceSdk::with_version("0.0.0"),
        })
    }

    fn storage(&self) -> Arc<dyn StorageLayer> {
        Arc::new(self.store.clone())
    }

    /// Новое "устройство" над тем же store.
    fn device(&self) -> Box<dyn ThresholdSdk> {
        self.factory.open(self.storage(), self.sp.clone())
    }

    /// Fresh key; returns (handle, secret, device share).
    fn new_key(&self) -> Result<(Box<dyn ThresholdSdk>, Scalar, ShareStore)> {
        let mut tk = self.device();
        let init = tk.initialize(false)?;
        let secret = init.priv_key.expect("new key exposes its secret");
        let device = init.device_share.expect("new key hands out a device share");
        Ok((tk, secret, device))
    }
}

#[test]
fn initialize_then_reconstruct_on_another_device() -> Result<()> {
    let env = Env::new()?;
    let (_tk, secret, device) = env.new_key()?;

    let mut other = env.device();
    let init = other.initialize(true)?;
    assert!(init.priv_key.is_none());
    assert_eq!(init.threshold, 2);
    assert_eq!(init.total_shares, 2);

    // только share провайдера: одного мало
    let err = other.reconstruct_key().unwrap_err();
    assert!(matches!(err, SdkError::NotEnoughShares { have: 1, need: 2 }));

    other.input_share_store(device)?;
    let rec = other.reconstruct_key()?;
    assert_eq!(rec.priv_key, secret);
    assert_eq!(rec.all_keys, vec![secret]);
    assert!(rec.seed_phrase_keys.is_empty());
    Ok(())
}

#[test]
fn never_initialize_on_empty_store_fails() -> Result<()> {
    let env = Env::new()?;
    let mut tk = env.device();
    assert!(matches!(tk.initialize(true), Err(SdkError::NotInitialized)));
    assert!(env.store.is_empty());
    Ok(())
}

#[test]
fn generate_and_delete_share() -> Result<()> {
    let env = Env::new()?;
    let (mut tk, secret, old_device) = env.new_key()?;

    let gen = tk.generate_new_share()?;
    assert_eq!(gen.new_share_stores.len(), 3);
    assert_eq!(tk.share_indexes()?.len(), 3);
    let new_index = gen.new_share_index.clone();
    let new_share = tk.output_share(&new_index, ShareFormat::Hex)?;

    // the new share alone (plus the provider's) reconstructs
    let mut d2 = env.device();
    d2.initialize(true)?;
    d2.input_share(&new_share, ShareFormat::Hex)?;
    assert_eq!(d2.reconstruct_key()?.priv_key, secret);

    let del = tk.delete_share(&new_index)?;
    assert_eq!(del.new_share_stores.len(), 2);
    assert!(!tk.share_indexes()?.contains(&new_index));

    // deleted share is rejected
    let mut d3 = env.device();
    d3.initialize(true)?;
    assert!(matches!(
        d3.input_share(&new_share, ShareFormat::Hex),
        Err(SdkError::StaleShare)
    ));

    // the share issued before both refreshes still catches up
    let mut d4 = env.device();
    d4.initialize(true)?;
    d4.input_share_store(old_device)?;
    assert_eq!(d4.reconstruct_key()?.priv_key, secret);
    Ok(())
}

#[test]
fn delete_guards() -> Result<()> {
    let env = Env::new()?;
    let (mut tk, _, device) = env.new_key()?;

    let sp_index = format!("{:x}", SERVICE_PROVIDER_INDEX);
    assert!(matches!(
        tk.delete_share(&sp_index),
        Err(SdkError::ThresholdViolation(_))
    ));
    // 2-of-2: ни одну не удалить
    assert!(matches!(
        tk.delete_share(&device.share.share_index),
        Err(SdkError::ThresholdViolation(_))
    ));
    assert!(matches!(
        tk.delete_share("abcdef"),
        Err(SdkError::UnknownShareIndex(_))
    ));
    Ok(())
}

#[test]
fn security_questions_flow() -> Result<()> {
    let env = Env::new()?;
    let (mut tk, secret, _) = env.new_key()?;

    let idx = tk.generate_security_question_share(ANSWER, QUESTION)?;
    assert!(tk.share_indexes()?.contains(&idx));
    assert!(matches!(
        tk.generate_security_question_share(ANSWER, QUESTION),
        Err(SdkError::SecurityQuestionsExist)
    ));

    let mut d = env.device();
    d.initialize(true)?;
    assert!(matches!(
        d.input_share_from_security_questions("wrong"),
        Err(SdkError::WrongAnswer)
    ));
    d.input_share_from_security_questions(ANSWER)?;
    assert_eq!(d.reconstruct_key()?.priv_key, secret);

    tk.change_security_question_and_answer(NEW_ANSWER, QUESTION)?;
    let mut d = env.device();
    d.initialize(true)?;
    assert!(matches!(
        d.input_share_from_security_questions(ANSWER),
        Err(SdkError::WrongAnswer)
    ));
    d.input_share_from_security_questions(NEW_ANSWER)?;
    assert_eq!(d.reconstruct_key()?.priv_key, secret);
    Ok(())
}

#[test]
fn security_answer_survives_refresh() -> Result<()> {
    let env = Env::new()?;
    let (mut tk, secret, _) = env.new_key()?;
    tk.generate_security_question_share(ANSWER, QUESTION)?;
    tk.generate_new_share()?;

    let mut d = env.device();
    d.initialize(true)?;
    d.input_share_from_security_questions(ANSWER)?;
    assert_eq!(d.reconstruct_key()?.priv_key, secret);
    Ok(())
}

#[test]
fn security_questions_require_module() -> Result<()> {
    let env = Env::new()?;
    let (mut tk, _, _) = env.new_key()?;
    assert!(matches!(
        tk.input_share_from_security_questions(ANSWER),
        Err(SdkError::SecurityQuestionsMissing)
    ));
    assert!(matches!(
        tk.change_security_question_and_answer(ANSWER, QUESTION),
        Err(SdkError::SecurityQuestionsMissing)
    ));
    Ok(())
}

#[test]
fn seed_phrase_flow() -> Result<()> {
    let env = Env::new()?;
    let (mut tk, secret, device) = env.new_key()?;

    tk.set_seed_phrase(KIND, PHRASE)?;
    let phrases = tk.get_seed_phrases()?;
    assert_eq!(phrases.len(), 1);
    assert_eq!(phrases[0].kind, KIND);
    assert_eq!(phrases[0].seed_phrase, PHRASE);

    // same kind replaces
    tk.set_seed_phrase(KIND, PHRASE)?;
    assert_eq!(tk.get_seed_phrases()?.len(), 1);

    let mut d = env.device();
    d.initialize(true)?;
    d.input_share_store(device)?;
    let rec = d.reconstruct_key()?;
    let account = account_key(PHRASE)?;
    assert_eq!(rec.seed_phrase_keys, vec![account]);
    assert_eq!(rec.all_keys, vec![secret, account]);
    assert_eq!(d.derive_seed_phrase_accounts()?, vec![account]);
    Ok(())
}

#[test]
fn mnemonic_share_roundtrip_through_sdk() -> Result<()> {
    let env = Env::new()?;
    let (tk, secret, device) = env.new_key()?;

    let words = tk.output_share(&device.share.share_index, ShareFormat::Mnemonic)?;
    assert_eq!(words.split_whitespace().count(), 33);

    let mut d = env.device();
    d.initialize(true)?;
    d.input_share(&words, ShareFormat::Mnemonic)?;
    assert_eq!(d.reconstruct_key()?.priv_key, secret);

    assert!("qr".parse::<ShareFormat>().is_err());
    Ok(())
}

#[test]
fn held_lock_blocks_writes() -> Result<()> {
    let env = Env::new()?;
    let grant = env.store.acquire_write_lock(None)?;
    let token = grant.token().cloned().expect("granted");

    let mut tk = env.device();
    assert!(matches!(
        tk.initialize(false),
        Err(SdkError::ConcurrentUpdate)
    ));
    assert!(env.store.is_empty());

    env.store.release_write_lock(None, &token)?;
    let init = tk.initialize(false)?;
    assert!(init.priv_key.is_some());
    Ok(())
}

#[test]
fn stale_handle_must_sync_before_writing() -> Result<()> {
    let env = Env::new()?;
    let (mut a, secret, device) = env.new_key()?;

    let mut b = env.device();
    b.initialize(true)?;
    b.input_share_store(device)?;
    b.reconstruct_key()?;

    a.generate_new_share()?;
    assert!(matches!(
        b.generate_new_share(),
        Err(SdkError::StaleMetadata {
            have: Some(0),
            stored: Some(1)
        })
    ));

    b.sync_latest_metadata()?;
    // polynomial moved on: reconstruct again
    assert!(matches!(b.generate_new_share(), Err(SdkError::NotReconstructed)));
    assert_eq!(b.reconstruct_key()?.priv_key, secret);
    b.generate_new_share()?;
    assert_eq!(b.share_indexes()?.len(), 4);
    Ok(())
}

#[test]
fn handle_state_roundtrips_through_json() -> Result<()> {
    let env = Env::new()?;
    let (tk, secret, _) = env.new_key()?;

    let state = tk.to_json()?;
    let mut restored = env
        .factory
        .from_json(&state, env.storage(), env.sp.clone())?;
    assert_eq!(restored.reconstruct_key()?.priv_key, secret);
    assert_eq!(restored.share_indexes()?, tk.share_indexes()?);
    Ok(())
}
