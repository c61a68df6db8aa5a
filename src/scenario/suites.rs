//! Built-in suites: tkey-core, security-questions, seedphrase,
//! share-serialization-mnemonic.

use anyhow::{ensure, Context, Result};
use k256::Scalar;
use log::debug;

use super::{ReplayCase, Scenario, ScenarioContext};
use crate::sdk::modules::account_key;
use crate::sdk::{ShareFormat, ThresholdSdk};

pub const TKEY_CORE: &str = "tkey-core";
pub const SECURITY_QUESTIONS: &str = "security-questions";
pub const SEED_PHRASE: &str = "seedphrase";
pub const SHARE_SERIALIZATION_MNEMONIC: &str = "share-serialization-mnemonic";

pub const ANSWER: &str = "blublu";
pub const NEW_ANSWER: &str = "dodo";
pub const QUESTION: &str = "who is your cat?";
pub const PHRASE_KIND: &str = "HD Key Tree";
pub const PHRASE: &str = "seed sock milk update focus rotate barely fade car face mechanic mercy";

pub fn registry() -> Vec<Scenario> {
    vec![
        Scenario {
            name: TKEY_CORE,
            capture: capture_tkey_core,
            replay: vec![
                case("reconstruct", core_reconstruct),
                case("generate-and-delete", core_generate_and_delete),
                case("no-input-post-deletion", core_no_input_post_deletion),
                case("reshare-and-retrieve", core_reshare),
                case("reshare-serialization", core_reshare_serialization),
                case("reconstruct-with-old-metadata", core_old_metadata),
                case("reconstruct-with-security-questions", core_security_questions),
                case(
                    "security-questions-after-refresh",
                    core_security_questions_after_refresh,
                ),
                case("set-seed-phrase", core_seed_phrase),
            ],
        },
        Scenario {
            name: SECURITY_QUESTIONS,
            capture: capture_security_questions,
            replay: vec![
                case("reconstruct-from-answer", sq_reconstruct),
                case("change-answer", sq_change_answer),
                case("change-answer-serialization", sq_change_answer_serialization),
            ],
        },
        Scenario {
            name: SEED_PHRASE,
            capture: capture_seed_phrase,
            replay: vec![
                case("get-seed-phrase", seed_get),
                case("derive-accounts", seed_derive_accounts),
            ],
        },
        Scenario {
            name: SHARE_SERIALIZATION_MNEMONIC,
            capture: capture_mnemonic,
            replay: vec![case("accept-mnemonic", mnemonic_accept)],
        },
    ]
}

fn case(name: &'static str, run: super::CaseFn) -> ReplayCase {
    ReplayCase { name, run }
}

// ---------------- capture ----------------

fn capture_tkey_core(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    let resp = tb.initialize(false)?;
    let secret = resp.priv_key.context("initialize did not create a key")?;
    let device = resp.device_share.context("initialize returned no device share")?;

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    tb2.input_share_store(device.clone())?;
    let key = tb2.reconstruct_key()?;
    ensure!(key.priv_key == secret, "key should be able to be reconstructed");

    ctx.record_device_share(&device)?;
    ctx.record_secret(&secret);
    Ok(())
}

fn capture_security_questions(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    let resp = tb.initialize(false)?;
    let secret = resp.priv_key.context("initialize did not create a key")?;
    tb.generate_security_question_share(ANSWER, QUESTION)?;

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    tb2.input_share_from_security_questions(ANSWER)?;
    let key = tb2.reconstruct_key()?;
    ensure!(key.priv_key == secret, "key should be able to be reconstructed");

    ctx.record_secret(&secret);
    Ok(())
}

fn capture_seed_phrase(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    let resp = tb.initialize(false)?;
    let secret = resp.priv_key.context("initialize did not create a key")?;
    let device = resp.device_share.context("initialize returned no device share")?;
    tb.set_seed_phrase(PHRASE_KIND, PHRASE)?;

    ctx.record_device_share(&device)?;
    ctx.record_secret(&secret);
    Ok(())
}

fn capture_mnemonic(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    let resp = tb.initialize(false)?;
    let secret = resp.priv_key.context("initialize did not create a key")?;
    let device = resp.device_share.context("initialize returned no device share")?;
    let exported = tb.output_share(&device.share.share_index, ShareFormat::Mnemonic)?;
    ctx.record_serialized_share(&exported);

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    tb2.input_share(&exported, ShareFormat::Mnemonic)?;
    let key = tb2.reconstruct_key()?;
    ensure!(key.priv_key == secret, "key should be able to be reconstructed");

    ctx.record_secret(&secret);
    Ok(())
}

// ---------------- tkey-core replay ----------------

fn core_reconstruct(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_store(ctx.device_share()?)?;
    let key = tb
        .reconstruct_key()
        .context("key should be able to be reconstructed")?;
    ctx.expect_secret(&key.priv_key)
}

fn core_generate_and_delete(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_store(ctx.device_share()?)?;
    tb.reconstruct_key()?;
    let generated = tb.generate_new_share()?;
    let new_index = generated.new_share_index.clone();
    let new_store = generated
        .new_share_stores
        .get(&new_index)
        .cloned()
        .context("generated share missing from share stores")?;

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    tb2.input_share_store(new_store.clone())?;
    let key = tb2
        .reconstruct_key()
        .context("key should be able to be reconstructed")?;
    ctx.expect_secret(&key.priv_key)?;

    let deleted = tb2.delete_share(&new_index)?;
    ensure!(
        !deleted.new_share_stores.contains_key(&new_index),
        "unable to delete share index {new_index}"
    );
    ensure!(
        !tb2.share_indexes()?.contains(&new_index),
        "deleted index {new_index} still listed"
    );

    let mut tb3 = ctx.sdk();
    tb3.initialize(true)?;
    let stale = tb3
        .input_share(&new_store.share.share, ShareFormat::Hex)
        .and_then(|_| tb3.reconstruct_key());
    ensure!(
        stale.is_err(),
        "deleted share must not reconstruct the key"
    );
    Ok(())
}

fn core_no_input_post_deletion(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_store(ctx.device_share()?)?;
    tb.reconstruct_key()?;
    let generated = tb.generate_new_share()?;
    let raw = generated
        .new_share_stores
        .get(&generated.new_share_index)
        .map(|s| s.share.share.clone())
        .context("generated share missing from share stores")?;
    tb.delete_share(&generated.new_share_index)?;

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    match tb2.input_share(&raw, ShareFormat::Hex) {
        Ok(()) => anyhow::bail!("deleted share was accepted as input"),
        Err(e) => debug!("deleted share rejected: {}", e),
    }
    Ok(())
}

fn core_reshare(ctx: &mut ScenarioContext) -> Result<()> {
    reshare(ctx).map(|_| ())
}

/// Two handles reconstruct, the second adds a share, a third handle
/// reconstructs from the new share alone. Returns the third handle and its key.
fn reshare(ctx: &mut ScenarioContext) -> Result<(Box<dyn ThresholdSdk>, Scalar)> {
    let device = ctx.device_share()?;
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_store(device.clone())?;
    let first = tb.reconstruct_key()?;
    ctx.expect_secret(&first.priv_key)?;

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    tb2.input_share_store(device)?;
    let second = tb2.reconstruct_key()?;
    ensure!(
        first.priv_key == second.priv_key,
        "key should be able to be reconstructed"
    );
    let generated = tb2.generate_new_share()?;

    let mut tb3 = ctx.sdk();
    tb3.initialize(true)?;
    let store = generated
        .new_share_stores
        .get(&generated.new_share_index)
        .cloned()
        .context("generated share missing from share stores")?;
    tb3.input_share_store(store)?;
    let last = tb3.reconstruct_key()?;
    ensure!(
        first.priv_key == last.priv_key,
        "key should be able to be reconstructed after adding new share"
    );
    Ok((tb3, last.priv_key))
}

fn core_reshare_serialization(ctx: &mut ScenarioContext) -> Result<()> {
    let (tb3, secret) = reshare(ctx)?;
    let state = tb3.to_json()?;
    let mut tb4 = ctx.sdk_from_json(&state)?;
    let key = tb4.reconstruct_key()?;
    ensure!(key.priv_key == secret, "incorrect serialization");
    Ok(())
}

fn core_old_metadata(ctx: &mut ScenarioContext) -> Result<()> {
    let device = ctx.device_share()?;
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_store(device.clone())?;
    let first = tb.reconstruct_key()?;

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    // metadata moves on after tb2 has read it
    tb.generate_new_share()?;
    tb2.input_share_store(device)?;
    let key = tb2.reconstruct_key()?;
    ensure!(
        first.priv_key == key.priv_key,
        "key should be able to be reconstructed with old metadata"
    );
    ctx.expect_secret(&key.priv_key)
}

fn core_security_questions(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_store(ctx.device_share()?)?;
    let first = tb.reconstruct_key()?;
    tb.generate_security_question_share(ANSWER, QUESTION)?;

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    tb2.input_share_from_security_questions(ANSWER)?;
    let key = tb2.reconstruct_key()?;
    ensure!(
        first.priv_key == key.priv_key,
        "key should be able to be reconstructed"
    );
    ctx.expect_secret(&key.priv_key)
}

fn core_security_questions_after_refresh(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_store(ctx.device_share()?)?;
    let first = tb.reconstruct_key()?;
    tb.generate_security_question_share(ANSWER, QUESTION)?;
    tb.generate_new_share()?;

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    tb2.input_share_from_security_questions(ANSWER)?;
    let key = tb2.reconstruct_key()?;
    ensure!(
        first.priv_key == key.priv_key,
        "key should be able to be reconstructed after refresh"
    );
    Ok(())
}

fn core_seed_phrase(ctx: &mut ScenarioContext) -> Result<()> {
    let device = ctx.device_share()?;
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_store(device.clone())?;
    let first = tb.reconstruct_key()?;
    tb.set_seed_phrase(PHRASE_KIND, PHRASE)?;

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    tb2.input_share_store(device)?;
    let key = tb2.reconstruct_key()?;
    let account = account_key(PHRASE)?;
    ensure!(key.priv_key == first.priv_key, "private key differs");
    ensure!(
        key.seed_phrase_keys == vec![account],
        "seed phrase keys differ"
    );
    ensure!(
        key.all_keys == vec![first.priv_key, account],
        "all keys differ"
    );
    Ok(())
}

// ---------------- security-questions replay ----------------

fn sq_reconstruct(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_from_security_questions(ANSWER)?;
    let key = tb
        .reconstruct_key()
        .context("key should be able to be reconstructed")?;
    ctx.expect_secret(&key.priv_key)
}

/// Change the answer on one handle, reconstruct from the new answer on
/// another. Returns the second handle and its secret.
fn change_answer(
    ctx: &mut ScenarioContext,
) -> Result<(Box<dyn ThresholdSdk>, Scalar)> {
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_from_security_questions(ANSWER)?;
    let first = tb.reconstruct_key()?;
    tb.change_security_question_and_answer(NEW_ANSWER, QUESTION)?;

    let mut tb2 = ctx.sdk();
    tb2.initialize(true)?;
    tb2.input_share_from_security_questions(NEW_ANSWER)?;
    let key = tb2.reconstruct_key()?;
    ensure!(
        first.priv_key == key.priv_key,
        "key should be able to be reconstructed"
    );
    ctx.expect_secret(&key.priv_key)?;
    Ok((tb2, key.priv_key))
}

fn sq_change_answer(ctx: &mut ScenarioContext) -> Result<()> {
    change_answer(ctx).map(|_| ())
}

fn sq_change_answer_serialization(ctx: &mut ScenarioContext) -> Result<()> {
    let (tb2, secret) = change_answer(ctx)?;
    let mut tb4 = ctx.sdk_from_json(&tb2.to_json()?)?;
    let key = tb4.reconstruct_key()?;
    ensure!(key.priv_key == secret, "incorrect serialization");
    Ok(())
}

// ---------------- seedphrase replay ----------------

fn seed_get(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_store(ctx.device_share()?)?;
    let key = tb.reconstruct_key()?;
    ctx.expect_secret(&key.priv_key)?;

    let account = account_key(PHRASE)?;
    ensure!(
        key.seed_phrase_keys == vec![account],
        "seed phrase keys differ"
    );
    ensure!(
        key.all_keys == vec![key.priv_key, account],
        "all keys differ"
    );
    let phrases = tb.get_seed_phrases()?;
    ensure!(
        phrases
            .iter()
            .any(|p| p.kind == PHRASE_KIND && p.seed_phrase == PHRASE),
        "seed phrase not readable after reconstruction"
    );
    Ok(())
}

fn seed_derive_accounts(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share_store(ctx.device_share()?)?;
    tb.reconstruct_key()?;
    let derived = tb.derive_seed_phrase_accounts()?;
    ensure!(derived == vec![account_key(PHRASE)?], "key should be same");
    Ok(())
}

// ---------------- share-serialization-mnemonic replay ----------------

fn mnemonic_accept(ctx: &mut ScenarioContext) -> Result<()> {
    let mut tb = ctx.sdk();
    tb.initialize(true)?;
    tb.input_share(&ctx.serialized_share()?, ShareFormat::Mnemonic)?;
    let key = tb
        .reconstruct_key()
        .context("key should be able to be reconstructed")?;
    ctx.expect_secret(&key.priv_key)
}
