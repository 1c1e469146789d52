/// Integration tests: full message flow through the public API.
///
/// Tests cover:
///   1. Alice and Bob exchange messages through a shared in-memory directory
///   2. Recipient rotation: old envelopes fail closed, new ones open
///   3. Identity keys persisted in a FileKeyStore survive reopening the store
///   4. Backup on one device, restore on another, keep reading mail
///   5. Envelopes survive JSON transport
///
/// All tests are plain `#[test]`: no async, no network access.
use std::sync::Arc;

use quietbox::crypto::{CryptoProvider, RustCryptoProvider};
use quietbox::keys::{FileKeyStore, MemoryKeyStore, SecureKeyStore};
use quietbox::record::EncryptedMessage;
use quietbox::transport::{KeyDirectoryClient, MemoryKeyDirectory};
use quietbox::vault::PasswordVault;
use quietbox::{E2eeEngine, QuietboxError};

fn provider() -> Arc<dyn CryptoProvider> {
    Arc::new(RustCryptoProvider::new().expect("provider should initialise"))
}

/// Engine with a fast vault so backup tests stay quick.
fn engine_with_store(
    p: &Arc<dyn CryptoProvider>,
    store: Arc<dyn SecureKeyStore>,
    directory: &Arc<MemoryKeyDirectory>,
) -> E2eeEngine {
    E2eeEngine::new(p.clone(), store, directory.clone())
        .with_vault(PasswordVault::with_iterations(p.clone(), 1_000))
}

fn engine(p: &Arc<dyn CryptoProvider>, directory: &Arc<MemoryKeyDirectory>) -> E2eeEngine {
    engine_with_store(p, Arc::new(MemoryKeyStore::new()), directory)
}

// ── Test 1: Alice and Bob ──────────────────────────────────────────────────

#[test]
fn test_alice_bob_conversation() {
    let p = provider();
    let directory = Arc::new(MemoryKeyDirectory::new());
    let alice = engine(&p, &directory);
    let bob = engine(&p, &directory);

    alice.ensure_identity().expect("alice identity");
    alice.publish_identity("alice").expect("alice publish");
    bob.ensure_identity().expect("bob identity");
    bob.publish_identity("bob").expect("bob publish");

    let lines = ["hi bob", "lunch tomorrow?", "📎 see attachment"];
    for line in lines {
        let envelope = alice.encrypt_for("bob", line).expect("alice encrypts");
        assert_eq!(bob.decrypt(&envelope).expect("bob decrypts"), line);
        assert!(
            matches!(alice.decrypt(&envelope), Err(QuietboxError::Decryption)),
            "the sender must not be able to open what they sealed for bob"
        );
    }

    let e1 = bob.encrypt_for("alice", "hello").expect("bob encrypts");
    assert_eq!(alice.decrypt(&e1).expect("alice decrypts"), "hello");
    let e2 = bob.encrypt_for("alice", "hello").expect("bob encrypts again");
    assert_ne!(e1.iv, e2.iv, "every envelope gets a fresh IV");
    assert_ne!(
        e1.ephemeral_public_key, e2.ephemeral_public_key,
        "every envelope gets a fresh ephemeral key"
    );
}

// ── Test 2: Rotation ───────────────────────────────────────────────────────

#[test]
fn test_rotation_changes_latest_key() {
    let p = provider();
    let directory = Arc::new(MemoryKeyDirectory::new());
    let alice = engine(&p, &directory);
    let bob = engine(&p, &directory);
    alice.ensure_identity().expect("alice identity");

    let first = bob.rotate_identity("bob").expect("first key");
    let before = alice.encrypt_for("bob", "before").expect("encrypt");

    let second = bob.rotate_identity("bob").expect("second key");
    assert_eq!(
        directory.get_latest_key("bob").expect("latest").key_id,
        second.key_id,
        "latest must follow rotation"
    );
    assert_eq!(directory.key_count("bob"), 2);

    assert!(matches!(bob.decrypt(&before), Err(QuietboxError::Decryption)));
    assert_eq!(
        bob.cipher()
            .decrypt_with_key_id(&before, &first.key_id)
            .expect("old key still on device"),
        "before"
    );

    let after = alice.encrypt_for("bob", "after").expect("encrypt");
    assert_eq!(bob.decrypt(&after).expect("decrypt"), "after");
}

// ── Test 3: File-backed identity ───────────────────────────────────────────

#[test]
fn test_file_store_identity_survives_reopen() {
    let p = provider();
    let dir = tempfile::tempdir().expect("tempdir");
    let directory = Arc::new(MemoryKeyDirectory::new());
    let alice = engine(&p, &directory);
    alice.ensure_identity().expect("alice identity");

    let store = Arc::new(FileKeyStore::open(dir.path()).expect("open store"));
    let bob = engine_with_store(&p, store, &directory);
    let key_id = bob.ensure_identity().expect("bob identity");
    bob.publish_identity("bob").expect("publish");
    let envelope = alice.encrypt_for("bob", "persisted").expect("encrypt");
    drop(bob);

    let reopened = Arc::new(FileKeyStore::open(dir.path()).expect("reopen store"));
    let bob = engine_with_store(&p, reopened, &directory);
    assert_eq!(bob.ensure_identity().expect("identity"), key_id);
    assert_eq!(bob.decrypt(&envelope).expect("decrypt"), "persisted");
}

#[test]
fn test_sealed_file_store_round_trip() {
    let p = provider();
    let dir = tempfile::tempdir().expect("tempdir");
    let directory = Arc::new(MemoryKeyDirectory::new());
    let alice = engine(&p, &directory);
    alice.ensure_identity().expect("alice identity");

    let vault = PasswordVault::with_iterations(p.clone(), 1_000);
    let store = Arc::new(
        FileKeyStore::open_with_passphrase(dir.path(), vault.clone(), "correct horse")
            .expect("open sealed store"),
    );
    let bob = engine_with_store(&p, store, &directory);
    bob.rotate_identity("bob").expect("bob publish");
    let envelope = alice.encrypt_for("bob", "sealed at rest").expect("encrypt");
    assert_eq!(bob.decrypt(&envelope).expect("decrypt"), "sealed at rest");

    let wrong = Arc::new(
        FileKeyStore::open_with_passphrase(dir.path(), vault, "battery staple")
            .expect("open sealed store"),
    );
    let impostor = engine_with_store(&p, wrong, &directory);
    assert!(matches!(
        impostor.decrypt(&envelope),
        Err(QuietboxError::Authentication)
    ));
}

// ── Test 4: Backup and restore ─────────────────────────────────────────────

#[test]
fn test_backup_restore_on_new_device() {
    let p = provider();
    let directory = Arc::new(MemoryKeyDirectory::new());
    let alice = engine(&p, &directory);
    let bob_phone = engine(&p, &directory);
    alice.ensure_identity().expect("alice identity");
    bob_phone.rotate_identity("bob").expect("bob publish");

    let code = bob_phone.vault().generate_backup_code().expect("code");
    let backup_json = bob_phone
        .export_backup(&code)
        .expect("export")
        .to_json()
        .expect("serialize");
    let envelope = alice.encrypt_for("bob", "read me later").expect("encrypt");

    let bob_laptop = engine(&p, &directory);
    let package = quietbox::record::PasswordPackage::from_json(&backup_json).expect("parse");
    let typed = code.replace('-', " ").to_lowercase();
    bob_laptop
        .restore_backup(&package, &typed)
        .expect("restore with loosely typed code");
    assert_eq!(bob_laptop.decrypt(&envelope).expect("decrypt"), "read me later");

    let record = bob_laptop.publish_identity("bob").expect("republish");
    assert_eq!(directory.get_latest_key("bob").expect("latest").key_id, record.key_id);
}

// ── Test 5: JSON transport ─────────────────────────────────────────────────

#[test]
fn test_envelope_survives_json_transport() {
    let p = provider();
    let directory = Arc::new(MemoryKeyDirectory::new());
    let alice = engine(&p, &directory);
    let bob = engine(&p, &directory);
    alice.ensure_identity().expect("alice identity");
    bob.rotate_identity("bob").expect("bob publish");

    let wire = alice
        .encrypt_for("bob", "over the wire")
        .expect("encrypt")
        .to_json()
        .expect("serialize");
    let envelope = EncryptedMessage::from_json(&wire).expect("parse");
    assert_eq!(bob.decrypt(&envelope).expect("decrypt"), "over the wire");
}
