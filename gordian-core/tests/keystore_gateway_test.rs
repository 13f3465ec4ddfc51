//! Keystore gateway: protected entries, MAC secrets, CRM wrapping, and
//! the persisted control-key row.

use std::sync::Arc;

use zeroize::Zeroizing;

use gordian_common::logging::{Component, Logger};
use gordian_core::error::Result;
use gordian_core::{
    Certificate, ControlKeyRecord, EcdsaKeyPair, GordianError, GordianFactory, GordianKeyLength,
    GordianParameters, KeyPairSpec, KeyStore, KeyStoreGateway, KeyUsage, SymCipherAlgorithm,
    SymCipherSpec,
};

const NOT_BEFORE: u64 = 1_577_836_800;
const NOT_AFTER: u64 = 1_893_456_000;
const DATE_IN_WINDOW: u64 = 1_700_000_000;

fn test_logger() -> Arc<Logger> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(Logger::new_root(Component::KeyStore, "test-store"))
}

fn test_factory() -> GordianFactory {
    // Cheap lock iterations keep the tests fast.
    let params = GordianParameters::new(GordianKeyLength::Len256, 3, 1_000).unwrap();
    GordianFactory::new(params).unwrap()
}

fn fixed_password(expected: &'static [u8]) -> impl Fn(&str) -> Result<Zeroizing<Vec<u8>>> {
    move |_entry: &str| Ok(Zeroizing::new(expected.to_vec()))
}

fn signing_identity(factory: &GordianFactory, name: &str) -> Result<(Certificate, EcdsaKeyPair)> {
    let keys = EcdsaKeyPair::generate();
    let mut usage = KeyUsage::certificate_authority();
    usage.encryption = true;
    let certificate =
        Certificate::self_signed(factory, &keys, name, NOT_BEFORE, NOT_AFTER, usage)?;
    Ok((certificate, keys))
}

#[test]
fn default_signer_signs_and_certificate_verifies() -> Result<()> {
    let factory = test_factory();
    let mut gateway = KeyStoreGateway::new(factory.clone(), test_logger());
    let (certificate, keys) = signing_identity(&factory, "signer")?;
    gateway.insert_key_pair("signer", certificate.clone(), &keys, b"pass-1")?;
    gateway.set_default_signer("signer")?;

    let signature = gateway.sign(b"outgoing message", &fixed_password(b"pass-1"))?;
    let verifier = factory.new_signer(KeyPairSpec::EcdsaP256)?;
    verifier.verify(certificate.public_key(), b"outgoing message", &signature)?;
    Ok(())
}

#[test]
fn wrong_password_on_unlock_is_authentication() -> Result<()> {
    let factory = test_factory();
    let mut gateway = KeyStoreGateway::new(factory.clone(), test_logger());
    let (certificate, keys) = signing_identity(&factory, "signer")?;
    gateway.insert_key_pair("signer", certificate, &keys, b"pass-1")?;
    gateway.set_default_signer("signer")?;

    let result = gateway.sign(b"message", &fixed_password(b"wrong"));
    assert!(matches!(result, Err(GordianError::Authentication(_))));
    Ok(())
}

#[test]
fn mac_secrets_are_deterministic_and_per_name() -> Result<()> {
    let factory = test_factory();
    let gateway = KeyStoreGateway::new(factory, test_logger());
    let alice_1 = gateway.mac_secret("alice")?;
    let alice_2 = gateway.mac_secret("alice")?;
    let bob = gateway.mac_secret("bob")?;
    assert_eq!(alice_1.as_ref(), alice_2.as_ref());
    assert_ne!(alice_1.as_ref(), bob.as_ref());
    Ok(())
}

#[test]
fn mac_secrets_differ_across_stores() -> Result<()> {
    let factory = test_factory();
    let first = KeyStoreGateway::new(factory.clone(), test_logger());
    let second = KeyStoreGateway::new(factory, test_logger());
    assert_ne!(
        first.mac_secret("alice")?.as_ref(),
        second.mac_secret("alice")?.as_ref()
    );
    Ok(())
}

#[test]
fn crm_round_trip_through_the_target() -> Result<()> {
    let factory = test_factory();
    let mut gateway = KeyStoreGateway::new(factory.clone(), test_logger());
    let (certificate, keys) = signing_identity(&factory, "recipient")?;
    gateway.insert_key_pair("recipient", certificate, &keys, b"pass-2")?;
    gateway.set_target("recipient")?;

    assert_eq!(gateway.target()?.subject().name, "recipient");

    let encrypted = gateway.encrypt_crm(b"certificate request body")?;
    assert_ne!(encrypted, b"certificate request body");
    let decrypted = gateway.decrypt_crm("recipient", &encrypted, &fixed_password(b"pass-2"))?;
    assert_eq!(decrypted, b"certificate request body");
    Ok(())
}

#[test]
fn secret_key_entries_round_trip() -> Result<()> {
    let factory = test_factory();
    let mut gateway = KeyStoreGateway::new(factory, test_logger());
    gateway.insert_secret_key("vault", b"opaque secret bytes", b"pass-3")?;

    let revealed = gateway.secret_key("vault", &fixed_password(b"pass-3"))?;
    assert_eq!(revealed.as_slice(), b"opaque secret bytes");

    assert!(matches!(
        gateway.secret_key("vault", &fixed_password(b"nope")),
        Err(GordianError::Authentication(_))
    ));
    assert!(matches!(
        gateway.secret_key("missing", &fixed_password(b"pass-3")),
        Err(GordianError::NotFound(_))
    ));
    Ok(())
}

#[test]
fn entry_chain_validates_against_the_store() -> Result<()> {
    let factory = test_factory();
    let mut gateway = KeyStoreGateway::new(factory.clone(), test_logger());

    let (root_cert, root_keys) = signing_identity(&factory, "root-ca")?;
    let leaf_keys = EcdsaKeyPair::generate();
    let leaf_cert = Certificate::issue(
        &factory,
        &root_cert,
        &root_keys,
        &leaf_keys.public_key_bytes(),
        "leaf",
        NOT_BEFORE,
        NOT_AFTER,
        KeyUsage::signing(),
    )?;

    gateway.insert_trusted_certificate("root-ca", root_cert);
    gateway.insert_key_pair("leaf", leaf_cert, &leaf_keys, b"pass-4")?;

    let chain = gateway.validate_entry_chain("leaf", DATE_IN_WINDOW)?;
    assert_eq!(chain.len(), 2);

    // Removing the root breaks the chain.
    let mut store = gateway.store().clone();
    store.remove_entry("root-ca");
    let orphan = KeyStoreGateway::from_parts(
        factory,
        store,
        Zeroizing::new([0u8; 32]),
        test_logger(),
    );
    assert!(matches!(
        orphan.validate_entry_chain("leaf", DATE_IN_WINDOW),
        Err(GordianError::UntrustedChain(_))
    ));
    Ok(())
}

#[test]
fn keystore_bytes_round_trip() -> Result<()> {
    let factory = test_factory();
    let mut gateway = KeyStoreGateway::new(factory.clone(), test_logger());
    let (certificate, keys) = signing_identity(&factory, "persisted")?;
    gateway.insert_key_pair("persisted", certificate.clone(), &keys, b"pass-5")?;

    let bytes = gateway.store().to_bytes()?;
    let reloaded = KeyStore::from_bytes(&bytes)?;
    assert_eq!(reloaded.len(), 1);
    let found = reloaded
        .find_certificate(certificate.subject())
        .expect("certificate survives persistence");
    assert_eq!(found, certificate);

    assert!(matches!(
        KeyStore::from_bytes(b"not a keystore"),
        Err(GordianError::Format(_))
    ));
    Ok(())
}

#[test]
fn control_key_record_round_trips_with_obfuscated_type() -> Result<()> {
    let factory = test_factory();
    let spec = SymCipherSpec::new(SymCipherAlgorithm::Aes, GordianKeyLength::Len256);
    let record = ControlKeyRecord::new(
        &factory,
        7,
        spec,
        b"hash".to_vec(),
        b"public".to_vec(),
        b"private".to_vec(),
    )?;
    // The persisted column must not be the spec's ordinal.
    assert_ne!(record.external_type_id, 1);

    let bytes = record.to_bytes()?;
    let reloaded = ControlKeyRecord::from_bytes(&bytes)?;
    assert_eq!(reloaded, record);
    assert_eq!(reloaded.id, 7);
    assert_eq!(reloaded.cipher_spec(&factory)?, spec);
    Ok(())
}
