//! Integration tests for the composite keyset encryption unit.

use gordian_core::error::Result;
use gordian_core::{
    GordianError, GordianFactory, GordianKeyLength, GordianParameters, KeySet, SymCipherAlgorithm,
    SymCipherSpec,
};

fn default_factory() -> GordianFactory {
    GordianFactory::new(GordianParameters::default()).expect("factory builds")
}

#[test]
fn decrypt_inverts_encrypt_for_assorted_payloads() -> Result<()> {
    let factory = default_factory();
    let keyset = KeySet::new(&factory, b"integration secret")?;

    let large: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
    let payloads: [&[u8]; 4] = [b"", b"x", b"a modest payload", &large];
    for payload in payloads {
        let blob = keyset.encrypt_bytes(payload)?;
        assert_eq!(keyset.decrypt_bytes(&blob)?, payload);
    }
    Ok(())
}

#[test]
fn repeated_encryption_of_identical_payload_differs() -> Result<()> {
    let factory = default_factory();
    let keyset = KeySet::new(&factory, b"integration secret")?;
    let first = keyset.encrypt_bytes(b"identical payload")?;
    let second = keyset.encrypt_bytes(b"identical payload")?;
    assert_ne!(first, second, "nonces must be fresh per call");
    Ok(())
}

#[test]
fn sibling_keyset_with_same_secret_decrypts() -> Result<()> {
    let factory = default_factory();
    let writer = KeySet::new(&factory, b"shared secret")?;
    let reader = KeySet::new(&factory, b"shared secret")?;
    let blob = writer.encrypt_bytes(b"cross-instance payload")?;
    assert_eq!(reader.decrypt_bytes(&blob)?, b"cross-instance payload");
    Ok(())
}

#[test]
fn keyset_with_wrong_secret_fails_integrity() -> Result<()> {
    let factory = default_factory();
    let writer = KeySet::new(&factory, b"right secret")?;
    let reader = KeySet::new(&factory, b"wrong secret")?;
    let blob = writer.encrypt_bytes(b"payload")?;
    assert!(matches!(
        reader.decrypt_bytes(&blob),
        Err(GordianError::DataIntegrity(_))
    ));
    Ok(())
}

#[test]
fn every_single_bit_flip_is_a_data_integrity_error() -> Result<()> {
    let factory = default_factory();
    let keyset = KeySet::new(&factory, b"bit flip secret")?;
    let blob = keyset.encrypt_bytes(b"payload under test")?;

    for byte_index in 0..blob.len() {
        for bit in 0..8 {
            let mut tampered = blob.clone();
            tampered[byte_index] ^= 1 << bit;
            match keyset.decrypt_bytes(&tampered) {
                Err(GordianError::DataIntegrity(_)) => {}
                Err(other) => panic!(
                    "flip at byte {byte_index} bit {bit} gave {other:?}, expected DataIntegrity"
                ),
                Ok(_) => panic!("flip at byte {byte_index} bit {bit} decrypted successfully"),
            }
        }
    }
    Ok(())
}

#[test]
fn explicit_spec_sequence_is_honoured_in_order() -> Result<()> {
    let factory = default_factory();
    let specs = vec![
        SymCipherSpec::new(SymCipherAlgorithm::XChaCha20, GordianKeyLength::Len256),
        SymCipherSpec::new(SymCipherAlgorithm::Aes, GordianKeyLength::Len256),
    ];
    let keyset = KeySet::with_specs(&factory, b"custom sequence", specs.clone())?;
    assert_eq!(keyset.cipher_specs(), specs.as_slice());

    let blob = keyset.encrypt_bytes(b"ordered payload")?;
    assert_eq!(keyset.decrypt_bytes(&blob)?, b"ordered payload");

    // A sibling with the same secret but no knowledge of the sequence
    // still decrypts, because the sequence rides in the header.
    let sibling = KeySet::new(&factory, b"custom sequence")?;
    assert_eq!(sibling.decrypt_bytes(&blob)?, b"ordered payload");
    Ok(())
}

#[test]
fn mac_only_signature_round_trip() -> Result<()> {
    let factory = default_factory();
    let keyset = KeySet::new(&factory, b"signing secret")?;
    let signature = keyset.sign_bytes(b"integrity only")?;
    keyset.verify_signature(b"integrity only", &signature)?;

    assert!(matches!(
        keyset.verify_signature(b"integrity onlx", &signature),
        Err(GordianError::DataIntegrity(_))
    ));

    let mut tampered = signature.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x80;
    assert!(matches!(
        keyset.verify_signature(b"integrity only", &tampered),
        Err(GordianError::DataIntegrity(_))
    ));
    Ok(())
}

#[test]
fn profile_tier_restricts_keyset_specs() {
    let params = GordianParameters::new(GordianKeyLength::Len128, 2, 1_000).unwrap();
    let factory = GordianFactory::new(params).unwrap();
    let too_strong = vec![SymCipherSpec::new(
        SymCipherAlgorithm::Aes,
        GordianKeyLength::Len256,
    )];
    assert!(matches!(
        KeySet::with_specs(&factory, b"secret", too_strong),
        Err(GordianError::UnsupportedAlgorithm(_))
    ));

    // The default sequence under the lower tier still works end to end.
    let keyset = KeySet::new(&factory, b"secret").unwrap();
    let blob = keyset.encrypt_bytes(b"tiered payload").unwrap();
    assert_eq!(keyset.decrypt_bytes(&blob).unwrap(), b"tiered payload");
}
