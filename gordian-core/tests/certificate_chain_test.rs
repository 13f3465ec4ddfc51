//! Certificate validity windows, self-signing, and chain validation.

use gordian_core::certificate::validate_chain;
use gordian_core::error::Result;
use gordian_core::{
    Certificate, EcdsaKeyPair, GordianError, GordianFactory, GordianParameters, KeyUsage,
};

// 2020-01-01, 2020-06-01, 2021-01-01 and 2022-01-01 as unix seconds
const TS_2020_01_01: u64 = 1_577_836_800;
const TS_2020_06_01: u64 = 1_590_969_600;
const TS_2021_01_01: u64 = 1_609_459_200;
const TS_2022_01_01: u64 = 1_640_995_200;

fn factory() -> GordianFactory {
    GordianFactory::new(GordianParameters::default()).unwrap()
}

/// Root -> intermediate -> leaf, all valid across 2020.
struct Chain {
    root: Certificate,
    intermediate: Certificate,
    leaf: Certificate,
}

fn build_chain(factory: &GordianFactory) -> Result<Chain> {
    let root_keys = EcdsaKeyPair::generate();
    let intermediate_keys = EcdsaKeyPair::generate();
    let leaf_keys = EcdsaKeyPair::generate();

    let root = Certificate::self_signed(
        factory,
        &root_keys,
        "root-ca",
        TS_2020_01_01,
        TS_2022_01_01,
        KeyUsage::certificate_authority(),
    )?;
    let intermediate = Certificate::issue(
        factory,
        &root,
        &root_keys,
        &intermediate_keys.public_key_bytes(),
        "intermediate-ca",
        TS_2020_01_01,
        TS_2022_01_01,
        KeyUsage::certificate_authority(),
    )?;
    let leaf = Certificate::issue(
        factory,
        &intermediate,
        &intermediate_keys,
        &leaf_keys.public_key_bytes(),
        "leaf",
        TS_2020_01_01,
        TS_2021_01_01,
        KeyUsage::signing(),
    )?;
    Ok(Chain {
        root,
        intermediate,
        leaf,
    })
}

#[test]
fn validity_window_is_inclusive() -> Result<()> {
    let factory = factory();
    let keys = EcdsaKeyPair::generate();
    let certificate = Certificate::self_signed(
        &factory,
        &keys,
        "window",
        TS_2020_01_01,
        TS_2021_01_01,
        KeyUsage::signing(),
    )?;
    assert!(certificate.is_valid_on_date(TS_2020_06_01));
    assert!(certificate.is_valid_on_date(TS_2020_01_01));
    assert!(certificate.is_valid_on_date(TS_2021_01_01));
    assert!(!certificate.is_valid_on_date(TS_2022_01_01));
    assert!(!certificate.is_valid_on_date(TS_2020_01_01 - 1));
    Ok(())
}

#[test]
fn self_signed_flag_reflects_issuer_identity() -> Result<()> {
    let factory = factory();
    let chain = build_chain(&factory)?;
    assert!(chain.root.is_self_signed());
    assert!(!chain.intermediate.is_self_signed());
    assert!(!chain.leaf.is_self_signed());
    Ok(())
}

#[test]
fn depth_three_chain_validates() -> Result<()> {
    let factory = factory();
    let chain = build_chain(&factory)?;
    let pool = vec![chain.root.clone(), chain.intermediate.clone()];

    let validated = validate_chain(
        &factory,
        &chain.leaf,
        |id| pool.iter().find(|c| c.subject() == id).cloned(),
        TS_2020_06_01,
    )?;
    assert_eq!(validated.len(), 3);
    assert_eq!(validated[0], *chain.leaf.subject());
    assert_eq!(validated[2], *chain.root.subject());
    Ok(())
}

#[test]
fn missing_intermediate_is_an_untrusted_chain() -> Result<()> {
    let factory = factory();
    let chain = build_chain(&factory)?;
    let pool = vec![chain.root.clone()]; // intermediate removed

    let result = validate_chain(
        &factory,
        &chain.leaf,
        |id| pool.iter().find(|c| c.subject() == id).cloned(),
        TS_2020_06_01,
    );
    assert!(matches!(result, Err(GordianError::UntrustedChain(_))));
    Ok(())
}

#[test]
fn expired_certificate_breaks_the_chain() -> Result<()> {
    let factory = factory();
    let chain = build_chain(&factory)?;
    let pool = vec![chain.root.clone(), chain.intermediate.clone()];

    // The leaf expired at the start of 2021.
    let result = validate_chain(
        &factory,
        &chain.leaf,
        |id| pool.iter().find(|c| c.subject() == id).cloned(),
        TS_2022_01_01 - 1_000_000,
    );
    assert!(matches!(result, Err(GordianError::UntrustedChain(_))));
    Ok(())
}

#[test]
fn forged_issuer_signature_is_untrusted() -> Result<()> {
    let factory = factory();
    let chain = build_chain(&factory)?;

    // Re-issue the intermediate under an unrelated key but keep the root
    // name, then present it as the resolver's answer.
    let rogue_keys = EcdsaKeyPair::generate();
    let rogue_root = Certificate::self_signed(
        &factory,
        &rogue_keys,
        "root-ca",
        TS_2020_01_01,
        TS_2022_01_01,
        KeyUsage::certificate_authority(),
    )?;
    let pool = vec![rogue_root, chain.intermediate.clone()];

    let result = validate_chain(
        &factory,
        &chain.leaf,
        |id| {
            pool.iter()
                .find(|c| c.subject().name == id.name)
                .cloned()
        },
        TS_2020_06_01,
    );
    assert!(matches!(result, Err(GordianError::UntrustedChain(_))));
    Ok(())
}

#[test]
fn encoded_form_preserves_validity_semantics() -> Result<()> {
    let factory = factory();
    let chain = build_chain(&factory)?;
    let encoded = chain.leaf.to_encoded()?;
    let reloaded = Certificate::from_encoded(&factory, &encoded)?;
    assert_eq!(reloaded, chain.leaf);
    assert!(reloaded.is_valid_on_date(TS_2020_06_01));
    assert!(!reloaded.is_self_signed());
    Ok(())
}
