//! Certificate model and chain validation.
//!
//! Certificates here are a self-contained canonical encoding rather than
//! X.509: a bincode-serialized signed body carrying subject, issuer,
//! public key, validity window and usage flags, plus the issuer's ECDSA
//! signature over the body bytes. Everything needed for
//! [`Certificate::is_valid_on_date`] and [`Certificate::is_self_signed`]
//! is recoverable from the encoded form alone.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{GordianError, Result};
use crate::factory::GordianFactory;
use crate::idspec::{DigestSpec, IdSpec, KeyPairSpec};
use crate::primitives::{DigestEngine, EcdsaKeyPair};

/// Maximum number of certificates walked during chain validation
const MAX_CHAIN_DEPTH: usize = 10;

/// Identity of a certificate holder: a display name plus the hex SHA-256
/// fingerprint of the subject public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateId {
    pub name: String,
    pub key_fingerprint: String,
}

impl CertificateId {
    pub fn new(name: impl Into<String>, public_key: &[u8]) -> Self {
        Self {
            name: name.into(),
            key_fingerprint: hex::encode(DigestEngine::digest(DigestSpec::Sha256, public_key)),
        }
    }
}

/// Usage flags carried by a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub signing: bool,
    pub encryption: bool,
    pub cert_signing: bool,
}

impl KeyUsage {
    pub fn signing() -> Self {
        Self {
            signing: true,
            encryption: false,
            cert_signing: false,
        }
    }

    pub fn encryption() -> Self {
        Self {
            signing: false,
            encryption: true,
            cert_signing: false,
        }
    }

    pub fn certificate_authority() -> Self {
        Self {
            signing: true,
            encryption: false,
            cert_signing: true,
        }
    }
}

/// The signed portion of a certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CertificateBody {
    subject: CertificateId,
    issuer: CertificateId,
    /// Uncompressed SEC1 public key of the subject
    public_key: Vec<u8>,
    /// Obfuscated external id of the key-pair spec (adjustment = serial
    /// truncated to 32 bits), so the persisted form does not carry a raw
    /// algorithm ordinal
    key_algorithm_id: i32,
    serial: u64,
    not_before: u64,
    not_after: u64,
    usage: KeyUsage,
}

/// An issued identity binding. Immutable once issued; changing any field
/// requires issuing a new certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    body: CertificateBody,
    /// DER-encoded ECDSA signature over the bincode body bytes
    signature: Vec<u8>,
}

impl Certificate {
    /// Create a self-signed certificate (issuer identity == subject
    /// identity), typically a trust root.
    pub fn self_signed(
        factory: &GordianFactory,
        key_pair: &EcdsaKeyPair,
        name: &str,
        not_before: u64,
        not_after: u64,
        usage: KeyUsage,
    ) -> Result<Certificate> {
        let public_key = key_pair.public_key_bytes();
        let id = CertificateId::new(name, &public_key);
        Self::build(
            factory,
            key_pair,
            id.clone(),
            id,
            public_key,
            not_before,
            not_after,
            usage,
        )
    }

    /// Issue a certificate for a subject public key, signed by an issuer
    /// key pair that must match the issuer certificate and carry the
    /// cert-signing usage.
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        factory: &GordianFactory,
        issuer_certificate: &Certificate,
        issuer_key_pair: &EcdsaKeyPair,
        subject_public_key: &[u8],
        subject_name: &str,
        not_before: u64,
        not_after: u64,
        usage: KeyUsage,
    ) -> Result<Certificate> {
        if !issuer_certificate.usage().cert_signing {
            return Err(GordianError::Logic(format!(
                "issuer {} lacks the cert-signing usage",
                issuer_certificate.subject().name
            )));
        }
        if issuer_key_pair.public_key_bytes() != issuer_certificate.public_key() {
            return Err(GordianError::Logic(
                "issuer key pair does not match the issuer certificate".to_string(),
            ));
        }
        Self::build(
            factory,
            issuer_key_pair,
            CertificateId::new(subject_name, subject_public_key),
            issuer_certificate.subject().clone(),
            subject_public_key.to_vec(),
            not_before,
            not_after,
            usage,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        factory: &GordianFactory,
        signing_key_pair: &EcdsaKeyPair,
        subject: CertificateId,
        issuer: CertificateId,
        public_key: Vec<u8>,
        not_before: u64,
        not_after: u64,
        usage: KeyUsage,
    ) -> Result<Certificate> {
        if not_after < not_before {
            return Err(GordianError::Logic(format!(
                "validity window ends ({not_after}) before it starts ({not_before})"
            )));
        }
        let serial = rand::rngs::OsRng.next_u64();
        let key_algorithm_id = factory.obfuscater().external_id_with_adjustment(
            &IdSpec::KeyPair(KeyPairSpec::EcdsaP256),
            serial as i32,
        )?;
        let body = CertificateBody {
            subject,
            issuer,
            public_key,
            key_algorithm_id,
            serial,
            not_before,
            not_after,
            usage,
        };
        let body_bytes = encode_body(&body)?;
        let signer = factory.new_signer(KeyPairSpec::EcdsaP256)?;
        let signature = signer.sign(signing_key_pair, &body_bytes)?;
        Ok(Certificate { body, signature })
    }

    /// Canonical persisted byte form.
    pub fn to_encoded(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| GordianError::Format(format!("certificate encoding failed: {e}")))
    }

    /// Reconstruct from the canonical form, checking the internal
    /// consistency that does not need external context.
    pub fn from_encoded(factory: &GordianFactory, encoded: &[u8]) -> Result<Certificate> {
        let certificate: Certificate = bincode::deserialize(encoded)
            .map_err(|e| GordianError::Format(format!("certificate decoding failed: {e}")))?;
        // The persisted algorithm id must still resolve for this serial.
        certificate.key_pair_spec(factory).map_err(|_| {
            GordianError::Format("certificate carries an unresolvable algorithm id".to_string())
        })?;
        let expected = CertificateId::new(
            certificate.body.subject.name.clone(),
            &certificate.body.public_key,
        );
        if expected.key_fingerprint != certificate.body.subject.key_fingerprint {
            return Err(GordianError::Format(
                "certificate subject fingerprint does not match its public key".to_string(),
            ));
        }
        Ok(certificate)
    }

    /// Resolve the obfuscated key-algorithm id back to a spec.
    pub fn key_pair_spec(&self, factory: &GordianFactory) -> Result<KeyPairSpec> {
        match factory
            .obfuscater()
            .spec_from_external_id_with_adjustment(self.body.key_algorithm_id, self.body.serial as i32)
        {
            Ok(IdSpec::KeyPair(spec)) => Ok(spec),
            Ok(other) => Err(GordianError::Logic(format!(
                "certificate algorithm id resolves to {other:?}"
            ))),
            Err(e) => Err(e),
        }
    }

    pub fn subject(&self) -> &CertificateId {
        &self.body.subject
    }

    pub fn issuer(&self) -> &CertificateId {
        &self.body.issuer
    }

    pub fn public_key(&self) -> &[u8] {
        &self.body.public_key
    }

    pub fn serial(&self) -> u64 {
        self.body.serial
    }

    pub fn usage(&self) -> KeyUsage {
        self.body.usage
    }

    pub fn not_before(&self) -> u64 {
        self.body.not_before
    }

    pub fn not_after(&self) -> u64 {
        self.body.not_after
    }

    /// True iff `not_before <= date <= not_after` (unix seconds).
    pub fn is_valid_on_date(&self, date: u64) -> bool {
        self.body.not_before <= date && date <= self.body.not_after
    }

    /// True iff issuer identity equals subject identity.
    pub fn is_self_signed(&self) -> bool {
        self.body.issuer == self.body.subject
    }

    /// Verify that `issuer_public_key` signs this certificate's body.
    pub fn verify_signed_by(&self, factory: &GordianFactory, issuer_public_key: &[u8]) -> Result<()> {
        let body_bytes = encode_body(&self.body)?;
        let signer = factory.new_signer(KeyPairSpec::EcdsaP256)?;
        signer.verify(issuer_public_key, &body_bytes, &self.signature)
    }
}

fn encode_body(body: &CertificateBody) -> Result<Vec<u8>> {
    bincode::serialize(body)
        .map_err(|e| GordianError::Format(format!("certificate body encoding failed: {e}")))
}

/// Walk issuer links from `leaf` to a self-signed root, verifying dates
/// and signatures at every step. `resolve` looks an issuer up in the
/// caller's store (the trust anchor set); any failure mode surfaces as
/// `UntrustedChain`.
///
/// Returns the subject ids of the validated chain, leaf first.
pub fn validate_chain(
    factory: &GordianFactory,
    leaf: &Certificate,
    resolve: impl Fn(&CertificateId) -> Option<Certificate>,
    date: u64,
) -> Result<Vec<CertificateId>> {
    let mut chain = Vec::new();
    let mut current = leaf.clone();
    for _ in 0..MAX_CHAIN_DEPTH {
        if !current.is_valid_on_date(date) {
            return Err(GordianError::UntrustedChain(format!(
                "certificate {} is not valid on the reference date",
                current.subject().name
            )));
        }
        chain.push(current.subject().clone());
        if current.is_self_signed() {
            current
                .verify_signed_by(factory, current.public_key())
                .map_err(|_| {
                    GordianError::UntrustedChain(format!(
                        "self-signed root {} fails its own signature check",
                        current.subject().name
                    ))
                })?;
            return Ok(chain);
        }
        let issuer = resolve(current.issuer()).ok_or_else(|| {
            GordianError::UntrustedChain(format!(
                "issuer {} of {} is not present in the store",
                current.issuer().name,
                current.subject().name
            ))
        })?;
        if !issuer.usage().cert_signing {
            return Err(GordianError::UntrustedChain(format!(
                "issuer {} lacks the cert-signing usage",
                issuer.subject().name
            )));
        }
        current
            .verify_signed_by(factory, issuer.public_key())
            .map_err(|_| {
                GordianError::UntrustedChain(format!(
                    "signature of {} by {} does not verify",
                    current.subject().name,
                    issuer.subject().name
                ))
            })?;
        current = issuer;
    }
    Err(GordianError::UntrustedChain(format!(
        "chain exceeds the maximum depth of {MAX_CHAIN_DEPTH}"
    )))
}
