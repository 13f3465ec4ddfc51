//! Concrete primitive engines handed out by the factory.
//!
//! Every engine is a thin tagged dispatcher over the provider crates
//! (AES-GCM, ChaCha20-Poly1305, SHA-2, HMAC, ECDSA P-256). Nothing in
//! this crate constructs a provider type directly; construction always
//! goes through [`crate::factory::GordianFactory`], which is the single
//! seam for provider substitution.

use aes_gcm::aead::{Aead, KeyInit, Nonce, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::error::{GordianError, Result};
use crate::idspec::{DigestSpec, KeyPairSpec, MacSpec, SymCipherAlgorithm, SymCipherSpec};

/// Opaque symmetric key material tagged with its spec.
///
/// Deliberately not `Clone`: ownership stays with whichever component
/// generated or imported the key. Moving material between specs is an
/// explicit [`SymmetricKey::translate`].
pub struct SymmetricKey {
    spec: SymCipherSpec,
    material: Zeroizing<Vec<u8>>,
}

impl SymmetricKey {
    pub fn new(spec: SymCipherSpec, material: Zeroizing<Vec<u8>>) -> Result<Self> {
        if material.len() != spec.key_len() {
            return Err(GordianError::Logic(format!(
                "key material is {} bytes, spec {:?} needs {}",
                material.len(),
                spec,
                spec.key_len()
            )));
        }
        Ok(Self { spec, material })
    }

    pub fn spec(&self) -> SymCipherSpec {
        self.spec
    }

    pub(crate) fn material(&self) -> &[u8] {
        &self.material
    }

    /// Explicitly re-tag this key for a length-compatible spec.
    pub fn translate(&self, spec: SymCipherSpec) -> Result<SymmetricKey> {
        if !spec.is_valid() {
            return Err(GordianError::Logic(format!("invalid target spec {spec:?}")));
        }
        if spec.key_len() != self.spec.key_len() {
            return Err(GordianError::Logic(format!(
                "cannot translate {:?} key to {:?}: key lengths differ",
                self.spec, spec
            )));
        }
        Ok(SymmetricKey {
            spec,
            material: self.material.clone(),
        })
    }
}

/// Generates fresh symmetric keys for one spec.
pub struct KeyGenerator {
    spec: SymCipherSpec,
}

impl KeyGenerator {
    pub(crate) fn new(spec: SymCipherSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> SymCipherSpec {
        self.spec
    }

    pub fn generate(&self) -> Result<SymmetricKey> {
        let mut material = Zeroizing::new(vec![0u8; self.spec.key_len()]);
        OsRng.fill_bytes(&mut material);
        SymmetricKey::new(self.spec, material)
    }
}

/// AEAD cipher engine for one symmetric spec.
pub struct SymCipher {
    spec: SymCipherSpec,
}

impl SymCipher {
    pub(crate) fn new(spec: SymCipherSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> SymCipherSpec {
        self.spec
    }

    /// Encrypt with a fresh random nonce; returns `(nonce, ciphertext)`.
    pub fn seal(&self, key: &SymmetricKey, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        self.check_key(key)?;
        let mut nonce = vec![0u8; self.spec.nonce_len()];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = match (self.spec.algorithm, self.spec.key_len()) {
            (SymCipherAlgorithm::Aes, 16) => aead_seal::<Aes128Gcm>(key.material(), &nonce, plaintext)?,
            (SymCipherAlgorithm::Aes, 32) => aead_seal::<Aes256Gcm>(key.material(), &nonce, plaintext)?,
            (SymCipherAlgorithm::ChaCha20, _) => {
                aead_seal::<ChaCha20Poly1305>(key.material(), &nonce, plaintext)?
            }
            (SymCipherAlgorithm::XChaCha20, _) => {
                aead_seal::<XChaCha20Poly1305>(key.material(), &nonce, plaintext)?
            }
            (algorithm, len) => {
                return Err(GordianError::Logic(format!(
                    "no cipher for {algorithm:?} with {len}-byte key"
                )))
            }
        };
        Ok((nonce, ciphertext))
    }

    /// Decrypt; an AEAD tag failure is a data-integrity error.
    pub fn open(&self, key: &SymmetricKey, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_key(key)?;
        if nonce.len() != self.spec.nonce_len() {
            return Err(GordianError::Format(format!(
                "nonce is {} bytes, spec {:?} needs {}",
                nonce.len(),
                self.spec,
                self.spec.nonce_len()
            )));
        }
        match (self.spec.algorithm, self.spec.key_len()) {
            (SymCipherAlgorithm::Aes, 16) => aead_open::<Aes128Gcm>(key.material(), nonce, ciphertext),
            (SymCipherAlgorithm::Aes, 32) => aead_open::<Aes256Gcm>(key.material(), nonce, ciphertext),
            (SymCipherAlgorithm::ChaCha20, _) => {
                aead_open::<ChaCha20Poly1305>(key.material(), nonce, ciphertext)
            }
            (SymCipherAlgorithm::XChaCha20, _) => {
                aead_open::<XChaCha20Poly1305>(key.material(), nonce, ciphertext)
            }
            (algorithm, len) => Err(GordianError::Logic(format!(
                "no cipher for {algorithm:?} with {len}-byte key"
            ))),
        }
    }

    fn check_key(&self, key: &SymmetricKey) -> Result<()> {
        if key.spec() != self.spec {
            return Err(GordianError::Logic(format!(
                "key spec {:?} does not match cipher spec {:?}",
                key.spec(),
                self.spec
            )));
        }
        Ok(())
    }
}

fn aead_seal<A: Aead + KeyInit>(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = A::new_from_slice(key)
        .map_err(|e| GordianError::Logic(format!("cipher init failed: {e}")))?;
    cipher
        .encrypt(Nonce::<A>::from_slice(nonce), plaintext)
        .map_err(|e| GordianError::Logic(format!("encryption failed: {e}")))
}

fn aead_open<A: Aead + KeyInit>(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = A::new_from_slice(key)
        .map_err(|e| GordianError::Logic(format!("cipher init failed: {e}")))?;
    cipher
        .decrypt(Nonce::<A>::from_slice(nonce), ciphertext)
        .map_err(|_| GordianError::DataIntegrity("AEAD tag verification failed".to_string()))
}

enum DigestState {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

/// Streaming digest engine.
pub struct DigestEngine {
    spec: DigestSpec,
    state: DigestState,
}

impl DigestEngine {
    pub(crate) fn new(spec: DigestSpec) -> Self {
        let state = match spec {
            DigestSpec::Sha256 => DigestState::Sha256(Sha256::new()),
            DigestSpec::Sha384 => DigestState::Sha384(Sha384::new()),
            DigestSpec::Sha512 => DigestState::Sha512(Sha512::new()),
        };
        Self { spec, state }
    }

    pub fn spec(&self) -> DigestSpec {
        self.spec
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            DigestState::Sha256(h) => h.update(data),
            DigestState::Sha384(h) => h.update(data),
            DigestState::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self.state {
            DigestState::Sha256(h) => h.finalize().to_vec(),
            DigestState::Sha384(h) => h.finalize().to_vec(),
            DigestState::Sha512(h) => h.finalize().to_vec(),
        }
    }

    /// One-shot convenience
    pub fn digest(spec: DigestSpec, data: &[u8]) -> Vec<u8> {
        let mut engine = Self::new(spec);
        engine.update(data);
        engine.finalize()
    }
}

/// HMAC engine for one MAC spec.
pub struct MacEngine {
    spec: MacSpec,
}

impl MacEngine {
    pub(crate) fn new(spec: MacSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> MacSpec {
        self.spec
    }

    pub fn compute(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self.spec {
            MacSpec::HmacSha256 => hmac_compute::<Sha256>(key, data),
            MacSpec::HmacSha384 => hmac_compute::<Sha384>(key, data),
            MacSpec::HmacSha512 => hmac_compute::<Sha512>(key, data),
        }
    }

    /// Constant-time tag verification; mismatch is a data-integrity error.
    pub fn verify(&self, key: &[u8], data: &[u8], tag: &[u8]) -> Result<()> {
        match self.spec {
            MacSpec::HmacSha256 => hmac_verify::<Sha256>(key, data, tag),
            MacSpec::HmacSha384 => hmac_verify::<Sha384>(key, data, tag),
            MacSpec::HmacSha512 => hmac_verify::<Sha512>(key, data, tag),
        }
    }
}

fn hmac_compute<D>(key: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    Hmac<D>: Mac + KeyInit,
    D: Digest + hmac::digest::core_api::CoreProxy,
    D::Core: hmac::digest::HashMarker
        + hmac::digest::core_api::UpdateCore
        + hmac::digest::core_api::FixedOutputCore
        + hmac::digest::core_api::BufferKindUser<BufferKind = hmac::digest::block_buffer::Eager>
        + Default
        + Clone,
    <D::Core as hmac::digest::core_api::BlockSizeUser>::BlockSize:
        hmac::digest::typenum::IsLess<hmac::digest::consts::U256>,
    hmac::digest::typenum::Le<
        <D::Core as hmac::digest::core_api::BlockSizeUser>::BlockSize,
        hmac::digest::consts::U256,
    >: hmac::digest::typenum::NonZero,
{
    let mut mac = <Hmac<D> as Mac>::new_from_slice(key)
        .map_err(|e| GordianError::Logic(format!("HMAC init failed: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hmac_verify<D>(key: &[u8], data: &[u8], tag: &[u8]) -> Result<()>
where
    Hmac<D>: Mac + KeyInit,
    D: Digest + hmac::digest::core_api::CoreProxy,
    D::Core: hmac::digest::HashMarker
        + hmac::digest::core_api::UpdateCore
        + hmac::digest::core_api::FixedOutputCore
        + hmac::digest::core_api::BufferKindUser<BufferKind = hmac::digest::block_buffer::Eager>
        + Default
        + Clone,
    <D::Core as hmac::digest::core_api::BlockSizeUser>::BlockSize:
        hmac::digest::typenum::IsLess<hmac::digest::consts::U256>,
    hmac::digest::typenum::Le<
        <D::Core as hmac::digest::core_api::BlockSizeUser>::BlockSize,
        hmac::digest::consts::U256,
    >: hmac::digest::typenum::NonZero,
{
    let mut mac = <Hmac<D> as Mac>::new_from_slice(key)
        .map_err(|e| GordianError::Logic(format!("HMAC init failed: {e}")))?;
    mac.update(data);
    mac.verify_slice(tag)
        .map_err(|_| GordianError::DataIntegrity("MAC verification failed".to_string()))
}

/// ECDSA P-256 key pair for signing and key-agreement operations
#[derive(Debug, Clone)]
pub struct EcdsaKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl EcdsaKeyPair {
    /// Generate a new ECDSA P-256 key pair
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create from existing signing key
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Restore from PKCS#8 DER private key bytes
    pub fn from_private_key_der(der: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_pkcs8_der(der)
            .map_err(|e| GordianError::Format(format!("PKCS#8 decoding error: {e}")))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Get public key as raw bytes (uncompressed SEC1 point)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.verifying_key
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Get private key in PKCS#8 DER format
    pub fn private_key_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.signing_key
            .to_pkcs8_der()
            .map(|der| Zeroizing::new(der.as_bytes().to_vec()))
            .map_err(|e| GordianError::Format(format!("PKCS#8 encoding error: {e}")))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl Serialize for EcdsaKeyPair {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let private_key_der = self.private_key_der().map_err(|e| {
            serde::ser::Error::custom(format!("Failed to serialize private key: {e}"))
        })?;
        private_key_der.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EcdsaKeyPair {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let private_key_der: Vec<u8> = Vec::deserialize(deserializer)?;
        Self::from_private_key_der(&private_key_der).map_err(|e| {
            serde::de::Error::custom(format!("Failed to deserialize private key: {e}"))
        })
    }
}

/// Signature engine for one key-pair spec.
pub struct SignatureEngine {
    spec: KeyPairSpec,
}

impl SignatureEngine {
    pub(crate) fn new(spec: KeyPairSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> KeyPairSpec {
        self.spec
    }

    pub fn generate_key_pair(&self) -> EcdsaKeyPair {
        EcdsaKeyPair::generate()
    }

    /// Sign a message, returning a DER-encoded ECDSA signature.
    pub fn sign(&self, key_pair: &EcdsaKeyPair, message: &[u8]) -> Result<Vec<u8>> {
        let signature: Signature = key_pair.signing_key().sign(message);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Verify a DER-encoded signature against an uncompressed SEC1 public key.
    pub fn verify(&self, public_key: &[u8], message: &[u8], signature_der: &[u8]) -> Result<()> {
        let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|e| GordianError::Format(format!("invalid public key: {e}")))?;
        let signature = Signature::from_der(signature_der)
            .map_err(|e| GordianError::Format(format!("invalid signature encoding: {e}")))?;
        verifying_key
            .verify(message, &signature)
            .map_err(|_| GordianError::DataIntegrity("signature verification failed".to_string()))
    }
}
