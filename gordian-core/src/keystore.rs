//! Keystore and gateway for asymmetric identities.
//!
//! Entries hold certificates and password-protected private material.
//! Private bytes are wrapped with PBKDF2-HMAC-SHA256 + AES-256-GCM
//! ([`ProtectedBytes`]); a failed unwrap is an `Authentication` error so
//! callers can re-prompt rather than treat the store as corrupt.

use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::aead::rand_core::{OsRng, RngCore};
use hkdf::Hkdf;
use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use gordian_common::logging::Logger;

use crate::certificate::{validate_chain, Certificate, CertificateId};
use crate::error::{GordianError, Result};
use crate::factory::GordianFactory;
use crate::idspec::{GordianKeyLength, IdSpec, KeyPairSpec, SymCipherAlgorithm, SymCipherSpec};
use crate::primitives::{EcdsaKeyPair, SymCipher, SymmetricKey};

/// Salt length for password key derivation
const SALT_LENGTH: usize = 32;

/// Length of derived wrapping keys and of the store master secret
const MASTER_SECRET_LEN: usize = 32;

/// Password-wrapped private bytes.
///
/// Salt and iteration count travel with the ciphertext so unwrapping
/// needs only the password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedBytes {
    salt: Vec<u8>,
    iterations: u32,
    /// AES-GCM nonce followed by ciphertext
    wrapped: Vec<u8>,
}

impl ProtectedBytes {
    /// Wrap `plaintext` under a password-derived AES-256-GCM key.
    pub fn protect(plaintext: &[u8], password: &[u8], iterations: u32) -> Result<Self> {
        let mut salt = vec![0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        let key = derive_password_key(password, &salt, iterations)?;
        let wrapping_spec = wrapping_cipher_spec();
        let cipher = SymCipher::new(wrapping_spec);
        let sym_key = SymmetricKey::new(wrapping_spec, Zeroizing::new(key.to_vec()))?;
        let (nonce, ciphertext) = cipher.seal(&sym_key, plaintext)?;
        let mut wrapped = nonce;
        wrapped.extend_from_slice(&ciphertext);
        Ok(Self {
            salt,
            iterations,
            wrapped,
        })
    }

    /// Unwrap with the password. A tag failure means a wrong password.
    pub fn reveal(&self, password: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let wrapping_spec = wrapping_cipher_spec();
        let nonce_len = wrapping_spec.nonce_len();
        if self.wrapped.len() < nonce_len {
            return Err(GordianError::Format(
                "protected bytes are truncated".to_string(),
            ));
        }
        let key = derive_password_key(password, &self.salt, self.iterations)?;
        let cipher = SymCipher::new(wrapping_spec);
        let sym_key = SymmetricKey::new(wrapping_spec, Zeroizing::new(key.to_vec()))?;
        let (nonce, ciphertext) = self.wrapped.split_at(nonce_len);
        cipher
            .open(&sym_key, nonce, ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| GordianError::Authentication("wrong password".to_string()))
    }
}

// The wrapping cipher is pinned to AES-256-GCM regardless of the profile
// tier so protected entries stay portable across profiles.
fn wrapping_cipher_spec() -> SymCipherSpec {
    SymCipherSpec::new(SymCipherAlgorithm::Aes, GordianKeyLength::Len256)
}

fn derive_password_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; MASTER_SECRET_LEN]>> {
    let mut key = Zeroizing::new([0u8; MASTER_SECRET_LEN]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, key.as_mut())
        .map_err(|e| GordianError::Logic(format!("PBKDF2 failed: {e}")))?;
    Ok(key)
}

/// Scoped source of passwords, invoked only at the point where private
/// material must be unlocked. Implementations should not cache what they
/// return; the gateway drops the buffer as soon as the unlock completes.
pub trait PasswordResolver {
    fn resolve(&self, entry_name: &str) -> Result<Zeroizing<Vec<u8>>>;
}

impl<F> PasswordResolver for F
where
    F: Fn(&str) -> Result<Zeroizing<Vec<u8>>>,
{
    fn resolve(&self, entry_name: &str) -> Result<Zeroizing<Vec<u8>>> {
        self(entry_name)
    }
}

/// A named keystore entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeyStoreEntry {
    /// A certificate held for trust purposes only
    TrustedCertificate { certificate: Certificate },
    /// A certificate plus its password-protected PKCS#8 private key
    KeyPair {
        certificate: Certificate,
        private_key: ProtectedBytes,
    },
    /// Password-protected opaque secret bytes
    SecretKey { secret: ProtectedBytes },
}

impl KeyStoreEntry {
    pub fn certificate(&self) -> Option<&Certificate> {
        match self {
            KeyStoreEntry::TrustedCertificate { certificate }
            | KeyStoreEntry::KeyPair { certificate, .. } => Some(certificate),
            KeyStoreEntry::SecretKey { .. } => None,
        }
    }
}

/// Name-keyed store of entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyStore {
    entries: HashMap<String, KeyStoreEntry>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_entry(&mut self, name: impl Into<String>, entry: KeyStoreEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn entry(&self, name: &str) -> Option<&KeyStoreEntry> {
        self.entries.get(name)
    }

    pub fn remove_entry(&mut self, name: &str) -> Option<KeyStoreEntry> {
        self.entries.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find a certificate by its subject identity. This is the issuer
    /// resolver used by chain validation.
    pub fn find_certificate(&self, id: &CertificateId) -> Option<Certificate> {
        self.entries
            .values()
            .filter_map(KeyStoreEntry::certificate)
            .find(|certificate| certificate.subject() == id)
            .cloned()
    }

    /// Persisted byte form of the whole store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| GordianError::Format(format!("keystore encoding failed: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| GordianError::Format(format!("keystore decoding failed: {e}")))
    }
}

/// The persisted control-key row: `[id, externalTypeId, passwordHash,
/// publicKey, privateKey]`. The `external_type_id` column stores the
/// obfuscated cipher spec (adjustment = the row id), never the spec
/// itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlKeyRecord {
    pub id: i32,
    pub external_type_id: i32,
    pub password_hash: Vec<u8>,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl ControlKeyRecord {
    pub fn new(
        factory: &GordianFactory,
        id: i32,
        spec: SymCipherSpec,
        password_hash: Vec<u8>,
        public_key: Vec<u8>,
        private_key: Vec<u8>,
    ) -> Result<Self> {
        let external_type_id = factory
            .obfuscater()
            .external_id_with_adjustment(&IdSpec::SymCipher(spec), id)?;
        Ok(Self {
            id,
            external_type_id,
            password_hash,
            public_key,
            private_key,
        })
    }

    /// Resolve the obfuscated column back to the cipher spec.
    pub fn cipher_spec(&self, factory: &GordianFactory) -> Result<SymCipherSpec> {
        match factory
            .obfuscater()
            .spec_from_external_id_with_adjustment(self.external_type_id, self.id)
        {
            Ok(IdSpec::SymCipher(spec)) => Ok(spec),
            Ok(other) => Err(GordianError::Format(format!(
                "control-key record resolves to non-cipher spec {other:?}"
            ))),
            Err(_) => Err(GordianError::Format(format!(
                "control-key record {} carries an unresolvable type id",
                self.id
            ))),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| GordianError::Format(format!("control-key encoding failed: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| GordianError::Format(format!("control-key decoding failed: {e}")))
    }
}

/// Gateway composing certificates and keys for signing and encryption
/// operations.
pub struct KeyStoreGateway {
    factory: GordianFactory,
    store: KeyStore,
    /// Store-wide master secret that per-name MAC secrets derive from
    master_secret: Zeroizing<[u8; MASTER_SECRET_LEN]>,
    default_signer: Option<String>,
    target: Option<String>,
    logger: Arc<Logger>,
}

impl KeyStoreGateway {
    /// Create a gateway over an empty store with a fresh master secret.
    pub fn new(factory: GordianFactory, logger: Arc<Logger>) -> Self {
        let mut master_secret = Zeroizing::new([0u8; MASTER_SECRET_LEN]);
        OsRng.fill_bytes(master_secret.as_mut());
        logger.info("Keystore gateway initialized with a fresh master secret");
        Self {
            factory,
            store: KeyStore::new(),
            master_secret,
            default_signer: None,
            target: None,
            logger,
        }
    }

    /// Reconstruct a gateway over an existing store and master secret.
    pub fn from_parts(
        factory: GordianFactory,
        store: KeyStore,
        master_secret: Zeroizing<[u8; MASTER_SECRET_LEN]>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            factory,
            store,
            master_secret,
            default_signer: None,
            target: None,
            logger,
        }
    }

    pub fn factory(&self) -> &GordianFactory {
        &self.factory
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Add a certificate held for trust only.
    pub fn insert_trusted_certificate(&mut self, name: &str, certificate: Certificate) {
        self.logger
            .debug(format!("Storing trusted certificate entry: {name}"));
        self.store.set_entry(
            name,
            KeyStoreEntry::TrustedCertificate { certificate },
        );
    }

    /// Add a key-pair entry, wrapping the private key under `password`.
    pub fn insert_key_pair(
        &mut self,
        name: &str,
        certificate: Certificate,
        key_pair: &EcdsaKeyPair,
        password: &[u8],
    ) -> Result<()> {
        if key_pair.public_key_bytes() != certificate.public_key() {
            return Err(GordianError::Logic(format!(
                "key pair does not match the certificate for entry {name}"
            )));
        }
        let private_der = key_pair.private_key_der()?;
        let protected = ProtectedBytes::protect(
            &private_der,
            password,
            self.factory.parameters().lock_iterations(),
        )?;
        self.logger.debug(format!("Storing key-pair entry: {name}"));
        self.store.set_entry(
            name,
            KeyStoreEntry::KeyPair {
                certificate,
                private_key: protected,
            },
        );
        Ok(())
    }

    /// Add a secret-key entry, wrapping the bytes under `password`.
    pub fn insert_secret_key(&mut self, name: &str, secret: &[u8], password: &[u8]) -> Result<()> {
        let protected = ProtectedBytes::protect(
            secret,
            password,
            self.factory.parameters().lock_iterations(),
        )?;
        self.logger.debug(format!("Storing secret-key entry: {name}"));
        self.store
            .set_entry(name, KeyStoreEntry::SecretKey { secret: protected });
        Ok(())
    }

    /// Designate the key-pair entry used for outgoing signatures.
    pub fn set_default_signer(&mut self, name: &str) -> Result<()> {
        match self.store.entry(name) {
            Some(KeyStoreEntry::KeyPair { certificate, .. }) => {
                if !certificate.usage().signing {
                    return Err(GordianError::Logic(format!(
                        "entry {name} lacks the signing usage"
                    )));
                }
                self.default_signer = Some(name.to_string());
                Ok(())
            }
            Some(_) => Err(GordianError::Logic(format!(
                "entry {name} is not a key-pair entry"
            ))),
            None => Err(GordianError::NotFound(name.to_string())),
        }
    }

    /// Designate the certificate outgoing confidential payloads are
    /// encrypted to.
    pub fn set_target(&mut self, name: &str) -> Result<()> {
        match self.store.entry(name).and_then(KeyStoreEntry::certificate) {
            Some(certificate) => {
                if !certificate.usage().encryption {
                    return Err(GordianError::Logic(format!(
                        "entry {name} lacks the encryption usage"
                    )));
                }
                self.target = Some(name.to_string());
                Ok(())
            }
            None => Err(GordianError::NotFound(name.to_string())),
        }
    }

    /// The certificate outgoing confidential payloads encrypt to.
    pub fn target(&self) -> Result<Certificate> {
        let name = self
            .target
            .as_deref()
            .ok_or_else(|| GordianError::NotFound("no target entry designated".to_string()))?;
        self.store
            .entry(name)
            .and_then(KeyStoreEntry::certificate)
            .cloned()
            .ok_or_else(|| GordianError::NotFound(name.to_string()))
    }

    /// Deterministic per-name MAC secret derived from the store-wide
    /// master secret. Secrets are reproducible without being stored, and
    /// a leak of one name's secret reveals nothing about another's.
    pub fn mac_secret(&self, name: &str) -> Result<Zeroizing<[u8; MASTER_SECRET_LEN]>> {
        let hk = Hkdf::<Sha256>::new(None, self.master_secret.as_ref());
        let info = format!("gordian-mac-secret:{name}");
        let mut secret = Zeroizing::new([0u8; MASTER_SECRET_LEN]);
        hk.expand(info.as_bytes(), secret.as_mut())?;
        Ok(secret)
    }

    /// Sign with the default signer, unlocking the private key through
    /// the resolver for just this operation.
    pub fn sign(&self, data: &[u8], resolver: &dyn PasswordResolver) -> Result<Vec<u8>> {
        let name = self.default_signer.as_deref().ok_or_else(|| {
            GordianError::NotFound("no default signer designated".to_string())
        })?;
        let key_pair = self.unlock_key_pair(name, resolver)?;
        let signer = self.factory.new_signer(KeyPairSpec::EcdsaP256)?;
        let signature = signer.sign(&key_pair, data)?;
        self.logger
            .debug(format!("Signed {} bytes with entry {name}", data.len()));
        Ok(signature)
    }

    /// Certificate of the default signer, for distribution to verifiers.
    pub fn default_signer_certificate(&self) -> Result<Certificate> {
        let name = self.default_signer.as_deref().ok_or_else(|| {
            GordianError::NotFound("no default signer designated".to_string())
        })?;
        self.store
            .entry(name)
            .and_then(KeyStoreEntry::certificate)
            .cloned()
            .ok_or_else(|| GordianError::NotFound(name.to_string()))
    }

    /// Encrypt a certificate-request payload to the target certificate's
    /// public key.
    pub fn encrypt_crm(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let target = self.target()?;
        if !target.usage().encryption {
            return Err(GordianError::Logic(format!(
                "target {} lacks the encryption usage",
                target.subject().name
            )));
        }
        self.logger.debug(format!(
            "Encrypting {} byte CRM for {}",
            payload.len(),
            target.subject().name
        ));
        ecies_encrypt(target.public_key(), payload)
    }

    /// Decrypt a certificate-request payload addressed to one of our
    /// key-pair entries.
    pub fn decrypt_crm(
        &self,
        name: &str,
        encrypted: &[u8],
        resolver: &dyn PasswordResolver,
    ) -> Result<Vec<u8>> {
        let key_pair = self.unlock_key_pair(name, resolver)?;
        ecies_decrypt(&key_pair, encrypted)
    }

    /// Reveal the bytes of a secret-key entry.
    pub fn secret_key(
        &self,
        name: &str,
        resolver: &dyn PasswordResolver,
    ) -> Result<Zeroizing<Vec<u8>>> {
        match self.store.entry(name) {
            Some(KeyStoreEntry::SecretKey { secret }) => {
                let password = resolver.resolve(name)?;
                secret.reveal(&password)
            }
            Some(_) => Err(GordianError::Logic(format!(
                "entry {name} is not a secret-key entry"
            ))),
            None => Err(GordianError::NotFound(name.to_string())),
        }
    }

    /// Validate the certificate chain of a named entry against the store.
    pub fn validate_entry_chain(&self, name: &str, date: u64) -> Result<Vec<CertificateId>> {
        let certificate = self
            .store
            .entry(name)
            .and_then(KeyStoreEntry::certificate)
            .ok_or_else(|| GordianError::NotFound(name.to_string()))?;
        validate_chain(
            &self.factory,
            certificate,
            |id| self.store.find_certificate(id),
            date,
        )
    }

    fn unlock_key_pair(&self, name: &str, resolver: &dyn PasswordResolver) -> Result<EcdsaKeyPair> {
        match self.store.entry(name) {
            Some(KeyStoreEntry::KeyPair { private_key, .. }) => {
                // Password and decrypted DER are both zeroized on drop.
                let password = resolver.resolve(name)?;
                let private_der = private_key.reveal(&password)?;
                EcdsaKeyPair::from_private_key_der(&private_der)
            }
            Some(_) => Err(GordianError::Logic(format!(
                "entry {name} is not a key-pair entry"
            ))),
            None => Err(GordianError::NotFound(name.to_string())),
        }
    }
}

/* -------------------------------------------------------------------------
 * ECIES: ephemeral P-256 ECDH -> HKDF -> AES-256-GCM.
 * The wire form is ephemeral public key (65 bytes) || nonce || ciphertext.
 * ---------------------------------------------------------------------- */

const ECIES_INFO: &[u8] = b"gordian-crm-encryption";
const ECIES_PUBLIC_LEN: usize = 65;

pub(crate) fn ecies_encrypt(recipient_public_key: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    use p256::ecdh::EphemeralSecret;
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    use p256::PublicKey;

    let ephemeral_secret = EphemeralSecret::random(&mut rand::thread_rng());
    let ephemeral_public = ephemeral_secret.public_key();

    let recipient = PublicKey::from_sec1_bytes(recipient_public_key)
        .map_err(|e| GordianError::Format(format!("invalid recipient public key: {e}")))?;
    let shared_secret = ephemeral_secret.diffie_hellman(&recipient);
    let key = ecies_session_key(shared_secret.raw_secret_bytes().as_slice())?;

    let wrapping_spec = wrapping_cipher_spec();
    let cipher = SymCipher::new(wrapping_spec);
    let sym_key = SymmetricKey::new(wrapping_spec, Zeroizing::new(key.to_vec()))?;
    let (nonce, ciphertext) = cipher.seal(&sym_key, payload)?;

    let mut result = ephemeral_public
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

pub(crate) fn ecies_decrypt(key_pair: &EcdsaKeyPair, encrypted: &[u8]) -> Result<Vec<u8>> {
    use p256::ecdh::diffie_hellman;
    use p256::{PublicKey, SecretKey};

    let wrapping_spec = wrapping_cipher_spec();
    let nonce_len = wrapping_spec.nonce_len();
    if encrypted.len() < ECIES_PUBLIC_LEN + nonce_len {
        return Err(GordianError::Format(
            "ECIES payload is truncated".to_string(),
        ));
    }
    let (ephemeral_bytes, rest) = encrypted.split_at(ECIES_PUBLIC_LEN);
    let (nonce, ciphertext) = rest.split_at(nonce_len);

    let ephemeral_public = PublicKey::from_sec1_bytes(ephemeral_bytes)
        .map_err(|e| GordianError::Format(format!("invalid ephemeral public key: {e}")))?;
    let secret_key = SecretKey::from_bytes(&key_pair.signing_key().to_bytes())
        .map_err(|e| GordianError::Logic(format!("failed to derive agreement key: {e}")))?;
    let shared_secret =
        diffie_hellman(secret_key.to_nonzero_scalar(), ephemeral_public.as_affine());
    let key = ecies_session_key(shared_secret.raw_secret_bytes().as_slice())?;

    let cipher = SymCipher::new(wrapping_spec);
    let sym_key = SymmetricKey::new(wrapping_spec, Zeroizing::new(key.to_vec()))?;
    cipher.open(&sym_key, nonce, ciphertext)
}

fn ecies_session_key(shared_secret: &[u8]) -> Result<Zeroizing<[u8; MASTER_SECRET_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = Zeroizing::new([0u8; MASTER_SECRET_LEN]);
    hk.expand(ECIES_INFO, key.as_mut())?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protect_reveal_round_trip() {
        let protected = ProtectedBytes::protect(b"private material", b"hunter2", 1_000).unwrap();
        let revealed = protected.reveal(b"hunter2").unwrap();
        assert_eq!(revealed.as_slice(), b"private material");
    }

    #[test]
    fn wrong_password_is_authentication() {
        let protected = ProtectedBytes::protect(b"private material", b"hunter2", 1_000).unwrap();
        assert!(matches!(
            protected.reveal(b"hunter3"),
            Err(GordianError::Authentication(_))
        ));
    }

    #[test]
    fn ecies_round_trip() {
        let key_pair = EcdsaKeyPair::generate();
        let encrypted = ecies_encrypt(&key_pair.public_key_bytes(), b"request body").unwrap();
        let decrypted = ecies_decrypt(&key_pair, &encrypted).unwrap();
        assert_eq!(decrypted, b"request body");
    }
}
