//! Composite symmetric encryption unit.
//!
//! A [`KeySet`] chains several independently keyed AEAD ciphers and one
//! HMAC. All step keys are expanded from a single secret with HKDF,
//! salted by a random per-keyset seed that travels in the encoded header,
//! so any keyset holding the same secret can decrypt a blob produced by
//! another instance.
//!
//! Encoded blob layout (integers big-endian):
//!
//! ```text
//! version u8 | step_count u8 | seed [16] | mac_id i32
//!   | per step { cipher_id i32, nonce_len u8, nonce }
//!   | ciphertext | mac_tag
//! ```
//!
//! `cipher_id` and `mac_id` are obfuscated external ids; the obfuscation
//! adjustment is taken from the first four seed bytes, so identical spec
//! sequences persist as different integers across keysets.
//!
//! The MAC tag always sits at the end and covers every preceding byte,
//! and it is verified before any header field is interpreted. A flipped
//! bit anywhere in the blob therefore surfaces as `DataIntegrity`, never
//! as a parse error or as altered plaintext.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{GordianError, Result};
use crate::factory::GordianFactory;
use crate::idspec::{IdSpec, MacSpec, SymCipherSpec};
use crate::params::MAX_CIPHER_STEPS;
use crate::primitives::SymmetricKey;

/// Length of the per-keyset recovery seed carried in every blob
pub const KEYSET_SEED_LEN: usize = 16;

const KEYSET_VERSION: u8 = 1;

/// Fixed header bytes before the per-step entries
const FIXED_HEADER_LEN: usize = 2 + KEYSET_SEED_LEN + 4;

pub struct KeySet {
    factory: GordianFactory,
    secret: Zeroizing<Vec<u8>>,
    seed: [u8; KEYSET_SEED_LEN],
    specs: Vec<SymCipherSpec>,
    step_keys: Vec<SymmetricKey>,
    mac_spec: MacSpec,
    mac_key: Zeroizing<Vec<u8>>,
}

impl KeySet {
    /// Build a keyset with the factory's default cipher sequence.
    pub fn new(factory: &GordianFactory, secret: &[u8]) -> Result<Self> {
        let specs = factory.default_cipher_sequence();
        Self::with_specs(factory, secret, specs)
    }

    /// Build a keyset with a caller-chosen cipher sequence.
    pub fn with_specs(
        factory: &GordianFactory,
        secret: &[u8],
        specs: Vec<SymCipherSpec>,
    ) -> Result<Self> {
        if specs.is_empty() || specs.len() > MAX_CIPHER_STEPS as usize {
            return Err(GordianError::Logic(format!(
                "keyset needs 1..={MAX_CIPHER_STEPS} cipher steps, got {}",
                specs.len()
            )));
        }
        for spec in &specs {
            // Fails with UnsupportedAlgorithm when outside the profile.
            factory.new_cipher(*spec)?;
        }
        let mut seed = [0u8; KEYSET_SEED_LEN];
        rand::rngs::OsRng.fill_bytes(&mut seed);

        let mac_spec = factory.default_mac_spec();
        let secret = Zeroizing::new(secret.to_vec());
        let (step_keys, mac_key) = derive_keys(&secret, &seed, &specs, mac_spec)?;

        Ok(Self {
            factory: factory.clone(),
            secret,
            seed,
            specs,
            step_keys,
            mac_spec,
            mac_key,
        })
    }

    pub fn cipher_specs(&self) -> &[SymCipherSpec] {
        &self.specs
    }

    pub fn mac_spec(&self) -> MacSpec {
        self.mac_spec
    }

    /// Encrypt a payload through the full cipher chain; the result is a
    /// self-describing blob. Nonces are fresh per call, so repeated
    /// encryption of an identical payload yields different bytes.
    pub fn encrypt_bytes(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let adjustment = seed_adjustment(&self.seed);
        let obfuscater = self.factory.obfuscater();

        let mut data = payload.to_vec();
        let mut nonces = Vec::with_capacity(self.specs.len());
        for (spec, key) in self.specs.iter().zip(&self.step_keys) {
            let cipher = self.factory.new_cipher(*spec)?;
            let (nonce, ciphertext) = cipher.seal(key, &data)?;
            nonces.push(nonce);
            data = ciphertext;
        }

        let mut blob = Vec::with_capacity(FIXED_HEADER_LEN + data.len() + 64);
        blob.push(KEYSET_VERSION);
        blob.push(self.specs.len() as u8);
        blob.extend_from_slice(&self.seed);
        let mac_id =
            obfuscater.external_id_with_adjustment(&IdSpec::Mac(self.mac_spec), adjustment)?;
        blob.extend_from_slice(&mac_id.to_be_bytes());
        for (spec, nonce) in self.specs.iter().zip(&nonces) {
            let cipher_id = obfuscater
                .external_id_with_adjustment(&IdSpec::SymCipher(*spec), adjustment)?;
            blob.extend_from_slice(&cipher_id.to_be_bytes());
            blob.push(nonce.len() as u8);
            blob.extend_from_slice(nonce);
        }
        blob.extend_from_slice(&data);

        let mac = self.factory.new_mac(self.mac_spec)?;
        let tag = mac.compute(&self.mac_key, &blob)?;
        blob.extend_from_slice(&tag);
        Ok(blob)
    }

    /// Decrypt a blob produced by [`KeySet::encrypt_bytes`] on any keyset
    /// holding the same secret.
    pub fn decrypt_bytes(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        let tag_len = self.mac_spec.tag_len();
        if encoded.len() < FIXED_HEADER_LEN + tag_len {
            return Err(GordianError::Format("encoded keyset blob is truncated".to_string()));
        }
        let (body, tag) = encoded.split_at(encoded.len() - tag_len);

        // Authenticate before trusting anything else in the blob. The MAC
        // key only depends on the seed bytes at a fixed offset, so a
        // corrupted seed shows up here as a tag mismatch.
        let seed: [u8; KEYSET_SEED_LEN] = body[2..2 + KEYSET_SEED_LEN]
            .try_into()
            .map_err(|_| GordianError::Format("encoded keyset blob is truncated".to_string()))?;
        let mac_key = if seed == self.seed {
            None
        } else {
            Some(derive_mac_key(&self.secret, &seed, self.mac_spec)?)
        };
        let mac = self.factory.new_mac(self.mac_spec)?;
        mac.verify(mac_key.as_ref().unwrap_or(&self.mac_key), body, tag)?;

        // Header fields are authentic from here on; parse failures mean a
        // blob written by an incompatible implementation, not tampering.
        if body[0] != KEYSET_VERSION {
            return Err(GordianError::Format(format!(
                "unsupported keyset blob version {}",
                body[0]
            )));
        }
        let step_count = body[1] as usize;
        if step_count == 0 || step_count > MAX_CIPHER_STEPS as usize {
            return Err(GordianError::Format(format!(
                "keyset blob declares {step_count} cipher steps"
            )));
        }

        let adjustment = seed_adjustment(&seed);
        let obfuscater = self.factory.obfuscater();
        let mut cursor = 2 + KEYSET_SEED_LEN;

        let mac_id = read_i32(body, &mut cursor)?;
        let mac_spec = resolve_mac(obfuscater, mac_id, adjustment)?;
        if mac_spec != self.mac_spec {
            return Err(GordianError::Format(format!(
                "keyset blob MAC spec {mac_spec:?} does not match profile {:?}",
                self.mac_spec
            )));
        }

        let mut specs = Vec::with_capacity(step_count);
        let mut nonces = Vec::with_capacity(step_count);
        for _ in 0..step_count {
            let cipher_id = read_i32(body, &mut cursor)?;
            let spec = resolve_cipher(obfuscater, cipher_id, adjustment)?;
            let nonce_len = *body
                .get(cursor)
                .ok_or_else(|| GordianError::Format("keyset header is truncated".to_string()))?
                as usize;
            cursor += 1;
            if nonce_len != spec.nonce_len() {
                return Err(GordianError::Format(format!(
                    "nonce length {nonce_len} does not match spec {spec:?}"
                )));
            }
            let nonce = body
                .get(cursor..cursor + nonce_len)
                .ok_or_else(|| GordianError::Format("keyset header is truncated".to_string()))?
                .to_vec();
            cursor += nonce_len;
            specs.push(spec);
            nonces.push(nonce);
        }

        let derived_keys;
        let step_keys: &[SymmetricKey] = if seed == self.seed && specs == self.specs {
            &self.step_keys
        } else {
            let (keys, _) = derive_keys(&self.secret, &seed, &specs, self.mac_spec)?;
            derived_keys = keys;
            &derived_keys
        };

        let mut data = body[cursor..].to_vec();
        for ((spec, key), nonce) in specs.iter().zip(step_keys).zip(&nonces).rev() {
            let cipher = self.factory.new_cipher(*spec)?;
            data = cipher.open(key, nonce, &data)?;
        }
        Ok(data)
    }

    /// MAC-only signing for integrity-only use: no cipher chain, just a
    /// self-describing header plus the tag over header and payload.
    pub fn sign_bytes(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let adjustment = seed_adjustment(&self.seed);
        let mac_id = self
            .factory
            .obfuscater()
            .external_id_with_adjustment(&IdSpec::Mac(self.mac_spec), adjustment)?;

        let mut blob = Vec::with_capacity(FIXED_HEADER_LEN + self.mac_spec.tag_len());
        blob.push(KEYSET_VERSION);
        blob.push(0); // no cipher steps in a signature blob
        blob.extend_from_slice(&self.seed);
        blob.extend_from_slice(&mac_id.to_be_bytes());

        let mut signed = blob.clone();
        signed.extend_from_slice(payload);
        let mac = self.factory.new_mac(self.mac_spec)?;
        let tag = mac.compute(&self.mac_key, &signed)?;
        blob.extend_from_slice(&tag);
        Ok(blob)
    }

    /// Verify a signature blob produced by [`KeySet::sign_bytes`].
    pub fn verify_signature(&self, payload: &[u8], signature: &[u8]) -> Result<()> {
        let tag_len = self.mac_spec.tag_len();
        if signature.len() != FIXED_HEADER_LEN + tag_len {
            return Err(GordianError::Format(
                "signature blob has the wrong length".to_string(),
            ));
        }
        let (header, tag) = signature.split_at(FIXED_HEADER_LEN);
        let seed: [u8; KEYSET_SEED_LEN] = header[2..2 + KEYSET_SEED_LEN]
            .try_into()
            .map_err(|_| GordianError::Format("signature blob is truncated".to_string()))?;
        let mac_key = if seed == self.seed {
            None
        } else {
            Some(derive_mac_key(&self.secret, &seed, self.mac_spec)?)
        };

        let mut signed = header.to_vec();
        signed.extend_from_slice(payload);
        let mac = self.factory.new_mac(self.mac_spec)?;
        mac.verify(mac_key.as_ref().unwrap_or(&self.mac_key), &signed, tag)
    }
}

fn seed_adjustment(seed: &[u8; KEYSET_SEED_LEN]) -> i32 {
    i32::from_be_bytes([seed[0], seed[1], seed[2], seed[3]])
}

fn read_i32(body: &[u8], cursor: &mut usize) -> Result<i32> {
    let bytes = body
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| GordianError::Format("keyset header is truncated".to_string()))?;
    *cursor += 4;
    Ok(i32::from_be_bytes(bytes.try_into().unwrap()))
}

fn resolve_cipher(
    obfuscater: &crate::obfuscate::KnuthObfuscater,
    id: i32,
    adjustment: i32,
) -> Result<SymCipherSpec> {
    match obfuscater.spec_from_external_id_with_adjustment(id, adjustment) {
        Ok(IdSpec::SymCipher(spec)) => Ok(spec),
        Ok(other) => Err(GordianError::Format(format!(
            "external id {id} resolves to non-cipher spec {other:?}"
        ))),
        Err(_) => Err(GordianError::Format(format!(
            "external id {id} does not resolve to a cipher spec"
        ))),
    }
}

fn resolve_mac(
    obfuscater: &crate::obfuscate::KnuthObfuscater,
    id: i32,
    adjustment: i32,
) -> Result<MacSpec> {
    match obfuscater.spec_from_external_id_with_adjustment(id, adjustment) {
        Ok(IdSpec::Mac(spec)) => Ok(spec),
        Ok(other) => Err(GordianError::Format(format!(
            "external id {id} resolves to non-MAC spec {other:?}"
        ))),
        Err(_) => Err(GordianError::Format(format!(
            "external id {id} does not resolve to a MAC spec"
        ))),
    }
}

/// Expand all step keys plus the MAC key from the secret and seed.
fn derive_keys(
    secret: &[u8],
    seed: &[u8; KEYSET_SEED_LEN],
    specs: &[SymCipherSpec],
    mac_spec: MacSpec,
) -> Result<(Vec<SymmetricKey>, Zeroizing<Vec<u8>>)> {
    let hk = Hkdf::<Sha256>::new(Some(seed), secret);
    let mut step_keys = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        let info = format!("gordian-keyset-step-{index}");
        let mut okm = Zeroizing::new(vec![0u8; spec.key_len()]);
        hk.expand(info.as_bytes(), &mut okm)?;
        step_keys.push(SymmetricKey::new(*spec, okm)?);
    }
    let mac_key = expand_mac_key(&hk, mac_spec)?;
    Ok((step_keys, mac_key))
}

fn derive_mac_key(
    secret: &[u8],
    seed: &[u8; KEYSET_SEED_LEN],
    mac_spec: MacSpec,
) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(Some(seed), secret);
    expand_mac_key(&hk, mac_spec)
}

fn expand_mac_key(hk: &Hkdf<Sha256>, mac_spec: MacSpec) -> Result<Zeroizing<Vec<u8>>> {
    let mut okm = Zeroizing::new(vec![0u8; mac_spec.key_len()]);
    hk.expand(b"gordian-keyset-mac", &mut okm)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GordianParameters;

    fn factory() -> GordianFactory {
        GordianFactory::new(GordianParameters::default()).unwrap()
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let factory = factory();
        let keyset = KeySet::new(&factory, b"a keyset secret").unwrap();
        let blob = keyset.encrypt_bytes(b"payload bytes").unwrap();
        assert_eq!(keyset.decrypt_bytes(&blob).unwrap(), b"payload bytes");
    }

    #[test]
    fn sign_and_verify() {
        let factory = factory();
        let keyset = KeySet::new(&factory, b"a keyset secret").unwrap();
        let signature = keyset.sign_bytes(b"ledger row").unwrap();
        keyset.verify_signature(b"ledger row", &signature).unwrap();
        assert!(matches!(
            keyset.verify_signature(b"ledger rox", &signature),
            Err(GordianError::DataIntegrity(_))
        ));
    }

    #[test]
    fn sibling_keyset_verifies_signature() {
        let factory = factory();
        let a = KeySet::new(&factory, b"shared secret").unwrap();
        let b = KeySet::new(&factory, b"shared secret").unwrap();
        let signature = a.sign_bytes(b"payload").unwrap();
        b.verify_signature(b"payload", &signature).unwrap();
    }

    #[test]
    fn truncated_blob_is_a_format_error() {
        let factory = factory();
        let keyset = KeySet::new(&factory, b"secret").unwrap();
        assert!(matches!(
            keyset.decrypt_bytes(&[1, 2, 3]),
            Err(GordianError::Format(_))
        ));
    }
}
