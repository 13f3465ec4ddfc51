//! The algorithm factory: the single seam through which every primitive
//! is manufactured.
//!
//! A factory is built once from [`GordianParameters`] and is cheap to
//! clone. Components never construct a provider primitive directly; they
//! ask the factory for an engine matching an abstract spec, and the
//! factory rejects specs outside the active profile with
//! `UnsupportedAlgorithm`.

use crate::error::{GordianError, Result};
use crate::idspec::{DigestSpec, GordianKeyLength, KeyPairSpec, MacSpec, SymCipherSpec};
use crate::obfuscate::KnuthObfuscater;
use crate::params::GordianParameters;
use crate::primitives::{DigestEngine, KeyGenerator, MacEngine, SignatureEngine, SymCipher};

#[derive(Debug, Clone)]
pub struct GordianFactory {
    parameters: GordianParameters,
    obfuscater: KnuthObfuscater,
}

impl GordianFactory {
    /// Build a factory from a security profile.
    ///
    /// Two parties holding the same (serialized) parameters construct
    /// interoperable factories; that is the whole cross-compatibility
    /// contract.
    pub fn new(parameters: GordianParameters) -> Result<Self> {
        Ok(Self {
            parameters,
            obfuscater: KnuthObfuscater::new(),
        })
    }

    pub fn parameters(&self) -> &GordianParameters {
        &self.parameters
    }

    pub fn obfuscater(&self) -> &KnuthObfuscater {
        &self.obfuscater
    }

    /// Key generator for a symmetric spec.
    pub fn new_key_generator(&self, spec: SymCipherSpec) -> Result<KeyGenerator> {
        self.check_cipher_spec(&spec)?;
        Ok(KeyGenerator::new(spec))
    }

    /// AEAD cipher engine for a symmetric spec.
    pub fn new_cipher(&self, spec: SymCipherSpec) -> Result<SymCipher> {
        self.check_cipher_spec(&spec)?;
        Ok(SymCipher::new(spec))
    }

    /// Streaming digest engine.
    pub fn new_digest(&self, spec: DigestSpec) -> Result<DigestEngine> {
        Ok(DigestEngine::new(spec))
    }

    /// HMAC engine.
    pub fn new_mac(&self, spec: MacSpec) -> Result<MacEngine> {
        Ok(MacEngine::new(spec))
    }

    /// Signature engine.
    pub fn new_signer(&self, spec: KeyPairSpec) -> Result<SignatureEngine> {
        Ok(SignatureEngine::new(spec))
    }

    /// Default MAC spec for the active profile.
    pub fn default_mac_spec(&self) -> MacSpec {
        match self.parameters.key_length() {
            GordianKeyLength::Len128 => MacSpec::HmacSha256,
            GordianKeyLength::Len256 => MacSpec::HmacSha512,
        }
    }

    /// Default keyset cipher sequence for the active profile: the
    /// supported specs at the profile tier, cycled up to the configured
    /// step count.
    pub fn default_cipher_sequence(&self) -> Vec<SymCipherSpec> {
        let tier = self.parameters.key_length();
        let available: Vec<SymCipherSpec> = SymCipherSpec::all()
            .iter()
            .copied()
            .filter(|spec| spec.key_length == tier)
            .collect();
        let steps = self.parameters.cipher_steps() as usize;
        (0..steps).map(|i| available[i % available.len()]).collect()
    }

    fn check_cipher_spec(&self, spec: &SymCipherSpec) -> Result<()> {
        if !spec.is_valid() {
            return Err(GordianError::UnsupportedAlgorithm(format!(
                "{:?} is not a valid cipher spec",
                spec
            )));
        }
        if spec.key_length.bits() > self.parameters.key_length().bits() {
            return Err(GordianError::UnsupportedAlgorithm(format!(
                "{:?} exceeds the profile key length {:?}",
                spec,
                self.parameters.key_length()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idspec::SymCipherAlgorithm;

    #[test]
    fn rejects_specs_above_the_profile_tier() {
        let params = GordianParameters::new(GordianKeyLength::Len128, 2, 1_000).unwrap();
        let factory = GordianFactory::new(params).unwrap();
        let aes256 = SymCipherSpec::new(SymCipherAlgorithm::Aes, GordianKeyLength::Len256);
        assert!(matches!(
            factory.new_cipher(aes256),
            Err(GordianError::UnsupportedAlgorithm(_))
        ));
        let aes128 = SymCipherSpec::new(SymCipherAlgorithm::Aes, GordianKeyLength::Len128);
        assert!(factory.new_cipher(aes128).is_ok());
    }

    #[test]
    fn default_sequence_matches_step_count() {
        let factory = GordianFactory::new(GordianParameters::default()).unwrap();
        let sequence = factory.default_cipher_sequence();
        assert_eq!(
            sequence.len(),
            factory.parameters().cipher_steps() as usize
        );
        for spec in &sequence {
            assert!(factory.new_cipher(*spec).is_ok());
        }
    }

    #[test]
    fn peer_factory_from_serialized_parameters_is_equivalent() {
        let factory = GordianFactory::new(GordianParameters::default()).unwrap();
        let bytes = bincode::serialize(factory.parameters()).unwrap();
        let peer = GordianFactory::new(bincode::deserialize(&bytes).unwrap()).unwrap();
        assert_eq!(peer.parameters(), factory.parameters());
        assert_eq!(peer.default_cipher_sequence(), factory.default_cipher_sequence());
    }
}
