//! Abstract algorithm/key specifications.
//!
//! An [`IdSpec`] describes an algorithm choice without binding to any
//! concrete provider type. Specs are small immutable value objects with
//! structural equality; the factory turns them into live primitive
//! engines, and the obfuscater turns them into persisted integers.

use serde::{Deserialize, Serialize};

/// Symmetric key-size tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GordianKeyLength {
    Len128,
    Len256,
}

impl GordianKeyLength {
    pub fn bits(&self) -> usize {
        match self {
            GordianKeyLength::Len128 => 128,
            GordianKeyLength::Len256 => 256,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bits() / 8
    }
}

/// Symmetric cipher family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymCipherAlgorithm {
    Aes,
    ChaCha20,
    XChaCha20,
}

/// A symmetric cipher choice: family plus key-size tier.
///
/// The ChaCha20 variants only exist at 256 bits; [`SymCipherSpec::all`]
/// enumerates exactly the valid combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymCipherSpec {
    pub algorithm: SymCipherAlgorithm,
    pub key_length: GordianKeyLength,
}

impl SymCipherSpec {
    pub const fn new(algorithm: SymCipherAlgorithm, key_length: GordianKeyLength) -> Self {
        Self {
            algorithm,
            key_length,
        }
    }

    /// The enumerated domain, in stable ordinal order.
    pub fn all() -> &'static [SymCipherSpec] {
        const ALL: [SymCipherSpec; 4] = [
            SymCipherSpec::new(SymCipherAlgorithm::Aes, GordianKeyLength::Len128),
            SymCipherSpec::new(SymCipherAlgorithm::Aes, GordianKeyLength::Len256),
            SymCipherSpec::new(SymCipherAlgorithm::ChaCha20, GordianKeyLength::Len256),
            SymCipherSpec::new(SymCipherAlgorithm::XChaCha20, GordianKeyLength::Len256),
        ];
        &ALL
    }

    pub fn is_valid(&self) -> bool {
        Self::all().contains(self)
    }

    pub fn key_len(&self) -> usize {
        self.key_length.bytes()
    }

    pub fn nonce_len(&self) -> usize {
        match self.algorithm {
            SymCipherAlgorithm::Aes | SymCipherAlgorithm::ChaCha20 => 12,
            SymCipherAlgorithm::XChaCha20 => 24,
        }
    }

    /// AEAD tag length appended to each sealed payload
    pub fn tag_len(&self) -> usize {
        16
    }
}

/// Digest algorithm choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestSpec {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestSpec {
    pub fn all() -> &'static [DigestSpec] {
        const ALL: [DigestSpec; 3] = [DigestSpec::Sha256, DigestSpec::Sha384, DigestSpec::Sha512];
        &ALL
    }

    pub fn output_len(&self) -> usize {
        match self {
            DigestSpec::Sha256 => 32,
            DigestSpec::Sha384 => 48,
            DigestSpec::Sha512 => 64,
        }
    }
}

/// MAC algorithm choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacSpec {
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

impl MacSpec {
    pub fn all() -> &'static [MacSpec] {
        const ALL: [MacSpec; 3] = [MacSpec::HmacSha256, MacSpec::HmacSha384, MacSpec::HmacSha512];
        &ALL
    }

    pub fn tag_len(&self) -> usize {
        match self {
            MacSpec::HmacSha256 => 32,
            MacSpec::HmacSha384 => 48,
            MacSpec::HmacSha512 => 64,
        }
    }

    /// Key material length used when deriving a MAC key for this spec
    pub fn key_len(&self) -> usize {
        self.tag_len()
    }
}

/// Asymmetric key-pair algorithm choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPairSpec {
    EcdsaP256,
}

impl KeyPairSpec {
    pub fn all() -> &'static [KeyPairSpec] {
        const ALL: [KeyPairSpec; 1] = [KeyPairSpec::EcdsaP256];
        &ALL
    }
}

/// Closed variant over the spec categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdSpec {
    SymCipher(SymCipherSpec),
    Digest(DigestSpec),
    Mac(MacSpec),
    KeyPair(KeyPairSpec),
}

impl IdSpec {
    /// Category code used by the external-id encoding. Stable across
    /// releases; persisted data depends on it.
    pub fn category(&self) -> u8 {
        match self {
            IdSpec::SymCipher(_) => 1,
            IdSpec::Digest(_) => 2,
            IdSpec::Mac(_) => 3,
            IdSpec::KeyPair(_) => 4,
        }
    }

    /// Stable ordinal of this value within its category.
    ///
    /// Returns `None` for a structurally possible but invalid combination
    /// (e.g. ChaCha20 at 128 bits).
    pub fn ordinal(&self) -> Option<u32> {
        fn position<T: PartialEq>(all: &[T], value: &T) -> Option<u32> {
            all.iter().position(|v| v == value).map(|p| p as u32)
        }
        match self {
            IdSpec::SymCipher(spec) => position(SymCipherSpec::all(), spec),
            IdSpec::Digest(spec) => position(DigestSpec::all(), spec),
            IdSpec::Mac(spec) => position(MacSpec::all(), spec),
            IdSpec::KeyPair(spec) => position(KeyPairSpec::all(), spec),
        }
    }

    /// Inverse of [`IdSpec::category`] + [`IdSpec::ordinal`].
    pub fn from_category_ordinal(category: u8, ordinal: u32) -> Option<IdSpec> {
        let ordinal = ordinal as usize;
        match category {
            1 => SymCipherSpec::all().get(ordinal).copied().map(IdSpec::SymCipher),
            2 => DigestSpec::all().get(ordinal).copied().map(IdSpec::Digest),
            3 => MacSpec::all().get(ordinal).copied().map(IdSpec::Mac),
            4 => KeyPairSpec::all().get(ordinal).copied().map(IdSpec::KeyPair),
            _ => None,
        }
    }

    /// Every valid spec across all categories.
    pub fn enumerate() -> Vec<IdSpec> {
        let mut all = Vec::new();
        all.extend(SymCipherSpec::all().iter().copied().map(IdSpec::SymCipher));
        all.extend(DigestSpec::all().iter().copied().map(IdSpec::Digest));
        all.extend(MacSpec::all().iter().copied().map(IdSpec::Mac));
        all.extend(KeyPairSpec::all().iter().copied().map(IdSpec::KeyPair));
        all
    }
}
