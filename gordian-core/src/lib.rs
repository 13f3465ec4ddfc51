//! Gordian Core – public API facade
//!
//! The crate is a local, single-process key and credential management
//! library: an algorithm factory over abstract specs, obfuscated spec
//! persistence, composite keyset encryption, a certificate model with
//! chain validation, a password-guarded keystore, and a locked archive
//! format.

pub mod certificate;
pub mod error;
pub mod factory;
pub mod idspec;
pub mod keyset;
pub mod keystore;
pub mod obfuscate;
pub mod params;
pub mod primitives;
pub mod zip;

pub use error::{GordianError, Result};

pub use idspec::{
    DigestSpec, GordianKeyLength, IdSpec, KeyPairSpec, MacSpec, SymCipherAlgorithm, SymCipherSpec,
};

pub use obfuscate::KnuthObfuscater;

pub use params::{GordianParameters, DEFAULT_CIPHER_STEPS, MAX_CIPHER_STEPS};

pub use factory::GordianFactory;

pub use primitives::{
    DigestEngine, EcdsaKeyPair, KeyGenerator, MacEngine, SignatureEngine, SymCipher, SymmetricKey,
};

pub use keyset::{KeySet, KEYSET_SEED_LEN};

pub use certificate::{validate_chain, Certificate, CertificateId, KeyUsage};

pub use keystore::{
    ControlKeyRecord, KeyStore, KeyStoreEntry, KeyStoreGateway, PasswordResolver, ProtectedBytes,
};

pub use zip::{Lock, ZipEntryStream, ZipFileContents, ZipFileEntry, ZipReadFile, ZipWriteFile};
