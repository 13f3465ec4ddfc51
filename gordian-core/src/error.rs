use thiserror::Error;

/// Error types for the gordian-core crate
///
/// The variants form a closed taxonomy; callers are expected to branch on
/// the kind (re-prompt on `Authentication`, treat `DataIntegrity`/`Format`
/// input as corrupt) rather than on message text.
#[derive(Error, Debug)]
pub enum GordianError {
    /// The factory cannot satisfy the requested spec under its parameters.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Invariant violation, e.g. an external id with no matching spec.
    #[error("Logic error: {0}")]
    Logic(String),

    /// MAC or signature mismatch. Data must not be trusted.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Wrong password or lock token.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Malformed or truncated persisted bytes.
    #[error("Format error: {0}")]
    Format(String),

    /// Certificate chain does not terminate at a trusted self-signed root.
    #[error("Untrusted certificate chain: {0}")]
    UntrustedChain(String),

    /// A named keystore entry does not exist.
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hkdf::InvalidLength> for GordianError {
    fn from(err: hkdf::InvalidLength) -> Self {
        GordianError::Logic(format!("HKDF error: {err}"))
    }
}

/// Result type for gordian-core operations
pub type Result<T> = std::result::Result<T, GordianError>;
