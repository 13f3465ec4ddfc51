//! Security profile parameters used at factory construction time.

use serde::{Deserialize, Serialize};

use crate::error::{GordianError, Result};
use crate::idspec::GordianKeyLength;

/// Upper bound on keyset cipher steps
pub const MAX_CIPHER_STEPS: u8 = 8;

/// Default number of keyset cipher steps
pub const DEFAULT_CIPHER_STEPS: u8 = 3;

/// Default PBKDF2 iteration count for password-derived lock keys
pub const DEFAULT_LOCK_ITERATIONS: u32 = 100_000;

/// Configuration describing a security profile.
///
/// Immutable once constructed, and serializable so two parties can
/// exchange the parameters and build interoperable factories from the
/// same description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GordianParameters {
    key_length: GordianKeyLength,
    cipher_steps: u8,
    lock_iterations: u32,
}

impl GordianParameters {
    /// Build a profile, validating the step count and iteration floor.
    pub fn new(
        key_length: GordianKeyLength,
        cipher_steps: u8,
        lock_iterations: u32,
    ) -> Result<Self> {
        if cipher_steps == 0 || cipher_steps > MAX_CIPHER_STEPS {
            return Err(GordianError::Logic(format!(
                "cipher_steps must be 1..={MAX_CIPHER_STEPS}, got {cipher_steps}"
            )));
        }
        if lock_iterations == 0 {
            return Err(GordianError::Logic(
                "lock_iterations must be positive".to_string(),
            ));
        }
        Ok(Self {
            key_length,
            cipher_steps,
            lock_iterations,
        })
    }

    pub fn key_length(&self) -> GordianKeyLength {
        self.key_length
    }

    pub fn cipher_steps(&self) -> u8 {
        self.cipher_steps
    }

    pub fn lock_iterations(&self) -> u32 {
        self.lock_iterations
    }
}

impl Default for GordianParameters {
    fn default() -> Self {
        Self {
            key_length: GordianKeyLength::Len256,
            cipher_steps: DEFAULT_CIPHER_STEPS,
            lock_iterations: DEFAULT_LOCK_ITERATIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_steps() {
        assert!(GordianParameters::new(GordianKeyLength::Len256, 0, 1000).is_err());
        assert!(GordianParameters::new(GordianKeyLength::Len256, 9, 1000).is_err());
        assert!(GordianParameters::new(GordianKeyLength::Len256, 4, 1000).is_ok());
    }

    #[test]
    fn parameters_round_trip_through_serialization() {
        let params = GordianParameters::default();
        let bytes = bincode::serialize(&params).unwrap();
        let back: GordianParameters = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, params);
    }
}
