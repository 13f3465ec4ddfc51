//! Reversible obfuscation of algorithm specs into persisted integers.
//!
//! Persisted records never store a spec's enum ordinals directly; they
//! store the output of [`KnuthObfuscater`], a bijective integer transform
//! salted by a caller-supplied adjustment. The transform is Knuth's
//! multiplicative scheme: the interior word is XOR-masked with a value
//! mixed from the adjustment, then multiplied by an odd constant modulo
//! 2^32. Because the multiplier is odd it has a modular inverse, so the
//! mapping is invertible in closed form and injective over the whole
//! `u32` domain (hence over every spec category).

use crate::error::{GordianError, Result};
use crate::idspec::IdSpec;

/// Knuth's 32-bit golden-ratio multiplier (odd, hence invertible mod 2^32)
const KNUTH_MULTIPLIER: u32 = 0x9E37_79B1;

/// Modular inverse of [`KNUTH_MULTIPLIER`] modulo 2^32
const KNUTH_INVERSE: u32 = 0x0E8B_2F51;

/// Bit position of the category code inside the interior word
const CATEGORY_SHIFT: u32 = 8;

/// Maps an [`IdSpec`] to an obfuscated external id and back.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnuthObfuscater;

impl KnuthObfuscater {
    pub fn new() -> Self {
        Self
    }

    /// Obfuscate a spec with a zero adjustment.
    pub fn external_id(&self, spec: &IdSpec) -> Result<i32> {
        self.external_id_with_adjustment(spec, 0)
    }

    /// Obfuscate a spec, salted by `adjustment`.
    ///
    /// Fails with `Logic` if the spec is not part of its category's
    /// enumerated domain (an invalid algorithm/length combination).
    pub fn external_id_with_adjustment(&self, spec: &IdSpec, adjustment: i32) -> Result<i32> {
        let ordinal = spec.ordinal().ok_or_else(|| {
            GordianError::Logic(format!("spec {spec:?} has no ordinal in its category"))
        })?;
        // Ordinal is offset by one so an all-zero interior word never occurs.
        let interior = ((spec.category() as u32) << CATEGORY_SHIFT) | (ordinal + 1);
        let masked = interior ^ Self::mask(adjustment);
        Ok(masked.wrapping_mul(KNUTH_MULTIPLIER) as i32)
    }

    /// Resolve an external id produced with a zero adjustment.
    pub fn spec_from_external_id(&self, id: i32) -> Result<IdSpec> {
        self.spec_from_external_id_with_adjustment(id, 0)
    }

    /// Exact inverse of [`KnuthObfuscater::external_id_with_adjustment`]
    /// for the same adjustment.
    ///
    /// Fails with `Logic` if the recovered interior word does not name a
    /// known category/ordinal, which is how corrupt or foreign data
    /// surfaces here.
    pub fn spec_from_external_id_with_adjustment(
        &self,
        id: i32,
        adjustment: i32,
    ) -> Result<IdSpec> {
        let interior = (id as u32).wrapping_mul(KNUTH_INVERSE) ^ Self::mask(adjustment);
        let category = interior >> CATEGORY_SHIFT;
        let offset_ordinal = interior & ((1 << CATEGORY_SHIFT) - 1);
        if category > u8::MAX as u32 || offset_ordinal == 0 {
            return Err(GordianError::Logic(format!(
                "external id {id} does not resolve under adjustment {adjustment}"
            )));
        }
        IdSpec::from_category_ordinal(category as u8, offset_ordinal - 1).ok_or_else(|| {
            GordianError::Logic(format!(
                "external id {id} names unknown category {category} / ordinal {offset_ordinal} \
                 under adjustment {adjustment}"
            ))
        })
    }

    // Splitmix-style mixing so adjacent adjustments produce unrelated masks.
    fn mask(adjustment: i32) -> u32 {
        let mut m = adjustment as u32;
        m = (m ^ (m >> 16)).wrapping_mul(0x85EB_CA6B);
        m = (m ^ (m >> 13)).wrapping_mul(0xC2B2_AE35);
        m ^ (m >> 16)
    }
}
