//! Value obfuscation
//!
//! Stored values are XORed with a repeating 8-byte pad so that raw record
//! bytes (script fragments, hashes) do not appear verbatim on disk, where
//! they could trip virus scanners or similar tools.
//!
//! This is NOT encryption. The pad is stored in plain text next to the data
//! it masks and the transform is trivially reversible; it must never be
//! treated as a confidentiality boundary.
//!
//! The pad lives under the reserved empty key, which sorts before every
//! application key. It is chosen once, when a store is created with
//! obfuscation requested, and never changes until the store is wiped.

use std::fmt;

use rand::RngCore;

/// Length of the obfuscation pad in bytes
pub const OBFUSCATION_KEY_LEN: usize = 8;

/// Key of the record holding the pad. Application keys may not be empty.
pub const OBFUSCATION_KEY_RECORD: &[u8] = b"";

/// Repeating XOR pad applied to stored values
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ObfuscationKey([u8; OBFUSCATION_KEY_LEN]);

impl ObfuscationKey {
    /// The all-zero pad, which leaves values unchanged
    pub const IDENTITY: ObfuscationKey = ObfuscationKey([0u8; OBFUSCATION_KEY_LEN]);

    /// Wrap raw pad bytes
    pub fn new(bytes: [u8; OBFUSCATION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the pad as stored in the reserved record
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; OBFUSCATION_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Generate a random pad that is guaranteed not to be the identity
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = [0u8; OBFUSCATION_KEY_LEN];
            rng.fill_bytes(&mut bytes);
            let key = Self(bytes);
            if !key.is_identity() {
                return key;
            }
        }
    }

    /// True when the pad is all zero and values are stored verbatim
    pub fn is_identity(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Raw pad bytes
    pub fn as_bytes(&self) -> &[u8; OBFUSCATION_KEY_LEN] {
        &self.0
    }

    /// XOR `data` in place with the repeating pad.
    ///
    /// Applying it twice restores the input.
    pub fn apply(&self, data: &mut [u8]) {
        if self.is_identity() {
            return;
        }
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.0[i % OBFUSCATION_KEY_LEN];
        }
    }

    /// Hex rendering, used in log lines
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for ObfuscationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObfuscationKey({})", self.to_hex())
    }
}

impl fmt::Display for ObfuscationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
