//! Hash primitives and the opaque digest type.
//!
//! The replica automaton never hashes anything itself; it emits `Hash`
//! actions and consumes the digests the host computed. The `Context`
//! defined here is what hosts (and the test engine) use to service
//! those actions, with the backend selected by a cargo feature. All
//! replicas of one deployment must agree on the backend, or batch and
//! request digests will never match.

use std::fmt;

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::bft::error::*;

#[cfg(feature = "crypto_hash_blake3_blake3")]
mod blake3_blake3;

#[cfg(all(
    feature = "crypto_hash_ring_sha2",
    not(feature = "crypto_hash_blake3_blake3")
))]
mod ring_sha2;

#[cfg(feature = "crypto_hash_blake3_blake3")]
pub use blake3_blake3::Context;

#[cfg(all(
    feature = "crypto_hash_ring_sha2",
    not(feature = "crypto_hash_blake3_blake3")
))]
pub use ring_sha2::Context;

/// An opaque digest, as produced by the host's hasher.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Digest([u8; Digest::LENGTH]);

impl Digest {
    /// The length of a `Digest`, in bytes.
    pub const LENGTH: usize = 32;

    /// Constructs a `Digest` from a byte buffer of appropriate size.
    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        if raw_bytes.len() < Self::LENGTH {
            return Err("Digest has an invalid length").wrapped(ErrorKind::CryptoHash);
        }
        Ok(Self::from_bytes_unchecked(raw_bytes))
    }

    pub(super) fn from_bytes_unchecked(raw_bytes: &[u8]) -> Self {
        let mut inner = [0; Self::LENGTH];
        inner.copy_from_slice(&raw_bytes[..Self::LENGTH]);
        Self(inner)
    }

    /// Returns the first eight bytes of the digest as a
    /// little endian integer.
    ///
    /// Used to partition requests across bucket residue classes.
    pub fn prefix_u64(&self) -> u64 {
        let mut prefix = [0; 8];
        prefix.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(prefix)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

/// Hashes an iterator of byte chunks into a single `Digest`.
pub fn digest_chunks<'a, I>(chunks: I) -> Digest
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut ctx = Context::new();
    for chunk in chunks {
        ctx.update(chunk);
    }
    ctx.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_length() {
        let err = Digest::from_bytes(&[0; 16][..]);
        assert!(err.is_err());
        let ok = Digest::from_bytes(&[0; 64][..]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_digest_chunks_associativity() {
        // chunk boundaries must not influence the digest
        let one = digest_chunks([&b"ab"[..], &b"cd"[..]]);
        let other = digest_chunks([&b"abcd"[..]]);
        assert_eq!(one, other);
    }

    #[test]
    fn test_prefix_is_stable() {
        let digest = digest_chunks([&b"hello"[..]]);
        assert_eq!(digest.prefix_u64(), digest.prefix_u64());
    }
}
