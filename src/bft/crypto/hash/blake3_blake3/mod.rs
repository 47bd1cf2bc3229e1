use crate::bft::crypto::hash::Digest;

/// An incremental `blake3` hashing context.
pub struct Context {
    inner: blake3::Hasher,
}

impl Context {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> Digest {
        let hash = self.inner.finalize();
        Digest::from_bytes_unchecked(hash.as_bytes())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
