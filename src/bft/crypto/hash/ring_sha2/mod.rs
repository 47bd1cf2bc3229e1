use ring::digest::{self, SHA256};

use crate::bft::crypto::hash::Digest;

/// An incremental SHA-256 hashing context, backed by `ring`.
pub struct Context {
    inner: digest::Context,
}

impl Context {
    pub fn new() -> Self {
        Self {
            inner: digest::Context::new(&SHA256),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> Digest {
        let hash = self.inner.finish();
        Digest::from_bytes_unchecked(hash.as_ref())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
