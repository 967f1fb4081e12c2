use std::borrow::Cow;
use std::marker::PhantomData;

use hmacsha::HmacSha;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use super::bignum::{BigInt, Endian};

pub const SHA1_DIGEST_LENGTH: usize = 20;

/// Anything that can be fed to a digest.
///
/// Big numbers contribute their minimal little-endian export, the byte order
/// they travel in; zero contributes nothing.
pub trait DigestInput {
    fn digest_bytes(&self) -> Cow<'_, [u8]>;
}

impl DigestInput for [u8] {
    fn digest_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl<const N: usize> DigestInput for [u8; N] {
    fn digest_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl DigestInput for Vec<u8> {
    fn digest_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl DigestInput for str {
    fn digest_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl DigestInput for String {
    fn digest_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl DigestInput for u8 {
    fn digest_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Owned(vec![*self])
    }
}

impl DigestInput for BigInt {
    fn digest_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Owned(self.to_bytes(0, Endian::Little))
    }
}

/// Streaming SHA-1 state.
#[derive(Clone, Default)]
pub struct Sha1Context {
    hasher: Sha1,
    digest: [u8; SHA1_DIGEST_LENGTH],
}

impl Sha1Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards anything fed since the last finalize.
    pub fn initialize(&mut self) {
        self.hasher = Sha1::new();
    }

    pub fn update<T: DigestInput + ?Sized>(&mut self, input: &T) -> &mut Self {
        self.hasher.update(input.digest_bytes());
        self
    }

    pub fn update_bignums(&mut self, values: &[&BigInt]) -> &mut Self {
        for value in values {
            self.update(*value);
        }
        self
    }

    /// Completes the hash and leaves the context ready for reuse.
    pub fn finalize(&mut self) -> [u8; SHA1_DIGEST_LENGTH] {
        self.digest.copy_from_slice(&self.hasher.finalize_reset());
        self.digest
    }

    /// Last finalized digest.
    pub fn digest(&self) -> [u8; SHA1_DIGEST_LENGTH] {
        self.digest
    }
}

impl std::fmt::Debug for Sha1Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sha1Context")
    }
}

/// Type-level HMAC algorithm selection.
pub trait HmacAlgorithm {
    type Output: AsRef<[u8]> + AsMut<[u8]> + Default + Copy;

    fn mac(key: &[u8], message: &[u8]) -> Vec<u8>;
}

#[derive(Debug, Clone, Copy)]
pub struct HmacSha1;

#[derive(Debug, Clone, Copy)]
pub struct HmacSha256;

impl HmacAlgorithm for HmacSha1 {
    type Output = [u8; 20];

    fn mac(key: &[u8], message: &[u8]) -> Vec<u8> {
        HmacSha::new(key, message, Sha1::default())
            .compute_digest()
            .to_vec()
    }
}

impl HmacAlgorithm for HmacSha256 {
    type Output = [u8; 32];

    fn mac(key: &[u8], message: &[u8]) -> Vec<u8> {
        HmacSha::new(key, message, Sha256::default())
            .compute_digest()
            .to_vec()
    }
}

/// Keyed HMAC over whatever has been fed since construction.
pub struct HmacDigest<A: HmacAlgorithm> {
    key: Vec<u8>,
    message: Vec<u8>,
    digest: A::Output,
    _algorithm: PhantomData<A>,
}

impl<A: HmacAlgorithm> HmacDigest<A> {
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            message: Vec::new(),
            digest: A::Output::default(),
            _algorithm: PhantomData,
        }
    }

    pub fn update<T: DigestInput + ?Sized>(&mut self, input: &T) -> &mut Self {
        self.message.extend_from_slice(&input.digest_bytes());
        self
    }

    pub fn finalize(&mut self) -> A::Output {
        let mac = A::mac(&self.key, &self.message);
        let out = self.digest.as_mut();
        let len = out.len().min(mac.len());
        out[..len].copy_from_slice(&mac[..len]);
        self.message.clear();
        self.digest
    }

    pub fn compute_hash(&mut self, value: &BigInt) -> A::Output {
        self.update(value);
        self.finalize()
    }

    pub fn digest(&self) -> A::Output {
        self.digest
    }
}
