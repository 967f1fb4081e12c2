use std::fmt::{Debug, Formatter};

use crate::error::CryptoError;

/// RC4-compatible keyed byte stream. `apply` both encrypts and decrypts.
pub struct StreamCipher {
    i: u8,
    j: u8,
    state: [u8; 256],
}

impl StreamCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let mut cipher = Self {
            i: 0,
            j: 0,
            state: [0u8; 256],
        };
        cipher.init(key)?;
        Ok(cipher)
    }

    /// Re-keys, discarding all previous keystream state.
    pub fn init(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }

        for (i, x) in self.state.iter_mut().enumerate() {
            *x = i as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(self.state[i]).wrapping_add(key[i % key.len()]);
            self.state.swap(i, j as usize);
        }
        self.i = 0;
        self.j = 0;
        Ok(())
    }

    fn next(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.state[self.i as usize]);
        self.state.swap(self.i as usize, self.j as usize);
        self.state[(self.state[self.i as usize].wrapping_add(self.state[self.j as usize])) as usize]
    }

    pub fn apply(&mut self, data: &mut [u8]) {
        for x in data.iter_mut() {
            *x ^= self.next();
        }
    }

    /// Advances the keystream by `count` bytes.
    pub fn drop_keystream(&mut self, count: usize) {
        for _ in 0..count {
            self.next();
        }
    }
}

impl Debug for StreamCipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamCipher")
    }
}
