use super::arc4::StreamCipher;
use super::bignum::BigInt;
use super::digest::{HmacDigest, HmacSha1};
use crate::error::CryptoError;

const ENCRYPTION_KEY: [u8; 16] = [
    0xC2, 0xB3, 0x72, 0x3C, 0xC6, 0xAE, 0xD9, 0xB5, 0x34, 0x3C, 0x53, 0xEE, 0x2F, 0x43, 0x67,
    0xCE,
];

const DECRYPTION_KEY: [u8; 16] = [
    0xCC, 0x98, 0xAE, 0x04, 0xE8, 0x97, 0xEA, 0xCA, 0x12, 0xDD, 0xC0, 0x93, 0x42, 0x91, 0x53,
    0x57,
];

const KEYSTREAM_DROP: usize = 1024;

/// World-session header crypt. Passes bytes through until `init` runs.
#[derive(Debug, Default)]
pub struct SessionCrypt {
    ciphers: Option<Ciphers>,
}

#[derive(Debug)]
struct Ciphers {
    send: StreamCipher,
    recv: StreamCipher,
}

impl SessionCrypt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys the client side from the 40-byte session key.
    pub fn init(&mut self, session_key: &BigInt) -> Result<(), CryptoError> {
        self.ciphers = Some(Ciphers {
            send: keyed_cipher(&ENCRYPTION_KEY, session_key)?,
            recv: keyed_cipher(&DECRYPTION_KEY, session_key)?,
        });
        Ok(())
    }

    /// Keys the server side: what the client sends we receive, and vice versa.
    pub fn init_server(&mut self, session_key: &BigInt) -> Result<(), CryptoError> {
        self.ciphers = Some(Ciphers {
            send: keyed_cipher(&DECRYPTION_KEY, session_key)?,
            recv: keyed_cipher(&ENCRYPTION_KEY, session_key)?,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.ciphers.is_some()
    }

    pub fn encrypt_send(&mut self, data: &mut [u8]) {
        if let Some(ciphers) = self.ciphers.as_mut() {
            ciphers.send.apply(data);
        }
    }

    pub fn decrypt_recv(&mut self, data: &mut [u8]) {
        if let Some(ciphers) = self.ciphers.as_mut() {
            ciphers.recv.apply(data);
        }
    }
}

fn keyed_cipher(seed: &[u8], session_key: &BigInt) -> Result<StreamCipher, CryptoError> {
    let key = HmacDigest::<HmacSha1>::new(seed).compute_hash(session_key);
    let mut cipher = StreamCipher::new(&key)?;
    cipher.drop_keystream(KEYSTREAM_DROP);
    Ok(cipher)
}
