//! Keystream obfuscation for tunnel traffic
//!
//! This module provides:
//! - [`Method`]: cipher selection by configuration tag (rc4, chacha20, none)
//! - [`CipherStream`]: one direction's keystream cursor, applied in place
//!
//! Key material is derived deterministically from the shared secret with
//! HKDF-SHA256, so two tunnel instances configured with the same secret and
//! method produce identical keystreams. Applying the same keystream position
//! a second time recovers the original bytes, which is what lets a single
//! code path serve both encrypt and decrypt.
//!
//! This is traffic obfuscation, not authenticated encryption: no key
//! exchange, no integrity, no replay protection.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use rc4::{consts::U32, Key as Rc4Key, KeyInit, Rc4};
use ring::hkdf::{self, Salt, HKDF_SHA256};
use thiserror::Error;

/// Length of a derived cipher key in bytes
pub const KEY_LEN: usize = 32;

/// Length of a derived stream nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Cipher errors
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("unknown cipher method: {0}")]
    UnknownMethod(String),

    #[error("key derivation failed")]
    KeyDerivation,
}

/// Cipher method, identified by its configuration tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// RC4 keystream, the historical default
    Rc4,
    /// ChaCha20 keystream
    ChaCha20,
    /// No-op passthrough, for tests and unencrypted relays
    Plain,
}

impl Method {
    /// Parse a method tag.
    ///
    /// Unknown tags fail here, at configuration time, before any socket is
    /// touched.
    pub fn from_name(name: &str) -> Result<Self, CipherError> {
        match name.to_ascii_lowercase().as_str() {
            "rc4" => Ok(Method::Rc4),
            "chacha20" => Ok(Method::ChaCha20),
            "none" => Ok(Method::Plain),
            _ => Err(CipherError::UnknownMethod(name.to_string())),
        }
    }

    /// The configuration tag for this method
    pub fn name(&self) -> &'static str {
        match self {
            Method::Rc4 => "rc4",
            Method::ChaCha20 => "chacha20",
            Method::Plain => "none",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

enum Keystream {
    Rc4(Rc4<U32>),
    ChaCha20(ChaCha20),
    Plain,
}

/// One direction's keystream cursor.
///
/// Each direction of a connection pair owns its own instance. The cursor
/// advances with every byte processed and is never reset or shared; sharing
/// one cursor across the two directions of a connection would corrupt both
/// streams under concurrent writes.
pub struct CipherStream {
    keystream: Keystream,
}

impl CipherStream {
    /// Build a keystream seeded from the shared secret.
    pub fn new(method: Method, secret: &str) -> Result<Self, CipherError> {
        let keystream = match method {
            Method::Plain => Keystream::Plain,
            Method::Rc4 => {
                let (key, _) = derive_key_material(secret)?;
                Keystream::Rc4(Rc4::new(Rc4Key::<U32>::from_slice(&key)))
            }
            Method::ChaCha20 => {
                let (key, nonce) = derive_key_material(secret)?;
                Keystream::ChaCha20(ChaCha20::new(&key.into(), &nonce.into()))
            }
        };
        Ok(Self { keystream })
    }

    /// Build the two independent per-direction instances for one connection
    /// pair. Both start at cursor zero over the same derived keystream.
    pub fn pair(method: Method, secret: &str) -> Result<(Self, Self), CipherError> {
        Ok((Self::new(method, secret)?, Self::new(method, secret)?))
    }

    /// Apply the keystream to `data` in place, advancing the cursor by
    /// `data.len()`. Self-inverse: applying the same cursor range twice
    /// yields the original bytes.
    pub fn apply(&mut self, data: &mut [u8]) {
        match &mut self.keystream {
            Keystream::Rc4(cipher) => cipher.apply_keystream(data),
            Keystream::ChaCha20(cipher) => cipher.apply_keystream(data),
            Keystream::Plain => {}
        }
    }
}

/// Derive `(key, nonce)` for a keystream from the shared secret.
fn derive_key_material(secret: &str) -> Result<([u8; KEY_LEN], [u8; NONCE_LEN]), CipherError> {
    let salt = Salt::new(HKDF_SHA256, &[0u8; 32]);
    let prk = salt.extract(secret.as_bytes());

    let mut key = [0u8; KEY_LEN];
    expand(&prk, b"veil_tunnel_stream_key", &mut key)?;

    let mut nonce = [0u8; NONCE_LEN];
    expand(&prk, b"veil_tunnel_stream_nonce", &mut nonce)?;

    Ok((key, nonce))
}

fn expand(prk: &hkdf::Prk, info: &[u8], output: &mut [u8]) -> Result<(), CipherError> {
    let info_refs = [info];
    prk.expand(&info_refs, HkdfLen(output.len()))
        .and_then(|okm| okm.fill(output))
        .map_err(|_| CipherError::KeyDerivation)
}

/// Helper struct for HKDF output length
struct HkdfLen(usize);

impl hkdf::KeyType for HkdfLen {
    fn len(&self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_tags() {
        assert_eq!(Method::from_name("rc4").unwrap(), Method::Rc4);
        assert_eq!(Method::from_name("ChaCha20").unwrap(), Method::ChaCha20);
        assert_eq!(Method::from_name("none").unwrap(), Method::Plain);
        assert!(matches!(
            Method::from_name("aes-256-gcm"),
            Err(CipherError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        for method in [Method::Rc4, Method::ChaCha20] {
            let mut data = b"attack at dawn".to_vec();

            let mut encrypt = CipherStream::new(method, "secret").unwrap();
            encrypt.apply(&mut data);
            assert_ne!(&data, b"attack at dawn", "{method} left plaintext on the wire");

            let mut decrypt = CipherStream::new(method, "secret").unwrap();
            decrypt.apply(&mut data);
            assert_eq!(&data, b"attack at dawn");
        }
    }

    #[test]
    fn test_none_is_passthrough() {
        let mut data = b"hello".to_vec();
        let mut cipher = CipherStream::new(Method::Plain, "x").unwrap();
        cipher.apply(&mut data);
        assert_eq!(&data, b"hello");
    }

    #[test]
    fn test_cursor_advances_across_chunks() {
        // One instance fed two chunks must produce the same ciphertext as a
        // fresh instance fed the concatenation.
        let plaintext = b"0123456789abcdef";

        let mut whole = plaintext.to_vec();
        CipherStream::new(Method::Rc4, "k").unwrap().apply(&mut whole);

        let mut chunked = plaintext.to_vec();
        let mut cipher = CipherStream::new(Method::Rc4, "k").unwrap();
        let (head, tail) = chunked.split_at_mut(7);
        cipher.apply(head);
        cipher.apply(tail);

        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_keystream_depends_on_secret() {
        let mut a = b"payload".to_vec();
        let mut b = b"payload".to_vec();
        CipherStream::new(Method::ChaCha20, "alpha").unwrap().apply(&mut a);
        CipherStream::new(Method::ChaCha20, "bravo").unwrap().apply(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_pair_cursors_are_independent() {
        let (mut forward, mut reverse) = CipherStream::pair(Method::Rc4, "s").unwrap();

        // Advance the forward cursor only.
        let mut burn = vec![0u8; 100];
        forward.apply(&mut burn);

        // The reverse cursor is still at zero: it must decrypt a fresh
        // encryption from position zero.
        let mut data = b"independent".to_vec();
        CipherStream::new(Method::Rc4, "s").unwrap().apply(&mut data);
        reverse.apply(&mut data);
        assert_eq!(&data, b"independent");
    }
}
