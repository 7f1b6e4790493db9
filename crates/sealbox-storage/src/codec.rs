//! Authenticated encryption of individual entries.
//!
//! Keys and values use two separate AEAD configurations derived from the root key:
//!
//! - keys are sealed deterministically (SIV construction: the AES-GCM nonce is an
//!   HMAC-SHA256 of the plaintext key), so equal keys produce equal ciphertexts and
//!   lookups never need to decrypt the whole store;
//! - values are sealed with AES-GCM under a fresh random nonce per write, with the
//!   encrypted key bound as associated data.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sealbox_core::error::StoreError;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::key_provider::RootKey;

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM nonce and synthetic IV length.
pub const NONCE_LEN: usize = 12;
/// AES-GCM tag length.
pub const TAG_LEN: usize = 16;

const HKDF_SALT: &[u8] = b"sealbox:root-key:v1";
const INFO_KEY_CIPHER: &[u8] = b"sealbox:key-cipher";
const INFO_KEY_SIV: &[u8] = b"sealbox:key-siv";
const INFO_VALUE_CIPHER: &[u8] = b"sealbox:value-cipher";
const KEY_AAD: &[u8] = b"sealbox:entry-key";

/// Entry codec bound to one root key. Immutable once built; safe to share.
pub struct Codec {
    key_cipher: Aes256Gcm,
    siv_key: Zeroizing<[u8; 32]>,
    value_cipher: Aes256Gcm,
}

impl Codec {
    pub fn new(root: &RootKey) -> Result<Self, StoreError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), root.as_bytes());
        let key_cipher = build_cipher(derive(&hk, INFO_KEY_CIPHER)?.as_slice())?;
        let value_cipher = build_cipher(derive(&hk, INFO_VALUE_CIPHER)?.as_slice())?;
        let siv_key = derive(&hk, INFO_KEY_SIV)?;

        Ok(Self {
            key_cipher,
            siv_key,
            value_cipher,
        })
    }

    /// Deterministically encrypt a plaintext key. Output is `siv || ciphertext || tag`.
    pub fn encrypt_key(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let siv = self.synthetic_iv(key.as_bytes())?;
        let ciphertext = self
            .key_cipher
            .encrypt(
                Nonce::from_slice(&siv),
                Payload {
                    msg: key.as_bytes(),
                    aad: KEY_AAD,
                },
            )
            .map_err(|e| encryption_failed("key", e))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&siv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Recover a plaintext key, verifying both the GCM tag and the synthetic IV.
    pub fn decrypt_key(&self, encrypted_key: &[u8]) -> Result<String, StoreError> {
        if encrypted_key.len() < NONCE_LEN + TAG_LEN {
            return Err(StoreError::tampered("encrypted key is truncated"));
        }
        let (siv, ciphertext) = encrypted_key.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.key_cipher
                .decrypt(
                    Nonce::from_slice(siv),
                    Payload {
                        msg: ciphertext,
                        aad: KEY_AAD,
                    },
                )
                .map_err(|_| StoreError::tampered("key authentication failed"))?,
        );

        self.siv_mac(&plaintext)?
            .verify_truncated_left(siv)
            .map_err(|_| StoreError::tampered("key synthetic IV mismatch"))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| StoreError::tampered("decrypted key is not valid UTF-8"))
    }

    /// Encrypt a value under a fresh random nonce. Returns `(ciphertext || tag, nonce)`.
    pub fn encrypt_value(
        &self,
        value: &str,
        encrypted_key: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), StoreError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .value_cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: value.as_bytes(),
                    aad: encrypted_key,
                },
            )
            .map_err(|e| encryption_failed("value", e))?;
        Ok((ciphertext, nonce.to_vec()))
    }

    /// Decrypt a value. Any authentication failure is `TamperedData`.
    pub fn decrypt_value(
        &self,
        encrypted_value: &[u8],
        nonce: &[u8],
        encrypted_key: &[u8],
    ) -> Result<String, StoreError> {
        if nonce.len() != NONCE_LEN {
            return Err(StoreError::tampered(format!(
                "expected {NONCE_LEN}-byte nonce, got {}",
                nonce.len()
            )));
        }

        let plaintext = self
            .value_cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: encrypted_value,
                    aad: encrypted_key,
                },
            )
            .map_err(|_| StoreError::tampered("value authentication failed"))?;

        String::from_utf8(plaintext)
            .map_err(|_| StoreError::tampered("decrypted value is not valid UTF-8"))
    }

    fn siv_mac(&self, plaintext: &[u8]) -> Result<HmacSha256, StoreError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.siv_key[..])
            .map_err(|e| StoreError::key_unavailable(format!("siv key init failed: {e}")))?;
        mac.update(plaintext);
        Ok(mac)
    }

    fn synthetic_iv(&self, plaintext: &[u8]) -> Result<[u8; NONCE_LEN], StoreError> {
        let tag = self.siv_mac(plaintext)?.finalize().into_bytes();
        let mut siv = [0u8; NONCE_LEN];
        siv.copy_from_slice(&tag[..NONCE_LEN]);
        Ok(siv)
    }
}

fn derive(hk: &Hkdf<Sha256>, info: &[u8]) -> Result<Zeroizing<[u8; 32]>, StoreError> {
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| StoreError::key_unavailable(format!("key derivation failed: {e}")))?;
    Ok(okm)
}

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm, StoreError> {
    <Aes256Gcm as KeyInit>::new_from_slice(key)
        .map_err(|e| StoreError::key_unavailable(format!("cipher init failed: {e}")))
}

/// AES-GCM only refuses to seal inputs past its length limit, so the pair is at fault.
fn encryption_failed(what: &str, err: aes_gcm::Error) -> StoreError {
    StoreError::invalid_pair(format!("{what} too large to encrypt: {err}"))
}

#[cfg(test)]
mod tests {
    use sealbox_core::error::ErrorKind;

    use super::*;

    fn codec(seed: u8) -> Codec {
        Codec::new(&RootKey::new("test", [seed; 32])).expect("codec")
    }

    #[test]
    fn key_encryption_is_deterministic() {
        let codec = codec(1);
        let first = codec.encrypt_key("user").unwrap();
        let second = codec.encrypt_key("user").unwrap();

        assert_eq!(first, second);
        assert_ne!(first, codec.encrypt_key("users").unwrap());
        assert_eq!(codec.decrypt_key(&first).unwrap(), "user");
    }

    #[test]
    fn value_ciphertext_does_not_open_as_a_key() {
        let codec = codec(1);
        let ek = codec.encrypt_key("user").unwrap();
        let (ev, nonce) = codec.encrypt_value("alice", &ek).unwrap();

        let mut as_key = nonce;
        as_key.extend_from_slice(&ev);
        assert_eq!(
            codec.decrypt_key(&as_key).unwrap_err().kind(),
            ErrorKind::TamperedData
        );
    }

    #[test]
    fn encryption_failure_is_reported_against_the_pair() {
        let err = encryption_failed("value", aes_gcm::Error);
        assert_eq!(err.kind(), ErrorKind::InvalidPair);
        assert_ne!(err.kind(), ErrorKind::PersistFailure);
        assert!(err.reason().starts_with("value too large to encrypt"));
    }

    #[test]
    fn key_encryption_depends_on_root_key() {
        assert_ne!(
            codec(1).encrypt_key("user").unwrap(),
            codec(2).encrypt_key("user").unwrap()
        );
    }

    #[test]
    fn value_encryption_uses_fresh_nonces() {
        let codec = codec(1);
        let ek = codec.encrypt_key("token").unwrap();
        let (c1, n1) = codec.encrypt_value("abc123", &ek).unwrap();
        let (c2, n2) = codec.encrypt_value("abc123", &ek).unwrap();

        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
        assert_eq!(codec.decrypt_value(&c1, &n1, &ek).unwrap(), "abc123");
        assert_eq!(codec.decrypt_value(&c2, &n2, &ek).unwrap(), "abc123");
    }

    #[test]
    fn flipped_value_bit_is_tampered() {
        let codec = codec(1);
        let ek = codec.encrypt_key("token").unwrap();
        let (mut ciphertext, nonce) = codec.encrypt_value("abc123", &ek).unwrap();
        ciphertext[0] ^= 0x01;

        let err = codec
            .decrypt_value(&ciphertext, &nonce, &ek)
            .expect_err("tampered value must not decrypt");
        assert_eq!(err.kind(), ErrorKind::TamperedData);
    }

    #[test]
    fn value_is_bound_to_its_key() {
        let codec = codec(1);
        let user = codec.encrypt_key("user").unwrap();
        let token = codec.encrypt_key("token").unwrap();
        let (ciphertext, nonce) = codec.encrypt_value("alice", &user).unwrap();

        let err = codec
            .decrypt_value(&ciphertext, &nonce, &token)
            .expect_err("value moved to another key must not decrypt");
        assert_eq!(err.kind(), ErrorKind::TamperedData);
    }

    #[test]
    fn bad_nonce_length_is_tampered() {
        let codec = codec(1);
        let ek = codec.encrypt_key("k").unwrap();
        let (ciphertext, _) = codec.encrypt_value("v", &ek).unwrap();
        let err = codec.decrypt_value(&ciphertext, &[0u8; 3], &ek).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TamperedData);
    }

    #[test]
    fn tampered_or_truncated_key_is_rejected() {
        let codec = codec(1);
        let mut ek = codec.encrypt_key("user").unwrap();
        ek[NONCE_LEN] ^= 0x80;
        assert_eq!(
            codec.decrypt_key(&ek).unwrap_err().kind(),
            ErrorKind::TamperedData
        );
        assert_eq!(
            codec.decrypt_key(&[0u8; 4]).unwrap_err().kind(),
            ErrorKind::TamperedData
        );
    }
}
