/*!
Cipher adapters for save-file content.

The save-data core encrypts whole serialized documents through the [`Cipher`] port.
The reference implementation is AES in CBC mode with PKCS#7 padding, emitting Base64
text. It is deterministic for a fixed key and IV, which the core relies on to detect
unchanged content without rewriting the file.
*/

use base64::{engine::general_purpose::STANDARD, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::keys::KeyMaterial;
use crate::{Result, SaveError};

/// AES block size in bytes, which is also the required IV length
pub const BLOCK_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Cipher abstraction for save-file content
///
/// Implementations must be deterministic for identical key material and must fail
/// (rather than return garbage) whenever they can detect that the key material does
/// not match the ciphertext.
pub trait Cipher {
    /// Encrypt `plaintext` into a text-safe ciphertext
    fn encrypt(&self, plaintext: &str, keys: &KeyMaterial) -> Result<String>;

    /// Decrypt a ciphertext produced by [`Cipher::encrypt`]
    fn decrypt(&self, ciphertext: &str, keys: &KeyMaterial) -> Result<String>;
}

/// AES-CBC cipher with PKCS#7 padding and Base64 text encoding
///
/// The key length selects the AES variant (16, 24 or 32 bytes). The output is
/// byte-for-byte compatible with any other AES-CBC/PKCS#7 implementation.
///
/// # Example
/// ```rust
/// use keepsake_core::{AesCipher, Cipher, KeyMaterial};
///
/// let keys = KeyMaterial::generate(16);
/// let cipher = AesCipher::new();
/// let encrypted = cipher.encrypt("{\"Highscore\":42}", &keys)?;
/// assert!(!encrypted.starts_with('{'));
/// assert_eq!(cipher.decrypt(&encrypted, &keys)?, "{\"Highscore\":42}");
/// # Ok::<(), keepsake_core::SaveError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AesCipher;

impl AesCipher {
    pub fn new() -> Self {
        Self
    }

    /// Encrypt raw bytes with an explicit key and IV
    pub fn encrypt_bytes(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Err(SaveError::invalid_argument("plaintext must not be empty"));
        }
        check_key_iv(key, iv)?;

        let encrypted = match key.len() {
            16 => Aes128CbcEnc::new_from_slices(key, iv)
                .map_err(|e| SaveError::invalid_argument(e.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            24 => Aes192CbcEnc::new_from_slices(key, iv)
                .map_err(|e| SaveError::invalid_argument(e.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            32 => Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|e| SaveError::invalid_argument(e.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            other => return Err(unsupported_key_length(other)),
        };
        Ok(encrypted)
    }

    /// Decrypt raw bytes with an explicit key and IV
    pub fn decrypt_bytes(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() {
            return Err(SaveError::invalid_argument("ciphertext must not be empty"));
        }
        check_key_iv(key, iv)?;

        let decrypted = match key.len() {
            16 => Aes128CbcDec::new_from_slices(key, iv)
                .map_err(|e| SaveError::invalid_argument(e.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            24 => Aes192CbcDec::new_from_slices(key, iv)
                .map_err(|e| SaveError::invalid_argument(e.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            32 => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|e| SaveError::invalid_argument(e.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            other => return Err(unsupported_key_length(other)),
        };
        decrypted.map_err(|_| SaveError::decryption("invalid padding, wrong key/IV or corrupt data"))
    }
}

impl Cipher for AesCipher {
    fn encrypt(&self, plaintext: &str, keys: &KeyMaterial) -> Result<String> {
        let encrypted =
            Self::encrypt_bytes(plaintext.as_bytes(), &keys.key_bytes()?, &keys.iv_bytes()?)?;
        Ok(STANDARD.encode(encrypted))
    }

    fn decrypt(&self, ciphertext: &str, keys: &KeyMaterial) -> Result<String> {
        let raw = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| SaveError::decryption(format!("invalid base64: {e}")))?;
        let decrypted = Self::decrypt_bytes(&raw, &keys.key_bytes()?, &keys.iv_bytes()?)?;
        String::from_utf8(decrypted)
            .map_err(|e| SaveError::decryption(format!("decrypted content is not UTF-8: {e}")))
    }
}

fn check_key_iv(key: &[u8], iv: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(SaveError::invalid_argument("key must not be empty"));
    }
    if iv.is_empty() {
        return Err(SaveError::invalid_argument("IV must not be empty"));
    }
    if iv.len() != BLOCK_SIZE {
        return Err(SaveError::invalid_argument(format!(
            "IV must be {BLOCK_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    Ok(())
}

fn unsupported_key_length(len: usize) -> SaveError {
    SaveError::invalid_argument(format!(
        "unsupported key length {len}: expected 16, 24 or 32 bytes"
    ))
}
