//! AES-256-CBC field encryption with OpenSSL-compatible salted key derivation
//!
//! Output format: base64("Salted__" ++ salt(8) ++ ciphertext), the same blob
//! `openssl enc -aes-256-cbc -md md5` produces.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Version tag attached to snippets encrypted with this scheme
pub const ENCRYPTION_VERSION: u8 = 1;

const SALT_MAGIC: &[u8; 8] = b"Salted__";
const SALT_LENGTH: usize = 8;
const KEY_LENGTH: usize = 32;
const IV_LENGTH: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Random number generation failed: {0}")]
    RngFailed(String),

    #[error("Invalid base64 input: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Encrypted data is missing the Salted__ header")]
    MissingSaltHeader,

    #[error("Cipher initialisation failed: {0}")]
    InvalidKeyMaterial(String),

    #[error("Decryption failed: bad password or corrupted data")]
    DecryptionFailed,

    #[error("Decrypted data is not valid UTF-8")]
    InvalidUtf8,
}

/// Derive the cipher key and IV from a password and salt.
///
/// Repeats `digest = MD5(previous_digest ++ password ++ salt)` and concatenates
/// the digests until 48 bytes exist: bytes 0..32 are the key, 32..48 the IV.
pub fn derive_key_iv(password: &[u8], salt: &[u8]) -> ([u8; KEY_LENGTH], [u8; IV_LENGTH]) {
    let mut derived = Vec::with_capacity(KEY_LENGTH + IV_LENGTH + 16);
    let mut digest: Vec<u8> = Vec::new();

    while derived.len() < KEY_LENGTH + IV_LENGTH {
        let mut hasher = Md5::new();
        hasher.update(&digest);
        hasher.update(password);
        hasher.update(salt);
        digest = hasher.finalize().to_vec();
        derived.extend_from_slice(&digest);
    }

    let mut key = [0u8; KEY_LENGTH];
    let mut iv = [0u8; IV_LENGTH];
    key.copy_from_slice(&derived[..KEY_LENGTH]);
    iv.copy_from_slice(&derived[KEY_LENGTH..KEY_LENGTH + IV_LENGTH]);
    (key, iv)
}

/// Encrypt `plaintext` under `password` with a fresh random salt.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<String, CryptoError> {
    let mut salt = [0u8; SALT_LENGTH];
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    encrypt_with_salt(plaintext, password, &salt)
}

fn encrypt_with_salt(
    plaintext: &[u8],
    password: &str,
    salt: &[u8; SALT_LENGTH],
) -> Result<String, CryptoError> {
    let (key, iv) = derive_key_iv(password.as_bytes(), salt);
    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(SALT_MAGIC.len() + SALT_LENGTH + ciphertext.len());
    blob.extend_from_slice(SALT_MAGIC);
    blob.extend_from_slice(salt);
    blob.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(blob))
}

/// Decrypt a blob produced by [`encrypt`] (or by `openssl enc -md md5`).
///
/// The salt is read back from the header, so this is the exact inverse of
/// the encryption path.
pub fn decrypt(encoded: &str, password: &str) -> Result<Vec<u8>, CryptoError> {
    let blob = STANDARD.decode(encoded.trim())?;
    if blob.len() < SALT_MAGIC.len() + SALT_LENGTH || &blob[..SALT_MAGIC.len()] != SALT_MAGIC {
        return Err(CryptoError::MissingSaltHeader);
    }

    let salt = &blob[SALT_MAGIC.len()..SALT_MAGIC.len() + SALT_LENGTH];
    let ciphertext = &blob[SALT_MAGIC.len() + SALT_LENGTH..];

    let (key, iv) = derive_key_iv(password.as_bytes(), salt);
    let cipher = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// [`decrypt`] and interpret the plaintext as UTF-8.
pub fn decrypt_to_string(encoded: &str, password: &str) -> Result<String, CryptoError> {
    String::from_utf8(decrypt(encoded, password)?).map_err(|_| CryptoError::InvalidUtf8)
}
