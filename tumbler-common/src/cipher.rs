//! Authenticated encryption for hop secrets at rest.
//!
//! Recovery records hold intermediate-address secrets encrypted with
//! AES-256-GCM. Decryption yields a zeroized buffer so the plaintext never
//! outlives the operation that needed it. Key management is external: the
//! key is handed in at construction.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Nonce length for AES-GCM (96 bits).
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: ciphertext rejected")]
    Decrypt,

    #[error("malformed ciphertext envelope: {0}")]
    Malformed(String),
}

/// Opaque ciphertext envelope: AEAD output plus the nonce it was sealed with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    #[serde(with = "base16")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base16")]
    pub nonce: Vec<u8>,
}

/// Authenticated-encryption collaborator for secret material at rest.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedSecret, CipherError>;

    /// Decrypts into a buffer that is zeroized on drop.
    fn decrypt(&self, secret: &EncryptedSecret) -> Result<Zeroizing<Vec<u8>>, CipherError>;
}

/// AES-256-GCM implementation of [`SecretCipher`].
pub struct AeadCipher {
    cipher: Aes256Gcm,
}

impl AeadCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }
}

impl SecretCipher for AeadCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedSecret, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::Encrypt)?;
        Ok(EncryptedSecret {
            ciphertext,
            nonce: nonce.to_vec(),
        })
    }

    fn decrypt(&self, secret: &EncryptedSecret) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        if secret.nonce.len() != NONCE_LEN {
            return Err(CipherError::Malformed(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                secret.nonce.len()
            )));
        }
        let nonce = Nonce::from_slice(&secret.nonce);
        let plaintext = self
            .cipher
            .decrypt(nonce, secret.ciphertext.as_slice())
            .map_err(|_| CipherError::Decrypt)?;
        Ok(Zeroizing::new(plaintext))
    }
}

mod base16 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
