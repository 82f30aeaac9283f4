//! Device fingerprint encryption for the `X-Xp-Forwarded-For` header.
//!
//! The key is `SHA-256(shared_secret || session_identifier)`. Every call to
//! [`FingerprintCipher::encrypt`] draws a fresh 96-bit nonce from the OS RNG,
//! and the output is `hex(nonce || ciphertext || tag)`.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CipherError;
use crate::utils::now_millis;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Smallest decodable input: a nonce and a tag around an empty plaintext.
pub const MIN_CIPHERTEXT_LEN: usize = NONCE_LEN + TAG_LEN;

/// Synthetic browser descriptor encrypted into the anti-bot header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintPayload {
    pub navigator_properties: NavigatorProperties,
    /// Unix timestamp in milliseconds.
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatorProperties {
    #[serde(with = "bool_string")]
    pub has_been_active: bool,
    pub user_agent: String,
    #[serde(with = "bool_string")]
    pub webdriver: bool,
}

impl FingerprintPayload {
    pub fn new(user_agent: impl Into<String>, active: bool, created_at: u64) -> Self {
        Self {
            navigator_properties: NavigatorProperties {
                has_been_active: active,
                user_agent: user_agent.into(),
                webdriver: false,
            },
            created_at,
        }
    }

    /// An active, non-webdriver fingerprint stamped with the current time.
    pub fn now(user_agent: impl Into<String>) -> Self {
        Self::new(user_agent, true, now_millis())
    }

    /// Canonical JSON encoding, fields in declaration order.
    pub fn to_canonical_json(&self) -> String {
        // Only strings, bools and integers: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// The web client encodes these booleans as the strings `"true"` / `"false"`.
mod bool_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match BoolOrString::deserialize(deserializer)? {
            BoolOrString::Bool(b) => Ok(b),
            BoolOrString::String(s) => s.parse::<bool>().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FingerprintCipher {
    shared_secret: String,
}

impl FingerprintCipher {
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
        }
    }

    pub fn derive_key(&self, session_identifier: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.shared_secret.as_bytes());
        hasher.update(session_identifier.as_bytes());
        hasher.finalize().into()
    }

    fn cipher(&self, session_identifier: &str) -> Aes256Gcm {
        let key = self.derive_key(session_identifier);
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
    }

    /// Encrypt arbitrary bytes under the key derived from `session_identifier`.
    pub fn encrypt_bytes(
        &self,
        plaintext: &[u8],
        session_identifier: &str,
    ) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher(session_identifier)
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::Encryption)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + sealed.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&sealed);
        Ok(hex::encode(combined))
    }

    pub fn encrypt(
        &self,
        payload: &FingerprintPayload,
        session_identifier: &str,
    ) -> Result<String, CipherError> {
        self.encrypt_bytes(payload.to_canonical_json().as_bytes(), session_identifier)
    }

    /// Decrypt a `hex(nonce || ciphertext || tag)` string.
    pub fn decrypt_bytes(
        &self,
        encoded: &str,
        session_identifier: &str,
    ) -> Result<Vec<u8>, CipherError> {
        let raw = hex::decode(encoded.trim())
            .map_err(|e| CipherError::Format(format!("invalid hex: {e}")))?;

        if raw.len() < MIN_CIPHERTEXT_LEN {
            return Err(CipherError::Format(format!(
                "{} bytes is shorter than nonce and tag ({MIN_CIPHERTEXT_LEN})",
                raw.len()
            )));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        self.cipher(session_identifier)
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Authentication)
    }

    pub fn decrypt(
        &self,
        encoded: &str,
        session_identifier: &str,
    ) -> Result<FingerprintPayload, CipherError> {
        let plaintext = self.decrypt_bytes(encoded, session_identifier)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| CipherError::Format(format!("payload is not a fingerprint: {e}")))
    }

    /// Fresh header value for one request.
    pub fn header_value(
        &self,
        user_agent: &str,
        session_identifier: &str,
    ) -> Result<String, CipherError> {
        self.encrypt(&FingerprintPayload::now(user_agent), session_identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0e6be1f1e21ffc33590b888fd4dc81b19713e570e805d4e5df80a493c9571a05";

    fn payload() -> FingerprintPayload {
        FingerprintPayload::new(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)",
            true,
            1750014202073,
        )
    }

    #[test]
    fn test_canonical_json_shape() {
        assert_eq!(
            payload().to_canonical_json(),
            r#"{"navigator_properties":{"hasBeenActive":"true","userAgent":"Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)","webdriver":"false"},"created_at":1750014202073}"#
        );
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let cipher = FingerprintCipher::new(SECRET);
        assert_eq!(cipher.derive_key("g1"), cipher.derive_key("g1"));
        assert_ne!(cipher.derive_key("g1"), cipher.derive_key("g2"));

        let expected: [u8; 32] = Sha256::digest(format!("{SECRET}g1").as_bytes()).into();
        assert_eq!(cipher.derive_key("g1"), expected);
    }

    #[test]
    fn test_round_trip() {
        let cipher = FingerprintCipher::new(SECRET);
        let encrypted = cipher.encrypt(&payload(), "v1%3A175001420207").unwrap();
        assert!(encrypted.chars().all(|c| c.is_ascii_hexdigit()));

        let decrypted = cipher.decrypt(&encrypted, "v1%3A175001420207").unwrap();
        assert_eq!(decrypted, payload());
    }

    #[test]
    fn test_output_length() {
        let cipher = FingerprintCipher::new(SECRET);
        let json = payload().to_canonical_json();
        let encrypted = cipher.encrypt(&payload(), "g1").unwrap();
        assert_eq!(encrypted.len(), 2 * (NONCE_LEN + json.len() + TAG_LEN));
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let cipher = FingerprintCipher::new(SECRET);
        let first = cipher.encrypt(&payload(), "g1").unwrap();
        let second = cipher.encrypt(&payload(), "g1").unwrap();
        assert_ne!(first, second);
        assert_ne!(first[..NONCE_LEN * 2], second[..NONCE_LEN * 2]);
    }

    #[test]
    fn test_short_input_is_format_error() {
        let cipher = FingerprintCipher::new(SECRET);
        for len in [0usize, 1, 12, 27] {
            let input = "00".repeat(len);
            assert!(
                matches!(cipher.decrypt_bytes(&input, "g1"), Err(CipherError::Format(_))),
                "{len} bytes should be rejected"
            );
        }
        assert!(matches!(
            cipher.decrypt_bytes("not hex", "g1"),
            Err(CipherError::Format(_))
        ));
    }

    #[test]
    fn test_wrong_identifier_fails_authentication() {
        let cipher = FingerprintCipher::new(SECRET);
        let encrypted = cipher.encrypt(&payload(), "g1").unwrap();
        assert_eq!(
            cipher.decrypt(&encrypted, "g2"),
            Err(CipherError::Authentication)
        );
    }

    #[test]
    fn test_tampered_tag_fails_authentication() {
        let cipher = FingerprintCipher::new(SECRET);
        let mut encrypted = cipher.encrypt(&payload(), "g1").unwrap();
        let last = encrypted.pop().unwrap();
        encrypted.push(if last == '0' { '1' } else { '0' });
        assert_eq!(
            cipher.decrypt_bytes(&encrypted, "g1"),
            Err(CipherError::Authentication)
        );
    }

    #[test]
    fn test_empty_plaintext_is_minimal_valid_input() {
        let cipher = FingerprintCipher::new(SECRET);
        let encrypted = cipher.encrypt_bytes(b"", "g1").unwrap();
        assert_eq!(encrypted.len(), MIN_CIPHERTEXT_LEN * 2);
        assert_eq!(cipher.decrypt_bytes(&encrypted, "g1").unwrap(), Vec::<u8>::new());
    }
}
