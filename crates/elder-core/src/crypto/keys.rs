use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::crypto::hash::hash_domain;
use crate::crypto::scheme::{scheme_for, SignatureAlgorithm};
use crate::error::CoreError;

const KEY_ID_CONTEXT: &str = "elder-quorum key-id v1";

/// Identifier of a key, derived from its algorithm and public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub [u8; 16]);

impl KeyId {
    /// Derive the id for a public key. Two algorithms sharing a public key
    /// encoding still get distinct ids.
    pub fn derive(algorithm: SignatureAlgorithm, public_key: &[u8]) -> Self {
        let digest = hash_domain(KEY_ID_CONTEXT, &[algorithm.tag().as_bytes(), public_key]);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest.as_bytes()[..16]);
        KeyId(id)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s)?;
        let id: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::InvalidKeyId(s.to_string()))?;
        Ok(KeyId(id))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.to_hex())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Hex string form so key ids can be JSON map keys.
impl Serialize for KeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        KeyId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A standalone signing identity (revocation authority, list issuer).
///
/// Elder keys never take this form; they live encrypted in the key store and
/// are only decrypted inside the signer. Not serializable to prevent
/// accidental exposure.
pub struct SigningIdentity {
    algorithm: SignatureAlgorithm,
    secret: Zeroizing<Vec<u8>>,
    public_key: Vec<u8>,
}

impl SigningIdentity {
    /// Generate a new random identity
    pub fn generate(algorithm: SignatureAlgorithm) -> Self {
        let (secret, public_key) = scheme_for(algorithm).generate();
        SigningIdentity {
            algorithm,
            secret,
            public_key,
        }
    }

    /// Restore from raw secret bytes
    pub fn from_secret(algorithm: SignatureAlgorithm, secret: &[u8]) -> Result<Self, CoreError> {
        let public_key = scheme_for(algorithm).public_key(secret)?;
        Ok(SigningIdentity {
            algorithm,
            secret: Zeroizing::new(secret.to_vec()),
            public_key,
        })
    }

    /// Restore from a hex-encoded secret
    pub fn from_secret_hex(algorithm: SignatureAlgorithm, s: &str) -> Result<Self, CoreError> {
        let bytes = Zeroizing::new(hex::decode(s.trim())?);
        Self::from_secret(algorithm, &bytes)
    }

    /// Export the secret as hex (use with caution)
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.secret.as_slice()))
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn key_id(&self) -> KeyId {
        KeyId::derive(self.algorithm, &self.public_key)
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CoreError> {
        scheme_for(self.algorithm).sign(&self.secret, message)
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("algorithm", &self.algorithm)
            .field("public_key", &hex::encode(&self.public_key))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
