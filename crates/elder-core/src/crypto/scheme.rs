use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::hash::hash_domain;
use crate::error::CoreError;

const ED25519_BLAKE3_CONTEXT: &str = "elder-quorum ed25519-blake3 message v1";

/// Identifier of a signature scheme a key was generated for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    /// Plain Ed25519 over the message bytes
    #[default]
    Ed25519,
    /// Ed25519 over a domain-separated Blake3 digest of the message
    Ed25519Blake3,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 2] =
        [SignatureAlgorithm::Ed25519, SignatureAlgorithm::Ed25519Blake3];

    /// Stable tag used in key-id derivation and display
    pub fn tag(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Ed25519 => "ed25519",
            SignatureAlgorithm::Ed25519Blake3 => "ed25519-blake3",
        }
    }

    /// Classical security level in bits
    pub fn security_bits(&self) -> u16 {
        match self {
            SignatureAlgorithm::Ed25519 | SignatureAlgorithm::Ed25519Blake3 => 128,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignatureAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.tag() == s)
            .ok_or_else(|| CoreError::UnknownAlgorithm(s.to_string()))
    }
}

/// Capability interface every signature scheme implements.
///
/// Callers never branch on the algorithm; they look the scheme up with
/// [`scheme_for`] and go through this trait, so adding a scheme (for example a
/// post-quantum one) means one new implementation and one enum variant.
pub trait SignatureScheme: Send + Sync {
    fn algorithm(&self) -> SignatureAlgorithm;

    fn public_key_size(&self) -> usize;

    fn signature_size(&self) -> usize;

    /// Generate a fresh keypair, returning `(secret, public)`
    fn generate(&self) -> (Zeroizing<Vec<u8>>, Vec<u8>);

    /// Derive the public key for a secret
    fn public_key(&self, secret: &[u8]) -> Result<Vec<u8>, CoreError>;

    fn sign(&self, secret: &[u8], message: &[u8]) -> Result<Vec<u8>, CoreError>;

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8])
        -> Result<(), CoreError>;
}

/// Look up the implementation for an algorithm
pub fn scheme_for(algorithm: SignatureAlgorithm) -> &'static dyn SignatureScheme {
    match algorithm {
        SignatureAlgorithm::Ed25519 => &Ed25519Scheme,
        SignatureAlgorithm::Ed25519Blake3 => &Ed25519Blake3Scheme,
    }
}

fn signing_key(secret: &[u8]) -> Result<SigningKey, CoreError> {
    let seed: Zeroizing<[u8; 32]> =
        Zeroizing::new(secret.try_into().map_err(|_| CoreError::InvalidSecretKey)?);
    Ok(SigningKey::from_bytes(&seed))
}

fn verifying_key(public_key: &[u8]) -> Result<VerifyingKey, CoreError> {
    let bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| CoreError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| CoreError::InvalidPublicKey)
}

fn dalek_signature(signature: &[u8]) -> Result<DalekSignature, CoreError> {
    let bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| CoreError::InvalidSignature)?;
    Ok(DalekSignature::from_bytes(&bytes))
}

fn generate_ed25519() -> (Zeroizing<Vec<u8>>, Vec<u8>) {
    let key = SigningKey::generate(&mut OsRng);
    let secret = Zeroizing::new(key.to_bytes().to_vec());
    (secret, key.verifying_key().to_bytes().to_vec())
}

/// Ed25519 (RFC 8032) over the raw message
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519
    }

    fn public_key_size(&self) -> usize {
        32
    }

    fn signature_size(&self) -> usize {
        64
    }

    fn generate(&self) -> (Zeroizing<Vec<u8>>, Vec<u8>) {
        generate_ed25519()
    }

    fn public_key(&self, secret: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(signing_key(secret)?.verifying_key().to_bytes().to_vec())
    }

    fn sign(&self, secret: &[u8], message: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(signing_key(secret)?.sign(message).to_bytes().to_vec())
    }

    fn verify(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CoreError> {
        verifying_key(public_key)?
            .verify(message, &dalek_signature(signature)?)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

/// Ed25519 over `blake3_derive(context, message)`.
///
/// Messages are compressed to a fixed 32-byte digest before signing, so the
/// signer never needs the full payload in the signing boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Blake3Scheme;

impl Ed25519Blake3Scheme {
    fn digest(message: &[u8]) -> [u8; 32] {
        *hash_domain(ED25519_BLAKE3_CONTEXT, &[message]).as_bytes()
    }
}

impl SignatureScheme for Ed25519Blake3Scheme {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519Blake3
    }

    fn public_key_size(&self) -> usize {
        32
    }

    fn signature_size(&self) -> usize {
        64
    }

    fn generate(&self) -> (Zeroizing<Vec<u8>>, Vec<u8>) {
        generate_ed25519()
    }

    fn public_key(&self, secret: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(signing_key(secret)?.verifying_key().to_bytes().to_vec())
    }

    fn sign(&self, secret: &[u8], message: &[u8]) -> Result<Vec<u8>, CoreError> {
        let digest = Self::digest(message);
        Ok(signing_key(secret)?.sign(&digest).to_bytes().to_vec())
    }

    fn verify(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CoreError> {
        let digest = Self::digest(message);
        verifying_key(public_key)?
            .verify(&digest, &dalek_signature(signature)?)
            .map_err(|_| CoreError::InvalidSignature)
    }
}
