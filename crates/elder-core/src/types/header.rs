use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, Hash};
use crate::error::CoreError;

/// Magic prefix of the canonical header encoding
pub const HEADER_MAGIC: &[u8; 4] = b"EQH1";

/// The block-header fields Elders attest to.
///
/// Signing and verification never touch this struct directly; they operate
/// on [`CanonicalHeader::to_canonical_bytes`]. The layout is fixed by hand
/// (big-endian integers, length-prefixed strings) so no serializer upgrade
/// can change what was signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalHeader {
    /// Block index, also the height used to pin the registry snapshot
    pub index: u64,
    /// Hash of the previous block
    pub previous_hash: Hash,
    /// Merkle / commitment root of the block contents
    pub commitment_root: Hash,
    /// Unix timestamp (ms)
    pub timestamp: u64,
    /// Identity of the proposer
    pub proposer_id: String,
    pub nonce: u64,
    /// Difficulty or weight
    pub difficulty: u64,
}

impl CanonicalHeader {
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let proposer = self.proposer_id.as_bytes();
        let mut out = Vec::with_capacity(4 + 8 + 32 + 32 + 8 + 4 + proposer.len() + 16);
        out.extend_from_slice(HEADER_MAGIC);
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(self.previous_hash.as_bytes());
        out.extend_from_slice(self.commitment_root.as_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&(proposer.len() as u32).to_be_bytes());
        out.extend_from_slice(proposer);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.difficulty.to_be_bytes());
        out
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let mut reader = Reader { bytes, pos: 0 };

        if reader.take(4)? != HEADER_MAGIC {
            return Err(CoreError::MalformedHeader("bad magic".to_string()));
        }
        let index = reader.u64()?;
        let previous_hash = reader.hash()?;
        let commitment_root = reader.hash()?;
        let timestamp = reader.u64()?;
        let proposer_len = reader.u32()? as usize;
        let proposer_id = String::from_utf8(reader.take(proposer_len)?.to_vec())
            .map_err(|_| CoreError::MalformedHeader("proposer id is not utf-8".to_string()))?;
        let nonce = reader.u64()?;
        let difficulty = reader.u64()?;

        if reader.pos != bytes.len() {
            return Err(CoreError::MalformedHeader(format!(
                "{} trailing bytes",
                bytes.len() - reader.pos
            )));
        }

        Ok(CanonicalHeader {
            index,
            previous_hash,
            commitment_root,
            timestamp,
            proposer_id,
            nonce,
            difficulty,
        })
    }

    /// Hash of the canonical bytes
    pub fn hash(&self) -> Hash {
        hash_blake3(&self.to_canonical_bytes())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CoreError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CoreError::MalformedHeader("truncated".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> Result<u64, CoreError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn u32(&mut self) -> Result<u32, CoreError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn hash(&mut self) -> Result<Hash, CoreError> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(self.take(32)?);
        Ok(Hash(buf))
    }
}
