pub mod elder;
pub mod header;
pub mod key;
pub mod revocation;
pub mod signature;

pub use elder::{ElderId, ElderIdentity};
pub use header::{CanonicalHeader, HEADER_MAGIC};
pub use key::{EncryptedBlob, KeyRecord, KeyStatus};
pub use revocation::{
    revocation_payload, AuthorizationSignature, RevocationAuthorization, RevocationEntry,
};
pub use signature::{signing_payload, IndividualSignature, QuorumSignature};
