use std::fmt::{self, Display, Formatter};

use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::Config;
use crate::model::common::election::{ElectionId, VoterId};

pub type HmacSha256 = Hmac<Sha256>;

/// The anonymised identifier sent to the ledger in place of the voter's
/// identity. Hex-encoded HMAC output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterToken(String);

impl VoterToken {
    pub fn new(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VoterToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&VoterToken> for Bson {
    fn from(token: &VoterToken) -> Self {
        to_bson(token).expect("Serialisation is infallible")
    }
}

/// Derives ledger tokens from (voter, election) pairs.
///
/// Derivation is a keyed one-way function: the same pair always maps to the
/// same token (so a resubmission after an ambiguous outcome presents the
/// same token, and the ledger can deduplicate on it), while an observer
/// without the key cannot connect a token back to a voter.
#[derive(Clone)]
pub struct TokenHasher {
    secret: Vec<u8>,
}

impl TokenHasher {
    pub fn new(config: &Config) -> Self {
        Self::from_secret(config.hmac_secret())
    }

    fn from_secret(secret: &[u8]) -> Self {
        Self {
            secret: secret.to_vec(),
        }
    }

    /// Derive the ledger token for the given pair.
    pub fn derive(&self, voter_id: VoterId, election_id: ElectionId) -> VoterToken {
        let mut hmac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        hmac.update(&voter_id.to_le_bytes());
        hmac.update(&election_id.to_le_bytes());
        VoterToken(HEXLOWER.encode(&hmac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let hasher = TokenHasher::from_secret(b"an example secret");
        assert_eq!(hasher.derive(42, 1), hasher.derive(42, 1));
    }

    #[test]
    fn tokens_differ_between_pairs() {
        let hasher = TokenHasher::from_secret(b"an example secret");
        let token = hasher.derive(42, 1);
        assert_ne!(token, hasher.derive(42, 2));
        assert_ne!(token, hasher.derive(43, 1));
    }

    #[test]
    fn tokens_differ_between_secrets() {
        let first = TokenHasher::from_secret(b"an example secret");
        let second = TokenHasher::from_secret(b"a different secret");
        assert_ne!(first.derive(42, 1), second.derive(42, 1));
    }

    #[test]
    fn tokens_do_not_expose_the_inputs() {
        let hasher = TokenHasher::from_secret(b"an example secret");
        let token = hasher.derive(42, 1).to_string();
        // 32 bytes of HMAC-SHA256 output, hex encoded.
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
