//! Opaque string identifiers for overlay nodes.
//!
//! A [PeerId] doubles as the node's rendezvous (directory) address: the
//! directory maps registered ids to live relay channels.

use std::fmt;
use std::str::FromStr;

use rand::{self, Rng};

/// Opaque unique identifier of a node in the overlay.
///
/// Well-known rendezvous ids travel with the rendezvous role during a
/// hand-off, so the configured id set stays stable while the nodes behind
/// the ids change.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Serialize, Deserialize, Default)]
pub struct PeerId(String);

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, crate::Error> {
        if s.is_empty() {
            return Err(crate::Error::PeerParseError);
        }
        Ok(PeerId(s.to_owned()))
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

impl PeerId {
    pub fn new(s: impl Into<String>) -> Self {
        PeerId(s.into())
    }

    /// Generate a fresh random id (hex of 16 random bytes).
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 16] = rng.gen();
        PeerId(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn parse_rejects_empty() {
        assert!("".parse::<PeerId>().is_err());
        let id: PeerId = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert_eq!(id.as_str(), "550e8400-e29b-41d4-a716-446655440000");
    }
}
