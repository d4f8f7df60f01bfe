//! Canonical conversation identity.
//!
//! A conversation between two participants has no owning row; its identity is
//! derived from the pair itself. The key is the two participant ids sorted
//! into a total order and joined with `:`, so `key(a, b) == key(b, a)` and
//! any holder of both ids can address the thread.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::AppError;

const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("both participants are the same user")]
    InvalidPairing,

    /// The value is a single opaque identifier, not a pair. Recoverable:
    /// callers can resolve it against message history.
    #[error("value is a single opaque identifier, not a participant pair")]
    Ambiguous,

    #[error("value does not split into two participant ids")]
    Malformed,
}

impl From<KeyError> for AppError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::InvalidPairing => AppError::InvalidPairing(err.to_string()),
            KeyError::Ambiguous => AppError::AmbiguousKey(err.to_string()),
            KeyError::Malformed => AppError::MalformedKey(err.to_string()),
        }
    }
}

/// Order-independent identifier for a two-participant conversation.
///
/// Internally stores the pair in canonical (sorted) order; the wire form is
/// `"{lo}:{hi}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    lo: Uuid,
    hi: Uuid,
}

impl ConversationKey {
    /// Derives the canonical key for an unordered pair of participants.
    /// Pure and total for any two distinct ids.
    pub fn canonical(a: Uuid, b: Uuid) -> Result<Self, KeyError> {
        if a == b {
            return Err(KeyError::InvalidPairing);
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { lo, hi })
    }

    /// Parses a wire-form key.
    ///
    /// A bare UUID carries no separator and is classified [`KeyError::Ambiguous`]
    /// rather than rejected outright: it may be a legacy peer-id reference the
    /// caller can recover through resolve-by-history. Everything else that is
    /// not exactly two distinct UUIDs is [`KeyError::Malformed`].
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        match parts.as_slice() {
            [single] => {
                if Uuid::parse_str(single).is_ok() {
                    Err(KeyError::Ambiguous)
                } else {
                    Err(KeyError::Malformed)
                }
            }
            [first, second] => {
                let a = Uuid::parse_str(first).map_err(|_| KeyError::Malformed)?;
                let b = Uuid::parse_str(second).map_err(|_| KeyError::Malformed)?;
                Self::canonical(a, b).map_err(|_| KeyError::InvalidPairing)
            }
            _ => Err(KeyError::Malformed),
        }
    }

    pub fn participants(&self) -> (Uuid, Uuid) {
        (self.lo, self.hi)
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.lo == user_id || self.hi == user_id
    }

    /// The other endpoint of the conversation, if `user_id` is a participant.
    pub fn peer_of(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.lo {
            Some(self.hi)
        } else if user_id == self.hi {
            Some(self.lo)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.lo, SEPARATOR, self.hi)
    }
}

impl Serialize for ConversationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConversationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = ConversationKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a conversation key of the form \"<uuid>:<uuid>\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                ConversationKey::parse(v).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(KeyVisitor)
    }
}
