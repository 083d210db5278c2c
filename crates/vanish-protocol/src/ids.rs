//! Opaque identifiers supplied by clients.
//!
//! Identity providers hand out numeric ids while other clients send strings,
//! so both forms are accepted on the wire and normalized to a string.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Unsigned(n) => n.to_string(),
            RawId::Signed(n) => n.to_string(),
        }
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an id from anything string-like.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the id is empty or whitespace only.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                RawId::deserialize(deserializer).map(|raw| Self(raw.into_string()))
            }
        }
    };
}

opaque_id!(
    /// An already-authenticated user identifier from the identity provider.
    UserId
);

opaque_id!(
    /// A caller-supplied message identifier, unique within a room.
    MessageId
);
