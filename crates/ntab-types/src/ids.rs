use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Shared parsing rule for every identifier: non-empty, no path separators,
/// and no whitespace unless `spaces` allows it between other characters.
fn validate(kind: &'static str, value: &str, spaces: bool) -> Result<(), TypeError> {
    if value.is_empty() {
        return Err(TypeError::Empty { kind });
    }
    let rejected = if spaces {
        value.trim() != value || value.chars().any(|c| c.is_whitespace() && c != ' ')
    } else {
        value.chars().any(char::is_whitespace)
    };
    if rejected {
        return Err(TypeError::Invalid {
            kind,
            value: value.to_string(),
            reason: "whitespace",
        });
    }
    if value.contains('/') {
        return Err(TypeError::Invalid {
            kind,
            value: value.to_string(),
            reason: "a path separator",
        });
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal, spaces = $spaces:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and validate an identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
                let value = value.into();
                validate($kind, &value, $spaces)?;
                Ok(Self(value))
            }

            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = TypeError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Content address of an immutable blob.
    ///
    /// The format is owned by the content store that issued it: a CID for an
    /// IPFS node, a hex BLAKE3 hash for the in-memory store. Identical content
    /// always yields the same digest within one store.
    Digest,
    "digest",
    spaces = false
);

string_id!(
    /// Resolvable public name owned by a naming key.
    ///
    /// Publishing repoints the name to a new [`Digest`]; resolving it returns
    /// the most recent digest whose publish has propagated.
    NamePointer,
    "name pointer",
    spaces = false
);

string_id!(
    /// Stable identifier of a table. Immutable after creation.
    ///
    /// Generated ids are UUIDs. Older registries used the display name as
    /// the id, so inner spaces are accepted.
    TableId,
    "table id",
    spaces = true
);

impl Digest {
    /// Compute the BLAKE3 content address of raw bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }

    /// Short representation (first 8 characters), for logs.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl NamePointer {
    /// Derive a deterministic pointer from a key name. Used by in-process
    /// name services that have no real key material.
    pub fn derive(key_name: &str) -> Self {
        let hash = blake3::hash(key_name.as_bytes());
        Self(format!("k{}", hex::encode(&hash.as_bytes()[..16])))
    }
}

impl TableId {
    /// Generate a fresh, time-ordered table identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}
