//! Identifier newtypes.
//!
//! Ids are restricted to ASCII letters, digits, `-`, `_` and `.` so they can
//! be used verbatim as file names and joined with reserved separators
//! (`/` for paths, `!` for cache keys) without escaping.

use crate::error::{DfsError, DfsResult};
use minicbor::{Decode, Decoder, Encode, Encoder, decode, encode};
use std::{fmt, str::FromStr};

const MAX_ID_LEN: usize = 255;

fn validate_id(id: &str, what: &str) -> DfsResult<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(DfsError::InvalidArgument(format!(
            "{what} must be between 1 and {MAX_ID_LEN} bytes long"
        )));
    }
    if id == "." || id == ".." {
        return Err(DfsError::InvalidArgument(format!("{what} '{id}' is reserved")));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(DfsError::InvalidArgument(format!(
            "{what} '{id}' contains invalid character {c:?}"
        )));
    }
    Ok(())
}

macro_rules! string_id {
    ($name:ident, $what:literal) => {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> DfsResult<Self> {
                let id = id.into();
                validate_id(&id, $what)?;
                Ok(Self(id))
            }

            /// Creates a fresh random (UUIDv4) id.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = DfsError;

            fn from_str(s: &str) -> DfsResult<Self> {
                Self::new(s)
            }
        }

        impl<C> Encode<C> for $name {
            fn encode<W: encode::Write>(
                &self,
                e: &mut Encoder<W>,
                _ctx: &mut C,
            ) -> Result<(), encode::Error<W::Error>> {
                e.str(&self.0)?;
                Ok(())
            }
        }

        impl<'b, C> Decode<'b, C> for $name {
            fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, decode::Error> {
                let id = d.str()?;
                validate_id(id, $what).map_err(|e| decode::Error::message(e.to_string()))?;
                Ok(Self(id.to_owned()))
            }
        }
    };
}

string_id!(SpaceId, "space id");
string_id!(NodeId, "node id");
string_id!(BlobId, "blob id");

impl NodeId {
    /// The root node of a space shares the space's id.
    pub fn space_root(space_id: &SpaceId) -> Self {
        Self(space_id.0.clone())
    }
}

/// Splits an id into `depth` directory levels of `width` characters,
/// keeping the remainder as the last path segment.
///
/// `pathify("4c510ada-c86b", 4, 2)` yields `4c/51/0a/da/-c86b`.
pub fn pathify(id: &str, depth: usize, width: usize) -> String {
    let mut out = String::with_capacity(id.len() + depth);
    let mut i = 0;
    while i < depth {
        if id.len() <= i * width + width {
            break;
        }
        out.push_str(&id[i * width..i * width + width]);
        out.push('/');
        i += 1;
    }
    out.push_str(&id[i * width..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pathify_splits_into_levels() {
        assert_eq!(
            pathify("4c510ada-c86b-4815", 4, 2),
            "4c/51/0a/da/-c86b-4815"
        );
        assert_eq!(pathify("space1", 4, 2), "sp/ac/e1");
        assert_eq!(pathify("ab", 4, 2), "ab");
    }

    #[test]
    fn decoding_validates_ids() {
        let bytes = minicbor::to_vec(NodeId::new("node-1").unwrap()).unwrap();
        let id: NodeId = minicbor::decode(&bytes).unwrap();
        assert_eq!(id.as_str(), "node-1");

        for bad in ["../etc", "a!b", ""] {
            let bytes = minicbor::to_vec(bad).unwrap();
            assert!(minicbor::decode::<SpaceId>(&bytes).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn ids_reject_separators() {
        assert!(NodeId::new("a/b").is_err());
        assert!(NodeId::new("a!b").is_err());
        assert!(SpaceId::new("").is_err());
        assert!(SpaceId::new("..").is_err());
        assert!(NodeId::new("node-1_x.y").is_ok());
    }

    #[test]
    fn generated_ids_are_valid() {
        let id = NodeId::generate();
        assert!(NodeId::new(id.as_str()).is_ok());
        assert_ne!(id, NodeId::generate());
    }
}
