//! Node and network identifiers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a member node ID in hex characters.
pub const NODE_ID_LEN: usize = 10;

/// Length of a network ID in hex characters.
pub const NETWORK_ID_LEN: usize = 16;

/// Identifier parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Wrong number of characters.
    #[error("expected {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },

    /// A character outside `[0-9a-fA-F]`.
    #[error("non-hex character {0:?}")]
    NonHex(char),
}

fn check_hex(s: &str, expected: usize) -> Result<(), IdError> {
    if let Some(c) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(IdError::NonHex(c));
    }
    // chars are ASCII from here on, so byte length == char count
    if s.len() != expected {
        return Err(IdError::Length {
            expected,
            actual: s.len(),
        });
    }
    Ok(())
}

/// True if `s` is exactly 10 hex characters.
pub fn is_node_id(s: &str) -> bool {
    check_hex(s, NODE_ID_LEN).is_ok()
}

/// True if `s` is exactly 16 hex characters.
pub fn is_network_id(s: &str) -> bool {
    check_hex(s, NETWORK_ID_LEN).is_ok()
}

/// A 10-character hex member node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Parse and validate a node ID.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        check_hex(s, NODE_ID_LEN)?;
        Ok(Self(s.to_string()))
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A 16-character hex virtual network identifier.
///
/// Controller-issued network IDs start with the 10-character ID of the
/// controller node that owns them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkId(String);

impl NetworkId {
    /// Parse and validate a network ID.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        check_hex(s, NETWORK_ID_LEN)?;
        Ok(Self(s.to_string()))
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! id_conversions {
    ($ty:ident) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = IdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> String {
                id.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_conversions!(NodeId);
id_conversions!(NetworkId);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn node_id_examples() {
        assert!(NodeId::parse("deadbeef00").is_ok());
        assert_eq!(
            NodeId::parse("deadbeef0"),
            Err(IdError::Length { expected: 10, actual: 9 })
        );
        assert_eq!(NodeId::parse("deadbeeh00"), Err(IdError::NonHex('h')));
    }

    #[test]
    fn network_id_examples() {
        assert!(NetworkId::parse("7ac4235ec5d3d938").is_ok());
        assert!(NetworkId::parse("02beefdead").is_err());
    }

    #[test]
    fn serde_rejects_bad_ids() {
        let ok: NodeId = serde_json::from_str("\"02beefdead\"").unwrap();
        assert_eq!(ok.as_str(), "02beefdead");
        assert!(serde_json::from_str::<NodeId>("\"02beefdea\"").is_err());
    }

    proptest! {
        #[test]
        fn any_ten_hex_chars_is_a_node_id(s in "[0-9a-fA-F]{10}") {
            prop_assert!(is_node_id(&s));
        }

        #[test]
        fn wrong_length_is_never_a_node_id(s in "[0-9a-f]{0,9}|[0-9a-f]{11,20}") {
            prop_assert!(!is_node_id(&s));
        }

        #[test]
        fn non_hex_char_is_never_a_node_id(
            head in "[0-9a-f]{4}",
            bad in "[g-zG-Z_ -]",
            tail in "[0-9a-f]{5}",
        ) {
            let s = format!("{head}{bad}{tail}");
            prop_assert!(!is_node_id(&s));
        }
    }
}
