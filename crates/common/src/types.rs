use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when an identifier is empty or only whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} must not be empty")]
pub struct InvalidId {
    /// Which identifier was rejected, e.g. `"student id"`.
    pub kind: &'static str,
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier, trimming surrounding whitespace.
            ///
            /// Fails if nothing is left after trimming.
            pub fn new(id: impl AsRef<str>) -> Result<Self, InvalidId> {
                let trimmed = id.as_ref().trim();
                if trimmed.is_empty() {
                    return Err(InvalidId { kind: $kind });
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidId;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
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
    };
}

string_id!(
    /// Student number, the primary key of a member record.
    StudentId,
    "student id"
);

string_id!(
    /// Catalog identifier of a book title.
    BookId,
    "book id"
);

/// Identifier of a ledger entry.
///
/// Assigned by the store in strictly increasing order, so a later borrow
/// always carries a larger id than an earlier one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LoanId(i64);

impl LoanId {
    /// Creates a loan id from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns the id that follows this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for LoanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
