//! Newtype identifiers for the entities named in the data model (§3).
//!
//! Plain `String` wrappers, mirroring how the teacher codebase keeps ids as
//! opaque owned strings rather than reaching for a dedicated id crate.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(SessionId);
string_id!(TenantId);
string_id!(LearnerId);
string_id!(AgentId);
string_id!(TurnId);

impl TurnId {
    /// Mint a fresh random turn id, the same way the node gateway mints a
    /// `session_id` for each connected node.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
