//! Identifier types shared across the pipeline
//!
//! All identifiers arrive from the reasoning engine as plain strings, so each
//! newtype is `#[serde(transparent)]` and converts freely from `&str`/`String`.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Long-lived conversation identifier
    SessionId
);

string_id!(
    /// One request/response turn within a session
    ExchangeId
);

string_id!(
    /// One streamed rewrite of a file region
    EditRequestId
);

impl ExchangeId {
    /// Generate a fresh exchange id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Registry key for an open response stream
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub session_id: SessionId,
    pub exchange_id: ExchangeId,
}

impl StreamKey {
    pub fn new(session_id: impl Into<SessionId>, exchange_id: impl Into<ExchangeId>) -> Self {
        Self {
            session_id: session_id.into(),
            exchange_id: exchange_id.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.session_id, self.exchange_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_display() {
        let key = StreamKey::new("s1", "e1");
        assert_eq!(key.to_string(), "s1-e1");
    }

    #[test]
    fn test_ids_are_transparent_on_the_wire() {
        let id: SessionId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.as_str(), "abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    #[test]
    fn test_generated_exchange_ids_differ() {
        assert_ne!(ExchangeId::generate(), ExchangeId::generate());
    }
}
