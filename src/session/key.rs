use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque session identifier.
///
/// Keys double as the access token for the media and subscriber channels, so
/// they are generated from a random v4 UUID (122 bits of entropy) and never
/// derived from anything a client chooses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap a key received from a client. No validation: unknown keys simply miss in the registry.
    pub fn from_string(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_keys_are_unique_hex() {
        let keys: HashSet<SessionKey> = (0..1000).map(|_| SessionKey::generate()).collect();
        assert_eq!(keys.len(), 1000);
        for key in keys {
            assert_eq!(key.as_str().len(), 32);
            assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let key = SessionKey::from_string("abc");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"abc\"");
    }
}
