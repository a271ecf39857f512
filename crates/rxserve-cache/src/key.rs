//! Cache keys and invalidation patterns.

use std::fmt;

/// A validated cache key.
///
/// Keys are drawn from the alphabet `[A-Za-z0-9:_-]` and are namespaced
/// per deployment by the cache service before they reach a store, so two
/// deployments sharing one remote instance cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

/// A key or pattern was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("cache key is empty")]
    Empty,
    #[error("cache key contains forbidden character {0:?}")]
    ForbiddenCharacter(char),
    #[error("wildcard is only allowed as the final character")]
    MisplacedWildcard,
}

fn check_alphabet(raw: &str) -> Result<(), KeyError> {
    if raw.is_empty() {
        return Err(KeyError::Empty);
    }
    for c in raw.chars() {
        if !(c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-') {
            return Err(KeyError::ForbiddenCharacter(c));
        }
    }
    Ok(())
}

impl CacheKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, KeyError> {
        let raw = raw.into();
        check_alphabet(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An invalidation target: an exact key or a trailing-wildcard prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    Exact(CacheKey),
    Prefix(String),
}

impl KeyPattern {
    /// Parses `"orders:all"` as an exact key and `"orders:paged:*"` as a
    /// prefix pattern. The wildcard may only close the pattern.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        match raw.strip_suffix('*') {
            Some(prefix) => {
                if prefix.contains('*') {
                    return Err(KeyError::MisplacedWildcard);
                }
                check_alphabet(prefix)?;
                Ok(KeyPattern::Prefix(prefix.to_string()))
            }
            None => {
                if raw.contains('*') {
                    return Err(KeyError::MisplacedWildcard);
                }
                Ok(KeyPattern::Exact(CacheKey::new(raw)?))
            }
        }
    }

    /// The literal string used as a lock key for this pattern.
    pub fn lock_key(&self) -> String {
        match self {
            KeyPattern::Exact(key) => key.as_str().to_string(),
            KeyPattern::Prefix(prefix) => format!("{prefix}*"),
        }
    }

    /// Whether the pattern covers a concrete key.
    pub fn covers(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(exact) => exact.as_str() == key,
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Exact(key) => f.write_str(key.as_str()),
            KeyPattern::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}
