//! Source identifiers

/// Unique identifier for an upstream source (its connection URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey(String);

impl SourceKey {
    /// Create a new source key
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// The underlying URL
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceKey {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for SourceKey {
    fn from(url: String) -> Self {
        Self(url)
    }
}
