//! Cache key construction.
//!
//! Keys are colon-delimited: a namespace prefix, then fixed segments,
//! then named parameters as `name:value` pairs. Keeping construction in
//! one place means invalidation patterns (`products:list:*`) stay in
//! sync with the keys that reads produce.

use std::fmt;

/// Builder for colon-delimited cache keys.
///
/// ```
/// use stockade_cache::CacheKey;
///
/// let key = CacheKey::new("products")
///     .segment("list")
///     .param("skip", 0)
///     .param("limit", 10)
///     .build();
/// assert_eq!(key, "products:list:skip:0:limit:10");
/// ```
#[derive(Debug, Clone)]
pub struct CacheKey {
    parts: Vec<String>,
}

impl CacheKey {
    /// Start a key under the given namespace prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            parts: vec![prefix.into()],
        }
    }

    /// Append a fixed segment.
    pub fn segment(mut self, part: impl fmt::Display) -> Self {
        self.parts.push(part.to_string());
        self
    }

    /// Append a named `name:value` parameter pair.
    pub fn param(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.parts.push(name.to_string());
        self.parts.push(value.to_string());
        self
    }

    /// Render the finished key.
    pub fn build(self) -> String {
        self.parts.join(":")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join(":"))
    }
}
