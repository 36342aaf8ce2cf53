//! Canonical service names.
//!
//! A [`ServiceName`] is an immutable, hashable, ordered dotted path. Two
//! names are equal iff their segment sequences are equal.

use std::fmt;
use std::sync::Arc;

/// A canonical dotted-path service identity.
///
/// Cheap to clone: segments are stored behind an `Arc<[String]>` and shared
/// between every clone, the same sharing discipline the registry uses for
/// its storage handle.
///
/// # Examples
///
/// ```rust
/// use service_container::ServiceName;
///
/// let name = ServiceName::parse("app.database.pool");
/// assert_eq!(name.to_string(), "app.database.pool");
///
/// let child = ServiceName::parse("app.database").child("pool");
/// assert_eq!(name, child);
/// ```
#[derive(Clone)]
pub struct ServiceName {
    segments: Arc<[String]>,
}

impl ServiceName {
    /// Build a name from explicit segments.
    #[inline]
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a dotted path such as `"app.database.pool"` into a `ServiceName`.
    ///
    /// An empty string parses to a name with a single empty segment; callers
    /// that want a true empty name should use [`ServiceName::new`] with an
    /// empty iterator.
    #[inline]
    pub fn parse(dotted: &str) -> Self {
        Self::new(dotted.split('.'))
    }

    /// The segments making up this name.
    #[inline]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Build a new name by appending one more segment.
    #[inline]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments: Vec<String> = self.segments.iter().cloned().collect();
        segments.push(segment.into());
        Self::new(segments)
    }

    /// The last segment, i.e. the "simple name" (used in log messages).
    #[inline]
    pub fn simple_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceName({self})")
    }
}

impl PartialEq for ServiceName {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for ServiceName {}

impl std::hash::Hash for ServiceName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl PartialOrd for ServiceName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl From<&str> for ServiceName {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for ServiceName {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_through_display() {
        let name = ServiceName::parse("a.b.c");
        assert_eq!(name.to_string(), "a.b.c");
        assert_eq!(name.segments(), &["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn equality_is_segment_wise() {
        assert_eq!(ServiceName::parse("a.b"), ServiceName::new(["a", "b"]));
        assert_ne!(ServiceName::parse("a.b"), ServiceName::parse("a.c"));
    }

    #[test]
    fn child_appends_a_segment() {
        let parent = ServiceName::parse("app.database");
        assert_eq!(parent.child("pool"), ServiceName::parse("app.database.pool"));
    }

    #[test]
    fn ordering_is_lexicographic_by_segment() {
        assert!(ServiceName::parse("a.a") < ServiceName::parse("a.b"));
        assert!(ServiceName::parse("a") < ServiceName::parse("a.b"));
    }

    #[test]
    fn simple_name_is_last_segment() {
        assert_eq!(ServiceName::parse("app.database.pool").simple_name(), "pool");
    }

    #[test]
    fn clone_is_cheap_and_shares_segments() {
        let name = ServiceName::parse("app.database.pool");
        let cloned = name.clone();
        assert_eq!(name, cloned);
    }
}
