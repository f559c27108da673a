use std::fmt;
use std::sync::Arc;

/// Logical identity of a monitored link: the exporter that owns the
/// interface plus the interface index on that exporter.
///
/// The key is independent of which collector reported the sample, so
/// the same interface seen through two collectors resolves to one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceKey {
    /// Exporter identifier (typically its address).
    pub exporter: Arc<str>,
    /// Interface index on the exporter.
    pub ifindex: u32,
}

impl InterfaceKey {
    /// Creates a key from an exporter identifier and interface index.
    pub fn new(exporter: impl Into<Arc<str>>, ifindex: u32) -> Self {
        Self {
            exporter: exporter.into(),
            ifindex,
        }
    }
}

impl fmt::Display for InterfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exporter, self.ifindex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_as_map_key() {
        let mut map: HashMap<InterfaceKey, u32> = HashMap::new();
        let key = InterfaceKey::new("10.0.0.1", 3);
        map.insert(key.clone(), 42);
        assert_eq!(map.get(&key), Some(&42));
    }

    #[test]
    fn test_key_equality() {
        let a = InterfaceKey::new("10.0.0.1", 3);
        let b = InterfaceKey::new("10.0.0.1", 3);
        let c = InterfaceKey::new("10.0.0.1", 4);
        let d = InterfaceKey::new("10.0.0.2", 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_key_display() {
        let key = InterfaceKey::new("10.0.0.1", 3);
        assert_eq!(key.to_string(), "10.0.0.1/3");
    }
}
