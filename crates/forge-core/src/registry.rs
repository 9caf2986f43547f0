//! Name -> interface table (C9).
//!
//! A small service locator modules use to publish and retrieve shared
//! interfaces by name, the Rust counterpart of a C `set(name, vtable)` /
//! `get(name)` api registry: `set` stores a type-erased value under a
//! string key, `get` downcasts it back, `remove` drops it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::RwLock;

/// Type-erased name -> interface table.
///
/// Safe to share across threads: callers synchronize through the
/// registry's own lock, not through the stored values.
pub struct Registry {
    entries: RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Publish `value` under `name`, replacing any prior entry.
    pub fn set<T: Any + Send + Sync>(&self, name: &str, value: T) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(name.to_string(), Box::new(value));
    }

    /// Remove the entry at `name`, if any.
    pub fn remove(&self, name: &str) {
        let mut entries = self.entries.write().unwrap();
        entries.remove(name);
    }

    /// Fetch the interface at `name`, cloning it out.
    ///
    /// Returns `None` if nothing is registered under `name`, or if the
    /// stored value isn't a `T` (a caller/name mismatch, never a normal
    /// runtime condition).
    pub fn get<T: Any + Clone + Send + Sync>(&self, name: &str) -> Option<T> {
        let entries = self.entries.read().unwrap();
        entries.get(name).and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    /// True if an interface is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().unwrap().contains_key(name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Widget {
        count: u32,
    }

    #[test]
    fn set_then_get_roundtrips() {
        let r = Registry::new();
        r.set("widget", Widget { count: 7 });
        assert_eq!(r.get::<Widget>("widget"), Some(Widget { count: 7 }));
    }

    #[test]
    fn get_missing_name_is_none() {
        let r = Registry::new();
        assert_eq!(r.get::<Widget>("missing"), None);
    }

    #[test]
    fn get_wrong_type_is_none() {
        let r = Registry::new();
        r.set("widget", Widget { count: 1 });
        assert_eq!(r.get::<u32>("widget"), None);
    }

    #[test]
    fn remove_clears_entry() {
        let r = Registry::new();
        r.set("widget", Widget { count: 1 });
        assert!(r.contains("widget"));
        r.remove("widget");
        assert!(!r.contains("widget"));
    }

    #[test]
    fn set_replaces_existing_entry() {
        let r = Registry::new();
        r.set("widget", Widget { count: 1 });
        r.set("widget", Widget { count: 2 });
        assert_eq!(r.get::<Widget>("widget"), Some(Widget { count: 2 }));
    }
}
