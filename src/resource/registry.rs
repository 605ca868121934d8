// src/resource/registry.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::sharable::{Sharable, SharableResource};

/// Named collection of shared resources.
///
/// Built once, then merged into a [`crate::plant::ProcessPlant`]. When a
/// task is turned into a runner, each of its resource keys is looked up
/// here and the matching resource is attached to the runner. Cloning the
/// registry clones the `Arc`s, not the resources.
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, Arc<dyn Sharable>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `value` in a new [`SharableResource`] and register it.
    ///
    /// Returns the typed handle so the caller can inspect the value later.
    pub fn add_new_resource<T>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Arc<SharableResource<T>>
    where
        T: fmt::Debug + Send + 'static,
    {
        let resource = Arc::new(SharableResource::new(value));
        self.resources.insert(key.into(), resource.clone());
        resource
    }

    /// Register an existing resource, replacing any previous entry.
    pub fn add_resource(&mut self, key: impl Into<String>, resource: Arc<dyn Sharable>) {
        self.resources.insert(key.into(), resource);
    }

    /// Merge every entry of `other` into this registry.
    pub fn merge(&mut self, other: &ResourceRegistry) {
        for (key, resource) in other.iter() {
            self.resources.insert(key.to_string(), resource.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn Sharable>> {
        self.resources.get(key)
    }

    /// Typed lookup; `None` if the key is missing or holds another type.
    pub fn get_typed<T>(&self, key: &str) -> Option<Arc<SharableResource<T>>>
    where
        T: Send + 'static,
    {
        let resource = self.resources.get(key)?.clone();
        resource.into_any().downcast::<SharableResource<T>>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resources.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Sharable>)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn clear(&mut self) {
        self.resources.clear();
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.resources.iter().map(|(k, v)| (k, v.describe())))
            .finish()
    }
}

impl<K: Into<String>> FromIterator<(K, Arc<dyn Sharable>)> for ResourceRegistry {
    fn from_iter<I: IntoIterator<Item = (K, Arc<dyn Sharable>)>>(iter: I) -> Self {
        let mut registry = ResourceRegistry::new();
        for (key, resource) in iter {
            registry.add_resource(key, resource);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ReadOnlyResource;

    #[test]
    fn typed_lookup_matches_only_the_right_type() {
        let mut registry = ResourceRegistry::new();
        registry.add_new_resource("body", String::from("My body:"));

        assert!(registry.get_typed::<String>("body").is_some());
        assert!(registry.get_typed::<u32>("body").is_none());
        assert!(registry.get_typed::<String>("mind").is_none());
    }

    #[test]
    fn merge_overwrites_and_shares() {
        let mut a = ResourceRegistry::new();
        let body = a.add_new_resource("body", String::from("a"));

        let mut b = ResourceRegistry::new();
        b.add_new_resource("mind", 1_u32);
        b.add_resource("config", Arc::new(ReadOnlyResource::new(7_u8)));

        a.merge(&b);
        assert_eq!(a.keys().collect::<Vec<_>>(), vec!["body", "config", "mind"]);

        // Same Arc, not a copy.
        let again = a.get_typed::<String>("body").unwrap();
        assert!(Arc::ptr_eq(&body, &again));

        a.clear();
        assert!(a.is_empty());
        assert_eq!(b.len(), 2);
    }
}
