//! Converge store: per-reconcile resource set and per-owner retry bookkeeping.

#![forbid(unsafe_code)]

use converge_core::{DesiredResource, ResourceKey};
use rustc_hash::FxHashMap;
use tracing::trace;

mod backoff;

pub use backoff::BackoffTable;

/// Ordered collection of desired resources keyed by identity.
///
/// A later insertion with an existing key replaces the value but keeps the
/// position of the first insertion; iteration follows insertion order.
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    map: FxHashMap<ResourceKey, DesiredResource>,
    order: Vec<ResourceKey>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Insert or replace by key. Returns the replaced descriptor, if any.
    pub fn insert(&mut self, resource: DesiredResource) -> Option<DesiredResource> {
        let key = resource.key().clone();
        if !self.map.contains_key(&key) {
            self.order.push(key.clone());
        } else {
            trace!(resource = %key, "replacing desired resource");
        }
        self.map.insert(key, resource)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&DesiredResource> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.map.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DesiredResource> + '_ {
        self.order.iter().filter_map(|k| self.map.get(k))
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> + '_ {
        self.order.iter()
    }
}

impl Extend<DesiredResource> for ResourceSet {
    fn extend<I: IntoIterator<Item = DesiredResource>>(&mut self, iter: I) {
        for r in iter {
            self.insert(r);
        }
    }
}

impl FromIterator<DesiredResource> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = DesiredResource>>(iter: I) -> Self {
        let mut set = ResourceSet::new();
        set.extend(iter);
        set
    }
}

impl<'a> IntoIterator for &'a ResourceSet {
    type Item = &'a DesiredResource;
    type IntoIter = Box<dyn Iterator<Item = &'a DesiredResource> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
