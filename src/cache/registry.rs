//! Id-keyed object registry with find-or-create semantics.

use std::collections::hash_map::{Entry, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct Registry<K, V> {
    objects: HashMap<K, V>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq + Copy, V> Registry<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `id`, creating the object with `create` on a miss.
    ///
    /// The flag is true when the object already existed.
    pub fn find_or_create(&mut self, id: K, create: impl FnOnce(K) -> V) -> (&mut V, bool) {
        match self.objects.entry(id) {
            Entry::Occupied(e) => (e.into_mut(), true),
            Entry::Vacant(e) => (e.insert(create(id)), false),
        }
    }

    pub fn get(&self, id: &K) -> Option<&V> {
        self.objects.get(id)
    }

    pub fn get_mut(&mut self, id: &K) -> Option<&mut V> {
        self.objects.get_mut(id)
    }

    pub fn contains(&self, id: &K) -> bool {
        self.objects.contains_key(id)
    }

    pub fn insert(&mut self, id: K, value: V) -> Option<V> {
        self.objects.insert(id, value)
    }

    pub fn remove(&mut self, id: &K) -> Option<V> {
        self.objects.remove(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.objects.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.objects.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.objects.values_mut()
    }
}
