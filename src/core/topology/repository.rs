// src/core/topology/repository.rs

//! A keyed, insertion-ordered collection used for the four topology arenas.

use indexmap::IndexMap;
use std::hash::Hash;

/// An insertion-ordered map from a stable identity to the entity it names.
///
/// A duplicate [`Repository::add`] keeps the existing entity untouched, so
/// repeated materialisation of the same host/group/node is idempotent.
#[derive(Debug)]
pub struct Repository<K, V> {
    elements: IndexMap<K, V>,
}

impl<K, V> Default for Repository<K, V> {
    fn default() -> Self {
        Repository {
            elements: IndexMap::new(),
        }
    }
}

impl<K, V> Repository<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Repository::default()
    }

    /// Inserts `value` under `key` unless the key is already present, and
    /// returns the stored entity either way.
    pub fn add(&mut self, key: K, value: V) -> &mut V {
        self.elements.entry(key).or_insert(value)
    }

    /// Inserts lazily: the constructor only runs when the key is absent.
    pub fn add_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        self.elements.entry(key).or_insert_with(make)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.elements.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.elements.get_mut(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.elements.contains_key(key)
    }

    /// Removes and returns the entity, preserving the order of the rest.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.elements.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.elements.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.elements.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.elements.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.elements.values_mut()
    }
}
