//! Insertion-ordered set with key-based de-duplication.
//!
//! Every collection on the domain entities (claims, roles, parents, limits)
//! is a [`UniqueSet`]. Two elements are the same element when their
//! [`Keyed::unique_key`] is equal, regardless of ids or other fields. The
//! first inserted element for a key is kept and iteration follows first
//! insertion order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

/// Anything that can live in a [`UniqueSet`].
pub trait Keyed {
    /// The identity used for de-duplication.
    fn unique_key(&self) -> String;
}

impl Keyed for String {
    fn unique_key(&self) -> String {
        self.clone()
    }
}

/// An ordered collection that ignores inserts of an already present key.
#[derive(Clone)]
pub struct UniqueSet<T> {
    items: Vec<T>,
    keys: HashSet<String>,
}

impl<T> Default for UniqueSet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            keys: HashSet::new(),
        }
    }
}

impl<T: Keyed> UniqueSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `item` unless its key is already present.
    ///
    /// Returns `true` when the item was added.
    pub fn insert(&mut self, item: T) -> bool {
        if self.keys.insert(item.unique_key()) {
            self.items.push(item);
            true
        } else {
            false
        }
    }

    /// Removes the element with the given key, returning it.
    pub fn remove_key(&mut self, key: &str) -> Option<T> {
        if !self.keys.remove(key) {
            return None;
        }
        let position = self.items.iter().position(|i| i.unique_key() == key)?;
        Some(self.items.remove(position))
    }

    /// Removes the element with the same key as `item`.
    pub fn remove(&mut self, item: &T) -> Option<T> {
        self.remove_key(&item.unique_key())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn contains(&self, item: &T) -> bool {
        self.contains_key(&item.unique_key())
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        if !self.keys.contains(key) {
            return None;
        }
        self.items.iter().find(|i| i.unique_key() == key)
    }

    /// Mutable access by key. The caller must not change the element's key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        if !self.keys.contains(key) {
            return None;
        }
        self.items.iter_mut().find(|i| i.unique_key() == key)
    }

    /// The element keys, in iteration order.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.items.iter().map(Keyed::unique_key)
    }
}

impl<T> UniqueSet<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.keys.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: fmt::Debug> fmt::Debug for UniqueSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl<T: Keyed> Extend<T> for UniqueSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.insert(item);
        }
    }
}

impl<T: Keyed> FromIterator<T> for UniqueSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<T> IntoIterator for UniqueSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a UniqueSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: Keyed> PartialEq for UniqueSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.keys().eq(other.keys())
    }
}

impl<T: Serialize> Serialize for UniqueSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'de, T: Keyed + Deserialize<'de>> Deserialize<'de> for UniqueSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(items.into_iter().collect())
    }
}
