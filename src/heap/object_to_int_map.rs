use std::hash::Hash;

use ahash::RandomState;
use indexmap::IndexMap;

/// Multiset counting occurrences (or summing amounts) per key, iterated in insertion order.
#[derive(Clone, Debug)]
pub struct ObjectToIntMap<K: Hash + Eq> {
    map: IndexMap<K, u64, RandomState>,
}

impl<K: Hash + Eq> Default for ObjectToIntMap<K> {
    fn default() -> Self {
        Self {
            map: IndexMap::with_hasher(RandomState::new()),
        }
    }
}

impl<K: Hash + Eq + Clone + Ord> ObjectToIntMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_one_or_increment(&mut self, key: K) {
        self.put_or_increment_by(key, 1);
    }

    pub fn put_or_increment_by(&mut self, key: K, amount: u64) {
        *self.map.entry(key).or_insert(0) += amount;
    }

    pub fn get(&self, key: &K) -> Option<u64> {
        self.map.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.map.iter().map(|(k, v)| (k, *v))
    }

    /// Adds every entry of `other` to this map.
    pub fn add_all(&mut self, other: &ObjectToIntMap<K>) {
        for (key, value) in other.iter() {
            self.put_or_increment_by(key.clone(), value);
        }
    }

    /// Entries with the highest value first, ties broken by key.
    pub fn entries_sorted_by_value_then_key(&self) -> Vec<(K, u64)> {
        let mut entries: Vec<(K, u64)> = self.map.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|(k1, v1), (k2, v2)| v2.cmp(v1).then_with(|| k1.cmp(k2)));
        entries
    }
}

/// Upper bound of distinct elements kept by a [`SmallSet`].
pub const SMALL_SET_MAX_SIZE: usize = 10;

/// Set of at most [`SMALL_SET_MAX_SIZE`] distinct samples, further additions are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SmallSet<T> {
    elements: Vec<T>,
}

impl<T: PartialEq + Clone> SmallSet<T> {
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
        }
    }

    pub fn add(&mut self, element: T) {
        if self.elements.len() < SMALL_SET_MAX_SIZE && !self.elements.contains(&element) {
            self.elements.push(element);
        }
    }

    pub fn add_all(&mut self, other: &SmallSet<T>) {
        for element in &other.elements {
            self.add(element.clone());
        }
    }

    pub fn elements(&self) -> &[T] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
