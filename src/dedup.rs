use std::collections::HashMap;
use std::hash::Hash;

/// Arena of unique values. Inserting a value that is structurally equal to one inserted before
/// returns the index of the earlier slot, so indexes are dense and assigned in first-seen order.
#[derive(Debug, Clone)]
pub struct DedupCache<T> {
    values: Vec<T>,
    index_by_value: HashMap<T, usize>,
}

impl<T: Eq + Hash + Clone> DedupCache<T> {
    pub fn new() -> Self {
        DedupCache {
            values: vec![],
            index_by_value: HashMap::new(),
        }
    }

    /// Returns the slot index of `value` and whether a new slot had to be created for it.
    pub fn insert(&mut self, value: T) -> (usize, bool) {
        if let Some(&index) = self.index_by_value.get(&value) {
            return (index, false);
        }
        let index = self.values.len();
        self.index_by_value.insert(value.clone(), index);
        self.values.push(value);
        (index, true)
    }

    pub fn index_of(&mut self, value: T) -> usize {
        self.insert(value).0
    }

    pub fn get(&self, value: &T) -> Option<usize> {
        self.index_by_value.get(value).copied()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: Eq + Hash + Clone> Default for DedupCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
