//! Collection map, set algebra, and image codec.
//!
//! Names that are not present behave as the empty set for every read and
//! for every algebra operand. Store operations always create or overwrite
//! the destination, even when the result is empty.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

/// Current image format version.
pub const IMAGE_VERSION: u32 = 1;

/// Serialized form of a [`Bitmaps`] value.
#[derive(Debug, Serialize, Deserialize)]
struct BitmapsImage {
    version: u32,
    collections: BTreeMap<String, BTreeSet<u32>>,
}

/// Ordered map of collection name to ordered set of values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmaps {
    collections: BTreeMap<String, BTreeSet<u32>>,
}

impl Bitmaps {
    /// Create an empty collection map.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Mutators. Each is a single infallible step.
    // ------------------------------------------------------------------

    /// Insert a value, creating the collection if needed.
    pub fn add(&mut self, name: &str, value: u32) {
        self.entry(name).insert(value);
    }

    /// Insert every value, creating the collection if needed.
    pub fn add_many(&mut self, name: &str, values: &[u32]) {
        self.entry(name).extend(values.iter().copied());
    }

    /// Remove a value. A missing collection is left missing.
    pub fn remove(&mut self, name: &str, value: u32) {
        if let Some(set) = self.collections.get_mut(name) {
            set.remove(&value);
        }
    }

    /// Delete a collection entirely.
    pub fn drop_collection(&mut self, name: &str) {
        self.collections.remove(name);
    }

    /// Empty a collection but keep its entry. A missing collection stays missing.
    pub fn clear(&mut self, name: &str) {
        if let Some(set) = self.collections.get_mut(name) {
            set.clear();
        }
    }

    /// Overwrite `dest` with the intersection of `names`.
    pub fn inter_store(&mut self, dest: &str, names: &[String]) {
        let result = self.inter(names);
        self.store(dest, result);
    }

    /// Overwrite `dest` with the union of `names`.
    pub fn union_store(&mut self, dest: &str, names: &[String]) {
        let result = self.union(names);
        self.store(dest, result);
    }

    /// Overwrite `dest` with the symmetric difference of `left` and `right`.
    pub fn xor_store(&mut self, dest: &str, left: &str, right: &str) {
        let result = self.xor(left, right);
        self.store(dest, result);
    }

    /// Overwrite `dest` with `left` minus `right`.
    pub fn diff_store(&mut self, dest: &str, left: &str, right: &str) {
        let result = self.diff(left, right);
        self.store(dest, result);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Check membership.
    pub fn contains(&self, name: &str, value: u32) -> bool {
        self.collections
            .get(name)
            .is_some_and(|set| set.contains(&value))
    }

    /// Number of values in a collection.
    pub fn cardinality(&self, name: &str) -> u64 {
        self.collections
            .get(name)
            .map_or(0, |set| set.len() as u64)
    }

    /// Whether a collection entry exists (possibly empty).
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Values of one collection, ascending.
    pub fn values(&self, name: &str) -> Vec<u32> {
        self.collections
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Collection names, ascending.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Intersection of every named collection, ascending.
    pub fn inter(&self, names: &[String]) -> Vec<u32> {
        // Any missing operand makes the intersection empty.
        let Some(sets) = names
            .iter()
            .map(|n| self.collections.get(n))
            .collect::<Option<Vec<&BTreeSet<u32>>>>()
        else {
            return Vec::new();
        };
        let Some((first, rest)) = sets.split_first() else {
            return Vec::new();
        };
        first
            .iter()
            .copied()
            .filter(|v| rest.iter().all(|s| s.contains(v)))
            .collect()
    }

    /// Union of every named collection, ascending.
    pub fn union(&self, names: &[String]) -> Vec<u32> {
        let mut out = BTreeSet::new();
        for set in names.iter().filter_map(|n| self.collections.get(n)) {
            out.extend(set.iter().copied());
        }
        out.into_iter().collect()
    }

    /// Symmetric difference, ascending.
    pub fn xor(&self, left: &str, right: &str) -> Vec<u32> {
        let empty = BTreeSet::new();
        let l = self.collections.get(left).unwrap_or(&empty);
        let r = self.collections.get(right).unwrap_or(&empty);
        l.symmetric_difference(r).copied().collect()
    }

    /// Values in `left` but not in `right`, ascending.
    pub fn diff(&self, left: &str, right: &str) -> Vec<u32> {
        let empty = BTreeSet::new();
        let l = self.collections.get(left).unwrap_or(&empty);
        let r = self.collections.get(right).unwrap_or(&empty);
        l.difference(r).copied().collect()
    }

    /// Statistics over every collection.
    pub fn stats(&self) -> BitmapsStats {
        BitmapsStats {
            collections: self.collections.len(),
            total_values: self.collections.values().map(|s| s.len() as u64).sum(),
        }
    }

    // ------------------------------------------------------------------
    // Image codec
    // ------------------------------------------------------------------

    /// Write the full image to `sink`.
    pub fn save(&self, sink: &mut dyn Write) -> Result<(), bincode::Error> {
        let image = BitmapsImage {
            version: IMAGE_VERSION,
            collections: self.collections.clone(),
        };
        bincode::serialize_into(sink, &image)
    }

    /// Read a full image from `source` into a new value.
    ///
    /// The stream is buffered whole first, so a corrupt length prefix is
    /// bounded by the bytes actually present.
    pub fn read(source: &mut dyn Read) -> Result<Self, bincode::Error> {
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Decode an image held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        let image: BitmapsImage = bincode::deserialize(bytes)?;
        if image.version != IMAGE_VERSION {
            return Err(Box::new(bincode::ErrorKind::Custom(format!(
                "unsupported image version {}",
                image.version
            ))));
        }
        Ok(Self {
            collections: image.collections,
        })
    }

    /// Encode the image to a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        let mut buf = Vec::new();
        self.save(&mut buf)?;
        Ok(buf)
    }

    fn entry(&mut self, name: &str) -> &mut BTreeSet<u32> {
        self.collections.entry(name.to_string()).or_default()
    }

    fn store(&mut self, dest: &str, values: Vec<u32>) {
        self.collections
            .insert(dest.to_string(), values.into_iter().collect());
    }
}

/// Statistics for a collection map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapsStats {
    /// Number of collection entries (including empty ones).
    pub collections: usize,
    /// Sum of all cardinalities.
    pub total_values: u64,
}
