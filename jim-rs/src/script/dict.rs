//! Insertion-ordered dictionary.
//!
//! Pairs live in one flat `[k0, v0, k1, v1, …]` array, which doubles as the
//! list view of the dict.  A separate open-addressed index maps key hashes to
//! pair offsets using linear probing.  Removing a key tombstones its index
//! slot and marks its pair dead; dead pairs are squeezed out once they make
//! up half the array, so iteration order is always insertion order.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use super::value::Value;

const EMPTY: u32 = u32::MAX;
const TOMBSTONE: u32 = u32::MAX - 1;
const MIN_INDEX: usize = 8;

/// A list with an odd number of elements was used as a dict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OddLength;

#[derive(Clone, Default)]
pub struct Dict {
    table: Vec<Value>,
    /// One flag per pair in `table`; `false` once removed.
    live: Vec<bool>,
    dead: usize,
    index: Vec<u32>,
    tombstones: usize,
}

fn hash_key(key: &str) -> u64 {
    let mut h = FxHasher::default();
    h.write(key.as_bytes());
    h.finish()
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dict from alternating keys and values.  A repeated key keeps
    /// its first position and takes the last value.
    pub fn from_pairs(items: impl IntoIterator<Item = Value>) -> Result<Dict, OddLength> {
        let mut dict = Dict::new();
        let mut items = items.into_iter();
        while let Some(k) = items.next() {
            let v = items.next().ok_or(OddLength)?;
            dict.set(k, v);
        }
        Ok(dict)
    }

    /// Number of key/value pairs.
    pub fn len(&self) -> usize {
        self.live.len() - self.dead
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The pairs flattened to `[k0, v0, k1, v1, …]`.
    pub fn to_list(&self) -> Vec<Value> {
        let mut items = Vec::with_capacity(self.len() * 2);
        for (k, v) in self.iter() {
            items.push(k.clone());
            items.push(v.clone());
        }
        items
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.table
            .chunks_exact(2)
            .zip(&self.live)
            .filter(|(_, live)| **live)
            .map(|(p, _)| (&p[0], &p[1]))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.iter().map(|(_, v)| v)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let slot = self.find(key, hash_key(key)).ok()?;
        Some(&self.table[self.index[slot] as usize + 1])
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        let slot = self.find(key, hash_key(key)).ok()?;
        let off = self.index[slot] as usize + 1;
        Some(&mut self.table[off])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or replaces.  A replaced key keeps its position.
    pub fn set(&mut self, key: Value, value: Value) {
        let name = key.as_str();
        let hash = hash_key(&name);
        if let Ok(slot) = self.find(&name, hash) {
            let off = self.index[slot] as usize + 1;
            self.table[off] = value;
            return;
        }
        if (self.len() + self.tombstones + 1) * 2 > self.index.len() {
            self.rebuild_index(self.len() + 1);
        }
        let slot = match self.find(&name, hash) {
            Ok(slot) | Err(slot) => slot,
        };
        if self.index[slot] == TOMBSTONE {
            self.tombstones -= 1;
        }
        self.index[slot] = self.table.len() as u32;
        self.table.push(key);
        self.table.push(value);
        self.live.push(true);
    }

    /// Removes a key, returning its value.  The order of the rest is kept.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let slot = self.find(key, hash_key(key)).ok()?;
        let off = self.index[slot] as usize;
        self.index[slot] = TOMBSTONE;
        self.tombstones += 1;
        self.live[off / 2] = false;
        self.dead += 1;
        self.table[off] = Value::empty();
        let value = std::mem::replace(&mut self.table[off + 1], Value::empty());
        if self.dead * 2 > self.live.len() {
            self.rebuild_index(self.len());
        }
        Some(value)
    }

    /// Drops dead pairs from the pair array.
    fn compact(&mut self) {
        if self.dead == 0 {
            return;
        }
        let table = std::mem::take(&mut self.table);
        let mut live = self.live.iter();
        let mut pairs = table.into_iter();
        while let (Some(k), Some(v)) = (pairs.next(), pairs.next()) {
            if live.next().copied().unwrap_or(false) {
                self.table.push(k);
                self.table.push(v);
            }
        }
        self.live = vec![true; self.table.len() / 2];
        self.dead = 0;
    }

    /// Probes for `key`.  `Ok` holds the slot that stores it; `Err` holds the
    /// slot an insert should use (the first tombstone seen, else the empty
    /// slot that ended the probe).
    fn find(&self, key: &str, hash: u64) -> Result<usize, usize> {
        if self.index.is_empty() {
            return Err(0);
        }
        let mask = self.index.len() - 1;
        let mut i = (hash as usize) & mask;
        let mut reuse = None;
        loop {
            match self.index[i] {
                EMPTY => return Err(reuse.unwrap_or(i)),
                TOMBSTONE => {
                    reuse.get_or_insert(i);
                }
                off => {
                    if *self.table[off as usize].as_str() == *key {
                        return Ok(i);
                    }
                }
            }
            i = (i + 1) & mask;
        }
    }

    fn rebuild_index(&mut self, pairs: usize) {
        self.compact();
        let size = (pairs * 4).next_power_of_two().max(MIN_INDEX);
        self.index = vec![EMPTY; size];
        self.tombstones = 0;
        let mask = size - 1;
        for off in (0..self.table.len()).step_by(2) {
            let mut i = (hash_key(&self.table[off].as_str()) as usize) & mask;
            while self.index[i] != EMPTY {
                i = (i + 1) & mask;
            }
            self.index[i] = off as u32;
        }
    }

    /// Table statistics for `dict info`.
    pub fn stats(&self) -> String {
        let used = self
            .index
            .iter()
            .filter(|&&e| e != EMPTY && e != TOMBSTONE)
            .count();
        format!(
            "{} entries in table, {} slots, {} used, {} tombstones",
            self.len(),
            self.index.len(),
            used,
            self.tombstones
        )
    }
}

impl std::fmt::Debug for Dict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(d: &Dict) -> Vec<String> {
        d.keys().map(|k| k.to_string()).collect()
    }

    fn dict(pairs: &[(&str, &str)]) -> Dict {
        let mut d = Dict::new();
        for (k, v) in pairs {
            d.set(Value::from(*k), Value::from(*v));
        }
        d
    }

    #[test]
    fn keeps_insertion_order() {
        let d = dict(&[("z", "1"), ("a", "2"), ("m", "3")]);
        assert_eq!(keys(&d), ["z", "a", "m"]);
    }

    #[test]
    fn replacing_keeps_position() {
        let mut d = dict(&[("a", "1"), ("b", "2")]);
        d.set(Value::from("a"), Value::from("9"));
        assert_eq!(keys(&d), ["a", "b"]);
        assert_eq!(d.get("a").unwrap().to_string(), "9");
    }

    #[test]
    fn remove_preserves_order_of_the_rest() {
        let mut d = dict(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);
        assert_eq!(d.remove("b").unwrap().to_string(), "2");
        assert_eq!(keys(&d), ["a", "c", "d"]);
        assert_eq!(d.get("c").unwrap().to_string(), "3");
        assert_eq!(d.get("d").unwrap().to_string(), "4");
        assert!(d.remove("b").is_none());
        d.set(Value::from("b"), Value::from("5"));
        assert_eq!(keys(&d), ["a", "c", "d", "b"]);
    }

    #[test]
    fn many_keys_survive_rebuilds_and_tombstones() {
        let mut d = Dict::new();
        for i in 0..500 {
            d.set(Value::from(format!("k{i}")), Value::from(i as i64));
        }
        for i in (0..500).step_by(3) {
            assert!(d.remove(&format!("k{i}")).is_some());
        }
        for i in 0..500 {
            let got = d.get(&format!("k{i}"));
            if i % 3 == 0 {
                assert!(got.is_none());
            } else {
                assert_eq!(got.unwrap().get_int().unwrap(), i as i64);
            }
        }
        for i in 0..100 {
            d.set(Value::from(format!("n{i}")), Value::from(""));
        }
        assert_eq!(d.len(), 500 - 167 + 100);
    }

    #[test]
    fn removal_leaves_other_offsets_alone_until_compaction() {
        let mut d = dict(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);
        d.remove("a");
        assert!(d.stats().contains("1 tombstones"), "{}", d.stats());
        assert_eq!(d.len(), 3);
        assert_eq!(d.get("d").unwrap().to_string(), "4");
        let flat: Vec<String> = d.to_list().iter().map(|v| v.to_string()).collect();
        assert_eq!(flat, ["b", "2", "c", "3", "d", "4"]);
        d.remove("c");
        d.remove("b");
        assert!(d.stats().contains("0 tombstones"), "{}", d.stats());
        assert_eq!(keys(&d), ["d"]);
        d.set(Value::from("e"), Value::from("5"));
        assert_eq!(keys(&d), ["d", "e"]);
        assert_eq!(d.get("e").unwrap().to_string(), "5");
    }

    #[test]
    fn odd_length_is_rejected() {
        let items = vec![Value::from("a"), Value::from("1"), Value::from("b")];
        assert_eq!(Dict::from_pairs(items).unwrap_err(), OddLength);
    }
}
