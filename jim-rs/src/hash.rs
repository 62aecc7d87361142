//! Chained hash table used for variable scopes, the command table, static
//! variables, packages and associated data.
//!
//! The table is a power-of-two array of singly linked buckets.  It doubles
//! once the entry count reaches the bucket count, so lookups stay O(1) on
//! average.  Iteration walks the buckets in index order, which is *not*
//! insertion order; callers that need stable ordering sort the keys.
//!
//! Hashing is pluggable through [`BuildHasher`].  The default
//! [`SaltedBuild`] mixes a per-table salt into an Fx hash, so the bucket a
//! given name lands in differs between interpreters.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

use rustc_hash::FxHasher;

const INITIAL_BUCKETS: usize = 16;

// ── Hashing ──────────────────────────────────────────────────────────────────

/// Fx hashing seeded with a salt.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaltedBuild {
    salt: u64,
}

impl SaltedBuild {
    pub fn new(salt: u64) -> Self {
        SaltedBuild { salt }
    }
}

impl BuildHasher for SaltedBuild {
    type Hasher = FxHasher;

    fn build_hasher(&self) -> FxHasher {
        let mut h = FxHasher::default();
        h.write_u64(self.salt);
        h
    }
}

/// Returned by [`HashTable::insert`] when the key is already present.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("key already exists")]
pub struct DuplicateKey;

// ── Table ────────────────────────────────────────────────────────────────────

struct Entry<K, V> {
    hash: u64,
    key: K,
    value: V,
    next: Option<Box<Entry<K, V>>>,
}

type Bucket<K, V> = Option<Box<Entry<K, V>>>;

pub struct HashTable<K, V, S = SaltedBuild> {
    buckets: Vec<Bucket<K, V>>,
    len: usize,
    build: S,
}

impl<K, V> HashTable<K, V, SaltedBuild> {
    /// Empty table whose hashes are mixed with `salt`.
    pub fn with_salt(salt: u64) -> Self {
        Self::with_hasher(SaltedBuild::new(salt))
    }
}

impl<K, V, S: Default> Default for HashTable<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> HashTable<K, V, S> {
    pub fn with_hasher(build: S) -> Self {
        HashTable {
            buckets: Vec::new(),
            len: 0,
            build,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of buckets currently allocated.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub fn clear(&mut self) {
        // Unlink chains one entry at a time so long chains do not recurse in Drop.
        for bucket in &mut self.buckets {
            let mut cur = bucket.take();
            while let Some(mut e) = cur {
                cur = e.next.take();
            }
        }
        self.len = 0;
    }

    /// Entries in bucket order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            buckets: self.buckets.iter(),
            chain: None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    fn slot(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn grow(&mut self) {
        let size = (self.buckets.len() * 2).max(INITIAL_BUCKETS);
        let old = std::mem::replace(&mut self.buckets, (0..size).map(|_| None).collect());
        for mut chain in old {
            while let Some(mut e) = chain {
                chain = e.next.take();
                let idx = (e.hash as usize) & (size - 1);
                e.next = self.buckets[idx].take();
                self.buckets[idx] = Some(e);
            }
        }
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> HashTable<K, V, S> {
    fn hash_of<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        let mut h = self.build.build_hasher();
        key.hash(&mut h);
        h.finish()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.buckets.is_empty() {
            return None;
        }
        let hash = self.hash_of(key);
        let mut cur = self.buckets[self.slot(hash)].as_deref();
        while let Some(e) = cur {
            if e.hash == hash && e.key.borrow() == key {
                return Some(&e.value);
            }
            cur = e.next.as_deref();
        }
        None
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.buckets.is_empty() {
            return None;
        }
        let hash = self.hash_of(key);
        let idx = self.slot(hash);
        let mut cur = self.buckets[idx].as_deref_mut();
        while let Some(e) = cur {
            if e.hash == hash && e.key.borrow() == key {
                return Some(&mut e.value);
            }
            cur = e.next.as_deref_mut();
        }
        None
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Adds a new entry; fails without touching the table if `key` exists.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), DuplicateKey> {
        if self.contains_key(&key) {
            return Err(DuplicateKey);
        }
        self.push(key, value);
        Ok(())
    }

    /// Inserts or overwrites, returning the previous value.
    pub fn replace(&mut self, key: K, value: V) -> Option<V> {
        if let Some(slot) = self.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        self.push(key, value);
        None
    }

    fn push(&mut self, key: K, value: V) {
        if self.len >= self.buckets.len() {
            self.grow();
        }
        let hash = self.hash_of(&key);
        let idx = self.slot(hash);
        let next = self.buckets[idx].take();
        self.buckets[idx] = Some(Box::new(Entry {
            hash,
            key,
            value,
            next,
        }));
        self.len += 1;
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes and returns the stored key together with its value.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.buckets.is_empty() {
            return None;
        }
        let hash = self.hash_of(key);
        let idx = self.slot(hash);
        let mut link = &mut self.buckets[idx];
        loop {
            let found = match link.as_deref() {
                None => return None,
                Some(e) => e.hash == hash && e.key.borrow() == key,
            };
            if found {
                break;
            }
            link = &mut link.as_mut()?.next;
        }
        let mut entry = link.take()?;
        *link = entry.next.take();
        self.len -= 1;
        Some((entry.key, entry.value))
    }
}

impl<K, V, S> Drop for HashTable<K, V, S> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for HashTable<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

pub struct Iter<'a, K, V> {
    buckets: std::slice::Iter<'a, Bucket<K, V>>,
    chain: Option<&'a Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.chain {
                self.chain = e.next.as_deref();
                return Some((&e.key, &e.value));
            }
            self.chain = self.buckets.next()?.as_deref();
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashTable<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn insert_rejects_duplicates() {
        let mut t: HashTable<String, i32> = HashTable::default();
        assert!(t.insert("a".into(), 1).is_ok());
        assert_eq!(t.insert("a".into(), 2), Err(DuplicateKey));
        assert_eq!(t.get("a"), Some(&1));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn replace_upserts() {
        let mut t: HashTable<String, i32> = HashTable::default();
        assert_eq!(t.replace("k".into(), 1), None);
        assert_eq!(t.replace("k".into(), 2), Some(1));
        assert_eq!(t.get("k"), Some(&2));
    }

    #[test]
    fn remove_unlinks_from_chain() {
        let mut t: HashTable<u32, u32> = HashTable::default();
        for i in 0..100 {
            t.insert(i, i * 10).unwrap();
        }
        assert_eq!(t.remove(&42), Some(420));
        assert_eq!(t.remove(&42), None);
        assert_eq!(t.len(), 99);
        for i in (0..100).filter(|&i| i != 42) {
            assert_eq!(t.get(&i), Some(&(i * 10)));
        }
    }

    #[test]
    fn grows_and_keeps_every_entry() {
        let mut t: HashTable<String, usize> = HashTable::with_salt(7);
        for i in 0..1000 {
            t.insert(format!("v{i}"), i).unwrap();
        }
        assert!(t.capacity() >= 1000);
        let mut seen: Vec<usize> = t.values().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn borrowed_lookup_with_rc_str_keys() {
        let mut t: HashTable<Rc<str>, i32> = HashTable::default();
        t.insert(Rc::from("name"), 5).unwrap();
        assert_eq!(t.get("name"), Some(&5));
        assert!(t.contains_key("name"));
        let (k, v) = t.remove_entry("name").unwrap();
        assert_eq!((&*k, v), ("name", 5));
        assert!(t.is_empty());
    }

    #[test]
    fn empty_table_lookups() {
        let mut t: HashTable<String, i32> = HashTable::default();
        assert_eq!(t.get("x"), None);
        assert_eq!(t.get_mut("x"), None);
        assert_eq!(t.remove("x"), None);
        assert_eq!(t.iter().count(), 0);
    }

    #[test]
    fn clear_resets_len() {
        let mut t: HashTable<i32, i32> = HashTable::default();
        for i in 0..40 {
            t.replace(i, i);
        }
        t.clear();
        assert!(t.is_empty());
        assert_eq!(t.get(&3), None);
        t.insert(3, 4).unwrap();
        assert_eq!(t.get(&3), Some(&4));
    }
}
