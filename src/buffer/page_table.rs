use log::debug;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

// A bucket whose local depth reached this cap stops splitting and chains in
// place, so degenerate key distributions cannot grow the directory forever.
const MAX_LOCAL_DEPTH: u32 = 16;

fn hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug)]
struct Bucket<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
}

#[derive(Debug)]
struct Directory<K, V> {
    global_depth: u32,
    bucket_size: usize,
    // 2^global_depth slots, each an index into `buckets`
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

impl<K, V> Directory<K, V>
where
    K: Hash + Eq,
{
    fn slot_of(&self, key: &K) -> usize {
        (hash_key(key) & ((1u64 << self.global_depth) - 1)) as usize
    }

    fn bucket_of(&self, key: &K) -> usize {
        self.dir[self.slot_of(key)]
    }

    /// Split `bucket_id`, doubling the directory first when its local depth
    /// already equals the global depth. Entries are re-hashed between the
    /// bucket and its new split image.
    fn split(&mut self, bucket_id: usize) {
        if self.buckets[bucket_id].local_depth == self.global_depth {
            let len = self.dir.len();
            self.dir.extend_from_within(0..len);
            self.global_depth += 1;
        }

        let new_depth = self.buckets[bucket_id].local_depth + 1;
        self.buckets[bucket_id].local_depth = new_depth;
        let image = self.buckets.len();
        self.buckets.push(Bucket {
            local_depth: new_depth,
            items: Vec::new(),
        });

        // Slots that used to share the bucket and have the new high bit set
        // now belong to the image.
        let discriminator = 1usize << (new_depth - 1);
        for (slot, target) in self.dir.iter_mut().enumerate() {
            if *target == bucket_id && slot & discriminator != 0 {
                *target = image;
            }
        }

        let moved = std::mem::take(&mut self.buckets[bucket_id].items);
        for (key, value) in moved {
            let dest = self.bucket_of(&key);
            self.buckets[dest].items.push((key, value));
        }
        debug!(
            "split bucket {} into {}, local depth now {}",
            bucket_id, image, new_depth
        );
    }
}

/// Extendible hash table: a doubling directory over split-on-overflow
/// buckets. All operations serialize on one internal mutex.
#[derive(Debug)]
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Starts with a global depth of 1: two buckets, each of `bucket_size`
    /// key/value pairs.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket_size must be positive");
        let buckets = vec![
            Bucket {
                local_depth: 1,
                items: Vec::new(),
            },
            Bucket {
                local_depth: 1,
                items: Vec::new(),
            },
        ];
        Self {
            inner: Mutex::new(Directory {
                global_depth: 1,
                bucket_size,
                dir: vec![0, 1],
                buckets,
            }),
        }
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock().unwrap();
        let bucket = inner.bucket_of(key);
        inner.buckets[bucket]
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Insert never fails; an existing key has its value replaced.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap();

        let bucket = inner.bucket_of(&key);
        if let Some(entry) = inner.buckets[bucket]
            .items
            .iter_mut()
            .find(|(k, _)| *k == key)
        {
            entry.1 = value;
            return;
        }

        loop {
            let bucket = inner.bucket_of(&key);
            if inner.buckets[bucket].items.len() < inner.bucket_size
                || inner.buckets[bucket].local_depth >= MAX_LOCAL_DEPTH
            {
                inner.buckets[bucket].items.push((key, value));
                return;
            }
            inner.split(bucket);
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let bucket = inner.bucket_of(key);
        let items = &mut inner.buckets[bucket].items;
        match items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                items.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.lock().unwrap().global_depth
    }

    pub fn local_depth(&self, bucket_id: usize) -> u32 {
        self.inner.lock().unwrap().buckets[bucket_id].local_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().unwrap().buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Every directory slot must point at a bucket whose residue (the slot's
    // low local-depth bits) is shared by all slots mapping to that bucket.
    fn check_directory<K: Hash + Eq, V: Clone>(table: &ExtendibleHashTable<K, V>) {
        let inner = table.inner.lock().unwrap();
        assert_eq!(inner.dir.len(), 1 << inner.global_depth);
        let mut residues = vec![None; inner.buckets.len()];
        for (slot, &bucket) in inner.dir.iter().enumerate() {
            let local = inner.buckets[bucket].local_depth;
            assert!(local <= inner.global_depth);
            let residue = slot & ((1 << local) - 1);
            match residues[bucket] {
                None => residues[bucket] = Some(residue),
                Some(expected) => assert_eq!(residue, expected),
            }
        }
    }

    #[test]
    fn insert_then_find() {
        let table = ExtendibleHashTable::new(4);
        table.insert(1, "a".to_string());
        table.insert(2, "b".to_string());
        assert_eq!(table.find(&1), Some("a".to_string()));
        assert_eq!(table.find(&2), Some("b".to_string()));
        assert_eq!(table.find(&3), None);
    }

    #[test]
    fn duplicate_key_replaces_value() {
        let table = ExtendibleHashTable::new(4);
        table.insert(42, 1);
        table.insert(42, 2);
        assert_eq!(table.find(&42), Some(2));
    }

    #[test]
    fn remove_then_find() {
        let table = ExtendibleHashTable::new(4);
        table.insert(5, 50);
        assert!(table.remove(&5));
        assert_eq!(table.find(&5), None);
        assert!(!table.remove(&5));
    }

    #[test]
    fn small_buckets_split() {
        let table = ExtendibleHashTable::new(2);
        assert_eq!(table.global_depth(), 1);
        assert_eq!(table.num_buckets(), 2);

        for key in [1, 2, 5, 7, 9] {
            table.insert(key, key * 10);
        }
        // Five entries cannot fit in two buckets of two, so at least one
        // split (and with it a directory doubling) must have happened.
        assert!(table.num_buckets() >= 3);
        assert!(table.global_depth() >= 2);
        for key in [1, 2, 5, 7, 9] {
            assert_eq!(table.find(&key), Some(key * 10));
        }
        check_directory(&table);
    }

    #[test]
    fn local_depth_bounded_by_global() {
        let table = ExtendibleHashTable::new(2);
        for key in 0..100 {
            table.insert(key, key);
        }
        let global = table.global_depth();
        for bucket in 0..table.num_buckets() {
            assert!(table.local_depth(bucket) <= global);
        }
        check_directory(&table);
    }

    #[test]
    fn dense_insert_remove_stress() {
        let table = ExtendibleHashTable::new(4);
        for key in 0..10_000u64 {
            table.insert(key, key.wrapping_mul(31));
        }
        check_directory(&table);
        for key in 0..10_000u64 {
            assert_eq!(table.find(&key), Some(key.wrapping_mul(31)));
        }
        for key in (0..10_000u64).step_by(2) {
            assert!(table.remove(&key));
        }
        for key in 0..10_000u64 {
            if key % 2 == 0 {
                assert_eq!(table.find(&key), None);
            } else {
                assert_eq!(table.find(&key), Some(key.wrapping_mul(31)));
            }
        }
        check_directory(&table);
    }
}
