//! Name abbreviation for compact, fixed-size index keys.
//!
//! Property and tag-property names are variable-length strings; index keys
//! need a fixed-width prefix for prefix compression and range scans. Each
//! distinct name is assigned a monotonically increasing 4-byte id ([`Abrv`])
//! the first time it is stored. Assignments are persisted in a dedicated CF
//! and never reused, so an id remains resolvable for the life of the layer
//! even after the last value carrying it is deleted.
//!
//! [`AbbrevTable`] is the thread-safe in-memory bidirectional map, rebuilt
//! from the CF at startup (pre-warm) and kept in sync by the apply path.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// 4-byte abbreviation id embedded in index keys.
///
/// Ids are allocated sequentially per table, never derived from the name:
/// allocation order is commit order, and a crash between allocations can at
/// worst leave unused ids behind, never a collision.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Abrv(u32);

impl Abrv {
    pub const SIZE: usize = 4;

    #[inline]
    pub fn from_id(id: u32) -> Self {
        Abrv(id)
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.0
    }

    /// Big-endian bytes for key embedding.
    #[inline]
    pub fn to_be_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    #[inline]
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Abrv(u32::from_be_bytes(bytes))
    }
}

impl fmt::Debug for Abrv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Abrv({})", self.0)
    }
}

impl fmt::Display for Abrv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread-safe bidirectional abbreviation map.
///
/// Uses `DashMap` for lock-free concurrent access; entries are small and
/// finite, so the table never evicts. The layer keeps two instances: one for
/// property names, one for tag-property names.
#[derive(Debug)]
pub struct AbbrevTable {
    abrv_to_name: DashMap<Abrv, Arc<String>>,
    name_to_abrv: DashMap<String, Abrv>,
    /// Next id to allocate. Restored from the persisted CF tail at startup.
    next_id: AtomicU32,
}

impl Default for AbbrevTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AbbrevTable {
    pub fn new() -> Self {
        Self {
            abrv_to_name: DashMap::new(),
            name_to_abrv: DashMap::new(),
            next_id: AtomicU32::new(0),
        }
    }

    /// Intern a name, allocating a fresh id if it is new.
    ///
    /// Returns `(abrv, is_new)`; `is_new` tells the write path whether the
    /// assignment must also be persisted to the abbreviations CF.
    pub fn intern(&self, name: &str) -> (Abrv, bool) {
        if let Some(abrv) = self.name_to_abrv.get(name) {
            return (*abrv, false);
        }

        // Entry API serializes racing interns of the same name so only one
        // id is allocated for it.
        let entry = self.name_to_abrv.entry(name.to_string());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(e) => (*e.get(), false),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let abrv = Abrv(self.next_id.fetch_add(1, Ordering::SeqCst));
                self.abrv_to_name.insert(abrv, Arc::new(name.to_string()));
                e.insert(abrv);
                (abrv, true)
            }
        }
    }

    /// Insert a persisted assignment directly. Used during pre-warm.
    ///
    /// Keeps `next_id` above every loaded id so restarts never re-allocate.
    pub fn insert(&self, abrv: Abrv, name: String) {
        self.abrv_to_name.insert(abrv, Arc::new(name.clone()));
        self.name_to_abrv.insert(name, abrv);
        self.next_id.fetch_max(abrv.0 + 1, Ordering::SeqCst);
    }

    /// Resolve an id back to its name.
    pub fn get_name(&self, abrv: &Abrv) -> Option<Arc<String>> {
        self.abrv_to_name.get(abrv).map(|r| r.value().clone())
    }

    /// Look up the id for a name without allocating.
    pub fn get_abrv(&self, name: &str) -> Option<Abrv> {
        self.name_to_abrv.get(name).map(|r| *r)
    }

    pub fn len(&self) -> usize {
        self.abrv_to_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abrv_to_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_allocates_sequential_ids() {
        let table = AbbrevTable::new();
        assert!(table.is_empty());
        let (a, new_a) = table.intern(":name");
        let (b, new_b) = table.intern(":age");
        assert!(new_a && new_b);
        assert_eq!(a.id(), 0);
        assert_eq!(b.id(), 1);
    }

    #[test]
    fn test_intern_idempotent() {
        let table = AbbrevTable::new();
        let (a, _) = table.intern(":name");
        let (b, is_new) = table.intern(":name");
        assert_eq!(a, b);
        assert!(!is_new);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_resolution_both_directions() {
        let table = AbbrevTable::new();
        let (abrv, _) = table.intern(":created");
        assert_eq!(table.get_name(&abrv).as_deref().map(|s| s.as_str()), Some(":created"));
        assert_eq!(table.get_abrv(":created"), Some(abrv));
        assert!(table.get_abrv(":missing").is_none());
    }

    #[test]
    fn test_insert_bumps_next_id() {
        let table = AbbrevTable::new();
        // Simulate pre-warm loading ids 0..=4.
        for id in 0..5u32 {
            table.insert(Abrv::from_id(id), format!("prop{}", id));
        }
        let (abrv, is_new) = table.intern("fresh");
        assert!(is_new);
        assert_eq!(abrv.id(), 5);
    }

    #[test]
    fn test_key_bytes_roundtrip() {
        let abrv = Abrv::from_id(0xDEAD);
        assert_eq!(Abrv::from_be_bytes(abrv.to_be_bytes()), abrv);
        assert_eq!(abrv.to_be_bytes().len(), Abrv::SIZE);
    }

    #[test]
    fn test_concurrent_intern_unique_ids() {
        use std::thread;

        let table = Arc::new(AbbrevTable::new());
        let mut handles = vec![];
        for i in 0..8 {
            let table = table.clone();
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    table.intern(&format!("prop_{}_{}", i, j));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("thread should complete");
        }
        assert_eq!(table.len(), 800);

        // Every name resolves back to itself through its id.
        for i in 0..8 {
            let name = format!("prop_{}_0", i);
            let abrv = table.get_abrv(&name).expect("interned");
            assert_eq!(table.get_name(&abrv).as_deref().map(|s| s.as_str()), Some(name.as_str()));
        }
    }
}
