//! The in-memory index: an open-addressed hash table with double hashing
//! and tombstones.
//!
//! This module is the bare data structure. It does no locking, no logging,
//! and knows nothing about the Bloom filter; the store facade layers those
//! on top, and recovery and rehashing call straight into these methods.

use tracing::debug;

/// Upper bound on `live / capacity`, kept low so open-addressed probe
/// sequences always have vacancies to terminate on.
pub(crate) const MAX_LOAD_FACTOR: f64 = 0.7;

/// the step hash needs `capacity - 1 >= 1`
const MIN_CAPACITY: usize = 2;

/// One table slot. `Deleted` is a tombstone: probes pass through it,
/// insertions may reclaim it, and it carries no key or value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    Empty,
    Occupied { key: String, value: String },
    Deleted,
}

/// where an insertion scan decided the key belongs
enum InsertSlot {
    Update(usize),
    Vacant(usize),
}

#[derive(Debug)]
pub(crate) struct Table {
    slots: Vec<Slot>,
    live: usize,
}

impl Table {
    pub fn with_capacity(capacity: usize) -> Table {
        Table {
            slots: vec![Slot::Empty; capacity.max(MIN_CAPACITY)],
            live: 0,
        }
    }

    /// reassembles a table from decoded snapshot slots; the caller has
    /// already validated the capacity and live count
    pub fn from_parts(slots: Vec<Slot>, live: usize) -> Table {
        Table { slots, live }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// count of occupied slots
    pub fn len(&self) -> usize {
        self.live
    }

    /// looks up `key`, probing through tombstones and stopping on the first
    /// empty slot
    pub fn get(&self, key: &str) -> Option<&str> {
        let capacity = self.capacity();
        let (start, step) = probe_params(key, capacity);
        let mut index = start;
        for _ in 0..capacity {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied { key: k, value } if k == key => return Some(value),
                _ => {}
            }
            index = (index + step) % capacity;
        }
        None
    }

    /// inserts or updates `key`, growing first when the projected load
    /// factor would exceed [`MAX_LOAD_FACTOR`]. returns true when a new key
    /// was added rather than an existing one updated.
    pub fn insert(&mut self, key: String, value: String) -> bool {
        if (self.live + 1) as f64 / self.capacity() as f64 > MAX_LOAD_FACTOR {
            self.grow();
        }
        loop {
            match self.find_insert_slot(&key) {
                Some(InsertSlot::Update(index)) => {
                    self.slots[index] = Slot::Occupied { key, value };
                    return false;
                }
                Some(InsertSlot::Vacant(index)) => {
                    self.slots[index] = Slot::Occupied { key, value };
                    self.live += 1;
                    return true;
                }
                // the probe cycle reached no usable slot, which can happen
                // when an even step only visits part of a power-of-two table
                None => self.grow(),
            }
        }
    }

    /// removes `key`, leaving a tombstone in its slot. returns true iff a
    /// live entry was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let capacity = self.capacity();
        let (start, step) = probe_params(key, capacity);
        let mut index = start;
        for _ in 0..capacity {
            match &self.slots[index] {
                Slot::Empty => return false,
                Slot::Occupied { key: k, .. } if k == key => {
                    self.slots[index] = Slot::Deleted;
                    self.live -= 1;
                    return true;
                }
                _ => {}
            }
            index = (index + step) % capacity;
        }
        false
    }

    /// iterates over live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { key, value } => Some((key.as_str(), value.as_str())),
            _ => None,
        })
    }

    /// raw slot array, in table order; the snapshot encoder walks this
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// scans the probe sequence for `key`. an existing occurrence wins;
    /// otherwise the first tombstone seen is reclaimed; otherwise the empty
    /// slot that ended the scan is used. stopping on empty only after the
    /// full forward scan keeps older insertions reachable.
    fn find_insert_slot(&self, key: &str) -> Option<InsertSlot> {
        let capacity = self.capacity();
        let (start, step) = probe_params(key, capacity);
        let mut index = start;
        let mut first_deleted = None;
        for _ in 0..capacity {
            match &self.slots[index] {
                Slot::Occupied { key: k, .. } if k == key => {
                    return Some(InsertSlot::Update(index));
                }
                Slot::Occupied { .. } => {}
                Slot::Deleted => {
                    if first_deleted.is_none() {
                        first_deleted = Some(index);
                    }
                }
                Slot::Empty => {
                    return Some(InsertSlot::Vacant(first_deleted.unwrap_or(index)));
                }
            }
            index = (index + step) % capacity;
        }
        first_deleted.map(InsertSlot::Vacant)
    }

    /// doubles capacity and re-inserts every live entry through the raw
    /// placement path. tombstones do not survive a rehash.
    fn grow(&mut self) {
        let old_capacity = self.capacity();
        let entries: Vec<(String, String)> = std::mem::take(&mut self.slots)
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Occupied { key, value } => Some((key, value)),
                _ => None,
            })
            .collect();

        // a doubled table can still present a degenerate probe cycle for
        // some key; keep doubling until every entry places
        let mut capacity = old_capacity * 2;
        let slots = loop {
            match rebuild(capacity, &entries) {
                Some(slots) => break slots,
                None => capacity *= 2,
            }
        };
        debug!(from = old_capacity, to = capacity, "table resized");
        self.live = entries.len();
        self.slots = slots;
    }
}

/// places every entry into a fresh slot array of `capacity`, or `None` when
/// some entry's probe sequence finds no vacancy
fn rebuild(capacity: usize, entries: &[(String, String)]) -> Option<Vec<Slot>> {
    let mut slots = vec![Slot::Empty; capacity];
    for (key, value) in entries {
        let (start, step) = probe_params(key, capacity);
        let mut index = start;
        let mut placed = false;
        for _ in 0..capacity {
            if !matches!(slots[index], Slot::Occupied { .. }) {
                slots[index] = Slot::Occupied {
                    key: key.clone(),
                    value: value.clone(),
                };
                placed = true;
                break;
            }
            index = (index + step) % capacity;
        }
        if !placed {
            return None;
        }
    }
    Some(slots)
}

/// primary and step hash for `key` at `capacity`: djb2 picks the starting
/// slot, sdbm the stride. the stride is reduced into `[1, capacity)` so the
/// probe sequence never stalls on one slot.
fn probe_params(key: &str, capacity: usize) -> (usize, usize) {
    let start = djb2(key) % capacity as u64;
    let step = sdbm(key) % (capacity as u64 - 1) + 1;
    (start as usize, step as usize)
}

fn djb2(key: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in key.bytes() {
        // hash * 33 + byte
        hash = (hash << 5).wrapping_add(hash).wrapping_add(u64::from(byte));
    }
    hash
}

fn sdbm(key: &str) -> u64 {
    let mut hash: u64 = 0;
    for byte in key.bytes() {
        hash = u64::from(byte)
            .wrapping_add(hash << 6)
            .wrapping_add(hash << 16)
            .wrapping_sub(hash);
    }
    hash
}
