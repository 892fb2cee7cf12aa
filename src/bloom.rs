//! A Bloom filter summarizing the store's live keys.
//!
//! Lookups and deletes consult the filter before probing the table: a miss
//! here proves the key is absent, turning a worst-case O(capacity) probe
//! sweep through tombstones into a handful of bit tests. False positives
//! are possible, false negatives are not.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A fixed-geometry Bloom filter over string keys.
///
/// `add` sets `k` bits derived from the key; `contains` is a short-circuit
/// conjunction over the same bits. Bits are never cleared, so a key that
/// was added keeps testing positive until the filter is rebuilt.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: usize,
    num_hashes: usize,
}

impl BloomFilter {
    /// creates a filter of `num_bits` bits tested through `num_hashes`
    /// derivations per key. degenerate geometries are clamped so the filter
    /// stays usable.
    pub fn new(num_bits: usize, num_hashes: usize) -> Self {
        let num_bits = num_bits.max(8);
        let num_hashes = num_hashes.max(1);
        BloomFilter {
            bits: vec![0; (num_bits + 7) / 8],
            num_bits,
            num_hashes,
        }
    }

    /// registers `key` in the filter
    pub fn add(&mut self, key: &str) {
        for i in 0..self.num_hashes {
            let bit = self.bit_position(key, i);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// tests whether `key` may be present. `false` means certainly absent
    pub fn contains(&self, key: &str) -> bool {
        (0..self.num_hashes).all(|i| {
            let bit = self.bit_position(key, i);
            self.bits[bit / 8] & (1 << (bit % 8)) != 0
        })
    }

    /// the filter's width in bits
    pub fn len_bits(&self) -> usize {
        self.num_bits
    }

    /// the number of hash derivations per key
    pub fn hash_count(&self) -> usize {
        self.num_hashes
    }

    fn bit_position(&self, key: &str, index: usize) -> usize {
        (derive(key, index) % self.num_bits as u64) as usize
    }
}

/// FNV-1a over the key bytes followed by the decimal text of the derivation
/// index, giving `k` independent-enough hashes from one function.
fn derive(key: &str, index: usize) -> u64 {
    let index = index.to_string();
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.bytes().chain(index.bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
