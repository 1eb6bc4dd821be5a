//! LPI cache.
//!
//! Maps LPI ID -> last-known L2 ISTE word for LPIs that are currently
//! pending. An entry is present iff the LPI is pending; the pending bit is
//! the field mutated on (almost) every interrupt edge, so caching it avoids
//! a guest-memory round trip for every transition: the cache is effectively
//! a write-back cache only for the pending bit.
//!
//! Each entry also remembers the guest-physical address the word was last
//! read from (or will be written to on eviction), so a cache hit never
//! needs to re-walk the IST to find out where to write back.

use std::collections::HashMap;

use crate::domain::{Domain, DOMAIN_COUNT};

#[derive(Clone, Copy)]
struct Entry {
    word: u32,
    addr: u64,
}

/// `LPI_ID -> (L2 ISTE word, backing address)`, one map per domain (at most
/// one entry per `(domain, id)`).
#[derive(Default)]
pub struct LpiCache {
    by_domain: [HashMap<u32, Entry>; DOMAIN_COUNT],
}

impl LpiCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn map(&self, domain: Domain) -> &HashMap<u32, Entry> {
        &self.by_domain[domain.index()]
    }

    #[inline]
    fn map_mut(&mut self, domain: Domain) -> &mut HashMap<u32, Entry> {
        &mut self.by_domain[domain.index()]
    }

    /// The cached L2 ISTE word, if `id` is currently pending under `domain`.
    pub fn get(&self, domain: Domain, id: u32) -> Option<u32> {
        self.map(domain).get(&id).map(|e| e.word)
    }

    /// Insert or update a cache entry, recording `addr` as where it should
    /// be written back to on eviction.
    pub fn insert(&mut self, domain: Domain, id: u32, word: u32, addr: u64) {
        self.map_mut(domain).insert(id, Entry { word, addr });
    }

    /// Update the word of an existing entry, keeping its backing address.
    ///
    /// Panics if no entry exists for `(domain, id)` — callers only reach
    /// this path after a successful cache hit.
    pub fn update(&mut self, domain: Domain, id: u32, word: u32) {
        if let Some(entry) = self.map_mut(domain).get_mut(&id) {
            entry.word = word;
        }
    }

    /// Remove the entry for `(domain, id)`, returning its `(word, addr)` so
    /// the caller can write it back to guest memory.
    pub fn remove(&mut self, domain: Domain, id: u32) -> Option<(u32, u64)> {
        self.map_mut(domain).remove(&id).map(|e| (e.word, e.addr))
    }

    pub fn contains(&self, domain: Domain, id: u32) -> bool {
        self.map(domain).contains_key(&id)
    }

    /// Iterate every cached `(id, word)` pair for `domain`, for the eager
    /// IRS-side HPPI scan.
    pub fn iter(&self, domain: Domain) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.map(domain).iter().map(|(&id, e)| (id, e.word))
    }

    /// Drain every cached entry for `domain`, handing each `(id, word,
    /// addr)` triple to `writeback` so the caller can commit it to guest
    /// memory, then empty the cache for that domain. Used when the guest
    /// clears `IST_BASER.VALID`.
    pub fn flush<F: FnMut(u32, u32, u64)>(&mut self, domain: Domain, mut writeback: F) {
        for (id, entry) in self.map_mut(domain).drain() {
            writeback(id, entry.word, entry.addr);
        }
    }

    /// Drop every cached entry for `domain` without writing it back, per
    /// the power-on reset semantics.
    pub fn clear_no_writeback(&mut self, domain: Domain) {
        self.map_mut(domain).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_scoped_per_domain() {
        let mut cache = LpiCache::new();
        cache.insert(Domain::Secure, 5, 0xaa, 0x1000);
        assert!(cache.contains(Domain::Secure, 5));
        assert!(!cache.contains(Domain::NonSecure, 5));
    }

    #[test]
    fn flush_visits_every_entry_and_empties_the_domain() {
        let mut cache = LpiCache::new();
        cache.insert(Domain::NonSecure, 1, 0x11, 0x1000);
        cache.insert(Domain::NonSecure, 2, 0x22, 0x1004);

        let mut seen = Vec::new();
        cache.flush(Domain::NonSecure, |id, word, addr| seen.push((id, word, addr)));
        seen.sort();

        assert_eq!(seen, vec![(1, 0x11, 0x1000), (2, 0x22, 0x1004)]);
        assert!(!cache.contains(Domain::NonSecure, 1));
        assert!(!cache.contains(Domain::NonSecure, 2));
    }

    #[test]
    fn clear_no_writeback_drops_silently() {
        let mut cache = LpiCache::new();
        cache.insert(Domain::Secure, 9, 0x42, 0x2000);
        cache.clear_no_writeback(Domain::Secure);
        assert!(!cache.contains(Domain::Secure, 9));
    }

    #[test]
    fn update_preserves_backing_address() {
        let mut cache = LpiCache::new();
        cache.insert(Domain::Secure, 1, 0x1, 0x3000);
        cache.update(Domain::Secure, 1, 0x2);
        let (word, addr) = cache.remove(Domain::Secure, 1).unwrap();
        assert_eq!(word, 0x2);
        assert_eq!(addr, 0x3000);
    }
}
