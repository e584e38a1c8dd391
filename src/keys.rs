//! Key-space models
//!
//! Every model maps an integer index to a key string. The only inputs are the
//! shared counter values handed in by the caller (and, for the moving hot set,
//! the current hot-window offset), so the models hold no shared state. Index
//! space is zero-based: items `[deleted, current)` are the ones that exist,
//! deletes consume from the low end and creates append at the high end.

use rand::Rng;
use std::time::Duration;

use crate::constants::{
    KEY_INDEX_WIDTH, TTL_CYCLE_END_SECS, TTL_CYCLE_START_SECS, TTL_CYCLE_STEP_SECS,
};

/// Maps an index to `<prefix>-<zero padded index>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFormatter {
    prefix: String,
}

impl KeyFormatter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, index: u64) -> String {
        if self.prefix.is_empty() {
            format!("{:0width$}", index, width = KEY_INDEX_WIDTH)
        } else {
            format!("{}-{:0width$}", self.prefix, index, width = KEY_INDEX_WIDTH)
        }
    }

    /// Inverse of [`KeyFormatter::key`]
    pub fn index_of(&self, key: &str) -> Option<u64> {
        let digits = if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(self.prefix.as_str())?.strip_prefix('-')?
        };
        digits.parse().ok()
    }
}

fn hot_items(existing: u64, working_set: f64) -> u64 {
    (existing as f64 * working_set / 100.0) as u64
}

/// Uniform or hot/cold skewed access over existing keys.
///
/// The hot set is the most recently created `working_set` percent of
/// existing items; `working_set_access` percent of accesses go there.
#[derive(Debug, Clone)]
pub struct ExistingKey {
    working_set: f64,
    working_set_access: u32,
    fmt: KeyFormatter,
}

impl ExistingKey {
    pub fn new(working_set: f64, working_set_access: u32, fmt: KeyFormatter) -> Self {
        Self { working_set, working_set_access, fmt }
    }

    pub fn next_index<R: Rng>(&self, rng: &mut R, current: u64, deleted: u64) -> u64 {
        let existing = current.saturating_sub(deleted);
        if existing == 0 {
            return deleted;
        }
        let num_hot = hot_items(existing, self.working_set);
        let num_cold = existing - num_hot;

        let hot = self.working_set_access >= 100
            || rng.random_range(0..100) < self.working_set_access;
        let (left, right) = if (hot && num_hot > 0) || num_cold == 0 {
            (deleted + num_cold, current)
        } else {
            (deleted, deleted + num_cold)
        };
        rng.random_range(left..right)
    }

    pub fn next<R: Rng>(&self, rng: &mut R, current: u64, deleted: u64) -> String {
        self.fmt.key(self.next_index(rng, current, deleted))
    }
}

/// Hot-window access whose window offset migrates over time.
///
/// `hot_start` is an offset from the oldest surviving item, so keys come from
/// `[deleted + hot_start, deleted + hot_start + hot_items)`, clamped to
/// `[deleted, current)`. The offset is advanced by the hot-workload timer,
/// never by workers.
#[derive(Debug, Clone)]
pub struct ExistingMovingHotWorkloadKey {
    working_set: f64,
    fmt: KeyFormatter,
}

impl ExistingMovingHotWorkloadKey {
    pub fn new(working_set: f64, fmt: KeyFormatter) -> Self {
        Self { working_set, fmt }
    }

    pub fn next_index<R: Rng>(&self, rng: &mut R, current: u64, deleted: u64, hot_start: u64) -> u64 {
        let existing = current.saturating_sub(deleted);
        if existing == 0 {
            return deleted;
        }
        let num_hot = hot_items(existing, self.working_set).clamp(1, existing);
        let start = hot_start.min(existing - num_hot);
        deleted + rng.random_range(start..start + num_hot)
    }

    pub fn next<R: Rng>(&self, rng: &mut R, current: u64, deleted: u64, hot_start: u64) -> String {
        self.fmt.key(self.next_index(rng, current, deleted, hot_start))
    }

    /// Offset of the hot window after one migration.
    ///
    /// Advances by `moving_docs` (one hot-window width when zero) and wraps
    /// within the cold range so the window never runs past existing items.
    /// The result is relative to `deleted`.
    pub fn next_hot_start(
        hot_start: u64,
        current: u64,
        deleted: u64,
        working_set: f64,
        moving_docs: u64,
    ) -> u64 {
        let existing = current.saturating_sub(deleted);
        let num_hot = hot_items(existing, working_set);
        let num_cold = existing - num_hot;
        if num_cold == 0 {
            return hot_start;
        }
        let step = if moving_docs > 0 { moving_docs } else { num_hot.max(1) };
        (hot_start + step) % num_cold
    }
}

/// Keys for creates, with an optional TTL for `expiration` percent of them
#[derive(Debug, Clone)]
pub struct NewKey {
    fmt: KeyFormatter,
    expiration: u32,
    ttl_slot: u64,
}

impl NewKey {
    pub fn new(fmt: KeyFormatter, expiration: u32) -> Self {
        Self { fmt, expiration, ttl_slot: 0 }
    }

    pub fn next<R: Rng>(&mut self, rng: &mut R, index: u64) -> (String, Option<Duration>) {
        let key = self.fmt.key(index);
        let ttl = if self.expiration > 0 && rng.random_range(0..100) < self.expiration {
            Some(self.next_ttl())
        } else {
            None
        };
        (key, ttl)
    }

    fn next_ttl(&mut self) -> Duration {
        let slots = (TTL_CYCLE_END_SECS - TTL_CYCLE_START_SECS) / TTL_CYCLE_STEP_SECS;
        let secs = TTL_CYCLE_START_SECS + (self.ttl_slot % slots) * TTL_CYCLE_STEP_SECS;
        self.ttl_slot += 1;
        Duration::from_secs(secs)
    }
}

/// Keys for deletes: the oldest surviving index first
#[derive(Debug, Clone)]
pub struct KeyForRemoval {
    fmt: KeyFormatter,
}

impl KeyForRemoval {
    pub fn new(fmt: KeyFormatter) -> Self {
        Self { fmt }
    }

    pub fn next(&self, index: u64) -> String {
        self.fmt.key(index)
    }
}

/// Partitions `[0, current)` into one contiguous range per shard so
/// concurrent in-place updates from different shards never collide.
///
/// Partitions are computed from the `current` value handed in; shards that
/// observe the same item count always get disjoint ranges.
#[derive(Debug, Clone)]
pub struct KeyForCasUpdate {
    total_workers: u64,
    fmt: KeyFormatter,
}

impl KeyForCasUpdate {
    pub fn new(total_workers: usize, fmt: KeyFormatter) -> Self {
        Self { total_workers: total_workers.max(1) as u64, fmt }
    }

    /// `[left, right)` owned by shard `sid`
    pub fn range(&self, sid: usize, current: u64) -> (u64, u64) {
        let per_worker = (current / self.total_workers).max(1);
        let left = sid as u64 * per_worker;
        (left, left + per_worker)
    }

    pub fn next_index<R: Rng>(&self, rng: &mut R, sid: usize, current: u64) -> u64 {
        let (left, right) = self.range(sid, current);
        rng.random_range(left..right)
    }

    pub fn next<R: Rng>(&self, rng: &mut R, sid: usize, current: u64) -> String {
        self.fmt.key(self.next_index(rng, sid, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(9901)
    }

    #[test]
    fn test_key_format() {
        let f = KeyFormatter::new("target");
        assert_eq!(f.key(42), "target-000000000042");
        assert_eq!(f.index_of("target-000000000042"), Some(42));
        assert_eq!(f.index_of("other-000000000042"), None);

        let bare = KeyFormatter::new("");
        assert_eq!(bare.key(7), "000000000007");
        assert_eq!(bare.index_of("000000000007"), Some(7));
    }

    #[test]
    fn test_existing_key_uniform_range() {
        let keys = ExistingKey::new(100.0, 100, KeyFormatter::new(""));
        let mut r = rng();
        for _ in 0..5_000 {
            let i = keys.next_index(&mut r, 1_000, 200);
            assert!((200..1_000).contains(&i), "index {} out of range", i);
        }
    }

    #[test]
    fn test_existing_key_hot_cold_split() {
        // 20% hot set receiving 80% of accesses
        let keys = ExistingKey::new(20.0, 80, KeyFormatter::new(""));
        let mut r = rng();
        let n = 20_000;
        let hot = (0..n)
            .filter(|_| keys.next_index(&mut r, 10_000, 0) >= 8_000)
            .count();
        let ratio = hot as f64 / n as f64;
        assert!((0.77..0.83).contains(&ratio), "hot ratio {}", ratio);
    }

    #[test]
    fn test_existing_key_empty_range() {
        let keys = ExistingKey::new(100.0, 100, KeyFormatter::new(""));
        assert_eq!(keys.next_index(&mut rng(), 10, 10), 10);
        assert_eq!(keys.next_index(&mut rng(), 5, 10), 10);
    }

    #[test]
    fn test_moving_hot_window() {
        let keys = ExistingMovingHotWorkloadKey::new(10.0, KeyFormatter::new(""));
        let mut r = rng();
        for _ in 0..1_000 {
            let i = keys.next_index(&mut r, 100_000, 0, 10_000);
            assert!((10_000..20_000).contains(&i));
        }
        let next = ExistingMovingHotWorkloadKey::next_hot_start(10_000, 100_000, 0, 10.0, 0);
        assert_eq!(next, 20_000);
        // Wraps inside the cold range
        let wrapped = ExistingMovingHotWorkloadKey::next_hot_start(85_000, 100_000, 0, 10.0, 0);
        assert_eq!(wrapped, 5_000);
        // Explicit step
        let stepped = ExistingMovingHotWorkloadKey::next_hot_start(0, 100_000, 0, 10.0, 2_500);
        assert_eq!(stepped, 2_500);
    }

    #[test]
    fn test_moving_hot_window_skips_deleted_items() {
        let keys = ExistingMovingHotWorkloadKey::new(10.0, KeyFormatter::new(""));
        let mut r = rng();
        // 500 of 1000 items deleted; offset 100 lands at 600
        for _ in 0..1_000 {
            let i = keys.next_index(&mut r, 1_000, 500, 100);
            assert!((600..650).contains(&i), "index {}", i);
        }
        // An offset past the surviving range is clamped to its tail
        for _ in 0..1_000 {
            let i = keys.next_index(&mut r, 1_000, 500, 900);
            assert!((950..1_000).contains(&i), "index {}", i);
        }
        assert_eq!(keys.next_index(&mut r, 500, 500, 100), 500);

        let next = ExistingMovingHotWorkloadKey::next_hot_start(400, 1_000, 500, 10.0, 0);
        assert_eq!(next, 0);
    }

    #[test]
    fn test_new_key_ttl_cycle() {
        let mut keys = NewKey::new(KeyFormatter::new("p"), 100);
        let mut r = rng();
        let ttls: Vec<u64> = (0..11)
            .map(|i| keys.next(&mut r, i).1.unwrap().as_secs())
            .collect();
        assert_eq!(&ttls[..3], &[150, 180, 210]);
        assert_eq!(ttls[9], 420);
        assert_eq!(ttls[10], 150);

        let mut never = NewKey::new(KeyFormatter::new("p"), 0);
        assert_eq!(never.next(&mut r, 5), ("p-000000000005".to_string(), None));
    }

    #[test]
    fn test_cas_partitions_disjoint() {
        let keys = KeyForCasUpdate::new(4, KeyFormatter::new(""));
        assert_eq!(keys.range(0, 1_000), (0, 250));
        assert_eq!(keys.range(3, 1_000), (750, 1_000));
        // Fewer items than workers still yields disjoint single-key ranges
        assert_eq!(keys.range(2, 3), (2, 3));
    }
}
