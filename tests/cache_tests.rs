use std::time::Duration;

use anyhow::Result;
use rayon::prelude::*;
use reusecache::cache::{EntryStatus, Lookup};
use reusecache::{
    CacheConfig, CacheError, CacheKey, EvictionPolicyConfig, MatrixBlock, ReuseCache, ScalarValue,
    SharedReuseCache,
};
use tempfile::TempDir;

const MB: u64 = 1024 * 1024;

fn temp_scratch_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("reusecache-test")
        .tempdir()
        .expect("failed to create temp dir")
}

fn cache_with(limit: u64, tweak: impl FnOnce(&mut CacheConfig)) -> (TempDir, ReuseCache) {
    let scratch = temp_scratch_dir();
    let mut config = CacheConfig::with_limit(limit);
    config.scratch_root = Some(scratch.path().to_path_buf());
    tweak(&mut config);
    (scratch, ReuseCache::new(config))
}

/// Dense block whose in-memory footprint is exactly `mb` megabytes.
fn dense_mb(mb: u64) -> MatrixBlock {
    let cells = (mb * MB - reusecache_matrix::BLOCK_HEADER_BYTES) / 8;
    MatrixBlock::zeros(1, cells as usize)
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[test]
fn cheap_large_matrix_is_deleted_before_expensive_one() -> Result<()> {
    let (_scratch, mut cache) = cache_with(130 * MB, |_| {});
    let a = CacheKey::new(1, "tsmm");
    let b = CacheKey::new(2, "tsmm");
    cache.put(a.clone(), dense_mb(60), ms(50))?;
    cache.put(b.clone(), dense_mb(60), ms(5))?;
    assert_eq!(cache.cache_size_bytes(), 120 * MB);

    let freed = cache.make_space(50 * MB)?;

    assert_eq!(freed, 60 * MB);
    assert!(!cache.contains(&b));
    assert!(!cache.is_spilled(&b));
    assert!(cache.contains(&a));
    assert_eq!(cache.cache_size_bytes(), 60 * MB);
    let stats = cache.statistics();
    assert_eq!(stats.mem_deletes, 1);
    assert_eq!(stats.spill_writes, 0);
    Ok(())
}

#[test]
fn make_space_reaches_budget_or_drains_queue() -> Result<()> {
    let (_scratch, mut cache) = cache_with(8 * MB, |config| config.spill_enabled = false);
    for id in 0..6 {
        cache.put(CacheKey::new(id, "ba+*"), dense_mb(1), ms(id + 1))?;
    }
    assert_eq!(cache.cache_size_bytes(), 6 * MB);

    cache.make_space(5 * MB)?;
    assert!(cache.is_below_threshold(5 * MB));
    assert_eq!(cache.cache_size_bytes(), 3 * MB);

    cache.make_space(100 * MB)?;
    assert_eq!(cache.queued_len(), 0);
    assert_eq!(cache.cache_size_bytes(), 0);
    assert_eq!(cache.accounted_bytes(), 0);
    Ok(())
}

#[test]
fn expensive_scalars_are_pinned_and_never_evicted() -> Result<()> {
    let (_scratch, mut cache) = cache_with(4 * MB, |_| {});
    let pinned = CacheKey::new(1, "uak+");
    let cheap = CacheKey::new(2, "uak+");
    cache.put(pinned.clone(), ScalarValue::Double(3.5), ms(40))?;
    cache.put(cheap.clone(), ScalarValue::Double(1.0), ms(1))?;

    assert_eq!(
        cache.entry(&pinned).map(|entry| entry.status()),
        Some(EntryStatus::Pinned)
    );
    assert!(!cache.is_queued(&pinned));
    assert!(cache.is_queued(&cheap));

    cache.make_space(u64::MAX / 2)?;

    assert!(cache.contains(&pinned));
    assert!(!cache.contains(&cheap));
    assert_eq!(cache.statistics().pinned, 1);
    Ok(())
}

#[test]
fn scalars_are_deleted_rather_than_spilled() -> Result<()> {
    let (_scratch, mut cache) = cache_with(64 * MB, |_| {});
    let key = CacheKey::new(9, "nrow");
    cache.put(key.clone(), ScalarValue::Int(42), ms(2))?;

    let err = cache
        .dispose(&key, reusecache::cache::Disposal::Spill)
        .unwrap_err();
    assert!(matches!(err, CacheError::ScalarSpill { .. }));
    assert_eq!(
        cache.entry(&key).map(|entry| entry.status()),
        Some(EntryStatus::Normal)
    );

    cache.make_space(64 * MB)?;
    assert!(!cache.contains(&key));
    assert_eq!(cache.statistics().spill_writes, 0);
    Ok(())
}

#[test]
fn lru_policy_keeps_recently_read_entries() -> Result<()> {
    let (_scratch, mut cache) = cache_with(3 * MB, |config| {
        config.policy = EvictionPolicyConfig::Lru;
    });
    let keys: Vec<_> = (0..3).map(|id| CacheKey::new(id, "rand")).collect();
    for key in &keys {
        cache.put(key.clone(), dense_mb(1), ms(1))?;
    }

    assert!(cache.get(&keys[0])?.is_hit());
    cache.put(CacheKey::new(3, "rand"), dense_mb(1), ms(1))?;

    assert!(cache.contains(&keys[0]));
    assert!(!cache.contains(&keys[1]));
    assert!(cache.contains(&keys[2]));
    Ok(())
}

#[test]
fn disabled_spilling_deletes_expensive_matrices() -> Result<()> {
    let (scratch, mut cache) = cache_with(12 * MB, |config| config.spill_enabled = false);
    let key = CacheKey::new(1, "solve");
    cache.put(key.clone(), dense_mb(10), ms(10_000))?;
    cache.put(CacheKey::new(2, "solve"), dense_mb(10), ms(10_000))?;

    assert!(!cache.contains(&key));
    assert!(!cache.is_spilled(&key));
    assert_eq!(std::fs::read_dir(scratch.path())?.count(), 0);
    Ok(())
}

#[test]
fn placeholders_report_pending_until_completed() -> Result<()> {
    let (_scratch, mut cache) = cache_with(16 * MB, |_| {});
    let key = CacheKey::new(5, "cbind");
    cache.insert_placeholder(key.clone())?;
    assert!(matches!(cache.get(&key)?, Lookup::Pending));
    assert_eq!(cache.cache_size_bytes(), 0);
    assert!(!cache.is_queued(&key));

    cache.complete_placeholder(&key, dense_mb(2), ms(30))?;
    assert!(cache.get(&key)?.is_hit());
    assert_eq!(cache.cache_size_bytes(), 2 * MB);
    assert!(matches!(cache.get(&CacheKey::new(6, "cbind"))?, Lookup::Miss));
    Ok(())
}

#[test]
fn duplicate_keys_are_rejected() -> Result<()> {
    let (_scratch, mut cache) = cache_with(16 * MB, |_| {});
    let key = CacheKey::new(1, "ba+*");
    cache.put(key.clone(), dense_mb(1), ms(5))?;
    let err = cache.put(key, dense_mb(1), ms(5)).unwrap_err();
    assert!(matches!(err, CacheError::DuplicateKey { .. }));
    assert_eq!(cache.cache_size_bytes(), MB);
    Ok(())
}

#[test]
fn size_counter_matches_charged_entries_throughout() -> Result<()> {
    let (_scratch, mut cache) = cache_with(20 * MB, |_| {});
    let mut keys = Vec::new();
    for id in 0..40u64 {
        let key = CacheKey::new(id, "ba+*");
        if id % 5 == 4 {
            let existing: &CacheKey = &keys[keys.len() - 1];
            if cache.get(existing)?.is_hit() {
                cache.insert_alias(key.clone(), existing, ms(id * 7))?;
            }
        } else if id % 7 == 0 {
            cache.put(key.clone(), ScalarValue::Double(id as f64), ms(id % 12))?;
        } else {
            cache.put(key.clone(), dense_mb(1 + id % 4), ms(3 + id * 11))?;
        }
        keys.push(key);
        assert_eq!(cache.accounted_bytes(), cache.cache_size_bytes());

        if id % 3 == 0 {
            cache.get(&keys[(id as usize * 7) % keys.len()])?;
            assert_eq!(cache.accounted_bytes(), cache.cache_size_bytes());
        }
    }
    assert!(cache.cache_size_bytes() <= cache.cache_limit_bytes());
    Ok(())
}

#[test]
fn reset_clears_entries_queue_and_spill_records() -> Result<()> {
    let (_scratch, mut cache) = cache_with(12 * MB, |_| {});
    let spilled = CacheKey::new(1, "solve");
    cache.put(spilled.clone(), dense_mb(10), ms(5_000))?;
    cache.put(CacheKey::new(2, "solve"), dense_mb(10), ms(5_000))?;
    let spill_path = cache
        .spill_record(&spilled)
        .map(|record| record.path.to_path_buf())
        .expect("expected first entry to be spilled");
    assert!(spill_path.exists());

    cache.reset();

    assert_eq!(cache.cache_size_bytes(), 0);
    assert_eq!(cache.queued_len(), 0);
    assert!(cache.is_empty());
    assert!(!cache.is_spilled(&spilled));
    assert!(!spill_path.exists());
    assert_eq!(cache.statistics().spill_writes, 0);

    cache.put(spilled.clone(), dense_mb(1), ms(1))?;
    assert_eq!(cache.cache_size_bytes(), MB);
    Ok(())
}

#[test]
fn shared_cache_serves_parallel_workers() -> Result<()> {
    let (_scratch, cache) = cache_with(16 * MB, |_| {});
    let shared = SharedReuseCache::new(cache);

    (0..4u64).into_par_iter().try_for_each(|worker| -> Result<()> {
        for op in 0..25u64 {
            let key = CacheKey::new((worker << 32) | op, "tsmm");
            shared.put(key.clone(), dense_mb(1), ms(op * 4))?;
            shared.get(&key)?;
        }
        Ok(())
    })?;

    let guard = shared.lock();
    assert!(guard.cache_size_bytes() <= 16 * MB);
    assert_eq!(guard.accounted_bytes(), guard.cache_size_bytes());
    drop(guard);
    let stats = shared.statistics();
    assert_eq!(stats.mem_hits + stats.disk_hits + stats.misses, 100);
    Ok(())
}

#[test]
fn reads_of_unqueued_entries_leave_them_unqueued() -> Result<()> {
    let (_scratch, mut cache) = cache_with(16 * MB, |config| {
        config.policy = EvictionPolicyConfig::Lru;
    });
    let pinned = CacheKey::new(1, "uak+");
    let pending = CacheKey::new(2, "ba+*");
    let queued = CacheKey::new(3, "ba+*");
    cache.put(pinned.clone(), ScalarValue::Double(7.0), ms(80))?;
    cache.insert_placeholder(pending.clone())?;
    cache.put(queued.clone(), dense_mb(1), ms(1))?;
    assert_eq!(cache.queued_len(), 1);

    assert!(cache.get(&pinned)?.is_hit());
    assert!(matches!(cache.get(&pending)?, Lookup::Pending));

    assert!(!cache.is_queued(&pinned));
    assert!(!cache.is_queued(&pending));
    assert_eq!(
        cache.entry(&pinned).map(|entry| entry.status()),
        Some(EntryStatus::Pinned)
    );
    assert_eq!(
        cache.entry(&pending).map(|entry| entry.status()),
        Some(EntryStatus::Normal)
    );
    assert_eq!(cache.queued_len(), 1);
    Ok(())
}

#[test]
fn cost_size_order_ignores_reads() -> Result<()> {
    let (_scratch, mut cache) = cache_with(16 * MB, |_| {});
    let keys: Vec<_> = (0..3).map(|id| CacheKey::new(id, "tsmm")).collect();
    for (cost, key) in [30, 10, 20].into_iter().zip(&keys) {
        cache.put(key.clone(), dense_mb(1), ms(cost))?;
    }
    let before: Vec<_> = cache.queued_keys().cloned().collect();
    assert_eq!(before, vec![keys[1].clone(), keys[2].clone(), keys[0].clone()]);

    for key in &keys {
        assert!(cache.get(key)?.is_hit());
    }
    let after: Vec<_> = cache.queued_keys().cloned().collect();
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn lru_reads_move_entries_to_the_back() -> Result<()> {
    let (_scratch, mut cache) = cache_with(16 * MB, |config| {
        config.policy = EvictionPolicyConfig::Lru;
    });
    let keys: Vec<_> = (0..3).map(|id| CacheKey::new(id, "rand")).collect();
    for key in &keys {
        cache.put(key.clone(), dense_mb(1), ms(1))?;
    }

    cache.get(&keys[0])?;
    let order: Vec<_> = cache.queued_keys().cloned().collect();
    assert_eq!(order, vec![keys[1].clone(), keys[2].clone(), keys[0].clone()]);
    Ok(())
}
