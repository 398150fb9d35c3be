use std::fs;
use std::time::Duration;

use anyhow::Result;
use reusecache::cache::{Disposal, DisposeOutcome, EntryStatus, Lookup};
use reusecache::{CacheConfig, CacheError, CacheKey, MatrixBlock, ReuseCache};
use tempfile::TempDir;

const MB: u64 = 1024 * 1024;

fn spill_cache(limit: u64) -> Result<(TempDir, ReuseCache)> {
    let scratch = tempfile::Builder::new()
        .prefix("reusecache-spill-test")
        .tempdir()?;
    let mut config = CacheConfig::with_limit(limit);
    config.scratch_root = Some(scratch.path().to_path_buf());
    Ok((scratch, ReuseCache::new(config)))
}

fn dense_mb(mb: u64) -> MatrixBlock {
    let cells = (mb * MB - reusecache_matrix::BLOCK_HEADER_BYTES) / 8;
    let values = (0..cells).map(|i| (i % 97) as f64 * 0.5 - 3.0).collect();
    MatrixBlock::dense(1, cells as usize, values).expect("shape matches")
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn status(cache: &ReuseCache, key: &CacheKey) -> Option<EntryStatus> {
    cache.entry(key).map(|entry| entry.status())
}

#[test]
fn disposing_one_alias_defers_until_the_group_is_decided() -> Result<()> {
    let (_scratch, mut cache) = spill_cache(64 * MB)?;
    let k1 = CacheKey::new(1, "rand");
    let k2 = CacheKey::new(2, "rand");
    cache.put(k1.clone(), dense_mb(10), ms(400))?;
    cache.insert_alias(k2.clone(), &k1, ms(400))?;
    assert_eq!(cache.cache_size_bytes(), 10 * MB);

    let outcome = cache.dispose(&k1, Disposal::Spill)?;
    assert_eq!(outcome, DisposeOutcome::Deferred);
    assert_eq!(cache.cache_size_bytes(), 10 * MB);
    assert_eq!(status(&cache, &k1), Some(EntryStatus::ToSpill));
    assert_eq!(status(&cache, &k2), Some(EntryStatus::Normal));
    assert!(cache.entry(&k2).and_then(|entry| entry.value()).is_some());

    let outcome = cache.dispose(&k2, Disposal::Delete)?;
    assert_eq!(outcome, DisposeOutcome::Disposed);
    assert_eq!(cache.cache_size_bytes(), 0);
    assert_eq!(status(&cache, &k1), Some(EntryStatus::Spilled));
    assert_eq!(status(&cache, &k2), Some(EntryStatus::Spilled));
    assert_eq!(cache.statistics().spill_writes, 1);
    Ok(())
}

#[test]
fn fully_deleted_alias_group_releases_its_footprint_once() -> Result<()> {
    let (_scratch, mut cache) = spill_cache(64 * MB)?;
    let k1 = CacheKey::new(1, "rand");
    let k2 = CacheKey::new(2, "rand");
    cache.put(k1.clone(), dense_mb(4), ms(1))?;
    cache.insert_alias(k2.clone(), &k1, ms(1))?;

    cache.dispose(&k2, Disposal::Delete)?;
    cache.dispose(&k1, Disposal::Delete)?;

    assert!(!cache.contains(&k1));
    assert!(!cache.contains(&k2));
    assert_eq!(cache.cache_size_bytes(), 0);
    assert_eq!(cache.accounted_bytes(), 0);
    Ok(())
}

#[test]
fn aliases_spill_to_one_shared_file_and_reload_together() -> Result<()> {
    let (_scratch, mut cache) = spill_cache(12 * MB)?;
    let k1 = CacheKey::new(1, "tsmm");
    let k2 = CacheKey::new(2, "tsmm");
    let original = dense_mb(10);
    cache.put(k1.clone(), original.clone(), ms(500))?;
    cache.insert_alias(k2.clone(), &k1, ms(600))?;

    cache.put(CacheKey::new(3, "tsmm"), dense_mb(5), ms(1))?;

    assert!(cache.is_spilled(&k1));
    assert!(cache.is_spilled(&k2));
    let first = cache.spill_record(&k1).map(|record| record.path.clone());
    let second = cache.spill_record(&k2).map(|record| record.path.clone());
    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(cache.cache_size_bytes(), 5 * MB);
    assert_eq!(cache.statistics().spill_writes, 1);

    let reloaded = cache.get(&k2)?.value().expect("spilled value reloads");
    let block = reloaded.as_matrix().expect("matrix value");
    assert!(block.bit_eq(&original));
    assert!(!cache.is_spilled(&k1));
    assert!(!cache.is_spilled(&k2));
    assert_eq!(status(&cache, &k1), Some(EntryStatus::Normal));
    assert!(cache.get(&k1)?.is_hit());
    assert!(!first.map(|path| path.exists()).unwrap_or(true));
    assert_eq!(cache.accounted_bytes(), cache.cache_size_bytes());
    assert_eq!(cache.statistics().disk_hits, 1);
    Ok(())
}

#[test]
fn half_decided_alias_group_is_rolled_back() -> Result<()> {
    let (_scratch, mut cache) = spill_cache(20 * MB)?;
    let k1 = CacheKey::new(1, "ba+*");
    let k2 = CacheKey::new(2, "ba+*");
    let other = CacheKey::new(3, "ba+*");
    cache.put(k1.clone(), dense_mb(10), ms(1))?;
    cache.insert_alias(k2.clone(), &k1, ms(1_000))?;
    cache.put(other.clone(), dense_mb(8), ms(20))?;

    cache.make_space(5 * MB)?;

    assert!(!cache.contains(&other));
    assert_eq!(status(&cache, &k1), Some(EntryStatus::Normal));
    assert_eq!(status(&cache, &k2), Some(EntryStatus::Normal));
    assert!(cache.is_queued(&k1));
    assert!(cache.is_queued(&k2));
    assert_eq!(cache.cache_size_bytes(), 10 * MB);
    let stats = cache.statistics();
    assert_eq!(stats.rolled_back_groups, 1);
    assert_eq!(stats.deferred_disposals, 1);
    Ok(())
}

#[test]
fn sparse_blocks_survive_spill_and_reload() -> Result<()> {
    let (_scratch, mut cache) = spill_cache(MB)?;
    let key = CacheKey::new(7, "solve");
    let triplets: Vec<_> = (0..2_000)
        .map(|i| (i % 500, (i * 31) % 400, i as f64 - 999.5))
        .collect();
    let sparse = MatrixBlock::sparse_from_triplets(500, 400, &triplets)?;
    cache.put(key.clone(), sparse.clone(), ms(250))?;

    cache.make_space(MB)?;
    assert!(cache.is_spilled(&key));
    assert_eq!(cache.cache_size_bytes(), 0);

    match cache.get(&key)? {
        Lookup::Hit(value) => {
            let block = value.as_matrix().expect("matrix value");
            assert!(block.is_sparse());
            assert!(block.bit_eq(&sparse));
        }
        other => panic!("expected a hit, got {other:?}"),
    }
    assert!(cache.spill_record(&key).is_none());
    assert_eq!(cache.cache_size_bytes(), sparse.in_memory_size());
    Ok(())
}

#[test]
fn reload_without_spill_record_fails() -> Result<()> {
    let (_scratch, mut cache) = spill_cache(16 * MB)?;
    let key = CacheKey::new(1, "rand");
    cache.put(key.clone(), dense_mb(1), ms(50))?;

    let err = cache.reload(&key).unwrap_err();
    assert!(matches!(err, CacheError::MissingSpillRecord { .. }));
    assert_eq!(err.key(), Some(&key));
    Ok(())
}

#[test]
fn corrupted_spill_file_is_reported() -> Result<()> {
    let (_scratch, mut cache) = spill_cache(4 * MB)?;
    let key = CacheKey::new(1, "tsmm");
    cache.put(key.clone(), dense_mb(3), ms(900))?;
    cache.make_space(2 * MB)?;

    let path = cache
        .spill_record(&key)
        .map(|record| record.path.to_path_buf())
        .expect("entry was spilled");
    let mut bytes = fs::read(&path)?;
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    fs::write(&path, bytes)?;

    let err = cache.get(&key).unwrap_err();
    assert!(matches!(err, CacheError::Codec { .. }));
    assert!(cache.is_spilled(&key));
    Ok(())
}

#[test]
fn large_spills_calibrate_write_throughput() -> Result<()> {
    let (_scratch, mut cache) = spill_cache(12 * MB)?;
    let before = *cache.throughput();
    cache.put(CacheKey::new(1, "tsmm"), dense_mb(10), ms(5_000))?;
    cache.put(CacheKey::new(2, "tsmm"), dense_mb(10), ms(5_000))?;

    let after = *cache.throughput();
    assert_eq!(cache.statistics().spill_writes, 1);
    assert_ne!(after.dense_write, before.dense_write);
    assert_eq!(after.sparse_write, before.sparse_write);
    assert_eq!(after.dense_read, before.dense_read);
    Ok(())
}

fn filled_mb(mb: u64, value: f64) -> MatrixBlock {
    let cells = ((mb * MB - reusecache_matrix::BLOCK_HEADER_BYTES) / 8) as usize;
    MatrixBlock::dense(1, cells, vec![value; cells]).expect("shape matches")
}

#[test]
fn keys_sharing_an_id_spill_to_separate_files() -> Result<()> {
    let (_scratch, mut cache) = spill_cache(8 * MB)?;
    let tsmm = CacheKey::new(7, "tsmm");
    let solve = CacheKey::new(7, "solve");
    let ones = filled_mb(3, 1.0);
    let twos = filled_mb(3, 2.0);
    cache.put(tsmm.clone(), ones.clone(), ms(900))?;
    cache.put(solve.clone(), twos.clone(), ms(900))?;

    cache.make_space(8 * MB)?;
    assert!(cache.is_spilled(&tsmm));
    assert!(cache.is_spilled(&solve));
    let first = cache.spill_record(&tsmm).map(|record| record.path.clone());
    let second = cache.spill_record(&solve).map(|record| record.path.clone());
    assert_ne!(first, second);

    let value = cache.get(&tsmm)?.value().expect("tsmm reloads");
    assert!(value.as_matrix().expect("matrix value").bit_eq(&ones));
    let value = cache.get(&solve)?.value().expect("solve reloads");
    assert!(value.as_matrix().expect("matrix value").bit_eq(&twos));
    Ok(())
}

fn unwritable_cache(limit: u64) -> Result<(TempDir, ReuseCache)> {
    let scratch = tempfile::tempdir()?;
    let blocker = scratch.path().join("not-a-dir");
    fs::write(&blocker, b"")?;
    let mut config = CacheConfig::with_limit(limit);
    config.scratch_root = Some(blocker);
    Ok((scratch, ReuseCache::new(config)))
}

#[test]
fn failed_spill_keeps_entry_evictable() -> Result<()> {
    let (_scratch, mut cache) = unwritable_cache(12 * MB)?;
    let key = CacheKey::new(1, "tsmm");
    cache.put(key.clone(), dense_mb(10), ms(5_000))?;

    let err = cache.make_space(5 * MB).unwrap_err();
    assert!(matches!(err, CacheError::Io { .. }));
    assert_eq!(err.key(), Some(&key));
    assert!(err.to_string().contains("tsmm#1"));

    assert_eq!(status(&cache, &key), Some(EntryStatus::Normal));
    assert!(cache.is_queued(&key));
    assert_eq!(cache.cache_size_bytes(), 10 * MB);
    assert_eq!(cache.accounted_bytes(), cache.cache_size_bytes());

    assert_eq!(cache.dispose(&key, Disposal::Delete)?, DisposeOutcome::Disposed);
    assert_eq!(cache.cache_size_bytes(), 0);
    Ok(())
}

#[test]
fn failed_group_spill_restores_every_alias() -> Result<()> {
    let (_scratch, mut cache) = unwritable_cache(12 * MB)?;
    let k1 = CacheKey::new(1, "rand");
    let k2 = CacheKey::new(2, "rand");
    cache.put(k1.clone(), dense_mb(10), ms(5_000))?;
    cache.insert_alias(k2.clone(), &k1, ms(6_000))?;

    let err = cache.make_space(5 * MB).unwrap_err();
    assert!(matches!(err, CacheError::Io { key: Some(_), .. }));

    for key in [&k1, &k2] {
        assert_eq!(status(&cache, key), Some(EntryStatus::Normal));
        assert!(cache.is_queued(key));
        assert!(!cache.is_spilled(key));
    }
    assert_eq!(cache.cache_size_bytes(), 10 * MB);

    assert_eq!(cache.dispose(&k1, Disposal::Delete)?, DisposeOutcome::Deferred);
    assert_eq!(cache.dispose(&k2, Disposal::Delete)?, DisposeOutcome::Disposed);
    assert_eq!(cache.cache_size_bytes(), 0);
    Ok(())
}
