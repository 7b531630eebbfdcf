//! Buffer pool tests: bounded capacity, ownership hand-off and statistics

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::{Duration, Instant},
};

use ens_runtime::{
    buffers::{BufferPool, BufferPoolConfig, BufferPoolConfigBuilder},
    EnsError,
};

fn small_pool(block_size: usize, block_count: usize) -> BufferPool {
    let config = BufferPoolConfigBuilder::new("test_pool")
        .size_class(block_size, block_count)
        .build()
        .unwrap();
    BufferPool::new(config).unwrap()
}

#[cfg(test)]
mod buffer_pool_tests {
    use super::*;

    /// Test: An exhausted pool fails immediately instead of blocking
    #[test]
    fn test_exhaustion_fails_fast() {
        let pool = small_pool(128, 4);
        let patterns: Vec<Vec<u8>> = (0..4u8)
            .map(|i| (0..100u8).map(|b| b.wrapping_mul(i + 3) ^ i).collect())
            .collect();
        let held: Vec<_> = patterns
            .iter()
            .map(|pattern| pool.alloc_from(pattern).unwrap())
            .collect();

        let start = Instant::now();
        let result = pool.alloc(16);
        assert!(matches!(result, Err(EnsError::PoolExhausted { .. })));
        assert!(start.elapsed() < Duration::from_millis(500));

        // Outstanding buffers are untouched by the failed allocation
        for (buffer, pattern) in held.iter().zip(&patterns) {
            assert_eq!(buffer.len(), 100);
            assert_eq!(buffer.as_slice(), pattern.as_slice());
        }

        drop(held);
        assert!(pool.alloc(16).is_ok());
    }

    /// Test: With an allocation timeout, a release during the wait satisfies the request
    #[test]
    fn test_allocation_timeout_waits_for_release() {
        let config = BufferPoolConfigBuilder::new("waiting")
            .size_class(64, 1)
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let pool = BufferPool::new(config).unwrap();

        let held = pool.alloc(8).unwrap();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(held);
        });

        let buffer = pool.alloc(8).unwrap();
        assert_eq!(buffer.len(), 8);
        releaser.join().unwrap();
    }

    /// Test: The allocation timeout bounds the wait
    #[test]
    fn test_allocation_timeout_expires() {
        let config = BufferPoolConfigBuilder::new("expiring")
            .size_class(64, 1)
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let pool = BufferPool::new(config).unwrap();

        let _held = pool.alloc(8).unwrap();
        let start = Instant::now();
        assert!(matches!(pool.alloc(8), Err(EnsError::PoolExhausted { .. })));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    /// Test: Requests are served by the smallest class that fits, spilling upwards
    #[test]
    fn test_size_class_selection() {
        let config = BufferPoolConfigBuilder::new("classes")
            .size_class(4096, 2)
            .size_class(256, 1)
            .build()
            .unwrap();
        let pool = BufferPool::new(config).unwrap();
        assert_eq!(pool.max_block_size(), 4096);

        let small = pool.alloc(100).unwrap();
        assert_eq!(small.capacity(), 256);

        // Small class is empty now; the next small request spills into 4096
        let spilled = pool.alloc(100).unwrap();
        assert_eq!(spilled.capacity(), 4096);

        let large = pool.alloc(3000).unwrap();
        assert_eq!(large.capacity(), 4096);

        assert!(matches!(pool.alloc(10), Err(EnsError::PoolExhausted { .. })));
        assert!(matches!(
            pool.alloc(5000),
            Err(EnsError::BufferTooLarge { requested: 5000, max: 4096 })
        ));
    }

    /// Test: Zero-length buffers are valid
    #[test]
    fn test_zero_length_allocation() {
        let pool = small_pool(64, 2);
        let buffer = pool.alloc(0).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.as_slice(), b"");
    }

    /// Test: Contents survive writes and copies
    #[test]
    fn test_buffer_contents() {
        let pool = small_pool(64, 2);
        let mut buffer = pool.alloc_from(b"hello").unwrap();
        assert_eq!(buffer.as_slice(), b"hello");

        buffer.write(0, b"J").unwrap();
        assert_eq!(buffer.as_slice(), b"Jello");

        assert!(buffer.write(60, b"too long").is_err());
        buffer.set_len(64).unwrap();
        assert!(buffer.set_len(65).is_err());
    }

    /// Test: Raw hand-off moves ownership to the C side and back exactly once
    #[test]
    fn test_raw_ownership_round_trip() {
        let pool = small_pool(64, 2);
        let buffer = pool.alloc_from(b"raw").unwrap();
        let (ptr, len) = buffer.into_raw_parts();
        assert_eq!(len, 3);
        assert_eq!(pool.available(), 1);

        let reclaimed = pool.from_raw(ptr, len).unwrap();
        assert_eq!(reclaimed.as_slice(), b"raw");

        // Runtime owns the block again, so C can no longer free or reclaim it
        assert!(matches!(pool.free_raw(ptr), Err(EnsError::InvalidBuffer { .. })));
        assert!(matches!(pool.from_raw(ptr, len), Err(EnsError::InvalidBuffer { .. })));

        drop(reclaimed);
        assert_eq!(pool.available(), 2);
    }

    /// Test: Double frees and foreign pointers are rejected and counted
    #[test]
    fn test_raw_ownership_violations() {
        let pool = small_pool(64, 2);
        let (ptr, _) = pool.alloc(8).unwrap().into_raw_parts();

        pool.free_raw(ptr).unwrap();
        assert!(pool.free_raw(ptr).is_err());

        let mut foreign = [0u8; 16];
        assert!(pool.free_raw(foreign.as_mut_ptr()).is_err());
        assert!(pool.free_raw(std::ptr::null_mut()).is_err());

        // Interior pointers are not block starts
        let (ptr, _) = pool.alloc(8).unwrap().into_raw_parts();
        assert!(pool.free_raw(unsafe { ptr.add(1) }).is_err());
        pool.free_raw(ptr).unwrap();

        let stats = pool.stats();
        assert!(stats.ownership_violations >= 3);
        assert_eq!(stats.currently_in_use, 0);
        assert_eq!(pool.available(), 2);
    }

    /// Test: A reclaimed length beyond the block size is refused
    #[test]
    fn test_from_raw_rejects_oversized_length() {
        let pool = small_pool(64, 1);
        let (ptr, _) = pool.alloc(8).unwrap().into_raw_parts();
        assert!(matches!(pool.from_raw(ptr, 65), Err(EnsError::BufferTooLarge { .. })));
        pool.free_raw(ptr).unwrap();
    }

    /// Test: Concurrent alloc/free never hands one block to two owners
    #[test]
    fn test_concurrent_alloc_free() {
        let pool = Arc::new(small_pool(64, 8));
        let threads = 4;
        let barrier = Arc::new(Barrier::new(threads));
        let exhausted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..threads)
            .map(|id| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                let exhausted = Arc::clone(&exhausted);
                thread::spawn(move || {
                    barrier.wait();
                    for round in 0..500u32 {
                        match pool.alloc(8) {
                            Ok(mut buffer) => {
                                let stamp = ((id as u32) << 16) | round;
                                buffer.write(0, &stamp.to_le_bytes()).unwrap();
                                thread::yield_now();
                                assert_eq!(&buffer.as_slice()[..4], &stamp.to_le_bytes());
                            }
                            Err(EnsError::PoolExhausted { .. }) => {
                                exhausted.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.currently_in_use, 0);
        assert_eq!(stats.total_allocations, stats.total_releases);
        assert_eq!(stats.allocation_failures, exhausted.load(Ordering::Relaxed) as u64);
        assert!(stats.peak_usage <= 8);
        assert_eq!(pool.available(), 8);
    }

    /// Test: Statistics track usage, peak and failures
    #[test]
    fn test_pool_statistics() {
        let pool = small_pool(64, 4);
        let a = pool.alloc(1).unwrap();
        let b = pool.alloc(1).unwrap();
        let c = pool.alloc(1).unwrap();
        drop(b);

        let stats = pool.stats();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.currently_in_use, 2);
        assert_eq!(stats.peak_usage, 3);
        assert_eq!(stats.total_allocations, 3);
        assert_eq!(stats.total_releases, 1);
        assert!((stats.utilization() - 0.5).abs() < f64::EPSILON);

        assert!(pool.alloc(100).is_err());
        let stats = pool.stats();
        assert_eq!(stats.allocation_failures, 1);
        assert!(stats.success_rate() < 1.0);
        assert!(stats.summary().contains("capacity: 4"));

        pool.free(a);
        pool.free(c);
        assert_eq!(pool.stats().currently_in_use, 0);
    }

    /// Test: Invalid configurations are refused
    #[test]
    fn test_invalid_configuration() {
        assert!(BufferPoolConfigBuilder::new("empty").build().is_err());
        assert!(BufferPoolConfigBuilder::new("zero").size_class(0, 4).build().is_err());
        assert!(BufferPoolConfigBuilder::new("none").size_class(64, 0).build().is_err());
        assert!(BufferPool::new(BufferPoolConfig::default().with_alignment(48)).is_err());
    }
}
