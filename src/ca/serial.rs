//! Serial number allocation for generated certificates.

use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;

/// Process-wide serial number source.
///
/// Seeded once (normally from the wall clock) and bumped atomically for every
/// certificate generated. Values are strictly increasing within a process;
/// across processes they are only as unique as the clock seed. Once
/// `u64::MAX` has been handed out the allocator is exhausted and never wraps.
#[derive(Debug)]
pub struct SerialAllocator {
    current: AtomicU64,
}

impl SerialAllocator {
    /// Creates an allocator whose first serial will be `seed + 1`.
    pub fn new(seed: u64) -> Self {
        Self {
            current: AtomicU64::new(seed),
        }
    }

    /// Creates an allocator seeded with the current Unix time in seconds.
    pub fn from_clock() -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self::new(u64::try_from(now).unwrap_or_default())
    }

    /// Allocates the next serial number, or `None` once exhausted.
    pub fn next(&self) -> Option<u64> {
        self.current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .ok()
            .map(|prev| prev + 1)
    }

    /// Returns the most recently allocated serial (or the seed).
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }
}

impl Default for SerialAllocator {
    fn default() -> Self {
        Self::from_clock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Barrier;
    use std::thread;

    /// Serials increase by one starting after the seed.
    #[test]
    fn next_increments_seed() {
        let serials = SerialAllocator::new(41);
        assert_eq!(serials.next(), Some(42));
        assert_eq!(serials.next(), Some(43));
        assert_eq!(serials.current(), 43);
    }

    /// The last value is handed out once, after which allocation fails
    /// instead of wrapping to zero.
    #[test]
    fn exhausted_allocator_does_not_wrap() {
        let serials = SerialAllocator::new(u64::MAX - 1);
        assert_eq!(serials.next(), Some(u64::MAX));
        assert_eq!(serials.next(), None);
        assert_eq!(serials.next(), None);
        assert_eq!(serials.current(), u64::MAX);
    }

    /// The clock seed is a Unix timestamp, not zero.
    #[test]
    fn clock_seed_is_recent() {
        let serials = SerialAllocator::from_clock();
        // 2020-01-01T00:00:00Z
        assert!(serials.current() > 1_577_836_800);
    }

    /// Threads hammering the allocator at once never observe the same value.
    #[test]
    fn concurrent_allocation_is_unique() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1_000;

        let serials = SerialAllocator::new(1_000);
        let barrier = Barrier::new(THREADS);

        let all: Vec<u64> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        let mut seen = Vec::with_capacity(PER_THREAD);
                        let mut last = 0;
                        for _ in 0..PER_THREAD {
                            let serial = serials.next().unwrap();
                            // Strictly increasing as observed by a single thread.
                            assert!(serial > last);
                            last = serial;
                            seen.push(serial);
                        }
                        seen
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let unique: HashSet<u64> = all.iter().copied().collect();
        assert_eq!(unique.len(), THREADS * PER_THREAD);
        assert_eq!(serials.current(), 1_000 + (THREADS * PER_THREAD) as u64);
    }
}
